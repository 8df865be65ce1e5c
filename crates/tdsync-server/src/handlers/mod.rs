//! Method dispatch and the response plumbing shared by all verbs.

pub mod dav;
pub mod editor;
pub mod subscribe;

use crate::auth;
use crate::core::Core;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Request, Response, StatusCode};
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use tdsync_core::CoreError;
use thiserror::Error;

pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const NO_CACHE: &str = "no-store, no-cache, must-revalidate, post-check=0, pre-check=0";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("http error: {0}")]
    Http(#[from] hyper::http::Error),
}

pub type HandlerResult = Result<Response<Full<Bytes>>, HandlerError>;

/// Entry point for every request.
pub async fn handle(core: Arc<Core>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    let result = route(&core, req).await;
    let mut response = match result {
        Ok(response) => response,
        Err(err) => error_response(&err),
    };
    add_common_headers(&mut response);
    debug!("{} {} -> {}", method, path, response.status());
    response
}

async fn route(core: &Arc<Core>, req: Request<Incoming>) -> HandlerResult {
    let method = req.method().as_str().to_string();

    // OPTIONS stays open: CORS preflights arrive without credentials.
    if method != "OPTIONS" {
        let header = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if !auth::authorized(&core.config, header) {
            return Err(HandlerError::Unauthorized);
        }
    }

    match method.as_str() {
        "OPTIONS" => dav::options(core, &req),
        "PROPFIND" => dav::propfind(core, &req),
        "GET" => dav::get(core, &req),
        "HEAD" => dav::head(core, &req),
        "PUT" => dav::put(core, req).await,
        "MKCOL" => dav::mkcol(core, &req),
        "DELETE" => dav::delete(core, &req),
        "SUBSCRIBE" => subscribe::subscribe(core, &req).await,
        "EDITOR" => editor::editor(core, &req),
        other => {
            warn!("unsupported method {}", other);
            Err(HandlerError::MethodNotAllowed)
        }
    }
}

fn error_response(err: &HandlerError) -> Response<Full<Bytes>> {
    let status = status_for(err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("request failed: {}", err);
        return plain(status, Bytes::from(err.to_string()));
    }
    let mut response = plain(status, Bytes::new());
    if matches!(err, HandlerError::Unauthorized) {
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"Enter credentials\""),
        );
    }
    response
}

fn status_for(err: &HandlerError) -> StatusCode {
    match err {
        HandlerError::Core(CoreError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
        HandlerError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        HandlerError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        HandlerError::Unauthorized => StatusCode::UNAUTHORIZED,
        HandlerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        HandlerError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        HandlerError::Io(err) if err.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        HandlerError::Io(_) | HandlerError::Body(_) | HandlerError::Http(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// A response with the given status and body, no content type.
pub fn plain(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

/// A 207 response carrying a multistatus document.
pub fn multistatus_response(doc: String) -> HandlerResult {
    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(CONTENT_TYPE, XML_CONTENT_TYPE)
        .body(Full::new(Bytes::from(doc)))?)
}

fn add_common_headers(response: &mut Response<Full<Bytes>>) {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert("dav", HeaderValue::from_static("1"));
}

/// `depth` request header: `0` means self only, anything else recursive.
/// PROPFIND defaults to recursive, SUBSCRIBE to self-only.
pub fn parse_depth(req: &Request<Incoming>, default: u32) -> u32 {
    match req.headers().get("depth").and_then(|v| v.to_str().ok()) {
        Some("0") => 0,
        Some(_) => 1,
        None => default,
    }
}

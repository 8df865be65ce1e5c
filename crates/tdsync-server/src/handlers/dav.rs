//! The plain WebDAV verbs: filesystem in, bytes out.

use super::{multistatus_response, parse_depth, plain, HandlerError, HandlerResult, XML_CONTENT_TYPE};
use crate::core::Core;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use log::warn;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tdsync_core::{xml, CoreError, PathMapper};

const OCTET_STREAM: &str = "application/octet-stream";
const ALLOW_HEADERS: &str = "accept, authorization, content-type, depth, timeout, cursor, x-oc-mtime";

pub fn options(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let mut methods = String::from("GET,HEAD,OPTIONS,PUT,PROPFIND,MKCOL,DELETE,SUBSCRIBE");
    if core.config.open_in_editor.is_some() {
        methods.push_str(",EDITOR");
    }
    let origin = req
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*")
        .to_string();

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("allow", methods.as_str())
        .header("access-control-allow-methods", methods.as_str())
        .header("access-control-allow-credentials", "true")
        .header("access-control-allow-headers", ALLOW_HEADERS)
        .header("access-control-allow-origin", origin)
        .body(Full::new(Bytes::new()))?)
}

pub fn propfind(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    let depth = parse_depth(req, 1);
    propfind_response(core, &relative, depth)
}

/// Shared with MKCOL (which answers with the listing of the directory it
/// just created) and with SUBSCRIBE's idle-recovery fallback.
pub fn propfind_response(core: &Arc<Core>, relative: &str, depth: u32) -> HandlerResult {
    let absolute = core.mapper.to_absolute(relative);
    let meta =
        fs::metadata(&absolute).map_err(|_| CoreError::NotFound(relative.to_string()))?;

    let mut entries = vec![relative.to_string()];
    if depth != 0 && meta.is_dir() {
        collect_subtree(&core.mapper, relative, &mut entries);
    }
    let cursor = core
        .watchers
        .has_session(relative)
        .then(|| core.bus.cursor());
    multistatus_response(xml::multistatus(&core.mapper, &entries, cursor))
}

fn collect_subtree(mapper: &PathMapper, relative: &str, out: &mut Vec<String>) {
    let absolute = mapper.to_absolute(relative);
    let read_dir = match fs::read_dir(&absolute) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            // The listing survives; the directory just contributes nothing.
            warn!("read_dir {:?} failed: {}", absolute, err);
            return;
        }
    };
    let mut children: Vec<(String, bool)> = Vec::new();
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        children.push((name, is_dir));
    }
    children.sort();
    for (name, is_dir) in children {
        let child = if relative == "." {
            name
        } else {
            format!("{}/{}", relative, name)
        };
        out.push(child.clone());
        if is_dir {
            collect_subtree(mapper, &child, out);
        }
    }
}

pub fn get(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    let absolute = core.mapper.to_absolute(&relative);
    let meta = fs::metadata(&absolute).map_err(|_| CoreError::NotFound(relative.clone()))?;
    if meta.is_dir() {
        return Err(HandlerError::BadRequest(format!(
            "{} is a directory",
            relative
        )));
    }
    let body = fs::read(&absolute)?;

    // A real content fetch means the client is alive, not storming.
    core.limiter.lock().unwrap().on_get();

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, OCTET_STREAM)
        .body(Full::new(Bytes::from(body)))?)
}

pub fn head(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    let absolute = core.mapper.to_absolute(&relative);
    let meta = fs::metadata(&absolute).map_err(|_| CoreError::NotFound(relative.clone()))?;
    let len = if meta.is_dir() { 0 } else { meta.len() };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, OCTET_STREAM)
        .header(CONTENT_LENGTH, len)
        .body(Full::new(Bytes::new()))?)
}

pub async fn put(core: &Arc<Core>, req: Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    if relative == "." {
        return Err(HandlerError::BadRequest("cannot PUT to the root".into()));
    }

    // Validate the mtime stamp before touching the filesystem.
    let stamp = match req
        .headers()
        .get("x-oc-mtime")
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => Some(parse_mtime(raw)?),
        None => None,
    };

    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|err| HandlerError::Body(err.to_string()))?
        .to_bytes();

    let absolute = core.mapper.to_absolute(&relative);
    fs::write(&absolute, &body)?;

    let mut response = plain(StatusCode::OK, Bytes::new());
    if let Some(stamp) = stamp {
        let file = fs::OpenOptions::new().append(true).open(&absolute)?;
        file.set_times(
            fs::FileTimes::new()
                .set_accessed(stamp)
                .set_modified(stamp),
        )?;
        response
            .headers_mut()
            .insert("x-oc-mtime", HeaderValue::from_static("accepted"));
    }
    Ok(response)
}

fn parse_mtime(raw: &str) -> Result<SystemTime, HandlerError> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| HandlerError::Unprocessable(format!("invalid x-oc-mtime {:?}", raw)))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(HandlerError::Unprocessable(format!(
            "invalid x-oc-mtime {:?}",
            raw
        )));
    }
    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs_f64(seconds))
}

pub fn mkcol(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    let absolute = core.mapper.to_absolute(&relative);
    match fs::create_dir(&absolute) {
        Ok(()) => propfind_response(core, &relative, 1),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(Full::new(Bytes::from(xml::error_document(
                "MethodNotAllowed",
            ))))?),
        Err(err) => Err(err.into()),
    }
}

pub fn delete(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    if relative == "." {
        return Err(HandlerError::BadRequest("cannot DELETE the root".into()));
    }
    let absolute = core.mapper.to_absolute(&relative);
    let meta =
        fs::symlink_metadata(&absolute).map_err(|_| CoreError::NotFound(relative.clone()))?;
    if meta.is_dir() {
        fs::remove_dir_all(&absolute)?;
    } else {
        fs::remove_file(&absolute)?;
    }
    Ok(plain(StatusCode::NO_CONTENT, Bytes::new()))
}

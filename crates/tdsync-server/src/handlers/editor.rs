//! The EDITOR verb: hand a file to the developer's editor of choice.

use super::{plain, HandlerError, HandlerResult};
use crate::core::Core;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, LOCATION};
use hyper::{Request, StatusCode};
use log::info;
use std::process::Command;
use std::sync::Arc;
use tdsync_core::CoreError;

pub fn editor(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let Some(command) = &core.config.open_in_editor else {
        return Err(HandlerError::MethodNotAllowed);
    };
    let relative = core.mapper.to_relative(req.uri().path())?;
    let absolute = core.mapper.to_absolute(&relative);
    if !absolute.is_file() {
        return Err(CoreError::NotFound(relative).into());
    }

    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| HandlerError::BadRequest("empty open-in-editor command".into()))?;
    // Fire and forget; the editor owns its own lifetime.
    Command::new(program)
        .args(parts)
        .arg(&absolute)
        .spawn()
        .map_err(HandlerError::Io)?;
    info!("opened {:?} in {}", absolute, program);

    let mut response = plain(StatusCode::FOUND, Bytes::new());
    let location = HeaderValue::from_str(req.uri().path())
        .unwrap_or_else(|_| HeaderValue::from_static("/"));
    response.headers_mut().insert(LOCATION, location);
    Ok(response)
}

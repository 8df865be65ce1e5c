//! WebDAV-flavored HTTP server that syncs a directory of userscripts
//! with a userscript-manager browser extension.
//!
//! Standard WebDAV verbs (PROPFIND, GET, PUT, MKCOL, DELETE) operate on
//! the storage root directly; the custom SUBSCRIBE verb long-polls the
//! change-notification core in [`tdsync_core`], and EDITOR hands a file
//! to a configured external editor.

pub mod auth;
pub mod config;
pub mod core;
pub mod handlers;
pub mod server;

pub use crate::core::Core;
pub use config::{CliArgs, Config, ConfigError};
pub use server::{serve, serve_background, ServerHandle};

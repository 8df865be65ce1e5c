//! Change-notification core for the tdsync WebDAV server.
//!
//! The pieces here are HTTP-agnostic: [`PathMapper`] normalizes request
//! paths into root-relative POSIX strings, [`xml`] renders `multistatus`
//! documents, [`WatcherSet`] owns the per-directory `notify` sessions, and
//! [`ChangeBus`] debounces their events and delivers them to parked
//! long-poll subscriptions.

pub mod bus;
pub mod error;
pub mod paths;
pub mod watch;
pub mod xml;

pub use bus::{ChangeBus, Registration, DEBOUNCE_WINDOW};
pub use error::{CoreError, Result};
pub use paths::PathMapper;
pub use watch::{WatcherSet, COALESCE_WINDOW};

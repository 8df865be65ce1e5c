//! Filesystem watch sessions.
//!
//! One session exists per `(path, recursive)` pair for the life of the
//! process. Each session runs a `notify` watcher on its own thread,
//! normalizes OS events to root-relative POSIX paths and posts them to the
//! [`ChangeBus`]. A dead session removes itself from the set so the next
//! subscriber recreates it.

use crate::bus::ChangeBus;
use crate::error::{CoreError, Result};
use log::{debug, error, info, warn};
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Repeated events for the same path inside this window are kernel noise.
pub const COALESCE_WINDOW: Duration = Duration::from_secs(1);

const POLL_TICK: Duration = Duration::from_millis(250);

/// The set of live watch sessions for one storage root.
pub struct WatcherSet {
    root: PathBuf,
    bus: Arc<ChangeBus>,
    sessions: Arc<Mutex<HashSet<(String, bool)>>>,
    shutdown: Arc<AtomicBool>,
}

impl WatcherSet {
    pub fn new<P: Into<PathBuf>>(root: P, bus: Arc<ChangeBus>) -> Self {
        Self {
            root: root.into(),
            bus,
            sessions: Arc::new(Mutex::new(HashSet::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotently start a watch session for `path`.
    ///
    /// `path` is root-relative; `recursive` decides whether descendants
    /// are covered. Re-requesting a running session is a no-op.
    pub fn ensure_watch(&self, path: &str, recursive: bool) -> Result<()> {
        let key = (path.to_string(), recursive);
        {
            let sessions = self.sessions.lock().unwrap();
            if sessions.contains(&key) {
                return Ok(());
            }
        }

        let absolute = if path == "." {
            self.root.clone()
        } else {
            self.root.join(path.replace('/', std::path::MAIN_SEPARATOR_STR))
        };
        if !absolute.is_dir() {
            return Err(CoreError::NotFound(path.to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&absolute, mode)?;

        let mut sessions = self.sessions.lock().unwrap();
        // Lost the race with a concurrent ensure_watch for the same key.
        if !sessions.insert(key.clone()) {
            return Ok(());
        }
        drop(sessions);

        info!("watching {:?} (recursive: {})", absolute, recursive);
        let session = Session {
            root: self.root.clone(),
            watch_path: path.to_string(),
            bus: Arc::clone(&self.bus),
            sessions: Arc::clone(&self.sessions),
            shutdown: Arc::clone(&self.shutdown),
            key,
            recent: HashMap::new(),
        };
        thread::spawn(move || session.run(watcher, rx));
        Ok(())
    }

    /// Whether any session covers exactly `path` (at either recursion).
    pub fn has_session(&self, path: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        sessions.contains(&(path.to_string(), true)) || sessions.contains(&(path.to_string(), false))
    }
}

impl Drop for WatcherSet {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

struct Session {
    root: PathBuf,
    watch_path: String,
    bus: Arc<ChangeBus>,
    sessions: Arc<Mutex<HashSet<(String, bool)>>>,
    shutdown: Arc<AtomicBool>,
    key: (String, bool),
    recent: HashMap<String, Instant>,
}

impl Session {
    fn run(
        mut self,
        _watcher: notify::RecommendedWatcher,
        rx: mpsc::Receiver<std::result::Result<notify::Event, notify::Error>>,
    ) {
        loop {
            match rx.recv_timeout(POLL_TICK) {
                Ok(Ok(event)) => self.forward(event),
                Ok(Err(err)) => {
                    error!("watch session {:?} failed: {}", self.watch_path, err);
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("watch channel for {:?} closed", self.watch_path);
                    break;
                }
            }
        }
        // Tear down so the next subscriber restarts the session, and wake
        // anyone parked on this path with what they have.
        self.sessions.lock().unwrap().remove(&self.key);
        self.bus.resolve_for_path(&self.watch_path);
    }

    fn forward(&mut self, event: notify::Event) {
        if is_trivial(&event.kind) {
            return;
        }
        for path in &event.paths {
            let Some(relative) = relative_to_root(&self.root, path) else {
                continue;
            };
            if self.coalesced(&relative) {
                continue;
            }
            debug!("fs event {:?} -> {}", event.kind, relative);
            self.bus.post(relative);
        }
    }

    fn coalesced(&mut self, relative: &str) -> bool {
        let now = Instant::now();
        if let Some(last) = self.recent.get(relative) {
            if now.duration_since(*last) < COALESCE_WINDOW {
                return true;
            }
        }
        if self.recent.len() > 1024 {
            self.recent
                .retain(|_, seen| now.duration_since(*seen) < COALESCE_WINDOW);
        }
        self.recent.insert(relative.to_string(), now);
        false
    }
}

/// Event kinds that imply no content change.
fn is_trivial(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(_) | EventKind::Any | EventKind::Other)
}

/// Convert an absolute event path to a root-relative POSIX string.
/// The root itself maps to `"."`.
fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = stripped
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        Some(".".to_string())
    } else {
        Some(segments.join("/"))
    }
}

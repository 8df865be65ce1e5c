//! The SUBSCRIBE verb: a long-poll resolved by the change bus.
//!
//! The client fires up to four near-simultaneous SUBSCRIBEs on every
//! PROPFIND/GET burst, so a naive long-poll would pin four connections
//! per burst. The void-budget limiter answers the first four instantly,
//! converts a SUBSCRIBE from a long-idle client back into a PROPFIND, and
//! otherwise caps the wait at ten seconds minus the gap since the
//! previous SUBSCRIBE.

use super::{dav, multistatus_response, parse_depth, plain, HandlerResult};
use crate::core::Core;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::{Request, StatusCode};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tdsync_core::xml;

/// Instant-204 answers granted to a cold or freshly-served client.
pub const INITIAL_VOID_BUDGET: u32 = 4;

/// A client quiet for this long gets a PROPFIND answer instead of a poll.
const IDLE_RECOVERY_GAP: Duration = Duration::from_secs(11);

/// Ceiling for the effective wait once the budget is spent.
const CLAMP_CEILING_SECS: f64 = 10.0;

const DEFAULT_TIMEOUT_SECS: i64 = 60;

/// Outcome of admitting one SUBSCRIBE request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    /// Answer with whatever is pending, right now.
    Immediate,
    /// Answer as if the request had been a PROPFIND.
    AsPropfind,
    /// Long-poll, but no longer than this.
    Clamped(Duration),
}

/// Process-wide SUBSCRIBE admission state.
#[derive(Debug)]
pub struct VoidBudget {
    budget: u32,
    last_subscribe_at: Option<Instant>,
}

impl VoidBudget {
    pub fn new() -> Self {
        Self {
            budget: INITIAL_VOID_BUDGET,
            last_subscribe_at: None,
        }
    }

    pub fn on_subscribe(&mut self, now: Instant) -> Gate {
        let gap = self.last_subscribe_at.map(|at| now.duration_since(at));
        self.last_subscribe_at = Some(now);

        if self.budget > 0 {
            self.budget -= 1;
            return Gate::Immediate;
        }
        let gap = gap.unwrap_or(Duration::MAX);
        if gap >= IDLE_RECOVERY_GAP {
            return Gate::AsPropfind;
        }
        let seconds = (CLAMP_CEILING_SECS - gap.as_secs_f64()).clamp(0.0, CLAMP_CEILING_SECS);
        Gate::Clamped(Duration::from_secs_f64(seconds))
    }

    /// A non-empty delivery proves the client consumed a real change.
    pub fn on_delivery(&mut self) {
        self.budget = INITIAL_VOID_BUDGET;
    }

    /// A content fetch is evidence the client is alive, not storming.
    pub fn on_get(&mut self) {
        self.budget = self.budget.saturating_sub(1).max(INITIAL_VOID_BUDGET);
    }
}

impl Default for VoidBudget {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn subscribe(core: &Arc<Core>, req: &Request<Incoming>) -> HandlerResult {
    let relative = core.mapper.to_relative(req.uri().path())?;
    let depth = parse_depth(req, 0);
    let requested = requested_timeout(req);
    // The client may echo our cursor back; it is bookkeeping only.
    let _cursor = req
        .headers()
        .get("cursor")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let gate = core.limiter.lock().unwrap().on_subscribe(Instant::now());
    let wait = match gate {
        Gate::AsPropfind => {
            debug!("SUBSCRIBE {:?} from idle client answered as PROPFIND", relative);
            return dav::propfind_response(core, &relative, parse_depth(req, 1));
        }
        Gate::Immediate => Duration::ZERO,
        Gate::Clamped(limit) => limit,
    };
    debug!(
        "SUBSCRIBE {:?} depth {} requested {}s effective {:.1}s",
        relative,
        depth,
        requested,
        wait.as_secs_f64()
    );

    let matched = if wait.is_zero() {
        core.bus.poll_pending(&relative, depth)
    } else {
        wait_for_changes(core, &relative, depth, wait).await
    };

    if matched.is_empty() {
        return Ok(plain(StatusCode::NO_CONTENT, Bytes::new()));
    }
    core.limiter.lock().unwrap().on_delivery();

    let mut paths = matched;
    if core.config.meta_touch {
        add_meta_siblings(core, &mut paths);
    }
    let relatives: Vec<String> = paths.into_iter().collect();
    multistatus_response(xml::multistatus(
        &core.mapper,
        &relatives,
        Some(core.bus.cursor()),
    ))
}

/// Park on the bus until a non-meta-only change arrives or the wall-clock
/// budget runs out. Meta-only wakeups re-enter the wait on the remainder.
async fn wait_for_changes(
    core: &Arc<Core>,
    relative: &str,
    depth: u32,
    wait: Duration,
) -> BTreeSet<String> {
    if let Err(err) = core.watchers.ensure_watch(relative, depth >= 1) {
        // The subscription still parks; a wider session may cover it.
        warn!("cannot watch {:?}: {}", relative, err);
    }
    let deadline = Instant::now() + wait;
    loop {
        let registration = core.bus.register(relative, depth);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return BTreeSet::new();
        }
        match tokio::time::timeout(remaining, registration.wait()).await {
            Err(_) => return BTreeSet::new(),
            Ok(matched) => {
                if !matched.is_empty() && matched.iter().all(|p| p.ends_with(".meta.json")) {
                    debug!("meta-only wakeup on {:?} suppressed", relative);
                    continue;
                }
                return matched;
            }
        }
    }
}

/// For every matched `*.user.js`, bump the mtime of its `*.meta.json`
/// sibling (when it exists) and list it alongside, so the client re-reads
/// script metadata.
fn add_meta_siblings(core: &Arc<Core>, paths: &mut BTreeSet<String>) {
    let scripts: Vec<String> = paths
        .iter()
        .filter(|p| p.ends_with(".user.js"))
        .cloned()
        .collect();
    for script in scripts {
        let meta = meta_sibling(&script);
        let absolute = core.mapper.to_absolute(&meta);
        if !absolute.is_file() {
            continue;
        }
        if let Err(err) = touch(&absolute) {
            warn!("meta-touch {:?}: {}", absolute, err);
        }
        paths.insert(meta);
    }
}

fn meta_sibling(script: &str) -> String {
    let stem = script.strip_suffix(".user.js").unwrap_or(script);
    format!("{}.meta.json", stem)
}

fn touch(path: &std::path::Path) -> std::io::Result<()> {
    let now = std::time::SystemTime::now();
    let file = fs::OpenOptions::new().append(true).open(path)?;
    file.set_times(fs::FileTimes::new().set_accessed(now).set_modified(now))
}

/// `timeout` header in seconds; default 60, never negative.
fn requested_timeout(req: &Request<Incoming>) -> i64 {
    req.headers()
        .get("timeout")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .max(0)
}

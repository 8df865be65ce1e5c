//! Process-wide change aggregation.
//!
//! Watch sessions post root-relative paths here; SUBSCRIBE requests park a
//! waiter here. A 500 ms debounce window coalesces bursts, then a flush
//! matches the accumulated set against every waiter and resolves the ones
//! whose filter caught something. The pending set is drained atomically
//! with each flush, so all waiters resolved in one flush observe the same
//! snapshot.

use log::{debug, trace};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Quiet interval before a flush runs.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Aggregates filesystem changes and delivers them to waiting
/// subscriptions. One instance exists per server.
pub struct ChangeBus {
    state: Mutex<BusState>,
    runtime: tokio::runtime::Handle,
}

struct BusState {
    /// Changes accumulated since the last flush.
    changes: HashSet<String>,
    waiters: HashMap<u64, Waiter>,
    next_id: u64,
    /// Bumped on every post; a debounce task only flushes if its
    /// generation is still current when the timer fires.
    debounce_gen: u64,
    cursor: u64,
}

struct Waiter {
    path: String,
    depth: u32,
    tx: oneshot::Sender<BTreeSet<String>>,
}

/// A parked subscription. Dropping it (for example because the client
/// disconnected and the request future was torn down) deregisters it.
pub struct Registration {
    bus: Arc<ChangeBus>,
    id: u64,
    rx: Option<oneshot::Receiver<BTreeSet<String>>>,
}

impl ChangeBus {
    /// Must be called from within a tokio runtime; debounce timers are
    /// spawned onto it.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState {
                changes: HashSet::new(),
                waiters: HashMap::new(),
                next_id: 0,
                debounce_gen: 0,
                cursor: 0,
            }),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    /// Record a change and (re)arm the debounce timer.
    pub fn post(self: &Arc<Self>, change: String) {
        let generation = {
            let mut state = self.state.lock().unwrap();
            trace!("post: {}", change);
            state.changes.insert(change);
            state.debounce_gen += 1;
            state.debounce_gen
        };
        let bus = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            let mut state = bus.state.lock().unwrap();
            if state.debounce_gen == generation {
                flush_locked(&mut state);
            }
        });
    }

    /// Park a subscription for `path` at `depth`.
    pub fn register(self: &Arc<Self>, path: &str, depth: u32) -> Registration {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.waiters.insert(
            id,
            Waiter {
                path: path.to_string(),
                depth,
                tx,
            },
        );
        debug!("subscriber {} parked on {:?} depth {}", id, path, depth);
        Registration {
            bus: Arc::clone(self),
            id,
            rx: Some(rx),
        }
    }

    /// Matching changes already pending, without waiting for a flush.
    /// Delivered entries are removed from the pending set.
    pub fn poll_pending(&self, path: &str, depth: u32) -> BTreeSet<String> {
        let mut state = self.state.lock().unwrap();
        let matched: BTreeSet<String> = state
            .changes
            .iter()
            .filter(|change| matches(path, depth, change))
            .cloned()
            .collect();
        for change in &matched {
            state.changes.remove(change);
        }
        matched
    }

    /// Resolve every waiter parked on exactly `path` with whatever has
    /// accumulated for it, or the empty set. Used when a watch session
    /// dies so its subscribers do not hang until their deadline.
    pub fn resolve_for_path(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<u64> = state
            .waiters
            .iter()
            .filter(|(_, w)| w.path == path)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let Some(waiter) = state.waiters.remove(&id) else {
                continue;
            };
            let matched: BTreeSet<String> = state
                .changes
                .iter()
                .filter(|change| matches(&waiter.path, waiter.depth, change))
                .cloned()
                .collect();
            debug!("subscriber {} resolved on watch failure ({} paths)", id, matched.len());
            let _ = waiter.tx.send(matched);
        }
    }

    /// Opaque counter echoed to clients; bumps whenever a flush had
    /// changes to hand out.
    pub fn cursor(&self) -> u64 {
        self.state.lock().unwrap().cursor
    }

    fn deregister(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        if state.waiters.remove(&id).is_some() {
            debug!("subscriber {} deregistered", id);
        }
    }
}

impl Registration {
    /// Await resolution. Resolves with the matched set, or the empty set
    /// if the bus abandoned the waiter.
    pub async fn wait(mut self) -> BTreeSet<String> {
        let rx = self.rx.take().expect("registration awaited twice");
        rx.await.unwrap_or_default()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.bus.deregister(self.id);
    }
}

fn flush_locked(state: &mut BusState) {
    if state.changes.is_empty() {
        return;
    }
    state.cursor += 1;

    let mut resolved: Vec<(u64, BTreeSet<String>)> = Vec::new();
    for (id, waiter) in &state.waiters {
        let matched: BTreeSet<String> = state
            .changes
            .iter()
            .filter(|change| matches(&waiter.path, waiter.depth, change))
            .cloned()
            .collect();
        if !matched.is_empty() {
            resolved.push((*id, matched));
        }
    }
    trace!(
        "flush: {} changes, {} subscribers woken, cursor {}",
        state.changes.len(),
        resolved.len(),
        state.cursor
    );
    for (id, matched) in resolved {
        if let Some(waiter) = state.waiters.remove(&id) {
            debug!("flush: waking subscriber {} with {} paths", id, matched.len());
            let _ = waiter.tx.send(matched);
        }
    }
    state.changes.clear();
}

/// Subscription filter. `path == "."` covers the whole tree; depth 0
/// narrows the match to the subscribed node itself.
pub fn matches(path: &str, depth: u32, change: &str) -> bool {
    if depth == 0 {
        return change == path;
    }
    path == "."
        || change == path
        || (change.len() > path.len()
            && change.starts_with(path)
            && change.as_bytes()[path.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::timeout;

    #[test]
    fn match_rules() {
        assert!(matches(".", 1, "foo/bar.user.js"));
        assert!(matches("foo", 1, "foo"));
        assert!(matches("foo", 1, "foo/bar.user.js"));
        assert!(!matches("foo", 1, "foo-not-equal/file"));
        assert!(!matches("foo", 0, "foo/bar.user.js"));
        assert!(matches("foo", 0, "foo"));
        assert!(!matches(".", 0, "foo"));
    }

    #[tokio::test]
    async fn burst_is_delivered_once() {
        let bus = ChangeBus::new();
        let registration = bus.register(".", 1);
        bus.post("a.user.js".to_string());
        bus.post("b.user.js".to_string());
        bus.post("a.user.js".to_string());

        let started = Instant::now();
        let matched = timeout(Duration::from_secs(2), registration.wait())
            .await
            .expect("flush never fired");
        assert!(started.elapsed() >= DEBOUNCE_WINDOW);
        assert_eq!(
            matched.into_iter().collect::<Vec<_>>(),
            vec!["a.user.js".to_string(), "b.user.js".to_string()]
        );
    }

    #[tokio::test]
    async fn depth_zero_ignores_descendants() {
        let bus = ChangeBus::new();
        let registration = bus.register("foo", 0);
        bus.post("foo/bar".to_string());

        let outcome = timeout(Duration::from_millis(900), registration.wait()).await;
        assert!(outcome.is_err(), "depth-0 waiter must not wake for a child");
    }

    #[tokio::test]
    async fn unrelated_sibling_does_not_match() {
        let bus = ChangeBus::new();
        let registration = bus.register("test", 1);
        bus.post("test-not-equal/file".to_string());

        let outcome = timeout(Duration::from_millis(900), registration.wait()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn pending_set_drains_on_flush() {
        let bus = ChangeBus::new();
        bus.post("orphan.txt".to_string());
        tokio::time::sleep(DEBOUNCE_WINDOW + Duration::from_millis(200)).await;
        // Flushed with no waiters; nothing carries over.
        assert!(bus.poll_pending(".", 1).is_empty());
    }

    #[tokio::test]
    async fn poll_pending_consumes_matches() {
        let bus = ChangeBus::new();
        bus.post("foo/a.user.js".to_string());
        bus.post("bar/b.user.js".to_string());

        let matched = bus.poll_pending("foo", 1);
        assert_eq!(matched.len(), 1);
        assert!(matched.contains("foo/a.user.js"));
        // The unmatched entry is still pending.
        let rest = bus.poll_pending(".", 1);
        assert!(rest.contains("bar/b.user.js"));
    }

    #[tokio::test]
    async fn dropping_a_registration_deregisters_it() {
        let bus = ChangeBus::new();
        let registration = bus.register(".", 1);
        drop(registration);
        assert_eq!(bus.state.lock().unwrap().waiters.len(), 0);
    }

    #[tokio::test]
    async fn watch_failure_resolves_with_accumulated() {
        let bus = ChangeBus::new();
        let registration = bus.register("foo", 1);
        bus.post("foo/a.user.js".to_string());
        bus.resolve_for_path("foo");

        let matched = timeout(Duration::from_millis(200), registration.wait())
            .await
            .expect("failure must resolve promptly");
        assert!(matched.contains("foo/a.user.js"));
    }

    #[tokio::test]
    async fn cursor_bumps_per_flush() {
        let bus = ChangeBus::new();
        assert_eq!(bus.cursor(), 0);
        bus.post("a".to_string());
        tokio::time::sleep(DEBOUNCE_WINDOW + Duration::from_millis(200)).await;
        assert_eq!(bus.cursor(), 1);
        bus.post("b".to_string());
        bus.post("c".to_string());
        tokio::time::sleep(DEBOUNCE_WINDOW + Duration::from_millis(200)).await;
        assert_eq!(bus.cursor(), 2);
    }
}

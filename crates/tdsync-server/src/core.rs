//! Shared server state handed to every request handler.

use crate::config::Config;
use crate::handlers::subscribe::VoidBudget;
use std::sync::{Arc, Mutex};
use tdsync_core::{ChangeBus, PathMapper, WatcherSet};

/// Everything a handler needs: the resolved configuration, the path
/// mapper, the change bus with its watch sessions, and the SUBSCRIBE
/// rate-limiter state.
pub struct Core {
    pub config: Config,
    pub mapper: PathMapper,
    pub bus: Arc<ChangeBus>,
    pub watchers: WatcherSet,
    pub limiter: Mutex<VoidBudget>,
}

impl Core {
    /// Must be called from within a tokio runtime; the change bus spawns
    /// its debounce timers onto it.
    pub fn new(config: Config) -> Arc<Self> {
        let bus = ChangeBus::new();
        let mapper = PathMapper::new(config.path.clone());
        let watchers = WatcherSet::new(config.path.clone(), Arc::clone(&bus));
        Arc::new(Self {
            config,
            mapper,
            bus,
            watchers,
            limiter: Mutex::new(VoidBudget::new()),
        })
    }
}

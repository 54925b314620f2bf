//! Background purge of expired and idle sessions
//!
//! One sweeper task serves every local manager created by a provider. Managers
//! register weakly, so a dropped manager simply stops being swept.

use super::manager::LocalInner;
use chrono::Utc;
use distsession_core::{DistSessionError, DistSessionResult, ErrorContext};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

type Targets = Arc<Mutex<Vec<Weak<LocalInner>>>>;

pub struct ExpirationSweeper {
    targets: Targets,
    task: JoinHandle<()>,
}

impl ExpirationSweeper {
    /// Spawn the sweep loop on the current tokio runtime
    pub fn start(interval: Duration) -> DistSessionResult<Self> {
        let handle = Handle::try_current().map_err(|e| DistSessionError::Config {
            message: format!("Expiration sweeper requires a tokio runtime: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("sweeper")
                .with_operation("start")
                .with_suggestion("Initialize the session store from within a tokio runtime"),
        })?;

        let targets: Targets = Arc::new(Mutex::new(Vec::new()));
        let task = handle.spawn(sweep_loop(Arc::clone(&targets), interval));
        info!(interval_ms = interval.as_millis() as u64, "Started expiration sweeper");
        Ok(Self { targets, task })
    }

    pub(crate) fn track(&self, inner: Weak<LocalInner>) {
        let mut targets = self.targets.lock();
        targets.retain(|target| target.strong_count() > 0);
        targets.push(inner);
    }

    pub(crate) fn stop(&self) {
        self.task.abort();
        debug!("Stopped expiration sweeper");
    }
}

async fn sweep_loop(targets: Targets, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let live: Vec<Arc<LocalInner>> = targets
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let now = Utc::now();
        for inner in live {
            let purged = inner.purge_expired(now);
            if purged > 0 {
                debug!(purged, "Purged expired sessions");
            }
        }
    }
}

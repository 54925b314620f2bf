//! Process-local session backend

mod manager;
mod sweeper;

pub use manager::{LocalBatch, LocalSession, LocalSessionManager};
pub use sweeper::ExpirationSweeper;

use distsession_core::{
    DistSessionResult, SessionManager, SessionManagerConfiguration, SessionManagerProvider,
    SharedResource, TeardownActions,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Builds [`LocalSessionManager`]s that share one expiration sweeper
pub struct LocalSessionManagerProvider {
    sweeper: Arc<SharedResource<ExpirationSweeper>>,
}

impl Default for LocalSessionManagerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSessionManagerProvider {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(interval: Duration) -> Self {
        Self {
            sweeper: Arc::new(SharedResource::new(
                "expiration-sweeper",
                move || ExpirationSweeper::start(interval),
                ExpirationSweeper::stop,
            )),
        }
    }

    /// Managers currently holding the sweeper
    pub fn sweeper_leases(&self) -> usize {
        self.sweeper.active_leases()
    }
}

impl SessionManagerProvider for LocalSessionManagerProvider {
    fn create_session_manager(
        &self,
        configuration: SessionManagerConfiguration,
        teardown: &mut TeardownActions,
    ) -> DistSessionResult<Arc<dyn SessionManager>> {
        let manager = LocalSessionManager::new(&configuration);

        let lease = self.sweeper.acquire()?;
        lease.track(Arc::downgrade(manager.inner()));
        teardown.push("expiration-sweeper-lease", move || {
            drop(lease);
            Ok(())
        });

        info!(
            deployment = %configuration.store.deployment_name,
            granularity = ?configuration.store.granularity,
            "Created local session manager"
        );
        Ok(Arc::new(manager))
    }
}

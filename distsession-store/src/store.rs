//! Distributable session store
//!
//! The store the embedding framework talks to. Every operation that reaches the
//! session manager holds a lifecycle permit until its batch is resolved, and
//! blocking backend work runs on the blocking pool.

use crate::batch::{ActiveBatch, SuspendedBatchHandle};
use crate::identifier::SessionIdentifierFactory;
use crate::lifecycle::LifecycleLock;
use crate::session::DistributableSession;
use distsession_core::performance::measure_async;
use distsession_core::{
    log_operation_error, log_operation_start, log_operation_success, run_blocking,
    DistSessionError, DistSessionResult, IdentifierFactory, Session, SessionManager,
    SessionManagerConfiguration, SessionManagerProvider, SessionStoreConfig, TeardownActions,
};
use distsession_marshal::create_marshaller;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

type OpenedSession = (Arc<dyn SessionManager>, Box<dyn Session>, SuspendedBatchHandle);

struct StoreState {
    manager: Arc<dyn SessionManager>,
    config: SessionStoreConfig,
}

pub struct DistributableSessionStore {
    provider: Arc<dyn SessionManagerProvider>,
    state: OnceLock<StoreState>,
    lifecycle: LifecycleLock,
    teardown: Mutex<TeardownActions>,
    closed: AtomicBool,
}

impl DistributableSessionStore {
    pub fn new(provider: Arc<dyn SessionManagerProvider>) -> Self {
        Self {
            provider,
            state: OnceLock::new(),
            lifecycle: LifecycleLock::new(),
            teardown: Mutex::new(TeardownActions::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Build and start the session manager described by `options`.
    ///
    /// Resources registered by the provider are torn down again if
    /// construction or startup fails.
    pub async fn init(&self, options: serde_json::Value) -> DistSessionResult<()> {
        log_operation_start!("session_store_init");
        if self.is_closed() {
            return Err(closed_during_init());
        }
        if self.state.get().is_some() {
            return Err(DistSessionError::illegal_state(
                "Session store already initialized",
                "session_store",
                "init",
            ));
        }

        let config = SessionStoreConfig::from_options(&options)?;
        config.validate()?;

        let identifier_factory: Arc<dyn IdentifierFactory> =
            Arc::new(SessionIdentifierFactory::new(config.session_id_length));
        let configuration = SessionManagerConfiguration {
            store: config.clone(),
            identifier_factory,
            marshaller: create_marshaller(config.marshaller)?,
        };

        let provider = Arc::clone(&self.provider);
        let created = run_blocking("create_session_manager", move || {
            let mut teardown = TeardownActions::new();
            let result = provider
                .create_session_manager(configuration, &mut teardown)
                .and_then(|manager| {
                    manager.start()?;
                    Ok(manager)
                });
            match result {
                Ok(manager) => Ok((manager, teardown)),
                Err(e) => {
                    teardown.run_all();
                    Err(e)
                }
            }
        })
        .await;

        let (manager, teardown) = match created {
            Ok(created) => created,
            Err(e) => {
                log_operation_error!("session_store_init", e);
                return Err(e);
            }
        };

        let deployment = config.deployment_name.clone();
        // `close` sets `closed` before it collects the manager and teardown
        // actions under this lock
        let abandoned = {
            let mut registered = self.teardown.lock();
            if self.is_closed() {
                Some(teardown)
            } else if self
                .state
                .set(StoreState {
                    manager: Arc::clone(&manager),
                    config,
                })
                .is_err()
            {
                Some(teardown)
            } else {
                registered.append(teardown);
                None
            }
        };

        if let Some(mut teardown) = abandoned {
            let error = if self.is_closed() {
                closed_during_init()
            } else {
                DistSessionError::illegal_state(
                    "Session store initialized concurrently",
                    "session_store",
                    "init",
                )
            };
            let cleanup = run_blocking("abandon_session_manager", move || {
                let stopped = manager.stop();
                teardown.run_all();
                stopped
            })
            .await;
            if let Err(e) = cleanup {
                warn!(error = %e, "Failed to stop abandoned session manager");
            }
            log_operation_error!("session_store_init", error);
            return Err(error);
        }

        log_operation_success!("session_store_init", deployment = %deployment);
        Ok(())
    }

    fn state(&self) -> DistSessionResult<&StoreState> {
        self.state.get().ok_or_else(|| {
            DistSessionError::illegal_state("Session store not initialized", "session_store", "state")
        })
    }

    pub fn config(&self) -> Option<&SessionStoreConfig> {
        self.state.get().map(|state| &state.config)
    }

    /// Create a new session. Runs synchronously on the caller.
    pub fn create_session(&self, timeout: Duration) -> DistSessionResult<DistributableSession> {
        let mut permit = self.lifecycle.acquire_read()?;
        match self.open_session(timeout) {
            Ok((manager, session, batch)) => Ok(DistributableSession::new(
                manager, session, batch, permit,
            )),
            Err(e) => {
                permit.release();
                Err(e)
            }
        }
    }

    /// The identifier length is fixed at `init`, `_length` is ignored
    pub fn create_session_with_length(
        &self,
        timeout: Duration,
        _length: usize,
    ) -> DistSessionResult<DistributableSession> {
        self.create_session(timeout)
    }

    /// Failures after the batch opened discard it before returning
    fn open_session(&self, timeout: Duration) -> DistSessionResult<OpenedSession> {
        let manager = Arc::clone(&self.state()?.manager);
        let id = manager.identifier_factory().create_identifier();
        let batch = ActiveBatch::new(manager.create_batch()?);
        let (batch, session) = batch.execute(|batch| {
            let mut session = manager.create_session(batch, &id)?;
            session.metadata_mut().set_timeout(timeout);
            Ok(session)
        })?;
        debug!(session_id = %id, "Created session");
        Ok((manager, session, batch.suspend()?))
    }

    /// Look up a session. `None` for missing, invalid or expired sessions.
    pub async fn get(&self, id: &str) -> DistSessionResult<Option<DistributableSession>> {
        let mut permit = self.lifecycle.acquire_read()?;
        let manager = match self.state() {
            Ok(state) => Arc::clone(&state.manager),
            Err(e) => {
                permit.release();
                return Err(e);
            }
        };

        // batch open and lookup both run on the blocking pool
        let lookup = Arc::clone(&manager);
        let lookup_id = id.to_string();
        let looked_up = run_blocking("find_session", move || {
            let batch = ActiveBatch::new(lookup.create_batch()?);
            let found = match batch.backend() {
                Ok(backend) => {
                    Handle::current().block_on(lookup.find_session_async(backend, &lookup_id))
                }
                Err(e) => Err(e),
            };
            Ok((batch, found))
        })
        .await;
        let (batch, found) = match looked_up {
            Ok(looked_up) => looked_up,
            Err(e) => {
                permit.release();
                return Err(e);
            }
        };

        match found {
            Ok(Some(session)) => {
                let batch = batch.suspend()?;
                Ok(Some(DistributableSession::new(manager, session, batch, permit)))
            }
            Ok(None) => {
                let result = run_blocking("commit_batch", move || batch.commit()).await;
                permit.release();
                debug!(session_id = %id, "Session not found");
                result.map(|()| None)
            }
            Err(e) => {
                batch.discard();
                permit.release();
                warn!(session_id = %id, error = %e, "Session lookup failed");
                Err(e)
            }
        }
    }

    /// Hand a session back: record the access, commit, release its permit
    pub async fn put(&self, session: DistributableSession) -> DistSessionResult<()> {
        measure_async(
            "session_store_put",
            run_blocking("session_close", move || session.close()),
        )
        .await
    }

    /// No-op: regeneration already removes the previous session
    pub async fn delete(&self, id: &str) -> DistSessionResult<()> {
        debug!(session_id = %id, "Ignoring delete");
        Ok(())
    }

    /// No-op: bulk eviction belongs to the backend
    pub async fn clear(&self) -> DistSessionResult<()> {
        Ok(())
    }

    pub async fn size(&self) -> DistSessionResult<usize> {
        let _permit = self.lifecycle.acquire_read()?;
        Ok(self.state()?.manager.statistics().active_session_count)
    }

    pub fn retry_timeout(&self) -> u64 {
        0
    }

    pub fn outstanding_permits(&self) -> usize {
        self.lifecycle.outstanding_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the manager and run teardown actions.
    ///
    /// Waits for outstanding operations up to the configured close timeout,
    /// then shuts down regardless. Repeated calls return immediately.
    pub async fn close(&self) -> DistSessionResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Session store already closed");
            return Ok(());
        }

        let timeout = self
            .config()
            .map(SessionStoreConfig::close_timeout)
            .unwrap_or_else(|| SessionStoreConfig::default().close_timeout());
        if !self.lifecycle.acquire_write(timeout).await {
            warn!(
                outstanding = self.lifecycle.outstanding_permits(),
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for in-flight session operations, shutting down anyway"
            );
        }

        let (manager, mut teardown) = {
            let mut registered = self.teardown.lock();
            (
                self.state.get().map(|state| Arc::clone(&state.manager)),
                std::mem::take(&mut *registered),
            )
        };
        if let Some(manager) = manager {
            if let Err(e) = run_blocking("stop_session_manager", move || manager.stop()).await {
                warn!(error = %e, "Failed to stop session manager");
            }
        }

        let actions = teardown.len();
        teardown.run_all();
        info!(teardown_actions = actions, "Session store closed");
        Ok(())
    }
}

fn closed_during_init() -> DistSessionError {
    DistSessionError::illegal_state(
        "Session store closed before initialization completed",
        "session_store",
        "init",
    )
}

impl std::fmt::Debug for DistributableSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributableSessionStore")
            .field("initialized", &self.state.get().is_some())
            .field("outstanding_permits", &self.outstanding_permits())
            .field("closed", &self.is_closed())
            .finish()
    }
}

//! Shared fixtures for store tests
//!
//! A scripted session manager whose lookups and creations can be made to fail
//! or stall after the batch is opened, with counters for every batch transition.

#![allow(dead_code)]

use chrono::Utc;
use distsession_core::{
    async_trait, backend_error, config_error, AttributeMap, Batch, DistSessionResult,
    IdentifierFactory, Session, SessionManager, SessionManagerConfiguration,
    SessionManagerProvider, SessionMetaData, SessionStatistics, SuspendedBatch, TeardownActions,
};
use distsession_store::{DistributableSessionStore, LocalSessionManagerProvider};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("distsession=debug,info")
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct BatchCounters {
    pub created: AtomicUsize,
    pub committed: AtomicUsize,
    pub discarded: AtomicUsize,
}

impl BatchCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

pub struct CountingBatch {
    id: u64,
    counters: Arc<BatchCounters>,
}

impl Batch for CountingBatch {
    fn id(&self) -> u64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn commit(self: Box<Self>) -> DistSessionResult<()> {
        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard(self: Box<Self>) -> DistSessionResult<()> {
        self.counters.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn suspend(self: Box<Self>) -> Box<dyn SuspendedBatch> {
        Box::new(SuspendedCountingBatch { batch: self })
    }
}

struct SuspendedCountingBatch {
    batch: Box<CountingBatch>,
}

impl SuspendedBatch for SuspendedCountingBatch {
    fn id(&self) -> u64 {
        self.batch.id
    }

    fn resume(self: Box<Self>) -> Box<dyn Batch> {
        self.batch
    }
}

#[derive(Default)]
struct SequentialIdentifiers {
    next: AtomicUsize,
}

impl IdentifierFactory for SequentialIdentifiers {
    fn create_identifier(&self) -> String {
        format!("{:034x}", self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Minimal in-memory session state handed out by the scripted manager
pub struct ScriptedSession {
    id: String,
    metadata: SessionMetaData,
    attributes: AttributeMap,
    valid: bool,
    invalidations: Arc<AtomicUsize>,
}

impl Session for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn metadata(&self) -> &SessionMetaData {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut SessionMetaData {
        &mut self.metadata
    }

    fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    fn invalidate(&mut self, _batch: &dyn Batch) -> DistSessionResult<()> {
        self.valid = false;
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>, _batch: &dyn Batch) -> DistSessionResult<()> {
        Ok(())
    }
}

/// Session manager with scripted failures. It never persists sessions.
pub struct ScriptedSessionManager {
    pub counters: Arc<BatchCounters>,
    pub invalidations: Arc<AtomicUsize>,
    /// Number of `create_session` calls that succeed before the rest fail
    pub allowed_creates: usize,
    pub creates: AtomicUsize,
    pub fail_find: bool,
    /// Blocks the calling thread inside `find_session`
    pub lookup_delay: Option<Duration>,
}

impl ScriptedSessionManager {
    pub fn failing() -> Self {
        Self {
            fail_find: true,
            ..Self::empty()
        }
    }

    pub fn empty() -> Self {
        Self {
            counters: Arc::new(BatchCounters::default()),
            invalidations: Arc::new(AtomicUsize::new(0)),
            allowed_creates: 0,
            creates: AtomicUsize::new(0),
            fail_find: false,
            lookup_delay: None,
        }
    }

    pub fn allowing_creates(allowed_creates: usize) -> Self {
        Self {
            allowed_creates,
            ..Self::empty()
        }
    }

    pub fn slow_lookup(delay: Duration) -> Self {
        Self {
            lookup_delay: Some(delay),
            ..Self::empty()
        }
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionManager for ScriptedSessionManager {
    fn start(&self) -> DistSessionResult<()> {
        Ok(())
    }

    fn stop(&self) -> DistSessionResult<()> {
        Ok(())
    }

    fn identifier_factory(&self) -> Arc<dyn IdentifierFactory> {
        Arc::new(SequentialIdentifiers::default())
    }

    fn create_batch(&self) -> DistSessionResult<Box<dyn Batch>> {
        let id = self.counters.created.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(Box::new(CountingBatch {
            id,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn create_session(&self, _batch: &dyn Batch, id: &str) -> DistSessionResult<Box<dyn Session>> {
        if self.creates.fetch_add(1, Ordering::SeqCst) >= self.allowed_creates {
            return Err(backend_error!("cache write rejected", "scripted_manager"));
        }
        Ok(Box::new(ScriptedSession {
            id: id.to_string(),
            metadata: SessionMetaData::new(Utc::now(), Duration::from_secs(60)),
            attributes: AttributeMap::new(),
            valid: true,
            invalidations: Arc::clone(&self.invalidations),
        }))
    }

    fn find_session(
        &self,
        _batch: &dyn Batch,
        _id: &str,
    ) -> DistSessionResult<Option<Box<dyn Session>>> {
        if let Some(delay) = self.lookup_delay {
            std::thread::sleep(delay);
        }
        if self.fail_find {
            return Err(backend_error!("cache read timed out", "scripted_manager"));
        }
        Ok(None)
    }

    fn statistics(&self) -> SessionStatistics {
        SessionStatistics::default()
    }
}

/// Hands out one prepared manager and records teardown runs
pub struct ScriptedProvider {
    pub manager: Arc<ScriptedSessionManager>,
    pub teardown_runs: Arc<AtomicUsize>,
    /// Blocks the calling thread while the manager is built
    pub creation_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(manager: ScriptedSessionManager) -> Self {
        Self {
            manager: Arc::new(manager),
            teardown_runs: Arc::new(AtomicUsize::new(0)),
            creation_delay: None,
        }
    }

    pub fn teardown_runs(&self) -> usize {
        self.teardown_runs.load(Ordering::SeqCst)
    }
}

impl SessionManagerProvider for ScriptedProvider {
    fn create_session_manager(
        &self,
        _configuration: SessionManagerConfiguration,
        teardown: &mut TeardownActions,
    ) -> DistSessionResult<Arc<dyn SessionManager>> {
        if let Some(delay) = self.creation_delay {
            std::thread::sleep(delay);
        }
        let runs = Arc::clone(&self.teardown_runs);
        teardown.push("count-teardown", move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        teardown.push("failing-teardown", || {
            Err(backend_error!("transport already gone", "scripted_provider"))
        });
        Ok(self.manager.clone() as Arc<dyn SessionManager>)
    }
}

/// Registers a teardown action, then fails
#[derive(Default)]
pub struct BrokenProvider {
    pub teardown_runs: Arc<AtomicUsize>,
}

impl SessionManagerProvider for BrokenProvider {
    fn create_session_manager(
        &self,
        _configuration: SessionManagerConfiguration,
        teardown: &mut TeardownActions,
    ) -> DistSessionResult<Arc<dyn SessionManager>> {
        let runs = Arc::clone(&self.teardown_runs);
        teardown.push("partial-resource", move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Err(config_error!("backend location unreachable", "broken_provider"))
    }
}

pub async fn scripted_store(manager: ScriptedSessionManager) -> (DistributableSessionStore, Arc<ScriptedProvider>) {
    init_logging();
    let provider = Arc::new(ScriptedProvider::new(manager));
    let store = DistributableSessionStore::new(provider.clone());
    store.init(serde_json::Value::Null).await.unwrap();
    (store, provider)
}

pub async fn local_store(options: serde_json::Value) -> DistributableSessionStore {
    init_logging();
    let provider = Arc::new(LocalSessionManagerProvider::with_sweep_interval(
        Duration::from_millis(50),
    ));
    let store = DistributableSessionStore::new(provider);
    store.init(options).await.unwrap();
    store
}

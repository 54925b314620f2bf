//! Capability traits for the external session backend
//!
//! The store only talks to its backend through these traits. Every session
//! access takes the active batch by reference, so session state cannot be
//! touched while the batch is suspended.

use crate::config::SessionStoreConfig;
use crate::error::DistSessionResult;
use crate::types::{AttributeMap, AttributeValue, SessionMetaData, SessionStatistics};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of fresh session identifiers
pub trait IdentifierFactory: Send + Sync {
    fn create_identifier(&self) -> String;
}

/// A transactional unit of work bound to the current execution context
pub trait Batch: Send + Sync {
    fn id(&self) -> u64;

    /// Backends downcast to their own batch type through this
    fn as_any(&self) -> &dyn Any;

    fn commit(self: Box<Self>) -> DistSessionResult<()>;

    fn discard(self: Box<Self>) -> DistSessionResult<()>;

    /// Detach from the current context so the batch can cross a thread boundary
    fn suspend(self: Box<Self>) -> Box<dyn SuspendedBatch>;
}

/// A detached batch, carrying no thread affinity
pub trait SuspendedBatch: Send + Sync {
    fn id(&self) -> u64;

    fn resume(self: Box<Self>) -> Box<dyn Batch>;
}

/// Backing state of one session, only reachable inside a batch
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    fn is_valid(&self) -> bool;

    fn metadata(&self) -> &SessionMetaData;

    fn metadata_mut(&mut self) -> &mut SessionMetaData;

    fn attributes(&self) -> &AttributeMap;

    fn attributes_mut(&mut self) -> &mut AttributeMap;

    /// Remove the session from the backend when `batch` commits
    fn invalidate(&mut self, batch: &dyn Batch) -> DistSessionResult<()>;

    /// Persist pending changes into `batch`
    fn close(self: Box<Self>, batch: &dyn Batch) -> DistSessionResult<()>;
}

/// Distributed session manager
#[async_trait]
pub trait SessionManager: Send + Sync {
    fn start(&self) -> DistSessionResult<()>;

    fn stop(&self) -> DistSessionResult<()>;

    fn identifier_factory(&self) -> Arc<dyn IdentifierFactory>;

    fn create_batch(&self) -> DistSessionResult<Box<dyn Batch>>;

    fn create_session(&self, batch: &dyn Batch, id: &str) -> DistSessionResult<Box<dyn Session>>;

    /// Returns `None` for missing, invalid or expired sessions
    fn find_session(
        &self,
        batch: &dyn Batch,
        id: &str,
    ) -> DistSessionResult<Option<Box<dyn Session>>>;

    /// Polled on the blocking pool by the store. Backends with a native
    /// async lookup override this.
    async fn find_session_async(
        &self,
        batch: &dyn Batch,
        id: &str,
    ) -> DistSessionResult<Option<Box<dyn Session>>> {
        self.find_session(batch, id)
    }

    fn statistics(&self) -> SessionStatistics;
}

/// Encodes attribute values for the backend
pub trait ByteBufferMarshaller: Send + Sync {
    fn write(&self, value: &AttributeValue) -> DistSessionResult<Vec<u8>>;

    fn read(&self, bytes: &[u8]) -> DistSessionResult<AttributeValue>;

    fn is_marshallable(&self, value: &AttributeValue) -> bool;
}

/// Everything a provider needs to build a session manager
#[derive(Clone)]
pub struct SessionManagerConfiguration {
    pub store: SessionStoreConfig,
    pub identifier_factory: Arc<dyn IdentifierFactory>,
    pub marshaller: Arc<dyn ByteBufferMarshaller>,
}

/// Builds the session manager at store `init`
pub trait SessionManagerProvider: Send + Sync {
    /// Resources the manager depends on register their release in `teardown`
    fn create_session_manager(
        &self,
        configuration: SessionManagerConfiguration,
        teardown: &mut TeardownActions,
    ) -> DistSessionResult<Arc<dyn SessionManager>>;
}

type TeardownFn = Box<dyn FnOnce() -> DistSessionResult<()> + Send>;

/// Shutdown steps, run in reverse order of registration
#[derive(Default)]
pub struct TeardownActions {
    actions: Vec<(String, TeardownFn)>,
}

impl TeardownActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> DistSessionResult<()> + Send + 'static,
    {
        self.actions.push((name.into(), Box::new(action)));
    }

    /// Move all actions of `other` after the ones already registered
    pub fn append(&mut self, other: TeardownActions) {
        self.actions.extend(other.actions);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action; a failing action never stops the remaining ones
    pub fn run_all(&mut self) {
        while let Some((name, action)) = self.actions.pop() {
            debug!(action = %name, "Running teardown action");
            if let Err(e) = action() {
                warn!(action = %name, error = %e, "Teardown action failed");
            }
        }
    }
}

impl std::fmt::Debug for TeardownActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(name, _)| name))
            .finish()
    }
}

//! distsession store - distributable session store over a batch-oriented backend
//!
//! The store hands out session adapters bound to suspended backend batches and
//! guards every backend operation with a lifecycle permit so shutdown never
//! races in-flight requests. The `local` module provides an in-process backend.

pub mod batch;
pub mod identifier;
pub mod lifecycle;
pub mod local;
pub mod session;
pub mod store;

pub use batch::{ActiveBatch, BatchState, SuspendedBatchHandle};
pub use identifier::SessionIdentifierFactory;
pub use lifecycle::{LifecycleLock, LifecyclePermit};
pub use local::{
    ExpirationSweeper, LocalSessionManager, LocalSessionManagerProvider, DEFAULT_SWEEP_INTERVAL,
};
pub use session::DistributableSession;
pub use store::DistributableSessionStore;

//! Session batch coordination
//!
//! A batch is either active (owned by the flow currently touching session
//! state) or suspended (parked inside a session adapter between requests).
//! Every batch ends in exactly one commit or discard. Dropping a handle that
//! still owns a batch discards it.

use distsession_core::{Batch, DistSessionError, DistSessionResult, SuspendedBatch};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Active,
    Suspended,
    Committed,
    Discarded,
}

fn discard_quietly(batch: Box<dyn Batch>) {
    let id = batch.id();
    match batch.discard() {
        Ok(()) => debug!(batch = id, state = ?BatchState::Discarded, "Batch discarded"),
        Err(e) => warn!(batch = id, error = %e, "Failed to discard batch"),
    }
}

/// Batch bound to the current flow
pub struct ActiveBatch {
    batch: Option<Box<dyn Batch>>,
}

impl ActiveBatch {
    pub fn new(batch: Box<dyn Batch>) -> Self {
        debug!(batch = batch.id(), state = ?BatchState::Active, "Batch active");
        Self { batch: Some(batch) }
    }

    pub fn id(&self) -> Option<u64> {
        self.batch.as_ref().map(|b| b.id())
    }

    pub fn backend(&self) -> DistSessionResult<&dyn Batch> {
        self.batch
            .as_deref()
            .ok_or_else(|| DistSessionError::illegal_state("Batch already closed", "batch", "access"))
    }

    /// Run `f` against the batch; any failure discards it
    pub fn execute<T, F>(self, f: F) -> DistSessionResult<(Self, T)>
    where
        F: FnOnce(&dyn Batch) -> DistSessionResult<T>,
    {
        let result = self.backend().and_then(f);
        match result {
            Ok(value) => Ok((self, value)),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    pub fn suspend(mut self) -> DistSessionResult<SuspendedBatchHandle> {
        let batch = self
            .batch
            .take()
            .ok_or_else(|| DistSessionError::illegal_state("Batch already closed", "batch", "suspend"))?;
        debug!(batch = batch.id(), state = ?BatchState::Suspended, "Batch suspended");
        Ok(SuspendedBatchHandle {
            batch: Some(batch.suspend()),
        })
    }

    pub fn commit(mut self) -> DistSessionResult<()> {
        let batch = self
            .batch
            .take()
            .ok_or_else(|| DistSessionError::illegal_state("Batch already closed", "batch", "commit"))?;
        let id = batch.id();
        batch.commit()?;
        debug!(batch = id, state = ?BatchState::Committed, "Batch committed");
        Ok(())
    }

    /// Roll back. Failures are logged, never returned.
    pub fn discard(mut self) {
        if let Some(batch) = self.batch.take() {
            discard_quietly(batch);
        }
    }
}

impl Drop for ActiveBatch {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            warn!(batch = batch.id(), "Active batch dropped without commit, discarding");
            discard_quietly(batch);
        }
    }
}

/// Batch detached from any flow, safe to move across threads
pub struct SuspendedBatchHandle {
    batch: Option<Box<dyn SuspendedBatch>>,
}

impl SuspendedBatchHandle {
    pub fn id(&self) -> Option<u64> {
        self.batch.as_ref().map(|b| b.id())
    }

    pub fn resume(mut self) -> DistSessionResult<ActiveBatch> {
        let batch = self
            .batch
            .take()
            .ok_or_else(|| DistSessionError::illegal_state("Batch already closed", "batch", "resume"))?;
        Ok(ActiveBatch::new(batch.resume()))
    }
}

impl Drop for SuspendedBatchHandle {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            warn!(batch = batch.id(), "Suspended batch abandoned, discarding");
            discard_quietly(batch.resume());
        }
    }
}

//! Store lifecycle lock
//!
//! Every backend operation holds a read permit from the moment it starts until
//! its batch is resolved. Shutdown takes the write side, which cannot be granted
//! while any permit is outstanding. Once shutdown has begun no new permit is
//! handed out.

use distsession_core::{with_timeout, DistSessionError, DistSessionResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

pub struct LifecycleLock {
    lock: Arc<RwLock<()>>,
    outstanding: Arc<AtomicUsize>,
    writer: Mutex<Option<OwnedRwLockWriteGuard<()>>>,
    closing: AtomicBool,
}

impl Default for LifecycleLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleLock {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            outstanding: Arc::new(AtomicUsize::new(0)),
            writer: Mutex::new(None),
            closing: AtomicBool::new(false),
        }
    }

    /// Non-blocking; fails once shutdown has begun
    pub fn acquire_read(&self) -> DistSessionResult<LifecyclePermit> {
        if self.closing.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let guard = Arc::clone(&self.lock)
            .try_read_owned()
            .map_err(|_| closed_error())?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(LifecyclePermit {
            guard: Some(guard),
            outstanding: Arc::clone(&self.outstanding),
        })
    }

    /// Begin shutdown and wait up to `timeout` for outstanding permits.
    /// Returns whether the write permit was obtained.
    pub async fn acquire_write(&self, timeout: Duration) -> bool {
        self.closing.store(true, Ordering::Release);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match with_timeout(
            Arc::clone(&self.lock).write_owned(),
            timeout_ms,
            "lifecycle_write",
        )
        .await
        {
            Ok(guard) => {
                *self.writer.lock() = Some(guard);
                debug!("Lifecycle write permit acquired");
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn outstanding_permits(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

fn closed_error() -> DistSessionError {
    DistSessionError::illegal_state(
        "Session store is closed or closing",
        "lifecycle",
        "acquire_read",
    )
}

/// Read permit. Released exactly once, either explicitly or on drop.
pub struct LifecyclePermit {
    guard: Option<OwnedRwLockReadGuard<()>>,
    outstanding: Arc<AtomicUsize>,
}

impl LifecyclePermit {
    /// Returns false if the permit was already released
    pub fn release(&mut self) -> bool {
        match self.guard.take() {
            Some(guard) => {
                drop(guard);
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for LifecyclePermit {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LifecyclePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecyclePermit")
            .field("held", &self.is_held())
            .finish()
    }
}

//! Reference-counted shared resources
//!
//! A `SharedResource` is owned by the component that constructs it. The resource
//! is created on first `acquire` and released exactly once, when the last
//! outstanding lease is dropped. A later `acquire` creates a fresh instance.

use crate::error::DistSessionResult;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use tracing::debug;

type Factory<T> = Box<dyn Fn() -> DistSessionResult<T> + Send + Sync>;
type Release<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct SharedResource<T: Send + Sync + 'static> {
    name: String,
    factory: Factory<T>,
    release: Release<T>,
    slot: Mutex<Weak<LeaseInner<T>>>,
}

struct LeaseInner<T> {
    name: String,
    resource: T,
    release: Release<T>,
}

impl<T> Drop for LeaseInner<T> {
    fn drop(&mut self) {
        debug!(resource = %self.name, "Releasing shared resource");
        (self.release)(&self.resource);
    }
}

/// Handle to a shared resource; cloning shares the same lease count
pub struct SharedLease<T> {
    inner: Arc<LeaseInner<T>>,
}

impl<T> Clone for SharedLease<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for SharedLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.resource
    }
}

impl<T: Send + Sync + 'static> SharedResource<T> {
    pub fn new<F, R>(name: impl Into<String>, factory: F, release: R) -> Self
    where
        F: Fn() -> DistSessionResult<T> + Send + Sync + 'static,
        R: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            release: Arc::new(release),
            slot: Mutex::new(Weak::new()),
        }
    }

    pub fn acquire(&self) -> DistSessionResult<SharedLease<T>> {
        let mut slot = self.slot.lock();
        if let Some(inner) = slot.upgrade() {
            return Ok(SharedLease { inner });
        }

        debug!(resource = %self.name, "Creating shared resource");
        let inner = Arc::new(LeaseInner {
            name: self.name.clone(),
            resource: (self.factory)()?,
            release: Arc::clone(&self.release),
        });
        *slot = Arc::downgrade(&inner);
        Ok(SharedLease { inner })
    }

    pub fn active_leases(&self) -> usize {
        self.slot.lock().strong_count()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

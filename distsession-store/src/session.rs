//! Session adapter handed to request handlers
//!
//! Wraps the backend session together with its suspended batch and the
//! lifecycle permit taken when the session was looked up. Attribute access
//! works on the in-memory session state; persisting happens on `close`, which
//! consumes the adapter.

use crate::batch::SuspendedBatchHandle;
use crate::lifecycle::LifecyclePermit;
use chrono::{DateTime, Utc};
use distsession_core::{
    AttributeMap, AttributeValue, DistSessionError, DistSessionResult, Session, SessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct DistributableSession {
    manager: Arc<dyn SessionManager>,
    session: Box<dyn Session>,
    batch: Option<SuspendedBatchHandle>,
    permit: LifecyclePermit,
    start_time: DateTime<Utc>,
    original_id: String,
    destroyed: bool,
}

impl DistributableSession {
    pub(crate) fn new(
        manager: Arc<dyn SessionManager>,
        session: Box<dyn Session>,
        batch: SuspendedBatchHandle,
        permit: LifecyclePermit,
    ) -> Self {
        let metadata = session.metadata();
        let start_time = if metadata.is_new() {
            metadata.creation_time
        } else {
            Utc::now()
        };
        let original_id = session.id().to_string();
        Self {
            manager,
            session,
            batch: Some(batch),
            permit,
            start_time,
            original_id,
            destroyed: false,
        }
    }

    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.session.attributes().get(key)
    }

    /// Insert or replace an attribute, returning the previous value
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.session.attributes_mut().insert(key.into(), value.into())
    }

    /// Insert only when the key is absent. Returns whether the value was inserted.
    pub fn put_if_absent(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> bool {
        let key = key.into();
        if self.session.attributes().contains_key(&key) {
            return false;
        }
        self.session.attributes_mut().insert(key, value.into());
        true
    }

    pub fn compute_if_absent<F>(&mut self, key: impl Into<String>, f: F) -> &AttributeValue
    where
        F: FnOnce(&str) -> AttributeValue,
    {
        self.session
            .attributes_mut()
            .entry(key.into())
            .or_insert_with_key(|key| f(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.session.attributes_mut().remove(key)
    }

    pub fn data(&self) -> &AttributeMap {
        self.session.attributes()
    }

    pub fn is_empty(&self) -> bool {
        self.session.attributes().is_empty()
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.session.metadata().last_access_time()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.session.metadata().creation_time
    }

    pub fn timeout(&self) -> Duration {
        self.session.metadata().timeout
    }

    /// Mark for invalidation; the session is removed when the adapter closes
    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed || !self.session.is_valid()
    }

    /// Move the session state under a fresh identifier and invalidate the old one
    pub fn regenerate_id(&mut self) -> DistSessionResult<()> {
        let handle = self.batch.take().ok_or_else(|| {
            DistSessionError::illegal_state("Session batch already closed", "session", "regenerate_id")
        })?;
        let new_id = self.manager.identifier_factory().create_identifier();
        let manager = Arc::clone(&self.manager);
        let session = &mut self.session;

        let (batch, ()) = handle.resume()?.execute(|batch| {
            let mut replacement = manager.create_session(batch, &new_id)?;
            let copied = (|| {
                let old_metadata = session.metadata();
                let (timeout, last_access) = (old_metadata.timeout, old_metadata.last_access);
                replacement
                    .attributes_mut()
                    .extend(session.attributes().iter().map(|(k, v)| (k.clone(), v.clone())));
                let metadata = replacement.metadata_mut();
                metadata.set_timeout(timeout);
                metadata.last_access = last_access;
                session.invalidate(batch)
            })();
            if let Err(e) = copied {
                if let Err(invalidate_error) = replacement.invalidate(batch) {
                    warn!(session_id = %new_id, error = %invalidate_error, "Failed to invalidate replacement session");
                }
                return Err(e);
            }
            let previous = std::mem::replace(session, replacement);
            previous.close(batch)
        })?;

        self.batch = Some(batch.suspend()?);
        debug!(old_id = %self.original_id, session_id = %new_id, "Regenerated session id");
        Ok(())
    }

    pub fn is_regenerated(&self) -> bool {
        self.session.id() != self.original_id
    }

    pub fn old_id(&self) -> &str {
        &self.original_id
    }

    /// Resume the batch, record the access (or invalidate a destroyed
    /// session), commit, and release the lifecycle permit. The permit is
    /// released whatever the outcome.
    pub fn close(self) -> DistSessionResult<()> {
        let DistributableSession {
            mut session,
            batch,
            mut permit,
            start_time,
            destroyed,
            ..
        } = self;
        let id = session.id().to_string();

        let result = match batch {
            Some(handle) => handle.resume().and_then(|active| {
                let (active, ()) = active.execute(|batch| {
                    if session.is_valid() {
                        if destroyed {
                            session.invalidate(batch)?;
                        } else {
                            session
                                .metadata_mut()
                                .set_last_access(start_time, Utc::now());
                        }
                    }
                    session.close(batch)
                })?;
                active.commit()
            }),
            None => Err(DistSessionError::illegal_state(
                "Session batch already closed",
                "session",
                "close",
            )),
        };

        permit.release();
        match &result {
            Ok(()) => debug!(session_id = %id, destroyed, "Session closed"),
            Err(e) => warn!(session_id = %id, error = %e, "Failed to close session"),
        }
        result
    }
}

impl std::fmt::Debug for DistributableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributableSession")
            .field("id", &self.session.id())
            .field("batch", &self.batch.as_ref().and_then(|b| b.id()))
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

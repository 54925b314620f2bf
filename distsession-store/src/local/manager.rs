//! In-process session manager
//!
//! Sessions live in a process-local table. Batches stage mutations and apply
//! them atomically on commit; discarding a batch drops them. Attribute values
//! are stored in marshalled form, either one blob per session or one blob per
//! attribute depending on the persistence granularity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distsession_core::{
    backend_error, AttributeMap, AttributeValue, Batch, ByteBufferMarshaller, DistSessionError,
    DistSessionResult, ErrorContext, IdentifierFactory, Session, SessionManager,
    SessionManagerConfiguration, SessionMetaData, SessionPersistenceGranularity,
    SessionStatistics, SuspendedBatch,
};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
enum StoredAttributes {
    Session(Vec<u8>),
    Attribute(BTreeMap<String, Vec<u8>>),
}

#[derive(Clone)]
struct StoredSession {
    metadata: SessionMetaData,
    attributes: StoredAttributes,
}

enum Mutation {
    /// Insert a session not yet persisted
    Put {
        id: String,
        stored: StoredSession,
    },
    /// Overwrite a persisted session
    Replace {
        id: String,
        stored: StoredSession,
    },
    Update {
        id: String,
        metadata: SessionMetaData,
        changed: BTreeMap<String, Vec<u8>>,
        removed: Vec<String>,
    },
    Remove {
        id: String,
    },
}

pub(crate) struct LocalInner {
    entries: Mutex<HashMap<String, StoredSession>>,
    marshaller: Arc<dyn ByteBufferMarshaller>,
    granularity: SessionPersistenceGranularity,
    max_active: Option<usize>,
    idle_timeout: Option<Duration>,
    default_timeout: Duration,
    next_batch_id: AtomicU64,
}

impl Mutation {
    /// Session that must still be present when the batch commits
    fn existing_target(&self) -> Option<&str> {
        match self {
            Mutation::Replace { id, .. } | Mutation::Update { id, .. } => Some(id),
            Mutation::Put { .. } | Mutation::Remove { .. } => None,
        }
    }
}

impl LocalInner {
    fn marshal(&self, key: &str, value: &AttributeValue) -> DistSessionResult<Vec<u8>> {
        if !self.marshaller.is_marshallable(value) {
            return Err(DistSessionError::Marshalling {
                message: format!("Attribute '{}' ({:?}) is not marshallable", key, value.kind()),
                source: None,
                context: ErrorContext::new("local_session_manager").with_operation("marshal"),
            });
        }
        self.marshaller.write(value)
    }

    fn encode_all(&self, attributes: &AttributeMap) -> DistSessionResult<StoredAttributes> {
        match self.granularity {
            SessionPersistenceGranularity::Session => {
                let value = AttributeValue::Map(attributes.clone());
                Ok(StoredAttributes::Session(self.marshal("*", &value)?))
            }
            SessionPersistenceGranularity::Attribute => attributes
                .iter()
                .map(|(key, value)| -> DistSessionResult<(String, Vec<u8>)> {
                    Ok((key.clone(), self.marshal(key, value)?))
                })
                .collect::<DistSessionResult<BTreeMap<_, _>>>()
                .map(StoredAttributes::Attribute),
        }
    }

    fn decode_all(&self, stored: &StoredAttributes) -> DistSessionResult<AttributeMap> {
        match stored {
            StoredAttributes::Session(bytes) => match self.marshaller.read(bytes)? {
                AttributeValue::Map(attributes) => Ok(attributes),
                other => Err(DistSessionError::Marshalling {
                    message: format!("Expected attribute map, found {:?}", other.kind()),
                    source: None,
                    context: ErrorContext::new("local_session_manager").with_operation("decode"),
                }),
            },
            StoredAttributes::Attribute(entries) => entries
                .iter()
                .map(|(key, bytes)| -> DistSessionResult<(String, AttributeValue)> {
                    Ok((key.clone(), self.marshaller.read(bytes)?))
                })
                .collect(),
        }
    }

    /// Apply all mutations, or none of them if a persisted session they
    /// write to has been evicted or purged in the meantime
    fn apply(&self, mutations: Vec<Mutation>) -> DistSessionResult<()> {
        let mut entries = self.entries.lock();
        if let Some(id) = mutations
            .iter()
            .filter_map(Mutation::existing_target)
            .find(|id| !entries.contains_key(*id))
        {
            return Err(backend_error!(
                format!("Session {} was evicted or expired before its changes were committed", id),
                "local_session_manager"
            ));
        }

        for mutation in mutations {
            match mutation {
                Mutation::Put { id, stored } | Mutation::Replace { id, stored } => {
                    entries.insert(id, stored);
                }
                Mutation::Update {
                    id,
                    metadata,
                    changed,
                    removed,
                } => {
                    if let Some(entry) = entries.get_mut(&id) {
                        entry.metadata = metadata;
                        if let StoredAttributes::Attribute(attributes) = &mut entry.attributes {
                            attributes.extend(changed);
                            for key in removed {
                                attributes.remove(&key);
                            }
                        }
                    }
                }
                Mutation::Remove { id } => {
                    entries.remove(&id);
                }
            }
        }

        if let Some(max) = self.max_active {
            while entries.len() > max {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, stored)| stored.metadata.last_access_time())
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        entries.remove(&id);
                        debug!(session_id = %id, max_active = max, "Evicted least recently accessed session");
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Drop expired sessions, and sessions idle longer than the idle timeout
    pub(crate) fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, stored| {
            let idle = self.idle_timeout.is_some_and(|idle| {
                (now - stored.metadata.last_access_time())
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > idle)
            });
            !(idle || stored.metadata.is_expired(now))
        });
        before - entries.len()
    }
}

fn local_batch(batch: &dyn Batch) -> DistSessionResult<&LocalBatch> {
    batch.as_any().downcast_ref::<LocalBatch>().ok_or_else(|| {
        DistSessionError::illegal_state(
            "Batch was not created by the local session manager",
            "local_session_manager",
            "resolve_batch",
        )
    })
}

pub struct LocalBatch {
    id: u64,
    inner: Arc<LocalInner>,
    mutations: Mutex<Vec<Mutation>>,
}

impl LocalBatch {
    fn stage(&self, mutation: Mutation) {
        self.mutations.lock().push(mutation);
    }

    pub fn pending_mutations(&self) -> usize {
        self.mutations.lock().len()
    }
}

impl Batch for LocalBatch {
    fn id(&self) -> u64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn commit(self: Box<Self>) -> DistSessionResult<()> {
        let mutations = std::mem::take(&mut *self.mutations.lock());
        debug!(batch = self.id, mutations = mutations.len(), "Applying batch");
        self.inner.apply(mutations)
    }

    fn discard(self: Box<Self>) -> DistSessionResult<()> {
        debug!(batch = self.id, mutations = self.pending_mutations(), "Dropping staged mutations");
        Ok(())
    }

    fn suspend(self: Box<Self>) -> Box<dyn SuspendedBatch> {
        Box::new(SuspendedLocalBatch { batch: self })
    }
}

struct SuspendedLocalBatch {
    batch: Box<LocalBatch>,
}

impl SuspendedBatch for SuspendedLocalBatch {
    fn id(&self) -> u64 {
        self.batch.id
    }

    fn resume(self: Box<Self>) -> Box<dyn Batch> {
        self.batch
    }
}

pub struct LocalSession {
    id: String,
    metadata: SessionMetaData,
    attributes: AttributeMap,
    /// Attributes as loaded, `None` for a session not yet persisted
    snapshot: Option<AttributeMap>,
    valid: bool,
    inner: Arc<LocalInner>,
}

impl LocalSession {
    fn stage_changes(&self, batch: &LocalBatch) -> DistSessionResult<()> {
        let mutation = match (&self.snapshot, self.inner.granularity) {
            (Some(snapshot), SessionPersistenceGranularity::Attribute) => {
                let mut changed = BTreeMap::new();
                for (key, value) in &self.attributes {
                    if snapshot.get(key) != Some(value) {
                        changed.insert(key.clone(), self.inner.marshal(key, value)?);
                    }
                }
                let removed = snapshot
                    .keys()
                    .filter(|key| !self.attributes.contains_key(*key))
                    .cloned()
                    .collect();
                Mutation::Update {
                    id: self.id.clone(),
                    metadata: self.metadata.clone(),
                    changed,
                    removed,
                }
            }
            (snapshot, _) => {
                let stored = StoredSession {
                    metadata: self.metadata.clone(),
                    attributes: self.inner.encode_all(&self.attributes)?,
                };
                let id = self.id.clone();
                match snapshot {
                    Some(_) => Mutation::Replace { id, stored },
                    None => Mutation::Put { id, stored },
                }
            }
        };
        batch.stage(mutation);
        Ok(())
    }
}

impl Session for LocalSession {
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

    fn invalidate(&mut self, batch: &dyn Batch) -> DistSessionResult<()> {
        if !self.valid {
            return Err(DistSessionError::illegal_state(
                format!("Session {} already invalidated", self.id),
                "local_session",
                "invalidate",
            ));
        }
        local_batch(batch)?.stage(Mutation::Remove {
            id: self.id.clone(),
        });
        self.valid = false;
        Ok(())
    }

    fn close(self: Box<Self>, batch: &dyn Batch) -> DistSessionResult<()> {
        if self.valid {
            self.stage_changes(local_batch(batch)?)?;
        }
        Ok(())
    }
}

pub struct LocalSessionManager {
    inner: Arc<LocalInner>,
    identifier_factory: Arc<dyn IdentifierFactory>,
    started: AtomicBool,
}

impl LocalSessionManager {
    pub fn new(configuration: &SessionManagerConfiguration) -> Self {
        let store = &configuration.store;
        Self {
            inner: Arc::new(LocalInner {
                entries: Mutex::new(HashMap::new()),
                marshaller: Arc::clone(&configuration.marshaller),
                granularity: store.granularity,
                max_active: store.max_active_sessions,
                idle_timeout: store.idle_timeout(),
                default_timeout: store.default_session_timeout(),
                next_batch_id: AtomicU64::new(1),
            }),
            identifier_factory: Arc::clone(&configuration.identifier_factory),
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<LocalInner> {
        &self.inner
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.inner.purge_expired(now)
    }

    fn ensure_started(&self, operation: &str) -> DistSessionResult<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DistSessionError::illegal_state(
                "Session manager is not started",
                "local_session_manager",
                operation,
            ))
        }
    }
}

#[async_trait]
impl SessionManager for LocalSessionManager {
    fn start(&self) -> DistSessionResult<()> {
        self.started.store(true, Ordering::Release);
        info!(granularity = ?self.inner.granularity, "Local session manager started");
        Ok(())
    }

    fn stop(&self) -> DistSessionResult<()> {
        self.started.store(false, Ordering::Release);
        info!("Local session manager stopped");
        Ok(())
    }

    fn identifier_factory(&self) -> Arc<dyn IdentifierFactory> {
        Arc::clone(&self.identifier_factory)
    }

    fn create_batch(&self) -> DistSessionResult<Box<dyn Batch>> {
        self.ensure_started("create_batch")?;
        Ok(Box::new(LocalBatch {
            id: self.inner.next_batch_id.fetch_add(1, Ordering::Relaxed),
            inner: Arc::clone(&self.inner),
            mutations: Mutex::new(Vec::new()),
        }))
    }

    fn create_session(&self, batch: &dyn Batch, id: &str) -> DistSessionResult<Box<dyn Session>> {
        local_batch(batch)?;
        if self.inner.entries.lock().contains_key(id) {
            return Err(backend_error!(
                format!("Session {} already exists", id),
                "local_session_manager"
            ));
        }
        Ok(Box::new(LocalSession {
            id: id.to_string(),
            metadata: SessionMetaData::new(Utc::now(), self.inner.default_timeout),
            attributes: AttributeMap::new(),
            snapshot: None,
            valid: true,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn find_session(
        &self,
        batch: &dyn Batch,
        id: &str,
    ) -> DistSessionResult<Option<Box<dyn Session>>> {
        let batch = local_batch(batch)?;
        let Some(stored) = self.inner.entries.lock().get(id).cloned() else {
            return Ok(None);
        };

        if stored.metadata.is_expired(Utc::now()) {
            debug!(session_id = %id, "Found expired session");
            batch.stage(Mutation::Remove { id: id.to_string() });
            return Ok(None);
        }

        let attributes = self.inner.decode_all(&stored.attributes)?;
        Ok(Some(Box::new(LocalSession {
            id: id.to_string(),
            metadata: stored.metadata,
            snapshot: Some(attributes.clone()),
            attributes,
            valid: true,
            inner: Arc::clone(&self.inner),
        })))
    }

    fn statistics(&self) -> SessionStatistics {
        let now = Utc::now();
        SessionStatistics {
            active_session_count: self
                .inner
                .entries
                .lock()
                .values()
                .filter(|stored| !stored.metadata.is_expired(now))
                .count(),
        }
    }
}

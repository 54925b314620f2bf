//! `ByteBufferMarshaller` implementations selected by configuration

use crate::error::MarshalError;
use crate::registry::TagRegistry;
use distsession_core::{
    AttributeValue, ByteBufferMarshaller, DistSessionResult, PrincipalRecord,
    SessionAttributeMarshaller,
};
use std::sync::Arc;
use tracing::debug;

/// Compact tagged binary encoding backed by a [`TagRegistry`]
#[derive(Debug)]
pub struct TaggedByteBufferMarshaller {
    registry: Arc<TagRegistry>,
}

impl TaggedByteBufferMarshaller {
    pub fn new(registry: Arc<TagRegistry>) -> Self {
        Self { registry }
    }

    pub fn standard() -> DistSessionResult<Self> {
        Ok(Self::new(Arc::new(TagRegistry::standard()?)))
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }
}

impl ByteBufferMarshaller for TaggedByteBufferMarshaller {
    fn write(&self, value: &AttributeValue) -> DistSessionResult<Vec<u8>> {
        Ok(self.registry.encode(value)?.to_vec())
    }

    fn read(&self, bytes: &[u8]) -> DistSessionResult<AttributeValue> {
        Ok(self.registry.decode(bytes)?)
    }

    fn is_marshallable(&self, value: &AttributeValue) -> bool {
        self.registry.is_marshallable(value)
    }
}

/// Self-describing JSON encoding. Variant names keep numeric kinds apart.
#[derive(Debug, Default)]
pub struct JsonByteBufferMarshaller;

impl JsonByteBufferMarshaller {
    fn is_record_marshallable(&self, record: &PrincipalRecord) -> bool {
        record
            .principal
            .values()
            .chain(record.attributes.values())
            .all(|v| self.is_marshallable(v))
    }
}

impl ByteBufferMarshaller for JsonByteBufferMarshaller {
    fn write(&self, value: &AttributeValue) -> DistSessionResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| MarshalError::Json(e).into())
    }

    fn read(&self, bytes: &[u8]) -> DistSessionResult<AttributeValue> {
        serde_json::from_slice(bytes).map_err(|e| MarshalError::Json(e).into())
    }

    /// JSON has no representation for NaN or infinities
    fn is_marshallable(&self, value: &AttributeValue) -> bool {
        match value {
            AttributeValue::Float(v) => v.is_finite(),
            AttributeValue::Double(v) => v.is_finite(),
            AttributeValue::Map(map) => map.values().all(|v| self.is_marshallable(v)),
            AttributeValue::List(items) => items.iter().all(|v| self.is_marshallable(v)),
            AttributeValue::Principal(record) => self.is_record_marshallable(record),
            AttributeValue::UserHolder(holder) => holder
                .user()
                .map_or(true, |record| self.is_record_marshallable(record)),
            _ => true,
        }
    }
}

pub fn create_marshaller(
    selection: SessionAttributeMarshaller,
) -> DistSessionResult<Arc<dyn ByteBufferMarshaller>> {
    debug!(marshaller = ?selection, "Creating attribute marshaller");
    Ok(match selection {
        SessionAttributeMarshaller::Tagged => Arc::new(TaggedByteBufferMarshaller::standard()?),
        SessionAttributeMarshaller::Json => Arc::new(JsonByteBufferMarshaller),
    })
}

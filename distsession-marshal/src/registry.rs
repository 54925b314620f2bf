//! Tag registry
//!
//! Maps stable type tags to value marshallers. Writes dispatch on the runtime
//! kind of a value, reads dispatch on the tag found on the wire.

use crate::error::{MarshalError, MarshalResult};
use crate::wire::{AnyBody, ProtoReader, ProtoWriter};
use bytes::Bytes;
use distsession_core::{AttributeValue, AuthorizationNode, PrincipalRecord, ValueKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Stable wire identifier of a value kind. Never reuse a retired number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(pub u32);

pub mod tags {
    use super::TypeTag;

    pub const NULL: TypeTag = TypeTag(1);
    pub const BOOL: TypeTag = TypeTag(2);
    pub const INT: TypeTag = TypeTag(3);
    pub const LONG: TypeTag = TypeTag(4);
    pub const FLOAT: TypeTag = TypeTag(5);
    pub const DOUBLE: TypeTag = TypeTag(6);
    pub const STRING: TypeTag = TypeTag(7);
    pub const BYTES: TypeTag = TypeTag(8);
    pub const INSTANT: TypeTag = TypeTag(9);
    pub const UUID: TypeTag = TypeTag(10);
    pub const MAP: TypeTag = TypeTag(11);
    pub const LIST: TypeTag = TypeTag(12);

    pub const AND: TypeTag = TypeTag(20);
    pub const OR: TypeTag = TypeTag(21);
    pub const NOT: TypeTag = TypeTag(22);
    pub const PERMISSION: TypeTag = TypeTag(23);
    pub const ROLE: TypeTag = TypeTag(24);
    pub const WILDCARD_PERMISSION: TypeTag = TypeTag(25);

    pub const PRINCIPAL: TypeTag = TypeTag(30);
    pub const USER_HOLDER: TypeTag = TypeTag(31);
}

/// Borrowed view of anything that can be written as a polymorphic value
#[derive(Debug, Clone, Copy)]
pub enum ValueRef<'a> {
    Value(&'a AttributeValue),
    Authorization(&'a AuthorizationNode),
    Principal(&'a PrincipalRecord),
}

impl ValueRef<'_> {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueRef::Value(value) => value.kind(),
            ValueRef::Authorization(node) => node.kind(),
            ValueRef::Principal(_) => ValueKind::Principal,
        }
    }
}

impl<'a> From<&'a AttributeValue> for ValueRef<'a> {
    fn from(value: &'a AttributeValue) -> Self {
        match value {
            AttributeValue::Authorization(node) => ValueRef::Authorization(node),
            AttributeValue::Principal(record) => ValueRef::Principal(record),
            other => ValueRef::Value(other),
        }
    }
}

impl<'a> From<&'a AuthorizationNode> for ValueRef<'a> {
    fn from(node: &'a AuthorizationNode) -> Self {
        ValueRef::Authorization(node)
    }
}

impl<'a> From<&'a PrincipalRecord> for ValueRef<'a> {
    fn from(record: &'a PrincipalRecord) -> Self {
        ValueRef::Principal(record)
    }
}

/// Encoder and decoder for one value kind
pub trait ValueMarshaller: Send + Sync {
    fn kind(&self) -> ValueKind;

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()>;

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue>;
}

/// A group of marshallers registered together
pub trait MarshallerProvider {
    fn marshallers(&self) -> Vec<(TypeTag, Arc<dyn ValueMarshaller>)>;
}

pub struct TagRegistry {
    by_tag: BTreeMap<TypeTag, Arc<dyn ValueMarshaller>>,
    by_kind: HashMap<ValueKind, TypeTag>,
}

impl TagRegistry {
    pub fn builder() -> TagRegistryBuilder {
        TagRegistryBuilder::default()
    }

    /// Registry holding every built-in marshaller
    pub fn standard() -> MarshalResult<Self> {
        Self::builder()
            .load(&crate::scalar::ScalarMarshallerProvider)
            .load(&crate::container::ContainerMarshallerProvider)
            .load(&crate::authorization::AuthorizationMarshallerProvider)
            .load(&crate::principal::UserMarshallerProvider)
            .build()
    }

    pub fn tag_of(&self, kind: ValueKind) -> Option<TypeTag> {
        self.by_kind.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    pub(crate) fn marshaller_for_kind(
        &self,
        kind: ValueKind,
    ) -> MarshalResult<(TypeTag, &dyn ValueMarshaller)> {
        let tag = self
            .tag_of(kind)
            .ok_or(MarshalError::UnregisteredType(kind))?;
        let marshaller = self
            .by_tag
            .get(&tag)
            .ok_or(MarshalError::UnregisteredType(kind))?;
        Ok((tag, marshaller.as_ref()))
    }

    pub(crate) fn marshaller_for_tag(&self, tag: TypeTag) -> Option<&dyn ValueMarshaller> {
        self.by_tag.get(&tag).map(|m| m.as_ref())
    }

    pub fn encode<'v>(&self, value: impl Into<ValueRef<'v>>) -> MarshalResult<Bytes> {
        let mut writer = ProtoWriter::new(self);
        writer.write_any_body(value.into())?;
        Ok(writer.into_bytes())
    }

    /// Decode a top-level value. Trailing unknown fields are skipped, but an
    /// unknown type tag leaves nothing to return and is an error here.
    pub fn decode(&self, bytes: &[u8]) -> MarshalResult<AttributeValue> {
        let mut reader = ProtoReader::new(self, bytes);
        match reader.read_any_body()? {
            AnyBody::Value(value) => Ok(value),
            AnyBody::Unknown(tag) => Err(MarshalError::UnknownTypeTag(tag.0)),
        }
    }

    /// Whether every kind reachable from `value` has a registered marshaller
    pub fn is_marshallable(&self, value: &AttributeValue) -> bool {
        if self.tag_of(value.kind()).is_none() {
            return false;
        }
        match value {
            AttributeValue::Map(map) => map.values().all(|v| self.is_marshallable(v)),
            AttributeValue::List(items) => items.iter().all(|v| self.is_marshallable(v)),
            AttributeValue::Authorization(node) => self.is_node_marshallable(node),
            AttributeValue::Principal(record) => self.is_record_marshallable(record),
            AttributeValue::UserHolder(holder) => holder
                .user()
                .map_or(true, |record| self.is_record_marshallable(record)),
            _ => true,
        }
    }

    fn is_node_marshallable(&self, node: &AuthorizationNode) -> bool {
        self.tag_of(node.kind()).is_some()
            && node
                .children()
                .iter()
                .all(|child| self.is_node_marshallable(child))
    }

    fn is_record_marshallable(&self, record: &PrincipalRecord) -> bool {
        self.tag_of(ValueKind::Principal).is_some()
            && record.principal.values().all(|v| self.is_marshallable(v))
            && record.attributes.values().all(|v| self.is_marshallable(v))
            && record
                .authorizations
                .values()
                .flatten()
                .all(|node| self.is_node_marshallable(node))
    }
}

impl std::fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.by_tag.iter().map(|(tag, m)| (tag.0, m.kind())))
            .finish()
    }
}

#[derive(Default)]
pub struct TagRegistryBuilder {
    entries: Vec<(TypeTag, Arc<dyn ValueMarshaller>)>,
}

impl TagRegistryBuilder {
    pub fn register(mut self, tag: TypeTag, marshaller: Arc<dyn ValueMarshaller>) -> Self {
        self.entries.push((tag, marshaller));
        self
    }

    pub fn load(mut self, provider: &dyn MarshallerProvider) -> Self {
        self.entries.extend(provider.marshallers());
        self
    }

    pub fn build(self) -> MarshalResult<TagRegistry> {
        let mut by_tag = BTreeMap::new();
        let mut by_kind = HashMap::new();

        for (tag, marshaller) in self.entries {
            let kind = marshaller.kind();
            if by_tag.contains_key(&tag) {
                return Err(MarshalError::DuplicateTag(tag.0));
            }
            if by_kind.insert(kind, tag).is_some() {
                return Err(MarshalError::DuplicateKind(kind));
            }
            by_tag.insert(tag, marshaller);
        }

        debug!(marshallers = by_tag.len(), "Built tag registry");
        Ok(TagRegistry { by_tag, by_kind })
    }
}

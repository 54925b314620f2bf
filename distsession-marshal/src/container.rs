//! Map and list containers
//!
//! Map entries are repeated sub-messages `{1: key, 2: any}` written in key
//! order. Reading keeps the last value seen for a key. List elements are
//! repeated `any` fields in insertion order. An empty container has an empty
//! payload.

use crate::error::{MarshalError, MarshalResult};
use crate::registry::{tags, MarshallerProvider, TypeTag, ValueMarshaller, ValueRef};
use crate::wire::{ProtoReader, ProtoWriter, WireType};
use distsession_core::{AttributeMap, AttributeValue, ValueKind};
use std::sync::Arc;
use tracing::debug;

pub(crate) fn write_map_entries(
    writer: &mut ProtoWriter<'_>,
    field: u32,
    map: &AttributeMap,
) -> MarshalResult<()> {
    for (key, value) in map {
        writer.write_message(field, |w| {
            w.write_string(1, key);
            w.write_any(2, value)
        })?;
    }
    Ok(())
}

/// Read one `{1: key, 2: any}` entry into `map`
pub(crate) fn read_map_entry(reader: &mut ProtoReader<'_>, map: &mut AttributeMap) -> MarshalResult<()> {
    let (key, value) = reader.read_message(|r| {
        let mut key = None;
        let mut value = None;
        while let Some(tag) = r.read_tag()? {
            match (tag.number, tag.wire_type) {
                (1, WireType::LengthDelimited) => key = Some(r.read_string()?),
                (2, WireType::LengthDelimited) => value = r.read_any()?,
                _ => r.skip_field(tag.wire_type)?,
            }
        }
        Ok((key, value))
    })?;

    match (key, value) {
        (Some(key), Some(value)) => {
            map.insert(key, value);
        }
        (Some(key), None) => debug!(key = %key, "Dropping map entry with unreadable value"),
        (None, _) => {
            return Err(MarshalError::Malformed("map entry without key".to_string()));
        }
    }
    Ok(())
}

pub struct MapMarshaller;

impl ValueMarshaller for MapMarshaller {
    fn kind(&self) -> ValueKind {
        ValueKind::Map
    }

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()> {
        match value {
            ValueRef::Value(AttributeValue::Map(map)) => write_map_entries(writer, 1, map),
            other => Err(MarshalError::UnexpectedType {
                expected: "map",
                found: other.kind(),
            }),
        }
    }

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue> {
        let mut map = AttributeMap::new();
        while let Some(tag) = reader.read_tag()? {
            match (tag.number, tag.wire_type) {
                (1, WireType::LengthDelimited) => read_map_entry(reader, &mut map)?,
                _ => reader.skip_field(tag.wire_type)?,
            }
        }
        Ok(AttributeValue::Map(map))
    }
}

pub struct ListMarshaller;

impl ValueMarshaller for ListMarshaller {
    fn kind(&self) -> ValueKind {
        ValueKind::List
    }

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()> {
        match value {
            ValueRef::Value(AttributeValue::List(items)) => {
                for item in items {
                    writer.write_any(1, item)?;
                }
                Ok(())
            }
            other => Err(MarshalError::UnexpectedType {
                expected: "list",
                found: other.kind(),
            }),
        }
    }

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue> {
        let mut items = Vec::new();
        while let Some(tag) = reader.read_tag()? {
            match (tag.number, tag.wire_type) {
                (1, WireType::LengthDelimited) => {
                    if let Some(item) = reader.read_any()? {
                        items.push(item);
                    }
                }
                _ => reader.skip_field(tag.wire_type)?,
            }
        }
        Ok(AttributeValue::List(items))
    }
}

pub struct ContainerMarshallerProvider;

impl MarshallerProvider for ContainerMarshallerProvider {
    fn marshallers(&self) -> Vec<(TypeTag, Arc<dyn ValueMarshaller>)> {
        vec![
            (tags::MAP, Arc::new(MapMarshaller) as Arc<dyn ValueMarshaller>),
            (tags::LIST, Arc::new(ListMarshaller) as Arc<dyn ValueMarshaller>),
        ]
    }
}

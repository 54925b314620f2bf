//! Marshallers for scalar attribute values

use crate::error::{MarshalError, MarshalResult};
use crate::registry::{tags, MarshallerProvider, TypeTag, ValueMarshaller, ValueRef};
use crate::wire::{ProtoReader, ProtoWriter, WireType};
use chrono::{DateTime, Utc};
use distsession_core::{AttributeValue, ValueKind};
use std::sync::Arc;

/// Handles every scalar kind. The value always lives in field 1, except
/// `Instant` which splits seconds (field 1) from nanoseconds (field 2).
pub struct ScalarMarshaller {
    kind: ValueKind,
}

impl ScalarMarshaller {
    pub fn new(kind: ValueKind) -> Self {
        Self { kind }
    }
}

impl ValueMarshaller for ScalarMarshaller {
    fn kind(&self) -> ValueKind {
        self.kind
    }

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()> {
        let ValueRef::Value(value) = value else {
            return Err(MarshalError::UnexpectedType {
                expected: "scalar value",
                found: value.kind(),
            });
        };
        match value {
            AttributeValue::Null => {}
            AttributeValue::Bool(v) => writer.write_bool(1, *v),
            AttributeValue::Int(v) => writer.write_sint32(1, *v),
            AttributeValue::Long(v) => writer.write_sint64(1, *v),
            AttributeValue::Float(v) => writer.write_float(1, *v),
            AttributeValue::Double(v) => writer.write_double(1, *v),
            AttributeValue::String(v) => writer.write_string(1, v),
            AttributeValue::Bytes(v) => writer.write_bytes(1, v),
            AttributeValue::Instant(v) => {
                writer.write_sint64(1, v.timestamp());
                let nanos = v.timestamp_subsec_nanos();
                if nanos != 0 {
                    writer.write_uint32(2, nanos);
                }
            }
            AttributeValue::Uuid(v) => writer.write_bytes(1, v.as_bytes()),
            other => {
                return Err(MarshalError::UnexpectedType {
                    expected: "scalar value",
                    found: other.kind(),
                })
            }
        }
        Ok(())
    }

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue> {
        let mut value = default_value(self.kind)?;
        let mut seconds = 0i64;
        let mut nanos = 0u32;

        while let Some(tag) = reader.read_tag()? {
            match (self.kind, tag.number, tag.wire_type) {
                (ValueKind::Bool, 1, WireType::Varint) => {
                    value = AttributeValue::Bool(reader.read_bool()?)
                }
                (ValueKind::Int, 1, WireType::Varint) => {
                    value = AttributeValue::Int(reader.read_sint32()?)
                }
                (ValueKind::Long, 1, WireType::Varint) => {
                    value = AttributeValue::Long(reader.read_sint64()?)
                }
                (ValueKind::Float, 1, WireType::Fixed32) => {
                    value = AttributeValue::Float(reader.read_float()?)
                }
                (ValueKind::Double, 1, WireType::Fixed64) => {
                    value = AttributeValue::Double(reader.read_double()?)
                }
                (ValueKind::String, 1, WireType::LengthDelimited) => {
                    value = AttributeValue::String(reader.read_string()?)
                }
                (ValueKind::Bytes, 1, WireType::LengthDelimited) => {
                    value = AttributeValue::Bytes(reader.read_bytes()?.to_vec())
                }
                (ValueKind::Instant, 1, WireType::Varint) => seconds = reader.read_sint64()?,
                (ValueKind::Instant, 2, WireType::Varint) => nanos = reader.read_uint32()?,
                (ValueKind::Uuid, 1, WireType::LengthDelimited) => {
                    let bytes = reader.read_bytes()?;
                    let uuid = uuid::Uuid::from_slice(bytes)
                        .map_err(|e| MarshalError::Malformed(format!("invalid uuid: {}", e)))?;
                    value = AttributeValue::Uuid(uuid);
                }
                _ => reader.skip_field(tag.wire_type)?,
            }
        }

        if self.kind == ValueKind::Instant {
            let instant = DateTime::from_timestamp(seconds, nanos).ok_or_else(|| {
                MarshalError::Malformed(format!("instant {}s {}ns out of range", seconds, nanos))
            })?;
            return Ok(AttributeValue::Instant(instant));
        }
        Ok(value)
    }
}

fn default_value(kind: ValueKind) -> MarshalResult<AttributeValue> {
    Ok(match kind {
        ValueKind::Null => AttributeValue::Null,
        ValueKind::Bool => AttributeValue::Bool(false),
        ValueKind::Int => AttributeValue::Int(0),
        ValueKind::Long => AttributeValue::Long(0),
        ValueKind::Instant => AttributeValue::Instant(DateTime::<Utc>::default()),
        ValueKind::Float => AttributeValue::Float(0.0),
        ValueKind::Double => AttributeValue::Double(0.0),
        ValueKind::String => AttributeValue::String(String::new()),
        ValueKind::Bytes => AttributeValue::Bytes(Vec::new()),
        ValueKind::Uuid => AttributeValue::Uuid(uuid::Uuid::nil()),
        other => {
            return Err(MarshalError::UnexpectedType {
                expected: "scalar kind",
                found: other,
            })
        }
    })
}

pub struct ScalarMarshallerProvider;

impl MarshallerProvider for ScalarMarshallerProvider {
    fn marshallers(&self) -> Vec<(TypeTag, Arc<dyn ValueMarshaller>)> {
        [
            (tags::NULL, ValueKind::Null),
            (tags::BOOL, ValueKind::Bool),
            (tags::INT, ValueKind::Int),
            (tags::LONG, ValueKind::Long),
            (tags::FLOAT, ValueKind::Float),
            (tags::DOUBLE, ValueKind::Double),
            (tags::STRING, ValueKind::String),
            (tags::BYTES, ValueKind::Bytes),
            (tags::INSTANT, ValueKind::Instant),
            (tags::UUID, ValueKind::Uuid),
        ]
        .into_iter()
        .map(|(tag, kind)| {
            (
                tag,
                Arc::new(ScalarMarshaller::new(kind)) as Arc<dyn ValueMarshaller>,
            )
        })
        .collect()
    }
}

//! User principal records and user holders
//!
//! A principal record has three optional fields: 1 the principal map,
//! 2 repeated `{1: provider, 2: repeated any}` authorization entries, and
//! 3 the attribute map. Empty maps are omitted entirely. Providers and their
//! authorizations are kept in sorted collections, so equal records always
//! produce identical bytes.

use crate::container::{read_map_entry, write_map_entries};
use crate::error::{MarshalError, MarshalResult};
use crate::registry::{tags, MarshallerProvider, TypeTag, ValueMarshaller, ValueRef};
use crate::wire::{ProtoReader, ProtoWriter, WireType};
use distsession_core::{AttributeMap, AttributeValue, AuthorizationNode, PrincipalRecord, UserHolder, ValueKind};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct PrincipalMarshaller;

impl PrincipalMarshaller {
    fn read_map(reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeMap> {
        reader.read_message(|r| {
            let mut map = AttributeMap::new();
            while let Some(tag) = r.read_tag()? {
                match (tag.number, tag.wire_type) {
                    (1, WireType::LengthDelimited) => read_map_entry(r, &mut map)?,
                    _ => r.skip_field(tag.wire_type)?,
                }
            }
            Ok(map)
        })
    }

    fn read_provider(
        reader: &mut ProtoReader<'_>,
    ) -> MarshalResult<(String, BTreeSet<AuthorizationNode>)> {
        reader.read_message(|r| {
            let mut provider = String::new();
            let mut nodes = BTreeSet::new();
            while let Some(tag) = r.read_tag()? {
                match (tag.number, tag.wire_type) {
                    (1, WireType::LengthDelimited) => provider = r.read_string()?,
                    (2, WireType::LengthDelimited) => match r.read_any()? {
                        Some(AttributeValue::Authorization(node)) => {
                            nodes.insert(node);
                        }
                        Some(other) => {
                            return Err(MarshalError::UnexpectedType {
                                expected: "authorization",
                                found: other.kind(),
                            })
                        }
                        None => {}
                    },
                    _ => r.skip_field(tag.wire_type)?,
                }
            }
            Ok((provider, nodes))
        })
    }
}

impl ValueMarshaller for PrincipalMarshaller {
    fn kind(&self) -> ValueKind {
        ValueKind::Principal
    }

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()> {
        let ValueRef::Principal(record) = value else {
            return Err(MarshalError::UnexpectedType {
                expected: "principal",
                found: value.kind(),
            });
        };

        if !record.principal.is_empty() {
            writer.write_message(1, |w| write_map_entries(w, 1, &record.principal))?;
        }
        for (provider, nodes) in &record.authorizations {
            writer.write_message(2, |w| {
                w.write_string(1, provider);
                for node in nodes {
                    w.write_any(2, node)?;
                }
                Ok(())
            })?;
        }
        if !record.attributes.is_empty() {
            writer.write_message(3, |w| write_map_entries(w, 1, &record.attributes))?;
        }
        Ok(())
    }

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue> {
        let mut record = PrincipalRecord::default();
        while let Some(tag) = reader.read_tag()? {
            match (tag.number, tag.wire_type) {
                (1, WireType::LengthDelimited) => record.principal = Self::read_map(reader)?,
                (2, WireType::LengthDelimited) => {
                    let (provider, nodes) = Self::read_provider(reader)?;
                    record.authorizations.entry(provider).or_default().extend(nodes);
                }
                (3, WireType::LengthDelimited) => record.attributes = Self::read_map(reader)?,
                _ => reader.skip_field(tag.wire_type)?,
            }
        }
        Ok(AttributeValue::Principal(record))
    }
}

/// Field 1 holds the user, omitted when the holder is empty
pub struct UserHolderMarshaller;

impl ValueMarshaller for UserHolderMarshaller {
    fn kind(&self) -> ValueKind {
        ValueKind::UserHolder
    }

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()> {
        match value {
            ValueRef::Value(AttributeValue::UserHolder(holder)) => {
                if let Some(user) = holder.user() {
                    writer.write_any(1, user)?;
                }
                Ok(())
            }
            other => Err(MarshalError::UnexpectedType {
                expected: "user holder",
                found: other.kind(),
            }),
        }
    }

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue> {
        let mut user = None;
        while let Some(tag) = reader.read_tag()? {
            match (tag.number, tag.wire_type) {
                (1, WireType::LengthDelimited) => match reader.read_any()? {
                    Some(AttributeValue::Principal(record)) => user = Some(record),
                    Some(other) => {
                        return Err(MarshalError::UnexpectedType {
                            expected: "principal",
                            found: other.kind(),
                        })
                    }
                    None => {}
                },
                _ => reader.skip_field(tag.wire_type)?,
            }
        }
        Ok(AttributeValue::UserHolder(UserHolder::new(user)))
    }
}

pub struct UserMarshallerProvider;

impl MarshallerProvider for UserMarshallerProvider {
    fn marshallers(&self) -> Vec<(TypeTag, Arc<dyn ValueMarshaller>)> {
        vec![
            (tags::PRINCIPAL, Arc::new(PrincipalMarshaller) as Arc<dyn ValueMarshaller>),
            (tags::USER_HOLDER, Arc::new(UserHolderMarshaller) as Arc<dyn ValueMarshaller>),
        ]
    }
}

//! Authorization expression trees

use crate::error::{MarshalError, MarshalResult};
use crate::registry::{tags, MarshallerProvider, TypeTag, ValueMarshaller, ValueRef};
use crate::wire::{ProtoReader, ProtoWriter, WireType};
use distsession_core::{AttributeValue, AuthorizationNode, ValueKind};
use std::sync::Arc;

/// `And`/`Or` write each child as a repeated `any` in field 1, `Not` writes
/// its child there only when present, leaves write their name as a string.
pub struct AuthorizationMarshaller {
    kind: ValueKind,
}

impl AuthorizationMarshaller {
    pub fn new(kind: ValueKind) -> Self {
        Self { kind }
    }
}

fn expect_node(value: AttributeValue) -> MarshalResult<AuthorizationNode> {
    match value {
        AttributeValue::Authorization(node) => Ok(node),
        other => Err(MarshalError::UnexpectedType {
            expected: "authorization",
            found: other.kind(),
        }),
    }
}

impl ValueMarshaller for AuthorizationMarshaller {
    fn kind(&self) -> ValueKind {
        self.kind
    }

    fn write_to(&self, writer: &mut ProtoWriter<'_>, value: ValueRef<'_>) -> MarshalResult<()> {
        let ValueRef::Authorization(node) = value else {
            return Err(MarshalError::UnexpectedType {
                expected: "authorization",
                found: value.kind(),
            });
        };
        match node {
            AuthorizationNode::And(children) | AuthorizationNode::Or(children) => {
                for child in children {
                    writer.write_any(1, child)?;
                }
            }
            AuthorizationNode::Not(child) => {
                if let Some(child) = child {
                    writer.write_any(1, &**child)?;
                }
            }
            AuthorizationNode::Permission(name)
            | AuthorizationNode::Role(name)
            | AuthorizationNode::WildcardPermission(name) => writer.write_string(1, name),
        }
        Ok(())
    }

    fn read_from(&self, reader: &mut ProtoReader<'_>) -> MarshalResult<AttributeValue> {
        let mut children = Vec::new();
        let mut name = String::new();

        while let Some(tag) = reader.read_tag()? {
            match (self.kind, tag.number, tag.wire_type) {
                (ValueKind::And | ValueKind::Or | ValueKind::Not, 1, WireType::LengthDelimited) => {
                    if let Some(child) = reader.read_any()? {
                        children.push(expect_node(child)?);
                    }
                }
                (
                    ValueKind::Permission | ValueKind::Role | ValueKind::WildcardPermission,
                    1,
                    WireType::LengthDelimited,
                ) => name = reader.read_string()?,
                _ => reader.skip_field(tag.wire_type)?,
            }
        }

        let node = match self.kind {
            ValueKind::And => AuthorizationNode::And(children),
            ValueKind::Or => AuthorizationNode::Or(children),
            ValueKind::Not => AuthorizationNode::Not(children.into_iter().next().map(Box::new)),
            ValueKind::Permission => AuthorizationNode::Permission(name),
            ValueKind::Role => AuthorizationNode::Role(name),
            ValueKind::WildcardPermission => AuthorizationNode::WildcardPermission(name),
            other => {
                return Err(MarshalError::UnexpectedType {
                    expected: "authorization kind",
                    found: other,
                })
            }
        };
        Ok(AttributeValue::Authorization(node))
    }
}

pub struct AuthorizationMarshallerProvider;

impl MarshallerProvider for AuthorizationMarshallerProvider {
    fn marshallers(&self) -> Vec<(TypeTag, Arc<dyn ValueMarshaller>)> {
        [
            (tags::AND, ValueKind::And),
            (tags::OR, ValueKind::Or),
            (tags::NOT, ValueKind::Not),
            (tags::PERMISSION, ValueKind::Permission),
            (tags::ROLE, ValueKind::Role),
            (tags::WILDCARD_PERMISSION, ValueKind::WildcardPermission),
        ]
        .into_iter()
        .map(|(tag, kind)| {
            (
                tag,
                Arc::new(AuthorizationMarshaller::new(kind)) as Arc<dyn ValueMarshaller>,
            )
        })
        .collect()
    }
}

//! distsession marshal - tagged wire codec for session attribute values
//!
//! Values are written as an "any" envelope: a stable type tag followed by the
//! payload produced by the marshaller registered for that tag. Containers,
//! authorization trees and principal records recurse through the same
//! registry, and readers skip fields and value types they do not know.

pub mod authorization;
pub mod container;
pub mod error;
pub mod marshaller;
pub mod principal;
pub mod registry;
pub mod scalar;
pub mod wire;

pub use authorization::{AuthorizationMarshaller, AuthorizationMarshallerProvider};
pub use container::{ContainerMarshallerProvider, ListMarshaller, MapMarshaller};
pub use error::{MarshalError, MarshalResult};
pub use marshaller::{create_marshaller, JsonByteBufferMarshaller, TaggedByteBufferMarshaller};
pub use principal::{PrincipalMarshaller, UserHolderMarshaller, UserMarshallerProvider};
pub use registry::{
    tags, MarshallerProvider, TagRegistry, TagRegistryBuilder, TypeTag, ValueMarshaller, ValueRef,
};
pub use scalar::{ScalarMarshaller, ScalarMarshallerProvider};
pub use wire::{FieldTag, ProtoReader, ProtoWriter, WireType, MAX_NESTING_DEPTH};

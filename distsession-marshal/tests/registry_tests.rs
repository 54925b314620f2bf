//! Registry construction and `ByteBufferMarshaller` selection

use distsession_core::{
    AttributeMap, AttributeValue, ByteBufferMarshaller, DistSessionError, PrincipalRecord,
    SessionAttributeMarshaller, ValueKind,
};
use distsession_marshal::{
    create_marshaller, tags, JsonByteBufferMarshaller, MarshalError, ScalarMarshaller,
    ScalarMarshallerProvider, TagRegistry, TaggedByteBufferMarshaller, TypeTag,
};
use std::sync::Arc;

#[test]
fn test_standard_registry_tags() {
    let registry = TagRegistry::standard().unwrap();
    assert_eq!(registry.len(), 20);
    assert_eq!(registry.tag_of(ValueKind::Null), Some(tags::NULL));
    assert_eq!(registry.tag_of(ValueKind::Map), Some(TypeTag(11)));
    assert_eq!(registry.tag_of(ValueKind::Not), Some(TypeTag(22)));
    assert_eq!(registry.tag_of(ValueKind::UserHolder), Some(TypeTag(31)));
}

#[test]
fn test_unregistered_kind_fails_fast() {
    let registry = TagRegistry::builder()
        .load(&ScalarMarshallerProvider)
        .build()
        .unwrap();

    let nested = AttributeValue::List(vec![AttributeValue::Int(1)]);
    let err = registry.encode(&nested).unwrap_err();
    assert!(matches!(err, MarshalError::UnregisteredType(ValueKind::List)));
    assert!(!registry.is_marshallable(&nested));
    assert!(registry.is_marshallable(&AttributeValue::Int(1)));

    let err: DistSessionError = err.into();
    assert!(matches!(err, DistSessionError::Config { .. }));
}

#[test]
fn test_duplicate_registrations_rejected() {
    let result = TagRegistry::builder()
        .load(&ScalarMarshallerProvider)
        .load(&ScalarMarshallerProvider)
        .build();
    assert!(matches!(result, Err(MarshalError::DuplicateTag(1))));

    let result = TagRegistry::builder()
        .load(&ScalarMarshallerProvider)
        .register(TypeTag(100), Arc::new(ScalarMarshaller::new(ValueKind::Int)))
        .build();
    assert!(matches!(
        result,
        Err(MarshalError::DuplicateKind(ValueKind::Int))
    ));
}

#[test]
fn test_custom_registration_changes_tag() {
    let registry = TagRegistry::builder()
        .register(TypeTag(200), Arc::new(ScalarMarshaller::new(ValueKind::String)))
        .build()
        .unwrap();
    let bytes = registry.encode(&AttributeValue::from("x")).unwrap();
    assert_eq!(registry.decode(&bytes).unwrap(), AttributeValue::from("x"));

    let standard = TagRegistry::standard().unwrap();
    assert!(matches!(
        standard.decode(&bytes),
        Err(MarshalError::UnknownTypeTag(200))
    ));
}

#[test]
fn test_tagged_byte_buffer_marshaller() {
    let marshaller = TaggedByteBufferMarshaller::standard().unwrap();
    let mut attributes = AttributeMap::new();
    attributes.insert("visits".into(), 3i64.into());
    let value = AttributeValue::Principal(PrincipalRecord::new(AttributeMap::new(), attributes));

    let bytes = marshaller.write(&value).unwrap();
    assert_eq!(marshaller.read(&bytes).unwrap(), value);
    assert!(marshaller.is_marshallable(&value));

    let err = marshaller.read(&[0x08]).unwrap_err();
    assert!(matches!(err, DistSessionError::Marshalling { .. }));
}

#[test]
fn test_json_marshaller_keeps_kinds() {
    let marshaller = JsonByteBufferMarshaller;
    let value = AttributeValue::List(vec![
        AttributeValue::Float(0.25),
        AttributeValue::Double(0.25),
        AttributeValue::Int(1),
        AttributeValue::Long(1),
        AttributeValue::Null,
        AttributeValue::Bytes(vec![1, 2, 3]),
    ]);

    let bytes = marshaller.write(&value).unwrap();
    assert_eq!(marshaller.read(&bytes).unwrap(), value);

    assert!(!marshaller.is_marshallable(&AttributeValue::Double(f64::NAN)));
    assert!(!marshaller.is_marshallable(&AttributeValue::List(vec![AttributeValue::Float(
        f32::INFINITY
    )])));
    assert!(marshaller.read(b"not json").is_err());
}

#[test]
fn test_create_marshaller_by_selection() {
    let value = AttributeValue::from("selected");
    for selection in [
        SessionAttributeMarshaller::Tagged,
        SessionAttributeMarshaller::Json,
    ] {
        let marshaller = create_marshaller(selection).unwrap();
        let bytes = marshaller.write(&value).unwrap();
        assert_eq!(marshaller.read(&bytes).unwrap(), value);
    }
}

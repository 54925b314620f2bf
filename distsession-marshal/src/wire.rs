//! Field-oriented wire codec
//!
//! Every message is a sequence of `(key, value)` pairs where the key packs the
//! field number and the wire type as `(number << 3) | wire_type`. The wire type
//! alone is enough to skip a field, so readers ignore fields they do not know.
//! A zero key or the end of the buffer terminates a message.

use crate::error::{MarshalError, MarshalResult};
use crate::registry::{TagRegistry, TypeTag, ValueRef};
use bytes::{BufMut, Bytes, BytesMut};
use distsession_core::AttributeValue;
use tracing::debug;

/// Maximum number of nested length-delimited messages
pub const MAX_NESTING_DEPTH: usize = 100;

const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn bits(self) -> u64 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }

    fn from_bits(bits: u64) -> MarshalResult<Self> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(MarshalError::Malformed(format!(
                "unsupported wire type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTag {
    pub number: u32,
    pub wire_type: WireType,
}

pub fn zigzag_encode32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub fn zigzag_decode32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

pub fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Writes one message; nested messages get their own writer
pub struct ProtoWriter<'r> {
    registry: &'r TagRegistry,
    buf: BytesMut,
    depth: usize,
}

impl<'r> ProtoWriter<'r> {
    pub fn new(registry: &'r TagRegistry) -> Self {
        Self {
            registry,
            buf: BytesMut::new(),
            depth: 0,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    fn put_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    fn put_key(&mut self, field: u32, wire_type: WireType) {
        self.put_varint((u64::from(field) << 3) | wire_type.bits());
    }

    pub fn write_bool(&mut self, field: u32, value: bool) {
        self.put_key(field, WireType::Varint);
        self.put_varint(u64::from(value));
    }

    pub fn write_uint32(&mut self, field: u32, value: u32) {
        self.put_key(field, WireType::Varint);
        self.put_varint(u64::from(value));
    }

    pub fn write_uint64(&mut self, field: u32, value: u64) {
        self.put_key(field, WireType::Varint);
        self.put_varint(value);
    }

    pub fn write_sint32(&mut self, field: u32, value: i32) {
        self.put_key(field, WireType::Varint);
        self.put_varint(u64::from(zigzag_encode32(value)));
    }

    pub fn write_sint64(&mut self, field: u32, value: i64) {
        self.put_key(field, WireType::Varint);
        self.put_varint(zigzag_encode64(value));
    }

    pub fn write_float(&mut self, field: u32, value: f32) {
        self.put_key(field, WireType::Fixed32);
        self.buf.put_f32_le(value);
    }

    pub fn write_double(&mut self, field: u32, value: f64) {
        self.put_key(field, WireType::Fixed64);
        self.buf.put_f64_le(value);
    }

    pub fn write_bytes(&mut self, field: u32, value: &[u8]) {
        self.put_key(field, WireType::LengthDelimited);
        self.put_varint(value.len() as u64);
        self.buf.put_slice(value);
    }

    pub fn write_string(&mut self, field: u32, value: &str) {
        self.write_bytes(field, value.as_bytes());
    }

    /// Write a nested message built by `f` as a length-delimited field
    pub fn write_message<F>(&mut self, field: u32, f: F) -> MarshalResult<()>
    where
        F: FnOnce(&mut ProtoWriter<'r>) -> MarshalResult<()>,
    {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(MarshalError::DepthExceeded(MAX_NESTING_DEPTH));
        }
        let mut nested = ProtoWriter {
            registry: self.registry,
            buf: BytesMut::new(),
            depth: self.depth + 1,
        };
        f(&mut nested)?;
        self.write_bytes(field, &nested.buf);
        Ok(())
    }

    /// Write a polymorphic value as a nested "any" message
    pub fn write_any<'v>(&mut self, field: u32, value: impl Into<ValueRef<'v>>) -> MarshalResult<()> {
        let value = value.into();
        self.write_message(field, |w| w.write_any_body(value))
    }

    /// Type tag in field 1, payload message in field 2
    pub(crate) fn write_any_body(&mut self, value: ValueRef<'_>) -> MarshalResult<()> {
        let registry = self.registry;
        let (tag, marshaller) = registry.marshaller_for_kind(value.kind())?;
        self.write_uint32(1, tag.0);
        self.write_message(2, |w| marshaller.write_to(w, value))
    }
}

/// Outcome of reading an "any" body
pub(crate) enum AnyBody {
    Value(AttributeValue),
    Unknown(TypeTag),
}

/// Reads one message from a borrowed buffer
pub struct ProtoReader<'a> {
    registry: &'a TagRegistry,
    buf: &'a [u8],
    depth: usize,
}

impl<'a> ProtoReader<'a> {
    pub fn new(registry: &'a TagRegistry, buf: &'a [u8]) -> Self {
        Self {
            registry,
            buf,
            depth: 0,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, len: usize) -> MarshalResult<&'a [u8]> {
        if self.buf.len() < len {
            return Err(MarshalError::Truncated {
                needed: len,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn read_varint(&mut self) -> MarshalResult<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.take(1)?[0];
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MarshalError::Malformed("varint longer than 10 bytes".to_string()))
    }

    /// Next field key, or `None` at the end of the message
    pub fn read_tag(&mut self) -> MarshalResult<Option<FieldTag>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let key = self.read_varint()?;
        if key == 0 {
            return Ok(None);
        }
        let wire_type = WireType::from_bits(key & 0x7)?;
        let number = u32::try_from(key >> 3)
            .map_err(|_| MarshalError::Malformed(format!("field number out of range in key {}", key)))?;
        Ok(Some(FieldTag { number, wire_type }))
    }

    pub fn read_bool(&mut self) -> MarshalResult<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_uint32(&mut self) -> MarshalResult<u32> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| MarshalError::Malformed(format!("{} does not fit in 32 bits", value)))
    }

    pub fn read_uint64(&mut self) -> MarshalResult<u64> {
        self.read_varint()
    }

    pub fn read_sint32(&mut self) -> MarshalResult<i32> {
        Ok(zigzag_decode32(self.read_uint32()?))
    }

    pub fn read_sint64(&mut self) -> MarshalResult<i64> {
        Ok(zigzag_decode64(self.read_varint()?))
    }

    pub fn read_float(&mut self) -> MarshalResult<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_double(&mut self) -> MarshalResult<f64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn read_bytes(&mut self) -> MarshalResult<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| MarshalError::Malformed(format!("length {} out of range", len)))?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> MarshalResult<String> {
        Ok(std::str::from_utf8(self.read_bytes()?)?.to_string())
    }

    /// Read a length-delimited field as a nested message
    pub fn read_message<T, F>(&mut self, f: F) -> MarshalResult<T>
    where
        F: FnOnce(&mut ProtoReader<'a>) -> MarshalResult<T>,
    {
        let bytes = self.read_bytes()?;
        let mut nested = self.nested(bytes)?;
        f(&mut nested)
    }

    fn nested(&self, buf: &'a [u8]) -> MarshalResult<ProtoReader<'a>> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(MarshalError::DepthExceeded(MAX_NESTING_DEPTH));
        }
        Ok(ProtoReader {
            registry: self.registry,
            buf,
            depth: self.depth + 1,
        })
    }

    /// Read a nested "any" message. Values with an unknown type tag are
    /// skipped and reported as `None`.
    pub fn read_any(&mut self) -> MarshalResult<Option<AttributeValue>> {
        match self.read_message(|r| r.read_any_body())? {
            AnyBody::Value(value) => Ok(Some(value)),
            AnyBody::Unknown(tag) => {
                debug!(type_tag = tag.0, "Skipping value with unknown type tag");
                Ok(None)
            }
        }
    }

    pub(crate) fn read_any_body(&mut self) -> MarshalResult<AnyBody> {
        let mut type_tag = None;
        let mut payload: &'a [u8] = &[];

        while let Some(tag) = self.read_tag()? {
            match (tag.number, tag.wire_type) {
                (1, WireType::Varint) => type_tag = Some(TypeTag(self.read_uint32()?)),
                (2, WireType::LengthDelimited) => payload = self.read_bytes()?,
                _ => self.skip_field(tag.wire_type)?,
            }
        }

        let tag = type_tag.ok_or_else(|| MarshalError::Malformed("missing type tag".to_string()))?;
        let registry = self.registry;
        let Some(marshaller) = registry.marshaller_for_tag(tag) else {
            return Ok(AnyBody::Unknown(tag));
        };
        let mut nested = self.nested(payload)?;
        Ok(AnyBody::Value(marshaller.read_from(&mut nested)?))
    }

    pub fn skip_field(&mut self, wire_type: WireType) -> MarshalResult<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.take(8)?;
            }
            WireType::LengthDelimited => {
                self.read_bytes()?;
            }
            WireType::Fixed32 => {
                self.take(4)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag() {
        for value in [0, -1, 1, i32::MIN, i32::MAX, 12345, -12345] {
            assert_eq!(zigzag_decode32(zigzag_encode32(value)), value);
        }
        for value in [0, -1, 1, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode64(zigzag_encode64(value)), value);
        }
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
    }

    #[test]
    fn test_varint_layout() {
        let registry = TagRegistry::builder().build().unwrap();
        let mut writer = ProtoWriter::new(&registry);
        writer.write_uint64(1, 300);
        assert_eq!(writer.into_bytes().as_ref(), &[0x08, 0xac, 0x02]);
    }

    #[test]
    fn test_reader_skips_every_wire_type() {
        let registry = TagRegistry::builder().build().unwrap();
        let mut writer = ProtoWriter::new(&registry);
        writer.write_uint64(7, 99);
        writer.write_double(8, 1.0);
        writer.write_string(9, "ignored");
        writer.write_float(10, 2.0);
        writer.write_string(1, "kept");
        let bytes = writer.into_bytes();

        let mut reader = ProtoReader::new(&registry, &bytes);
        let mut kept = None;
        while let Some(tag) = reader.read_tag().unwrap() {
            match (tag.number, tag.wire_type) {
                (1, WireType::LengthDelimited) => kept = Some(reader.read_string().unwrap()),
                _ => reader.skip_field(tag.wire_type).unwrap(),
            }
        }
        assert_eq!(kept.as_deref(), Some("kept"));
    }

    #[test]
    fn test_zero_key_ends_message() {
        let registry = TagRegistry::builder().build().unwrap();
        let bytes = [0x08, 0x01, 0x00, 0x08, 0x02];
        let mut reader = ProtoReader::new(&registry, &bytes);
        assert!(reader.read_tag().unwrap().is_some());
        assert!(reader.read_bool().unwrap());
        assert!(reader.read_tag().unwrap().is_none());
    }

    #[test]
    fn test_truncated_and_invalid_input() {
        let registry = TagRegistry::builder().build().unwrap();

        let mut reader = ProtoReader::new(&registry, &[0x0a, 0x05, b'a']);
        reader.read_tag().unwrap();
        assert!(matches!(
            reader.read_bytes(),
            Err(MarshalError::Truncated { needed: 5, remaining: 1 })
        ));

        let mut reader = ProtoReader::new(&registry, &[0x0b]);
        assert!(matches!(reader.read_tag(), Err(MarshalError::Malformed(_))));

        let mut reader = ProtoReader::new(&registry, &[0x02, 0xff, 0xfe]);
        assert!(matches!(reader.read_string(), Err(MarshalError::InvalidUtf8(_))));
    }
}

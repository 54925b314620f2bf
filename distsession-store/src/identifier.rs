//! Session identifier generation

use distsession_core::IdentifierFactory;
use rand::rngs::OsRng;
use rand::RngCore;

/// Random hex identifiers from the operating system's CSPRNG.
///
/// `length` is in hex characters; an odd length is rounded up to a whole byte.
#[derive(Debug, Clone)]
pub struct SessionIdentifierFactory {
    byte_length: usize,
}

impl SessionIdentifierFactory {
    pub fn new(length: usize) -> Self {
        Self {
            byte_length: length.div_ceil(2),
        }
    }

    pub fn identifier_length(&self) -> usize {
        self.byte_length * 2
    }
}

impl IdentifierFactory for SessionIdentifierFactory {
    fn create_identifier(&self) -> String {
        let mut bytes = vec![0u8; self.byte_length];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

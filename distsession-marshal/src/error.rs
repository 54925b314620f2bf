//! Marshalling errors

use distsession_core::{DistSessionError, ErrorContext, ValueKind};
use thiserror::Error;

pub type MarshalResult<T> = Result<T, MarshalError>;

#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("No marshaller registered for {0:?}")]
    UnregisteredType(ValueKind),

    #[error("Unknown type tag {0}")]
    UnknownTypeTag(u32),

    #[error("Type tag {0} registered more than once")]
    DuplicateTag(u32),

    #[error("Value kind {0:?} registered more than once")]
    DuplicateKind(ValueKind),

    #[error("Buffer truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Expected {expected}, found {found:?}")]
    UnexpectedType {
        expected: &'static str,
        found: ValueKind,
    },

    #[error("Nesting depth exceeds {0}")]
    DepthExceeded(usize),

    #[error("JSON marshalling failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarshalError {
    /// Registry misuse is a deployment problem, not a data problem
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MarshalError::UnregisteredType(_)
                | MarshalError::DuplicateTag(_)
                | MarshalError::DuplicateKind(_)
        )
    }
}

impl From<MarshalError> for DistSessionError {
    fn from(error: MarshalError) -> Self {
        if error.is_configuration() {
            DistSessionError::Config {
                message: error.to_string(),
                source: Some(Box::new(error)),
                context: ErrorContext::new("marshal")
                    .with_suggestion("Register a marshaller for every attribute value kind"),
            }
        } else {
            DistSessionError::Marshalling {
                message: error.to_string(),
                source: Some(Box::new(error)),
                context: ErrorContext::new("marshal"),
            }
        }
    }
}

//! Unified error handling system
//!
//! Structured error types with context, recovery suggestions, and proper error chaining.
//! Variants follow the store's failure taxonomy: configuration problems abort
//! startup, backend failures are transient, illegal-state errors are programmer
//! errors, and cleanup failures never surface (they are logged where they happen).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type DistSessionResult<T> = Result<T, DistSessionError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the distributable session store
#[derive(Error, Debug)]
pub enum DistSessionError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Session backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Marshalling error: {message}")]
    Marshalling {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Illegal state: {message}")]
    IllegalState {
        message: String,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DistSessionError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            DistSessionError::Config { context, .. } => Some(context),
            DistSessionError::Backend { context, .. } => Some(context),
            DistSessionError::Marshalling { context, .. } => Some(context),
            DistSessionError::IllegalState { context, .. } => Some(context),
            DistSessionError::Timeout { context, .. } => Some(context),
            DistSessionError::Internal { context, .. } => Some(context),
            DistSessionError::Io(_) | DistSessionError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DistSessionError::Backend { .. } | DistSessionError::Timeout { .. }
        )
    }

    /// Backend failure raised while talking to the session manager
    pub fn backend<E>(message: impl Into<String>, operation: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DistSessionError::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
            context: ErrorContext::new("session_manager").with_operation(operation),
        }
    }

    /// Programmer error: the operation is not valid in the current state
    pub fn illegal_state(message: impl Into<String>, component: &str, operation: &str) -> Self {
        DistSessionError::IllegalState {
            message: message.into(),
            context: ErrorContext::new(component).with_operation(operation),
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            DistSessionError::Internal { .. } | DistSessionError::IllegalState { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal error occurred"
                );
            }
            DistSessionError::Config { .. } | DistSessionError::Marshalling { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or marshalling error"
                );
            }
            DistSessionError::Backend { .. } | DistSessionError::Timeout { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Backend or timeout error (may be recoverable)"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::DistSessionError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the session store options"),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::DistSessionError::Config {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the session store options"),
        }
    };
}

#[macro_export]
macro_rules! backend_error {
    ($msg:expr, $component:expr) => {
        $crate::DistSessionError::Backend {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::DistSessionError::Backend {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! illegal_state_error {
    ($msg:expr, $component:expr) => {
        $crate::DistSessionError::IllegalState {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

//! Async utilities
//!
//! Bridges the non-blocking request context to blocking backend work.

use crate::error::{DistSessionError, DistSessionResult, ErrorContext};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(
    future: F,
    timeout_ms: u64,
    operation_name: &str,
) -> DistSessionResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(DistSessionError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Increase the timeout duration"),
        }),
    }
}

/// Run a blocking closure on the blocking worker pool and rejoin the caller.
///
/// The closure runs to completion even if the awaiting task is dropped.
pub async fn run_blocking<F, T>(operation_name: &str, f: F) -> DistSessionResult<T>
where
    F: FnOnce() -> DistSessionResult<T> + Send + 'static,
    T: Send + 'static,
{
    debug!(operation = operation_name, "Dispatching to blocking pool");
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_error) => Err(DistSessionError::Internal {
            message: format!("Blocking task failed: {}", join_error),
            source: Some(Box::new(join_error)),
            context: ErrorContext::new("async_utils")
                .with_operation(operation_name)
                .with_suggestion("Check for panics in session backend code"),
        }),
    }
}

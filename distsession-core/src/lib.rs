//! distsession core - value model, backend capabilities and shared infrastructure
//!
//! Defines the abstractions shared by the wire codec, the session store and the
//! bundled in-process backend.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod shared;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use shared::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use chrono;
pub use tokio;
pub use tracing;

//! Resource model subsystem.
//!
//! # Data Flow
//! ```text
//! Collections / device cache
//!     → tree.rs (nodes, process values, change notifications)
//!
//! REST request
//!     → handler.rs (GET properties / ~pv, PUT ~pv)
//!     → service.rs (read from tree, route writes to collection writers)
//!     → config.rs (~vendor/config, backed by the configuration store)
//! ```

pub mod config;
pub mod handler;
pub mod service;
pub mod tree;

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub use config::ConfigValue;
pub use service::{ExternalValue, ModelService, PvWriter, VendorInfo};
pub use tree::{ModelChange, Node, Pv, ResourceTree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("parent of {0} does not exist")]
    NoParent(String),

    #[error("resource has no value: {0}")]
    NoValue(String),

    #[error("resource is not writable: {0}")]
    NotWritable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("controller request failed: {0}")]
    Backend(String),
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → store.rs (RwLock<GatewayConfig>, shared via Arc)
//!
//! On shutdown:
//!     store.rs persists the snapshot, then closes
//! ```
//!
//! # Design Decisions
//! - One snapshot behind one reader/writer lock
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod paths;
pub mod schema;
pub mod store;
pub mod validation;

pub use loader::ConfigError;
pub use paths::Paths;
pub use schema::{GatewayConfig, InterfaceKind};
pub use store::ConfigStore;

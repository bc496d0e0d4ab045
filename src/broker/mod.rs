//! Pub/sub broker subsystem.
//!
//! # Data Flow
//! ```text
//! Event pipeline / model mirror
//!     → bus.rs (fan-out, retained store)
//!     → engine.rs (one session per connection)
//!     → Client
//!
//! Incoming TCP / TLS connection
//!     → server.rs (bounded accept, TLS handshake)
//!     → engine.rs
//! ```

pub mod auth;
pub mod bus;
pub mod engine;
pub mod server;
pub mod topic;

pub use auth::{OpenAccess, SessionAuthenticator, StoreAuthenticator};
pub use bus::{Bus, Message, PublishError};
pub use engine::{JsonLineEngine, SessionEngine};
pub use server::{Broker, BrokerOptions};

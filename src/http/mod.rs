//! HTTP surface of the gateway.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (plain + TLS listeners)
//!     → mux.rs (route table, extendable while serving)
//!         /veap/…   → cors.rs → auth.rs → resource model handler
//!         /ui/…     → static directory
//!         /ws-mqtt  → websocket.rs (tunnel to the pub/sub listener)
//!         /RPC3     → text callback of the interconnector
//! ```

pub mod auth;
pub mod cors;
pub mod mux;
pub mod server;
pub mod websocket;

pub use mux::{Mux, MuxError};
pub use server::{RestOptions, RestServer};
pub use websocket::Bridge;

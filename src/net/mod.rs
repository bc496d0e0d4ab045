//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configuration snapshot
//!     → addresses.rs (listener addresses, callback URLs)
//!     → certs.rs (ensure CA + server certificate on disk)
//!     → tls.rs (load the server pair for all TLS listeners)
//!
//! Incoming TCP connection (pub/sub, binary callback)
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (identity, live-connection tracking)
//!     → Hand off to the protocol layer
//! ```
//!
//! # Design Decisions
//! - One certificate pair for every TLS listener
//! - Bounded accept prevents resource exhaustion

pub mod addresses;
pub mod certs;
pub mod connection;
pub mod listener;
pub mod tls;

pub use addresses::TransportPlan;
pub use certs::{CertGenerator, CertificateError, CertificateFiles};

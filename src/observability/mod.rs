//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, stderr or log file)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → Log file or terminal
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::LogHandle;

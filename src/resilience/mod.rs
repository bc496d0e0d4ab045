//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Call to the controller fails:
//!     → backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Registration retries forever; the delay is capped, not the attempts
//! - Jitter keeps several interfaces from retrying in lockstep

pub mod backoff;

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator (orchestrator.rs):
//!     Read config → Certificates → Startup phases → Settle → Wait → Teardown
//!
//! Startup (startup.rs):
//!     Base transport → Collections → Broker → Pipeline → Interconnector
//!
//! Teardown (teardown.rs):
//!     Stop actions popped in reverse start order
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → capacity-one queue → graceful shutdown
//!
//! Fatal errors (fatal.rs):
//!     Listener failure → capacity-one channel → shutdown, exit code 1
//! ```
//!
//! # Design Decisions
//! - Ordered startup: configuration first, listeners of the base transport
//!   before application services, interconnector last
//! - Each `stop` waits for the subsystem's tasks; nothing runs after `run`

pub mod fatal;
pub mod orchestrator;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;
pub mod teardown;

pub use fatal::{FatalErrors, ServerError};
pub use orchestrator::{Gateway, GatewayError};
pub use shutdown::{Shutdown, ShutdownListener, TaskGroup};
pub use signals::TerminationSignal;
pub use state::LifecycleState;
pub use teardown::Teardown;

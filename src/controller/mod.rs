//! Controller side of the gateway.
//!
//! # Data Flow
//! ```text
//! Collections / explorer
//!     → script.rs (scripting endpoint, TSV output)
//!
//! Interconnector (interconnector.rs)
//!     → link.rs (init / deinit per interface)
//!     ← callback.rs (text and binary callbacks)
//!     → pipeline
//! ```

pub mod callback;
pub mod explorer;
pub mod interconnector;
pub mod link;
pub mod script;

pub use callback::{CallbackCodec, CallbackReceiver, DeviceDescription, DeviceDirectory, JsonCallbackCodec};
pub use explorer::{ExplorerListener, LogicExplorer, LogicGraph, LogicObject};
pub use interconnector::{Interconnector, InterconnectorOptions};
pub use link::{ControllerLink, LinkError, XmlRpcLink};
pub use script::{ScriptClient, ScriptError, ScriptRunner};

//! Callbacks from the controller's interface processes.
//!
//! # Data Flow
//! ```text
//! POST /RPC3 (text callback)           binrpc TCP port (binary callback)
//!     → text_callback                      → serve_binary (length prefixed frames)
//!     → CallbackCodec::decode  ←───────────────┘
//!     → CallbackReceiver::handle
//!         event            → Pipeline::dispatch
//!         newDevices …     → DeviceDirectory
//!     → CallbackCodec::encode → reply
//! ```
//!
//! Deliveries are serialized by the receiver, so the order in which events
//! enter the pipeline is the order in which they were received.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::lifecycle::fatal::{FatalErrors, ServerError};
use crate::lifecycle::shutdown::ShutdownListener;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;
use crate::pipeline::{Event, Pipeline};

/// Path of the text callback on the REST listener.
pub const TEXT_CALLBACK_PATH: &str = "/RPC3";

/// Largest accepted binary callback frame.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const BINARY_SERVICE: &str = "binary callback";
const MAX_BINARY_CONNECTIONS: usize = 64;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("malformed callback: {0}")]
    Malformed(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("callback receiver is not running")]
    NotRunning,
}

/// Device or channel as described by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    #[serde(rename = "ADDRESS")]
    pub address: String,
    #[serde(rename = "TYPE", default)]
    pub type_name: String,
    /// Empty for devices, the device address for channels.
    #[serde(rename = "PARENT", default)]
    pub parent: String,
    #[serde(rename = "VERSION", default)]
    pub version: u32,
}

impl DeviceDescription {
    pub fn is_channel(&self) -> bool {
        !self.parent.is_empty()
    }
}

/// A decoded callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackRequest {
    Event {
        interface_id: String,
        address: String,
        parameter: String,
        value: Value,
    },
    /// Several calls delivered in one request, handled in order.
    Multicall(Vec<CallbackRequest>),
    ListDevices {
        interface_id: String,
    },
    NewDevices {
        interface_id: String,
        devices: Vec<DeviceDescription>,
    },
    DeleteDevices {
        interface_id: String,
        addresses: Vec<String>,
    },
}

/// Result of a callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackReply {
    Value(Value),
    Fault { code: i32, message: String },
}

/// Wire encoding of callbacks.
pub trait CallbackCodec: Send + Sync {
    fn decode(&self, body: &[u8]) -> Result<CallbackRequest, CallbackError>;

    fn encode(&self, reply: &CallbackReply) -> Vec<u8>;

    fn content_type(&self) -> &'static str;
}

/// JSON encoding: `{"method": "...", "params": [...]}`.
#[derive(Debug, Default)]
pub struct JsonCallbackCodec;

#[derive(Debug, Deserialize)]
struct JsonCall {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

impl JsonCallbackCodec {
    fn decode_call(call: JsonCall) -> Result<CallbackRequest, CallbackError> {
        let mut params = call.params.into_iter();
        let mut next_string = |name: &str| -> Result<String, CallbackError> {
            match params.next() {
                Some(Value::String(s)) => Ok(s),
                other => Err(CallbackError::Malformed(format!(
                    "{}: {name} must be a string, got {other:?}",
                    call.method
                ))),
            }
        };
        let request = match call.method.as_str() {
            "event" => {
                let interface_id = next_string("interface id")?;
                let address = next_string("address")?;
                let parameter = next_string("parameter")?;
                let value = params.next().unwrap_or(Value::Null);
                CallbackRequest::Event {
                    interface_id,
                    address,
                    parameter,
                    value,
                }
            }
            "listDevices" => CallbackRequest::ListDevices {
                interface_id: next_string("interface id")?,
            },
            "newDevices" => {
                let interface_id = next_string("interface id")?;
                let devices = serde_json::from_value(params.next().unwrap_or(json!([])))
                    .map_err(|e| CallbackError::Malformed(format!("newDevices: {e}")))?;
                CallbackRequest::NewDevices { interface_id, devices }
            }
            "deleteDevices" => {
                let interface_id = next_string("interface id")?;
                let addresses = serde_json::from_value(params.next().unwrap_or(json!([])))
                    .map_err(|e| CallbackError::Malformed(format!("deleteDevices: {e}")))?;
                CallbackRequest::DeleteDevices {
                    interface_id,
                    addresses,
                }
            }
            "system.multicall" => {
                let calls: Vec<JsonCall> = serde_json::from_value(params.next().unwrap_or(json!([])))
                    .map_err(|e| CallbackError::Malformed(format!("system.multicall: {e}")))?;
                let calls = calls
                    .into_iter()
                    .map(Self::decode_call)
                    .collect::<Result<Vec<_>, _>>()?;
                CallbackRequest::Multicall(calls)
            }
            other => return Err(CallbackError::UnknownMethod(other.to_string())),
        };
        Ok(request)
    }
}

impl CallbackCodec for JsonCallbackCodec {
    fn decode(&self, body: &[u8]) -> Result<CallbackRequest, CallbackError> {
        let call: JsonCall = serde_json::from_slice(body).map_err(|e| CallbackError::Malformed(e.to_string()))?;
        Self::decode_call(call)
    }

    fn encode(&self, reply: &CallbackReply) -> Vec<u8> {
        let body = match reply {
            CallbackReply::Value(value) => json!({ "result": value }),
            CallbackReply::Fault { code, message } => json!({ "fault": { "code": code, "message": message } }),
        };
        body.to_string().into_bytes()
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Device bookkeeping requested by the interface processes.
pub trait DeviceDirectory: Send + Sync {
    /// Devices known for an interface, so that it only announces new ones.
    fn list_devices(&self, interface_id: &str) -> Vec<DeviceDescription>;

    fn new_devices(&self, interface_id: &str, devices: Vec<DeviceDescription>);

    fn delete_devices(&self, interface_id: &str, addresses: &[String]);
}

/// Applies decoded callbacks to the pipeline and the device directory.
pub struct CallbackReceiver {
    pipeline: Pipeline,
    directory: Arc<dyn DeviceDirectory>,
    running: AtomicBool,
    delivery: Mutex<()>,
}

impl CallbackReceiver {
    pub fn new(pipeline: Pipeline, directory: Arc<dyn DeviceDirectory>) -> Self {
        Self {
            pipeline,
            directory,
            running: AtomicBool::new(false),
            delivery: Mutex::new(()),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn handle(&self, request: CallbackRequest) -> CallbackReply {
        if !self.is_running() {
            return fault(&CallbackError::NotRunning);
        }
        let _delivery = self.delivery.lock();
        self.apply(request)
    }

    fn apply(&self, request: CallbackRequest) -> CallbackReply {
        match request {
            CallbackRequest::Event {
                interface_id,
                address,
                parameter,
                value,
            } => {
                metrics::record_callback_events(&interface_id, 1);
                // Dropped events are logged by the pipeline; the controller
                // gets no negative acknowledgement.
                let _ = self
                    .pipeline
                    .dispatch(&Event::new(interface_id, address, parameter, value));
                CallbackReply::Value(json!(""))
            }
            CallbackRequest::Multicall(calls) => {
                let results: Vec<Value> = calls
                    .into_iter()
                    .map(|call| match self.apply(call) {
                        CallbackReply::Value(value) => json!([value]),
                        CallbackReply::Fault { code, message } => {
                            json!({ "faultCode": code, "faultString": message })
                        }
                    })
                    .collect();
                CallbackReply::Value(Value::Array(results))
            }
            CallbackRequest::ListDevices { interface_id } => {
                let devices = self.directory.list_devices(&interface_id);
                CallbackReply::Value(serde_json::to_value(devices).unwrap_or_else(|_| json!([])))
            }
            CallbackRequest::NewDevices { interface_id, devices } => {
                tracing::info!(interface = %interface_id, count = devices.len(), "New devices announced");
                self.directory.new_devices(&interface_id, devices);
                CallbackReply::Value(json!(""))
            }
            CallbackRequest::DeleteDevices {
                interface_id,
                addresses,
            } => {
                tracing::info!(interface = %interface_id, count = addresses.len(), "Devices deleted");
                self.directory.delete_devices(&interface_id, &addresses);
                CallbackReply::Value(json!(""))
            }
        }
    }
}

fn fault(error: &CallbackError) -> CallbackReply {
    let code = match error {
        CallbackError::UnknownMethod(_) => -1,
        CallbackError::Malformed(_) => -2,
        CallbackError::NotRunning => -3,
    };
    CallbackReply::Fault {
        code,
        message: error.to_string(),
    }
}

/// Decode, handle and encode one callback body.
pub fn process(codec: &dyn CallbackCodec, receiver: &CallbackReceiver, body: &[u8]) -> Vec<u8> {
    let reply = match codec.decode(body) {
        Ok(request) => receiver.handle(request),
        Err(e) => {
            tracing::warn!(error = %e, "Rejected callback");
            fault(&e)
        }
    };
    codec.encode(&reply)
}

/// Shared state of the callback endpoints.
#[derive(Clone)]
pub struct CallbackState {
    pub codec: Arc<dyn CallbackCodec>,
    pub receiver: Arc<CallbackReceiver>,
}

/// Axum handler for the text callback.
pub async fn text_callback(State(state): State<CallbackState>, body: Bytes) -> Response {
    let reply = process(state.codec.as_ref(), &state.receiver, &body);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, state.codec.content_type())],
        reply,
    )
        .into_response()
}

/// Serve the binary callback port until `shutdown` fires. Bind failures
/// are reported as fatal.
pub async fn serve_binary(
    addr: SocketAddr,
    state: CallbackState,
    fatal: FatalErrors,
    mut shutdown: ShutdownListener,
) {
    let listener = match Listener::bind(addr, MAX_BINARY_CONNECTIONS).await {
        Ok(listener) => listener,
        Err(ListenerError::Bind { addr, source }) => {
            tracing::error!(service = BINARY_SERVICE, address = %addr, error = %source, "Bind failed");
            fatal.report(ServerError::Bind {
                service: BINARY_SERVICE,
                addr,
                source,
            });
            return;
        }
        Err(e) => {
            tracing::error!(service = BINARY_SERVICE, error = %e, "Listener failed");
            return;
        }
    };
    tracing::info!(service = BINARY_SERVICE, address = %addr, "Listening for callbacks");

    let connections = ConnectionTracker::new();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(service = BINARY_SERVICE, error = %e, "Accept failed");
                continue;
            }
        };
        let guard = connections.track();
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            if let Err(e) = serve_frames(stream, &state, shutdown).await {
                tracing::debug!(service = BINARY_SERVICE, peer = %peer, error = %e, "Connection closed");
            }
        });
    }
    connections.wait_idle().await;
    tracing::info!(service = BINARY_SERVICE, address = %addr, "Listener stopped");
}

async fn serve_frames(mut stream: TcpStream, state: &CallbackState, mut shutdown: ShutdownListener) -> io::Result<()> {
    loop {
        let len = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            len = stream.read_u32() => match len {
                Ok(len) => len as usize,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            },
        };
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit"),
            ));
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        let reply = process(state.codec.as_ref(), &state.receiver, &body);
        stream.write_u32(reply.len() as u32).await?;
        stream.write_all(&reply).await?;
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Device directory remembering everything it is told.
    #[derive(Default)]
    pub struct MemoryDirectory {
        pub devices: Mutex<Vec<DeviceDescription>>,
    }

    impl DeviceDirectory for MemoryDirectory {
        fn list_devices(&self, _interface_id: &str) -> Vec<DeviceDescription> {
            self.devices.lock().clone()
        }

        fn new_devices(&self, _interface_id: &str, devices: Vec<DeviceDescription>) {
            self.devices.lock().extend(devices);
        }

        fn delete_devices(&self, _interface_id: &str, addresses: &[String]) {
            self.devices.lock().retain(|d| !addresses.contains(&d.address));
        }
    }
}

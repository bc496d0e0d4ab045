//! Web-socket tunnel to the plain pub/sub listener.
//!
//! # Data Flow
//! ```text
//! Client ←── web-socket frames ──→ Gateway ←── TCP byte stream ──→ pub/sub listener
//! ```
//!
//! # Design Decisions
//! - Frame payloads are forwarded as bytes, no message parsing
//! - Either side closing ends the tunnel
//! - Every tunnel is tracked, so shutdown can wait for the last one

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, MethodRouter};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::net::connection::ConnectionTracker;

/// Path the tunnel is served under.
pub const BRIDGE_PATH: &str = "/ws-mqtt";

const SUBPROTOCOLS: [&str; 2] = ["mqtt", "mqttv3.1"];
const READ_BUFFER: usize = 16 * 1024;

#[derive(Clone)]
pub struct Bridge {
    target: SocketAddr,
    tunnels: ConnectionTracker,
}

impl Bridge {
    pub fn new(target: SocketAddr, tunnels: ConnectionTracker) -> Self {
        Self { target, tunnels }
    }

    pub fn route(self) -> MethodRouter {
        get(upgrade).with_state(self)
    }

    async fn tunnel(self, socket: WebSocket) {
        let _guard = self.tunnels.track();
        let stream = match TcpStream::connect(self.target).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(target = %self.target, error = %e, "Pub/sub listener unreachable");
                return;
            }
        };
        tracing::debug!(target = %self.target, "Tunnel opened");
        let (mut tcp_read, mut tcp_write) = stream.into_split();
        let (mut ws_write, mut ws_read) = socket.split();

        let upstream = async {
            while let Some(message) = ws_read.next().await {
                let payload = match message {
                    Ok(Message::Binary(bytes)) => bytes.to_vec(),
                    Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                if tcp_write.write_all(&payload).await.is_err() {
                    break;
                }
            }
            let _ = tcp_write.shutdown().await;
        };

        let downstream = async {
            let mut buf = vec![0u8; READ_BUFFER];
            loop {
                match tcp_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if ws_write.send(Message::Binary(buf[..n].to_vec().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        };

        // The first direction to finish ends the tunnel.
        tokio::select! {
            _ = upstream => {}
            _ = downstream => {}
        }
        tracing::debug!(target = %self.target, "Tunnel closed");
    }
}

async fn upgrade(State(bridge): State<Bridge>, ws: WebSocketUpgrade) -> Response {
    ws.protocols(SUBPROTOCOLS)
        .on_upgrade(move |socket| bridge.tunnel(socket))
}

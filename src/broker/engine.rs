//! Session engines.
//!
//! The broker owns the listeners and the bus; a [`SessionEngine`] speaks
//! the wire protocol on one accepted connection. [`JsonLineEngine`] is the
//! built-in engine: one JSON object per line in both directions.
//!
//! ```text
//! client → {"op":"connect","username":"admin","password":"…"}
//! server → {"op":"connack","ok":true}
//! client → {"op":"subscribe","filter":"device/status/#"}
//! client → {"op":"publish","topic":"a/b","payload":"1","retain":false}
//! server → {"topic":"device/status/A/1/STATE","payload":"{…}","retain":true}
//! ```
//!
//! `connect` is required first when users are configured; any other request
//! from an unauthenticated session is answered with a negative `connack`
//! and the session is closed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::broker::auth::SessionAuthenticator;
use crate::broker::bus::{Bus, Message};
use crate::broker::topic;
use crate::lifecycle::shutdown::ShutdownListener;

/// Byte stream of an accepted connection, plain or TLS.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> SessionStream for T {}

/// Everything an engine needs to serve one connection.
pub struct Session {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub secure: bool,
    pub bus: Arc<Bus>,
    pub auth: Arc<dyn SessionAuthenticator>,
    pub shutdown: ShutdownListener,
}

/// Wire protocol handler for broker connections.
#[async_trait]
pub trait SessionEngine: Send + Sync + 'static {
    /// Serve until the peer disconnects or `session.shutdown` fires.
    async fn serve(&self, session: Session, stream: Box<dyn SessionStream>) -> io::Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Connect {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Subscribe { filter: String },
    Unsubscribe { filter: String },
    Publish {
        topic: String,
        payload: String,
        #[serde(default)]
        retain: bool,
    },
}

#[derive(Debug, Serialize)]
struct Delivery<'a> {
    topic: &'a str,
    payload: std::borrow::Cow<'a, str>,
    retain: bool,
}

#[derive(Debug, Serialize)]
struct ConnAck {
    op: &'static str,
    ok: bool,
}

/// Line-delimited JSON engine.
#[derive(Debug, Default)]
pub struct JsonLineEngine;

impl JsonLineEngine {
    async fn acknowledge<W: AsyncWrite + Unpin>(writer: &mut W, ok: bool) -> io::Result<()> {
        let mut line = serde_json::to_vec(&ConnAck { op: "connack", ok }).map_err(io::Error::other)?;
        line.push(b'\n');
        writer.write_all(&line).await
    }

    async fn deliver<W: AsyncWrite + Unpin>(
        writer: &mut W,
        filters: &[String],
        message: &Message,
        retained: bool,
    ) -> io::Result<()> {
        if !filters.iter().any(|f| topic::matches(f, &message.topic)) {
            return Ok(());
        }
        let delivery = Delivery {
            topic: &message.topic,
            payload: String::from_utf8_lossy(&message.payload),
            retain: retained,
        };
        let mut line = serde_json::to_vec(&delivery).map_err(io::Error::other)?;
        line.push(b'\n');
        writer.write_all(&line).await
    }
}

#[async_trait]
impl SessionEngine for JsonLineEngine {
    async fn serve(&self, mut session: Session, stream: Box<dyn SessionStream>) -> io::Result<()> {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        let (_, mut rx) = session.bus.subscribe();
        let mut filters: Vec<String> = Vec::new();
        let mut authorized = !session.auth.required();

        loop {
            tokio::select! {
                _ = session.shutdown.recv() => break,
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let request = match serde_json::from_str::<Request>(&line) {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::debug!(session = %session.id, error = %e, "Malformed request");
                            continue;
                        }
                    };
                    if !authorized && !matches!(request, Request::Connect { .. }) {
                        tracing::warn!(session = %session.id, peer = %session.peer, "Request before authentication");
                        Self::acknowledge(&mut writer, false).await?;
                        break;
                    }
                    match request {
                        Request::Connect { username, password } => {
                            let ok = session.auth.authenticate(&username, &password);
                            Self::acknowledge(&mut writer, ok).await?;
                            if !ok {
                                tracing::warn!(session = %session.id, user = %username, "Authentication failed");
                                break;
                            }
                            authorized = true;
                        }
                        Request::Subscribe { filter } => {
                            // Retained messages go to the new filter only.
                            let new_filter = [filter];
                            for message in session.bus.retained_messages() {
                                Self::deliver(&mut writer, &new_filter, &message, true).await?;
                            }
                            let [filter] = new_filter;
                            filters.push(filter);
                        }
                        Request::Unsubscribe { filter } => filters.retain(|f| f != &filter),
                        Request::Publish { topic, payload, retain } => {
                            let message = Message { topic, payload: payload.into_bytes(), retain };
                            if let Err(e) = session.bus.publish(message) {
                                tracing::debug!(session = %session.id, error = %e, "Publish rejected");
                            }
                        }
                    }
                }
                message = rx.recv() => match message {
                    Ok(message) => Self::deliver(&mut writer, &filters, &message, false).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(session = %session.id, skipped, "Session lagging, messages skipped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        writer.shutdown().await.ok();
        Ok(())
    }
}

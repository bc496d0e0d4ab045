//! Broker listeners.
//!
//! # Responsibilities
//! - Bind the plain and the TLS listener without blocking startup
//! - Report bind failures through the fatal-error channel
//! - Hand accepted connections to the session engine
//! - Mirror resource model changes onto status topics
//!
//! # Design Decisions
//! - Sessions are tracked, not owned: `stop` ends the accept loops, signals
//!   every session and waits until the last one has closed

use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::broker::auth::SessionAuthenticator;
use crate::broker::bus::{Bus, Message, PublishError};
use crate::broker::engine::{Session, SessionEngine, SessionStream};
use crate::broker::topic;
use crate::lifecycle::fatal::{FatalErrors, ServerError};
use crate::lifecycle::shutdown::{ShutdownListener, TaskGroup};
use crate::model::ModelChange;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

const PLAIN_SERVICE: &str = "pub/sub";
const TLS_SERVICE: &str = "pub/sub TLS";

/// Broker listener settings.
#[derive(Clone)]
pub struct BrokerOptions {
    pub addr: SocketAddr,
    pub addr_tls: SocketAddr,
    pub tls: RustlsConfig,
    pub max_connections: usize,
    pub auth: Arc<dyn SessionAuthenticator>,
}

/// Pub/sub broker: bus, listeners and sessions.
pub struct Broker {
    options: BrokerOptions,
    bus: Arc<Bus>,
    engine: Arc<dyn SessionEngine>,
    fatal: FatalErrors,
    tasks: TaskGroup,
    sessions: ConnectionTracker,
}

impl Broker {
    pub fn new(options: BrokerOptions, engine: Arc<dyn SessionEngine>, fatal: FatalErrors) -> Self {
        Self {
            options,
            bus: Arc::new(Bus::new()),
            engine,
            fatal,
            tasks: TaskGroup::new("broker"),
            sessions: ConnectionTracker::new(),
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Open the bus and spawn both listeners. Returns immediately; bind
    /// failures arrive on the fatal-error channel.
    pub fn start(&self) {
        self.bus.open();
        for (service, addr, tls) in [
            (PLAIN_SERVICE, self.options.addr, None),
            (TLS_SERVICE, self.options.addr_tls, Some(self.options.tls.clone())),
        ] {
            let acceptor = AcceptLoop {
                service,
                addr,
                tls,
                max_connections: self.options.max_connections,
                bus: Arc::clone(&self.bus),
                auth: Arc::clone(&self.options.auth),
                engine: Arc::clone(&self.engine),
                fatal: self.fatal.clone(),
                sessions: self.sessions.clone(),
            };
            self.tasks.spawn(acceptor.run(self.tasks.listener()));
        }
    }

    /// Publish a message to all sessions.
    pub fn publish(&self, message: Message) -> Result<(), PublishError> {
        self.bus.publish(message)
    }

    /// Publish value changes of mirrored model paths until the broker stops.
    pub fn mirror(&self, mut changes: broadcast::Receiver<ModelChange>) {
        let bus = Arc::clone(&self.bus);
        let mut shutdown = self.tasks.listener();
        self.tasks.spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = shutdown.recv() => break,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(change) => {
                        let Some(topic) = topic::model_status(&change.path) else {
                            continue;
                        };
                        let payload = match serde_json::to_vec(&change.pv) {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!(path = %change.path, error = %e, "Encoding value failed");
                                continue;
                            }
                        };
                        if let Err(e) = bus.publish(Message::retained(topic, payload)) {
                            tracing::debug!(path = %change.path, error = %e, "Mirroring value failed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Model mirror lagging, changes skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Stop accepting, end every session and wait for all of it.
    pub async fn stop(&self) {
        self.bus.close();
        self.tasks.stop().await;
        self.sessions.wait_idle().await;
    }
}

struct AcceptLoop {
    service: &'static str,
    addr: SocketAddr,
    tls: Option<RustlsConfig>,
    max_connections: usize,
    bus: Arc<Bus>,
    auth: Arc<dyn SessionAuthenticator>,
    engine: Arc<dyn SessionEngine>,
    fatal: FatalErrors,
    sessions: ConnectionTracker,
}

impl AcceptLoop {
    async fn run(self, mut shutdown: ShutdownListener) {
        let listener = match Listener::bind(self.addr, self.max_connections).await {
            Ok(listener) => listener,
            Err(ListenerError::Bind { addr, source }) => {
                tracing::error!(service = self.service, address = %addr, error = %source, "Bind failed");
                self.fatal.report(ServerError::Bind {
                    service: self.service,
                    addr,
                    source,
                });
                return;
            }
            Err(e) => {
                tracing::error!(service = self.service, error = %e, "Listener failed");
                return;
            }
        };
        let acceptor = self.tls.clone().map(RustlsAcceptor::new);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    // Per-connection failures (reset, fd exhaustion) are
                    // not fatal for the listener.
                    tracing::warn!(service = self.service, error = %e, "Accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(service = self.service, error = %e, "Listener closed");
                    break;
                }
            };

            let guard = self.sessions.track();
            let session = Session {
                id: Uuid::new_v4(),
                peer,
                secure: acceptor.is_some(),
                bus: Arc::clone(&self.bus),
                auth: Arc::clone(&self.auth),
                shutdown: shutdown.clone(),
            };
            let engine = Arc::clone(&self.engine);
            let acceptor = acceptor.clone();
            let service = self.service;
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                let stream: Box<dyn SessionStream> = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream, ()).await {
                        Ok((tls_stream, ())) => Box::new(tls_stream),
                        Err(e) => {
                            tracing::debug!(service, peer = %peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => Box::new(stream),
                };
                let id = session.id;
                tracing::debug!(service, session = %id, peer = %peer, "Session opened");
                if let Err(e) = engine.serve(session, stream).await {
                    tracing::debug!(service, session = %id, error = %e, "Session ended with error");
                }
            });
        }
        tracing::info!(service = self.service, address = %self.addr, "Listener stopped");
    }
}

//! Fatal server errors.
//!
//! Listeners start without blocking and report a failure to bind or serve
//! here. The channel holds a single error: the first one reported decides
//! the outcome, everything after it is dropped.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::mpsc;

/// A listener failed after startup returned.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{service} listener on {addr} failed to bind: {source}")]
    Bind {
        service: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("{service} listener on {addr} failed: {source}")]
    Serve {
        service: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl ServerError {
    pub fn service(&self) -> &'static str {
        match self {
            ServerError::Bind { service, .. } | ServerError::Serve { service, .. } => service,
        }
    }
}

/// Producer side, cloned into every listener task.
#[derive(Debug, Clone)]
pub struct FatalErrors {
    tx: mpsc::Sender<ServerError>,
}

impl FatalErrors {
    /// Report an error. Never blocks.
    pub fn report(&self, error: ServerError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(error)) => {
                tracing::debug!(error = %error, "Fatal error ignored, another one is pending");
            }
            Err(mpsc::error::TrySendError::Closed(error)) => {
                tracing::debug!(error = %error, "Fatal error ignored, shutdown in progress");
            }
        }
    }
}

/// Consumer side, owned by the orchestrator.
#[derive(Debug)]
pub struct FatalReceiver {
    rx: mpsc::Receiver<ServerError>,
}

impl FatalReceiver {
    pub async fn recv(&mut self) -> Option<ServerError> {
        self.rx.recv().await
    }

    /// Stop accepting errors; later reports are dropped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create the fatal-error channel.
pub fn fatal_channel() -> (FatalErrors, FatalReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (FatalErrors { tx }, FatalReceiver { rx })
}

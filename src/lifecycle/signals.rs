//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers before startup begins
//! - Funnel them into a queue of capacity one, so a signal delivered while
//!   the gateway is still starting is not lost
//!
//! All other signals keep their default OS handling.

use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Pending termination requests.
#[derive(Debug)]
pub struct TerminationSignal {
    rx: mpsc::Receiver<&'static str>,
    forwarder: JoinHandle<()>,
}

impl TerminationSignal {
    /// Install the signal handlers.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let (tx, rx) = mpsc::channel(1);
        let forwarder = tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = interrupt.recv() => "SIGINT",
                    Some(()) = terminate.recv() => "SIGTERM",
                    else => break,
                };
                // A full queue already holds a pending request.
                let _ = tx.try_send(name);
            }
        });
        Ok(Self { rx, forwarder })
    }

    /// Install the signal handlers.
    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        let forwarder = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.try_send("ctrl-c");
            }
        });
        Ok(Self { rx, forwarder })
    }

    /// Wait for the next termination request and return the signal name.
    pub async fn recv(&mut self) -> Option<&'static str> {
        self.rx.recv().await
    }
}

impl Drop for TerminationSignal {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

//! Gateway lifecycle.
//!
//! # Responsibilities
//! - Read the configuration and apply its logging and metrics sections
//! - Ensure the TLS certificate pair exists
//! - Start every subsystem in dependency order
//! - Wait for a termination request or the first fatal server error
//! - Stop everything in reverse order and persist the configuration
//!
//! # Data Flow
//! ```text
//! configure → certificates → startup_base → startup_app → settle
//!     → select(fatal error, termination)
//!     → teardown (reverse start order) → persist + close configuration
//! ```
//!
//! # Design Decisions
//! - All shared handles live in an explicit [`App`] context, no globals
//! - Listener failures after startup are reported through a capacity-one
//!   channel; the first error decides the outcome
//! - The configuration is persisted and closed by a drop guard, so every
//!   exit path past `configure` writes it exactly once

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::sync::watch;

use crate::broker::{JsonLineEngine, SessionEngine};
use crate::config::{ConfigError, ConfigStore, Paths};
use crate::controller::{CallbackCodec, ControllerLink, JsonCallbackCodec, ScriptError, ScriptRunner};
use crate::http::MuxError;
use crate::lifecycle::fatal::{fatal_channel, FatalErrors, ServerError};
use crate::lifecycle::startup::{startup_app, startup_base};
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::teardown::Teardown;
use crate::model::ModelError;
use crate::net::certs::{CertGenerator, CertificateError, CertificateFiles};
use crate::net::tls::load_tls_config;
use crate::net::TransportPlan;
use crate::observability::logging::LoggingError;
use crate::observability::{metrics, LogHandle};

/// Display name, also the organization of generated certificates.
pub const APP_NAME: &str = "Home Gateway";

/// Pause between the end of startup and the first look at the fatal
/// channel, so no listener is closed while it is still starting.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Broker connection limit.
const MAX_PUBSUB_CONNECTIONS: usize = 1024;

/// Error type for a gateway run. Every variant ends the process with exit
/// code 1.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("certificates: {0}")]
    Certificate(#[from] CertificateError),

    #[error("server start: {0}")]
    ServerStart(#[from] ServerError),

    #[error("resource model: {0}")]
    Model(#[from] ModelError),

    #[error("route registration: {0}")]
    Route(#[from] MuxError),

    #[error("script client: {0}")]
    Script(#[from] ScriptError),

    #[error("controller link: {0}")]
    Link(#[source] reqwest::Error),
}

/// Replaceable collaborators. `None` selects the built-in client for the
/// configured controller address.
#[derive(Clone)]
pub struct Collaborators {
    pub script_runner: Option<Arc<dyn ScriptRunner>>,
    pub controller_link: Option<Arc<dyn ControllerLink>>,
    pub codec: Arc<dyn CallbackCodec>,
    pub engine: Arc<dyn SessionEngine>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            script_runner: None,
            controller_link: None,
            codec: Arc::new(JsonCallbackCodec),
            engine: Arc::new(JsonLineEngine),
        }
    }
}

/// Shared context of one run, handed to the startup phases.
pub struct App {
    pub store: Arc<ConfigStore>,
    pub paths: Paths,
    pub plan: TransportPlan,
    pub tls: RustlsConfig,
    pub fatal: FatalErrors,
    pub collaborators: Collaborators,
    pub max_connections: usize,
}

/// Persists and closes the configuration store when dropped.
struct StoreGuard(Arc<ConfigStore>);

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.persist() {
            tracing::error!(path = %self.0.path().display(), error = %e, "Writing configuration failed");
        }
        self.0.close();
    }
}

/// One gateway run, from configuration to shutdown.
pub struct Gateway {
    paths: Paths,
    settle_delay: Duration,
    log: Option<LogHandle>,
    collaborators: Collaborators,
    state: watch::Sender<LifecycleState>,
}

impl Gateway {
    pub fn new(paths: Paths) -> Self {
        let (state, _) = watch::channel(LifecycleState::Configuring);
        Self {
            paths,
            settle_delay: SETTLE_DELAY,
            log: None,
            collaborators: Collaborators::default(),
            state,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Apply the configured log level and file to this subscriber.
    pub fn with_log_handle(mut self, log: LogHandle) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.collaborators.script_runner = Some(runner);
        self
    }

    pub fn with_controller_link(mut self, link: Arc<dyn ControllerLink>) -> Self {
        self.collaborators.controller_link = Some(link);
        self
    }

    pub fn with_callback_codec(mut self, codec: Arc<dyn CallbackCodec>) -> Self {
        self.collaborators.codec = codec;
        self
    }

    pub fn with_session_engine(mut self, engine: Arc<dyn SessionEngine>) -> Self {
        self.collaborators.engine = engine;
        self
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, state: LifecycleState) {
        tracing::info!(state = %state, "Lifecycle transition");
        self.state.send_replace(state);
    }

    /// Run until `termination` resolves or a listener fails.
    ///
    /// `termination` must already be listening when this is called, so a
    /// request delivered during startup is not lost.
    pub async fn run<T>(self, termination: T) -> Result<(), GatewayError>
    where
        T: Future<Output = ()> + Send,
    {
        let result = self.run_inner(termination).await;
        tracing::info!("Shutting down");
        self.transition(LifecycleState::Stopped);
        result
    }

    async fn run_inner<T>(&self, termination: T) -> Result<(), GatewayError>
    where
        T: Future<Output = ()> + Send,
    {
        self.transition(LifecycleState::Configuring);
        let store = self.configure()?;
        let _persist = StoreGuard(Arc::clone(&store));
        banner(&store);

        let files = CertificateFiles::from_paths(&self.paths);
        certificates(&store, &files)?;
        let tls = load_tls_config(&files).await?;

        self.transition(LifecycleState::Starting);
        let (fatal, mut fatal_rx) = fatal_channel();
        let plan = TransportPlan::from_config(&store.read());
        let app = App {
            store,
            paths: self.paths.clone(),
            plan,
            tls,
            fatal,
            collaborators: self.collaborators.clone(),
            max_connections: MAX_PUBSUB_CONNECTIONS,
        };

        let mut teardown = Teardown::new();
        let started = match startup_base(&app, &mut teardown) {
            Ok(base) => startup_app(&app, &base, &mut teardown),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            self.transition(LifecycleState::ShuttingDown);
            fatal_rx.close();
            teardown.unwind().await;
            return Err(e);
        }

        tokio::time::sleep(self.settle_delay).await;
        self.transition(LifecycleState::Running);

        let result = tokio::select! {
            Some(error) = fatal_rx.recv() => Err(GatewayError::ServerStart(error)),
            _ = termination => {
                tracing::debug!("Termination requested");
                Ok(())
            }
        };

        self.transition(LifecycleState::ShuttingDown);
        fatal_rx.close();
        teardown.unwind().await;
        result
    }

    fn configure(&self) -> Result<Arc<ConfigStore>, GatewayError> {
        let store = ConfigStore::open(self.paths.config_file())?;
        let config = store.snapshot();
        if let Some(log) = &self.log {
            log.apply(&config.logging)?;
        }
        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(e) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                ),
            }
        }
        Ok(Arc::new(store))
    }
}

fn certificates(store: &ConfigStore, files: &CertificateFiles) -> Result<(), CertificateError> {
    if files.server_pair_exists() {
        return Ok(());
    }
    let config = store.read();
    tracing::info!("Generating certificates");
    CertGenerator::new(&config.host.name, APP_NAME, files.clone()).generate()
}

fn banner(store: &ConfigStore) {
    let config = store.read();
    tracing::info!(name = APP_NAME, version = env!("CARGO_PKG_VERSION"), "Starting");
    tracing::info!(
        log_level = %config.logging.level,
        log_file = %config.logging.file_path,
        host_name = %config.host.name,
        host_address = %config.host.address,
        http_port = config.http.port,
        https_port = config.http.port_tls,
        cors_origins = %config.http.cors_origins.join(","),
        pubsub_port = config.pubsub.port,
        pubsub_tls_port = config.pubsub.port_tls,
        binrpc_port = config.binrpc.port,
        controller_address = %config.controller.address,
        interfaces = %config.controller.interfaces_display(),
        init_id = %config.controller.init_id,
        users = config.users.len(),
        "Configuration"
    );
}

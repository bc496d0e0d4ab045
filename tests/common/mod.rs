//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use home_gateway::config::schema::InterfaceKind;
use home_gateway::config::Paths;
use home_gateway::controller::{ControllerLink, LinkError, ScriptError, ScriptRunner};
use home_gateway::lifecycle::{Gateway, GatewayError, LifecycleState};

/// Ask the OS for a port that is free right now.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn local(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Listener ports of one test gateway.
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    pub http: u16,
    pub http_tls: u16,
    pub pubsub: u16,
    pub pubsub_tls: u16,
    pub binrpc: u16,
}

impl Ports {
    pub fn pick() -> Self {
        Self {
            http: free_port(),
            http_tls: free_port(),
            pubsub: free_port(),
            pubsub_tls: free_port(),
            binrpc: free_port(),
        }
    }

    pub fn all(&self) -> [u16; 4] {
        [self.http, self.http_tls, self.pubsub, self.pubsub_tls]
    }
}

/// Write a configuration for `ports` into `dir`.
pub fn write_config(dir: &Path, ports: Ports, interfaces: &str) {
    let config = format!(
        r#"
[host]
name = "localhost"
address = "127.0.0.1"

[http]
port = {}
port_tls = {}

[pubsub]
port = {}
port_tls = {}

[binrpc]
port = {}

[controller]
address = "127.0.0.1"
interfaces = [{interfaces}]
init_id = "test"
"#,
        ports.http, ports.http_tls, ports.pubsub, ports.pubsub_tls, ports.binrpc
    );
    std::fs::write(Paths::new(dir).config_file(), config).unwrap();
}

/// Script runner answering every script with empty output.
#[derive(Default)]
pub struct SilentRunner {
    pub scripts: Mutex<Vec<String>>,
}

#[async_trait]
impl ScriptRunner for SilentRunner {
    async fn run(&self, script: &str) -> Result<String, ScriptError> {
        self.scripts.lock().push(script.to_string());
        Ok(String::new())
    }
}

/// Link accepting every registration.
#[derive(Default)]
pub struct RecordingLink {
    pub inits: Mutex<Vec<(InterfaceKind, String, String)>>,
    pub deinits: Mutex<Vec<InterfaceKind>>,
}

#[async_trait]
impl ControllerLink for RecordingLink {
    async fn init(&self, interface: InterfaceKind, callback_url: &str, callback_id: &str) -> Result<(), LinkError> {
        self.inits
            .lock()
            .push((interface, callback_url.to_string(), callback_id.to_string()));
        Ok(())
    }

    async fn deinit(&self, interface: InterfaceKind, _callback_url: &str) -> Result<(), LinkError> {
        self.deinits.lock().push(interface);
        Ok(())
    }
}

/// A gateway running on a background task.
pub struct Running {
    pub state: watch::Receiver<LifecycleState>,
    pub link: Arc<RecordingLink>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), GatewayError>>,
}

impl Running {
    /// Start a gateway in `dir` with stand-in controller clients.
    pub fn spawn(dir: &Path) -> Self {
        let link = Arc::new(RecordingLink::default());
        let gateway = Gateway::new(Paths::new(dir))
            .with_settle_delay(Duration::from_millis(100))
            .with_script_runner(Arc::new(SilentRunner::default()))
            .with_controller_link(link.clone());
        let state = gateway.state();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(gateway.run(async move {
            let _ = stopped.await;
        }));
        Self {
            state,
            link,
            stop: Some(stop),
            task,
        }
    }

    /// Wait until the gateway reached `Running` or gave up.
    pub async fn until_running(&mut self) -> LifecycleState {
        let state = tokio::time::timeout(
            Duration::from_secs(10),
            self.state
                .wait_for(|s| matches!(s, LifecycleState::Running | LifecycleState::Stopped)),
        )
        .await
        .expect("gateway did not start")
        .map(|s| *s)
        .unwrap_or(LifecycleState::Stopped);
        state
    }

    /// Request termination and return the result of the run.
    pub async fn terminate(mut self) -> Result<(), GatewayError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.finish().await
    }

    /// Wait for the run to end on its own.
    pub async fn finish(self) -> Result<(), GatewayError> {
        tokio::time::timeout(Duration::from_secs(30), self.task)
            .await
            .expect("gateway did not stop")
            .expect("gateway task panicked")
    }
}

/// Poll `addr` until a connection succeeds.
pub async fn wait_accepting(addr: SocketAddr) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{addr} is not accepting connections");
}

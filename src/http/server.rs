//! REST listeners.
//!
//! # Responsibilities
//! - Serve the shared multiplexer on a plain and a TLS address
//! - Report bind and serve failures through the fatal-error channel
//! - Build the resource model stack served under `/veap`
//!
//! # Design Decisions
//! - `start` returns before the sockets are bound; startup never blocks on
//!   a listener
//! - One handle per listener, so `stop` drains both the same way

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tower_http::trace::TraceLayer;

use crate::config::ConfigStore;
use crate::http::auth::basic_auth;
use crate::http::cors::cors_layer;
use crate::lifecycle::fatal::{FatalErrors, ServerError};
use crate::lifecycle::shutdown::TaskGroup;
use crate::model::handler;
use crate::model::ModelService;

const PLAIN_SERVICE: &str = "REST";
const TLS_SERVICE: &str = "REST TLS";

/// Time open requests get to finish after `stop`.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// REST listener settings.
#[derive(Clone)]
pub struct RestOptions {
    pub addr: SocketAddr,
    pub addr_tls: SocketAddr,
    pub tls: RustlsConfig,
}

/// Plain and TLS listener serving one router.
pub struct RestServer {
    plain: Handle,
    tls: Handle,
    tasks: TaskGroup,
}

impl RestServer {
    /// Spawn both listeners.
    pub fn start(options: RestOptions, app: Router, fatal: FatalErrors) -> Self {
        let app = app.layer(TraceLayer::new_for_http());
        let tasks = TaskGroup::new("rest");
        let plain = Handle::new();
        let tls = Handle::new();

        {
            let server = axum_server::bind(options.addr)
                .handle(plain.clone())
                .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());
            let fatal = fatal.clone();
            let addr = options.addr;
            tasks.spawn(async move {
                tracing::info!(service = PLAIN_SERVICE, address = %addr, "Starting listener");
                if let Err(e) = server.await {
                    report(&fatal, PLAIN_SERVICE, addr, e);
                }
            });
        }

        {
            let server = axum_server::bind_rustls(options.addr_tls, options.tls)
                .handle(tls.clone())
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());
            let addr = options.addr_tls;
            tasks.spawn(async move {
                tracing::info!(service = TLS_SERVICE, address = %addr, "Starting listener");
                if let Err(e) = server.await {
                    report(&fatal, TLS_SERVICE, addr, e);
                }
            });
        }

        Self { plain, tls, tasks }
    }

    /// Bound address of the plain listener, once it is listening.
    pub async fn listening(&self) -> Option<SocketAddr> {
        self.plain.listening().await
    }

    /// Bound address of the TLS listener, once it is listening.
    pub async fn listening_tls(&self) -> Option<SocketAddr> {
        self.tls.listening().await
    }

    /// Stop accepting, let open requests finish and wait for both listeners.
    pub async fn stop(&self) {
        self.plain.graceful_shutdown(Some(GRACE_PERIOD));
        self.tls.graceful_shutdown(Some(GRACE_PERIOD));
        self.tasks.stop().await;
    }
}

fn report(fatal: &FatalErrors, service: &'static str, addr: SocketAddr, source: io::Error) {
    tracing::error!(service, address = %addr, error = %source, "Listener failed");
    let error = match source.kind() {
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable | io::ErrorKind::PermissionDenied => {
            ServerError::Bind { service, addr, source }
        }
        _ => ServerError::Serve { service, addr, source },
    };
    fatal.report(error);
}

/// Resource model handler wrapped by basic authentication, wrapped by CORS.
pub fn model_stack(service: Arc<ModelService>, store: Arc<ConfigStore>, cors_origins: &[String]) -> Router {
    handler::router(service)
        .layer(middleware::from_fn_with_state(store, basic_auth))
        .layer(cors_layer(cors_origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::config::Paths;
    use crate::lifecycle::fatal::fatal_channel;
    use crate::model::VendorInfo;
    use crate::net::certs::{CertGenerator, CertificateFiles};
    use crate::net::tls::load_tls_config;
    use axum::routing::get;

    async fn tls_config(dir: &std::path::Path) -> RustlsConfig {
        let files = CertificateFiles::from_paths(&Paths::new(dir));
        CertGenerator::new("localhost", "Home Gateway", files.clone())
            .generate()
            .unwrap();
        load_tls_config(&files).await.unwrap()
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn serves_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let options = RestOptions {
            addr: loopback(),
            addr_tls: loopback(),
            tls: tls_config(dir.path()).await,
        };
        let (fatal, _rx) = fatal_channel();
        let app = Router::new().route("/ping", get(|| async { "pong" }));
        let server = RestServer::start(options, app, fatal);

        let addr = server.listening().await.unwrap();
        assert!(server.listening_tls().await.is_some());
        let body = reqwest::get(format!("http://{addr}/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");

        server.stop().await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn occupied_port_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let held = std::net::TcpListener::bind(loopback()).unwrap();
        let options = RestOptions {
            addr: loopback(),
            addr_tls: held.local_addr().unwrap(),
            tls: tls_config(dir.path()).await,
        };
        let (fatal, mut rx) = fatal_channel();
        let server = RestServer::start(options, Router::new(), fatal);

        match rx.recv().await {
            Some(ServerError::Bind { service, .. }) => assert_eq!(service, TLS_SERVICE),
            other => panic!("unexpected {other:?}"),
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn model_stack_requires_credentials() {
        let service = Arc::new(ModelService::new(&VendorInfo::default()));
        let mut config = GatewayConfig::default();
        config.users.push(crate::config::schema::UserConfig {
            identifier: "admin".into(),
            password: "secret".into(),
        });
        let store = Arc::new(ConfigStore::with_config("unused.toml", config));
        let app = Router::new().nest(handler::URL_PREFIX, model_stack(service, store, &[]));

        use tower::ServiceExt;
        let response = app
            .oneshot(
                axum::http::Request::get("/veap/~vendor")
                    .header(axum::http::header::ORIGIN, "http://ui.local")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
        // CORS wraps authentication, so even a rejection carries the header.
        assert_eq!(response.headers()[axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}

//! Shared request multiplexer of the REST listeners.
//!
//! Routes can be added after the listeners are up: the served router only
//! forwards to the most recently published route table.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::response::Response;
use axum::routing::MethodRouter;
use axum::Router;
use parking_lot::Mutex;
use thiserror::Error;
use tower::ServiceExt;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    #[error("path already registered: {0}")]
    Duplicate(String),

    #[error("path must start with '/': {0}")]
    InvalidPath(String),
}

struct Table {
    router: Router,
    paths: HashSet<String>,
}

pub struct Mux {
    table: Mutex<Table>,
    current: ArcSwap<Router>,
}

impl Mux {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                router: Router::new(),
                paths: HashSet::new(),
            }),
            current: ArcSwap::from_pointee(Router::new()),
        }
    }

    /// Register a handler for an exact path.
    pub fn route(&self, path: &str, handler: MethodRouter) -> Result<(), MuxError> {
        self.register(path, |router| router.route(path, handler))
    }

    /// Mount a router below `prefix`.
    pub fn nest(&self, prefix: &str, router: Router) -> Result<(), MuxError> {
        self.register(prefix, |current| current.nest(prefix, router))
    }

    /// Mount a service (e.g. a directory) below `prefix`.
    pub fn nest_service<S>(&self, prefix: &str, service: S) -> Result<(), MuxError>
    where
        S: tower::Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        S::Response: axum::response::IntoResponse,
        S::Future: Send + 'static,
    {
        self.register(prefix, |current| current.nest_service(prefix, service))
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.table.lock().paths.contains(path)
    }

    fn register(&self, path: &str, add: impl FnOnce(Router) -> Router) -> Result<(), MuxError> {
        if !path.starts_with('/') {
            return Err(MuxError::InvalidPath(path.to_string()));
        }
        let mut table = self.table.lock();
        if !table.paths.insert(path.to_string()) {
            return Err(MuxError::Duplicate(path.to_string()));
        }
        let router = std::mem::take(&mut table.router);
        table.router = add(router);
        self.current.store(Arc::new(table.router.clone()));
        tracing::debug!(path, "Route registered");
        Ok(())
    }

    /// The router to serve. Every request is dispatched against the route
    /// table current at the time it arrives.
    pub fn service(self: &Arc<Self>) -> Router {
        let mux = Arc::clone(self);
        Router::new().fallback(move |request: Request| {
            let router = mux.current.load_full();
            async move { dispatch(router, request).await }
        })
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(router: Arc<Router>, request: Request) -> Response {
    match Router::clone(&router).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

//! REST handler over the model service.
//!
//! ```text
//! GET /veap/<path>       → properties and child links
//! GET /veap/<path>/~pv   → process value
//! PUT /veap/<path>/~pv   → write process value, body {"v": …}
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::model::service::ModelService;
use crate::model::ModelError;
use crate::observability::metrics;

/// URL prefix the resource tree is served under.
pub const URL_PREFIX: &str = "/veap";

const PV_SUFFIX: &str = "~pv";

#[derive(Debug, Deserialize)]
struct PvWrite {
    v: Value,
}

impl IntoResponse for ModelError {
    fn into_response(self) -> Response {
        let status = match &self {
            ModelError::NotFound(_) | ModelError::NoValue(_) => StatusCode::NOT_FOUND,
            ModelError::NotWritable(_) => StatusCode::METHOD_NOT_ALLOWED,
            ModelError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ModelError::Backend(_) => StatusCode::BAD_GATEWAY,
            ModelError::NoParent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Base resource handler, to be nested under [`URL_PREFIX`].
pub fn router(service: Arc<ModelService>) -> Router {
    Router::new()
        .route("/", get(read_root))
        .route("/{*path}", get(read).put(write))
        .with_state(service)
}

async fn read_root(State(service): State<Arc<ModelService>>) -> Response {
    finish(&service, Method::GET, service.read("").map(Json))
}

async fn read(State(service): State<Arc<ModelService>>, Path(path): Path<String>) -> Response {
    let result = match strip_pv(&path) {
        Some(node) => service
            .read_pv(node)
            .and_then(|pv| serde_json::to_value(pv).map_err(|e| ModelError::Backend(e.to_string())))
            .map(Json),
        None => service.read(&path).map(Json),
    };
    finish(&service, Method::GET, result)
}

async fn write(
    State(service): State<Arc<ModelService>>,
    Path(path): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let result = async {
        let node = strip_pv(&path).ok_or_else(|| ModelError::NotWritable(path.clone()))?;
        let pv: PvWrite =
            serde_json::from_slice(&body).map_err(|e| ModelError::BadRequest(e.to_string()))?;
        service.write_pv(node, pv.v).await
    }
    .await
    .map(|_| StatusCode::OK);
    finish(&service, Method::PUT, result)
}

fn strip_pv(path: &str) -> Option<&str> {
    let path = path.trim_end_matches('/');
    if path == PV_SUFFIX {
        return Some("");
    }
    path.strip_suffix(PV_SUFFIX)
        .and_then(|p| p.strip_suffix('/'))
}

fn finish<T: IntoResponse>(service: &ModelService, method: Method, result: Result<T, ModelError>) -> Response {
    let response = match result {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "Resource request failed");
            e.into_response()
        }
    };
    let status = response.status();
    service.stats().record(status.is_success());
    metrics::record_rest_request(method.as_str(), status.as_u16());
    response
}

//! CORS policy of the resource model.
//!
//! No configured origins: any origin, no credentials. Configured origins:
//! exactly those, with credentials. Credentials are never combined with a
//! wildcard origin.

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const METHODS: [Method; 2] = [Method::GET, Method::PUT];

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_methods(METHODS)
            .allow_origin(Any)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    // Origins are validated with the configuration; anything unparsable
    // here is skipped.
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_methods(METHODS)
        .allow_origin(AllowOrigin::list(origins))
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    async fn preflight(origins: &[String], origin: &str) -> axum::http::HeaderMap {
        let app = Router::new()
            .route("/veap", get(|| async { "ok" }))
            .layer(cors_layer(origins));
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/veap")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap().headers().clone()
    }

    #[tokio::test]
    async fn wildcard_without_credentials() {
        let headers = preflight(&[], "http://example.com").await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[tokio::test]
    async fn listed_origins_with_credentials() {
        let origins = vec!["http://ui.local".to_string()];
        let headers = preflight(&origins, "http://ui.local").await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://ui.local");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let headers = preflight(&origins, "http://evil.local").await;
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}

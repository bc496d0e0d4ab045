//! HTTP basic authentication for the resource model.
//!
//! Credentials are read from the configuration store on every request,
//! so changes to the user list apply immediately. Without configured
//! users access is open.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::ConfigStore;

pub const REALM: &str = "Home Gateway resource model";

/// Identifier of the authenticated user, attached to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    let challenge = format!("Basic realm=\"{REALM}\", charset=\"UTF-8\"");
    let mut response = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

pub async fn basic_auth(State(store): State<Arc<ConfigStore>>, mut req: Request<Body>, next: Next) -> Response {
    let user = {
        let config = store.read();
        if config.users.is_empty() {
            None
        } else {
            let Some((identifier, password)) = credentials(req.headers()) else {
                return unauthorized();
            };
            if !config.knows_user(&identifier, &password) {
                tracing::warn!(user = %identifier, "Authentication failed");
                return unauthorized();
            }
            Some(identifier)
        }
    };
    if let Some(user) = user {
        req.extensions_mut().insert(AuthenticatedUser(user));
    }
    next.run(req).await
}

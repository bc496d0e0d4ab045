//! Session authentication.
//!
//! Broker sessions are checked against the same user list as the REST
//! surface. The web-socket bridge dials the plain listener, so tunnelled
//! clients pass the same check.

use std::sync::Arc;

use crate::config::ConfigStore;

/// Decides whether a session may use the broker.
pub trait SessionAuthenticator: Send + Sync + 'static {
    /// Whether sessions must present credentials at all.
    fn required(&self) -> bool;

    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Checks credentials against the configured users. Re-read on every
/// session, so user changes apply to the next connection.
pub struct StoreAuthenticator {
    store: Arc<ConfigStore>,
}

impl StoreAuthenticator {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }
}

impl SessionAuthenticator for StoreAuthenticator {
    fn required(&self) -> bool {
        !self.store.read().users.is_empty()
    }

    fn authenticate(&self, username: &str, password: &str) -> bool {
        let config = self.store.read();
        config.users.is_empty() || config.knows_user(username, password)
    }
}

/// Accepts every session.
#[derive(Debug, Default)]
pub struct OpenAccess;

impl SessionAuthenticator for OpenAccess {
    fn required(&self) -> bool {
        false
    }

    fn authenticate(&self, _username: &str, _password: &str) -> bool {
        true
    }
}

//! Shared, persistable configuration store.
//!
//! Holds the one mutable configuration snapshot of the process behind a
//! reader/writer lock. Startup phases that derive a composite value from
//! several fields (a URL, a socket address) take one read guard for the
//! whole derivation so they never observe a half-written snapshot.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::loader::{load_config, save_config, ConfigError};
use crate::config::schema::GatewayConfig;

/// Versioned configuration snapshot shared by all subsystems.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<GatewayConfig>,
    closed: AtomicBool,
}

impl ConfigStore {
    /// Read the configuration file into a new store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = load_config(&path)?;
        tracing::debug!(path = %path.display(), revision = config.revision, "Configuration read");
        Ok(Self::with_config(path, config))
    }

    /// Create a store around an in-memory configuration.
    pub fn with_config(path: impl Into<PathBuf>, config: GatewayConfig) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(config),
            closed: AtomicBool::new(false),
        }
    }

    /// File the store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the snapshot for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, GatewayConfig> {
        self.config.read()
    }

    /// Lock the snapshot for writing. The revision is bumped when the guard
    /// is released.
    pub fn write(&self) -> ConfigWriteGuard<'_> {
        ConfigWriteGuard {
            inner: self.config.write(),
        }
    }

    /// Clone the current snapshot.
    pub fn snapshot(&self) -> GatewayConfig {
        self.config.read().clone()
    }

    /// Write the current snapshot to disk.
    pub fn persist(&self) -> Result<(), ConfigError> {
        if self.is_closed() {
            return Err(ConfigError::Closed);
        }
        let config = self.config.read();
        save_config(&self.path, &config)?;
        tracing::debug!(path = %self.path.display(), revision = config.revision, "Configuration written");
        Ok(())
    }

    /// Refuse further persistence. Reads keep working.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Exclusive access to the snapshot.
pub struct ConfigWriteGuard<'a> {
    inner: RwLockWriteGuard<'a, GatewayConfig>,
}

impl Deref for ConfigWriteGuard<'_> {
    type Target = GatewayConfig;

    fn deref(&self) -> &GatewayConfig {
        &self.inner
    }
}

impl DerefMut for ConfigWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut GatewayConfig {
        &mut self.inner
    }
}

impl Drop for ConfigWriteGuard<'_> {
    fn drop(&mut self) {
        self.inner.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_guard_bumps_revision() {
        let store = ConfigStore::with_config("unused.toml", GatewayConfig::default());
        {
            let mut config = store.write();
            config.http.port = 9000;
        }
        let config = store.read();
        assert_eq!(config.revision, 1);
        assert_eq!(config.http.port, 9000);
    }

    #[test]
    fn closed_store_refuses_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("gateway.toml")).unwrap();
        store.persist().unwrap();
        store.close();
        assert!(matches!(store.persist(), Err(ConfigError::Closed)));
        assert_eq!(store.read().http.port, 2121);
    }
}

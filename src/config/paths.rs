//! Fixed file locations, relative to the gateway's working directory.

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "gateway.toml";
pub const WEB_UI_DIR: &str = "webui";
pub const CA_CERT_FILE: &str = "cacert.pem";
pub const CA_KEY_FILE: &str = "cacert.key";
pub const SERVER_CERT_FILE: &str = "svrcert.pem";
pub const SERVER_KEY_FILE: &str = "svrcert.key";

/// Resolves the gateway's files against a base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    base: PathBuf,
    config: PathBuf,
}

impl Paths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let config = base.join(CONFIG_FILE);
        Self { base, config }
    }

    /// Use a configuration file outside the base directory.
    pub fn with_config_file(mut self, config: impl Into<PathBuf>) -> Self {
        self.config = config.into();
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_file(&self) -> &Path {
        &self.config
    }

    pub fn web_ui_dir(&self) -> PathBuf {
        self.base.join(WEB_UI_DIR)
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.base.join(CA_CERT_FILE)
    }

    pub fn ca_key(&self) -> PathBuf {
        self.base.join(CA_KEY_FILE)
    }

    pub fn server_cert(&self) -> PathBuf {
        self.base.join(SERVER_CERT_FILE)
    }

    pub fn server_key(&self) -> PathBuf {
        self.base.join(SERVER_KEY_FILE)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new(".")
    }
}

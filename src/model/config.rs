//! Configuration exposed in the vendor domain.
//!
//! `GET ~vendor/config/~pv` returns the current configuration,
//! `PUT ~vendor/config/~pv` replaces it. A replacement is validated first
//! and written under the store's write guard, so the revision advances and
//! the shutdown persist picks it up. Listener addresses take effect on the
//! next start, users immediately.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::validation::validate_config;
use crate::config::{ConfigStore, GatewayConfig};
use crate::model::service::{ExternalValue, ModelService};
use crate::model::tree::{Node, Pv};
use crate::model::ModelError;

/// Path of the configuration node.
pub const CONFIG_PATH: &str = "~vendor/config";

pub struct ConfigValue {
    store: Arc<ConfigStore>,
}

impl ConfigValue {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// Mount the configuration node below the vendor domain.
    pub fn mount(service: &ModelService, store: Arc<ConfigStore>) -> Result<(), ModelError> {
        let node = Node::new("config", "Configuration", "config")
            .with_description("Configuration of the server");
        service.mount_external(CONFIG_PATH, node, Arc::new(Self::new(store)))
    }
}

#[async_trait]
impl ExternalValue for ConfigValue {
    fn read(&self) -> Result<Pv, ModelError> {
        let config = self.store.read();
        let v = serde_json::to_value(&*config).map_err(|e| ModelError::Backend(e.to_string()))?;
        Ok(Pv::now(v))
    }

    async fn write(&self, value: Value) -> Result<(), ModelError> {
        let mut update: GatewayConfig =
            serde_json::from_value(value).map_err(|e| ModelError::BadRequest(e.to_string()))?;
        if let Err(errors) = validate_config(&update) {
            let problems: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(ModelError::BadRequest(problems.join("; ")));
        }

        let mut config = self.store.write();
        // The guard owns the revision.
        update.revision = config.revision;
        *config = update;
        tracing::info!("Configuration replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::service::VendorInfo;
    use serde_json::json;

    fn service() -> (ModelService, Arc<ConfigStore>) {
        let service = ModelService::new(&VendorInfo::default());
        let store = Arc::new(ConfigStore::with_config("unused.toml", GatewayConfig::default()));
        ConfigValue::mount(&service, store.clone()).unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn replaces_configuration_under_write_guard() {
        let (service, store) = service();
        let mut pv = service.read_pv(CONFIG_PATH).unwrap();
        assert_eq!(pv.v["http"]["port"], json!(store.read().http.port));

        pv.v["http"]["port"] = json!(9123);
        service.write_pv(CONFIG_PATH, pv.v).await.unwrap();

        let config = store.read();
        assert_eq!(config.http.port, 9123);
        assert_eq!(config.revision, 1);
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let (service, store) = service();
        let mut v = service.read_pv(CONFIG_PATH).unwrap().v;
        v["host"]["name"] = json!("");

        let err = service.write_pv(CONFIG_PATH, v).await.unwrap_err();
        assert!(matches!(err, ModelError::BadRequest(ref m) if m.contains("host.name")), "{err}");
        assert_eq!(store.read().revision, 0);

        let err = service.write_pv(CONFIG_PATH, json!("nope")).await.unwrap_err();
        assert!(matches!(err, ModelError::BadRequest(_)));
    }
}

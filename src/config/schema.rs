//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for (de)serialization from the TOML file.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Incremented every time the configuration is modified through the store.
    pub revision: u64,

    /// Identity of this host as seen by clients and by the controller.
    pub host: HostConfig,

    /// REST listener settings.
    pub http: HttpConfig,

    /// Pub/sub broker listener settings.
    pub pubsub: PubSubConfig,

    /// Binary callback listener settings.
    pub binrpc: BinRpcConfig,

    /// Controller connection settings.
    pub controller: ControllerConfig,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Refresh intervals of the polling collections.
    pub refresh: RefreshConfig,

    /// Metrics settings.
    pub observability: ObservabilityConfig,

    /// Credentials accepted by the REST surface and the broker. Empty means
    /// open access.
    pub users: Vec<UserConfig>,
}

impl GatewayConfig {
    /// Whether `identifier` and `password` match a configured user.
    pub fn knows_user(&self, identifier: &str, password: &str) -> bool {
        self.users
            .iter()
            .any(|u| u.identifier == identifier && u.password == password)
    }
}

/// Host identity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Host name written into the generated server certificate.
    pub name: String,

    /// Address the controller uses to reach the callback servers.
    pub address: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            address: "127.0.0.1".to_string(),
        }
    }
}

/// REST listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Plain HTTP port. Also serves the text callback endpoint.
    pub port: u16,

    /// HTTPS port.
    pub port_tls: u16,

    /// Allowed CORS origins. Empty allows every origin without credentials.
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 2121,
            port_tls: 2122,
            cors_origins: Vec::new(),
        }
    }
}

/// Pub/sub broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PubSubConfig {
    /// Plain port. The web-socket bridge tunnels to this port.
    pub port: u16,

    /// TLS port.
    pub port_tls: u16,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            port: 1883,
            port_tls: 8883,
        }
    }
}

/// Binary callback listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BinRpcConfig {
    pub port: u16,
}

impl Default for BinRpcConfig {
    fn default() -> Self {
        Self { port: 2123 }
    }
}

/// Controller interface kinds the interconnector can subscribe to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterfaceKind {
    #[serde(rename = "BidCos-RF")]
    BidCosRf,
    #[serde(rename = "BidCos-Wired")]
    BidCosWired,
    #[serde(rename = "HmIP-RF")]
    HmIpRf,
    #[serde(rename = "VirtualDevices")]
    VirtualDevices,
    #[serde(rename = "CUxD")]
    Cuxd,
}

impl InterfaceKind {
    /// Name used in callback identifiers and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::BidCosRf => "BidCos-RF",
            InterfaceKind::BidCosWired => "BidCos-Wired",
            InterfaceKind::HmIpRf => "HmIP-RF",
            InterfaceKind::VirtualDevices => "VirtualDevices",
            InterfaceKind::Cuxd => "CUxD",
        }
    }

    /// Port of the interface's remote-call server on the controller.
    pub fn port(&self) -> u16 {
        match self {
            InterfaceKind::BidCosRf => 2001,
            InterfaceKind::BidCosWired => 2000,
            InterfaceKind::HmIpRf => 2010,
            InterfaceKind::VirtualDevices => 9292,
            InterfaceKind::Cuxd => 8701,
        }
    }

    /// URL path of the interface's remote-call server.
    pub fn path(&self) -> &'static str {
        match self {
            InterfaceKind::VirtualDevices => "/groups",
            _ => "/",
        }
    }

    /// Whether the interface calls back using the binary protocol.
    pub fn uses_binary_callback(&self) -> bool {
        matches!(self, InterfaceKind::Cuxd)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Address of the controller.
    pub address: String,

    /// Interfaces to register event subscriptions with.
    pub interfaces: Vec<InterfaceKind>,

    /// Prefix for callback registration identifiers.
    pub init_id: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            interfaces: vec![InterfaceKind::BidCosRf, InterfaceKind::HmIpRf],
            init_id: "home-gateway".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Comma separated list of the enabled interfaces.
    pub fn interfaces_display(&self) -> String {
        self.interfaces
            .iter()
            .map(InterfaceKind::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Append log output to this file instead of stderr, if not empty.
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: String::new(),
        }
    }
}

/// Refresh intervals in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub sysvar_secs: u64,
    pub program_secs: u64,
    pub explorer_secs: u64,
    pub device_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            sysvar_secs: 30,
            program_secs: 60,
            explorer_secs: 300,
            device_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A REST and pub/sub user.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UserConfig {
    pub identifier: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [http]
            port = 8080

            [controller]
            interfaces = ["HmIP-RF", "CUxD"]
            "#,
        )
        .unwrap();

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.port_tls, 2122);
        assert_eq!(config.pubsub.port, 1883);
        assert_eq!(
            config.controller.interfaces,
            vec![InterfaceKind::HmIpRf, InterfaceKind::Cuxd]
        );
        assert_eq!(config.controller.interfaces_display(), "HmIP-RF,CUxD");
    }

    #[test]
    fn only_cuxd_calls_back_in_binary() {
        assert!(InterfaceKind::Cuxd.uses_binary_callback());
        assert!(!InterfaceKind::BidCosRf.uses_binary_callback());
        assert_eq!(InterfaceKind::VirtualDevices.path(), "/groups");
    }
}

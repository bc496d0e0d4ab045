//! Listener addresses and callback URLs.
//!
//! Everything the transports bind or advertise is derived here, from one
//! configuration snapshot, so the caller decides how long the read lock is
//! held and never mixes fields of two revisions.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::config::GatewayConfig;
use crate::controller::callback::TEXT_CALLBACK_PATH;

/// Scheme of the text callback URL.
pub const CALLBACK_SCHEME: &str = "http";

/// Scheme of the binary callback URL.
pub const BINARY_CALLBACK_SCHEME: &str = "xmlrpc_bin";

/// Addresses of every listener plus the URLs registered with the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPlan {
    pub rest: SocketAddr,
    pub rest_tls: SocketAddr,
    pub pubsub: SocketAddr,
    pub pubsub_tls: SocketAddr,
    pub binrpc: SocketAddr,
    /// Where the web-socket bridge dials the plain pub/sub listener.
    pub pubsub_loopback: SocketAddr,
    /// Text callback target: the plain REST listener plus the callback path.
    pub callback_url: String,
    /// Binary callback target.
    pub binary_callback_url: String,
}

impl TransportPlan {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            rest: any_interface(config.http.port),
            rest_tls: any_interface(config.http.port_tls),
            pubsub: any_interface(config.pubsub.port),
            pubsub_tls: any_interface(config.pubsub.port_tls),
            binrpc: any_interface(config.binrpc.port),
            pubsub_loopback: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, config.pubsub.port)),
            callback_url: format!(
                "{}://{}:{}{}",
                CALLBACK_SCHEME, config.host.address, config.http.port, TEXT_CALLBACK_PATH
            ),
            binary_callback_url: format!(
                "{}://{}:{}",
                BINARY_CALLBACK_SCHEME, config.host.address, config.binrpc.port
            ),
        }
    }
}

fn any_interface(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}

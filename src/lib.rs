//! Home-automation controller gateway library.

pub mod broker;
pub mod collections;
pub mod config;
pub mod controller;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use lifecycle::{Gateway, GatewayError};

//! Registration calls towards the controller's interface processes.
//!
//! Only `init` is needed here: with a callback URL and identifier it
//! registers for events, with an empty identifier it withdraws the
//! registration.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::InterfaceKind;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("request to {interface} failed: {source}")]
    Http {
        interface: InterfaceKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{interface} answered with status {status}")]
    Status { interface: InterfaceKind, status: u16 },

    #[error("{interface} returned a fault: {message}")]
    Fault { interface: InterfaceKind, message: String },
}

/// Event registration with one controller interface.
#[async_trait]
pub trait ControllerLink: Send + Sync {
    async fn init(&self, interface: InterfaceKind, callback_url: &str, callback_id: &str) -> Result<(), LinkError>;

    async fn deinit(&self, interface: InterfaceKind, callback_url: &str) -> Result<(), LinkError>;
}

/// XML-RPC client for the interface processes.
#[derive(Debug, Clone)]
pub struct XmlRpcLink {
    controller_address: String,
    client: reqwest::Client,
}

impl XmlRpcLink {
    pub fn new(controller_address: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            controller_address: controller_address.to_string(),
            client,
        })
    }

    pub fn endpoint(&self, interface: InterfaceKind) -> String {
        format!(
            "http://{}:{}{}",
            self.controller_address,
            interface.port(),
            interface.path()
        )
    }

    async fn call_init(&self, interface: InterfaceKind, url: &str, id: &str) -> Result<(), LinkError> {
        let body = method_call("init", &[url, id]);
        let response = self
            .client
            .post(self.endpoint(interface))
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|source| LinkError::Http { interface, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::Status {
                interface,
                status: status.as_u16(),
            });
        }
        let text = response
            .text()
            .await
            .map_err(|source| LinkError::Http { interface, source })?;
        match fault_message(&text) {
            Some(message) => Err(LinkError::Fault { interface, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControllerLink for XmlRpcLink {
    async fn init(&self, interface: InterfaceKind, callback_url: &str, callback_id: &str) -> Result<(), LinkError> {
        self.call_init(interface, callback_url, callback_id).await
    }

    async fn deinit(&self, interface: InterfaceKind, callback_url: &str) -> Result<(), LinkError> {
        self.call_init(interface, callback_url, "").await
    }
}

fn method_call(method: &str, params: &[&str]) -> String {
    let mut xml = format!("<?xml version=\"1.0\"?><methodCall><methodName>{method}</methodName><params>");
    for param in params {
        xml.push_str("<param><value><string>");
        xml.push_str(&escape(param));
        xml.push_str("</string></value></param>");
    }
    xml.push_str("</params></methodCall>");
    xml
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// The fault string of a method response, if it is a fault.
fn fault_message(response: &str) -> Option<String> {
    if !response.contains("<fault>") {
        return None;
    }
    let message = response
        .split("<name>faultString</name>")
        .nth(1)
        .and_then(|rest| rest.split("</value>").next())
        .map(|value| {
            value
                .replace("<value>", "")
                .replace("<string>", "")
                .replace("</string>", "")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "unknown fault".to_string());
    Some(message)
}

//! Client for the controller's scripting endpoint.
//!
//! Scripts print one record per line with tab separated fields. The
//! endpoint appends an XML trailer with the script variables, which is cut
//! off before parsing.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Port of the scripting endpoint.
pub const SCRIPT_PORT: u16 = 8181;

const SCRIPT_PATH: &str = "/tclrega.exe";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRAILER: &str = "<xml>";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("script endpoint answered with status {0}")]
    Status(u16),

    #[error("unexpected script output in line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Runs a script on the controller and returns its standard output.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script: &str) -> Result<String, ScriptError>;
}

/// HTTP client for the scripting endpoint.
#[derive(Debug, Clone)]
pub struct ScriptClient {
    url: String,
    client: reqwest::Client,
}

impl ScriptClient {
    pub fn new(controller_address: &str) -> Result<Self, ScriptError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            url: format!("http://{controller_address}:{SCRIPT_PORT}{SCRIPT_PATH}"),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ScriptRunner for ScriptClient {
    async fn run(&self, script: &str) -> Result<String, ScriptError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(script.to_string())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScriptError::Status(status.as_u16()));
        }
        let mut output = response.text().await?;
        if let Some(end) = output.find(TRAILER) {
            output.truncate(end);
        }
        Ok(output)
    }
}

/// Split script output into records of at least `min_fields` fields.
pub fn parse_rows(output: &str, min_fields: usize) -> Result<Vec<Vec<&str>>, ScriptError> {
    output
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < min_fields {
                return Err(ScriptError::Parse {
                    line: index + 1,
                    reason: format!("expected {min_fields} fields, got {}", fields.len()),
                });
            }
            Ok(fields)
        })
        .collect()
}

/// Quote a value for use inside a script string literal.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

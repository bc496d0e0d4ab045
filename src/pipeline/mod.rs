//! Event forwarding pipeline.
//!
//! # Data Flow
//! ```text
//! Controller callback (one invocation at a time)
//!     → Pipeline::dispatch
//!     → stage 1: publish.rs (retained status topic on the broker)
//!     → stage 2: collections::device (cache + resource model)
//! ```
//!
//! # Design Decisions
//! - Stages run in a fixed order on the calling task; nothing is buffered,
//!   so per-channel order is the order of the callbacks
//! - A failing stage drops the event: the remaining stages are skipped,
//!   the next event starts from stage 1 again
//! - No retry and no backpressure towards the controller

pub mod publish;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::broker::PublishError;
use crate::model::ModelError;
use crate::observability::metrics;

pub use publish::BrokerPublisher;

/// Channel number used when an address names a device only.
pub const DEVICE_CHANNEL: &str = "0";

/// Failure of a single stage for a single event.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid event: {0}")]
    Invalid(String),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("encoding value failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cache update failed: {0}")]
    Cache(#[from] ModelError),
}

/// `<device>:<channel>` as sent by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    pub device: String,
    pub channel: String,
}

impl ChannelAddress {
    pub fn parse(address: &str) -> Option<Self> {
        let (device, channel) = match address.split_once(':') {
            Some((device, channel)) => (device, channel),
            None => (address, DEVICE_CHANNEL),
        };
        if device.is_empty() || channel.is_empty() {
            return None;
        }
        Some(Self {
            device: device.to_string(),
            channel: channel.to_string(),
        })
    }
}

/// A value change reported by a controller interface.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Registration identifier the controller called back with.
    pub interface_id: String,
    pub address: String,
    pub parameter: String,
    pub value: Value,
    /// Milliseconds since the Unix epoch.
    pub received_at: i64,
}

impl Event {
    pub fn new(
        interface_id: impl Into<String>,
        address: impl Into<String>,
        parameter: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            address: address.into(),
            parameter: parameter.into(),
            value,
            received_at: crate::model::now_millis(),
        }
    }

    pub fn channel_address(&self) -> Result<ChannelAddress, ForwardError> {
        ChannelAddress::parse(&self.address)
            .ok_or_else(|| ForwardError::Invalid(format!("bad address {:?}", self.address)))
    }
}

/// One pipeline stage: check the event, turn it into what the sink takes,
/// hand it over.
pub trait Stage: Send + Sync + 'static {
    type Item;

    fn name(&self) -> &'static str;

    fn validate(&self, _event: &Event) -> Result<(), ForwardError> {
        Ok(())
    }

    fn translate(&self, event: &Event) -> Result<Self::Item, ForwardError>;

    fn forward(&self, item: Self::Item) -> Result<(), ForwardError>;
}

/// Object safe view of a [`Stage`].
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &Event) -> Result<(), ForwardError>;
}

impl<S: Stage> EventHandler for S {
    fn name(&self) -> &'static str {
        Stage::name(self)
    }

    fn handle(&self, event: &Event) -> Result<(), ForwardError> {
        self.validate(event)?;
        let item = self.translate(event)?;
        self.forward(item)
    }
}

/// Which stage dropped an event, and why.
#[derive(Debug, Error)]
#[error("stage {stage} dropped event: {source}")]
pub struct Dropped {
    pub stage: &'static str,
    #[source]
    pub source: ForwardError,
}

/// The ordered handler chain.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn EventHandler>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage after all existing ones.
    pub fn with_stage(mut self, stage: Arc<dyn EventHandler>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run one event through every stage in order.
    pub fn dispatch(&self, event: &Event) -> Result<(), Dropped> {
        for stage in &self.stages {
            if let Err(source) = stage.handle(event) {
                let stage = stage.name();
                tracing::warn!(
                    stage,
                    interface = %event.interface_id,
                    address = %event.address,
                    parameter = %event.parameter,
                    error = %source,
                    "Event dropped"
                );
                metrics::record_event_dropped(stage);
                return Err(Dropped { stage, source });
            }
        }
        metrics::record_event_forwarded();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, String)>>>,
        fail_on: Option<&'static str>,
    }

    impl Stage for Recorder {
        type Item = String;

        fn name(&self) -> &'static str {
            self.name
        }

        fn validate(&self, event: &Event) -> Result<(), ForwardError> {
            if Some(event.parameter.as_str()) == self.fail_on {
                return Err(ForwardError::Invalid(event.parameter.clone()));
            }
            Ok(())
        }

        fn translate(&self, event: &Event) -> Result<String, ForwardError> {
            Ok(event.parameter.clone())
        }

        fn forward(&self, item: String) -> Result<(), ForwardError> {
            self.seen.lock().push((self.name, item));
            Ok(())
        }
    }

    fn pipeline(fail_first_on: Option<&'static str>) -> (Pipeline, Arc<Mutex<Vec<(&'static str, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with_stage(Arc::new(Recorder {
                name: "first",
                seen: seen.clone(),
                fail_on: fail_first_on,
            }))
            .with_stage(Arc::new(Recorder {
                name: "second",
                seen: seen.clone(),
                fail_on: None,
            }));
        (pipeline, seen)
    }

    #[test]
    fn address_parsing() {
        let address = ChannelAddress::parse("000A1B2C3D:4").unwrap();
        assert_eq!(address.device, "000A1B2C3D");
        assert_eq!(address.channel, "4");

        let device_only = ChannelAddress::parse("CENTRAL").unwrap();
        assert_eq!(device_only.channel, DEVICE_CHANNEL);

        assert!(ChannelAddress::parse(":1").is_none());
        assert!(ChannelAddress::parse("ABC:").is_none());
    }

    #[test]
    fn stages_run_in_order() {
        let (pipeline, seen) = pipeline(None);
        assert_eq!(pipeline.stage_names(), vec!["first", "second"]);

        pipeline
            .dispatch(&Event::new("id-BidCos-RF", "A:1", "STATE", json!(true)))
            .unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("first", "STATE".to_string()), ("second", "STATE".to_string())]
        );
    }

    #[test]
    fn failure_skips_later_stages_but_not_later_events() {
        let (pipeline, seen) = pipeline(Some("BAD"));
        let events = [
            Event::new("id", "A:1", "BAD", json!(1)),
            Event::new("id", "A:1", "GOOD", json!(2)),
        ];
        let dropped = pipeline.dispatch(&events[0]).unwrap_err();
        assert_eq!(dropped.stage, "first");

        pipeline.dispatch(&events[1]).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("first", "GOOD".to_string()), ("second", "GOOD".to_string())]
        );
    }
}

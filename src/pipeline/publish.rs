//! Stage 1: publish every event to the broker.

use std::sync::Arc;

use crate::broker::bus::{Bus, Message};
use crate::broker::topic;
use crate::model::Pv;
use crate::pipeline::{Event, ForwardError, Stage};

/// Publishes `device/status/<device>/<channel>/<parameter>` as a retained
/// message carrying the value as a JSON process value.
pub struct BrokerPublisher {
    bus: Arc<Bus>,
}

impl BrokerPublisher {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }
}

impl Stage for BrokerPublisher {
    type Item = Message;

    fn name(&self) -> &'static str {
        "publish"
    }

    fn validate(&self, event: &Event) -> Result<(), ForwardError> {
        let address = event.channel_address()?;
        for level in [&address.device, &address.channel, &event.parameter] {
            if !topic::is_valid_level(level) {
                return Err(ForwardError::Invalid(format!("{level:?} is not a topic level")));
            }
        }
        Ok(())
    }

    fn translate(&self, event: &Event) -> Result<Message, ForwardError> {
        let address = event.channel_address()?;
        let pv = Pv {
            ts: event.received_at,
            v: event.value.clone(),
            s: 0,
        };
        Ok(Message::retained(
            topic::device_status(&address.device, &address.channel, &event.parameter),
            serde_json::to_vec(&pv)?,
        ))
    }

    fn forward(&self, message: Message) -> Result<(), ForwardError> {
        self.bus.publish(message)?;
        Ok(())
    }
}

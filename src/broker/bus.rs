//! In-process message bus shared by all broker sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("broker is not running")]
    NotRunning,

    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            retain: true,
            ..Self::new(topic, payload)
        }
    }
}

/// Fan-out of published messages plus the retained message store.
#[derive(Debug)]
pub struct Bus {
    tx: broadcast::Sender<Arc<Message>>,
    retained: DashMap<String, Arc<Message>>,
    open: AtomicBool,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            retained: DashMap::new(),
            open: AtomicBool::new(false),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Publish to every current subscriber.
    ///
    /// A retained message replaces the stored one for its topic; a retained
    /// message with an empty payload clears it.
    pub fn publish(&self, message: Message) -> Result<(), PublishError> {
        if !self.is_open() {
            return Err(PublishError::NotRunning);
        }
        if message.topic.is_empty() || message.topic.contains(['+', '#']) {
            return Err(PublishError::InvalidTopic(message.topic));
        }
        let message = Arc::new(message);
        if message.retain {
            if message.payload.is_empty() {
                self.retained.remove(&message.topic);
            } else {
                self.retained.insert(message.topic.clone(), Arc::clone(&message));
            }
        }
        // No subscribers is not an error.
        let _ = self.tx.send(message);
        Ok(())
    }

    /// Subscribe to new messages. The retained messages at subscription time
    /// are returned alongside; a message published concurrently may show up
    /// in both.
    pub fn subscribe(&self) -> (Vec<Arc<Message>>, broadcast::Receiver<Arc<Message>>) {
        let rx = self.tx.subscribe();
        (self.retained_messages(), rx)
    }

    /// Snapshot of all retained messages.
    pub fn retained_messages(&self) -> Vec<Arc<Message>> {
        self.retained.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn retained(&self, topic: &str) -> Option<Arc<Message>> {
        self.retained.get(topic).map(|e| Arc::clone(e.value()))
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_bus_rejects_publish() {
        let bus = Bus::new();
        assert_eq!(
            bus.publish(Message::new("a/b", "1")),
            Err(PublishError::NotRunning)
        );
    }

    #[test]
    fn retained_messages_are_replaced_and_cleared() {
        let bus = Bus::new();
        bus.open();
        bus.publish(Message::retained("sysvar/status/1", "1")).unwrap();
        bus.publish(Message::retained("sysvar/status/1", "2")).unwrap();
        assert_eq!(bus.retained("sysvar/status/1").unwrap().payload, b"2");

        bus.publish(Message::retained("sysvar/status/1", "")).unwrap();
        assert!(bus.retained("sysvar/status/1").is_none());
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = Bus::new();
        bus.open();
        bus.publish(Message::retained("x/1", "old")).unwrap();
        let (retained, mut rx) = bus.subscribe();
        assert_eq!(retained.len(), 1);

        for i in 0..5 {
            bus.publish(Message::new("x/2", i.to_string())).unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload, i.to_string().into_bytes());
        }
        assert!(bus.publish(Message::new("x/#", "1")).is_err());
    }
}

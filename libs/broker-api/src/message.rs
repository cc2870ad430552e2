use std::fmt;

use serde::{Deserialize, Serialize};

/// Сообщение, готовое к отправке: topic + уже сериализованный payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    /// Partition key. `None`: брокер выбирает партицию сам.
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { topic: topic.into(), key: None, payload }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Where the broker stored a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for DeliveryPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

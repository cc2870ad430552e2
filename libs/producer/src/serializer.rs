use serde::Serialize;

use broker_api::BrokerError;

/// Payload → wire bytes.
pub trait PayloadSerializer: Send + Sync {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, BrokerError>;

    /// Bytes that encode "no value" (`None`, unit, JSON `null`).
    fn is_nil(&self, _payload: &[u8]) -> bool {
        false
    }
}

/// Compact JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl PayloadSerializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn is_nil(&self, payload: &[u8]) -> bool {
        payload.trim_ascii() == b"null"
    }
}

use broker_api::{BrokerError, ErrorKind};

use crate::publisher::SkipReason;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Rejected(SkipReason),

    #[error("serialize payload: {0}")]
    Serialization(#[source] BrokerError),

    #[error("broker connection: {0}")]
    Connect(#[source] BrokerError),

    /// Ошибка отправки. `source`: исходная ошибка брокера без обёртки:
    /// соединение уже сброшено, повтор вызова остаётся решением вызывающего.
    #[error("delivery to '{topic}' failed: {source}")]
    Delivery { topic: String, source: BrokerError },
}

impl PublishError {
    /// Underlying broker error, if the failure came from the broker side.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            PublishError::Rejected(_) => None,
            PublishError::Serialization(e) | PublishError::Connect(e) => Some(e),
            PublishError::Delivery { source, .. } => Some(source),
        }
    }

    pub fn into_broker_error(self) -> Option<BrokerError> {
        match self {
            PublishError::Rejected(_) => None,
            PublishError::Serialization(e) | PublishError::Connect(e) => Some(e),
            PublishError::Delivery { source, .. } => Some(source),
        }
    }

    /// Worth retrying the whole publish call: delivery failures, and
    /// connection failures caused by I/O rather than bad configuration.
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::Delivery { .. } => true,
            PublishError::Connect(e) => e.kind() == ErrorKind::Io,
            PublishError::Rejected(_) | PublishError::Serialization(_) => false,
        }
    }
}

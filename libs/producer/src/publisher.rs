use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use broker_api::{Connector, DeliveryPosition, OutgoingMessage};

use crate::config::{ConfigSource, MissingTargetPolicy, PublisherSettings};
use crate::error::PublishError;
use crate::lifecycle::ConnectionManager;
use crate::serializer::{JsonSerializer, PayloadSerializer};

// ═══════════════════════════════════════════════════════════════
//  Request / Outcome types
// ═══════════════════════════════════════════════════════════════

/// Descriptive `name=value` fields attached to a publish, used only in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    fields: Vec<(String, String)>,
}

impl Correlation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.push((name.into(), value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Pre-serialized publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub correlation: Correlation,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            correlation: Correlation::default(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTopic,
    MissingTarget,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyTopic => f.write_str("empty topic name"),
            SkipReason::MissingTarget => f.write_str("nothing to publish"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered(DeliveryPosition),
    Skipped(SkipReason),
    /// Отменено через token во время отправки, не ошибка.
    Cancelled,
}

impl PublishOutcome {
    pub fn position(&self) -> Option<&DeliveryPosition> {
        match self {
            PublishOutcome::Delivered(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered(_))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Publisher
// ═══════════════════════════════════════════════════════════════

/// Публикация в topic с восстановлением соединения.
///
/// Ошибка отправки: сброс соединения → пауза `retry_backoff` → ошибка
/// вызывающему. Внутренних повторов нет: следующий вызов поднимет
/// новое соединение.
///
/// Владелец обязан вызвать `shutdown()` перед завершением.
pub struct Publisher<S = JsonSerializer> {
    manager: ConnectionManager,
    serializer: S,
    settings: PublisherSettings,
}

impl Publisher<JsonSerializer> {
    pub fn new(connector: Arc<dyn Connector>, config: Arc<dyn ConfigSource>) -> Self {
        Self::with_serializer(connector, config, JsonSerializer)
    }
}

impl<S: PayloadSerializer> Publisher<S> {
    pub fn with_serializer(
        connector: Arc<dyn Connector>,
        config: Arc<dyn ConfigSource>,
        serializer: S,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(connector, config),
            serializer,
            settings: PublisherSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PublisherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Serialize `target` and publish it to `topic`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        target: Option<&T>,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PublishError> {
        self.publish_with(target, topic, None, Correlation::default(), cancel)
            .await
    }

    /// `publish` with partition key and correlation fields.
    pub async fn publish_with<T: Serialize + ?Sized>(
        &self,
        target: Option<&T>,
        topic: &str,
        key: Option<String>,
        correlation: Correlation,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PublishError> {
        let payload = match target {
            Some(target) if !topic.is_empty() => Some(
                self.serializer
                    .serialize(target)
                    .map_err(PublishError::Serialization)?,
            ),
            _ => None,
        };
        let payload = match self.screen(topic, payload) {
            ControlFlow::Continue(payload) => payload,
            ControlFlow::Break(done) => return done,
        };

        let request = PublishRequest {
            topic: topic.to_string(),
            key,
            payload,
            correlation,
        };
        self.submit(request, cancel).await
    }

    /// Publish an already serialized payload.
    pub async fn publish_request(
        &self,
        request: PublishRequest,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PublishError> {
        let PublishRequest { topic, key, payload, correlation } = request;
        let payload = match self.screen(&topic, Some(payload)) {
            ControlFlow::Continue(payload) => payload,
            ControlFlow::Break(done) => return done,
        };
        self.submit(PublishRequest { topic, key, payload, correlation }, cancel)
            .await
    }

    /// Закрыть соединение. Idempotent, безопасно при in-flight publish.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    /// Единая точка решения: пустой topic, нет payload или payload
    /// сериализован в nil → skip или reject, по `missing_target`.
    fn screen(
        &self,
        topic: &str,
        payload: Option<Vec<u8>>,
    ) -> ControlFlow<Result<PublishOutcome, PublishError>, Vec<u8>> {
        let reason = match payload {
            _ if topic.is_empty() => SkipReason::EmptyTopic,
            Some(payload) if !self.serializer.is_nil(&payload) => {
                return ControlFlow::Continue(payload);
            }
            _ => SkipReason::MissingTarget,
        };

        ControlFlow::Break(match self.settings.missing_target {
            MissingTargetPolicy::Skip => {
                tracing::trace!(%topic, %reason, "publish skipped");
                Ok(PublishOutcome::Skipped(reason))
            }
            MissingTargetPolicy::Reject => Err(PublishError::Rejected(reason)),
        })
    }

    async fn submit(
        &self,
        request: PublishRequest,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PublishError> {
        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PublishOutcome::Cancelled),
            lease = self.manager.ensure() => lease.map_err(PublishError::Connect)?,
        };

        let PublishRequest { topic, key, payload, correlation } = request;
        let message = OutgoingMessage { topic: topic.clone(), key, payload };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PublishOutcome::Cancelled),
            result = lease.connection().send(message) => result,
        };

        match result {
            Ok(position) => {
                tracing::debug!(
                    topic = %position.topic,
                    partition = position.partition,
                    offset = position.offset,
                    correlation = %correlation,
                    "message delivered"
                );
                Ok(PublishOutcome::Delivered(position))
            }
            Err(e) => {
                tracing::warn!(
                    %topic,
                    generation = lease.generation(),
                    error = ?e,
                    "publish failed, dropping connection"
                );
                self.manager.discard(&lease).await;
                self.backoff(cancel).await;
                Err(PublishError::Delivery { topic, source: e })
            }
        }
    }

    /// Пауза перед возвратом ошибки; прерывается token'ом.
    async fn backoff(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.retry_backoff()) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

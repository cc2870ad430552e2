use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::log::LogCallback;
use crate::message::{DeliveryPosition, OutgoingMessage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Фабрика соединений с брокером.
///
/// Producer не знает конкретных реализаций: для него бэкенд это
/// только этот trait. Wire-протокол целиком на стороне реализации.
pub trait Connector: Send + Sync {
    /// Открыть новое соединение. Соединение пишет свою диагностику
    /// через `log`. Ошибка: соединение не создано.
    fn connect(
        &self,
        config: BrokerConfig,
        log: LogCallback,
    ) -> BoxFuture<'_, Result<Arc<dyn Connection>, BrokerError>>;
}

/// Открытое соединение с брокером.
pub trait Connection: Send + Sync {
    /// Отправить сообщение и дождаться подтверждения брокера.
    ///
    /// Future может быть дропнут посреди отправки (отмена), реализация
    /// обязана оставаться пригодной для следующих вызовов.
    fn send(&self, message: OutgoingMessage) -> BoxFuture<'_, Result<DeliveryPosition, BrokerError>>;

    /// Закрыть соединение. После close все `send` завершаются ошибкой.
    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

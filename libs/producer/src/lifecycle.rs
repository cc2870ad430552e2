use std::sync::Arc;

use tokio::sync::Mutex;

use broker_api::{BrokerError, Connection, Connector};

use crate::config::ConfigSource;
use crate::log_bridge;

// ═══════════════════════════════════════════════════════════════
//  Lease
// ═══════════════════════════════════════════════════════════════

/// Соединение, выданное на один вызов publish, с номером поколения.
///
/// Поколение позволяет сбросить ровно то соединение, на котором
/// произошла ошибка, не задев уже пересозданное.
#[derive(Clone)]
pub struct Lease {
    connection: Arc<dyn Connection>,
    generation: u64,
}

impl Lease {
    pub fn connection(&self) -> &dyn Connection {
        &*self.connection
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("generation", &self.generation).finish()
    }
}

#[derive(Default)]
struct Slot {
    current: Option<Lease>,
    generation: u64,
}

// ═══════════════════════════════════════════════════════════════
//  ConnectionManager
// ═══════════════════════════════════════════════════════════════

/// Владелец единственного соединения с брокером.
///
/// Absent --ensure ok--> Present --reset--> Absent. Переход под
/// mutex'ом: конкурентные `ensure` создают ровно одно соединение.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: Arc<dyn ConfigSource>,
    slot: Mutex<Slot>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            connector,
            config,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Текущее соединение, либо новое: load config → connect → store.
    /// При ошибке ничего не сохраняется.
    pub async fn ensure(&self) -> Result<Lease, BrokerError> {
        let mut slot = self.slot.lock().await;
        if let Some(lease) = &slot.current {
            return Ok(lease.clone());
        }

        let config = self.config.load()?;
        config.validate()?;
        let servers = config.bootstrap_servers.clone();

        let connection = self
            .connector
            .connect(config, log_bridge::callback())
            .await
            .map_err(|e| e.with_context(format!("connect to '{servers}'")))?;

        slot.generation += 1;
        let lease = Lease { connection, generation: slot.generation };
        slot.current = Some(lease.clone());
        tracing::info!(%servers, generation = lease.generation, "broker connection established");
        Ok(lease)
    }

    /// Закрыть и забыть текущее соединение. Ошибки close только логируются.
    ///
    /// Slot освобождается до `close()`: медленный close не блокирует
    /// `ensure` остальных вызовов.
    pub async fn reset(&self) {
        let taken = self.slot.lock().await.current.take();
        close_lease(taken).await;
    }

    /// `reset`, но только если текущее соединение то же, что в `lease`.
    pub async fn discard(&self, lease: &Lease) {
        let taken = {
            let mut slot = self.slot.lock().await;
            let same = slot
                .current
                .as_ref()
                .is_some_and(|current| current.generation == lease.generation);
            if same {
                slot.current.take()
            } else {
                tracing::debug!(generation = lease.generation, "stale connection already replaced");
                None
            }
        };
        close_lease(taken).await;
    }

    /// Orderly termination. Idempotent.
    pub async fn shutdown(&self) {
        self.reset().await;
        tracing::debug!("connection manager shut down");
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.current.is_some()
    }

    /// Number of connections created so far.
    pub async fn generation(&self) -> u64 {
        self.slot.lock().await.generation
    }
}

async fn close_lease(lease: Option<Lease>) {
    let Some(lease) = lease else {
        return;
    };
    match lease.connection.close().await {
        Ok(()) => tracing::debug!(generation = lease.generation, "broker connection closed"),
        Err(e) => tracing::warn!(
            generation = lease.generation,
            error = ?e,
            "error while closing broker connection"
        ),
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let Some(lease) = self.slot.get_mut().current.take() else {
            return;
        };
        tracing::debug!(generation = lease.generation, "connection manager dropped without shutdown");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = lease.connection.close().await {
                    tracing::warn!(error = ?e, "error while closing broker connection");
                }
            });
        }
    }
}

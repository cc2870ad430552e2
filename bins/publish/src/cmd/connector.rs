use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use broker_api::{BoxFuture, BrokerConfig, BrokerError, Connection, Connector, LogCallback};
use broker_memory::{MemoryBroker, MemoryConnector};
use broker_tcp::TcpConnector;

const MEMORY_SCHEME: &str = "memory://";

/// Выбор бэкенда по `bootstrap_servers`: `memory://name` → in-process
/// брокер (создаётся при первом подключении), иначе TCP.
#[derive(Default)]
pub struct AutoConnector {
    tcp: TcpConnector,
    memory: Mutex<HashMap<String, Arc<MemoryConnector>>>,
}

impl AutoConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-built memory broker under its own name.
    #[cfg(test)]
    pub fn with_memory(self, broker: Arc<MemoryBroker>) -> Self {
        self.memory_map()
            .insert(broker.name().to_string(), Arc::new(MemoryConnector::new(broker)));
        self
    }

    #[cfg(test)]
    pub fn memory_broker(&self, name: &str) -> Option<Arc<MemoryBroker>> {
        self.memory_map().get(name).map(|c| c.broker().clone())
    }

    /// Log what in-process brokers hold; their contents die with the process.
    pub async fn report(&self) {
        let brokers: Vec<Arc<MemoryBroker>> =
            self.memory_map().values().map(|c| c.broker().clone()).collect();
        for broker in brokers {
            for topic in broker.topics().await {
                let records = broker.records(&topic).await.len();
                tracing::info!(broker = %broker.name(), %topic, records, "memory broker contents");
            }
        }
    }

    fn memory_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<MemoryConnector>>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_connector(&self, name: &str) -> Arc<MemoryConnector> {
        self.memory_map()
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(broker = %name, "starting in-process memory broker");
                Arc::new(MemoryConnector::new(Arc::new(MemoryBroker::new(name))))
            })
            .clone()
    }
}

fn memory_name(config: &BrokerConfig) -> Option<String> {
    config
        .servers()
        .find_map(|s| s.strip_prefix(MEMORY_SCHEME))
        .map(str::to_string)
}

impl Connector for AutoConnector {
    fn connect(
        &self,
        config: BrokerConfig,
        log: LogCallback,
    ) -> BoxFuture<'_, Result<Arc<dyn Connection>, BrokerError>> {
        match memory_name(&config) {
            Some(name) => {
                let connector = self.memory_connector(&name);
                Box::pin(async move { connector.connect(config, log).await })
            }
            None => self.tcp.connect(config, log),
        }
    }
}

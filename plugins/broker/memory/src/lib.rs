use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use broker_api::{
    BoxFuture, BrokerConfig, BrokerError, BrokerLogEntry, Connection, Connector, DeliveryPosition,
    LogCallback, OutgoingMessage, SyslogLevel,
};

const SCHEME: &str = "memory://";

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition: i32,
    pub offset: i64,
    pub ts_ms: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    next_rr: usize,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            next_rr: 0,
        }
    }

    fn pick_partition(&mut self, key: Option<&str>) -> usize {
        let n = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % n as u64) as usize
            }
            None => {
                let p = self.next_rr % n;
                self.next_rr = self.next_rr.wrapping_add(1);
                p
            }
        }
    }
}

/// In-process брокер: topic → партиции → append-only лог.
///
/// Offset'ы в каждой партиции начинаются с 0 и растут на 1.
/// Число партиций задаётся первым писателем в topic.
pub struct MemoryBroker {
    name: String,
    topics: RwLock<HashMap<String, TopicLog>>,
    available: AtomicBool,
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate an outage: unavailable broker refuses connects and sends.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn append(
        &self,
        topic: &str,
        key: Option<String>,
        payload: Vec<u8>,
        partitions: usize,
    ) -> Result<DeliveryPosition, BrokerError> {
        if !self.is_available() {
            return Err(BrokerError::io(format!("memory broker '{}' unavailable", self.name)));
        }
        let mut topics = self.topics.write().await;
        let log = topics.entry(topic.to_string()).or_insert_with(|| {
            tracing::debug!(broker = %self.name, %topic, partitions, "topic created");
            TopicLog::new(partitions.max(1))
        });

        let partition = log.pick_partition(key.as_deref());
        let records = &mut log.partitions[partition];
        let offset = records.len() as i64;
        records.push(StoredRecord {
            partition: partition as i32,
            offset,
            ts_ms: now_ms(),
            key,
            payload,
        });

        Ok(DeliveryPosition {
            topic: topic.to_string(),
            partition: partition as i32,
            offset,
        })
    }

    /// All records of a topic, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<StoredRecord> {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|log| log.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConnector
// ═══════════════════════════════════════════════════════════════

/// Connector for `bootstrap_servers = "memory://<broker name>"`.
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker, connects: AtomicUsize::new(0) }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        config: BrokerConfig,
        log: LogCallback,
    ) -> BoxFuture<'_, Result<Arc<dyn Connection>, BrokerError>> {
        Box::pin(async move {
            let name = config
                .servers()
                .find_map(|s| s.strip_prefix(SCHEME))
                .ok_or_else(|| {
                    BrokerError::config(format!(
                        "'{}' is not a {SCHEME} address",
                        config.bootstrap_servers
                    ))
                })?;
            if name != self.broker.name() {
                return Err(BrokerError::config(format!("unknown memory broker '{name}'")));
            }

            let partitions = config.property::<usize>("partitions")?.unwrap_or(1);
            if partitions == 0 {
                return Err(BrokerError::config("partitions must be > 0"));
            }

            let client = config.client_id.clone().unwrap_or_else(|| "memory".into());
            if !self.broker.is_available() {
                log(&BrokerLogEntry::new(
                    SyslogLevel::Error,
                    "CONNECT",
                    client.as_str(),
                    format!("broker '{name}' unavailable"),
                ));
                return Err(BrokerError::io(format!("memory broker '{name}' unavailable")));
            }

            self.connects.fetch_add(1, Ordering::SeqCst);
            log(&BrokerLogEntry::new(
                SyslogLevel::Debug,
                "CONNECT",
                client.as_str(),
                format!("connected to memory broker '{name}'"),
            ));

            Ok(Arc::new(MemoryConnection {
                broker: self.broker.clone(),
                partitions,
                client,
                log,
                closed: AtomicBool::new(false),
            }) as Arc<dyn Connection>)
        })
    }
}

pub struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    partitions: usize,
    client: String,
    log: LogCallback,
    closed: AtomicBool,
}

impl Connection for MemoryConnection {
    fn send(&self, message: OutgoingMessage) -> BoxFuture<'_, Result<DeliveryPosition, BrokerError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::io("connection closed"));
            }
            let OutgoingMessage { topic, key, payload } = message;
            self.broker.append(&topic, key, payload, self.partitions).await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                (self.log)(&BrokerLogEntry::new(
                    SyslogLevel::Debug,
                    "CLOSE",
                    self.client.as_str(),
                    "connection closed",
                ));
            }
            Ok(())
        })
    }
}

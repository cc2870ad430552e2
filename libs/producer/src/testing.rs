//! Test doubles: scripted connector and a log capture writer.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use broker_api::{
    BoxFuture, BrokerConfig, BrokerError, BrokerLogEntry, Connection, Connector, DeliveryPosition,
    LogCallback, OutgoingMessage, SyslogLevel,
};

// ═══════════════════════════════════════════════════════════════
//  ScriptedConnector
// ═══════════════════════════════════════════════════════════════

/// Behaviour of the next connection. Script exhausted → `Healthy`.
#[derive(Clone)]
pub enum Behavior {
    Healthy,
    FailSends(BrokerError),
    /// `send` never completes.
    Hang,
    RefuseConnect(BrokerError),
    FailClose(BrokerError),
    /// `close` never completes.
    HangClose,
    /// `send` waits until the connection is closed, then fails with the error.
    FailOnClose(BrokerError),
}

pub struct ScriptedConnector {
    script: Mutex<VecDeque<Behavior>>,
    attempts: AtomicUsize,
    connections: Mutex<Vec<Arc<ScriptedConnection>>>,
    connect_delay: Mutex<Option<Duration>>,
}

impl ScriptedConnector {
    pub fn new(script: impl IntoIterator<Item = Behavior>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
            connect_delay: Mutex::new(None),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::new([])
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Connect attempts, successful or not.
    pub fn connects(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// n-th successfully created connection.
    pub fn connection(&self, n: usize) -> Arc<ScriptedConnection> {
        self.connections.lock().unwrap()[n].clone()
    }

    pub fn total_sends(&self) -> usize {
        self.connections.lock().unwrap().iter().map(|c| c.sends()).sum()
    }
}

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        config: BrokerConfig,
        log: LogCallback,
    ) -> BoxFuture<'_, Result<Arc<dyn Connection>, BrokerError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.connect_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let behavior = self.script.lock().unwrap().pop_front().unwrap_or(Behavior::Healthy);
            if let Behavior::RefuseConnect(e) = &behavior {
                return Err(e.clone());
            }

            log(&BrokerLogEntry::new(
                SyslogLevel::Debug,
                "CONNECT",
                "scripted",
                format!("connected to {}", config.bootstrap_servers),
            ));

            let conn = Arc::new(ScriptedConnection {
                behavior,
                sends: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                closing: CancellationToken::new(),
                next_offset: AtomicI64::new(0),
            });
            self.connections.lock().unwrap().push(conn.clone());
            Ok(conn as Arc<dyn Connection>)
        })
    }
}

pub struct ScriptedConnection {
    behavior: Behavior,
    sends: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    closing: CancellationToken,
    next_offset: AtomicI64,
}

impl ScriptedConnection {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for ScriptedConnection {
    fn send(&self, message: OutgoingMessage) -> BoxFuture<'_, Result<DeliveryPosition, BrokerError>> {
        Box::pin(async move {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.is_closed() {
                return Err(BrokerError::io("connection closed"));
            }
            match &self.behavior {
                Behavior::FailSends(e) => Err(e.clone()),
                Behavior::Hang => std::future::pending().await,
                Behavior::FailOnClose(e) => {
                    self.closing.cancelled().await;
                    Err(e.clone())
                }
                _ => Ok(DeliveryPosition {
                    topic: message.topic,
                    partition: 0,
                    offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
                }),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            self.closing.cancel();
            match &self.behavior {
                Behavior::FailClose(e) => Err(e.clone()),
                Behavior::HangClose => std::future::pending().await,
                _ => Ok(()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  LogCapture
// ═══════════════════════════════════════════════════════════════

/// Collects formatted `tracing` output of the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|l| l.trim_start().to_string())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap().clear();
    }
}

impl Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

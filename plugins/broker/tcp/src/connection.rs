use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use broker_api::{
    BoxFuture, BrokerError, BrokerLogEntry, Connection, DeliveryPosition, LogCallback,
    OutgoingMessage, SyslogLevel,
};

use crate::wire::{self, Inbound};

const OUTBOX_CAPACITY: usize = 256;
/// How long `close` waits for the I/O tasks before aborting them.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type Reply = oneshot::Sender<Result<DeliveryPosition, BrokerError>>;

struct Pending {
    topic: String,
    reply: Reply,
}

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;

/// Removes the request from the pending map when `send` finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&self.id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpConnection
// ═══════════════════════════════════════════════════════════════

/// Одно TCP соединение с брокером: writer task + reader task.
///
/// Запросы пишутся через mpsc в writer, ответы сопоставляются
/// по `id`. Отменённый `send` просто забывает свой id, поздний
/// ответ на него отбрасывается reader'ом.
pub struct TcpConnection {
    peer: String,
    outbox: mpsc::Sender<Vec<u8>>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TcpConnection {
    pub(crate) fn start(
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        peer: String,
        client: String,
        timeout: Duration,
        log: LogCallback,
    ) -> Self {
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let pending: PendingMap = Arc::default();
        let shutdown = CancellationToken::new();

        let writer_task = tokio::spawn(write_loop(
            writer,
            rx,
            pending.clone(),
            shutdown.clone(),
            peer.clone(),
        ));
        let reader_task = tokio::spawn(read_loop(
            reader.lines(),
            pending.clone(),
            shutdown.clone(),
            peer.clone(),
            client,
            log,
        ));

        Self {
            peer,
            outbox,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            shutdown,
            tasks: tokio::sync::Mutex::new(vec![writer_task, reader_task]),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn closed_error(&self) -> BrokerError {
        BrokerError::io(format!("connection to {} closed", self.peer))
    }
}

impl Connection for TcpConnection {
    fn send(&self, message: OutgoingMessage) -> BoxFuture<'_, Result<DeliveryPosition, BrokerError>> {
        Box::pin(async move {
            if self.shutdown.is_cancelled() {
                return Err(self.closed_error());
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let line = wire::encode_request(id, &message)?;
            let (reply_tx, reply_rx) = oneshot::channel();
            self.pending
                .lock()
                .map_err(|_| BrokerError::new("pending map poisoned"))?
                .insert(id, Pending { topic: message.topic, reply: reply_tx });
            let _guard = PendingGuard { pending: &self.pending, id };

            let exchange = async {
                self.outbox.send(line).await.map_err(|_| self.closed_error())?;
                reply_rx.await.map_err(|_| self.closed_error())?
            };

            match tokio::time::timeout(self.timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::io(format!(
                    "no acknowledgement from {} within {} ms",
                    self.peer,
                    self.timeout.as_millis()
                ))),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.shutdown.cancel();
            let tasks = std::mem::take(&mut *self.tasks.lock().await);
            let mut result = Ok(());
            for mut task in tasks {
                match tokio::time::timeout(CLOSE_GRACE, &mut task).await {
                    Ok(Err(e)) if e.is_panic() => {
                        result = Err(BrokerError::new(format!("connection task panicked: {e}")));
                    }
                    Ok(_) => {}
                    Err(_) => {
                        task.abort();
                        tracing::warn!(peer = %self.peer, "connection task did not stop, aborted");
                    }
                }
            }
            result
        })
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════
//  I/O tasks
// ═══════════════════════════════════════════════════════════════

fn fail_all(pending: &PendingMap, reason: &str) {
    let drained: Vec<Pending> = match pending.lock() {
        Ok(mut map) => map.drain().map(|(_, p)| p).collect(),
        Err(_) => return,
    };
    for p in drained {
        let _ = p.reply.send(Err(BrokerError::io(reason.to_string())));
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    pending: PendingMap,
    shutdown: CancellationToken,
    peer: String,
) {
    loop {
        let line = tokio::select! {
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        // a peer that stops reading blocks write_all; shutdown must still win
        let written = tokio::select! {
            written = writer.write_all(&line) => written,
            _ = shutdown.cancelled() => return,
        };
        if let Err(e) = written {
            tracing::debug!(%peer, error = %e, "write error");
            shutdown.cancel();
            fail_all(&pending, &format!("write to {peer}: {e}"));
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    pending: PendingMap,
    shutdown: CancellationToken,
    peer: String,
    client: String,
    log: LogCallback,
) {
    let reason = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch(&line, &pending, &client, &log),
                Ok(None) => break Some(format!("connection closed by {peer}")),
                Err(e) => break Some(format!("read from {peer}: {e}")),
            },
            _ = shutdown.cancelled() => break None,
        }
    };

    shutdown.cancel();
    match reason {
        Some(reason) => {
            log(&BrokerLogEntry::new(SyslogLevel::Warning, "RECV", client.as_str(), reason.as_str()));
            fail_all(&pending, &reason);
        }
        None => fail_all(&pending, &format!("connection to {peer} closed")),
    }
}

fn dispatch(line: &str, pending: &PendingMap, client: &str, log: &LogCallback) {
    if line.trim().is_empty() {
        return;
    }
    match wire::decode_inbound(line) {
        Ok(Inbound::Log { log: entry }) => {
            let level = SyslogLevel::from_code(entry.level).unwrap_or(SyslogLevel::Info);
            log(&BrokerLogEntry::new(level, entry.facility, client, entry.message));
        }
        Ok(Inbound::Response(response)) => {
            let waiting = pending.lock().ok().and_then(|mut map| map.remove(&response.id));
            match waiting {
                Some(p) => {
                    let _ = p.reply.send(response.into_result(p.topic));
                }
                None => tracing::debug!(id = response.id, "response for abandoned request"),
            }
        }
        Err(e) => log(&BrokerLogEntry::new(
            SyslogLevel::Error,
            "PROTO",
            client,
            format!("unparsable line from broker: {e}"),
        )),
    }
}

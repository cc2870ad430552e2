mod connection;
pub mod wire;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use broker_api::{
    BoxFuture, BrokerConfig, BrokerError, BrokerLogEntry, Connection, Connector, LogCallback,
    SyslogLevel,
};

pub use connection::TcpConnection;

const SCHEME: &str = "tcp://";

/// Connector for `bootstrap_servers = "host:port[,host:port...]"`
/// (optionally `tcp://` prefixed). First reachable address wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        config: BrokerConfig,
        log: LogCallback,
    ) -> BoxFuture<'_, Result<Arc<dyn Connection>, BrokerError>> {
        Box::pin(async move {
            let client = config.client_id.clone().unwrap_or_else(|| "producer".into());
            let mut last_err = None;

            for server in config.servers() {
                let addr = server.strip_prefix(SCHEME).unwrap_or(server);
                let stream = match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        log(&BrokerLogEntry::new(
                            SyslogLevel::Warning,
                            "CONNECT",
                            client.as_str(),
                            format!("{addr}: {e}"),
                        ));
                        last_err = Some(BrokerError::io(format!("TCP connect to {addr}: {e}")));
                        continue;
                    }
                    Err(_) => {
                        log(&BrokerLogEntry::new(
                            SyslogLevel::Warning,
                            "CONNECT",
                            client.as_str(),
                            format!("{addr}: timed out"),
                        ));
                        last_err = Some(BrokerError::io(format!(
                            "TCP connect to {addr}: timed out after {} ms",
                            config.connect_timeout_ms
                        )));
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);

                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                if let Some(sasl) = &config.sasl {
                    handshake(&mut reader, &mut write_half, &config, sasl).await?;
                }

                log(&BrokerLogEntry::new(
                    SyslogLevel::Debug,
                    "CONNECT",
                    client.as_str(),
                    format!("connected to {addr}"),
                ));
                tracing::info!(%addr, client = %client, "tcp broker connected");

                let conn = TcpConnection::start(
                    reader,
                    write_half,
                    addr.to_string(),
                    client,
                    config.message_timeout(),
                    log,
                );
                return Ok(Arc::new(conn) as Arc<dyn Connection>);
            }

            Err(last_err.unwrap_or_else(|| BrokerError::config("bootstrap_servers is empty")))
        })
    }
}

async fn handshake(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    config: &BrokerConfig,
    sasl: &broker_api::SaslConfig,
) -> Result<(), BrokerError> {
    let line = wire::encode_auth(sasl, config.client_id.as_deref())?;

    let exchange = async {
        writer.write_all(&line).await?;
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(BrokerError::io("connection closed during authentication"));
        }
        Ok::<_, BrokerError>(reply)
    };
    let reply = tokio::time::timeout(config.connect_timeout(), exchange)
        .await
        .map_err(|_| BrokerError::io("authentication timed out"))??;

    let reply: wire::AuthReply = serde_json::from_str(reply.trim_end())?;
    if reply.ok {
        Ok(())
    } else {
        Err(BrokerError::config(format!(
            "authentication as '{}' failed: {}",
            sasl.username,
            reply.error.unwrap_or_else(|| "rejected".into())
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use broker_api::{ErrorKind, OutgoingMessage, SaslConfig};

    use super::*;

    /// Minimal broker: per-topic offsets, special topics drive failure modes.
    ///   "bad"    → error response
    ///   "slow"   → no response
    ///   "hangup" → close the socket
    ///   "warn"   → log line before the response
    async fn fake_broker() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                tokio::spawn(serve(stream));
            }
        });
        addr
    }

    async fn serve(stream: TcpStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut offsets: HashMap<String, i64> = HashMap::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let req: serde_json::Value = serde_json::from_str(&line).unwrap();
            let reply = if let Some(auth) = req.get("auth") {
                if auth["password"] == "secret" {
                    serde_json::json!({"ok": true})
                } else {
                    serde_json::json!({"ok": false, "error": "bad credentials"})
                }
            } else {
                let id = req["id"].as_u64().unwrap();
                match req["topic"].as_str().unwrap() {
                    "bad" => serde_json::json!({"id": id, "error": "unknown topic"}),
                    "slow" => continue,
                    "hangup" => return,
                    topic => {
                        if topic == "warn" {
                            let log = serde_json::json!({"log": {"level": 4, "facility": "QUOTA", "message": "near limit"}});
                            write_half.write_all(format!("{log}\n").as_bytes()).await.unwrap();
                        }
                        let offset = offsets.entry(topic.to_string()).or_insert(0);
                        let reply = serde_json::json!({"id": id, "partition": 0, "offset": *offset});
                        *offset += 1;
                        reply
                    }
                }
            };
            if write_half.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                return;
            }
        }
    }

    fn collecting_log() -> (LogCallback, Arc<Mutex<Vec<BrokerLogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();
        let cb: LogCallback = Arc::new(move |e: &BrokerLogEntry| sink.lock().unwrap().push(e.clone()));
        (cb, entries)
    }

    async fn connect(config: BrokerConfig) -> Result<Arc<dyn Connection>, BrokerError> {
        let (cb, _) = collecting_log();
        TcpConnector::new().connect(config, cb).await
    }

    async fn unused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn delivers_with_growing_offsets() {
        let addr = fake_broker().await;
        let conn = connect(BrokerConfig::new(format!("tcp://{addr}"))).await.unwrap();

        let a = conn.send(OutgoingMessage::new("orders", b"{\"id\":42}".to_vec())).await.unwrap();
        let b = conn.send(OutgoingMessage::new("orders", b"{\"id\":43}".to_vec())).await.unwrap();
        assert_eq!(a.topic, "orders");
        assert!(b.offset > a.offset);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn broker_error_is_logic() {
        let addr = fake_broker().await;
        let conn = connect(BrokerConfig::new(addr)).await.unwrap();
        let err = conn.send(OutgoingMessage::new("bad", vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(err.message().contains("unknown topic"));
    }

    #[tokio::test]
    async fn missing_ack_times_out_and_connection_survives() {
        let addr = fake_broker().await;
        let mut config = BrokerConfig::new(addr);
        config.message_timeout_ms = 100;
        let conn = connect(config).await.unwrap();

        let err = conn.send(OutgoingMessage::new("slow", vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.message().contains("no acknowledgement"));

        let pos = conn.send(OutgoingMessage::new("orders", vec![])).await.unwrap();
        assert_eq!(pos.offset, 0);
    }

    #[tokio::test]
    async fn abandoned_send_does_not_poison_connection() {
        let addr = fake_broker().await;
        let conn = connect(BrokerConfig::new(addr)).await.unwrap();

        tokio::select! {
            _ = conn.send(OutgoingMessage::new("slow", vec![])) => panic!("slow topic never acks"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        let pos = conn.send(OutgoingMessage::new("orders", vec![])).await.unwrap();
        assert_eq!(pos.topic, "orders");
    }

    #[tokio::test]
    async fn hangup_fails_inflight_and_later_sends() {
        let addr = fake_broker().await;
        let (cb, entries) = collecting_log();
        let conn = TcpConnector::new().connect(BrokerConfig::new(addr), cb).await.unwrap();

        let err = conn.send(OutgoingMessage::new("hangup", vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let err = conn.send(OutgoingMessage::new("orders", vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let entries = entries.lock().unwrap();
        assert!(entries.iter().any(|e| e.level == SyslogLevel::Warning && e.facility == "RECV"));
    }

    #[tokio::test]
    async fn server_log_lines_reach_callback() {
        let addr = fake_broker().await;
        let (cb, entries) = collecting_log();
        let conn = TcpConnector::new().connect(BrokerConfig::new(addr), cb).await.unwrap();

        conn.send(OutgoingMessage::new("warn", vec![])).await.unwrap();
        let entries = entries.lock().unwrap();
        let quota = entries.iter().find(|e| e.facility == "QUOTA").unwrap();
        assert_eq!(quota.level, SyslogLevel::Warning);
        assert_eq!(quota.message, "near limit");
    }

    #[tokio::test]
    async fn close_returns_when_peer_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut config = BrokerConfig::new(addr);
        config.message_timeout_ms = 300;
        let conn = connect(config).await.unwrap();

        // far more than the socket buffers hold, so the writer blocks mid-line
        let payload = vec![b'x'; 32 * 1024 * 1024];
        let err = conn.send(OutgoingMessage::new("orders", payload)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        tokio::time::timeout(Duration::from_secs(5), conn.close())
            .await
            .expect("close hung on a stalled peer")
            .unwrap();
    }

    #[tokio::test]
    async fn close_stops_sends() {
        let addr = fake_broker().await;
        let conn = connect(BrokerConfig::new(addr)).await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        let err = conn.send(OutgoingMessage::new("orders", vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn refused_connect_is_io() {
        let dead = unused_addr().await;
        let Err(err) = connect(BrokerConfig::new(dead)).await else {
            panic!("nothing listens there");
        };
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn falls_through_to_next_server() {
        let dead = unused_addr().await;
        let alive = fake_broker().await;
        let (cb, entries) = collecting_log();
        let conn = TcpConnector::new()
            .connect(BrokerConfig::new(format!("{dead},{alive}")), cb)
            .await
            .unwrap();

        conn.send(OutgoingMessage::new("orders", vec![])).await.unwrap();
        let entries = entries.lock().unwrap();
        assert_eq!(entries[0].level, SyslogLevel::Warning);
        assert!(entries[0].message.starts_with(&dead));
    }

    #[tokio::test]
    async fn authentication() {
        let addr = fake_broker().await;
        let sasl = |password: &str| SaslConfig {
            mechanism: "PLAIN".into(),
            username: "svc".into(),
            password: password.into(),
        };

        let mut good = BrokerConfig::new(addr.clone());
        good.sasl = Some(sasl("secret"));
        let conn = connect(good).await.unwrap();
        conn.send(OutgoingMessage::new("orders", vec![])).await.unwrap();

        let mut bad = BrokerConfig::new(addr);
        bad.sasl = Some(sasl("guess"));
        let Err(err) = connect(bad).await else {
            panic!("wrong password accepted");
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("bad credentials"));
    }
}

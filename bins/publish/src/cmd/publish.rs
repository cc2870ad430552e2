use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use broker_api::Connector;
use producer::{Correlation, PublishError, PublishOutcome, Publisher, TomlFileConfig};

use super::connector::AutoConnector;
use crate::config::PublishArgs;
use crate::error::CliError;

/// Итог прогона.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl Summary {
    fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Delivered(position) => {
                println!("{position}");
                self.delivered += 1;
            }
            PublishOutcome::Skipped(reason) => {
                tracing::warn!(%reason, "message skipped");
                self.skipped += 1;
            }
            PublishOutcome::Cancelled => self.cancelled = true,
        }
    }
}

pub async fn run(args: PublishArgs) -> Result<(), CliError> {
    let token = CancellationToken::new();
    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping");
                token.cancel();
            }
        }
    });

    let connector = Arc::new(AutoConnector::new());
    let stdin = BufReader::new(tokio::io::stdin());
    let result = execute(&args, connector.clone(), stdin, &token).await;
    interrupt.abort();
    connector.report().await;

    let summary = result?;
    tracing::info!(
        delivered = summary.delivered,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "done"
    );
    if summary.failed > 0 {
        return Err(CliError::Incomplete {
            failed: summary.failed,
            total: summary.delivered + summary.skipped + summary.failed,
        });
    }
    Ok(())
}

/// Publish `--message`, or every non-empty line of `input`. The publisher
/// is shut down before returning, whatever the result.
pub async fn execute<R>(
    args: &PublishArgs,
    connector: Arc<dyn Connector>,
    input: R,
    token: &CancellationToken,
) -> Result<Summary, CliError>
where
    R: AsyncBufRead + Unpin,
{
    let source = TomlFileConfig::new(&args.config);
    let settings = source.publisher_settings()?;
    let correlation = args.correlation()?;
    tracing::info!(config = %args.config, topic = %args.topic, "publishing");

    let publisher = Publisher::new(connector, Arc::new(source)).with_settings(settings);
    let result = feed(&publisher, args, correlation, input, token).await;
    publisher.shutdown().await;
    result
}

async fn feed<R>(
    publisher: &Publisher,
    args: &PublishArgs,
    correlation: Correlation,
    input: R,
    token: &CancellationToken,
) -> Result<Summary, CliError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = Summary::default();

    if let Some(message) = &args.message {
        let value = parse(1, message)?;
        summary.record(send(publisher, args, correlation, &value, token).await?);
        return Ok(summary);
    }

    let mut lines = input.lines();
    let mut line_no = 0usize;
    while !summary.cancelled {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => {
                summary.cancelled = true;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let value = match parse(line_no, &line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "line skipped");
                summary.failed += 1;
                continue;
            }
        };
        let correlation = correlation.clone().with("line", line_no);
        match send(publisher, args, correlation, &value, token).await {
            Ok(outcome) => summary.record(outcome),
            Err(e) => {
                tracing::error!(line = line_no, error = %e, "message not delivered");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn parse(line: usize, text: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(text).map_err(|e| CliError::Input { line, detail: e.to_string() })
}

/// One publish, repeated up to `--retries` times on transient failures.
/// The publisher has already backed off before each error comes back.
async fn send(
    publisher: &Publisher,
    args: &PublishArgs,
    correlation: Correlation,
    value: &serde_json::Value,
    token: &CancellationToken,
) -> Result<PublishOutcome, PublishError> {
    let mut attempt = 0;
    loop {
        let result = publisher
            .publish_with(Some(value), &args.topic, args.key.clone(), correlation.clone(), token)
            .await;
        match result {
            Err(e) if e.is_transient() && attempt < args.retries && !token.is_cancelled() => {
                attempt += 1;
                tracing::warn!(attempt, retries = args.retries, error = %e, "retrying publish");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use broker_api::ErrorKind;
    use broker_memory::MemoryBroker;

    use super::*;

    fn config_file(name: &str, broker: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("publish-cli-{}-{name}.toml", std::process::id()));
        let content = format!(
            "[broker]\nbootstrap_servers = \"memory://{broker}\"\n\n\
             [broker.properties]\npartitions = \"2\"\n\n\
             [publisher]\nretry_backoff_ms = 1\n"
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    fn args(config: &PathBuf, message: Option<&str>) -> PublishArgs {
        PublishArgs {
            config: config.display().to_string(),
            topic: "orders".into(),
            key: None,
            message: message.map(String::from),
            correlation: vec!["TargetId=7".into()],
            retries: 0,
        }
    }

    #[tokio::test]
    async fn single_message_with_key() {
        let path = config_file("single", "single");
        let broker = Arc::new(MemoryBroker::new("single"));
        let connector = Arc::new(AutoConnector::new().with_memory(broker.clone()));

        let mut args = args(&path, Some(r#"{"id":42,"target_id":7}"#));
        args.key = Some("acct-7".into());
        let summary = execute(&args, connector, &b""[..], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.delivered, 1);
        let records = broker.records("orders").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("acct-7"));
        let stored: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(stored["id"], 42);
    }

    #[tokio::test]
    async fn lines_from_input() {
        let path = config_file("lines", "lines");
        let broker = Arc::new(MemoryBroker::new("lines"));
        let connector = Arc::new(AutoConnector::new().with_memory(broker.clone()));

        let input = b"{\"id\":1}\n\nnot json\n{\"id\":2}\n";
        let summary = execute(&args(&path, None), connector, &input[..], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, Summary { delivered: 2, skipped: 0, failed: 1, cancelled: false });
        assert_eq!(broker.records("orders").await.len(), 2);
    }

    #[tokio::test]
    async fn invalid_message_flag_is_an_error() {
        let path = config_file("invalid", "invalid");
        let connector = Arc::new(AutoConnector::new());
        let err = execute(&args(&path, Some("{oops")), connector, &b""[..], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Input { line: 1, .. }));
    }

    #[tokio::test]
    async fn cancelled_before_start_publishes_nothing() {
        let path = config_file("cancel", "cancel");
        let broker = Arc::new(MemoryBroker::new("cancel"));
        let connector = Arc::new(AutoConnector::new().with_memory(broker.clone()));
        let token = CancellationToken::new();
        token.cancel();

        let summary = execute(&args(&path, None), connector, &b"{\"id\":1}\n"[..], &token)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.delivered, 0);
        assert!(broker.records("orders").await.is_empty());
    }

    #[tokio::test]
    async fn retries_transient_failures_then_gives_up() {
        let path = config_file("retry", "retry");
        let broker = Arc::new(MemoryBroker::new("retry"));
        broker.set_available(false);
        let connector = Arc::new(AutoConnector::new().with_memory(broker));

        let mut args = args(&path, Some(r#"{"id":1}"#));
        args.retries = 2;
        let err = execute(&args, connector, &b""[..], &CancellationToken::new())
            .await
            .unwrap_err();
        let CliError::Publish(e) = err else {
            panic!("expected publish error, got {err}");
        };
        assert!(e.is_transient());
        assert_eq!(e.broker_error().map(|b| b.kind()), Some(ErrorKind::Io));
    }

    #[tokio::test]
    async fn missing_config_file() {
        let path = std::env::temp_dir().join("publish-cli-does-not-exist.toml");
        let err = execute(
            &args(&path, Some("{}")),
            Arc::new(AutoConnector::new()),
            &b""[..],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}

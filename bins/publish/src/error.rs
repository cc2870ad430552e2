use broker_api::BrokerError;
use producer::PublishError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config: {0}")]
    Config(#[from] BrokerError),

    #[error("bad --correlation '{0}': expected name=value")]
    Correlation(String),

    #[error("line {line}: not JSON: {detail}")]
    Input { line: usize, detail: String },

    #[error("{0}")]
    Publish(#[from] PublishError),

    #[error("{failed} of {total} messages not delivered")]
    Incomplete { failed: usize, total: usize },

    #[error("stdin: {0}")]
    Io(#[from] std::io::Error),
}

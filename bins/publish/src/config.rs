use clap::{Args, Parser};

use producer::Correlation;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "publish", about = "Публикация JSON сообщений в брокер")]
pub struct Cli {
    #[command(flatten)]
    pub args: PublishArgs,
}

#[derive(Args, Clone, Debug)]
pub struct PublishArgs {
    /// Путь к TOML конфигу с секциями [broker] и [publisher]
    #[arg(long, default_value = "config.toml", env = "PUBLISH_CONFIG")]
    pub config: String,

    /// Topic назначения
    #[arg(long)]
    pub topic: String,

    /// Ключ партиционирования
    #[arg(long)]
    pub key: Option<String>,

    /// Одно JSON сообщение. Без него сообщения читаются из stdin, по одному на строку
    #[arg(long)]
    pub message: Option<String>,

    /// Поле корреляции для логов, `name=value`. Можно повторять
    #[arg(long = "correlation", value_name = "NAME=VALUE")]
    pub correlation: Vec<String>,

    /// Повторы вызова publish при временных ошибках
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
}

impl PublishArgs {
    pub fn correlation(&self) -> Result<Correlation, CliError> {
        self.correlation.iter().try_fold(Correlation::new(), |acc, pair| {
            match pair.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => Ok(acc.with(name.trim(), value)),
                _ => Err(CliError::Correlation(pair.clone())),
            }
        })
    }
}

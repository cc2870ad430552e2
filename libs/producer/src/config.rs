use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use broker_api::{BrokerConfig, BrokerError};

/// Env variable overriding `bootstrap_servers` from the file.
pub const BOOTSTRAP_ENV: &str = "BROKER_BOOTSTRAP_SERVERS";

// ═══════════════════════════════════════════════════════════════
//  ConfigSource
// ═══════════════════════════════════════════════════════════════

/// Источник настроек брокера. Вызывается при создании каждого
/// нового соединения, результат не кэшируется.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<BrokerConfig, BrokerError>;
}

/// Фиксированный конфиг (тесты, embedding).
#[derive(Debug, Clone)]
pub struct StaticConfig(pub BrokerConfig);

impl ConfigSource for StaticConfig {
    fn load(&self) -> Result<BrokerConfig, BrokerError> {
        Ok(self.0.clone())
    }
}

// ═══════════════════════════════════════════════════════════════
//  TOML file
// ═══════════════════════════════════════════════════════════════

/// Секция TOML файла, перечитывается на каждый `load()`.
///
/// ```toml
/// [broker]
/// bootstrap_servers = "127.0.0.1:9400"
///
/// [publisher]
/// retry_backoff_ms = 500
/// ```
#[derive(Debug, Clone)]
pub struct TomlFileConfig {
    path: PathBuf,
    section: String,
    optional: bool,
    env_override: Option<String>,
}

impl TomlFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            section: "broker".into(),
            optional: false,
            env_override: Some(BOOTSTRAP_ENV.into()),
        }
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    /// Missing file is not an error when `bootstrap_servers` comes from env.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn env_override(mut self, var: Option<&str>) -> Self {
        self.env_override = var.map(str::to_string);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `[publisher]` section of the same file. Missing file or section → defaults.
    pub fn publisher_settings(&self) -> Result<PublisherSettings, BrokerError> {
        match self.read_table()? {
            Some(table) => match table.get("publisher") {
                Some(v) => v.clone().try_into().map_err(|e| {
                    BrokerError::config(format!("'{}' [publisher]: {e}", self.path.display()))
                }),
                None => Ok(PublisherSettings::default()),
            },
            None => Ok(PublisherSettings::default()),
        }
    }

    fn read_table(&self) -> Result<Option<toml::Table>, BrokerError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.optional => return Ok(None),
            Err(e) => {
                return Err(BrokerError::config(format!("read '{}': {e}", self.path.display())));
            }
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| BrokerError::config(format!("parse '{}': {e}", self.path.display())))
    }

    fn env_servers(&self) -> Option<String> {
        let var = self.env_override.as_deref()?;
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

impl ConfigSource for TomlFileConfig {
    fn load(&self) -> Result<BrokerConfig, BrokerError> {
        let env_servers = self.env_servers();

        let mut config = match self.read_table()? {
            Some(mut table) => {
                let section = table.remove(&self.section).ok_or_else(|| {
                    BrokerError::config(format!(
                        "'{}': section [{}] not found",
                        self.path.display(),
                        self.section
                    ))
                })?;
                section.try_into::<BrokerConfig>().map_err(|e| {
                    BrokerError::config(format!("'{}' [{}]: {e}", self.path.display(), self.section))
                })?
            }
            None => match &env_servers {
                Some(servers) => BrokerConfig::new(servers.clone()),
                None => {
                    return Err(BrokerError::config(format!(
                        "'{}' not found and no bootstrap servers in environment",
                        self.path.display()
                    )));
                }
            },
        };

        if let Some(servers) = env_servers {
            config.bootstrap_servers = servers;
        }
        Ok(config)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Publisher settings
// ═══════════════════════════════════════════════════════════════

/// Что делать с вызовом без topic'а или без payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTargetPolicy {
    /// Тихо пропустить: `Ok(PublishOutcome::Skipped)`.
    #[default]
    Skip,
    /// Вернуть `PublishError::Rejected`.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherSettings {
    /// Пауза после неудачной отправки, перед возвратом ошибки.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub missing_target: MissingTargetPolicy,
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            missing_target: MissingTargetPolicy::default(),
        }
    }
}

impl PublisherSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

// ═══════════════════════════════════════════════════════════════
//  Broker Config
// ═══════════════════════════════════════════════════════════════

/// Настройки подключения к брокеру. Читаются заново при создании
/// каждого нового соединения, изменения подхватываются на reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Список адресов `host:port` через запятую, либо URL бэкенда
    /// (e.g., "memory://local").
    pub bootstrap_servers: String,
    /// Имя клиента, передаётся брокеру и попадает в логи.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Учётные данные (если брокер требует аутентификацию).
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
    /// Таймаут доставки одного сообщения.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// Таймаут установки соединения.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Backend-specific knobs (e.g., `partitions = "3"`).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslConfig {
    #[serde(default = "default_sasl_mechanism")]
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

// Password stays out of logs.
impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn default_message_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_sasl_mechanism() -> String {
    "PLAIN".into()
}

impl BrokerConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            client_id: None,
            sasl: None,
            message_timeout_ms: default_message_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Validate: bootstrap_servers не пустой, таймауты > 0.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.servers().next().is_none() {
            return Err(BrokerError::config("bootstrap_servers is empty"));
        }
        if self.message_timeout_ms == 0 {
            return Err(BrokerError::config("message_timeout_ms must be > 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(BrokerError::config("connect_timeout_ms must be > 0"));
        }
        Ok(())
    }

    /// Адреса из `bootstrap_servers`, без пробелов и пустых элементов.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Typed lookup in `properties`. Missing → `Ok(None)`,
    /// unparsable → config error.
    pub fn property<T: FromStr>(&self, name: &str) -> Result<Option<T>, BrokerError>
    where
        T::Err: std::fmt::Display,
    {
        match self.properties.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| BrokerError::config(format!("property '{name}' = '{raw}': {e}"))),
        }
    }
}

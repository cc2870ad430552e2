use std::sync::Arc;

/// Severity levels reported by broker clients (syslog numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyslogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl SyslogLevel {
    /// Numeric syslog level → enum. Out-of-range values are `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            7 => Self::Debug,
            _ => return None,
        })
    }
}

/// Diagnostic line emitted by a broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLogEntry {
    pub level: SyslogLevel,
    /// Subsystem inside the client (e.g., "CONNECT", "AUTH").
    pub facility: String,
    /// Client instance name (usually `client_id`).
    pub name: String,
    pub message: String,
}

impl BrokerLogEntry {
    pub fn new(
        level: SyslogLevel,
        facility: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            facility: facility.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Callback a connection uses to hand its diagnostics to the host.
pub type LogCallback = Arc<dyn Fn(&BrokerLogEntry) + Send + Sync>;

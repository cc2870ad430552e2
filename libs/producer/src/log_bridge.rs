//! Broker client diagnostics → `tracing`.

use std::sync::Arc;

use tracing::Level;

use broker_api::{BrokerLogEntry, LogCallback, SyslogLevel};

/// Broker severity → host log level.
pub fn map_severity(level: SyslogLevel) -> Level {
    match level {
        SyslogLevel::Warning => Level::WARN,
        SyslogLevel::Emergency | SyslogLevel::Alert | SyslogLevel::Critical | SyslogLevel::Error => {
            Level::ERROR
        }
        SyslogLevel::Debug => Level::DEBUG,
        SyslogLevel::Notice | SyslogLevel::Info => Level::INFO,
    }
}

/// Emit one broker log entry at the mapped level, target `broker`.
pub fn forward(entry: &BrokerLogEntry) {
    let level = map_severity(entry.level);
    let facility = entry.facility.as_str();
    let client = entry.name.as_str();
    let message = entry.message.as_str();

    if level == Level::ERROR {
        tracing::error!(target: "broker", %facility, %client, "{message}");
    } else if level == Level::WARN {
        tracing::warn!(target: "broker", %facility, %client, "{message}");
    } else if level == Level::DEBUG {
        tracing::debug!(target: "broker", %facility, %client, "{message}");
    } else {
        tracing::info!(target: "broker", %facility, %client, "{message}");
    }
}

/// Callback handed to `Connector::connect`.
pub fn callback() -> LogCallback {
    Arc::new(forward)
}

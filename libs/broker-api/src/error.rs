use std::fmt;

/// Что пошло не так на стороне брокера. По `kind` publisher решает,
/// поможет ли переподключение.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing settings (address, credentials, properties).
    /// Reconnecting with the same config fails the same way, so the
    /// publisher never treats it as transient.
    Config,
    /// Socket failure, refused connect, missing acknowledgement.
    /// The handle is dropped and the next call builds a new one.
    Io,
    /// Payload or frame could not be encoded or decoded.
    Format,
    /// The broker answered, but refused the record.
    Logic,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Format => "format",
            ErrorKind::Logic => "logic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error of every `Connector` / `Connection` call and of config sources.
///
/// The publisher logs it and returns the same value to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerError {
    kind: ErrorKind,
    message: String,
}

impl BrokerError {
    fn of(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Broker-side rejection.
    pub fn new(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::Logic, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::Io, message)
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::Format, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with where it happened (`"connect to 'x': ..."`).
    /// The kind is kept.
    pub fn with_context(mut self, ctx: impl fmt::Display) -> Self {
        self.message = format!("{ctx}: {}", self.message);
        self
    }
}

impl fmt::Debug for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BrokerError {}

// Socket errors are transport faults; JSON errors are encoding faults.

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

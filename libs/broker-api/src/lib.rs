pub mod config;
pub mod connector;
pub mod error;
pub mod log;
pub mod message;

pub use config::{BrokerConfig, SaslConfig};
pub use connector::{BoxFuture, Connection, Connector};
pub use error::{BrokerError, ErrorKind};
pub use log::{BrokerLogEntry, LogCallback, SyslogLevel};
pub use message::{DeliveryPosition, OutgoingMessage};

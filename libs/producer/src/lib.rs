pub mod config;
pub mod error;
pub mod lifecycle;
pub mod log_bridge;
pub mod publisher;
pub mod serializer;

#[cfg(test)]
mod testing;

pub use config::{ConfigSource, MissingTargetPolicy, PublisherSettings, StaticConfig, TomlFileConfig};
pub use error::PublishError;
pub use lifecycle::{ConnectionManager, Lease};
pub use publisher::{Correlation, PublishOutcome, PublishRequest, Publisher, SkipReason};
pub use serializer::{JsonSerializer, PayloadSerializer};

pub mod broker;
pub mod config;
pub mod memory;
pub mod queue;

pub use broker::{Broker, BrokerError, BrokerStats, Result};
pub use config::{ConfigError, QueueSetConfig, QueueWeight};
pub use memory::{InMemoryBroker, DEFAULT_LEASE_GRACE};
pub use queue::QueueSet;

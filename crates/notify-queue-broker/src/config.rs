use notify_queue_core::{QUEUE_CRITICAL, QUEUE_DEFAULT, QUEUE_LOW};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// One lane and its share of dequeue opportunities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueWeight {
    pub name: String,
    pub weight: u32,
}

impl QueueWeight {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        QueueWeight {
            name: name.into(),
            weight,
        }
    }
}

/// Ordered list of lanes. Declaration order breaks ties between lanes with
/// equal remaining credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueSetConfig {
    pub queues: Vec<QueueWeight>,
}

impl Default for QueueSetConfig {
    fn default() -> Self {
        QueueSetConfig {
            queues: vec![
                QueueWeight::new(QUEUE_CRITICAL, 6),
                QueueWeight::new(QUEUE_DEFAULT, 3),
                QueueWeight::new(QUEUE_LOW, 1),
            ],
        }
    }
}

impl QueueSetConfig {
    pub fn new(queues: Vec<QueueWeight>) -> Self {
        QueueSetConfig { queues }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: QueueSetConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one queue must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name.trim().is_empty() {
                return Err(ConfigError::Invalid("queue name must not be empty".to_string()));
            }
            if queue.weight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "queue {} must have a positive weight",
                    queue.name
                )));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "queue {} is declared twice",
                    queue.name
                )));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|q| q.name.as_str())
    }

    pub fn total_weight(&self) -> u32 {
        self.queues.iter().map(|q| q.weight).sum()
    }
}

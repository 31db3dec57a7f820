use crate::retry::RetryPolicy;
use notify_queue_broker::{ConfigError, QueueSetConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: Option<String>,
    pub concurrency: usize,
    pub graceful_shutdown_timeout_secs: u64,
    /// Longest the dispatcher sleeps on empty queues before polling again
    pub poll_interval_ms: u64,
    pub recover_interval_secs: u64,
    pub lease_grace_secs: u64,
    pub queues: QueueSetConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: None,
            concurrency: 10,
            graceful_shutdown_timeout_secs: 30,
            poll_interval_ms: 1000,
            recover_interval_secs: 30,
            lease_grace_secs: 30,
            queues: QueueSetConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter: f64,
    /// Backoff for failed broker operations (not task retries)
    pub broker_base_delay_ms: u64,
    pub broker_max_delay_ms: u64,
    pub broker_max_attempts: u32,
    /// Upper bound on a single broker call made while reporting an outcome
    pub broker_call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay_secs: 5,
            max_delay_secs: 3600,
            jitter: 0.0,
            broker_base_delay_ms: 100,
            broker_max_delay_ms: 5000,
            broker_max_attempts: 5,
            broker_call_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl WorkerConfig {
    /// Lighter variant for workers embedded in another process
    pub fn embedded() -> Self {
        WorkerConfig {
            concurrency: 5,
            graceful_shutdown_timeout_secs: 10,
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.recover_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "recover_interval_secs must be positive".to_string(),
            ));
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs {
            return Err(ConfigError::Invalid(
                "retry.base_delay_secs exceeds retry.max_delay_secs".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid(
                "retry.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.retry.broker_call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.broker_call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry.broker_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.broker_max_attempts must be at least 1".to_string(),
            ));
        }
        self.queues.validate()
    }

    pub fn generate_worker_id(&self) -> String {
        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = std::process::id();
        let random = uuid::Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recover_interval(&self) -> Duration {
        Duration::from_secs(self.recover_interval_secs)
    }

    pub fn lease_grace(&self) -> Duration {
        Duration::from_secs(self.lease_grace_secs)
    }

    pub fn broker_call_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.broker_call_timeout_ms)
    }

    /// Backoff between task attempts
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry.base_delay_secs),
            Duration::from_secs(self.retry.max_delay_secs),
        )
        .with_jitter(self.retry.jitter)
    }

    /// Backoff between attempts at a failing broker operation
    pub fn broker_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry.broker_base_delay_ms),
            Duration::from_millis(self.retry.broker_max_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.graceful_shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.format, LogFormat::Json);

        let embedded = WorkerConfig::embedded();
        assert_eq!(embedded.graceful_shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "concurrency: 3\n\
             logging:\n  format: text\n\
             queues:\n  - name: critical\n    weight: 2\n  - name: low\n    weight: 1\n"
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.queues.total_weight(), 3);
        assert_eq!(config.graceful_shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = WorkerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = WorkerConfig::default();
        config.retry.base_delay_secs = 7200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jitter_outside_unit_range_rejected() {
        for jitter in [f64::NAN, -0.1, 1.5, f64::INFINITY] {
            let mut config = WorkerConfig::default();
            config.retry.jitter = jitter;
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "jitter {jitter} accepted"
            );
        }

        let mut config = WorkerConfig::default();
        config.retry.jitter = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_id() {
        let config = WorkerConfig {
            worker_id: Some("worker-a".to_string()),
            ..Default::default()
        };
        assert_eq!(config.generate_worker_id(), "worker-a");

        let generated = WorkerConfig::default().generate_worker_id();
        assert!(generated.contains(&std::process::id().to_string()));
        assert_ne!(generated, WorkerConfig::default().generate_worker_id());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lane names the priority tiers resolve to.
pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_LOW: &str = "low";

/// Producer-facing priority of a notification.
///
/// Parsing is lenient: anything that is not `high` or `low` (including the
/// empty string) is treated as the default tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

impl Priority {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Default,
        }
    }

    /// Name of the queue tasks of this priority are placed on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Priority::High => QUEUE_CRITICAL,
            Priority::Default => QUEUE_DEFAULT,
            Priority::Low => QUEUE_LOW,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Default => "default",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Priority {
    fn from(value: &str) -> Self {
        Priority::parse(value)
    }
}

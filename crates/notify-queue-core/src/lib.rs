mod error;
mod priority;
mod task;
pub mod notification;

pub use error::{Result, TaskError};
pub use priority::{Priority, QUEUE_CRITICAL, QUEUE_DEFAULT, QUEUE_LOW};
pub use task::{Task, TaskBuilder, TaskId, TaskPayload, TaskPolicy, TaskState, TaskType};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB

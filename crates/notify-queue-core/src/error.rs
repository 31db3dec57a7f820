use thiserror::Error;

use crate::TaskState;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task type must not be empty")]
    EmptyTaskType,

    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Payload is not serializable: {0}")]
    UnserializablePayload(#[from] serde_json::Error),

    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Illegal state transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
}

pub type Result<T> = std::result::Result<T, TaskError>;

//! Tagged task errors.
//!
//! Everything that ends a task (or refuses to start one) is reported as a
//! [`TaskError`]. The kind lets an observer tell a user cancel apart from a
//! real failure; the message is meant for display.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorKind {
    /// A task is already running; the new request was not accepted.
    Busy,
    /// The user cancelled the running task.
    Cancelled,
    /// Extraction, network or disk failure reported by the extractor.
    Failed,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn busy() -> Self {
        Self {
            kind: TaskErrorKind::Busy,
            message: "Another download is already in progress.".into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: TaskErrorKind::Cancelled,
            message: "Download cancelled by user.".into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TaskErrorKind::Cancelled
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::failed(e.to_string())
    }
}

use std::sync::Arc;

use tokio::sync::watch;

use super::error::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Cancelled,
}

/// Pause/cancel token shared between the controller and one running task.
///
/// The task side calls [`checkpoint`](Self::checkpoint) at every progress
/// boundary; while paused it parks on the watch channel instead of polling.
#[derive(Clone, Debug)]
pub struct TaskControl {
    tx: Arc<watch::Sender<RunState>>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RunState::Cancelled
    }

    /// Running → Paused. Returns false if the task was not running.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == RunState::Running {
                *s = RunState::Paused;
                true
            } else {
                false
            }
        })
    }

    /// Paused → Running. Returns false if the task was not paused.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == RunState::Paused {
                *s = RunState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Any state → Cancelled. Also wakes a paused task so it can observe it.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == RunState::Cancelled {
                false
            } else {
                *s = RunState::Cancelled;
                true
            }
        })
    }

    /// Returns immediately while running, parks while paused, and errors once
    /// cancelled.
    pub async fn checkpoint(&self) -> Result<(), TaskError> {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|s| *s != RunState::Paused).await {
            Ok(s) => *s,
            // sender lives in self, so this is unreachable in practice
            Err(_) => RunState::Cancelled,
        };
        match state {
            RunState::Cancelled => Err(TaskError::cancelled()),
            _ => Ok(()),
        }
    }
}

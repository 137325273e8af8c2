//! Task state as reported by the runtime engine.
//!
//! Mirrors the status values of the OCI runtime state format, plus the
//! transitional `pausing` state engines report while freezing a task:
//! <https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state>

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task has been created but not started.
    Created,
    /// Task is running.
    Running,
    /// Task has exited.
    Stopped,
    /// Task is paused.
    Paused,
    /// Task is being paused.
    Pausing,
    /// Status could not be determined.
    #[default]
    Unknown,
}

impl TaskStatus {
    /// Returns true if the task's process is still around.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
            Self::Pausing => write!(f, "pausing"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

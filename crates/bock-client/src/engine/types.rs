//! Values exchanged with the runtime engine.

use std::collections::HashMap;

use bock_oci::Descriptor;
use chrono::{DateTime, Utc};

use super::events::Any;

/// Labels attached to content written to the engine.
pub type Labels = HashMap<String, String>;

/// Engine version information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Release version.
    pub version: String,
    /// Source revision.
    pub revision: String,
}

/// Runtime selection for a new container.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeInfo {
    /// Runtime name, e.g. `io.containerd.runtime.v1.linux`.
    pub name: String,
    /// Opaque runtime-specific options.
    pub options: Option<serde_json::Value>,
}

impl RuntimeInfo {
    /// The v1 runtime for the host OS.
    #[must_use]
    pub fn for_host(options: Option<serde_json::Value>) -> Self {
        Self {
            name: format!("io.containerd.runtime.v1.{}", std::env::consts::OS),
            options,
        }
    }
}

/// Process-creation options for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Checkpoint to restore the task from.
    pub checkpoint: Option<Descriptor>,
    /// Host uid owning the stdio pipes.
    pub io_uid: u32,
    /// Host gid owning the stdio pipes.
    pub io_gid: u32,
    /// Create the task without `pivot_root`.
    pub no_pivot_root: bool,
}

/// Options for checkpointing a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointOptions {
    /// Stop the task once the checkpoint is taken.
    pub exit: bool,
}

/// Image published by the engine for a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointImage {
    /// Image name.
    pub name: String,
    /// Target descriptor (an image index).
    pub target: Descriptor,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code.
    pub code: u32,
    /// When the process exited.
    pub exited_at: DateTime<Utc>,
}

impl ExitStatus {
    /// Exit code reported when the real status cannot be obtained.
    pub const UNKNOWN_CODE: u32 = 255;

    /// Create an exit status.
    #[must_use]
    pub const fn new(code: u32, exited_at: DateTime<Utc>) -> Self {
        Self { code, exited_at }
    }

    /// Placeholder status stamped with the current time.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN_CODE, Utc::now())
    }
}

/// Raw resource usage sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metrics {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Runtime-specific payload.
    pub data: Any,
}

/// A process running inside a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Host pid.
    pub pid: u32,
    /// Runtime-specific details.
    pub info: Option<Any>,
}

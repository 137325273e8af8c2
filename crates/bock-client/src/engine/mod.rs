//! Runtime-engine collaborator interface.
//!
//! The client never talks to a runtime directly; it drives these traits. An
//! implementation wraps a concrete engine connection (for example a
//! containerd/ttrpc client) and is free to block or suspend in any call.

pub mod events;
mod types;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bock_oci::runtime::Process;
use bock_oci::{Spec, TaskStatus};
use bytes::Bytes;
use thiserror::Error;

use crate::stdio::{DirectIo, FifoSet, ProcessIo};

pub use events::{Any, Envelope, Subscription};
pub use types::{
    CheckpointImage, CheckpointOptions, ExitStatus, Labels, Metrics, ProcessInfo, RuntimeInfo,
    TaskOptions, Version,
};

/// Result type for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Status codes reported by the engine, modelled on gRPC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// The object does not exist.
    NotFound,
    /// The object already exists.
    AlreadyExists,
    /// The request was malformed.
    InvalidArgument,
    /// The object is not in a state that allows the request.
    FailedPrecondition,
    /// The engine is unreachable or the transport failed.
    Unavailable,
    /// The call was cancelled by the caller.
    Canceled,
    /// The call ran past its deadline.
    DeadlineExceeded,
    /// Anything else.
    Unknown,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::InvalidArgument => "invalid argument",
            Self::FailedPrecondition => "failed precondition",
            Self::Unavailable => "unavailable",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error returned by the runtime engine.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    code: Code,
    message: String,
}

impl EngineError {
    /// Create an error with an explicit code.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error for a call abandoned because the caller cancelled it.
    #[must_use]
    pub fn canceled() -> Self {
        Self::new(Code::Canceled, "context canceled")
    }

    /// The engine-reported code.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// The engine-reported message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the engine reported [`Code::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }

    /// Returns true if the call was cancelled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.code == Code::Canceled
    }
}

/// Connection to the runtime engine.
#[async_trait]
pub trait RuntimeEngine: Send + Sync + 'static {
    /// Engine version information.
    async fn version(&self) -> EngineResult<Version>;

    /// Create a container object from `spec`.
    async fn new_container(
        &self,
        id: &str,
        spec: &Spec,
        runtime: &RuntimeInfo,
    ) -> EngineResult<Arc<dyn EngineContainer>>;

    /// Load an existing container object.
    async fn load_container(&self, id: &str) -> EngineResult<Arc<dyn EngineContainer>>;

    /// Open the native IO binding for an endpoint set.
    async fn open_io(&self, fifos: &FifoSet) -> EngineResult<DirectIo>;

    /// The engine's content-addressed blob store.
    fn content_store(&self) -> Arc<dyn ContentStore>;

    /// Delete an image record (checkpoint images are published as images).
    async fn delete_image(&self, name: &str) -> EngineResult<()>;

    /// Subscribe to the engine's event bus.
    ///
    /// `filters` are alternatives; each filter is a comma separated
    /// conjunction of field predicates.
    fn subscribe(&self, filters: &[String]) -> Subscription;
}

/// A container object held by the engine.
#[async_trait]
pub trait EngineContainer: Send + Sync {
    /// Container ID.
    fn id(&self) -> &str;

    /// The runtime spec stored with the container.
    async fn spec(&self) -> EngineResult<Spec>;

    /// Create (but do not start) the container's task.
    ///
    /// The engine takes ownership of `io` and releases it when the task is
    /// deleted.
    async fn new_task(
        &self,
        io: Arc<dyn ProcessIo>,
        opts: TaskOptions,
    ) -> EngineResult<Arc<dyn EngineTask>>;

    /// Load the container's existing task. [`Code::NotFound`] if it has none.
    async fn task(&self) -> EngineResult<Arc<dyn EngineTask>>;

    /// Delete the container object.
    async fn delete(&self) -> EngineResult<()>;
}

/// Capabilities shared by tasks and exec processes.
#[async_trait]
pub trait EngineProcess: Send + Sync {
    /// Process ID as known to the engine.
    fn id(&self) -> &str;

    /// Host pid of the process.
    fn pid(&self) -> u32;

    /// Start the process.
    async fn start(&self) -> EngineResult<()>;

    /// Send `signal` to the process.
    async fn kill(&self, signal: i32) -> EngineResult<()>;

    /// Resize the process terminal.
    async fn resize(&self, width: u32, height: u32) -> EngineResult<()>;

    /// Close the process's stdin.
    async fn close_stdin(&self) -> EngineResult<()>;

    /// Current status.
    async fn status(&self) -> EngineResult<TaskStatus>;

    /// Delete the process, returning its exit status.
    async fn delete(&self) -> EngineResult<ExitStatus>;
}

/// A container's init process, with the task-only capabilities.
#[async_trait]
pub trait EngineTask: EngineProcess {
    /// Endpoint set the task was created with, if it has stdio.
    fn fifos(&self) -> Option<FifoSet>;

    /// Hand a re-attached IO binding to the task.
    fn set_io(&self, io: Arc<dyn ProcessIo>);

    /// Freeze every process in the task.
    async fn pause(&self) -> EngineResult<()>;

    /// Thaw a paused task.
    async fn resume(&self) -> EngineResult<()>;

    /// Resource usage sample.
    async fn metrics(&self) -> EngineResult<Metrics>;

    /// Processes running inside the task.
    async fn pids(&self) -> EngineResult<Vec<ProcessInfo>>;

    /// Checkpoint the task into an image.
    async fn checkpoint(&self, opts: CheckpointOptions) -> EngineResult<CheckpointImage>;

    /// Register (but do not start) an exec process.
    async fn exec(
        &self,
        id: &str,
        spec: &Process,
        io: Arc<dyn ProcessIo>,
    ) -> EngineResult<Arc<dyn EngineProcess>>;
}

/// Content-addressed blob store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Write `data` under `reference`, returning its digest.
    async fn write(&self, reference: &str, data: Bytes, labels: Labels) -> EngineResult<String>;

    /// Read a whole blob.
    async fn read(&self, digest: &str) -> EngineResult<Bytes>;

    /// Delete a blob.
    async fn delete(&self, digest: &str) -> EngineResult<()>;
}

//! Normalized lifecycle events and their consumer.
//!
//! The engine publishes task events for every container on one bus. The
//! stream processor decodes them, reconciles them against the registry and
//! forwards them to the [`Backend`] through a per-container ordered queue.

mod queue;
pub(crate) mod stream;

use std::fmt;

use async_trait::async_trait;
use bock_common::BockResult;
use chrono::{DateTime, Utc};

use crate::engine::events::TaskEvent;

pub use queue::KeyedQueue;

/// Kinds of lifecycle events forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A task was created.
    Create,
    /// A task was started.
    Start,
    /// A task or exec process exited.
    Exit,
    /// The OOM killer fired.
    Oom,
    /// An exec process was registered.
    ExecAdded,
    /// An exec process was started.
    ExecStarted,
    /// A task was paused.
    Paused,
    /// A task was resumed.
    Resumed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Exit => "exit",
            Self::Oom => "oom",
            Self::ExecAdded => "exec-added",
            Self::ExecStarted => "exec-started",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
        })
    }
}

/// Details of one lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventInfo {
    /// Container the event belongs to.
    pub container_id: String,
    /// Process the event is about; the container ID for the init process.
    pub process_id: String,
    /// Host pid, when the event carries one.
    pub pid: u32,
    /// Exit code of an exit event.
    pub exit_code: u32,
    /// Exit time of an exit event.
    pub exited_at: Option<DateTime<Utc>>,
    /// Whether the container's task has been OOM killed.
    pub oom_killed: bool,
}

/// The engine's sink for normalized events.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Apply one event. Called in arrival order per container.
    async fn process_event(
        &self,
        container_id: &str,
        kind: EventKind,
        info: EventInfo,
    ) -> BockResult<()>;
}

/// Map a decoded engine event onto a kind and its details.
///
/// Returns `None` for event types the client does not forward.
#[must_use]
pub fn classify(event: TaskEvent) -> Option<(EventKind, EventInfo)> {
    let classified = match event {
        TaskEvent::Create(e) => (
            EventKind::Create,
            EventInfo {
                process_id: e.container_id.clone(),
                container_id: e.container_id,
                pid: e.pid,
                ..EventInfo::default()
            },
        ),
        TaskEvent::Start(e) => (
            EventKind::Start,
            EventInfo {
                process_id: e.container_id.clone(),
                container_id: e.container_id,
                pid: e.pid,
                ..EventInfo::default()
            },
        ),
        TaskEvent::Exit(e) => (
            EventKind::Exit,
            EventInfo {
                container_id: e.container_id,
                process_id: e.id,
                pid: e.pid,
                exit_code: e.exit_status,
                exited_at: Some(e.exited_at),
                oom_killed: false,
            },
        ),
        TaskEvent::Oom(e) => (
            EventKind::Oom,
            EventInfo {
                container_id: e.container_id,
                oom_killed: true,
                ..EventInfo::default()
            },
        ),
        TaskEvent::ExecAdded(e) => (
            EventKind::ExecAdded,
            EventInfo {
                container_id: e.container_id,
                process_id: e.exec_id,
                ..EventInfo::default()
            },
        ),
        TaskEvent::ExecStarted(e) => (
            EventKind::ExecStarted,
            EventInfo {
                container_id: e.container_id,
                process_id: e.exec_id,
                pid: e.pid,
                ..EventInfo::default()
            },
        ),
        TaskEvent::Paused(e) => (
            EventKind::Paused,
            EventInfo {
                container_id: e.container_id,
                ..EventInfo::default()
            },
        ),
        TaskEvent::Resumed(e) => (
            EventKind::Resumed,
            EventInfo {
                container_id: e.container_id,
                ..EventInfo::default()
            },
        ),
        TaskEvent::Other(_) => return None,
    };
    Some(classified)
}

//! Native event envelopes published on the engine's event bus.
//!
//! Payloads travel as [`Any`] values: a type URL naming the payload type and
//! its JSON encoding.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::EngineError;

/// Topic prefix of task lifecycle events.
pub const TASK_TOPIC_PREFIX: &str = "/tasks/";

/// A typed, encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Any {
    /// Payload type, e.g. `containerd.events.TaskExit`.
    pub type_url: String,
    /// JSON-encoded payload.
    pub value: Bytes,
}

impl Any {
    /// Encode `payload` under its type URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn pack<T: Payload>(payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            type_url: T::TYPE_URL.to_string(),
            value: Bytes::from(serde_json::to_vec(payload)?),
        })
    }

    /// Decode the payload as `T`, ignoring the type URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not decode as `T`.
    pub fn unpack<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.value)
    }
}

/// A payload type with a well-known type URL.
pub trait Payload: Serialize + DeserializeOwned {
    /// Type URL the payload is published under.
    const TYPE_URL: &'static str;
}

/// One message from the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Engine namespace the event belongs to.
    pub namespace: String,
    /// Topic, e.g. `/tasks/exit`.
    pub topic: String,
    /// Payload; `None` for malformed envelopes.
    pub event: Option<Any>,
}

/// A live event subscription.
///
/// The engine reports a terminal failure on `errors`; once that fires (or the
/// event stream ends) the subscription is finished.
pub struct Subscription {
    /// Events matching the subscription filters, in publication order.
    pub events: BoxStream<'static, Envelope>,
    /// Terminal stream error.
    pub errors: oneshot::Receiver<EngineError>,
}

macro_rules! payload {
    ($name:ident, $url:literal) => {
        impl Payload for $name {
            const TYPE_URL: &'static str = $url;
        }
    };
}

/// A task was created.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreate {
    pub container_id: String,
    #[serde(default)]
    pub bundle: String,
    pub pid: u32,
}
payload!(TaskCreate, "containerd.events.TaskCreate");

/// A task was started.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStart {
    pub container_id: String,
    pub pid: u32,
}
payload!(TaskStart, "containerd.events.TaskStart");

/// A process exited. `id` equals `container_id` for the init process.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExit {
    pub container_id: String,
    pub id: String,
    pub pid: u32,
    pub exit_status: u32,
    pub exited_at: DateTime<Utc>,
}
payload!(TaskExit, "containerd.events.TaskExit");

/// The OOM killer fired inside a task.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOom {
    pub container_id: String,
}
payload!(TaskOom, "containerd.events.TaskOOM");

/// An exec process was registered.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecAdded {
    pub container_id: String,
    pub exec_id: String,
}
payload!(TaskExecAdded, "containerd.events.TaskExecAdded");

/// An exec process was started.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecStarted {
    pub container_id: String,
    pub exec_id: String,
    pub pid: u32,
}
payload!(TaskExecStarted, "containerd.events.TaskExecStarted");

/// A task was paused.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPaused {
    pub container_id: String,
}
payload!(TaskPaused, "containerd.events.TaskPaused");

/// A task was resumed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResumed {
    pub container_id: String,
}
payload!(TaskResumed, "containerd.events.TaskResumed");

/// A task was deleted. Published by engines but not consumed by the client.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDelete {
    pub container_id: String,
    pub pid: u32,
    pub exit_status: u32,
}
payload!(TaskDelete, "containerd.events.TaskDelete");

/// A decoded task event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// See [`TaskCreate`].
    Create(TaskCreate),
    /// See [`TaskStart`].
    Start(TaskStart),
    /// See [`TaskExit`].
    Exit(TaskExit),
    /// See [`TaskOom`].
    Oom(TaskOom),
    /// See [`TaskExecAdded`].
    ExecAdded(TaskExecAdded),
    /// See [`TaskExecStarted`].
    ExecStarted(TaskExecStarted),
    /// See [`TaskPaused`].
    Paused(TaskPaused),
    /// See [`TaskResumed`].
    Resumed(TaskResumed),
    /// A payload type the client does not handle.
    Other(String),
}

impl TaskEvent {
    /// Decode `any` according to its type URL.
    ///
    /// # Errors
    ///
    /// Returns an error if a known payload type fails to decode.
    pub fn decode(any: &Any) -> serde_json::Result<Self> {
        Ok(match any.type_url.as_str() {
            TaskCreate::TYPE_URL => Self::Create(any.unpack()?),
            TaskStart::TYPE_URL => Self::Start(any.unpack()?),
            TaskExit::TYPE_URL => Self::Exit(any.unpack()?),
            TaskOom::TYPE_URL => Self::Oom(any.unpack()?),
            TaskExecAdded::TYPE_URL => Self::ExecAdded(any.unpack()?),
            TaskExecStarted::TYPE_URL => Self::ExecStarted(any.unpack()?),
            TaskPaused::TYPE_URL => Self::Paused(any.unpack()?),
            TaskResumed::TYPE_URL => Self::Resumed(any.unpack()?),
            other => Self::Other(other.to_string()),
        })
    }
}

//! In-memory registry of the containers known to the client.
//!
//! Two levels of locking: the registry lock guards map membership only, and
//! each [`Container`] guards its own fields. Neither lock is ever held across
//! an `.await`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bock_common::{BockError, BockResult};
use parking_lot::{Mutex, RwLock};

use crate::engine::{EngineContainer, EngineProcess, EngineResult, EngineTask, ExitStatus};

/// Process ID naming a container's init process (its task).
pub const INIT_PROCESS: &str = "init";

#[derive(Default)]
struct ContainerState {
    task: Option<Arc<dyn EngineTask>>,
    execs: HashMap<String, Arc<dyn EngineProcess>>,
    /// Process IDs with a Start or Exec in flight.
    claims: HashSet<String>,
    oom_killed: bool,
}

/// A container known to the client.
pub struct Container {
    id: String,
    bundle_dir: PathBuf,
    ctr: Arc<dyn EngineContainer>,
    state: Mutex<ContainerState>,
}

impl Container {
    /// Track engine container `ctr` whose bundle lives at `bundle_dir`.
    pub fn new(
        id: impl Into<String>,
        bundle_dir: impl Into<PathBuf>,
        ctr: Arc<dyn EngineContainer>,
    ) -> Self {
        Self {
            id: id.into(),
            bundle_dir: bundle_dir.into(),
            ctr,
            state: Mutex::new(ContainerState::default()),
        }
    }

    /// Container ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bundle directory.
    #[must_use]
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// The engine's container object.
    #[must_use]
    pub fn engine_container(&self) -> &Arc<dyn EngineContainer> {
        &self.ctr
    }

    /// Replace the task handle, returning the previous one.
    pub fn set_task(&self, task: Option<Arc<dyn EngineTask>>) -> Option<Arc<dyn EngineTask>> {
        std::mem::replace(&mut self.state.lock().task, task)
    }

    /// Current task handle.
    #[must_use]
    pub fn task(&self) -> Option<Arc<dyn EngineTask>> {
        self.state.lock().task.clone()
    }

    /// Claim the task slot for a Start in flight.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Conflict`] if the container has a task or
    /// another Start holds the claim.
    pub fn claim_task(&self) -> BockResult<Claim<'_>> {
        let mut state = self.state.lock();
        if state.task.is_some() || state.claims.contains(INIT_PROCESS) {
            return Err(BockError::conflict("container already started"));
        }
        state.claims.insert(INIT_PROCESS.to_string());
        Ok(Claim {
            container: self,
            id: INIT_PROCESS.to_string(),
        })
    }

    /// Claim exec ID `id` for an Exec in flight.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Conflict`] if `id` is [`INIT_PROCESS`], is
    /// registered, or is claimed by another Exec.
    pub fn claim_process(&self, id: &str) -> BockResult<Claim<'_>> {
        let mut state = self.state.lock();
        if id == INIT_PROCESS || state.execs.contains_key(id) || state.claims.contains(id) {
            return Err(conflict(id));
        }
        state.claims.insert(id.to_string());
        Ok(Claim {
            container: self,
            id: id.to_string(),
        })
    }

    /// Register exec process `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Conflict`] if `id` is already registered.
    pub fn add_process(&self, id: &str, process: Arc<dyn EngineProcess>) -> BockResult<()> {
        let mut state = self.state.lock();
        if state.execs.contains_key(id) {
            return Err(conflict(id));
        }
        state.execs.insert(id.to_string(), process);
        Ok(())
    }

    /// Unregister exec process `id`, returning its handle.
    pub fn delete_process(&self, id: &str) -> Option<Arc<dyn EngineProcess>> {
        self.state.lock().execs.remove(id)
    }

    /// Handle of exec process `id`.
    #[must_use]
    pub fn process(&self, id: &str) -> Option<Arc<dyn EngineProcess>> {
        self.state.lock().execs.get(id).cloned()
    }

    /// Latch the OOM flag.
    pub fn set_oom_killed(&self, oom_killed: bool) {
        self.state.lock().oom_killed = oom_killed;
    }

    /// Whether the task was OOM killed.
    #[must_use]
    pub fn oom_killed(&self) -> bool {
        self.state.lock().oom_killed
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("bundle_dir", &self.bundle_dir)
            .field("task", &state.task.as_ref().map(|t| t.pid()))
            .field("execs", &state.execs.keys().collect::<Vec<_>>())
            .field("oom_killed", &state.oom_killed)
            .finish()
    }
}

/// A process ID held by an in-flight Start or Exec. Dropping it releases
/// the ID.
#[must_use = "dropping the claim releases the process ID"]
pub struct Claim<'a> {
    container: &'a Container,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.container.state.lock().claims.remove(&self.id);
    }
}

/// A task or an exec process.
#[derive(Clone)]
pub enum ProcessHandle {
    /// The container's init process.
    Task(Arc<dyn EngineTask>),
    /// An exec process.
    Exec(Arc<dyn EngineProcess>),
}

impl ProcessHandle {
    /// Host pid.
    #[must_use]
    pub fn pid(&self) -> u32 {
        match self {
            Self::Task(t) => t.pid(),
            Self::Exec(p) => p.pid(),
        }
    }

    /// Send a signal.
    ///
    /// # Errors
    ///
    /// Returns the engine error.
    pub async fn kill(&self, signal: i32) -> EngineResult<()> {
        match self {
            Self::Task(t) => t.kill(signal).await,
            Self::Exec(p) => p.kill(signal).await,
        }
    }

    /// Resize the terminal.
    ///
    /// # Errors
    ///
    /// Returns the engine error.
    pub async fn resize(&self, width: u32, height: u32) -> EngineResult<()> {
        match self {
            Self::Task(t) => t.resize(width, height).await,
            Self::Exec(p) => p.resize(width, height).await,
        }
    }

    /// Close stdin.
    ///
    /// # Errors
    ///
    /// Returns the engine error.
    pub async fn close_stdin(&self) -> EngineResult<()> {
        match self {
            Self::Task(t) => t.close_stdin().await,
            Self::Exec(p) => p.close_stdin().await,
        }
    }

    /// Delete the process.
    ///
    /// # Errors
    ///
    /// Returns the engine error.
    pub async fn delete(&self) -> EngineResult<ExitStatus> {
        match self {
            Self::Task(t) => t.delete().await,
            Self::Exec(p) => p.delete().await,
        }
    }

    /// The task capability.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::InvalidParameter`] for exec processes.
    pub fn as_task(&self) -> BockResult<&Arc<dyn EngineTask>> {
        match self {
            Self::Task(t) => Ok(t),
            Self::Exec(_) => Err(BockError::invalid_parameter("process is not a task")),
        }
    }
}

enum Slot {
    Reserved,
    Ready(Arc<Container>),
}

/// Concurrency-safe map from container ID to [`Container`].
#[derive(Default)]
pub struct Registry {
    containers: RwLock<HashMap<String, Slot>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `id` while its container is being created or restored.
    ///
    /// The slot is invisible to [`Registry::get`] and is released when the
    /// reservation is dropped unfilled.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Conflict`] if the ID is taken or reserved.
    pub fn reserve(&self, id: &str) -> BockResult<Reservation<'_>> {
        let mut map = self.containers.write();
        if map.contains_key(id) {
            return Err(conflict(id));
        }
        map.insert(id.to_string(), Slot::Reserved);
        Ok(Reservation {
            registry: self,
            id: id.to_string(),
            filled: false,
        })
    }

    /// Look up a ready container.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        match self.containers.read().get(id) {
            Some(Slot::Ready(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Returns true if `id` is taken or reserved.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.containers.read().contains_key(id)
    }

    /// Remove a ready container.
    pub fn remove(&self, id: &str) -> Option<Arc<Container>> {
        let mut map = self.containers.write();
        match map.get(id) {
            Some(Slot::Ready(_)) => match map.remove(id) {
                Some(Slot::Ready(c)) => Some(c),
                _ => None,
            },
            _ => None,
        }
    }

    /// Look up `container_id`, failing with NotFound.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::NotFound`] if the container is unknown.
    pub fn container(&self, container_id: &str) -> BockResult<Arc<Container>> {
        self.get(container_id)
            .ok_or_else(|| BockError::not_found(format!("no such container: {container_id}")))
    }

    /// Find process `process_id` of `container_id`; [`INIT_PROCESS`] is the task.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::NotFound`] if the container, its task or the
    /// exec process is missing.
    pub fn resolve(&self, container_id: &str, process_id: &str) -> BockResult<ProcessHandle> {
        let ctr = self.container(container_id)?;
        let task = ctr.task().ok_or_else(|| {
            BockError::not_found(format!("container is not running: {container_id}"))
        })?;
        if process_id == INIT_PROCESS {
            return Ok(ProcessHandle::Task(task));
        }
        ctr.process(process_id)
            .map(ProcessHandle::Exec)
            .ok_or_else(|| BockError::not_found(format!("no such exec: {process_id}")))
    }
}

fn conflict(id: &str) -> BockError {
    BockError::conflict(format!("id already in use: {id}"))
}

/// A held registry slot.
#[must_use = "dropping the reservation releases the slot"]
pub struct Reservation<'a> {
    registry: &'a Registry,
    id: String,
    filled: bool,
}

impl Reservation<'_> {
    /// The reserved ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish `container` in the reserved slot.
    pub fn fill(mut self, container: Arc<Container>) {
        self.registry
            .containers
            .write()
            .insert(self.id.clone(), Slot::Ready(container));
        self.filled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        let mut map = self.registry.containers.write();
        if matches!(map.get(&self.id), Some(Slot::Reserved)) {
            map.remove(&self.id);
        }
    }
}

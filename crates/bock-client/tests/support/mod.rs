//! In-memory runtime engine and recording collaborators for integration tests.

#![allow(dead_code, missing_docs)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bock_client::engine::events::{Payload, TaskExit, TaskOom, TaskStart};
use bock_client::engine::{
    Any, CheckpointImage, CheckpointOptions, Code, ContentStore, EngineContainer, EngineError,
    EngineProcess, EngineResult, EngineTask, Envelope, ExitStatus, Labels, Metrics, ProcessInfo,
    RuntimeEngine, RuntimeInfo, Subscription, TaskOptions, Version,
};
use bock_client::events::{Backend, EventInfo, EventKind};
use bock_client::stdio::{AttachStdio, BoxReader, BoxWriter, DirectIo, FifoSet, ProcessIo};
use bock_client::{BockError, BockResult, Client, ClientConfig};
use bock_oci::image::media_types;
use bock_oci::runtime::Process;
use bock_oci::{Descriptor, ImageIndex, Spec, TaskStatus};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "bock";

/// State shared by every object of one fake engine.
#[derive(Default)]
pub struct Shared {
    next_pid: AtomicU32,
    failures: Mutex<HashMap<&'static str, EngineError>>,
    hangs: Mutex<HashSet<&'static str>>,
    pub store: Arc<FakeStore>,
    pub deleted_images: Mutex<Vec<String>>,
    pub opened_io: Mutex<Vec<FifoSet>>,
    pub last_task_options: Mutex<Option<TaskOptions>>,
}

impl Shared {
    fn pid(&self) -> u32 {
        1000 + self.next_pid.fetch_add(1, Ordering::SeqCst)
    }

    fn check(&self, op: &'static str) -> EngineResult<()> {
        self.failures.lock().remove(op).map_or(Ok(()), Err)
    }

    /// Never return if `op` was marked with [`FakeEngine::hang_next`].
    async fn gate(&self, op: &'static str) {
        let hang = self.hangs.lock().remove(op);
        if hang {
            std::future::pending::<()>().await;
        }
    }
}

struct Bus {
    events: mpsc::UnboundedSender<Envelope>,
    errors: Option<oneshot::Sender<EngineError>>,
}

/// The fake engine.
#[derive(Default)]
pub struct FakeEngine {
    pub shared: Arc<Shared>,
    containers: Mutex<HashMap<String, Arc<FakeContainer>>>,
    buses: Mutex<Vec<Bus>>,
    subscriptions: AtomicUsize,
    filters: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: EngineError) {
        self.shared.failures.lock().insert(op, err);
    }

    /// Make the next call of `op` block until the caller gives up.
    pub fn hang_next(&self, op: &'static str) {
        self.shared.hangs.lock().insert(op);
    }

    pub fn container(&self, id: &str) -> Option<Arc<FakeContainer>> {
        self.containers.lock().get(id).cloned()
    }

    pub fn task(&self, id: &str) -> Option<Arc<FakeTask>> {
        self.container(id).and_then(|c| c.task.lock().clone())
    }

    /// Add a container (and optionally a task) as if left over from a
    /// previous client.
    pub fn seed(&self, id: &str, status: Option<TaskStatus>) -> Option<Arc<FakeTask>> {
        let ctr = Arc::new(FakeContainer {
            id: id.to_string(),
            spec: Spec::default(),
            shared: self.shared.clone(),
            task: Mutex::new(None),
            deleted: AtomicBool::new(false),
        });
        let task = status.map(|s| {
            let task = FakeTask::new(
                id,
                self.shared.clone(),
                Some(FifoSet::new(std::path::Path::new("/run/fake"), "init", false, false)),
            );
            *task.process.status.lock() = s;
            task
        });
        *ctr.task.lock() = task.clone();
        self.containers.lock().insert(id.to_string(), ctr);
        task
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().clone()
    }

    /// Wait until at least `n` subscriptions have been made.
    pub async fn subscribed(&self, n: usize) {
        for _ in 0..1000 {
            if self.subscriptions() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no subscription after 5s");
    }

    pub fn publish_envelope(&self, envelope: Envelope) {
        self.buses
            .lock()
            .retain(|bus| bus.events.send(envelope.clone()).is_ok());
    }

    pub fn publish<T: Payload>(&self, topic: &str, payload: &T) {
        self.publish_envelope(Envelope {
            timestamp: Utc::now(),
            namespace: NAMESPACE.to_string(),
            topic: topic.to_string(),
            event: Some(Any::pack(payload).unwrap()),
        });
    }

    /// Stop the init process of `id` with `code` and publish its exit.
    pub fn exit_task(&self, id: &str, code: u32) {
        let task = self.task(id).unwrap();
        task.process.stop(code);
        self.publish(
            "/tasks/exit",
            &TaskExit {
                container_id: id.to_string(),
                id: id.to_string(),
                pid: task.process.pid,
                exit_status: code,
                exited_at: Utc::now(),
            },
        );
    }

    /// Stop exec `exec_id` of `id` with `code` and publish its exit.
    pub fn exit_exec(&self, id: &str, exec_id: &str, code: u32) {
        let exec = self.task(id).unwrap().exec_process(exec_id).unwrap();
        exec.process.stop(code);
        self.publish(
            "/tasks/exit",
            &TaskExit {
                container_id: id.to_string(),
                id: exec_id.to_string(),
                pid: exec.process.pid,
                exit_status: code,
                exited_at: Utc::now(),
            },
        );
    }

    pub fn oom(&self, id: &str) {
        self.publish(
            "/tasks/oom",
            &TaskOom {
                container_id: id.to_string(),
            },
        );
    }

    pub fn started(&self, id: &str, pid: u32) {
        self.publish(
            "/tasks/start",
            &TaskStart {
                container_id: id.to_string(),
                pid,
            },
        );
    }

    /// Fail every live subscription with `err`.
    pub fn fail_subscriptions(&self, err: EngineError) {
        for bus in self.buses.lock().iter_mut() {
            if let Some(tx) = bus.errors.take() {
                let _ = tx.send(err.clone());
            }
        }
    }

    /// End every live subscription's event stream.
    pub fn close_subscriptions(&self) {
        self.buses.lock().clear();
    }
}

#[async_trait]
impl RuntimeEngine for FakeEngine {
    async fn version(&self) -> EngineResult<Version> {
        Ok(Version {
            version: "1.0.0-fake".to_string(),
            revision: "deadbeef".to_string(),
        })
    }

    async fn new_container(
        &self,
        id: &str,
        spec: &Spec,
        _runtime: &RuntimeInfo,
    ) -> EngineResult<Arc<dyn EngineContainer>> {
        self.shared.check("new_container")?;
        let mut containers = self.containers.lock();
        if containers
            .get(id)
            .is_some_and(|c| !c.deleted.load(Ordering::SeqCst))
        {
            return Err(EngineError::new(
                Code::AlreadyExists,
                format!("container \"{id}\": already exists"),
            ));
        }
        let ctr = Arc::new(FakeContainer {
            id: id.to_string(),
            spec: spec.clone(),
            shared: self.shared.clone(),
            task: Mutex::new(None),
            deleted: AtomicBool::new(false),
        });
        containers.insert(id.to_string(), ctr.clone());
        Ok(ctr)
    }

    async fn load_container(&self, id: &str) -> EngineResult<Arc<dyn EngineContainer>> {
        self.container(id)
            .filter(|c| !c.deleted.load(Ordering::SeqCst))
            .map(|c| c as Arc<dyn EngineContainer>)
            .ok_or_else(|| {
                EngineError::new(Code::NotFound, format!("container \"{id}\": not found"))
            })
    }

    async fn open_io(&self, fifos: &FifoSet) -> EngineResult<DirectIo> {
        self.shared.check("open_io")?;
        self.shared.opened_io.lock().push(fifos.clone());
        let stdin: Option<BoxWriter> = fifos
            .stdin
            .as_ref()
            .map(|_| Box::new(tokio::io::sink()) as BoxWriter);
        Ok(DirectIo::new(
            fifos.clone(),
            stdin,
            Some(Box::new(tokio::io::empty())),
            fifos
                .stderr
                .as_ref()
                .map(|_| Box::new(tokio::io::empty()) as BoxReader),
        ))
    }

    fn content_store(&self) -> Arc<dyn ContentStore> {
        self.shared.store.clone()
    }

    async fn delete_image(&self, name: &str) -> EngineResult<()> {
        self.shared.deleted_images.lock().push(name.to_string());
        Ok(())
    }

    fn subscribe(&self, filters: &[String]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = oneshot::channel();
        *self.filters.lock() = filters.to_vec();
        self.buses.lock().push(Bus {
            events: tx,
            errors: Some(err_tx),
        });
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Subscription {
            events: UnboundedReceiverStream::new(rx).boxed(),
            errors: err_rx,
        }
    }
}

pub struct FakeContainer {
    pub id: String,
    pub spec: Spec,
    shared: Arc<Shared>,
    pub task: Mutex<Option<Arc<FakeTask>>>,
    pub deleted: AtomicBool,
}

#[async_trait]
impl EngineContainer for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn spec(&self) -> EngineResult<Spec> {
        Ok(self.spec.clone())
    }

    async fn new_task(
        &self,
        io: Arc<dyn ProcessIo>,
        opts: TaskOptions,
    ) -> EngineResult<Arc<dyn EngineTask>> {
        self.shared.gate("new_task").await;
        self.shared.check("new_task")?;
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|t| !t.is_deleted()) {
            return Err(EngineError::new(Code::AlreadyExists, "task already exists"));
        }
        let task = FakeTask::new(&self.id, self.shared.clone(), Some(io.fifos().clone()));
        *task.process.io.lock() = Some(io);
        *task.checkpoint.lock() = opts.checkpoint.clone();
        *self.shared.last_task_options.lock() = Some(opts);
        *slot = Some(task.clone());
        Ok(task)
    }

    async fn task(&self) -> EngineResult<Arc<dyn EngineTask>> {
        self.task
            .lock()
            .clone()
            .filter(|t| !t.is_deleted())
            .map(|t| t as Arc<dyn EngineTask>)
            .ok_or_else(|| {
                EngineError::new(
                    Code::NotFound,
                    format!("no running task found: task {} not found", self.id),
                )
            })
    }

    async fn delete(&self) -> EngineResult<()> {
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|t| !t.is_deleted()) {
            return Err(EngineError::new(
                Code::FailedPrecondition,
                "cannot delete a container with an existing task",
            ));
        }
        *slot = None;
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// State common to tasks and exec processes.
pub struct FakeProcess {
    pub id: String,
    pub pid: u32,
    pub status: Mutex<TaskStatus>,
    pub exit_code: AtomicU32,
    pub io: Mutex<Option<Arc<dyn ProcessIo>>>,
    pub stdin_closed: AtomicBool,
    pub signals: Mutex<Vec<i32>>,
    pub resized: Mutex<Option<(u32, u32)>>,
    pub deleted: AtomicBool,
    shared: Arc<Shared>,
    start_op: &'static str,
}

impl FakeProcess {
    fn new(id: &str, shared: Arc<Shared>, start_op: &'static str) -> Self {
        Self {
            id: id.to_string(),
            pid: shared.pid(),
            status: Mutex::new(TaskStatus::Created),
            exit_code: AtomicU32::new(0),
            io: Mutex::new(None),
            stdin_closed: AtomicBool::new(false),
            signals: Mutex::new(Vec::new()),
            resized: Mutex::new(None),
            deleted: AtomicBool::new(false),
            shared,
            start_op,
        }
    }

    pub fn stop(&self, code: u32) {
        *self.status.lock() = TaskStatus::Stopped;
        self.exit_code.store(code, Ordering::SeqCst);
    }

    fn release(&self) -> EngineResult<ExitStatus> {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return Err(EngineError::new(
                Code::NotFound,
                format!("process {} not found", self.id),
            ));
        }
        if let Some(io) = self.io.lock().take() {
            io.close();
        }
        Ok(ExitStatus::new(self.exit_code.load(Ordering::SeqCst), Utc::now()))
    }

    async fn start(&self) -> EngineResult<()> {
        self.shared.gate(self.start_op).await;
        self.shared.check(self.start_op)?;
        *self.status.lock() = TaskStatus::Running;
        Ok(())
    }

    fn kill(&self, signal: i32) -> EngineResult<()> {
        if *self.status.lock() == TaskStatus::Stopped {
            return Err(EngineError::new(
                Code::NotFound,
                "process already finished: not found",
            ));
        }
        self.signals.lock().push(signal);
        if signal == 9 {
            self.stop(128 + 9);
        }
        Ok(())
    }
}

pub struct FakeTask {
    pub process: FakeProcess,
    fifos: Option<FifoSet>,
    pub checkpoint: Mutex<Option<Descriptor>>,
    pub execs: Mutex<HashMap<String, Arc<FakeExec>>>,
    pub container_id: String,
}

impl FakeTask {
    fn new(id: &str, shared: Arc<Shared>, fifos: Option<FifoSet>) -> Arc<Self> {
        Arc::new(Self {
            process: FakeProcess::new(id, shared, "start"),
            fifos,
            checkpoint: Mutex::new(None),
            execs: Mutex::new(HashMap::new()),
            container_id: id.to_string(),
        })
    }

    pub fn exec_process(&self, id: &str) -> Option<Arc<FakeExec>> {
        self.execs.lock().get(id).cloned()
    }

    pub fn status(&self) -> TaskStatus {
        *self.process.status.lock()
    }

    pub fn is_deleted(&self) -> bool {
        self.process.deleted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineProcess for FakeTask {
    fn id(&self) -> &str {
        &self.process.id
    }

    fn pid(&self) -> u32 {
        self.process.pid
    }

    async fn start(&self) -> EngineResult<()> {
        self.process.start().await
    }

    async fn kill(&self, signal: i32) -> EngineResult<()> {
        self.process.kill(signal)
    }

    async fn resize(&self, width: u32, height: u32) -> EngineResult<()> {
        *self.process.resized.lock() = Some((width, height));
        Ok(())
    }

    async fn close_stdin(&self) -> EngineResult<()> {
        self.process.stdin_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> EngineResult<TaskStatus> {
        Ok(*self.process.status.lock())
    }

    async fn delete(&self) -> EngineResult<ExitStatus> {
        self.process.shared.check("delete_task")?;
        self.process.release()
    }
}

#[async_trait]
impl EngineTask for FakeTask {
    fn fifos(&self) -> Option<FifoSet> {
        self.fifos.clone()
    }

    fn set_io(&self, io: Arc<dyn ProcessIo>) {
        *self.process.io.lock() = Some(io);
    }

    async fn pause(&self) -> EngineResult<()> {
        let mut status = self.process.status.lock();
        if *status != TaskStatus::Running {
            return Err(EngineError::new(Code::FailedPrecondition, "task is not running"));
        }
        *status = TaskStatus::Paused;
        Ok(())
    }

    async fn resume(&self) -> EngineResult<()> {
        let mut status = self.process.status.lock();
        if *status != TaskStatus::Paused {
            return Err(EngineError::new(Code::FailedPrecondition, "task is not paused"));
        }
        *status = TaskStatus::Running;
        Ok(())
    }

    async fn metrics(&self) -> EngineResult<Metrics> {
        let data = serde_json::json!({
            "pids": { "current": 1 + self.execs.lock().len(), "limit": 100 },
            "memory": { "usage": 4096, "limit": 1_048_576 }
        });
        Ok(Metrics {
            timestamp: Utc::now(),
            data: Any {
                type_url: "io.containerd.cgroups.v1.Metrics".to_string(),
                value: Bytes::from(serde_json::to_vec(&data).unwrap()),
            },
        })
    }

    async fn pids(&self) -> EngineResult<Vec<ProcessInfo>> {
        let mut infos = vec![ProcessInfo {
            pid: self.process.pid,
            info: None,
        }];
        for (id, exec) in self.execs.lock().iter() {
            infos.push(ProcessInfo {
                pid: exec.process.pid,
                info: Some(Any {
                    type_url: "containerd.runc.v1.ProcessDetails".to_string(),
                    value: Bytes::from(
                        serde_json::to_vec(&serde_json::json!({ "exec_id": id })).unwrap(),
                    ),
                }),
            });
        }
        Ok(infos)
    }

    async fn checkpoint(&self, opts: CheckpointOptions) -> EngineResult<CheckpointImage> {
        self.process.shared.check("checkpoint")?;
        let store = &self.process.shared.store;

        let mut builder = tar::Builder::new(Vec::new());
        let dump = format!("pid={}", self.process.pid);
        let mut header = tar::Header::new_gnu();
        header.set_size(dump.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pages-1.img", dump.as_bytes())
            .unwrap();
        let dump = Bytes::from(builder.into_inner().unwrap());
        let dump_size = dump.len() as i64;
        let dump_digest = store.write("checkpoint-dump", dump, Labels::new()).await?;

        let config = Bytes::from_static(b"{}");
        let config_digest = store.write("checkpoint-config", config, Labels::new()).await?;

        let index = ImageIndex::new(vec![
            Descriptor::new(media_types::CHECKPOINT_CONFIG, config_digest, 2),
            Descriptor::new(media_types::CHECKPOINT, dump_digest, dump_size),
        ]);
        let index = Bytes::from(serde_json::to_vec(&index).unwrap());
        let index_size = index.len() as i64;
        let index_digest = store.write("checkpoint-index", index, Labels::new()).await?;

        if opts.exit {
            self.process.stop(0);
        }
        Ok(CheckpointImage {
            name: format!("checkpoint/{}", self.container_id),
            target: Descriptor::new(media_types::INDEX, index_digest, index_size),
        })
    }

    async fn exec(
        &self,
        id: &str,
        _spec: &Process,
        io: Arc<dyn ProcessIo>,
    ) -> EngineResult<Arc<dyn EngineProcess>> {
        self.process.shared.check("exec")?;
        let mut execs = self.execs.lock();
        if execs
            .get(id)
            .is_some_and(|e| !e.process.deleted.load(Ordering::SeqCst))
        {
            return Err(EngineError::new(
                Code::AlreadyExists,
                format!("id {id}: already exists"),
            ));
        }
        let exec = Arc::new(FakeExec {
            process: FakeProcess::new(id, self.process.shared.clone(), "exec_start"),
        });
        *exec.process.io.lock() = Some(io);
        execs.insert(id.to_string(), exec.clone());
        Ok(exec)
    }
}

pub struct FakeExec {
    pub process: FakeProcess,
}

#[async_trait]
impl EngineProcess for FakeExec {
    fn id(&self) -> &str {
        &self.process.id
    }

    fn pid(&self) -> u32 {
        self.process.pid
    }

    async fn start(&self) -> EngineResult<()> {
        self.process.start().await
    }

    async fn kill(&self, signal: i32) -> EngineResult<()> {
        self.process.kill(signal)
    }

    async fn resize(&self, width: u32, height: u32) -> EngineResult<()> {
        *self.process.resized.lock() = Some((width, height));
        Ok(())
    }

    async fn close_stdin(&self) -> EngineResult<()> {
        self.process.stdin_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> EngineResult<TaskStatus> {
        Ok(*self.process.status.lock())
    }

    async fn delete(&self) -> EngineResult<ExitStatus> {
        self.process.release()
    }
}

/// Content store keyed by sha256 digest.
#[derive(Default)]
pub struct FakeStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    pub writes: Mutex<Vec<(String, String, Labels)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn contains(&self, digest: &str) -> bool {
        self.blobs.lock().contains_key(digest)
    }

    pub fn blob(&self, digest: &str) -> Option<Bytes> {
        self.blobs.lock().get(digest).cloned()
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn write(&self, reference: &str, data: Bytes, labels: Labels) -> EngineResult<String> {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&data)));
        self.writes
            .lock()
            .push((reference.to_string(), digest.clone(), labels));
        self.blobs.lock().insert(digest.clone(), data);
        Ok(digest)
    }

    async fn read(&self, digest: &str) -> EngineResult<Bytes> {
        self.blob(digest)
            .ok_or_else(|| missing_blob(digest))
    }

    async fn delete(&self, digest: &str) -> EngineResult<()> {
        self.deleted.lock().push(digest.to_string());
        self.blobs
            .lock()
            .remove(digest)
            .map(|_| ())
            .ok_or_else(|| missing_blob(digest))
    }
}

fn missing_blob(digest: &str) -> EngineError {
    EngineError::new(Code::NotFound, format!("content digest {digest}: not found"))
}

/// Unpack a tar blob into a map of path to contents.
pub fn untar(data: &[u8]) -> HashMap<String, Vec<u8>> {
    let mut files = HashMap::new();
    let mut archive = tar::Archive::new(Cursor::new(data));
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.header().entry_type().is_file() {
            let path = entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut buf).unwrap();
            files.insert(path, buf);
        }
    }
    files
}

/// One backend notification.
pub type Recorded = (String, EventKind, EventInfo);

/// Backend forwarding every event to a channel.
pub struct RecordingBackend {
    tx: mpsc::UnboundedSender<Recorded>,
    /// Per-container processing delay.
    delays: Mutex<HashMap<String, Duration>>,
    /// Fail events of this kind after recording them.
    fail_kind: Mutex<Option<EventKind>>,
}

impl RecordingBackend {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                delays: Mutex::new(HashMap::new()),
                fail_kind: Mutex::new(None),
            }),
            rx,
        )
    }

    pub fn delay(&self, container_id: &str, delay: Duration) {
        self.delays.lock().insert(container_id.to_string(), delay);
    }

    pub fn fail(&self, kind: EventKind) {
        *self.fail_kind.lock() = Some(kind);
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn process_event(
        &self,
        container_id: &str,
        kind: EventKind,
        info: EventInfo,
    ) -> BockResult<()> {
        let delay = self.delays.lock().get(container_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let _ = self.tx.send((container_id.to_string(), kind, info));
        if *self.fail_kind.lock() == Some(kind) {
            return Err(BockError::system("backend rejected event"));
        }
        Ok(())
    }
}

/// Attacher keeping the stdin writers it is handed.
#[derive(Default)]
pub struct Attacher {
    pub stdins: Mutex<Vec<BoxWriter>>,
    pub handles: Mutex<Vec<Arc<dyn ProcessIo>>>,
    pub fail: AtomicBool,
}

impl Attacher {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn take_stdin(&self) -> Option<BoxWriter> {
        self.stdins.lock().pop()
    }
}

#[async_trait]
impl AttachStdio for Attacher {
    async fn attach(&self, mut io: DirectIo) -> BockResult<Arc<dyn ProcessIo>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BockError::system("attach refused"));
        }
        if let Some(stdin) = io.stdin.take() {
            self.stdins.lock().push(stdin);
        }
        let handle = io.handle();
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }
}

/// A client wired to a fake engine and a recording backend.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub backend: Arc<RecordingBackend>,
    pub events: mpsc::UnboundedReceiver<Recorded>,
    pub client: Client,
    pub cancel: CancellationToken,
    pub attacher: Attacher,
    pub root: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|c| c).await
    }

    pub async fn with_config(f: impl FnOnce(ClientConfig) -> ClientConfig) -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = f(ClientConfig::default()
            .with_root(root.path())
            .with_event_retry_backoff(Duration::from_millis(20)));
        let engine = FakeEngine::new();
        let (backend, events) = RecordingBackend::new();
        let client = Client::new(engine.clone(), backend.clone(), config);
        engine.subscribed(1).await;
        Self {
            engine,
            backend,
            events,
            client,
            cancel: CancellationToken::new(),
            attacher: Attacher::default(),
            root,
        }
    }

    /// Create and start `id`, returning the task pid.
    pub async fn run(&self, id: &str) -> u32 {
        self.client
            .create(&self.cancel, id, &Spec::default(), None)
            .await
            .unwrap();
        self.client
            .start(&self.cancel, id, None, false, &self.attacher)
            .await
            .unwrap()
    }

    /// Next backend notification, failing after 5s.
    pub async fn next_event(&mut self) -> Recorded {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for backend event")
            .expect("backend channel closed")
    }

    /// Assert no backend notification arrives within 100ms.
    pub async fn no_event(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await;
        assert!(res.is_err(), "unexpected backend event: {res:?}");
    }
}

/// Poll `f` until it returns true, failing after 5s.
pub async fn eventually(mut f: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met after 5s");
}

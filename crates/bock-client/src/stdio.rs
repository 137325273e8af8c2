//! Standard I/O wiring between processes and their attachers.
//!
//! A process's stdio is described by a [`FifoSet`]. The engine opens it as a
//! [`DirectIo`] binding, which is handed to an [`AttachStdio`] implementation
//! that takes the streams it needs and returns the handle the engine keeps
//! for the life of the process.
//!
//! The binding is released exactly once: on every failure path before the
//! attacher succeeds (including panics and dropped futures) the client cancels
//! and closes it; after success the returned handle owns it.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use bock_common::BockResult;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineResult;

/// Boxed writer end of a process stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed reader end of a process stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Engine error text seen when stdin is closed on a torn-down process.
const TRANSPORT_CLOSING: &str = "transport is closing";

/// Paths of the standard streams of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoSet {
    /// Stdin path, if stdin is attached.
    pub stdin: Option<PathBuf>,
    /// Stdout path.
    pub stdout: Option<PathBuf>,
    /// Stderr path; absent when a terminal merges it into stdout.
    pub stderr: Option<PathBuf>,
    /// Whether the process has a terminal.
    pub terminal: bool,
}

impl FifoSet {
    /// Endpoint set for `process_id` inside `bundle`.
    #[must_use]
    pub fn new(bundle: &Path, process_id: &str, with_stdin: bool, terminal: bool) -> Self {
        let stream = |name: &str| bundle.join(format!("{process_id}-{name}"));
        Self {
            stdin: with_stdin.then(|| stream("stdin")),
            stdout: Some(stream("stdout")),
            stderr: (!terminal).then(|| stream("stderr")),
            terminal,
        }
    }

    /// Every path in the set.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        [&self.stdin, &self.stdout, &self.stderr]
            .into_iter()
            .filter_map(|p| p.as_deref())
    }

    /// Remove the endpoints from disk. Failures are logged.
    pub fn close(&self) {
        for path in self.paths() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove fifo");
                }
            }
        }
    }
}

/// Handle kept by the engine for a process's stdio.
pub trait ProcessIo: Send + Sync {
    /// The endpoint set behind this handle.
    fn fifos(&self) -> &FifoSet;

    /// Stop any copy loops still running.
    fn cancel(&self);

    /// Release the endpoints. Idempotent.
    fn close(&self);
}

/// Lifecycle of one opened endpoint set, shared by every view of it.
#[derive(Debug)]
struct Binding {
    fifos: FifoSet,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl ProcessIo for Binding {
    fn fifos(&self) -> &FifoSet {
        &self.fifos
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.fifos.close();
        }
    }
}

/// A native IO binding: the opened streams of an endpoint set.
///
/// Attachers take the streams they need (`Option::take`) and typically
/// return [`DirectIo::handle`] as the [`ProcessIo`] handle.
pub struct DirectIo {
    /// Writer feeding the process's stdin.
    pub stdin: Option<BoxWriter>,
    /// Reader of the process's stdout.
    pub stdout: Option<BoxReader>,
    /// Reader of the process's stderr.
    pub stderr: Option<BoxReader>,
    binding: Arc<Binding>,
}

impl DirectIo {
    /// Wrap already-opened streams of `fifos`.
    #[must_use]
    pub fn new(
        fifos: FifoSet,
        stdin: Option<BoxWriter>,
        stdout: Option<BoxReader>,
        stderr: Option<BoxReader>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            binding: Arc::new(Binding {
                fifos,
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Token cancelled when the binding is cancelled; copy loops select on it.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.binding.cancel.clone()
    }

    /// Returns true once the binding has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.binding.closed.load(Ordering::SeqCst)
    }

    /// The endpoint set behind this binding.
    #[must_use]
    pub fn fifos(&self) -> &FifoSet {
        &self.binding.fifos
    }

    /// Lifecycle handle of the binding, independent of the streams.
    #[must_use]
    pub fn handle(&self) -> Arc<dyn ProcessIo> {
        self.binding.clone()
    }
}

impl std::fmt::Debug for DirectIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("fifos", &self.binding.fifos)
            .finish()
    }
}

/// Caller-supplied attachment of process stdio.
#[async_trait]
pub trait AttachStdio: Send + Sync {
    /// Take ownership of `io` and return the handle the engine should keep.
    async fn attach(&self, io: DirectIo) -> BockResult<Arc<dyn ProcessIo>>;
}

/// Cancels and closes an IO handle when dropped, unless committed.
#[must_use = "dropping the guard releases the IO immediately"]
pub struct IoGuard {
    io: Option<Arc<dyn ProcessIo>>,
}

impl IoGuard {
    /// Guard `io`.
    pub fn new(io: Arc<dyn ProcessIo>) -> Self {
        Self { io: Some(io) }
    }

    /// A guard with nothing to release yet.
    pub const fn empty() -> Self {
        Self { io: None }
    }

    /// Start guarding `io`, releasing anything guarded before.
    pub fn arm(&mut self, io: Arc<dyn ProcessIo>) {
        if let Some(old) = self.io.replace(io) {
            release(old.as_ref());
        }
    }

    /// Ownership has moved elsewhere; do not release.
    pub fn commit(mut self) {
        self.io = None;
    }
}

impl Drop for IoGuard {
    fn drop(&mut self) {
        if let Some(io) = self.io.take() {
            release(io.as_ref());
        }
    }
}

fn release(io: &dyn ProcessIo) {
    io.cancel();
    io.close();
}

/// Create the single-use stdin-close synchronization signal.
///
/// The [`StdinCloseSignal`] fires when [`StdinCloseSignal::fire`] is called
/// or when it is dropped, whichever comes first.
#[must_use]
pub fn stdin_close_sync() -> (StdinCloseSignal, StdinCloseWait) {
    let (tx, rx) = oneshot::channel();
    (StdinCloseSignal(tx), StdinCloseWait(rx))
}

/// Sending half of the stdin-close signal.
#[derive(Debug)]
pub struct StdinCloseSignal(oneshot::Sender<()>);

impl StdinCloseSignal {
    /// Allow deferred stdin closes to proceed.
    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

/// Receiving half of the stdin-close signal.
#[derive(Debug)]
pub struct StdinCloseWait(oneshot::Receiver<()>);

impl StdinCloseWait {
    /// Wait until the signal fires or its sender is gone.
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

/// Asks the engine to close a process's input.
pub type CloseInput = Box<dyn FnOnce() -> BoxFuture<'static, EngineResult<()>> + Send>;

/// How to close a process's input once its stdin pipe is shut.
pub struct StdinCloseHook {
    wait: StdinCloseWait,
    close_input: CloseInput,
    runtime: Handle,
}

impl StdinCloseHook {
    /// Run `close_input` after `wait` fires.
    ///
    /// The close runs on the current runtime, so the closer may be shut
    /// down from any thread.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(wait: StdinCloseWait, close_input: CloseInput) -> Self {
        Self {
            wait,
            close_input,
            runtime: Handle::current(),
        }
    }

    fn spawn(self) {
        let runtime = self.runtime.clone();
        runtime.spawn(self.run());
    }

    async fn run(self) {
        self.wait.wait().await;
        match (self.close_input)().await {
            Ok(()) => {}
            Err(e) if e.message().contains(TRANSPORT_CLOSING) => {}
            Err(e) => tracing::warn!(error = %e, "failed to close process stdin"),
        }
    }
}

/// Stdin writer whose first shutdown also closes the process's input.
///
/// Later shutdowns are no-ops; writes after shutdown fail with
/// [`io::ErrorKind::BrokenPipe`].
pub struct StdinCloser {
    pipe: Option<BoxWriter>,
    hook: Option<StdinCloseHook>,
}

impl StdinCloser {
    /// Wrap `pipe`.
    pub fn new(pipe: BoxWriter, hook: StdinCloseHook) -> Self {
        Self {
            pipe: Some(pipe),
            hook: Some(hook),
        }
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")
    }
}

impl AsyncWrite for StdinCloser {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_write(cx, buf),
            None => Poll::Ready(Err(Self::closed())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(pipe) = self.pipe.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(pipe).poll_shutdown(cx));
        self.pipe = None;
        // The engine call must wait for Start/Exec to publish the process,
        // so it cannot run inline.
        if let Some(hook) = self.hook.take() {
            hook.spawn();
        }
        Poll::Ready(result)
    }
}

/// Wire `io` to `attacher`.
///
/// With a `stdin_hook`, the stdin stream is wrapped in a [`StdinCloser`].
/// If the attacher fails the binding is cancelled and closed before the
/// error is returned.
///
/// # Errors
///
/// Returns the attacher's error.
pub async fn attach(
    mut io: DirectIo,
    stdin_hook: Option<StdinCloseHook>,
    attacher: &dyn AttachStdio,
) -> BockResult<Arc<dyn ProcessIo>> {
    let guard = IoGuard::new(io.handle());

    if let Some(hook) = stdin_hook {
        if let Some(pipe) = io.stdin.take() {
            io.stdin = Some(Box::new(StdinCloser::new(pipe, hook)));
        }
    }

    let attached = attacher.attach(io).await?;
    guard.commit();
    Ok(attached)
}

//! Container and task lifecycle: create, restore, start, exec, delete.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use bock_common::{BockError, BockPaths, BockResult};
use bock_oci::runtime::Process;
use bock_oci::{Spec, TaskStatus};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::{Client, call};
use crate::engine::{EngineProcess, ExitStatus, RuntimeInfo, TaskOptions};
use crate::errors::{translate, wrap};
use crate::registry::{Container, INIT_PROCESS};
use crate::stdio::{
    self, AttachStdio, FifoSet, IoGuard, ProcessIo, StdinCloseHook, StdinCloseWait,
    stdin_close_sync,
};

impl Client {
    /// Create container `id` from `spec` without starting it.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Conflict`] if the ID is in use, a System error
    /// if the bundle cannot be written, or the translated engine error.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        id: &str,
        spec: &Spec,
        runtime_options: Option<serde_json::Value>,
    ) -> BockResult<()> {
        let reservation = self.registry.reserve(id)?;

        let bundle = self.config.bundle_dir(id);
        prepare_bundle(&bundle, spec).await?;
        tracing::debug!(container = %id, bundle = %bundle.display(), "bundle dir created");

        let runtime = RuntimeInfo::for_host(runtime_options);
        let ctr = match call(cancel, self.engine.new_container(id, spec, &runtime)).await {
            Ok(ctr) => ctr,
            Err(e) => {
                self.remove_bundle(id, &bundle).await;
                return Err(translate(e));
            }
        };

        reservation.fill(Arc::new(Container::new(id, bundle, ctr)));
        Ok(())
    }

    /// Re-attach to container `id`, which already exists at the engine.
    ///
    /// Returns whether its task is alive and the task's pid; a container
    /// without a task restores as `(false, 0)`. Must not be called
    /// concurrently with any other operation on the same ID.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Conflict`] if the ID is in use, or the attach or
    /// translated engine error.
    pub async fn restore(
        &self,
        cancel: &CancellationToken,
        id: &str,
        attacher: &dyn AttachStdio,
    ) -> BockResult<(bool, u32)> {
        let reservation = self.registry.reserve(id)?;
        let ctr = wrap(call(cancel, self.engine.load_container(id)).await)?;

        let task = match call(cancel, ctr.task()).await {
            Ok(task) => Some(task),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(translate(e)),
        };

        let mut guard = IoGuard::empty();
        let (mut alive, mut pid) = (false, 0);
        if let Some(task) = &task {
            if let Some(fifos) = task.fifos() {
                let dio = wrap(call(cancel, self.engine.open_io(&fifos)).await)?;
                let io = stdio::attach(dio, None, attacher).await?;
                guard.arm(io.clone());
                task.set_io(io);
            }
            let status = wrap(call(cancel, task.status()).await)?;
            alive = status.is_alive();
            pid = task.pid();
        }

        let container = Arc::new(Container::new(id, self.config.bundle_dir(id), ctr));
        container.set_task(task);
        reservation.fill(container);
        guard.commit();

        tracing::debug!(container = %id, alive, pid, "restored container");
        Ok((alive, pid))
    }

    /// Create and start the task of container `id`, returning its pid.
    ///
    /// With `checkpoint_dir`, the task is restored from that checkpoint.
    ///
    /// # Errors
    ///
    /// Returns NotFound for an unknown container, Conflict if it already has
    /// a task, a System error if the checkpoint cannot be uploaded, or the
    /// attach or translated engine error.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        id: &str,
        checkpoint_dir: Option<&Path>,
        with_stdin: bool,
        attacher: &dyn AttachStdio,
    ) -> BockResult<u32> {
        let ctr = self.registry.container(id)?;
        let _claim = ctr.claim_task()?;

        let checkpoint = match checkpoint_dir {
            Some(dir) => Some(self.upload_checkpoint(cancel, dir).await?),
            None => None,
        };

        let opts = TaskOptions {
            checkpoint: checkpoint.clone(),
            no_pivot_root: self.config.no_pivot_root,
            ..TaskOptions::default()
        };
        let result = self.start_task(cancel, &ctr, opts, with_stdin, attacher).await;

        if let Some(cp) = checkpoint {
            self.discard_blob(&cp.digest).await;
        }
        result
    }

    async fn start_task(
        &self,
        cancel: &CancellationToken,
        ctr: &Container,
        mut opts: TaskOptions,
        with_stdin: bool,
        attacher: &dyn AttachStdio,
    ) -> BockResult<u32> {
        let spec = wrap(call(cancel, ctr.engine_container().spec()).await)?;
        (opts.io_uid, opts.io_gid) = spec.io_owner();

        let fifos = FifoSet::new(ctr.bundle_dir(), INIT_PROCESS, with_stdin, spec.terminal());
        let (signal, wait) = stdin_close_sync();
        let io = self
            .create_io(cancel, fifos, ctr.id(), INIT_PROCESS, wait, attacher)
            .await?;

        let guard = IoGuard::new(io.clone());
        let task = match call(cancel, ctr.engine_container().new_task(io, opts)).await {
            Ok(task) => task,
            Err(e) => {
                signal.fire();
                drop(guard);
                return Err(translate(e));
            }
        };
        guard.commit();

        ctr.set_task(Some(task.clone()));
        signal.fire();

        if let Err(e) = call(cancel, task.start()).await {
            if let Err(de) = task.delete().await {
                tracing::error!(
                    container = %ctr.id(),
                    error = %de,
                    "failed to delete task after fail start"
                );
            }
            ctr.set_task(None);
            return Err(translate(e));
        }
        Ok(task.pid())
    }

    /// Run `spec` as exec process `process_id` in container `container_id`,
    /// returning its pid.
    ///
    /// # Errors
    ///
    /// Returns NotFound for an unknown container, InvalidParameter if it has
    /// no task, Conflict if `process_id` is in use, or the attach or
    /// translated engine error.
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        container_id: &str,
        process_id: &str,
        spec: &Process,
        with_stdin: bool,
        attacher: &dyn AttachStdio,
    ) -> BockResult<u32> {
        let ctr = self.registry.container(container_id)?;
        let task = ctr
            .task()
            .ok_or_else(|| BockError::invalid_parameter("container is not running"))?;
        let _claim = ctr.claim_process(process_id)?;

        let fifos = FifoSet::new(ctr.bundle_dir(), process_id, with_stdin, spec.terminal);
        let (signal, wait) = stdin_close_sync();
        let io = self
            .create_io(cancel, fifos, container_id, process_id, wait, attacher)
            .await?;
        let guard = IoGuard::new(io.clone());

        let process = wrap(call(cancel, task.exec(process_id, spec, io)).await)?;
        if let Err(e) = ctr.add_process(process_id, process.clone()) {
            self.discard_exec(container_id, process_id, process.as_ref()).await;
            return Err(e);
        }

        // Stdin of an exec process only exists once it has started.
        let started = call(cancel, process.start()).await;
        signal.fire();
        if let Err(e) = started {
            self.discard_exec(container_id, process_id, process.as_ref()).await;
            ctr.delete_process(process_id);
            return Err(translate(e));
        }
        guard.commit();
        Ok(process.pid())
    }

    /// Status of the task of container `id`.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the container or its task is missing, or the
    /// translated engine error.
    pub async fn status(&self, cancel: &CancellationToken, id: &str) -> BockResult<TaskStatus> {
        let ctr = self.registry.container(id)?;
        let task = ctr
            .task()
            .ok_or_else(|| BockError::not_found("no such task"))?;
        wrap(call(cancel, task.status()).await)
    }

    /// Delete the task of container `id`, returning how it exited.
    ///
    /// Never fails: if the task cannot be found or deleted the exit status is
    /// [`ExitStatus::unknown`].
    pub async fn delete_task(&self, cancel: &CancellationToken, id: &str) -> ExitStatus {
        let task = match self.registry.resolve(id, INIT_PROCESS) {
            Ok(task) => task,
            Err(e) => {
                tracing::debug!(container = %id, error = %e, "no task to delete");
                return ExitStatus::unknown();
            }
        };
        match call(cancel, task.delete()).await {
            Ok(status) => {
                if let Some(ctr) = self.registry.get(id) {
                    ctr.set_task(None);
                }
                status
            }
            Err(e) => {
                tracing::debug!(container = %id, error = %e, "failed to delete task");
                ExitStatus::unknown()
            }
        }
    }

    /// Delete container `id` and its bundle.
    ///
    /// # Errors
    ///
    /// Returns NotFound for an unknown container, or the translated engine
    /// error.
    pub async fn delete(&self, cancel: &CancellationToken, id: &str) -> BockResult<()> {
        let ctr = self.registry.container(id)?;
        wrap(call(cancel, ctr.engine_container().delete()).await)?;
        self.remove_bundle(id, ctr.bundle_dir()).await;
        self.registry.remove(id);
        Ok(())
    }

    /// Open the engine IO for `fifos` and hand it to `attacher`, wiring
    /// stdin closes to the process once `wait` fires.
    async fn create_io(
        &self,
        cancel: &CancellationToken,
        fifos: FifoSet,
        container_id: &str,
        process_id: &str,
        wait: StdinCloseWait,
        attacher: &dyn AttachStdio,
    ) -> BockResult<Arc<dyn ProcessIo>> {
        let dio = wrap(call(cancel, self.engine.open_io(&fifos)).await)?;

        let registry = self.registry.clone();
        let (container_id, process_id) = (container_id.to_string(), process_id.to_string());
        let hook = StdinCloseHook::new(
            wait,
            Box::new(move || {
                async move {
                    match registry.resolve(&container_id, &process_id) {
                        Ok(process) => process.close_stdin().await,
                        Err(e) => {
                            tracing::debug!(
                                container = %container_id,
                                process = %process_id,
                                error = %e,
                                "process gone before stdin close"
                            );
                            Ok(())
                        }
                    }
                }
                .boxed()
            }),
        );
        stdio::attach(dio, Some(hook), attacher).await
    }

    async fn discard_exec(
        &self,
        container_id: &str,
        process_id: &str,
        process: &dyn EngineProcess,
    ) {
        match tokio::time::timeout(self.config.exec_cleanup_timeout, process.delete()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(
                container = %container_id,
                process = %process_id,
                error = %e,
                "failed to delete exec process"
            ),
            Err(_) => tracing::warn!(
                container = %container_id,
                process = %process_id,
                "timed out deleting exec process"
            ),
        }
    }

    async fn remove_bundle(&self, id: &str, bundle: &Path) {
        if self.config.no_clean {
            return;
        }
        match tokio::fs::remove_dir_all(bundle).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    container = %id,
                    bundle = %bundle.display(),
                    error = %e,
                    "failed to remove state dir"
                );
            }
        }
    }
}

/// Create the bundle directory and write the runtime spec into it.
async fn prepare_bundle(bundle: &Path, spec: &Spec) -> BockResult<()> {
    let write = async {
        tokio::fs::create_dir_all(bundle).await?;
        tokio::fs::set_permissions(bundle, std::fs::Permissions::from_mode(0o700)).await?;
        let json = serde_json::to_vec_pretty(spec).map_err(io::Error::other)?;
        tokio::fs::write(BockPaths::bundle_config(bundle), json).await
    };
    write
        .await
        .map_err(|e| BockError::system_with("prepare bundle dir failed", e))
}

//! Checkpoint upload (for restoring a task) and download (after taking one).

use std::io::Cursor;
use std::path::{Path, PathBuf};

use bock_common::{BockError, BockResult};
use bock_oci::image::{labels, media_types};
use bock_oci::{Descriptor, ImageIndex};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

use super::{Client, call};
use crate::engine::{CheckpointOptions, Labels};
use crate::errors::wrap;
use crate::registry::INIT_PROCESS;

impl Client {
    /// Checkpoint the task of container `id` into `dir`.
    ///
    /// With `exit`, the task is stopped once the checkpoint is taken. The
    /// engine-side checkpoint image is always deleted afterwards.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the container or its task is missing, the
    /// translated engine error if the checkpoint fails, and a System error
    /// if the checkpoint cannot be read back or extracted.
    pub async fn create_checkpoint(
        &self,
        cancel: &CancellationToken,
        id: &str,
        dir: &Path,
        exit: bool,
    ) -> BockResult<()> {
        let handle = self.registry.resolve(id, INIT_PROCESS)?;
        let task = handle.as_task()?;
        let image = wrap(call(cancel, task.checkpoint(CheckpointOptions { exit })).await)?;

        let result = self.download_checkpoint(cancel, &image.target, dir).await;

        if let Err(e) = self.engine.delete_image(&image.name).await {
            tracing::warn!(
                container = %id,
                image = %image.name,
                error = %e,
                "failed to delete checkpoint image"
            );
        }
        result
    }

    async fn download_checkpoint(
        &self,
        cancel: &CancellationToken,
        target: &Descriptor,
        dir: &Path,
    ) -> BockResult<()> {
        let store = self.engine.content_store();

        let index = call(cancel, store.read(&target.digest))
            .await
            .map_err(|e| BockError::system_with("failed to retrieve checkpoint data", e))?;
        let index: ImageIndex = serde_json::from_slice(&index)
            .map_err(|e| BockError::system_with("failed to decode checkpoint data", e))?;
        let desc = index
            .find(media_types::CHECKPOINT)
            .ok_or_else(|| BockError::system("invalid checkpoint"))?;

        let blob = call(cancel, store.read(&desc.digest))
            .await
            .map_err(|e| BockError::system_with("failed to get checkpoint reader", e))?;
        extract(blob, dir.to_path_buf())
            .await
            .map_err(|e| BockError::system_with("failed to read checkpoint reader", e))
    }

    /// Archive `dir` into the content store as a checkpoint blob.
    pub(super) async fn upload_checkpoint(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
    ) -> BockResult<Descriptor> {
        let data = archive(dir.to_path_buf())
            .await
            .map_err(|e| BockError::system_with("failed to close checkpoint tar stream", e))?;
        let size = i64::try_from(data.len()).unwrap_or(i64::MAX);

        let mut gc_labels = Labels::new();
        gc_labels.insert(
            labels::GC_ROOT.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let reference = dir.to_string_lossy();
        let digest = call(cancel, self.engine.content_store().write(&reference, data, gc_labels))
            .await
            .map_err(|e| BockError::system_with("failed to upload checkpoint to the runtime", e))?;

        tracing::debug!(digest = %digest, size, "uploaded checkpoint");
        Ok(Descriptor::new(media_types::CHECKPOINT, digest, size))
    }

    /// Best-effort removal of a temporary blob.
    pub(super) async fn discard_blob(&self, digest: &str) {
        if let Err(e) = self.engine.content_store().delete(digest).await {
            tracing::warn!(
                digest = %digest,
                error = %e,
                "failed to delete temporary checkpoint entry"
            );
        }
    }
}

/// Tar the contents of `dir`.
async fn archive(dir: PathBuf) -> std::io::Result<Bytes> {
    tokio::task::spawn_blocking(move || {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &dir)?;
        builder.into_inner().map(Bytes::from)
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Unpack tar `data` into `dir`.
async fn extract(data: Bytes, dir: PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        tar::Archive::new(Cursor::new(data)).unpack(&dir)
    })
    .await
    .map_err(std::io::Error::other)?
}

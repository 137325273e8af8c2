//! Process control (signals, terminal, stdin, freezing) and read-only task
//! queries.

use bock_common::{BockError, BockResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Client, call};
use crate::engine::Any;
use crate::errors::wrap;
use crate::registry::INIT_PROCESS;

/// Resource usage sample of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// When the sample was taken.
    pub read: DateTime<Utc>,
    /// Cgroup counters.
    pub metrics: CgroupMetrics,
}

/// Cgroup counters reported for a task. Controllers the runtime did not
/// report are `None`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupMetrics {
    pub pids: Option<PidsStats>,
    pub cpu: Option<CpuStats>,
    pub memory: Option<MemoryStats>,
}

/// Pids controller counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidsStats {
    pub current: u64,
    pub limit: u64,
}

/// CPU controller counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    pub usage: CpuUsage,
    pub throttled_periods: u64,
    pub throttled_time: u64,
}

/// CPU time in nanoseconds.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuUsage {
    pub total: u64,
    pub kernel: u64,
    pub user: u64,
    pub per_cpu: Vec<u64>,
}

/// Memory controller counters in bytes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    pub usage: u64,
    pub max_usage: u64,
    pub limit: u64,
    pub cache: u64,
}

/// One process of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Host pid.
    pub pid: u32,
    /// Exec ID, when the process was started by an exec.
    pub exec_id: Option<String>,
}

/// Runtime-specific details attached to a listed process.
#[derive(Debug, Deserialize)]
struct ProcessDetails {
    #[serde(default)]
    exec_id: Option<String>,
}

impl Client {
    /// Send `signal` to a process; [`INIT_PROCESS`] is the task.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the process is missing, or the translated engine
    /// error.
    pub async fn signal_process(
        &self,
        cancel: &CancellationToken,
        container_id: &str,
        process_id: &str,
        signal: i32,
    ) -> BockResult<()> {
        let process = self.registry.resolve(container_id, process_id)?;
        wrap(call(cancel, process.kill(signal)).await)
    }

    /// Resize a process's terminal.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the process is missing, or the translated engine
    /// error.
    pub async fn resize_terminal(
        &self,
        cancel: &CancellationToken,
        container_id: &str,
        process_id: &str,
        width: u32,
        height: u32,
    ) -> BockResult<()> {
        let process = self.registry.resolve(container_id, process_id)?;
        wrap(call(cancel, process.resize(width, height)).await)
    }

    /// Close a process's stdin.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the process is missing, or the translated engine
    /// error.
    pub async fn close_stdin(
        &self,
        cancel: &CancellationToken,
        container_id: &str,
        process_id: &str,
    ) -> BockResult<()> {
        let process = self.registry.resolve(container_id, process_id)?;
        wrap(call(cancel, process.close_stdin()).await)
    }

    /// Freeze the task of container `id`.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the task is missing, or the translated engine
    /// error.
    pub async fn pause(&self, cancel: &CancellationToken, id: &str) -> BockResult<()> {
        let process = self.registry.resolve(id, INIT_PROCESS)?;
        wrap(call(cancel, process.as_task()?.pause()).await)
    }

    /// Thaw the task of container `id`.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the task is missing, or the translated engine
    /// error.
    pub async fn resume(&self, cancel: &CancellationToken, id: &str) -> BockResult<()> {
        let process = self.registry.resolve(id, INIT_PROCESS)?;
        wrap(call(cancel, process.as_task()?.resume()).await)
    }

    /// Resource usage of the task of container `id`.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the task is missing, a System error if the sample
    /// cannot be decoded, or the translated engine error.
    pub async fn stats(&self, cancel: &CancellationToken, id: &str) -> BockResult<Stats> {
        let process = self.registry.resolve(id, INIT_PROCESS)?;
        let sample = wrap(call(cancel, process.as_task()?.metrics()).await)?;
        let metrics = sample
            .data
            .unpack::<CgroupMetrics>()
            .map_err(|e| BockError::system_with("failed to decode task metrics", e))?;
        Ok(Stats {
            read: sample.timestamp,
            metrics,
        })
    }

    /// Pids of every process in the task of container `id`.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the task is missing, or the translated engine
    /// error.
    pub async fn list_pids(&self, cancel: &CancellationToken, id: &str) -> BockResult<Vec<u32>> {
        let process = self.registry.resolve(id, INIT_PROCESS)?;
        let infos = wrap(call(cancel, process.as_task()?.pids()).await)?;
        Ok(infos.into_iter().map(|p| p.pid).collect())
    }

    /// Every process in the task of container `id`, with its details.
    ///
    /// # Errors
    ///
    /// Returns NotFound if the task is missing, a System error if process
    /// details cannot be decoded, or the translated engine error.
    pub async fn summary(&self, cancel: &CancellationToken, id: &str) -> BockResult<Vec<Summary>> {
        let process = self.registry.resolve(id, INIT_PROCESS)?;
        let infos = wrap(call(cancel, process.as_task()?.pids()).await)?;
        infos
            .into_iter()
            .map(|p| {
                Ok(Summary {
                    pid: p.pid,
                    exec_id: p.info.as_ref().map(decode_details).transpose()?.flatten(),
                })
            })
            .collect()
    }
}

fn decode_details(info: &Any) -> BockResult<Option<String>> {
    info.unpack::<ProcessDetails>()
        .map(|d| d.exec_id)
        .map_err(|e| BockError::system_with("unable to decode process details", e))
}

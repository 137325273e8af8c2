//! Keyed work queue: jobs with the same key run one at a time in submission
//! order; jobs with different keys run concurrently.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

type Job = BoxFuture<'static, ()>;

/// Per-key FIFO of async jobs.
///
/// A key has a worker task only while it has pending jobs. Senders and the
/// retiring worker both go through the map entry, so a job is never queued
/// on a worker that has already decided to exit.
#[derive(Clone, Default)]
pub struct KeyedQueue {
    workers: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl KeyedQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind every earlier job for `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn append<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::pin(job);
        match self.workers.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(job)) = entry.get().send(job) {
                    // The worker died without retiring (runtime shutdown).
                    entry.insert(self.spawn_worker(key, job));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_worker(key, job));
            }
        }
    }

    /// Number of keys with a live worker.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.workers.len()
    }

    fn spawn_worker(&self, key: &str, first: Job) -> mpsc::UnboundedSender<Job> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(first);
        tokio::spawn(drain(key.to_string(), rx, self.workers.clone()));
        tx
    }
}

async fn drain(
    key: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
    workers: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
) {
    loop {
        while let Ok(job) = rx.try_recv() {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                tracing::error!(key = %key, "queued job panicked");
            }
        }
        if workers.remove_if(&key, |_, _| rx.is_empty()).is_some() || rx.is_empty() {
            return;
        }
    }
}

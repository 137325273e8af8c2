//! The runtime client: public lifecycle operations over the engine.
//!
//! A [`Client`] owns the container registry and one background task that
//! consumes the engine's event stream. Operations validate registry state
//! before touching the engine and roll registry state back when an engine
//! call fails.
//!
//! Every operation takes a [`CancellationToken`]. Engine calls race against
//! it; cleanup after a failure does not.

mod checkpoint;
mod control;
mod lifecycle;

use std::future::Future;
use std::sync::Arc;

use bock_common::BockResult;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::engine::{EngineError, EngineResult, RuntimeEngine, Version};
use crate::errors::wrap;
use crate::events::stream::EventProcessor;
use crate::events::{Backend, KeyedQueue};
use crate::registry::Registry;

pub use control::{CgroupMetrics, CpuStats, CpuUsage, MemoryStats, PidsStats, Stats, Summary};

/// Runtime-engine client.
pub struct Client {
    engine: Arc<dyn RuntimeEngine>,
    registry: Arc<Registry>,
    config: ClientConfig,
    cancel: CancellationToken,
    events: Option<JoinHandle<()>>,
}

impl Client {
    /// Create a client and start consuming the engine's task events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        engine: Arc<dyn RuntimeEngine>,
        backend: Arc<dyn Backend>,
        config: ClientConfig,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let cancel = CancellationToken::new();

        let processor = Arc::new(EventProcessor {
            engine: engine.clone(),
            registry: registry.clone(),
            backend,
            queue: KeyedQueue::new(),
            namespace: config.namespace.clone(),
            filters: config.event_filters(),
            retry_backoff: config.event_retry_backoff,
        });
        let events = tokio::spawn(processor.run(cancel.child_token()));

        Self {
            engine,
            registry,
            config,
            cancel,
            events: Some(events),
        }
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns true if container `id` is known (or being restored).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Engine version information.
    ///
    /// # Errors
    ///
    /// Returns the translated engine error.
    pub async fn version(&self, cancel: &CancellationToken) -> BockResult<Version> {
        wrap(call(cancel, self.engine.version()).await)
    }

    /// Stop the event stream and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(events) = self.events.take() {
            if let Err(e) = events.await {
                tracing::warn!(error = %e, "event stream task failed");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run an engine call unless `cancel` fires first.
pub(crate) async fn call<T, F>(cancel: &CancellationToken, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(EngineError::canceled()),
        res = fut => res,
    }
}

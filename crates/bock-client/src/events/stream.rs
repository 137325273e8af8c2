//! Supervised consumer of the engine's event bus.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Backend, EventInfo, EventKind, KeyedQueue, classify};
use crate::engine::events::{Envelope, Subscription, TaskEvent};
use crate::engine::{Code, EngineError, RuntimeEngine};
use crate::registry::{Container, Registry};
use crate::stdio::FifoSet;

/// Decodes engine events and dispatches them per container.
pub(crate) struct EventProcessor {
    pub(crate) engine: Arc<dyn RuntimeEngine>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) queue: KeyedQueue,
    pub(crate) namespace: String,
    pub(crate) filters: Vec<String>,
    pub(crate) retry_backoff: Duration,
}

impl EventProcessor {
    /// Consume events until `cancel` fires, re-subscribing after errors.
    pub(crate) async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let span = tracing::info_span!("bock_client", namespace = %self.namespace);
        async move {
            loop {
                let err = self.consume(self.engine.subscribe(&self.filters), &cancel).await;
                let Some(err) = err else {
                    tracing::info!("event stream stopped");
                    return;
                };
                if err.is_canceled() {
                    tracing::info!("event stream canceled");
                    return;
                }
                tracing::error!(error = %err, "failed to get event");
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::info!("event stream stopped");
                        return;
                    }
                    () = tokio::time::sleep(self.retry_backoff) => {
                        tracing::debug!("re-subscribing to event stream");
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Drain one subscription. Returns the error that ended it, or `None` on
    /// cancellation.
    async fn consume(&self, sub: Subscription, cancel: &CancellationToken) -> Option<EngineError> {
        let Subscription { mut events, mut errors } = sub;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                envelope = events.next() => match envelope {
                    Some(envelope) => self.handle(envelope),
                    None => return Some(EngineError::new(Code::Unavailable, "event stream closed")),
                },
                err = &mut errors => {
                    return Some(err.unwrap_or_else(|_| {
                        EngineError::new(Code::Unavailable, "event error channel closed")
                    }));
                }
            }
        }
    }

    fn handle(&self, envelope: Envelope) {
        let Some(any) = envelope.event else {
            tracing::info!(topic = %envelope.topic, "ignoring event with no payload");
            return;
        };
        let event = match TaskEvent::decode(&any) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    topic = %envelope.topic,
                    error = %e,
                    "failed to decode event payload"
                );
                return;
            }
        };
        let Some((kind, mut info)) = classify(event) else {
            tracing::info!(
                topic = %envelope.topic,
                type_url = %any.type_url,
                "ignoring unknown event"
            );
            return;
        };
        tracing::debug!(topic = %envelope.topic, container = %info.container_id, "received event");

        let Some(ctr) = self.registry.get(&info.container_id) else {
            tracing::warn!(
                container = %info.container_id,
                event = %kind,
                "event for unknown container"
            );
            return;
        };
        if kind == EventKind::Oom {
            ctr.set_oom_killed(true);
        }
        info.oom_killed = ctr.oom_killed();

        let key = info.container_id.clone();
        self.queue.append(&key, dispatch(self.backend.clone(), ctr, kind, info));
    }
}

async fn dispatch(
    backend: Arc<dyn Backend>,
    ctr: Arc<Container>,
    kind: EventKind,
    info: EventInfo,
) {
    if let Err(e) = backend
        .process_event(&info.container_id, kind, info.clone())
        .await
    {
        tracing::error!(
            container = %info.container_id,
            process = %info.process_id,
            event = %kind,
            error = %e,
            "failed to process event"
        );
    }

    if kind != EventKind::Exit || info.process_id == info.container_id {
        return;
    }
    let Some(process) = ctr.process(&info.process_id) else {
        tracing::warn!(
            container = %info.container_id,
            process = %info.process_id,
            "exited process is not registered"
        );
        return;
    };
    if let Err(e) = process.delete().await {
        tracing::warn!(
            container = %info.container_id,
            process = %info.process_id,
            error = %e,
            "failed to delete exited process"
        );
    }
    ctr.delete_process(&info.process_id);
    FifoSet::new(ctr.bundle_dir(), &info.process_id, true, false).close();
}

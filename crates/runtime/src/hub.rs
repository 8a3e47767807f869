//! The Observation Fan-out Hub: bridges the agent's push model with
//! clients' pull-over-socket model, one hub worker per sandbox.

use std::collections::HashMap;
use std::sync::Arc;

use sandboxd_core::{
    config::HubConfig, AuditEvent, Error, EventEmitter, EventSeverity, EventType, NoOpEventEmitter,
    Result,
};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::registry::SandboxExistence;

/// Commands sent to a single sandbox's hub worker. The worker is the sole
/// owner of that sandbox's subscriber set, so no lock is needed on the hot
/// path.
enum WorkerCommand {
    Publish(Vec<u8>),
    Subscribe(oneshot::Sender<mpsc::Receiver<Vec<u8>>>),
    Teardown,
}

/// Fans observation frames out to every subscriber of one sandbox.
///
/// `Publish` is non-blocking up to the ingress queue's bound: a full queue
/// drops the incoming frame and logs rather than stalling the caller.
/// `Subscribe` registers a bounded outbound queue per subscriber; a
/// subscriber whose queue fills is dropped rather than allowed to stall
/// delivery to everyone else.
pub struct Hub {
    workers: Mutex<HashMap<String, mpsc::Sender<WorkerCommand>>>,
    existence: Arc<dyn SandboxExistence>,
    config: HubConfig,
    events: Arc<dyn EventEmitter>,
}

impl Hub {
    pub fn new(existence: Arc<dyn SandboxExistence>, config: HubConfig) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            existence,
            config,
            events: Arc::new(NoOpEventEmitter),
        }
    }

    pub fn with_event_emitter(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Deliver `frame` to every current subscriber of `sandbox_id`. If no
    /// worker is running for this sandbox yet (no one has published or
    /// subscribed before), one is spun up as long as the sandbox exists.
    pub async fn publish(&self, sandbox_id: &str, frame: Vec<u8>) {
        let Some(sender) = self.worker_for(sandbox_id).await else {
            tracing::warn!(sandbox_id, "publish to unknown sandbox dropped");
            return;
        };

        if sender.try_send(WorkerCommand::Publish(frame)).is_err() {
            tracing::warn!(sandbox_id, "hub ingress queue full, observation dropped");
            metrics::counter!("sandboxd_observations_dropped_total").increment(1);
            self.events
                .emit(
                    AuditEvent::new(EventType::ObservationDropped, serde_json::json!({"reason": "ingress_queue_full"}))
                        .with_sandbox(sandbox_id)
                        .with_severity(EventSeverity::Warning),
                )
                .await;
        }
    }

    /// Subscribe a new listener to `sandbox_id`'s observation stream. Fails
    /// with `NotFound` if the sandbox does not exist.
    pub async fn subscribe(&self, sandbox_id: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let sender = self
            .worker_for(sandbox_id)
            .await
            .ok_or_else(|| Error::not_found(sandbox_id.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(WorkerCommand::Subscribe(reply_tx))
            .await
            .map_err(|_| Error::internal("hub worker gone"))?;

        reply_rx
            .await
            .map_err(|_| Error::internal("hub worker dropped subscribe reply"))
    }

    /// Tear down the worker for a sandbox that has been removed, closing
    /// every subscriber's channel immediately rather than waiting on their
    /// next heartbeat timeout.
    pub async fn teardown(&self, sandbox_id: &str) {
        if let Some(sender) = self.workers.lock().await.remove(sandbox_id) {
            let _ = sender.send(WorkerCommand::Teardown).await;
        }
    }

    async fn worker_for(&self, sandbox_id: &str) -> Option<mpsc::Sender<WorkerCommand>> {
        let mut workers = self.workers.lock().await;
        if let Some(sender) = workers.get(sandbox_id) {
            return Some(sender.clone());
        }

        if !self.existence.exists(sandbox_id).await {
            return None;
        }

        let (tx, rx) = mpsc::channel(self.config.ingress_queue_depth);
        tokio::spawn(run_worker(
            sandbox_id.to_string(),
            rx,
            self.config.subscriber_queue_depth,
            self.events.clone(),
        ));
        workers.insert(sandbox_id.to_string(), tx.clone());
        Some(tx)
    }
}

async fn run_worker(
    sandbox_id: String,
    mut commands: mpsc::Receiver<WorkerCommand>,
    subscriber_queue_depth: usize,
    events: Arc<dyn EventEmitter>,
) {
    let mut subscribers: Vec<mpsc::Sender<Vec<u8>>> = Vec::new();

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Publish(frame) => {
                let mut dropped = 0usize;
                subscribers.retain(|sub| match sub.try_send(frame.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        tracing::warn!(sandbox_id = %sandbox_id, "dropping slow subscriber");
                        metrics::gauge!("sandboxd_subscribers_active").decrement(1.0);
                        dropped += 1;
                        false
                    }
                });
                for _ in 0..dropped {
                    events
                        .emit(
                            AuditEvent::new(EventType::SubscriberDropped, serde_json::json!({"reason": "queue_full"}))
                                .with_sandbox(&sandbox_id)
                                .with_severity(EventSeverity::Warning),
                        )
                        .await;
                }
                metrics::counter!("sandboxd_observations_published_total").increment(1);
            }
            WorkerCommand::Subscribe(reply) => {
                let (tx, rx) = mpsc::channel(subscriber_queue_depth);
                subscribers.push(tx);
                metrics::gauge!("sandboxd_subscribers_active").increment(1.0);
                let _ = reply.send(rx);
            }
            WorkerCommand::Teardown => break,
        }
    }

    tracing::debug!(sandbox_id = %sandbox_id, "hub worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysExists(AtomicBool);

    #[async_trait]
    impl SandboxExistence for AlwaysExists {
        async fn exists(&self, _sandbox_id: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> HubConfig {
        HubConfig {
            subscriber_queue_depth: 4,
            ingress_queue_depth: 4,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }

    #[tokio::test]
    async fn subscribe_fails_for_unknown_sandbox() {
        let hub = Hub::new(Arc::new(AlwaysExists(AtomicBool::new(false))), test_config());
        assert!(hub.subscribe("ghost").await.is_err());
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let hub = Hub::new(Arc::new(AlwaysExists(AtomicBool::new(true))), test_config());
        let mut a = hub.subscribe("s1").await.unwrap();
        let mut b = hub.subscribe("s1").await.unwrap();

        hub.publish("s1", b"frame-1".to_vec()).await;

        assert_eq!(a.recv().await.unwrap(), b"frame-1".to_vec());
        assert_eq!(b.recv().await.unwrap(), b"frame-1".to_vec());
    }

    #[tokio::test]
    async fn teardown_closes_subscriber_channels() {
        let hub = Hub::new(Arc::new(AlwaysExists(AtomicBool::new(true))), test_config());
        let mut sub = hub.subscribe("s1").await.unwrap();
        hub.teardown("s1").await;
        assert!(sub.recv().await.is_none());
    }
}

//! Change-feed ingestion.
//!
//! Producers publish `ChangeEvent`s into a bounded channel; the
//! `Ingestor` applies each one to the cluster cache and queues every
//! claim whose evaluation it may affect. A full channel pushes back on
//! producers instead of buffering without limit.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use fleetgrid_cluster::ClusterState;
use fleetgrid_state::ChangeEvent;

use crate::error::{ControllerError, ControllerResult};
use crate::queue::WorkQueue;

/// Producer side of the ingestion channel.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ChangeEvent>,
}

impl EventSender {
    /// Publish without waiting; fails if the channel is full.
    pub fn try_publish(&self, event: ChangeEvent) -> ControllerResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ControllerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ControllerError::QueueClosed,
        })
    }

    /// Publish, waiting for room.
    pub async fn publish(&self, event: ChangeEvent) -> ControllerResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ControllerError::QueueClosed)
    }
}

pub struct Ingestor {
    cluster: Arc<ClusterState>,
    queue: Arc<WorkQueue>,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl Ingestor {
    /// Create an ingestor and the sender that feeds it.
    pub fn channel(
        cluster: Arc<ClusterState>,
        queue: Arc<WorkQueue>,
        capacity: usize,
    ) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EventSender { tx }, Self { cluster, queue, rx })
    }

    /// Apply one event and queue the affected claims. Returns how many
    /// claims were queued.
    pub fn handle(&self, event: ChangeEvent) -> usize {
        let kind = event.kind();
        let mut affected = self.cluster.claims_affected_by(&event);
        let applied = event.clone();
        if !self.cluster.apply(event) {
            return 0;
        }
        affected.extend(self.cluster.claims_affected_by(&applied));
        affected.sort();
        affected.dedup();

        for claim in &affected {
            self.queue.add(claim);
        }
        debug!(kind, queued = affected.len(), "change applied");
        affected.len()
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("change ingestion started");
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        self.handle(event);
                    }
                    None => {
                        debug!("all event senders dropped");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("change ingestion shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_cluster::FakeClock;
    use fleetgrid_state::{
        Change, Machine, NodeClaim, NodeClaimStatus, OwnerReference, Resources, Workload,
        WorkloadPhase,
    };

    fn setup(capacity: usize) -> (EventSender, Ingestor, Arc<WorkQueue>) {
        let cluster = Arc::new(ClusterState::new(Arc::new(FakeClock::default())));
        let queue = Arc::new(WorkQueue::new());
        let (tx, ingestor) = Ingestor::channel(cluster, queue.clone(), capacity);
        (tx, ingestor, queue)
    }

    fn claim_event(revision: u64) -> ChangeEvent {
        ChangeEvent::NodeClaim(Change::Upserted(NodeClaim {
            name: "claim-a".to_string(),
            node_pool: Some("default".to_string()),
            requirements: vec![],
            template_hash: None,
            created_at: 0,
            status: NodeClaimStatus {
                provider_id: Some("fake://node-a".to_string()),
                node_name: Some("node-a".to_string()),
                conditions: Default::default(),
            },
            revision,
        }))
    }

    fn machine_event(revision: u64) -> ChangeEvent {
        ChangeEvent::Machine(Change::Upserted(Machine {
            name: "node-a".to_string(),
            provider_id: "fake://node-a".to_string(),
            capacity: Resources::default(),
            allocatable: Resources::default(),
            ready: true,
            labels: Default::default(),
            taints: vec![],
            revision,
        }))
    }

    fn workload_event(node: &str, revision: u64) -> ChangeEvent {
        ChangeEvent::Workload(Change::Upserted(Workload {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            owner: Some(OwnerReference {
                kind: "ReplicaSet".to_string(),
                name: "web".to_string(),
            }),
            node_name: Some(node.to_string()),
            ready: true,
            phase: WorkloadPhase::Running,
            deleting: false,
            revision,
        }))
    }

    #[test]
    fn workload_binding_queues_claim() {
        let (_tx, ingestor, queue) = setup(8);
        assert_eq!(ingestor.handle(machine_event(1)), 0);
        assert_eq!(ingestor.handle(claim_event(2)), 1);
        assert_eq!(ingestor.handle(workload_event("node-a", 3)), 1);
        assert_eq!(queue.ready_len(), 1);
    }

    #[test]
    fn duplicates_queue_nothing() {
        let (_tx, ingestor, _queue) = setup(8);
        ingestor.handle(machine_event(1));
        ingestor.handle(claim_event(2));
        ingestor.handle(workload_event("node-a", 3));
        assert_eq!(ingestor.handle(workload_event("node-a", 3)), 0);
        assert_eq!(ingestor.handle(claim_event(2)), 0);
    }

    #[test]
    fn moving_workload_away_queues_old_machine() {
        let (_tx, ingestor, _queue) = setup(8);
        ingestor.handle(machine_event(1));
        ingestor.handle(claim_event(2));
        ingestor.handle(workload_event("node-a", 3));
        assert_eq!(ingestor.handle(workload_event("node-b", 4)), 1);
    }

    #[test]
    fn nomination_queues_claim() {
        let (_tx, ingestor, _queue) = setup(8);
        ingestor.handle(machine_event(1));
        ingestor.handle(claim_event(2));
        let queued = ingestor.handle(ChangeEvent::Nominated {
            provider_id: "fake://node-a".to_string(),
            ttl_secs: 30,
        });
        assert_eq!(queued, 1);
    }

    #[test]
    fn full_channel_pushes_back() {
        let (tx, _ingestor, _queue) = setup(1);
        tx.try_publish(machine_event(1)).unwrap();
        assert!(matches!(
            tx.try_publish(machine_event(2)),
            Err(ControllerError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn run_drains_channel() {
        let (tx, ingestor, queue) = setup(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        tx.publish(machine_event(1)).await.unwrap();
        tx.publish(claim_event(2)).await.unwrap();
        drop(tx);

        // The loop ends once every sender is gone.
        ingestor.run(stop_rx).await;
        assert_eq!(queue.ready_len(), 1);
        drop(stop_tx);
    }

    #[test]
    fn oversized_nomination_is_capped_and_ingestion_continues() {
        let (_tx, ingestor, _queue) = setup(8);
        ingestor.handle(machine_event(1));
        ingestor.handle(claim_event(2));
        let queued = ingestor.handle(ChangeEvent::Nominated {
            provider_id: "fake://node-a".to_string(),
            ttl_secs: u64::MAX,
        });
        assert_eq!(queued, 1);
        assert!(ingestor.cluster.nominations().is_nominated("fake://node-a"));

        assert_eq!(ingestor.handle(workload_event("node-a", 3)), 1);
    }
}

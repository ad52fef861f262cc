//! Periodic resync from the record store.
//!
//! Change events can be lost; a full listing with a revision watermark
//! repairs the cache, and every claim is re-queued so nothing waits on
//! an event that will never come.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use fleetgrid_cluster::{ClusterState, ResyncReport};
use fleetgrid_state::RecordStore;

use crate::error::ControllerResult;
use crate::queue::WorkQueue;

pub struct Resyncer {
    store: RecordStore,
    cluster: Arc<ClusterState>,
    queue: Arc<WorkQueue>,
    interval: Duration,
}

impl Resyncer {
    pub fn new(
        store: RecordStore,
        cluster: Arc<ClusterState>,
        queue: Arc<WorkQueue>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            cluster,
            queue,
            interval,
        }
    }

    pub fn resync_once(&self) -> ControllerResult<ResyncReport> {
        let listing = self.store.listing()?;
        let report = self.cluster.resync(listing);
        let claims = self.cluster.claim_names();
        for claim in &claims {
            self.queue.add(claim);
        }
        debug!(queued = claims.len(), "claims queued after resync");
        Ok(report)
    }

    /// Resync immediately, then every `interval` until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "periodic resync started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.resync_once() {
                        error!(error = %e, "resync failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("resync loop shutting down");
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
    use fleetgrid_state::{NodeClaim, NodeClaimStatus, NodePool};

    #[test]
    fn resync_loads_store_and_queues_claims() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .put_node_pool(&default_pool())
            .unwrap();
        for name in ["claim-a", "claim-b"] {
            store
                .create_node_claim(
                    &NodeClaim {
                        name: name.to_string(),
                        node_pool: Some("default".to_string()),
                        requirements: vec![],
                        template_hash: None,
                        created_at: 0,
                        status: NodeClaimStatus::default(),
                        revision: 0,
                    },
                    1,
                )
                .unwrap();
        }

        let cluster = Arc::new(ClusterState::new(Arc::new(FakeClock::default())));
        let queue = Arc::new(WorkQueue::new());
        let resyncer = Resyncer::new(store, cluster.clone(), queue.clone(), Duration::from_secs(60));

        let report = resyncer.resync_once().unwrap();
        assert_eq!(report.upserted, 3);
        assert_eq!(cluster.claim_names(), vec!["claim-a", "claim-b"]);
        assert_eq!(queue.ready_len(), 2);

        // Nothing changed, so a second pass stores nothing new.
        assert_eq!(resyncer.resync_once().unwrap().upserted, 0);
    }

    fn default_pool() -> NodePool {
        NodePool {
            name: "default".to_string(),
            template: Default::default(),
            disruption: Default::default(),
            revision: 0,
        }
    }
}

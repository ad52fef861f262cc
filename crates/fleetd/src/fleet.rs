//! Assembles the fleetgrid subsystems around one record store.
//!
//! Every component is constructed here and handed its collaborators
//! explicitly; nothing is global. `start` launches the background
//! loops and returns their handles so shutdown can wait for them.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fleetgrid_api::{ApiState, build_router};
use fleetgrid_cluster::{Clock, ClusterState};
use fleetgrid_controller::{Diagnostics, Driver, EventSender, Ingestor, Resyncer, WorkQueue};
use fleetgrid_disruption::{DisruptionController, DriftEvaluator, TemplateDrift};
use fleetgrid_state::{NodePool, RecordStore, Revisioned};

use crate::config::FleetdConfig;

pub struct Fleet {
    pub store: RecordStore,
    pub cluster: Arc<ClusterState>,
    pub queue: Arc<WorkQueue>,
    pub diagnostics: Arc<Diagnostics>,
    pub events: EventSender,
    driver: Arc<Driver>,
    resyncer: Arc<Resyncer>,
    ingestor: Option<Ingestor>,
}

impl Fleet {
    pub fn assemble(
        store: RecordStore,
        config: &FleetdConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        seed_node_pools(&store, &config.node_pools)?;

        let cluster = Arc::new(ClusterState::new(clock));
        let queue = Arc::new(WorkQueue::new());
        let diagnostics = Arc::new(Diagnostics::new(
            config.controller.persistent_failure_threshold,
        ));

        let controller = Arc::new(DisruptionController::standard(
            config.disruption.occupancy.clone(),
            DriftEvaluator::new(Arc::new(TemplateDrift), config.drift_interval()?),
        ));
        let driver = Arc::new(Driver::new(
            cluster.clone(),
            store.clone(),
            controller,
            queue.clone(),
            diagnostics.clone(),
            config.driver_config()?,
        ));
        let resyncer = Arc::new(Resyncer::new(
            store.clone(),
            cluster.clone(),
            queue.clone(),
            config.resync_interval()?,
        ));
        let (events, ingestor) = Ingestor::channel(
            cluster.clone(),
            queue.clone(),
            config.controller.event_queue_capacity,
        );

        // Load the cache before anything reads it.
        let report = resyncer.resync_once()?;
        info!(loaded = report.upserted, "cluster state loaded");

        Ok(Self {
            store,
            cluster,
            queue,
            diagnostics,
            events,
            driver,
            resyncer,
            ingestor: Some(ingestor),
        })
    }

    pub fn router(&self) -> Router {
        build_router(ApiState {
            store: self.store.clone(),
            cluster: self.cluster.clone(),
            events: self.events.clone(),
            diagnostics: self.diagnostics.clone(),
        })
    }

    /// Spawn ingestion, the driver and periodic resync.
    pub fn start(&mut self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(ingestor) = self.ingestor.take() {
            let rx = shutdown.clone();
            handles.push(tokio::spawn(async move { ingestor.run(rx).await }));
        } else {
            warn!("fleet already started");
            return handles;
        }

        let driver = self.driver.clone();
        let rx = shutdown.clone();
        handles.push(tokio::spawn(async move { driver.run(rx).await }));

        let resyncer = self.resyncer.clone();
        handles.push(tokio::spawn(async move { resyncer.run(shutdown).await }));

        handles
    }
}

/// Store configured node pools whose content differs from what is stored.
fn seed_node_pools(store: &RecordStore, pools: &[NodePool]) -> anyhow::Result<()> {
    for pool in pools {
        let unchanged = store.get_node_pool(&pool.name)?.is_some_and(|mut stored| {
            stored.set_revision(pool.revision);
            stored == *pool
        });
        if unchanged {
            continue;
        }
        let stored = store.put_node_pool(pool)?;
        info!(pool = %stored.name, revision = stored.revision, "node pool seeded from config");
    }
    Ok(())
}

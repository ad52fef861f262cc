//! Reconciliation driver — the per-claim control loop.
//!
//! Workers pull claim names from the `WorkQueue`, evaluate them against
//! the cluster cache, and persist changed conditions to the record
//! store with an optimistic revision check. A conflict means the cache
//! was stale: the claim is re-read from the store, the cache refreshed,
//! and the evaluation retried.
//!
//! Requeues are deadlines on the queue; a single timer task promotes
//! due keys every `timer_tick`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetgrid_cluster::ClusterState;
use fleetgrid_disruption::DisruptionController;
use fleetgrid_state::{RecordStore, StateError};

use crate::backoff::Backoff;
use crate::diagnostics::Diagnostics;
use crate::error::{ControllerError, ControllerResult};
use crate::queue::WorkQueue;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub workers: usize,
    pub timer_tick: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub conflict_retries: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timer_tick: Duration::from_secs(1),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            conflict_retries: 3,
        }
    }
}

/// What processing one key did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Conditions were written to the store.
    Updated { requeue_after: Option<Duration> },
    /// The stored conditions were already correct.
    Unchanged { requeue_after: Option<Duration> },
    /// The claim no longer exists.
    Gone,
}

impl Processed {
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Updated { requeue_after } | Self::Unchanged { requeue_after } => *requeue_after,
            Self::Gone => None,
        }
    }
}

pub struct Driver {
    cluster: Arc<ClusterState>,
    store: RecordStore,
    controller: Arc<DisruptionController>,
    queue: Arc<WorkQueue>,
    diagnostics: Arc<Diagnostics>,
    backoff: Mutex<Backoff>,
    config: DriverConfig,
}

impl Driver {
    pub fn new(
        cluster: Arc<ClusterState>,
        store: RecordStore,
        controller: Arc<DisruptionController>,
        queue: Arc<WorkQueue>,
        diagnostics: Arc<Diagnostics>,
        config: DriverConfig,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        Self {
            cluster,
            store,
            controller,
            queue,
            diagnostics,
            backoff: Mutex::new(backoff),
            config,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Evaluate one claim and persist the result.
    pub fn process_key(&self, key: &str) -> ControllerResult<Processed> {
        let attempts = self.config.conflict_retries + 1;
        for attempt in 1..=attempts {
            let Some(view) = self.cluster.view_for_claim(key) else {
                debug!(claim = %key, "claim no longer cached");
                self.queue.forget(key);
                return Ok(Processed::Gone);
            };

            let out = self.controller.reconcile(&view)?;
            if !out.changed {
                return Ok(Processed::Unchanged {
                    requeue_after: out.requeue_after,
                });
            }

            match self
                .store
                .update_node_claim_conditions(key, view.claim.revision, &out.conditions)
            {
                Ok(stored) => {
                    info!(claim = %key, revision = stored.revision, "claim conditions updated");
                    self.cluster.upsert_node_claim(stored);
                    return Ok(Processed::Updated {
                        requeue_after: out.requeue_after,
                    });
                }
                Err(e) if e.is_conflict() => {
                    debug!(claim = %key, attempt, error = %e, "stale claim; refreshing");
                    if !self.refresh(key)? {
                        return Ok(Processed::Gone);
                    }
                }
                Err(StateError::NotFound(_)) => {
                    self.cluster
                        .remove_node_claim(key, self.store.current_revision()?);
                    self.queue.forget(key);
                    return Ok(Processed::Gone);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::ConflictRetriesExhausted {
            claim: key.to_string(),
            attempts,
        })
    }

    /// Targeted resync of one claim. Returns whether it still exists.
    fn refresh(&self, key: &str) -> ControllerResult<bool> {
        match self.store.get_node_claim(key)? {
            Some(fresh) => {
                self.cluster.upsert_node_claim(fresh);
                Ok(true)
            }
            None => {
                self.cluster
                    .remove_node_claim(key, self.store.current_revision()?);
                self.queue.forget(key);
                Ok(false)
            }
        }
    }

    /// Process `key` and schedule its next evaluation.
    pub fn handle(&self, key: &str) {
        let clock = self.cluster.clock();
        let now = clock.now();
        let result = self.process_key(key);
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(processed) => {
                backoff.reset(key);
                self.diagnostics.record_success(key);
                if let Some(delay) = processed.requeue_after() {
                    self.schedule(key, now, delay);
                }
            }
            Err(e) => {
                let delay = backoff.next_delay(key);
                self.diagnostics.record_failure(key, &e, clock.epoch_secs());
                self.schedule(key, now, delay);
            }
        }
        drop(backoff);
        self.queue.done(key);
    }

    fn schedule(&self, key: &str, now: SystemTime, delay: Duration) {
        match now.checked_add(delay) {
            Some(at) => self.queue.add_at(key, at),
            None => warn!(claim = %key, delay_secs = delay.as_secs(), "requeue delay out of range; not scheduled"),
        }
    }

    /// Run the worker pool and the requeue timer until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let workers = self.config.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let driver = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(key) = driver.queue.get().await {
                    driver.handle(&key);
                }
                debug!(worker, "worker stopped");
            }));
        }
        info!(workers, tick_ms = self.config.timer_tick.as_millis() as u64, "reconciliation driver started");

        let mut tick = tokio::time::interval(self.config.timer_tick);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = self.cluster.clock().now();
                    let promoted = self.queue.promote_due(now);
                    if promoted > 0 {
                        debug!(promoted, "requeued claims due");
                    }
                    self.cluster.nominations().sweep();
                }
                _ = shutdown.changed() => {
                    info!("reconciliation driver shutting down");
                    break;
                }
            }
        }

        self.queue.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

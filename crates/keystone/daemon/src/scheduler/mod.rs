//! Reconciliation scheduling
//!
//! Entities are reconciled by a pool of workers pulling from a
//! [`WorkQueue`] keyed by entity ID, so one entity is never converged twice
//! at the same time. Waiting on an issuer and backing off after a transient
//! failure are delayed requeues, never sleeps inside a worker.

pub mod bootstrap;
mod queue;
mod reconciler;

pub use queue::WorkQueue;
pub use reconciler::{ReconcileOutcome, TrustChainReconciler};

use crate::config::ReconcilerConfig;
use crate::events::EventPublisher;
use crate::storage::{EntityStorage, Storage, StorageResult};
use dashmap::DashMap;
use keystone_types::{EntityId, ReconcilePhase, TrustEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::interval;

/// Number of entities per phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub awaiting_dependency: usize,
    pub converging: usize,
    pub ready: usize,
    pub deleting: usize,
    pub denied: usize,
    pub failed: usize,
}

/// Scheduler state
pub struct Scheduler {
    config: ReconcilerConfig,
    storage: Arc<dyn Storage>,
    reconciler: Arc<TrustChainReconciler>,
    queue: Arc<WorkQueue<EntityId>>,
    phases: DashMap<EntityId, ReconcilePhase>,
    events: EventPublisher,
}

impl Scheduler {
    pub fn new(
        config: ReconcilerConfig,
        storage: Arc<dyn Storage>,
        reconciler: Arc<TrustChainReconciler>,
        events: EventPublisher,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            storage,
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            phases: DashMap::new(),
            events: events.for_actor("scheduler"),
        })
    }

    pub fn reconciler(&self) -> &Arc<TrustChainReconciler> {
        &self.reconciler
    }

    /// Queue a single entity
    pub fn enqueue(&self, id: EntityId) {
        self.queue.add(id);
    }

    /// Queue an entity and everything it issues
    pub async fn trigger(&self, id: &EntityId) -> StorageResult<()> {
        self.enqueue(id.clone());
        self.enqueue_dependents(id).await
    }

    async fn enqueue_dependents(&self, id: &EntityId) -> StorageResult<()> {
        for dependent in self.storage.list_dependents(id).await? {
            self.enqueue(dependent);
        }
        Ok(())
    }

    /// Queue every declared entity, issuers first
    pub async fn resync(&self) -> StorageResult<usize> {
        let entities = self.storage.list_entities(None).await?;
        let count = entities.len();
        for entity in entities {
            self.enqueue(entity.id);
        }
        tracing::debug!(count, "Resync queued entities");
        Ok(count)
    }

    /// Last known phase of `id`
    pub fn phase(&self, id: &EntityId) -> Option<ReconcilePhase> {
        self.phases.get(id).map(|phase| *phase)
    }

    /// Record that deletion of `id` was requested
    pub fn mark_deleting(&self, id: &EntityId) {
        self.phases.insert(id.clone(), ReconcilePhase::Deleting);
    }

    pub fn phase_counts(&self) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        for entry in self.phases.iter() {
            match *entry.value() {
                ReconcilePhase::AwaitingDependency => counts.awaiting_dependency += 1,
                ReconcilePhase::Converging => counts.converging += 1,
                ReconcilePhase::Ready => counts.ready += 1,
                ReconcilePhase::Deleting => counts.deleting += 1,
                ReconcilePhase::Denied => counts.denied += 1,
                ReconcilePhase::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Entities waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Entities being reconciled right now
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Run workers until `shutdown` flips to true.
    ///
    /// In-flight reconciliations finish; queued work and pending delayed
    /// requeues are dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.resync().await {
            tracing::error!(error = %e, "Initial resync failed");
        }

        let workers = self.config.workers.max(1);
        let mut handles = JoinSet::new();
        for worker in 0..workers {
            let scheduler = self.clone();
            handles.spawn(async move { scheduler.work(worker).await });
        }
        tracing::info!(workers, "Scheduler started");

        let mut resync = interval(self.config.resync_interval());
        resync.tick().await;

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = resync.tick() => {
                        if let Err(e) = self.resync().await {
                            tracing::error!(error = %e, "Periodic resync failed");
                        }
                    }
                }
            }
        }

        self.queue.shutdown();
        while let Some(result) = handles.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Worker task failed");
            }
        }

        tracing::info!("Scheduler stopped");
    }

    async fn work(&self, worker: usize) {
        while let Some(id) = self.queue.next().await {
            self.process(&id).await;
            self.queue.done(&id);
        }
        tracing::debug!(worker, "Worker exiting");
    }

    /// Process queued entities on the calling task until the queue is empty.
    ///
    /// Delayed requeues that fire later are not waited for. Returns the
    /// number of passes run.
    pub async fn run_until_idle(&self) -> usize {
        let mut passes = 0;
        while !self.queue.is_empty() {
            let Some(id) = self.queue.next().await else {
                break;
            };
            self.process(&id).await;
            self.queue.done(&id);
            passes += 1;
        }
        passes
    }

    /// Reconcile one entity and schedule what follows from the outcome
    async fn process(&self, id: &EntityId) {
        let previous = self.phase(id);
        if previous != Some(ReconcilePhase::Deleting) {
            self.phases.insert(id.clone(), ReconcilePhase::Converging);
        }

        match self.reconciler.reconcile(id).await {
            Ok(ReconcileOutcome::Ready {
                identity_changed,
                follow_up,
                ..
            }) => {
                self.phases.insert(id.clone(), ReconcilePhase::Ready);
                if identity_changed {
                    if let Err(e) = self.enqueue_dependents(id).await {
                        tracing::warn!(entity = %id, error = %e, "Failed to queue dependents");
                    }
                }
                for declared in follow_up {
                    self.enqueue(declared);
                }
            }
            Ok(ReconcileOutcome::AwaitingDependency { dependency, reason }) => {
                if previous != Some(ReconcilePhase::AwaitingDependency) {
                    self.events
                        .emit(id, TrustEvent::AwaitingDependency { dependency, reason })
                        .await;
                }
                self.phases.insert(id.clone(), ReconcilePhase::AwaitingDependency);
                self.queue.add_after(id.clone(), self.config.dependency_retry());
            }
            Ok(ReconcileOutcome::Denied { issuer, reason }) => {
                if previous != Some(ReconcilePhase::Denied) {
                    self.events
                        .emit(id, TrustEvent::PolicyDenied { issuer, reason })
                        .await;
                }
                self.phases.insert(id.clone(), ReconcilePhase::Denied);
            }
            Ok(ReconcileOutcome::Removed { cascaded }) => {
                self.phases.remove(id);
                for owned in cascaded {
                    self.mark_deleting(&owned);
                    self.enqueue(owned);
                }
                if let Err(e) = self.enqueue_dependents(id).await {
                    tracing::warn!(entity = %id, error = %e, "Failed to queue dependents");
                }
            }
            Ok(ReconcileOutcome::NotFound) => {
                self.phases.remove(id);
            }
            Err(e) => {
                let retrying = e.is_retryable();
                tracing::error!(entity = %id, error = %e, retrying, "Reconciliation failed");
                self.phases.insert(id.clone(), ReconcilePhase::Failed);
                self.events
                    .emit(
                        id,
                        TrustEvent::ReconcileFailed {
                            reason: e.to_string(),
                            retrying,
                        },
                    )
                    .await;
                if retrying {
                    self.queue.add_after(id.clone(), self.config.error_backoff());
                }
            }
        }
    }
}

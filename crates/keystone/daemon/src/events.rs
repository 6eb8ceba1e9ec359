//! Event publishing
//!
//! Every event is appended to the event log and fanned out to live
//! subscribers (the SSE stream).

use crate::storage::{EventStorage, Storage};
use keystone_types::{EntityId, TrustEvent, TrustEventEnvelope};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Publishes trust events to storage and the broadcast channel
#[derive(Clone)]
pub struct EventPublisher {
    storage: Arc<dyn Storage>,
    tx: broadcast::Sender<TrustEventEnvelope>,
    actor: &'static str,
}

impl EventPublisher {
    pub fn new(storage: Arc<dyn Storage>, tx: broadcast::Sender<TrustEventEnvelope>) -> Self {
        Self {
            storage,
            tx,
            actor: "keystoned",
        }
    }

    /// Same sinks, events attributed to `actor`
    pub fn for_actor(&self, actor: &'static str) -> Self {
        Self {
            actor,
            ..self.clone()
        }
    }

    /// Record and broadcast an event about `entity`
    pub async fn emit(&self, entity: &EntityId, event: TrustEvent) {
        let envelope = TrustEventEnvelope::new(entity.clone(), event).with_actor(self.actor);

        if let Err(e) = self.storage.store_event(envelope.clone()).await {
            tracing::warn!(entity = %entity, error = %e, "Failed to store event");
        }

        // No receivers is fine
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrustEventEnvelope> {
        self.tx.subscribe()
    }
}

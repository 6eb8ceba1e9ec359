//! Application state for API handlers

use crate::scheduler::Scheduler;
use crate::storage::Storage;
use keystone_resolver::ResolverService;
use keystone_types::TrustEventEnvelope;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Storage backend
    pub storage: Arc<dyn Storage>,

    /// Scheduler handle
    pub scheduler: Arc<Scheduler>,

    /// Credential resolver
    pub resolver: Arc<ResolverService>,

    /// Event broadcast channel
    pub event_tx: broadcast::Sender<TrustEventEnvelope>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Graceful shutdown signal sender
    pub shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        storage: Arc<dyn Storage>,
        scheduler: Arc<Scheduler>,
        resolver: Arc<ResolverService>,
        event_tx: broadcast::Sender<TrustEventEnvelope>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            storage,
            scheduler,
            resolver,
            event_tx,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
            shutdown_tx,
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        match secs {
            s if s < 60 => format!("{s}s"),
            s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
            s if s < 86400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
            s => format!("{}d {}h", s / 86400, (s % 86400) / 3600),
        }
    }
}

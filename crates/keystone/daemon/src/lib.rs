//! Keystone daemon library
//!
//! This module provides the core components for the Keystone daemon:
//! - Trust chain reconciliation (roots, namespaces, principals)
//! - Storage backends for entities, key bundles and status
//! - REST API handlers
//! - Server lifecycle management, including the account resolver

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, ReconcileError, StorageError};
pub use events::EventPublisher;
pub use scheduler::{ReconcileOutcome, Scheduler, TrustChainReconciler};
pub use server::Server;
pub use storage::{InMemoryStorage, Storage};

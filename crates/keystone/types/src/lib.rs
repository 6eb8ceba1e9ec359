//! Keystone Types - Core types for the NATS trust chain
//!
//! Keystone manages a three-level trust hierarchy for a NATS message bus:
//! a root authority (NATS operator) issues namespace credentials (NATS
//! accounts), and each namespace issues principal credentials (NATS users).
//!
//! ## Key Concepts
//!
//! - **Entity**: A declared root, namespace or principal together with its spec
//! - **EntityId**: Level plus `(scope, name)` key, the stable reference used everywhere
//! - **KeyBundle**: The persisted triple (seed, identity, credential)
//! - **EntityStatus**: What an entity publishes for its dependents
//! - **Events**: Observability stream for reconciliation activity

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod bundle;
pub mod events;
pub mod ids;
pub mod nats;
pub mod spec;
pub mod status;

pub use bundle::KeyBundle;
pub use events::{EventSeverity, TrustEvent, TrustEventEnvelope};
pub use ids::{EntityId, EntityKey, EntityLevel, ObjectRef, UnknownLevel};
pub use nats::{
    AccountLimits, Export, ExportType, Import, JetStreamLimits, NamespaceLimits, NatsLimits,
    Permission, Permissions, ResponsePermission, ResponseType, RevocationList, ServiceLatency,
    TimeRange, UserLimits, NO_LIMIT,
};
pub use spec::{
    Entity, EntitySpec, NamespaceSpec, PrincipalLimits, PrincipalSpec, RootSpec,
    SpecValidationError,
};
pub use status::{EntityStatus, ReconcilePhase};

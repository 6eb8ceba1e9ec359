//! Storage trait definitions

use crate::error::StorageError;
use async_trait::async_trait;
use keystone_types::{
    Entity, EntityId, EntityKey, EntityLevel, EntitySpec, EntityStatus, KeyBundle,
    TrustEventEnvelope,
};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Combined storage trait
pub trait Storage: EntityStorage + BundleStorage + StatusStorage + EventStorage + Send + Sync {}

impl<T> Storage for T where
    T: EntityStorage + BundleStorage + StatusStorage + EventStorage + Send + Sync
{
}

/// Result of declaring an entity
#[derive(Debug, Clone)]
pub struct Declared {
    pub entity: Entity,
    /// The entity did not exist before
    pub created: bool,
    /// The spec differs from the stored one (always true when created)
    pub changed: bool,
}

/// Storage for declared entities
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Get an entity by ID
    async fn get_entity(&self, id: &EntityId) -> StorageResult<Option<Entity>>;

    /// List entities, optionally of one level
    async fn list_entities(&self, level: Option<EntityLevel>) -> StorageResult<Vec<Entity>>;

    /// Create the entity or replace its spec. The generation only moves
    /// when the spec changed. Entities pending deletion cannot be redeclared.
    async fn declare_entity(&self, key: EntityKey, spec: EntitySpec) -> StorageResult<Declared>;

    /// Insert `entity` unless one with the same ID exists
    async fn insert_entity_if_absent(&self, entity: Entity) -> StorageResult<bool>;

    /// Mark an entity for removal. Returns false if it does not exist.
    async fn request_deletion(&self, id: &EntityId) -> StorageResult<bool>;

    /// Remove an entity record
    async fn remove_entity(&self, id: &EntityId) -> StorageResult<bool>;

    /// Entities whose issuer is `issuer`
    async fn list_dependents(&self, issuer: &EntityId) -> StorageResult<Vec<EntityId>>;
}

/// Storage for key bundles.
///
/// A bundle is always written whole; readers never observe a partial update.
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// Get a bundle by name
    async fn get_bundle(&self, name: &str) -> StorageResult<Option<KeyBundle>>;

    /// Replace a bundle atomically
    async fn put_bundle(&self, name: &str, bundle: KeyBundle) -> StorageResult<()>;
}

/// Storage for published entity status
#[async_trait]
pub trait StatusStorage: Send + Sync {
    async fn get_status(&self, id: &EntityId) -> StorageResult<Option<EntityStatus>>;

    async fn put_status(&self, id: &EntityId, status: EntityStatus) -> StorageResult<()>;

    async fn delete_status(&self, id: &EntityId) -> StorageResult<bool>;
}

/// Storage for events
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Store an event
    async fn store_event(&self, event: TrustEventEnvelope) -> StorageResult<()>;

    /// Get recent events, newest first
    async fn get_recent_events(&self, limit: usize) -> StorageResult<Vec<TrustEventEnvelope>>;

    /// Get recent events for one entity, newest first
    async fn get_events_for_entity(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> StorageResult<Vec<TrustEventEnvelope>>;
}

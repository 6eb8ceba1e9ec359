//! In-memory storage implementation

use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use keystone_types::{
    Entity, EntityId, EntityKey, EntityLevel, EntitySpec, EntityStatus, KeyBundle,
    TrustEventEnvelope,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Events kept in memory
const MAX_EVENTS: usize = 1000;

/// In-memory storage for development and testing
#[derive(Debug)]
pub struct InMemoryStorage {
    entities: Arc<RwLock<HashMap<EntityId, Entity>>>,
    bundles: Arc<RwLock<HashMap<String, KeyBundle>>>,
    statuses: Arc<RwLock<HashMap<EntityId, EntityStatus>>>,
    events: Arc<RwLock<VecDeque<TrustEventEnvelope>>>,
    bundle_writes: Arc<AtomicU64>,
    status_writes: Arc<AtomicU64>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
            bundles: Arc::new(RwLock::new(HashMap::new())),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(VecDeque::new())),
            bundle_writes: Arc::new(AtomicU64::new(0)),
            status_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of bundle writes since creation
    pub fn bundle_writes(&self) -> u64 {
        self.bundle_writes.load(Ordering::SeqCst)
    }

    /// Number of status writes since creation
    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Total writes to bundles and status
    pub fn writes(&self) -> u64 {
        self.bundle_writes() + self.status_writes()
    }
}

#[async_trait]
impl EntityStorage for InMemoryStorage {
    async fn get_entity(&self, id: &EntityId) -> StorageResult<Option<Entity>> {
        let entities = self.entities.read().await;
        Ok(entities.get(id).cloned())
    }

    async fn list_entities(&self, level: Option<EntityLevel>) -> StorageResult<Vec<Entity>> {
        let entities = self.entities.read().await;
        let mut listed: Vec<Entity> = entities
            .values()
            .filter(|e| level.map_or(true, |level| e.level() == level))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listed)
    }

    async fn declare_entity(&self, key: EntityKey, spec: EntitySpec) -> StorageResult<Declared> {
        let mut entities = self.entities.write().await;
        let id = EntityId::new(spec.level(), key.clone());

        match entities.get_mut(&id) {
            Some(existing) => {
                if existing.deletion_requested {
                    return Err(StorageError::Conflict(format!("{id} is being deleted")));
                }
                let changed = existing
                    .update_spec(spec)
                    .map_err(|e| StorageError::InvalidData(e.to_string()))?;
                Ok(Declared {
                    entity: existing.clone(),
                    created: false,
                    changed,
                })
            }
            None => {
                let entity = Entity::new(key, spec);
                entities.insert(id, entity.clone());
                Ok(Declared {
                    entity,
                    created: true,
                    changed: true,
                })
            }
        }
    }

    async fn insert_entity_if_absent(&self, entity: Entity) -> StorageResult<bool> {
        let mut entities = self.entities.write().await;
        if entities.contains_key(&entity.id) {
            return Ok(false);
        }
        entities.insert(entity.id.clone(), entity);
        Ok(true)
    }

    async fn request_deletion(&self, id: &EntityId) -> StorageResult<bool> {
        let mut entities = self.entities.write().await;
        match entities.get_mut(id) {
            Some(entity) => {
                if !entity.deletion_requested {
                    entity.deletion_requested = true;
                    entity.updated_at = chrono::Utc::now();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_entity(&self, id: &EntityId) -> StorageResult<bool> {
        let mut entities = self.entities.write().await;
        Ok(entities.remove(id).is_some())
    }

    async fn list_dependents(&self, issuer: &EntityId) -> StorageResult<Vec<EntityId>> {
        let entities = self.entities.read().await;
        let mut dependents: Vec<EntityId> = entities
            .values()
            .filter(|e| e.parent().as_ref() == Some(issuer))
            .map(|e| e.id.clone())
            .collect();
        dependents.sort();
        Ok(dependents)
    }
}

#[async_trait]
impl BundleStorage for InMemoryStorage {
    async fn get_bundle(&self, name: &str) -> StorageResult<Option<KeyBundle>> {
        let bundles = self.bundles.read().await;
        Ok(bundles.get(name).cloned())
    }

    async fn put_bundle(&self, name: &str, bundle: KeyBundle) -> StorageResult<()> {
        let mut bundles = self.bundles.write().await;
        bundles.insert(name.to_string(), bundle);
        self.bundle_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StatusStorage for InMemoryStorage {
    async fn get_status(&self, id: &EntityId) -> StorageResult<Option<EntityStatus>> {
        let statuses = self.statuses.read().await;
        Ok(statuses.get(id).cloned())
    }

    async fn put_status(&self, id: &EntityId, status: EntityStatus) -> StorageResult<()> {
        let mut statuses = self.statuses.write().await;
        statuses.insert(id.clone(), status);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_status(&self, id: &EntityId) -> StorageResult<bool> {
        let mut statuses = self.statuses.write().await;
        Ok(statuses.remove(id).is_some())
    }
}

#[async_trait]
impl EventStorage for InMemoryStorage {
    async fn store_event(&self, event: TrustEventEnvelope) -> StorageResult<()> {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > MAX_EVENTS {
            events.pop_front();
        }
        Ok(())
    }

    async fn get_recent_events(&self, limit: usize) -> StorageResult<Vec<TrustEventEnvelope>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    async fn get_events_for_entity(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> StorageResult<Vec<TrustEventEnvelope>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| &e.entity == id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_types::{NamespaceSpec, ObjectRef, PrincipalSpec, RootSpec, TrustEvent};

    fn namespace_spec(root: &str) -> EntitySpec {
        EntitySpec::Namespace(NamespaceSpec::new(ObjectRef::new(root)))
    }

    #[tokio::test]
    async fn test_declare_create_and_update() {
        let storage = InMemoryStorage::new();
        let key = EntityKey::new("team-a", "orders");

        let created = storage
            .declare_entity(key.clone(), namespace_spec("main"))
            .await
            .unwrap();
        assert!(created.created);
        assert_eq!(created.entity.generation, 1);

        let same = storage
            .declare_entity(key.clone(), namespace_spec("main"))
            .await
            .unwrap();
        assert!(!same.created);
        assert!(!same.changed);
        assert_eq!(same.entity.generation, 1);

        let mut spec = NamespaceSpec::new(ObjectRef::new("main"));
        spec.allowed_scopes.push("team-b".to_string());
        let updated = storage
            .declare_entity(key, EntitySpec::Namespace(spec))
            .await
            .unwrap();
        assert!(updated.changed);
        assert_eq!(updated.entity.generation, 2);
    }

    #[tokio::test]
    async fn test_declare_rejected_while_deleting() {
        let storage = InMemoryStorage::new();
        let key = EntityKey::new("team-a", "main");
        let root = EntitySpec::Root(RootSpec::default());
        storage.declare_entity(key.clone(), root.clone()).await.unwrap();

        let id = EntityId::root("team-a", "main");
        assert!(storage.request_deletion(&id).await.unwrap());
        assert!(matches!(
            storage.declare_entity(key, root).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(!storage
            .request_deletion(&EntityId::root("team-a", "missing"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_dependents() {
        let storage = InMemoryStorage::new();
        storage
            .declare_entity(EntityKey::new("team-a", "main"), EntitySpec::Root(RootSpec::default()))
            .await
            .unwrap();
        storage
            .declare_entity(EntityKey::new("team-a", "orders"), namespace_spec("main"))
            .await
            .unwrap();
        storage
            .declare_entity(
                EntityKey::new("team-b", "alice"),
                EntitySpec::Principal(PrincipalSpec::new(ObjectRef::scoped("team-a", "orders"))),
            )
            .await
            .unwrap();

        assert_eq!(
            storage
                .list_dependents(&EntityId::root("team-a", "main"))
                .await
                .unwrap(),
            vec![EntityId::namespace("team-a", "orders")]
        );
        assert_eq!(
            storage
                .list_dependents(&EntityId::namespace("team-a", "orders"))
                .await
                .unwrap(),
            vec![EntityId::principal("team-b", "alice")]
        );
        assert_eq!(
            storage.list_entities(Some(EntityLevel::Principal)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_write_counters() {
        let storage = InMemoryStorage::new();
        let id = EntityId::root("team-a", "main");

        storage.put_bundle("root/team-a/main", KeyBundle::default()).await.unwrap();
        storage.put_status(&id, EntityStatus::default()).await.unwrap();

        assert_eq!(storage.bundle_writes(), 1);
        assert_eq!(storage.status_writes(), 1);
        assert_eq!(storage.writes(), 2);
    }

    #[tokio::test]
    async fn test_events_newest_first_and_bounded() {
        let storage = InMemoryStorage::new();
        let id = EntityId::root("team-a", "main");

        for i in 0..(MAX_EVENTS + 5) {
            storage
                .store_event(TrustEventEnvelope::new(
                    id.clone(),
                    TrustEvent::ClaimsAnnounced {
                        public_key: format!("A{i}"),
                    },
                ))
                .await
                .unwrap();
        }

        let recent = storage.get_recent_events(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(
            recent[0].event,
            TrustEvent::ClaimsAnnounced {
                public_key: format!("A{}", MAX_EVENTS + 4)
            }
        );
        assert_eq!(storage.get_recent_events(usize::MAX).await.unwrap().len(), MAX_EVENTS);
        assert!(storage
            .get_events_for_entity(&EntityId::root("team-a", "other"), 10)
            .await
            .unwrap()
            .is_empty());
    }
}

//! Per-entity convergence
//!
//! One pass takes a declared entity to a persisted key bundle and published
//! status. The issuer of a namespace is its root, the issuer of a principal
//! is its namespace; roots sign their own claims. A pass never blocks on an
//! unready issuer, it reports [`ReconcileOutcome::AwaitingDependency`] and
//! the scheduler requeues it.

use crate::error::ReconcileError;
use crate::events::EventPublisher;
use crate::scheduler::bootstrap;
use crate::storage::{bundle_name, BundleStorage, EntityStorage, StatusStorage, Storage};
use keystone_claims::{
    build_credential, ensure_key_pair, needs_reissue, signer_from_seed, AccountClaims,
    ClaimsBody, KeyKind, KeyPair, OperatorClaims, ReissueReason, UserClaims,
};
use keystone_resolver::ResolverService;
use keystone_types::{
    Entity, EntityId, EntityLevel, EntitySpec, EntityStatus, KeyBundle, NamespaceSpec,
    ReconcilePhase, TrustEvent,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Bundle and status match the spec
    Ready {
        public_key: String,
        /// Anything was written
        changed: bool,
        /// The published identity moved; dependents must be re-issued
        identity_changed: bool,
        /// Entities declared during the pass
        follow_up: Vec<EntityId>,
    },
    /// The issuer has not published a usable signing key
    AwaitingDependency { dependency: EntityId, reason: String },
    /// The issuing namespace does not allow the principal's scope
    Denied { issuer: EntityId, reason: String },
    /// Deletion finished; `cascaded` are owned entities now marked for deletion
    Removed { cascaded: Vec<EntityId> },
    /// Nothing declared under this ID
    NotFound,
}

impl ReconcileOutcome {
    pub fn phase(&self) -> Option<ReconcilePhase> {
        match self {
            ReconcileOutcome::Ready { .. } => Some(ReconcilePhase::Ready),
            ReconcileOutcome::AwaitingDependency { .. } => Some(ReconcilePhase::AwaitingDependency),
            ReconcileOutcome::Denied { .. } => Some(ReconcilePhase::Denied),
            ReconcileOutcome::Removed { .. } | ReconcileOutcome::NotFound => None,
        }
    }
}

/// Signing key of a converged issuer
struct Issuer {
    id: EntityId,
    key_pair: KeyPair,
    identity: String,
    spec: EntitySpec,
}

enum Dependency {
    Ready(Issuer),
    NotReady(String),
}

/// What [`TrustChainReconciler::converge`] did
struct Converged {
    public_key: String,
    changed: bool,
    identity_changed: bool,
}

/// Drives entities through key generation, signing and publication
pub struct TrustChainReconciler {
    storage: Arc<dyn Storage>,
    resolver: Arc<ResolverService>,
    events: EventPublisher,
    system_entities: bool,
}

impl TrustChainReconciler {
    pub fn new(
        storage: Arc<dyn Storage>,
        resolver: Arc<ResolverService>,
        events: EventPublisher,
        system_entities: bool,
    ) -> Self {
        Self {
            storage,
            resolver,
            events: events.for_actor("reconciler"),
            system_entities,
        }
    }

    pub fn resolver(&self) -> &Arc<ResolverService> {
        &self.resolver
    }

    /// Run one pass for `id`
    #[instrument(skip_all, fields(entity = %id))]
    pub async fn reconcile(&self, id: &EntityId) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(entity) = self.storage.get_entity(id).await? else {
            debug!("Entity not declared");
            return Ok(ReconcileOutcome::NotFound);
        };

        if entity.deletion_requested {
            return self.finalize_deletion(&entity).await;
        }

        entity.spec.validate()?;

        match &entity.spec {
            EntitySpec::Root(spec) => {
                let claims = OperatorClaims::from(spec);
                let converged = self.converge(&entity, &claims, None).await?;
                let follow_up = self.declare_system_entities(&entity.id).await?;
                Ok(ready(converged, follow_up))
            }
            EntitySpec::Namespace(spec) => {
                let issuer = match self.resolve_issuer(&entity).await? {
                    Dependency::Ready(issuer) => issuer,
                    Dependency::NotReady(reason) => return Ok(awaiting(&entity, reason)),
                };
                let claims = AccountClaims::from(spec);
                let converged = self.converge(&entity, &claims, Some(&issuer)).await?;
                Ok(ready(converged, Vec::new()))
            }
            EntitySpec::Principal(spec) => {
                let issuer = match self.resolve_issuer(&entity).await? {
                    Dependency::Ready(issuer) => issuer,
                    Dependency::NotReady(reason) => return Ok(awaiting(&entity, reason)),
                };
                if let EntitySpec::Namespace(namespace) = &issuer.spec {
                    if let Some(outcome) = check_scope(&entity, &issuer.id, namespace) {
                        return Ok(outcome);
                    }
                }
                let claims = UserClaims::from(spec);
                let converged = self.converge(&entity, &claims, Some(&issuer)).await?;
                Ok(ready(converged, Vec::new()))
            }
        }
    }

    /// Load the signing key the parent currently publishes
    async fn resolve_issuer(&self, entity: &Entity) -> Result<Dependency, ReconcileError> {
        let Some(parent_id) = entity.parent() else {
            return Ok(Dependency::NotReady("entity has no issuer".to_string()));
        };

        let Some(parent) = self.storage.get_entity(&parent_id).await? else {
            return Ok(Dependency::NotReady(format!("issuer {parent_id} is not declared")));
        };
        if parent.deletion_requested {
            return Ok(Dependency::NotReady(format!("issuer {parent_id} is being deleted")));
        }

        let status = self.storage.get_status(&parent_id).await?.unwrap_or_default();
        let (Some(name), Some(identity)) = (status.bundle_name, status.public_key) else {
            return Ok(Dependency::NotReady(format!(
                "issuer {parent_id} has not published a signing key"
            )));
        };

        let Some(bundle) = self.storage.get_bundle(&name).await? else {
            return Ok(Dependency::NotReady(format!("issuer bundle {name} is missing")));
        };
        if bundle.identity_str() != Some(identity.as_str()) {
            return Ok(Dependency::NotReady(format!(
                "issuer {parent_id} is rotating its key"
            )));
        }

        let key_pair = signer_from_seed(KeyKind::for_level(parent_id.level), &bundle.seed)?;
        if key_pair.public_key() != identity {
            return Ok(Dependency::NotReady(format!(
                "issuer {parent_id} seed does not match its published identity"
            )));
        }

        Ok(Dependency::Ready(Issuer {
            id: parent_id,
            key_pair,
            identity,
            spec: parent.spec,
        }))
    }

    /// Ensure the key pair, reissue the credential if needed, publish status.
    ///
    /// Without an issuer the entity signs its own claims.
    async fn converge<T: ClaimsBody>(
        &self,
        entity: &Entity,
        claims: &T,
        issuer: Option<&Issuer>,
    ) -> Result<Converged, ReconcileError> {
        let id = &entity.id;
        let name = bundle_name(id);
        let existing = self.storage.get_bundle(&name).await?;

        let keys = ensure_key_pair(
            KeyKind::for_level(id.level),
            existing.as_ref().map(|bundle| bundle.seed.as_slice()),
        )?;
        if keys.generated {
            info!(
                identity = %keys.public_key,
                replaced_existing = keys.replaced_existing,
                "Generated key pair"
            );
            self.events
                .emit(
                    id,
                    TrustEvent::KeyGenerated {
                        public_key: keys.public_key.clone(),
                        replaced_existing: keys.replaced_existing,
                    },
                )
                .await;
        }

        let (signer, issuer_identity) = match issuer {
            Some(issuer) => (&issuer.key_pair, issuer.identity.as_str()),
            None => (&keys.key_pair, keys.public_key.as_str()),
        };

        let reason = if keys.generated {
            Some(ReissueReason::KeyGenerated)
        } else {
            needs_reissue(
                claims,
                issuer_identity,
                &keys.public_key,
                existing.as_ref().map(|bundle| bundle.credential.as_slice()),
            )
        };

        let mut changed = false;
        let credential = match reason {
            Some(reason) => {
                let credential =
                    build_credential(claims, id.name(), signer, issuer_identity, &keys.public_key)?;
                self.storage
                    .put_bundle(
                        &name,
                        KeyBundle::new(keys.seed(), keys.public_key.as_str(), credential.as_str()),
                    )
                    .await?;
                changed = true;

                info!(
                    identity = %keys.public_key,
                    issuer = %issuer_identity,
                    reason = %reason,
                    "Issued credential"
                );
                self.events
                    .emit(
                        id,
                        TrustEvent::CredentialIssued {
                            public_key: keys.public_key.clone(),
                            issuer: issuer_identity.to_string(),
                            reason: reason.to_string(),
                        },
                    )
                    .await;
                credential
            }
            None => {
                // needs_reissue only returns None for a decodable credential
                let bundle = existing.unwrap_or_default();
                let credential = bundle.credential_str().unwrap_or_default().to_string();
                if bundle.identity_str() != Some(keys.public_key.as_str())
                    || bundle.seed != keys.seed().as_bytes()
                {
                    self.storage
                        .put_bundle(
                            &name,
                            KeyBundle::new(
                                keys.seed(),
                                keys.public_key.as_str(),
                                credential.as_str(),
                            ),
                        )
                        .await?;
                    changed = true;
                    debug!("Rewrote bundle key fields");
                }
                credential
            }
        };

        let previous = self.storage.get_status(id).await?;
        let previous_identity = previous.as_ref().and_then(|s| s.public_key.clone());
        let identity_changed = previous_identity.as_deref() != Some(keys.public_key.as_str());

        // Status is written after the announcement, so a failed publish
        // leaves the status stale and the next pass still sees the change.
        if id.level == EntityLevel::Namespace {
            let replaced = previous_identity.as_deref().filter(|_| identity_changed);
            self.publish_to_resolver(id, &keys.public_key, &credential, replaced)
                .await?;
        }

        let status = EntityStatus {
            bundle_name: Some(name),
            public_key: Some(keys.public_key.clone()),
            credential: Some(credential),
            observed_generation: entity.generation,
        };
        if previous.as_ref() != Some(&status) {
            self.storage.put_status(id, status).await?;
            changed = true;
        }

        if !changed {
            debug!("Already converged");
        }

        Ok(Converged {
            public_key: keys.public_key,
            changed,
            identity_changed,
        })
    }

    /// Index and announce the credential of a namespace.
    ///
    /// A publish failure fails the pass so it is retried with backoff. The
    /// index already holds the credential and lookups serve it meanwhile.
    async fn publish_to_resolver(
        &self,
        id: &EntityId,
        public_key: &str,
        credential: &str,
        replaced: Option<&str>,
    ) -> Result<(), ReconcileError> {
        if let Some(previous) = replaced {
            self.resolver.remove(previous);
        }

        if self.resolver.announce(public_key, credential).await? {
            self.events
                .emit(
                    id,
                    TrustEvent::ClaimsAnnounced {
                        public_key: public_key.to_string(),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Declare the system namespace and resolver principal of a root
    async fn declare_system_entities(
        &self,
        root: &EntityId,
    ) -> Result<Vec<EntityId>, ReconcileError> {
        if !self.system_entities {
            return Ok(Vec::new());
        }

        let mut declared = Vec::new();
        for entity in bootstrap::system_entities(root) {
            let entity_id = entity.id.clone();
            if self.storage.insert_entity_if_absent(entity).await? {
                info!(declared = %entity_id, "Declared system entity");
                self.events
                    .emit(
                        root,
                        TrustEvent::SystemEntityDeclared {
                            declared: entity_id.clone(),
                        },
                    )
                    .await;
                declared.push(entity_id);
            }
        }
        Ok(declared)
    }

    /// Drop the entity from the resolver and the store, and mark the
    /// entities it owns for deletion.
    ///
    /// The key bundle is left in place; disposing of key material is up to
    /// whoever owns the store.
    async fn finalize_deletion(&self, entity: &Entity) -> Result<ReconcileOutcome, ReconcileError> {
        let id = &entity.id;

        let mut cascaded = Vec::new();
        for owned in self.storage.list_entities(None).await? {
            if owned.owner.as_ref() == Some(id) && self.storage.request_deletion(&owned.id).await? {
                info!(owned = %owned.id, "Deleting owned entity");
                cascaded.push(owned.id);
            }
        }

        let status = self.storage.get_status(id).await?;
        let public_key = status.and_then(|s| s.public_key);

        if let (EntitySpec::Namespace(_), Some(identity)) = (&entity.spec, &public_key) {
            self.resolver.remove(identity);
        }

        self.storage.delete_status(id).await?;
        self.storage.remove_entity(id).await?;

        info!(identity = ?public_key, "Entity removed");
        self.events
            .emit(id, TrustEvent::EntityRemoved { public_key })
            .await;

        Ok(ReconcileOutcome::Removed { cascaded })
    }
}

fn ready(converged: Converged, follow_up: Vec<EntityId>) -> ReconcileOutcome {
    ReconcileOutcome::Ready {
        public_key: converged.public_key,
        changed: converged.changed,
        identity_changed: converged.identity_changed,
        follow_up,
    }
}

fn awaiting(entity: &Entity, reason: String) -> ReconcileOutcome {
    debug!(reason = %reason, "Waiting for issuer");
    ReconcileOutcome::AwaitingDependency {
        dependency: entity
            .parent()
            .unwrap_or_else(|| entity.id.clone()),
        reason,
    }
}

fn check_scope(
    entity: &Entity,
    issuer: &EntityId,
    namespace: &NamespaceSpec,
) -> Option<ReconcileOutcome> {
    if namespace.allows_scope(entity.id.scope()) {
        return None;
    }
    let reason = format!(
        "namespace {issuer} does not allow principals from scope {}",
        entity.id.scope()
    );
    warn!(reason = %reason, "Principal denied");
    Some(ReconcileOutcome::Denied {
        issuer: issuer.clone(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use keystone_claims::{decode, ClaimsError};
    use keystone_resolver::{InMemoryBus, ResolverConfig};
    use keystone_types::{EntityKey, ObjectRef, PrincipalSpec, RootSpec};
    use tokio::sync::broadcast;

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        reconciler: TrustChainReconciler,
    }

    fn fixture(system_entities: bool) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let resolver = Arc::new(ResolverService::new(
            Arc::new(InMemoryBus::new()),
            ResolverConfig::default(),
        ));
        let (tx, _) = broadcast::channel(64);
        let events = EventPublisher::new(storage.clone(), tx);
        let reconciler =
            TrustChainReconciler::new(storage.clone(), resolver, events, system_entities);
        Fixture {
            storage,
            reconciler,
        }
    }

    fn root_spec() -> EntitySpec {
        EntitySpec::Root(RootSpec::default())
    }

    async fn declare(
        storage: &InMemoryStorage,
        scope: &str,
        name: &str,
        spec: EntitySpec,
    ) -> EntityId {
        storage
            .declare_entity(EntityKey::new(scope, name), spec)
            .await
            .unwrap()
            .entity
            .id
    }

    fn public_key(outcome: &ReconcileOutcome) -> String {
        match outcome {
            ReconcileOutcome::Ready { public_key, .. } => public_key.clone(),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_root_self_signs() {
        let f = fixture(false);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;

        let outcome = f.reconciler.reconcile(&root).await.unwrap();
        let identity = public_key(&outcome);
        assert!(identity.starts_with('O'));

        let status = f.storage.get_status(&root).await.unwrap().unwrap();
        assert!(status.is_published());
        let credential = status.credential.unwrap();
        let envelope = decode::<OperatorClaims>(&credential).unwrap();
        assert_eq!(envelope.iss, identity);
        assert_eq!(envelope.sub, identity);
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let f = fixture(false);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;

        f.reconciler.reconcile(&root).await.unwrap();
        let writes = f.storage.writes();

        let outcome = f.reconciler.reconcile(&root).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Ready {
                changed: false,
                identity_changed: false,
                ..
            }
        ));
        assert_eq!(f.storage.writes(), writes);
    }

    #[tokio::test]
    async fn test_namespace_waits_for_root() {
        let f = fixture(false);
        let namespace = declare(
            &f.storage,
            "infra",
            "orders",
            EntitySpec::Namespace(NamespaceSpec::new(ObjectRef::new("main"))),
        )
        .await;

        let outcome = f.reconciler.reconcile(&namespace).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::AwaitingDependency { ref dependency, .. }
                if *dependency == EntityId::root("infra", "main")
        ));
        assert_eq!(f.storage.writes(), 0);
    }

    #[tokio::test]
    async fn test_principal_outside_allowed_scopes_is_denied() {
        let f = fixture(false);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;
        let namespace = declare(
            &f.storage,
            "infra",
            "orders",
            EntitySpec::Namespace(NamespaceSpec::new(ObjectRef::new("main"))),
        )
        .await;
        let principal = declare(
            &f.storage,
            "team-b",
            "alice",
            EntitySpec::Principal(PrincipalSpec::new(ObjectRef::scoped("infra", "orders"))),
        )
        .await;

        f.reconciler.reconcile(&root).await.unwrap();
        f.reconciler.reconcile(&namespace).await.unwrap();
        let writes = f.storage.writes();

        let outcome = f.reconciler.reconcile(&principal).await.unwrap();
        assert!(
            matches!(outcome, ReconcileOutcome::Denied { ref issuer, .. } if *issuer == namespace)
        );
        assert_eq!(outcome.phase(), Some(ReconcilePhase::Denied));
        assert_eq!(f.storage.writes(), writes);
        assert!(f.storage.get_status(&principal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_issuer_seed_is_a_signer_error() {
        let f = fixture(false);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;
        let namespace = declare(
            &f.storage,
            "infra",
            "orders",
            EntitySpec::Namespace(NamespaceSpec::new(ObjectRef::new("main"))),
        )
        .await;
        f.reconciler.reconcile(&root).await.unwrap();

        // Corrupt the seed but keep the published identity
        let name = bundle_name(&root);
        let mut bundle = f.storage.get_bundle(&name).await.unwrap().unwrap();
        bundle.seed = b"not-a-seed".to_vec();
        f.storage.put_bundle(&name, bundle).await.unwrap();

        let err = f.reconciler.reconcile(&namespace).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Claims(ClaimsError::InvalidSigner(_))));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_root_declares_system_entities_once() {
        let f = fixture(true);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;

        let outcome = f.reconciler.reconcile(&root).await.unwrap();
        let ReconcileOutcome::Ready { follow_up, .. } = outcome else {
            panic!("expected ready");
        };
        assert_eq!(
            follow_up,
            vec![
                EntityId::namespace("infra", "main-system"),
                EntityId::principal("infra", "main-jwt"),
            ]
        );

        let outcome = f.reconciler.reconcile(&root).await.unwrap();
        let ReconcileOutcome::Ready { follow_up, .. } = outcome else {
            panic!("expected ready");
        };
        assert!(follow_up.is_empty());

        for id in [
            EntityId::namespace("infra", "main-system"),
            EntityId::principal("infra", "main-jwt"),
        ] {
            let outcome = f.reconciler.reconcile(&id).await.unwrap();
            assert_eq!(outcome.phase(), Some(ReconcilePhase::Ready));
        }
    }

    #[tokio::test]
    async fn test_deleting_namespace_clears_resolver() {
        let f = fixture(false);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;
        let namespace = declare(
            &f.storage,
            "infra",
            "orders",
            EntitySpec::Namespace(NamespaceSpec::new(ObjectRef::new("main"))),
        )
        .await;
        f.reconciler.reconcile(&root).await.unwrap();
        let identity = public_key(&f.reconciler.reconcile(&namespace).await.unwrap());
        assert!(f.reconciler.resolver().lookup(&identity).is_some());

        f.storage.request_deletion(&namespace).await.unwrap();
        assert_eq!(
            f.reconciler.reconcile(&namespace).await.unwrap(),
            ReconcileOutcome::Removed { cascaded: Vec::new() }
        );
        assert!(f.reconciler.resolver().lookup(&identity).is_none());
        assert!(f.storage.get_entity(&namespace).await.unwrap().is_none());
        assert_eq!(
            f.reconciler.reconcile(&namespace).await.unwrap(),
            ReconcileOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_deleting_root_cascades_to_system_entities() {
        let f = fixture(true);
        let root = declare(&f.storage, "infra", "main", root_spec()).await;
        // Declared by an administrator, not owned by the root
        let orders = declare(
            &f.storage,
            "infra",
            "orders",
            EntitySpec::Namespace(NamespaceSpec::new(ObjectRef::new("main"))),
        )
        .await;

        f.reconciler.reconcile(&root).await.unwrap();
        let system = EntityId::namespace("infra", "main-system");
        let resolver_user = EntityId::principal("infra", "main-jwt");
        let system_identity = public_key(&f.reconciler.reconcile(&system).await.unwrap());
        f.reconciler.reconcile(&resolver_user).await.unwrap();
        assert!(f.reconciler.resolver().lookup(&system_identity).is_some());

        f.storage.request_deletion(&root).await.unwrap();
        let outcome = f.reconciler.reconcile(&root).await.unwrap();
        let ReconcileOutcome::Removed { cascaded } = outcome else {
            panic!("expected removed");
        };
        assert_eq!(cascaded, vec![system.clone(), resolver_user.clone()]);

        let orders_entity = f.storage.get_entity(&orders).await.unwrap().unwrap();
        assert!(!orders_entity.deletion_requested);

        for id in [&system, &resolver_user] {
            assert!(matches!(
                f.reconciler.reconcile(id).await.unwrap(),
                ReconcileOutcome::Removed { .. }
            ));
            assert!(f.storage.get_entity(id).await.unwrap().is_none());
        }
        assert!(f.reconciler.resolver().lookup(&system_identity).is_none());
    }
}

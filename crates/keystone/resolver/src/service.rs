//! Resolver service
//!
//! Answers account credential lookups from NATS servers and announces
//! credential changes so servers can hot-reload them.
//!
//! Ordering: `announce` stores the credential in the index before it
//! publishes the update, so any lookup issued after the announcement
//! observes the new credential.

use crate::error::{ResolverError, ResolverResult};
use crate::index::CredentialIndex;
use crate::transport::{extract_wildcard, BusMessage, BusTransport};
use bytes::Bytes;
use futures::StreamExt;
use keystone_claims::AccountClaims;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Subjects the resolver works with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Lookup requests; the `*` token carries the account identity
    #[serde(default = "default_lookup_subject")]
    pub lookup_subject: String,

    /// Credential change announcements
    #[serde(default = "default_update_subject")]
    pub update_subject: String,
}

fn default_lookup_subject() -> String {
    "$SYS.REQ.ACCOUNT.*.CLAIMS.LOOKUP".to_string()
}

fn default_update_subject() -> String {
    "$SYS.REQ.CLAIMS.UPDATE".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookup_subject: default_lookup_subject(),
            update_subject: default_update_subject(),
        }
    }
}

/// Counters exposed on the status endpoint
#[derive(Debug, Default)]
pub struct ResolverStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    announcements: AtomicU64,
}

/// Point-in-time copy of [`ResolverStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub announcements: u64,
}

impl ResolverStats {
    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            announcements: self.announcements.load(Ordering::Relaxed),
        }
    }
}

/// Credential lookup and announcement service
pub struct ResolverService {
    index: CredentialIndex,
    bus: Arc<dyn BusTransport>,
    config: ResolverConfig,
    stats: ResolverStats,
}

impl ResolverService {
    pub fn new(bus: Arc<dyn BusTransport>, config: ResolverConfig) -> Self {
        Self {
            index: CredentialIndex::new(),
            bus,
            config,
            stats: ResolverStats::default(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn transport_name(&self) -> &'static str {
        self.bus.name()
    }

    /// Latest credential for `identity`, if any
    pub fn lookup(&self, identity: &str) -> Option<String> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let credential = self.index.get(identity);
        if credential.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        credential
    }

    /// Lookup subject a server uses for `identity`
    pub fn lookup_subject_for(&self, identity: &str) -> String {
        self.config.lookup_subject.replacen('*', identity, 1)
    }

    /// Index `credential` for `identity` and announce it when it changed.
    ///
    /// The credential must decode as account claims with a valid signature
    /// and subject `identity`; otherwise it is rejected and the index is
    /// left untouched. Returns whether an announcement went out. A publish
    /// failure is returned as an error; the index keeps the new value and
    /// the next call announces it again, even if the credential is the same.
    #[instrument(skip(self, credential))]
    pub async fn announce(&self, identity: &str, credential: &str) -> ResolverResult<bool> {
        let envelope = keystone_claims::decode::<AccountClaims>(credential)?;
        if envelope.sub != identity {
            return Err(ResolverError::InvalidCredential(format!(
                "credential subject {} does not match identity {identity}",
                envelope.sub
            )));
        }

        if !self.index.upsert(identity, credential) && !self.index.is_pending(identity) {
            debug!("Credential unchanged, not announcing");
            return Ok(false);
        }

        self.bus
            .publish(
                self.config.update_subject.clone(),
                Bytes::from(credential.to_string()),
            )
            .await?;
        self.index.mark_announced(identity, credential);
        self.stats.announcements.fetch_add(1, Ordering::Relaxed);

        info!(subject = %self.config.update_subject, "Announced credential update");
        Ok(true)
    }

    /// Drop `identity` from the index. Later lookups return empty.
    pub fn remove(&self, identity: &str) -> bool {
        let removed = self.index.remove(identity).is_some();
        if removed {
            info!(identity = %identity, "Removed credential from resolver index");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Answer lookups until `shutdown` flips to true.
    ///
    /// Each lookup runs on its own task. On shutdown the subscription is
    /// dropped and in-flight lookups are drained before returning.
    pub async fn serve(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> ResolverResult<()> {
        let mut subscription = self.bus.subscribe(self.config.lookup_subject.clone()).await?;
        info!(
            subject = %self.config.lookup_subject,
            transport = self.bus.name(),
            "Resolver listening for lookups"
        );

        let mut in_flight = JoinSet::new();

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    message = subscription.next() => {
                        let Some(message) = message else {
                            warn!("Lookup subscription closed");
                            break;
                        };
                        let service = Arc::clone(&self);
                        in_flight.spawn(async move { service.answer(message).await });
                    }
                    Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_lookup_result(result);
                    }
                }
            }
        }

        drop(subscription);
        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "Draining in-flight lookups");
        }
        while let Some(result) = in_flight.join_next().await {
            log_lookup_result(result);
        }

        info!("Resolver stopped");
        Ok(())
    }

    async fn answer(&self, message: BusMessage) -> ResolverResult<()> {
        let Some(reply) = message.reply else {
            debug!(subject = %message.subject, "Lookup without reply subject ignored");
            return Ok(());
        };

        let credential = extract_wildcard(&self.config.lookup_subject, &message.subject)
            .and_then(|identity| self.lookup(identity));

        debug!(
            subject = %message.subject,
            found = credential.is_some(),
            "Answering lookup"
        );
        self.bus
            .publish(reply, credential.map(Bytes::from).unwrap_or_default())
            .await
    }
}

fn log_lookup_result(result: Result<ResolverResult<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to answer lookup"),
        Err(e) => warn!(error = %e, "Lookup task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use keystone_claims::{build_credential, ensure_key_pair, KeyKind};
    use std::time::Duration;

    struct Fixture {
        bus: Arc<InMemoryBus>,
        service: Arc<ResolverService>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        let service = Arc::new(ResolverService::new(bus.clone(), ResolverConfig::default()));
        Fixture { bus, service }
    }

    fn account_credential(claims: &AccountClaims) -> (String, String) {
        let operator = ensure_key_pair(KeyKind::Operator, None).unwrap();
        let account = ensure_key_pair(KeyKind::Account, None).unwrap();
        let jwt = build_credential(
            claims,
            "orders",
            &operator.key_pair,
            &operator.public_key,
            &account.public_key,
        )
        .unwrap();
        (account.public_key, jwt)
    }

    #[tokio::test]
    async fn test_announce_then_lookup() {
        let f = fixture();
        let mut updates = f.bus.subscribe("$SYS.REQ.CLAIMS.UPDATE".to_string()).await.unwrap();
        let (identity, jwt) = account_credential(&AccountClaims::default());

        assert!(f.service.lookup(&identity).is_none());
        assert!(f.service.announce(&identity, &jwt).await.unwrap());
        assert_eq!(f.service.lookup(&identity).as_deref(), Some(jwt.as_str()));

        let update = updates.next().await.unwrap();
        assert_eq!(update.payload, Bytes::from(jwt.clone()));

        // Same credential again: indexed, not re-announced
        assert!(!f.service.announce(&identity, &jwt).await.unwrap());
        assert_eq!(f.service.stats().announcements, 1);
    }

    /// In-memory bus whose publishes can be switched to fail
    struct FlakyBus {
        inner: InMemoryBus,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl BusTransport for FlakyBus {
        async fn publish(&self, subject: String, payload: Bytes) -> ResolverResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ResolverError::Transport("connection lost".to_string()));
            }
            self.inner.publish(subject, payload).await
        }

        async fn subscribe(&self, subject: String) -> ResolverResult<crate::BusSubscription> {
            self.inner.subscribe(subject).await
        }

        async fn request(&self, subject: String, payload: Bytes) -> ResolverResult<Bytes> {
            self.inner.request(subject, payload).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_failed_announcement_is_sent_again() {
        let bus = Arc::new(FlakyBus {
            inner: InMemoryBus::new(),
            failing: std::sync::atomic::AtomicBool::new(true),
        });
        let service = ResolverService::new(bus.clone(), ResolverConfig::default());
        let mut updates = bus.subscribe("$SYS.REQ.CLAIMS.UPDATE".to_string()).await.unwrap();
        let (identity, jwt) = account_credential(&AccountClaims::default());

        let result = service.announce(&identity, &jwt).await;
        assert!(matches!(result, Err(ResolverError::Transport(_))));
        // Lookups already see the new credential
        assert_eq!(service.lookup(&identity).as_deref(), Some(jwt.as_str()));
        assert_eq!(service.stats().announcements, 0);

        bus.failing.store(false, Ordering::SeqCst);
        assert!(service.announce(&identity, &jwt).await.unwrap());
        let update = tokio::time::timeout(Duration::from_secs(2), updates.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.payload, Bytes::from(jwt.clone()));

        assert!(!service.announce(&identity, &jwt).await.unwrap());
        assert_eq!(service.stats().announcements, 1);
    }

    #[tokio::test]
    async fn test_malformed_credential_rejected() {
        let f = fixture();
        let (identity, jwt) = account_credential(&AccountClaims::default());
        f.service.announce(&identity, &jwt).await.unwrap();

        let result = f.service.announce(&identity, "garbage").await;
        assert!(matches!(result, Err(ResolverError::InvalidCredential(_))));
        assert_eq!(f.service.lookup(&identity).as_deref(), Some(jwt.as_str()));

        let (other_identity, _) = account_credential(&AccountClaims::default());
        let result = f.service.announce(&other_identity, &jwt).await;
        assert!(matches!(result, Err(ResolverError::InvalidCredential(_))));
        assert!(f.service.lookup(&other_identity).is_none());
    }

    #[tokio::test]
    async fn test_remove_clears_lookup() {
        let f = fixture();
        let (identity, jwt) = account_credential(&AccountClaims::default());
        f.service.announce(&identity, &jwt).await.unwrap();

        assert!(f.service.remove(&identity));
        assert!(f.service.lookup(&identity).is_none());
        assert!(!f.service.remove(&identity));
    }

    #[tokio::test]
    async fn test_serve_answers_bus_lookups() {
        let f = fixture();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (identity, jwt) = account_credential(&AccountClaims::default());
        f.service.announce(&identity, &jwt).await.unwrap();

        let server = tokio::spawn(f.service.clone().serve(shutdown_rx));
        // Let the responder subscribe before the first request
        tokio::time::sleep(Duration::from_millis(50)).await;

        let known = f
            .bus
            .request(f.service.lookup_subject_for(&identity), Bytes::new())
            .await
            .unwrap();
        assert_eq!(known, Bytes::from(jwt));

        let unknown = f
            .bus
            .request(f.service.lookup_subject_for("AUNKNOWN"), Bytes::new())
            .await
            .unwrap();
        assert!(unknown.is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("resolver did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_when_sender_dropped() {
        let f = fixture();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(f.service.clone().serve(shutdown_rx));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("resolver did not stop")
            .unwrap()
            .unwrap();
    }
}

//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::events::EventPublisher;
use crate::scheduler::{Scheduler, TrustChainReconciler};
use crate::storage::InMemoryStorage;
use axum::Router;
use keystone_resolver::{BusTransport, InMemoryBus, NatsBus, ResolverService};
use keystone_types::TrustEventEnvelope;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

/// Keystone daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Build every component. Connects to the bus when a URL is configured.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let bus: Arc<dyn BusTransport> = match &config.bus.url {
            Some(url) => Arc::new(
                NatsBus::connect(
                    url,
                    config.bus.creds_file.as_deref(),
                    config.bus.reconnect_wait(),
                )
                .await?,
            ),
            None => {
                tracing::warn!("No bus URL configured, lookups are served in-process only");
                Arc::new(InMemoryBus::new())
            }
        };

        Ok(Self::with_bus(config, bus))
    }

    /// Build every component on top of an existing bus
    pub fn with_bus(config: DaemonConfig, bus: Arc<dyn BusTransport>) -> Self {
        let storage = Arc::new(InMemoryStorage::new());

        let (event_tx, _) = broadcast::channel::<TrustEventEnvelope>(1000);
        let events = EventPublisher::new(storage.clone(), event_tx.clone());

        let resolver = Arc::new(ResolverService::new(bus, config.resolver.clone()));

        let reconciler = Arc::new(TrustChainReconciler::new(
            storage.clone(),
            resolver.clone(),
            events.clone(),
            config.bootstrap.system_entities,
        ));
        let scheduler = Scheduler::new(
            config.reconciler.clone(),
            storage.clone(),
            reconciler,
            events,
        );

        let (shutdown_tx, _) = watch::channel(false);
        let state = AppState::new(storage, scheduler, resolver, event_tx, shutdown_tx.clone());

        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Router over this server's state
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), self.config.server.enable_cors)
    }

    /// Handle that stops the server when `true` is sent
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run until Ctrl+C, SIGTERM or an API shutdown request
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Keystone daemon listening on {}", addr);

        let resolver = tokio::spawn({
            let service = self.state.resolver.clone();
            let shutdown = self.shutdown_tx.subscribe();
            let stop = self.shutdown_tx.clone();
            async move {
                let result = service.serve(shutdown).await;
                // A resolver that exits on its own takes the daemon down with it
                if !*stop.borrow() {
                    match &result {
                        Ok(()) => tracing::error!("Resolver stopped unexpectedly, shutting down"),
                        Err(e) => tracing::error!(error = %e, "Resolver failed, shutting down"),
                    }
                    let _ = stop.send(true);
                }
                result
            }
        });
        let scheduler = tokio::spawn(
            self.state
                .scheduler
                .clone()
                .run(self.shutdown_tx.subscribe()),
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal(self.shutdown_tx.subscribe()))
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        tracing::info!("Keystone daemon shutting down");
        let _ = self.shutdown_tx.send(true);

        let resolver = match resolver.await {
            Ok(result) => result.map_err(DaemonError::from),
            Err(e) => Err(DaemonError::Server(format!("resolver task failed: {e}"))),
        };
        if let Err(e) = scheduler.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }

        result.and(resolver)
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(mut api: watch::Receiver<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let requested = async {
        if api.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
        _ = requested => {
            tracing::info!("Shutdown requested, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use keystone_resolver::{BusSubscription, ResolverError, ResolverResult};
    use std::time::Duration;

    /// Bus that refuses every subscription
    struct DeadBus;

    #[async_trait::async_trait]
    impl BusTransport for DeadBus {
        async fn publish(&self, _subject: String, _payload: Bytes) -> ResolverResult<()> {
            Ok(())
        }

        async fn subscribe(&self, _subject: String) -> ResolverResult<BusSubscription> {
            Err(ResolverError::Transport("no connection".to_string()))
        }

        async fn request(&self, _subject: String, _payload: Bytes) -> ResolverResult<Bytes> {
            Err(ResolverError::Transport("no connection".to_string()))
        }

        fn name(&self) -> &'static str {
            "dead"
        }
    }

    fn local_config() -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.server.listen_addr = "127.0.0.1:0".parse().unwrap();
        config
    }

    #[tokio::test]
    async fn test_run_stops_when_resolver_fails() {
        let server = Server::with_bus(local_config(), Arc::new(DeadBus));
        let shutdown = server.shutdown_handle();

        let result = tokio::time::timeout(Duration::from_secs(5), server.run())
            .await
            .expect("server kept running without a resolver");

        assert!(matches!(result, Err(DaemonError::Bus(_))));
        assert!(*shutdown.borrow());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_request() {
        let server = Server::with_bus(local_config(), Arc::new(InMemoryBus::new()));
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server ignored shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}

//! NATS transport
//!
//! Thin wrapper over an `async_nats::Client`.

use crate::error::{ResolverError, ResolverResult};
use crate::transport::{BusMessage, BusSubscription, BusTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Bus backed by a NATS connection
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to `url`, authenticating with a credentials file when given.
    ///
    /// The client keeps reconnecting in the background, waiting
    /// `reconnect_wait` between attempts.
    pub async fn connect(
        url: &str,
        creds_file: Option<&Path>,
        reconnect_wait: Duration,
    ) -> ResolverResult<Self> {
        let options = match creds_file {
            Some(path) => async_nats::ConnectOptions::with_credentials_file(path)
                .await
                .map_err(|e| {
                    ResolverError::Transport(format!(
                        "failed to read credentials file {}: {e}",
                        path.display()
                    ))
                })?,
            None => async_nats::ConnectOptions::new(),
        };

        let client = options
            .name("keystone-resolver")
            .retry_on_initial_connect()
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .connect(url)
            .await
            .map_err(|e| {
                ResolverError::Transport(format!("failed to connect to NATS at {url}: {e}"))
            })?;

        info!(url = %url, "Connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl BusTransport for NatsBus {
    async fn publish(&self, subject: String, payload: Bytes) -> ResolverResult<()> {
        self.client
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| ResolverError::Transport(format!("failed to publish on {subject}: {e}")))
    }

    async fn subscribe(&self, subject: String) -> ResolverResult<BusSubscription> {
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| {
                ResolverError::Subscription(format!("failed to subscribe to {subject}: {e}"))
            })?;

        Ok(subscriber
            .map(|message| BusMessage {
                subject: message.subject.to_string(),
                reply: message.reply.map(|reply| reply.to_string()),
                payload: message.payload,
            })
            .boxed())
    }

    async fn request(&self, subject: String, payload: Bytes) -> ResolverResult<Bytes> {
        self.client
            .request(subject.clone(), payload)
            .await
            .map(|message| message.payload)
            .map_err(|e| ResolverError::Transport(format!("request on {subject} failed: {e}")))
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

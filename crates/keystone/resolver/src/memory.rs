//! In-process bus
//!
//! Used when no NATS server is configured and in tests. Every subscriber
//! sees every message published after it subscribed, filtered by its
//! subject pattern.

use crate::error::{ResolverError, ResolverResult};
use crate::transport::{subject_matches, BusMessage, BusSubscription, BusTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcast-backed bus living inside the process
#[derive(Debug)]
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
    next_inbox: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            next_inbox: AtomicU64::new(1),
        }
    }

    /// Publish with a reply subject
    pub fn publish_request(&self, subject: String, reply: String, payload: Bytes) {
        self.send(BusMessage {
            subject,
            reply: Some(reply),
            payload,
        });
    }

    fn send(&self, message: BusMessage) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.sender.send(message);
    }

    fn subscription(&self, pattern: String) -> BusSubscription {
        let receiver = self.sender.subscribe();
        futures::stream::unfold((receiver, pattern), |(mut receiver, pattern)| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) if subject_matches(&pattern, &message.subject) => {
                        return Some((message, (receiver, pattern)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, subject = %pattern, "In-memory subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for InMemoryBus {
    async fn publish(&self, subject: String, payload: Bytes) -> ResolverResult<()> {
        self.send(BusMessage {
            subject,
            reply: None,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> ResolverResult<BusSubscription> {
        Ok(self.subscription(subject))
    }

    async fn request(&self, subject: String, payload: Bytes) -> ResolverResult<Bytes> {
        let inbox = format!("_INBOX.{}", self.next_inbox.fetch_add(1, Ordering::Relaxed));
        let mut replies = self.subscription(inbox.clone());
        self.publish_request(subject.clone(), inbox, payload);

        match tokio::time::timeout(REQUEST_TIMEOUT, replies.next()).await {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) => Err(ResolverError::Transport("bus closed".to_string())),
            Err(_) => Err(ResolverError::Transport(format!(
                "no reply to request on {subject}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_filters_by_pattern() {
        let bus = InMemoryBus::new();
        let mut claims = bus.subscribe("$SYS.REQ.CLAIMS.>".to_string()).await.unwrap();

        bus.publish("other.subject".to_string(), Bytes::from_static(b"ignored"))
            .await
            .unwrap();
        bus.publish("$SYS.REQ.CLAIMS.UPDATE".to_string(), Bytes::from_static(b"jwt"))
            .await
            .unwrap();

        let message = claims.next().await.unwrap();
        assert_eq!(message.subject, "$SYS.REQ.CLAIMS.UPDATE");
        assert_eq!(message.payload, Bytes::from_static(b"jwt"));
        assert!(message.reply.is_none());
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = std::sync::Arc::new(InMemoryBus::new());
        let mut requests = bus.subscribe("echo".to_string()).await.unwrap();

        let responder = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let request = requests.next().await.unwrap();
                let reply = request.reply.unwrap();
                bus.publish(reply, request.payload).await.unwrap();
            })
        };

        let answer = bus
            .request("echo".to_string(), Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(answer, Bytes::from_static(b"ping"));
        responder.await.unwrap();
    }
}

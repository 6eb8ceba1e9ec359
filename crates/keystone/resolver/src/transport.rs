//! Bus transport abstraction
//!
//! The resolver only needs publish, subscribe and request/reply. Both the
//! NATS client and the in-process bus implement this trait.

use crate::error::ResolverResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// A message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Stream of messages delivered to one subscription
pub type BusSubscription = BoxStream<'static, BusMessage>;

/// Message bus operations used by the resolver
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Publish `payload` on `subject`
    async fn publish(&self, subject: String, payload: Bytes) -> ResolverResult<()>;

    /// Subscribe to a subject pattern (`*` and `>` wildcards)
    async fn subscribe(&self, subject: String) -> ResolverResult<BusSubscription>;

    /// Send a request and wait for the first reply
    async fn request(&self, subject: String, payload: Bytes) -> ResolverResult<Bytes>;

    /// Transport name for logs and status
    fn name(&self) -> &'static str;
}

/// NATS subject matching: `*` matches one token, a trailing `>` one or more
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(token)) if !token.is_empty() => {}
            (Some(expected), Some(token)) if expected == token => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Token of `subject` matched by the first `*` in `pattern`
pub fn extract_wildcard<'a>(pattern: &str, subject: &'a str) -> Option<&'a str> {
    if !subject_matches(pattern, subject) {
        return None;
    }
    pattern
        .split('.')
        .zip(subject.split('.'))
        .find(|(expected, _)| *expected == "*")
        .map(|(_, token)| token)
}

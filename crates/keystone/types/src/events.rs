//! Event types for trust chain observability
//!
//! Events provide a unified stream of reconciliation activity.

use crate::ids::EntityId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all trust chain events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Entity the event is about
    pub entity: EntityId,

    /// Actor who triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: TrustEvent,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Debug => "debug",
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
        }
    }
}

/// Trust chain events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrustEvent {
    /// A fresh key pair was generated
    KeyGenerated {
        public_key: String,
        /// True when key material existed but could not be decoded
        replaced_existing: bool,
    },

    /// A new credential was signed and persisted
    CredentialIssued {
        public_key: String,
        issuer: String,
        reason: String,
    },

    /// Issuer has not published a signing key yet
    AwaitingDependency {
        dependency: EntityId,
        reason: String,
    },

    /// Issuer refused the entity
    PolicyDenied {
        issuer: EntityId,
        reason: String,
    },

    /// Reconciliation attempt failed
    ReconcileFailed {
        reason: String,
        retrying: bool,
    },

    /// Entity removed from the serving index
    EntityRemoved {
        public_key: Option<String>,
    },

    /// Credential change announced on the bus
    ClaimsAnnounced {
        public_key: String,
    },

    /// A system namespace or principal was declared for a root
    SystemEntityDeclared {
        declared: EntityId,
    },
}

impl TrustEventEnvelope {
    /// Create a new event envelope
    pub fn new(entity: EntityId, event: TrustEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: Self::infer_severity(&event),
            entity,
            actor: None,
            event,
        }
    }

    /// Create with actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Infer severity from event type
    fn infer_severity(event: &TrustEvent) -> EventSeverity {
        match event {
            TrustEvent::ReconcileFailed { .. } => EventSeverity::Error,

            TrustEvent::PolicyDenied { .. } => EventSeverity::Warning,
            TrustEvent::KeyGenerated {
                replaced_existing: true,
                ..
            } => EventSeverity::Warning,

            TrustEvent::AwaitingDependency { .. } => EventSeverity::Debug,

            _ => EventSeverity::Info,
        }
    }
}

//! Published entity status and reconciliation phases

use serde::{Deserialize, Serialize};

/// What an entity publishes for its dependents once converged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatus {
    /// Name of the bundle holding the signing seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_name: Option<String>,

    /// Public identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Current signed credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Spec generation the status was computed from
    #[serde(default)]
    pub observed_generation: u64,
}

impl EntityStatus {
    /// Dependents can leave `AwaitingDependency` once this holds
    pub fn is_published(&self) -> bool {
        self.bundle_name.is_some() && self.public_key.is_some()
    }
}

/// Reconciliation state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    /// Issuer has not published a signing key yet
    AwaitingDependency,
    /// Key pair and credential being ensured
    Converging,
    /// Credential issued and published
    Ready,
    /// Being removed from the serving index
    Deleting,
    /// Issuer refused the entity by policy
    Denied,
    /// Last attempt failed; waiting for the next trigger
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_published() {
        let mut status = EntityStatus::default();
        assert!(!status.is_published());

        status.public_key = Some("OABC".to_string());
        assert!(!status.is_published());

        status.bundle_name = Some("root:ops/main".to_string());
        assert!(status.is_published());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&ReconcilePhase::AwaitingDependency).unwrap();
        assert_eq!(json, "\"awaiting_dependency\"");
    }
}

//! Strongly-typed identifiers for trust chain entities
//!
//! Entities are addressed by an administrative scope plus a name, and the
//! level they live on. The same `(scope, name)` may exist on several levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The three fixed trust levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityLevel {
    /// Root authority (NATS operator)
    Root,
    /// Namespace (NATS account), issued by a root
    Namespace,
    /// Principal (NATS user), issued by a namespace
    Principal,
}

impl EntityLevel {
    /// The level that must issue credentials for this level
    pub fn parent(&self) -> Option<EntityLevel> {
        match self {
            EntityLevel::Root => None,
            EntityLevel::Namespace => Some(EntityLevel::Root),
            EntityLevel::Principal => Some(EntityLevel::Namespace),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityLevel::Root => "root",
            EntityLevel::Namespace => "namespace",
            EntityLevel::Principal => "principal",
        }
    }

    /// Collection name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            EntityLevel::Root => "roots",
            EntityLevel::Namespace => "namespaces",
            EntityLevel::Principal => "principals",
        }
    }
}

impl fmt::Display for EntityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name
#[derive(Debug, Clone, Error)]
#[error("unknown entity level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for EntityLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "root" | "roots" | "operator" | "operators" => Ok(EntityLevel::Root),
            "namespace" | "namespaces" | "account" | "accounts" => Ok(EntityLevel::Namespace),
            "principal" | "principals" | "user" | "users" => Ok(EntityLevel::Principal),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

/// Administrative scope plus name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub scope: String,
    pub name: String,
}

impl EntityKey {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Fully qualified entity identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub level: EntityLevel,
    pub key: EntityKey,
}

impl EntityId {
    pub fn new(level: EntityLevel, key: EntityKey) -> Self {
        Self { level, key }
    }

    pub fn root(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(EntityLevel::Root, EntityKey::new(scope, name))
    }

    pub fn namespace(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(EntityLevel::Namespace, EntityKey::new(scope, name))
    }

    pub fn principal(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(EntityLevel::Principal, EntityKey::new(scope, name))
    }

    pub fn scope(&self) -> &str {
        &self.key.scope
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.key)
    }
}

/// Reference from a spec to its issuing entity.
///
/// An empty scope resolves to the scope of the referencing entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            scope: None,
            name: name.into(),
        }
    }

    pub fn scoped(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            name: name.into(),
        }
    }

    /// Resolve against the scope of the referencing entity
    pub fn resolve(&self, default_scope: &str) -> EntityKey {
        let scope = match self.scope.as_deref() {
            Some(scope) if !scope.is_empty() => scope,
            _ => default_scope,
        };
        EntityKey::new(scope, self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_chain() {
        assert_eq!(EntityLevel::Root.parent(), None);
        assert_eq!(EntityLevel::Namespace.parent(), Some(EntityLevel::Root));
        assert_eq!(EntityLevel::Principal.parent(), Some(EntityLevel::Namespace));
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("roots".parse::<EntityLevel>().unwrap(), EntityLevel::Root);
        assert_eq!("Account".parse::<EntityLevel>().unwrap(), EntityLevel::Namespace);
        assert_eq!("principal".parse::<EntityLevel>().unwrap(), EntityLevel::Principal);
        assert!("cluster".parse::<EntityLevel>().is_err());
    }

    #[test]
    fn test_display() {
        let id = EntityId::namespace("team-a", "orders");
        assert_eq!(id.to_string(), "namespace:team-a/orders");
        assert_eq!(id.key.to_string(), "team-a/orders");
    }

    #[test]
    fn test_object_ref_resolution() {
        assert_eq!(
            ObjectRef::new("main").resolve("team-a"),
            EntityKey::new("team-a", "main")
        );
        assert_eq!(
            ObjectRef::scoped("infra", "main").resolve("team-a"),
            EntityKey::new("infra", "main")
        );
        assert_eq!(
            ObjectRef::scoped("", "main").resolve("team-a"),
            EntityKey::new("team-a", "main")
        );
    }
}

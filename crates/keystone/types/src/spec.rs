//! Declared entity specifications
//!
//! A spec is what an administrator declares; the reconciler turns it into a
//! key pair and a signed credential.

use crate::ids::{EntityId, EntityKey, EntityLevel, ObjectRef};
use crate::nats::{
    Export, Import, NamespaceLimits, NatsLimits, Permissions, RevocationList, UserLimits,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

/// Connection types a NATS server understands
pub const CONNECTION_TYPES: [&str; 7] = [
    "STANDARD",
    "WEBSOCKET",
    "LEAFNODE",
    "LEAFNODE_WS",
    "MQTT",
    "MQTT_WS",
    "IN_PROCESS",
];

/// Root authority spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSpec {
    /// Additional operator keys allowed to sign on behalf of the root
    #[serde(default)]
    pub signing_keys: Vec<String>,

    /// Externally reachable bus endpoints
    #[serde(default)]
    pub server_urls: Vec<String>,
}

/// Namespace spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSpec {
    /// Root that issues this namespace
    pub root_ref: ObjectRef,

    /// Scopes that may declare principals against this namespace
    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    #[serde(default)]
    pub imports: Vec<Import>,

    #[serde(default)]
    pub exports: Vec<Export>,

    #[serde(default)]
    pub limits: NamespaceLimits,

    #[serde(default)]
    pub revocations: RevocationList,
}

impl NamespaceSpec {
    pub fn new(root_ref: ObjectRef) -> Self {
        Self {
            root_ref,
            allowed_scopes: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            limits: NamespaceLimits::default(),
            revocations: RevocationList::default(),
        }
    }

    /// Whether principals from `scope` may be issued by this namespace
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.iter().any(|s| s == scope)
    }
}

/// Principal connection limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalLimits {
    #[serde(flatten)]
    pub user: UserLimits,
    #[serde(flatten)]
    pub nats: NatsLimits,
}

/// Principal spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSpec {
    /// Namespace that issues this principal
    pub namespace_ref: ObjectRef,

    #[serde(default)]
    pub permissions: Permissions,

    #[serde(default)]
    pub limits: PrincipalLimits,

    /// Allow connecting with the credential alone, without proving key possession
    #[serde(default)]
    pub bearer_token: bool,

    #[serde(default)]
    pub allowed_connection_types: Vec<String>,
}

impl PrincipalSpec {
    pub fn new(namespace_ref: ObjectRef) -> Self {
        Self {
            namespace_ref,
            permissions: Permissions::default(),
            limits: PrincipalLimits::default(),
            bearer_token: false,
            allowed_connection_types: Vec::new(),
        }
    }
}

/// Spec of any level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", content = "spec", rename_all = "lowercase")]
pub enum EntitySpec {
    Root(RootSpec),
    Namespace(NamespaceSpec),
    Principal(PrincipalSpec),
}

impl EntitySpec {
    pub fn level(&self) -> EntityLevel {
        match self {
            EntitySpec::Root(_) => EntityLevel::Root,
            EntitySpec::Namespace(_) => EntityLevel::Namespace,
            EntitySpec::Principal(_) => EntityLevel::Principal,
        }
    }

    /// Parse a bare spec document for the given level
    pub fn from_json(
        level: EntityLevel,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match level {
            EntityLevel::Root => EntitySpec::Root(serde_json::from_value(value)?),
            EntityLevel::Namespace => EntitySpec::Namespace(serde_json::from_value(value)?),
            EntityLevel::Principal => EntitySpec::Principal(serde_json::from_value(value)?),
        })
    }

    /// Issuer of an entity with this spec declared in `scope`
    pub fn parent(&self, scope: &str) -> Option<EntityId> {
        match self {
            EntitySpec::Root(_) => None,
            EntitySpec::Namespace(spec) => Some(EntityId::new(
                EntityLevel::Root,
                spec.root_ref.resolve(scope),
            )),
            EntitySpec::Principal(spec) => Some(EntityId::new(
                EntityLevel::Namespace,
                spec.namespace_ref.resolve(scope),
            )),
        }
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        match self {
            EntitySpec::Root(spec) => validate_root(spec),
            EntitySpec::Namespace(spec) => validate_namespace(spec),
            EntitySpec::Principal(spec) => validate_principal(spec),
        }
    }
}

/// A declared entity as held by the control-plane store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub spec: EntitySpec,

    /// Incremented on every spec change
    pub generation: u64,

    /// Set once an administrator asked for removal
    #[serde(default)]
    pub deletion_requested: bool,

    /// Entity whose deletion also deletes this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityId>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Entity {
    /// Declare a new entity. The level comes from the spec.
    pub fn new(key: EntityKey, spec: EntitySpec) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: EntityId::new(spec.level(), key),
            spec,
            generation: 1,
            deletion_requested: false,
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tie this entity's lifetime to `owner`
    pub fn owned_by(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn level(&self) -> EntityLevel {
        self.id.level
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.spec.parent(self.id.scope())
    }

    /// Replace the spec, bumping the generation when it differs.
    ///
    /// Returns whether anything changed.
    pub fn update_spec(&mut self, spec: EntitySpec) -> Result<bool, SpecValidationError> {
        if spec.level() != self.id.level {
            return Err(SpecValidationError::LevelMismatch {
                expected: self.id.level,
                actual: spec.level(),
            });
        }
        if spec == self.spec {
            return Ok(false);
        }
        self.spec = spec;
        self.generation += 1;
        self.updated_at = chrono::Utc::now();
        Ok(true)
    }
}

/// Spec validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid {kind} public key: {value}")]
    InvalidPublicKey { kind: &'static str, value: String },

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid time of day (expected HH:MM:SS): {0}")]
    InvalidTime(String),

    #[error("unknown connection type: {0}")]
    UnknownConnectionType(String),

    #[error("service latency sampling must be 1..=100, got {0}")]
    InvalidSampling(u8),

    #[error("spec level {actual} does not match entity level {expected}")]
    LevelMismatch {
        expected: EntityLevel,
        actual: EntityLevel,
    },
}

fn validate_root(spec: &RootSpec) -> Result<(), SpecValidationError> {
    for key in &spec.signing_keys {
        if !is_public_key('O', key) {
            return Err(SpecValidationError::InvalidPublicKey {
                kind: "operator",
                value: key.clone(),
            });
        }
    }
    for url in &spec.server_urls {
        match url.split_once("://") {
            Some((scheme, host)) if !scheme.is_empty() && !host.is_empty() => {}
            _ => return Err(SpecValidationError::InvalidUrl(url.clone())),
        }
    }
    Ok(())
}

fn validate_namespace(spec: &NamespaceSpec) -> Result<(), SpecValidationError> {
    if spec.root_ref.name.is_empty() {
        return Err(SpecValidationError::Empty("root_ref.name"));
    }
    if spec.allowed_scopes.iter().any(String::is_empty) {
        return Err(SpecValidationError::Empty("allowed_scopes entry"));
    }
    for import in &spec.imports {
        if import.subject.is_empty() {
            return Err(SpecValidationError::Empty("import subject"));
        }
        if !is_public_key('A', &import.account) {
            return Err(SpecValidationError::InvalidPublicKey {
                kind: "account",
                value: import.account.clone(),
            });
        }
    }
    for export in &spec.exports {
        if export.subject.is_empty() {
            return Err(SpecValidationError::Empty("export subject"));
        }
        if let Some(latency) = &export.latency {
            if !(1..=100).contains(&latency.sampling) {
                return Err(SpecValidationError::InvalidSampling(latency.sampling));
            }
            if latency.results.is_empty() {
                return Err(SpecValidationError::Empty("service latency results subject"));
            }
        }
    }
    Ok(())
}

fn validate_principal(spec: &PrincipalSpec) -> Result<(), SpecValidationError> {
    if spec.namespace_ref.name.is_empty() {
        return Err(SpecValidationError::Empty("namespace_ref.name"));
    }
    for cidr in &spec.limits.user.src {
        if !is_cidr(cidr) {
            return Err(SpecValidationError::InvalidCidr(cidr.clone()));
        }
    }
    for range in &spec.limits.user.times {
        for value in [&range.start, &range.end] {
            if NaiveTime::parse_from_str(value, "%H:%M:%S").is_err() {
                return Err(SpecValidationError::InvalidTime(value.clone()));
            }
        }
    }
    for conn_type in &spec.allowed_connection_types {
        if !CONNECTION_TYPES.contains(&conn_type.as_str()) {
            return Err(SpecValidationError::UnknownConnectionType(conn_type.clone()));
        }
    }
    Ok(())
}

/// Shape check for an encoded nkey public key with the given role prefix
pub fn is_public_key(prefix: char, value: &str) -> bool {
    value.len() == 56
        && value.starts_with(prefix)
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
}

fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    match addr {
        IpAddr::V4(_) => prefix <= 32,
        IpAddr::V6(_) => prefix <= 128,
    }
}

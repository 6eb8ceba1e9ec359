//! Claims bodies
//!
//! Each trust level has one claims shape, built deterministically from the
//! declared spec. Comparison is explicit per field: `changed_fields` lists
//! the wire names of every field that differs, and equality means the list
//! is empty.

use crate::keys::KeyKind;
use keystone_types::{
    Export, Import, NamespaceLimits, NamespaceSpec, Permission, Permissions, PrincipalLimits,
    PrincipalSpec, ResponsePermission, RevocationList, RootSpec,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A claims body that can be carried in a credential
pub trait ClaimsBody: Serialize + DeserializeOwned + Clone + PartialEq + Debug {
    /// Value of the `type` field in the `nats` section
    const CLAIM_TYPE: &'static str;

    /// Kind of the subject key
    const SUBJECT_KIND: KeyKind;

    /// Kind of key allowed to sign this body
    const ISSUER_KIND: KeyKind;

    /// Wire names of the fields that differ from `previous`
    fn changed_fields(&self, previous: &Self) -> Vec<&'static str>;
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Collects names of differing fields
struct FieldDiff(Vec<&'static str>);

impl FieldDiff {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn check<T: PartialEq + ?Sized>(
        mut self,
        name: &'static str,
        current: &T,
        previous: &T,
    ) -> Self {
        if current != previous {
            self.0.push(name);
        }
        self
    }

    fn finish(self) -> Vec<&'static str> {
        self.0
    }
}

// ═══════════════════════════════════════════════════════════════════
// OPERATOR
// ═══════════════════════════════════════════════════════════════════

/// Claims of a root authority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorClaims {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_service_urls: Vec<String>,
}

impl From<&RootSpec> for OperatorClaims {
    fn from(spec: &RootSpec) -> Self {
        Self {
            signing_keys: spec.signing_keys.clone(),
            operator_service_urls: spec.server_urls.clone(),
        }
    }
}

impl ClaimsBody for OperatorClaims {
    const CLAIM_TYPE: &'static str = "operator";
    const SUBJECT_KIND: KeyKind = KeyKind::Operator;
    const ISSUER_KIND: KeyKind = KeyKind::Operator;

    fn changed_fields(&self, previous: &Self) -> Vec<&'static str> {
        FieldDiff::new()
            .check("signing_keys", &self.signing_keys, &previous.signing_keys)
            .check(
                "operator_service_urls",
                &self.operator_service_urls,
                &previous.operator_service_urls,
            )
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// ACCOUNT
// ═══════════════════════════════════════════════════════════════════

/// Claims of a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClaims {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<Export>,

    #[serde(default)]
    pub limits: NamespaceLimits,

    /// Scoped signing keys are never issued; kept for wire compatibility
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "RevocationList::is_empty")]
    pub revocations: RevocationList,
}

impl From<&NamespaceSpec> for AccountClaims {
    fn from(spec: &NamespaceSpec) -> Self {
        Self {
            imports: spec.imports.clone(),
            exports: spec.exports.clone(),
            limits: spec.limits.clone(),
            signing_keys: Vec::new(),
            revocations: spec.revocations.clone(),
        }
    }
}

impl ClaimsBody for AccountClaims {
    const CLAIM_TYPE: &'static str = "account";
    const SUBJECT_KIND: KeyKind = KeyKind::Account;
    const ISSUER_KIND: KeyKind = KeyKind::Operator;

    fn changed_fields(&self, previous: &Self) -> Vec<&'static str> {
        FieldDiff::new()
            .check("imports", &self.imports, &previous.imports)
            .check("exports", &self.exports, &previous.exports)
            .check("limits", &self.limits, &previous.limits)
            .check("signing_keys", &self.signing_keys, &previous.signing_keys)
            .check("revocations", &self.revocations, &previous.revocations)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// USER
// ═══════════════════════════════════════════════════════════════════

/// Claims of a principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    #[serde(flatten)]
    pub permissions: Permissions,

    #[serde(flatten)]
    pub limits: PrincipalLimits,

    #[serde(default, skip_serializing_if = "is_false")]
    pub bearer_token: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_connection_types: Vec<String>,
}

impl From<&PrincipalSpec> for UserClaims {
    fn from(spec: &PrincipalSpec) -> Self {
        Self {
            permissions: spec.permissions.clone(),
            limits: spec.limits.clone(),
            bearer_token: spec.bearer_token,
            allowed_connection_types: spec.allowed_connection_types.clone(),
        }
    }
}

impl UserClaims {
    pub fn publish(&self) -> &Permission {
        &self.permissions.publish
    }

    pub fn subscribe(&self) -> &Permission {
        &self.permissions.subscribe
    }

    pub fn response(&self) -> Option<&ResponsePermission> {
        self.permissions.response.as_ref()
    }
}

impl ClaimsBody for UserClaims {
    const CLAIM_TYPE: &'static str = "user";
    const SUBJECT_KIND: KeyKind = KeyKind::User;
    const ISSUER_KIND: KeyKind = KeyKind::Account;

    fn changed_fields(&self, previous: &Self) -> Vec<&'static str> {
        let (user, prev_user) = (&self.limits.user, &previous.limits.user);
        let (nats, prev_nats) = (&self.limits.nats, &previous.limits.nats);

        FieldDiff::new()
            .check("pub", &self.permissions.publish, &previous.permissions.publish)
            .check("sub", &self.permissions.subscribe, &previous.permissions.subscribe)
            .check("resp", &self.permissions.response, &previous.permissions.response)
            .check("src", &user.src, &prev_user.src)
            .check("times", &user.times, &prev_user.times)
            .check("times_location", &user.times_location, &prev_user.times_location)
            .check("subs", &nats.subs, &prev_nats.subs)
            .check("data", &nats.data, &prev_nats.data)
            .check("payload", &nats.payload, &prev_nats.payload)
            .check("bearer_token", &self.bearer_token, &previous.bearer_token)
            .check(
                "allowed_connection_types",
                &self.allowed_connection_types,
                &previous.allowed_connection_types,
            )
            .finish()
    }
}

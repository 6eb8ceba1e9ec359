//! NATS claim building blocks
//!
//! These structures appear both in declared specs and in issued claims, so
//! they serialize with the field names the NATS server expects inside a JWT.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker value NATS uses for "no limit"
pub const NO_LIMIT: i64 = -1;

fn no_limit() -> i64 {
    NO_LIMIT
}

fn default_true() -> bool {
    true
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ═══════════════════════════════════════════════════════════════════
// PERMISSIONS
// ═══════════════════════════════════════════════════════════════════

/// Allow/deny subject lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl Permission {
    pub fn allow<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: subjects.into_iter().map(Into::into).collect(),
            deny: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Permission to publish responses to reply subjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePermission {
    /// Maximum number of responses per request
    #[serde(rename = "max")]
    pub max_msgs: i64,
    /// Time window in nanoseconds, negative for unlimited
    #[serde(rename = "ttl")]
    pub expires: i64,
}

/// Publish/subscribe permissions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(rename = "pub", default, skip_serializing_if = "Permission::is_empty")]
    pub publish: Permission,
    #[serde(rename = "sub", default, skip_serializing_if = "Permission::is_empty")]
    pub subscribe: Permission,
    #[serde(rename = "resp", default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsePermission>,
}

// ═══════════════════════════════════════════════════════════════════
// LIMITS
// ═══════════════════════════════════════════════════════════════════

/// Message limits shared by accounts and users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsLimits {
    #[serde(default = "no_limit")]
    pub subs: i64,
    #[serde(default = "no_limit")]
    pub data: i64,
    #[serde(default = "no_limit")]
    pub payload: i64,
}

impl Default for NatsLimits {
    fn default() -> Self {
        Self {
            subs: NO_LIMIT,
            data: NO_LIMIT,
            payload: NO_LIMIT,
        }
    }
}

/// Account-only limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLimits {
    #[serde(default = "no_limit")]
    pub imports: i64,
    #[serde(default = "no_limit")]
    pub exports: i64,
    #[serde(default = "default_true")]
    pub wildcards: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disallow_bearer: bool,
    #[serde(default = "no_limit")]
    pub conn: i64,
    #[serde(default = "no_limit")]
    pub leaf: i64,
}

impl Default for AccountLimits {
    fn default() -> Self {
        Self {
            imports: NO_LIMIT,
            exports: NO_LIMIT,
            wildcards: true,
            disallow_bearer: false,
            conn: NO_LIMIT,
            leaf: NO_LIMIT,
        }
    }
}

/// JetStream limits. All zero means JetStream is disabled for the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JetStreamLimits {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mem_storage: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub disk_storage: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub streams: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub consumer: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_ack_pending: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mem_max_stream_bytes: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub disk_max_stream_bytes: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub max_bytes_required: bool,
}

/// Complete limit set carried by a namespace credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceLimits {
    #[serde(flatten)]
    pub nats: NatsLimits,
    #[serde(flatten)]
    pub account: AccountLimits,
    #[serde(flatten)]
    pub jetstream: JetStreamLimits,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tiered_limits: BTreeMap<String, JetStreamLimits>,
}

/// Daily time window, `HH:MM:SS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Connection restrictions for a principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLimits {
    /// Allowed source CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub src: Vec<String>,
    /// Allowed connection windows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<TimeRange>,
    /// Time zone for `times`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub times_location: String,
}

// ═══════════════════════════════════════════════════════════════════
// IMPORTS / EXPORTS
// ═══════════════════════════════════════════════════════════════════

/// Kind of subject shared between accounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    #[default]
    Stream,
    Service,
}

/// How a service export answers requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    Singleton,
    Stream,
    Chunked,
}

/// Latency tracking for a service export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLatency {
    /// Sampling percentage, 1..=100
    pub sampling: u8,
    /// Subject the latency results are published to
    pub results: String,
}

/// Subject imported from another account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub subject: String,
    /// Public key of the exporting account
    pub account: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_subject: String,
    #[serde(rename = "type", default)]
    pub export_type: ExportType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub share: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_trace: bool,
}

/// Subject exported to other accounts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub subject: String,
    #[serde(rename = "type", default)]
    pub export_type: ExportType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub token_req: bool,
    #[serde(default, skip_serializing_if = "RevocationList::is_empty")]
    pub revocations: RevocationList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    /// Nanoseconds
    #[serde(default, skip_serializing_if = "is_zero")]
    pub response_threshold: i64,
    #[serde(rename = "service_latency", default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<ServiceLatency>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub account_token_position: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub advertise: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info_url: String,
}

// ═══════════════════════════════════════════════════════════════════
// REVOCATIONS
// ═══════════════════════════════════════════════════════════════════

/// Public key (or `*`) to unix timestamp.
///
/// Credentials for a key issued at or before the recorded time are revoked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevocationList(BTreeMap<String, i64>);

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke credentials for `public_key` issued at or before `at`.
    /// An earlier timestamp never replaces a later one.
    pub fn revoke(&mut self, public_key: impl Into<String>, at: i64) {
        let entry = self.0.entry(public_key.into()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    pub fn get(&self, public_key: &str) -> Option<i64> {
        self.0.get(public_key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_are_unlimited() {
        let limits: NamespaceLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits.nats.subs, NO_LIMIT);
        assert_eq!(limits.account.conn, NO_LIMIT);
        assert!(limits.account.wildcards);
        assert_eq!(limits.jetstream, JetStreamLimits::default());
    }

    #[test]
    fn test_limits_flatten_into_nats_shape() {
        let limits: NamespaceLimits =
            serde_json::from_str(r#"{"subs": 10, "conn": 5, "mem_storage": 1024}"#).unwrap();
        assert_eq!(limits.nats.subs, 10);
        assert_eq!(limits.account.conn, 5);
        assert_eq!(limits.jetstream.mem_storage, 1024);

        let json = serde_json::to_value(&limits).unwrap();
        assert_eq!(json["subs"], 10);
        assert_eq!(json["payload"], NO_LIMIT);
        assert!(json.get("disk_storage").is_none());
    }

    #[test]
    fn test_permissions_wire_names() {
        let perms = Permissions {
            publish: Permission::allow(["foo.*"]),
            subscribe: Permission::default(),
            response: Some(ResponsePermission {
                max_msgs: 1,
                expires: -1,
            }),
        };
        let json = serde_json::to_value(&perms).unwrap();
        assert_eq!(json["pub"]["allow"][0], "foo.*");
        assert!(json.get("sub").is_none());
        assert_eq!(json["resp"]["max"], 1);
        assert_eq!(json["resp"]["ttl"], -1);
    }

    #[test]
    fn test_revocation_keeps_latest_timestamp() {
        let mut list = RevocationList::new();
        list.revoke("UABC", 100);
        list.revoke("UABC", 50);
        assert_eq!(list.get("UABC"), Some(100));

        list.revoke("UABC", 150);
        list.revoke("*", 10);
        assert_eq!(list.get("UABC"), Some(150));
        assert_eq!(list.len(), 2);

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["UABC"], 150);
        assert_eq!(json["*"], 10);
    }

    #[test]
    fn test_export_type_wire_format() {
        let json = r#"{"subject": "orders.>", "type": "service", "response_type": "Stream"}"#;
        let export: Export = serde_json::from_str(json).unwrap();
        assert_eq!(export.export_type, ExportType::Service);
        assert_eq!(export.response_type, Some(ResponseType::Stream));
    }
}

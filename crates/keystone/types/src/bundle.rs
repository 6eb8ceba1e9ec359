//! Persisted key bundle
//!
//! The bundle is the unit of persistence for an entity: seed, public
//! identity and signed credential are always written together.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed, identity and credential of one entity.
///
/// Fields are opaque bytes as read from the store; they may be corrupt and
/// are only trusted after decoding.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    pub seed: Vec<u8>,
    pub identity: Vec<u8>,
    pub credential: Vec<u8>,
}

impl KeyBundle {
    pub fn new(
        seed: impl Into<Vec<u8>>,
        identity: impl Into<Vec<u8>>,
        credential: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            seed: seed.into(),
            identity: identity.into(),
            credential: credential.into(),
        }
    }

    /// Identity as text, if it is valid UTF-8 and non-empty
    pub fn identity_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.identity)
            .ok()
            .filter(|s| !s.is_empty())
    }

    /// Credential as text, if it is valid UTF-8 and non-empty
    pub fn credential_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.credential)
            .ok()
            .filter(|s| !s.is_empty())
    }
}

// Seeds never show up in logs.
impl fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBundle")
            .field("seed", &"<redacted>")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .field("credential_len", &self.credential.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_seed() {
        let seed = "SOALU7LPGJK2BDF7IHD7UZT6ZM23UMKYLGJLNTGRR7ZHKM4G2ATW5QHJA";
        let bundle = KeyBundle::new(seed, "OABC", "a.b.c");
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("SOALU7"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("OABC"));
    }

    #[test]
    fn test_text_accessors() {
        let bundle = KeyBundle::new(Vec::new(), vec![0xff, 0xfe], "token");
        assert_eq!(bundle.identity_str(), None);
        assert_eq!(bundle.credential_str(), Some("token"));
        assert_eq!(KeyBundle::default().credential_str(), None);
    }
}

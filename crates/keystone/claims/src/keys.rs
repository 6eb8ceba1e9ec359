//! Key lifecycle
//!
//! Loads an entity's key pair from stored seed bytes, or generates a fresh
//! one when the stored material is absent or cannot be decoded. Nothing is
//! persisted here; callers write the returned seed into the entity bundle.

use crate::error::{ClaimsError, ClaimsResult};
use keystone_types::spec::is_public_key;
use keystone_types::EntityLevel;
use nkeys::KeyPair;
use std::fmt;
use tracing::warn;

/// Key kind required at each trust level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Operator,
    Account,
    User,
}

impl KeyKind {
    pub fn for_level(level: EntityLevel) -> Self {
        match level {
            EntityLevel::Root => KeyKind::Operator,
            EntityLevel::Namespace => KeyKind::Account,
            EntityLevel::Principal => KeyKind::User,
        }
    }

    /// First character of an encoded public key of this kind
    pub fn prefix(&self) -> char {
        match self {
            KeyKind::Operator => 'O',
            KeyKind::Account => 'A',
            KeyKind::User => 'U',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Operator => "operator",
            KeyKind::Account => "account",
            KeyKind::User => "user",
        }
    }

    /// Whether `public_key` is an encoded public key of this kind
    pub fn matches(&self, public_key: &str) -> bool {
        is_public_key(self.prefix(), public_key)
    }

    fn generate(&self) -> KeyPair {
        match self {
            KeyKind::Operator => KeyPair::new_operator(),
            KeyKind::Account => KeyPair::new_account(),
            KeyKind::User => KeyPair::new_user(),
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`ensure_key_pair`]
pub struct EnsuredKeyPair {
    pub key_pair: KeyPair,
    pub public_key: String,
    seed: String,
    /// A new key pair was created; the identity is new
    pub generated: bool,
    /// Stored material existed but was unusable
    pub replaced_existing: bool,
}

impl EnsuredKeyPair {
    fn from_key_pair(
        key_pair: KeyPair,
        generated: bool,
        replaced_existing: bool,
    ) -> ClaimsResult<Self> {
        let seed = key_pair
            .seed()
            .map_err(|e| ClaimsError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            public_key: key_pair.public_key(),
            key_pair,
            seed,
            generated,
            replaced_existing,
        })
    }

    /// Encoded seed, for persistence only
    pub fn seed(&self) -> &str {
        &self.seed
    }
}

impl fmt::Debug for EnsuredKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsuredKeyPair")
            .field("public_key", &self.public_key)
            .field("generated", &self.generated)
            .field("replaced_existing", &self.replaced_existing)
            .finish_non_exhaustive()
    }
}

/// Load the key pair from `existing` seed bytes, or generate one of `kind`.
///
/// Only a decoding failure causes regeneration. A seed that decodes to a
/// key of another kind counts as a decoding failure for `kind`.
pub fn ensure_key_pair(kind: KeyKind, existing: Option<&[u8]>) -> ClaimsResult<EnsuredKeyPair> {
    let existing = existing.filter(|bytes| !bytes.is_empty());

    if let Some(bytes) = existing {
        match decode_seed(kind, bytes) {
            Ok(key_pair) => return EnsuredKeyPair::from_key_pair(key_pair, false, false),
            Err(reason) => {
                warn!(
                    kind = kind.as_str(),
                    reason = %reason,
                    "Stored key material is unusable, generating a new key pair"
                );
            }
        }
    }

    EnsuredKeyPair::from_key_pair(kind.generate(), true, existing.is_some())
}

/// Decode the signing key of an issuer
pub fn signer_from_seed(kind: KeyKind, seed: &[u8]) -> ClaimsResult<KeyPair> {
    decode_seed(kind, seed).map_err(ClaimsError::InvalidSigner)
}

fn decode_seed(kind: KeyKind, bytes: &[u8]) -> Result<KeyPair, String> {
    let text = std::str::from_utf8(bytes).map_err(|_| "seed is not valid UTF-8".to_string())?;
    let key_pair = KeyPair::from_seed(text.trim()).map_err(|e| e.to_string())?;

    let public_key = key_pair.public_key();
    if !kind.matches(&public_key) {
        return Err(format!(
            "seed belongs to a key of another kind (expected {kind}, got {})",
            public_key.chars().next().unwrap_or('?')
        ));
    }
    Ok(key_pair)
}

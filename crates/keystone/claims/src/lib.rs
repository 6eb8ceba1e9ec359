//! Keystone Claims - key lifecycle and credential codec
//!
//! This crate turns declared specs into signed NATS credentials:
//!
//! - [`keys`]: load or generate the nkey pair of an entity
//! - [`claims`]: claims bodies per trust level, with explicit field comparison
//! - [`codec`]: JWT signing, decoding with signature verification, and the
//!   reissue decision
//!
//! ## Example
//!
//! ```rust,ignore
//! use keystone_claims::{build_credential, ensure_key_pair, needs_reissue, AccountClaims, KeyKind};
//!
//! let operator = ensure_key_pair(KeyKind::Operator, None)?;
//! let account = ensure_key_pair(KeyKind::Account, stored_seed)?;
//! let claims = AccountClaims::from(&namespace_spec);
//!
//! if needs_reissue(&claims, &operator.public_key, &account.public_key, stored_jwt).is_some() {
//!     let jwt = build_credential(
//!         &claims,
//!         "orders",
//!         &operator.key_pair,
//!         &operator.public_key,
//!         &account.public_key,
//!     )?;
//! }
//! ```

#![deny(unsafe_code)]

pub mod claims;
pub mod codec;
pub mod error;
pub mod keys;

pub use claims::{AccountClaims, ClaimsBody, OperatorClaims, UserClaims};
pub use codec::{
    build_credential, build_credential_at, decode, needs_reissue, ClaimsEnvelope, NatsSection,
    ReissueReason, ALGORITHM, CLAIMS_VERSION,
};
pub use error::{ClaimsError, ClaimsResult};
pub use keys::{ensure_key_pair, signer_from_seed, EnsuredKeyPair, KeyKind};

/// Re-exported so callers can hold signer keys without depending on `nkeys`
pub use nkeys::KeyPair;

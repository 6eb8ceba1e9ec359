//! Credential codec
//!
//! Credentials are NATS JWTs: `header.payload.signature`, each part
//! base64url without padding. The signature is made by the issuer's nkey
//! over `header.payload` and checked against the `iss` public key on decode.

use crate::claims::ClaimsBody;
use crate::error::{ClaimsError, ClaimsResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use nkeys::KeyPair;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use std::fmt;

/// Claims format version understood by NATS servers
pub const CLAIMS_VERSION: u32 = 2;

/// Algorithm name NATS uses for nkey signed JWTs
pub const ALGORITHM: &str = "ed25519-nkey";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Header {
    typ: String,
    alg: String,
}

impl Header {
    fn nats() -> Self {
        Self {
            typ: "JWT".to_string(),
            alg: ALGORITHM.to_string(),
        }
    }
}

/// The `nats` section of a credential payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatsSection<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub version: u32,
}

/// Decoded credential payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimsEnvelope<T> {
    /// Digest of the payload, identifies this issuance
    #[serde(default)]
    pub jti: String,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Issuer public key
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Subject public key
    pub sub: String,
    pub nats: NatsSection<T>,
}

impl<T: ClaimsBody> ClaimsEnvelope<T> {
    pub fn claims(&self) -> &T {
        &self.nats.body
    }

    fn new(body: T, name: &str, issuer: &str, subject: &str, issued_at: i64) -> Self {
        Self {
            jti: String::new(),
            iat: issued_at,
            iss: issuer.to_string(),
            name: name.to_string(),
            sub: subject.to_string(),
            nats: NatsSection {
                body,
                claim_type: T::CLAIM_TYPE.to_string(),
                version: CLAIMS_VERSION,
            },
        }
    }
}

/// Why a credential has to be (re)issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReissueReason {
    /// No previous credential stored
    Missing,
    /// Previous credential could not be decoded or verified
    Undecodable(String),
    /// Previous credential was signed by another issuer identity
    IssuerChanged { previous: String },
    /// Previous credential was bound to another subject identity
    SubjectChanged { previous: String },
    /// Claims body differs
    ClaimsChanged(Vec<&'static str>),
    /// The entity got a new key pair
    KeyGenerated,
}

impl fmt::Display for ReissueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReissueReason::Missing => write!(f, "no credential issued yet"),
            ReissueReason::Undecodable(e) => write!(f, "stored credential unusable: {e}"),
            ReissueReason::IssuerChanged { previous } => {
                write!(f, "issuer identity changed from {previous}")
            }
            ReissueReason::SubjectChanged { previous } => {
                write!(f, "subject identity changed from {previous}")
            }
            ReissueReason::ClaimsChanged(fields) => {
                write!(f, "claims changed: {}", fields.join(", "))
            }
            ReissueReason::KeyGenerated => write!(f, "new key pair generated"),
        }
    }
}

/// Sign `body` for `subject` with the issuer key.
///
/// `issuer_identity` is the identity the issuer currently publishes; a signer
/// whose public key differs from it, or whose kind may not sign this body,
/// is rejected.
pub fn build_credential<T: ClaimsBody>(
    body: &T,
    name: &str,
    issuer_key: &KeyPair,
    issuer_identity: &str,
    subject: &str,
) -> ClaimsResult<String> {
    build_credential_at(
        body,
        name,
        issuer_key,
        issuer_identity,
        subject,
        chrono::Utc::now().timestamp(),
    )
}

/// [`build_credential`] with an explicit issue time
pub fn build_credential_at<T: ClaimsBody>(
    body: &T,
    name: &str,
    issuer_key: &KeyPair,
    issuer_identity: &str,
    subject: &str,
    issued_at: i64,
) -> ClaimsResult<String> {
    let signer = issuer_key.public_key();
    if signer != issuer_identity {
        return Err(ClaimsError::InvalidSigner(format!(
            "signing key {signer} does not match issuer identity {issuer_identity}"
        )));
    }
    if !T::ISSUER_KIND.matches(&signer) {
        return Err(ClaimsError::InvalidSigner(format!(
            "{} claims must be signed by an {} key, got {signer}",
            T::CLAIM_TYPE,
            T::ISSUER_KIND
        )));
    }
    if !T::SUBJECT_KIND.matches(subject) {
        return Err(ClaimsError::Encode(format!(
            "subject {subject} is not an {} public key",
            T::SUBJECT_KIND
        )));
    }

    let mut envelope = ClaimsEnvelope::new(body.clone(), name, &signer, subject, issued_at);
    envelope.jti = payload_digest(&envelope)?;

    let header =
        serde_json::to_vec(&Header::nats()).map_err(|e| ClaimsError::Encode(e.to_string()))?;
    let payload = serde_json::to_vec(&envelope).map_err(|e| ClaimsError::Encode(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = issuer_key
        .sign(signing_input.as_bytes())
        .map_err(|e| ClaimsError::Signing(e.to_string()))?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

fn payload_digest<T: ClaimsBody>(envelope: &ClaimsEnvelope<T>) -> ClaimsResult<String> {
    let unsealed = ClaimsEnvelope {
        jti: String::new(),
        ..envelope.clone()
    };
    let bytes = serde_json::to_vec(&unsealed).map_err(|e| ClaimsError::Encode(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(Sha512_256::digest(&bytes)))
}

/// Decode a credential and verify its signature and issuer kind
pub fn decode<T: ClaimsBody>(token: &str) -> ClaimsResult<ClaimsEnvelope<T>> {
    let token = token.trim();
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimsError::Decode("expected three dot separated parts".to_string()));
    };

    let header: Header = serde_json::from_slice(&decode_part(header)?)
        .map_err(|e| ClaimsError::Decode(format!("header: {e}")))?;
    if header.alg != ALGORITHM {
        return Err(ClaimsError::Decode(format!("unsupported algorithm {}", header.alg)));
    }

    let payload_bytes = decode_part(payload)?;
    let envelope: ClaimsEnvelope<T> = serde_json::from_slice(&payload_bytes)
        .map_err(|e| ClaimsError::Decode(format!("payload: {e}")))?;
    if envelope.nats.claim_type != T::CLAIM_TYPE {
        return Err(ClaimsError::Decode(format!(
            "expected {} claims, found {}",
            T::CLAIM_TYPE,
            envelope.nats.claim_type
        )));
    }
    if envelope.nats.version != CLAIMS_VERSION {
        return Err(ClaimsError::Decode(format!(
            "unsupported claims version {}",
            envelope.nats.version
        )));
    }
    if !T::ISSUER_KIND.matches(&envelope.iss) {
        return Err(ClaimsError::Verification(format!(
            "issuer {} may not sign {} claims",
            envelope.iss,
            T::CLAIM_TYPE
        )));
    }

    let issuer = KeyPair::from_public_key(&envelope.iss)
        .map_err(|e| ClaimsError::Verification(format!("issuer key: {e}")))?;
    let signing_input_len = token.len() - signature.len() - 1;
    issuer
        .verify(token[..signing_input_len].as_bytes(), &decode_part(signature)?)
        .map_err(|e| ClaimsError::Verification(e.to_string()))?;

    Ok(envelope)
}

fn decode_part(part: &str) -> ClaimsResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| ClaimsError::Decode(format!("base64: {e}")))
}

/// Decide whether a credential for `candidate` has to be signed.
///
/// A previous credential that cannot be decoded or verified is never
/// trusted. Otherwise a reissue is needed when the issuer or subject
/// identity changed, or when any claims field differs.
pub fn needs_reissue<T: ClaimsBody>(
    candidate: &T,
    issuer_identity: &str,
    subject: &str,
    previous: Option<&[u8]>,
) -> Option<ReissueReason> {
    let previous = match previous {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return Some(ReissueReason::Missing),
    };
    let Ok(token) = std::str::from_utf8(previous) else {
        return Some(ReissueReason::Undecodable("not valid UTF-8".to_string()));
    };
    let envelope = match decode::<T>(token) {
        Ok(envelope) => envelope,
        Err(e) => return Some(ReissueReason::Undecodable(e.to_string())),
    };

    if envelope.iss != issuer_identity {
        return Some(ReissueReason::IssuerChanged {
            previous: envelope.iss,
        });
    }
    if envelope.sub != subject {
        return Some(ReissueReason::SubjectChanged {
            previous: envelope.sub,
        });
    }

    let changed = candidate.changed_fields(envelope.claims());
    if changed.is_empty() {
        None
    } else {
        Some(ReissueReason::ClaimsChanged(changed))
    }
}

//! Error types for key handling and the claims codec

use thiserror::Error;

/// Key and credential errors
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// Signer seed is malformed, of the wrong kind, or does not match the
    /// expected issuer identity
    #[error("Invalid signer: {0}")]
    InvalidSigner(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}

impl ClaimsError {
    /// Whether the error concerns the signer rather than the credential
    /// being read. Signer errors fail the reconciliation attempt.
    pub fn is_signer_error(&self) -> bool {
        matches!(
            self,
            ClaimsError::InvalidSigner(_) | ClaimsError::Signing(_) | ClaimsError::KeyGeneration(_)
        )
    }
}

/// Result type for claims operations
pub type ClaimsResult<T> = Result<T, ClaimsError>;

use thiserror::Error;

/// Resolver errors
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl From<keystone_claims::ClaimsError> for ResolverError {
    fn from(err: keystone_claims::ClaimsError) -> Self {
        ResolverError::InvalidCredential(err.to_string())
    }
}

pub type ResolverResult<T> = Result<T, ResolverError>;

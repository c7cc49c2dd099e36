use crate::Purpose;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("signing secret must be at least {0} bytes")]
    WeakSecret(usize),
    #[error("token ttl must be positive")]
    InvalidTtl,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("token expired")]
    Expired,
    #[error("token purpose mismatch: expected {expected}, found {found}")]
    WrongPurpose { expected: Purpose, found: Purpose },
    #[error("token subject mismatch")]
    SubjectMismatch,
    #[error("token issued before the latest account change")]
    Stale,
}

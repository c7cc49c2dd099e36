//! Purpose-tagged, expiring account tokens.
//!
//! Every token is an HS512 JWT bound to a username (`sub`) and tagged with the
//! single [`Purpose`] it may be used for. Verification checks the signature,
//! issuer, expiry and purpose; the caller then binds the claims to the stored
//! user with [`TokenClaims::ensure_subject`] and [`TokenClaims::ensure_fresh`],
//! which rejects tokens issued before the user's freshness watermarks
//! (last account change, last forced logout).

mod error;
mod jwt;
mod purpose;

pub use error::Error;
pub use jwt::{MIN_SECRET_LEN, TokenClaims, TokenKeys};
pub use purpose::Purpose;

//! Auth handlers and supporting modules.
//!
//! Public account flows live under `/v1/auth`: sign-up, confirmation, password
//! reset and sign-in. Emailed tokens pass through [`verification`]; bearer
//! tokens on protected routes pass through [`principal`].
//!
//! ## Freshness
//!
//! A token is stale once the account changed after it was issued
//! (`updated_at`) or the owner logged out from all devices
//! (`logout_from_all_devices_at`). Both watermarks are compared at millisecond
//! precision and a token issued in the same millisecond is still accepted.

pub(crate) mod confirmation;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod signin;
pub(crate) mod signup;
mod state;
pub(crate) mod storage;
pub(crate) mod types;
pub(crate) mod utils;
pub(crate) mod verification;

pub use principal::require_auth;
pub use state::{AuthConfig, AuthState};
pub use types::Role;

#[cfg(test)]
mod tests;

//! # Warden (user accounts and token authentication)
//!
//! `warden` manages user accounts: registration with email confirmation,
//! password reset, role-based access (`USER`, `ADMIN`) and administrative
//! account management.
//!
//! ## Tokens
//!
//! Every token is a signed, expiring JWT tagged with exactly one purpose
//! (`CONFIRM_REGISTRATION`, `FORGOT_PASSWORD`, `ACCESS_RESOURCES`) and bound to
//! a username. A token is only accepted when it was issued at or after both of
//! the user's freshness watermarks:
//!
//! - **`updated_at`:** bumped by activation, password reset and every admin
//!   change, so confirmation and reset tokens are effectively single use.
//! - **`logout_from_all_devices_at`:** bumped by a (forced) logout from all
//!   devices.
//!
//! Any verification failure is reported as `403 Forbidden` for the emailed
//! token flows and `401 Unauthorized` for bearer authentication.
//!
//! ## Email
//!
//! Token emails are written to an `email_outbox` table in the same transaction
//! as the state change and delivered by a background worker.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

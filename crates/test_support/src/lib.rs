//! Test fixtures shared by the warden test suites.
//!
//! Database-backed tests call [`database::TestDatabase::start`]. It yields
//! `None` when no container runtime is reachable so the test can return early;
//! any other setup failure is an error.

pub mod database;
pub mod postgres;
pub mod runtime;

use uuid::Uuid;

pub(crate) fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

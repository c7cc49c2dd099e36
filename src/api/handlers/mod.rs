//! API handlers for Warden.
//!
//! `auth` holds the public account flows and the bearer-token principal used by
//! every protected route.

pub mod admin;
pub mod auth;
pub mod departments;
pub mod health;
pub mod root;
pub mod users;

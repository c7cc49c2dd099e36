//! Auth state and configuration.

use auth_token::{Purpose, TokenClaims, TokenKeys};
use chrono::{DateTime, Utc};

const DEFAULT_CONFIRM_REGISTRATION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_FORGOT_PASSWORD_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    confirm_registration_ttl_seconds: i64,
    forgot_password_ttl_seconds: i64,
    access_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            confirm_registration_ttl_seconds: DEFAULT_CONFIRM_REGISTRATION_TTL_SECONDS,
            forgot_password_ttl_seconds: DEFAULT_FORGOT_PASSWORD_TTL_SECONDS,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_confirm_registration_ttl_seconds(mut self, seconds: i64) -> Self {
        self.confirm_registration_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_forgot_password_ttl_seconds(mut self, seconds: i64) -> Self {
        self.forgot_password_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn ttl_seconds(&self, purpose: Purpose) -> i64 {
        match purpose {
            Purpose::ConfirmRegistration => self.confirm_registration_ttl_seconds,
            Purpose::ForgotPassword => self.forgot_password_ttl_seconds,
            Purpose::AccessResources => self.access_ttl_seconds,
        }
    }
}

pub struct AuthState {
    config: AuthConfig,
    keys: TokenKeys,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, keys: TokenKeys) -> Self {
        Self { config, keys }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue a token for `username` with the configured TTL of `purpose`.
    ///
    /// # Errors
    /// Returns an error if the TTL is not positive or signing fails.
    pub fn issue(
        &self,
        username: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<String, auth_token::Error> {
        self.keys.sign(
            username,
            purpose,
            self.config.ttl_seconds(purpose),
            now.timestamp_millis(),
        )
    }

    /// Check signature, issuer, expiry and purpose.
    ///
    /// # Errors
    /// Returns an error if any check fails.
    pub fn verify(
        &self,
        token: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, auth_token::Error> {
        self.keys.verify(token, purpose, now.timestamp())
    }
}

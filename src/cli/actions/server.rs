use crate::api::{self, AuthConfig, AuthState, email::EmailWorkerConfig};
use anyhow::{Context, Result};
use auth_token::TokenKeys;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub frontend_base_url: String,
    pub confirm_registration_ttl_seconds: i64,
    pub forgot_password_ttl_seconds: i64,
    pub access_ttl_seconds: i64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

impl Args {
    /// Build the shared auth state from the signing secret and TTLs.
    ///
    /// # Errors
    /// Returns an error when the token secret is too short.
    pub fn auth_state(&self) -> Result<Arc<AuthState>> {
        let keys = TokenKeys::from_secret(
            self.token_secret.expose_secret().as_bytes(),
            self.token_issuer.clone(),
        )
        .context("Invalid token signing secret")?;

        let config = AuthConfig::new(self.frontend_base_url.clone())
            .with_confirm_registration_ttl_seconds(self.confirm_registration_ttl_seconds)
            .with_forgot_password_ttl_seconds(self.forgot_password_ttl_seconds)
            .with_access_ttl_seconds(self.access_ttl_seconds);

        Ok(Arc::new(AuthState::new(config, keys)))
    }

    #[must_use]
    pub fn email_config(&self) -> EmailWorkerConfig {
        EmailWorkerConfig::new()
            .with_poll_interval_seconds(self.email_outbox_poll_seconds)
            .with_batch_size(self.email_outbox_batch_size)
            .with_max_attempts(self.email_outbox_max_attempts)
            .with_backoff_base_seconds(self.email_outbox_backoff_base_seconds)
            .with_backoff_max_seconds(self.email_outbox_backoff_max_seconds)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the auth state cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let auth_state = args.auth_state()?;
    let email_config = args.email_config();

    api::new(args.port, args.dsn, auth_state, email_config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_token::Purpose;

    fn args(secret: &str) -> Args {
        Args {
            port: 8080,
            dsn: "postgres://postgres@localhost:5432/warden".to_string(),
            token_secret: SecretString::from(secret.to_string()),
            token_issuer: "warden".to_string(),
            frontend_base_url: "https://warden.dev".to_string(),
            confirm_registration_ttl_seconds: 600,
            forgot_password_ttl_seconds: 300,
            access_ttl_seconds: 120,
            email_outbox_poll_seconds: 2,
            email_outbox_batch_size: 3,
            email_outbox_max_attempts: 4,
            email_outbox_backoff_base_seconds: 5,
            email_outbox_backoff_max_seconds: 6,
        }
    }

    #[test]
    fn auth_state_uses_configured_ttls() -> Result<()> {
        let state = args("0123456789abcdef0123456789abcdef").auth_state()?;
        let config = state.config();
        assert_eq!(config.frontend_base_url(), "https://warden.dev");
        assert_eq!(config.ttl_seconds(Purpose::ConfirmRegistration), 600);
        assert_eq!(config.ttl_seconds(Purpose::ForgotPassword), 300);
        assert_eq!(config.ttl_seconds(Purpose::AccessResources), 120);
        Ok(())
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(args("too-short").auth_state().is_err());
    }

    #[test]
    fn email_config_from_args() {
        let config = args("0123456789abcdef0123456789abcdef").email_config();
        assert_eq!(config.batch_size(), 3);
        assert_eq!(config.max_attempts(), 4);
        assert_eq!(config.poll_interval().as_secs(), 2);
        assert_eq!(config.backoff_base().as_secs(), 5);
        assert_eq!(config.backoff_max().as_secs(), 6);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", args("0123456789abcdef0123456789abcdef"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}

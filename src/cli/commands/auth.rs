use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_CONFIRM_REGISTRATION_TTL: &str = "confirm-registration-ttl-seconds";
pub const ARG_FORGOT_PASSWORD_TTL: &str = "forgot-password-ttl-seconds";
pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";

/// Token signing and link settings.
#[derive(Debug)]
pub struct Options {
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub frontend_base_url: String,
    pub confirm_registration_ttl_seconds: i64,
    pub forgot_password_ttl_seconds: i64,
    pub access_ttl_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error when a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --token-secret")?;
        let token_issuer = matches
            .get_one::<String>(ARG_TOKEN_ISSUER)
            .cloned()
            .unwrap_or_else(|| "warden".to_string());
        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .context("missing required argument: --frontend-base-url")?;
        let ttl = |name: &str| matches.get_one::<i64>(name).copied();

        Ok(Self {
            token_secret,
            token_issuer,
            frontend_base_url,
            confirm_registration_ttl_seconds: ttl(ARG_CONFIRM_REGISTRATION_TTL).unwrap_or(86_400),
            forgot_password_ttl_seconds: ttl(ARG_FORGOT_PASSWORD_TTL).unwrap_or(3_600),
            access_ttl_seconds: ttl(ARG_ACCESS_TTL).unwrap_or(86_400),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign tokens (at least 32 bytes)")
                .env("WARDEN_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim written into and required from every token")
                .env("WARDEN_TOKEN_ISSUER")
                .default_value("warden"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for emailed links and CORS")
                .env("WARDEN_FRONTEND_BASE_URL")
                .default_value("https://warden.dev"),
        )
        .arg(
            Arg::new(ARG_CONFIRM_REGISTRATION_TTL)
                .long(ARG_CONFIRM_REGISTRATION_TTL)
                .help("Registration confirmation token TTL in seconds")
                .env("WARDEN_CONFIRM_REGISTRATION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FORGOT_PASSWORD_TTL)
                .long(ARG_FORGOT_PASSWORD_TTL)
                .help("Password reset token TTL in seconds")
                .env("WARDEN_FORGOT_PASSWORD_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token TTL in seconds")
                .env("WARDEN_ACCESS_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

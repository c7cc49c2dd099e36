use crate::{Error, Purpose};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// HS512 keys shorter than this are rejected at startup.
pub const MIN_SECRET_LEN: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS512;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub purpose: Purpose,
    pub iat: i64,
    /// Issue time in unix milliseconds; compared against the account watermarks.
    pub iat_ms: i64,
    pub exp: i64,
    pub jti: String,
}

impl TokenClaims {
    /// Reject claims that were minted for a different user.
    ///
    /// # Errors
    /// Returns [`Error::SubjectMismatch`] when `sub` differs from `username`.
    pub fn ensure_subject(&self, username: &str) -> Result<(), Error> {
        if self.sub == username {
            Ok(())
        } else {
            Err(Error::SubjectMismatch)
        }
    }

    /// Reject claims issued before any of the given watermarks (unix millis).
    ///
    /// A token issued in the same millisecond as a watermark is still accepted,
    /// so a token minted right after sign-up stays valid.
    ///
    /// # Errors
    /// Returns [`Error::Stale`] when a watermark is newer than the token.
    pub fn ensure_fresh(&self, watermarks_ms: &[i64]) -> Result<(), Error> {
        if watermarks_ms.iter().all(|watermark| self.iat_ms >= *watermark) {
            Ok(())
        } else {
            Err(Error::Stale)
        }
    }
}

/// Signing and verification keys derived from one shared secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKeys")
            .field("issuer", &self.issuer)
            .field("secret", &"***")
            .finish()
    }
}

impl TokenKeys {
    /// Build keys from a raw secret.
    ///
    /// # Errors
    /// Returns [`Error::WeakSecret`] if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn from_secret(secret: &[u8], issuer: impl Into<String>) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::WeakSecret(MIN_SECRET_LEN));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a token for `subject` valid for `ttl_seconds` from `now_unix_millis`.
    ///
    /// # Errors
    /// Returns an error if the ttl is not positive or encoding fails.
    pub fn sign(
        &self,
        subject: &str,
        purpose: Purpose,
        ttl_seconds: i64,
        now_unix_millis: i64,
    ) -> Result<String, Error> {
        if ttl_seconds <= 0 {
            return Err(Error::InvalidTtl);
        }
        let iat = now_unix_millis.div_euclid(1000);
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            purpose,
            iat,
            iat_ms: now_unix_millis,
            exp: iat.saturating_add(ttl_seconds),
            jti: Ulid::new().to_string(),
        };
        Ok(encode(&Header::new(ALGORITHM), &claims, &self.encoding)?)
    }

    /// Verify signature, issuer, expiry and purpose, returning the claims.
    ///
    /// Subject binding and watermark checks are left to the caller because they
    /// need the stored account.
    ///
    /// # Errors
    /// Returns an error if any check fails.
    pub fn verify(
        &self,
        token: &str,
        expected: Purpose,
        now_unix_seconds: i64,
    ) -> Result<TokenClaims, Error> {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let claims = decode::<TokenClaims>(token.trim(), &self.decoding, &validation)?.claims;

        if claims.iss != self.issuer {
            return Err(Error::InvalidIssuer);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }
        if claims.purpose != expected {
            return Err(Error::WrongPurpose {
                expected,
                found: claims.purpose,
            });
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef-test-secret";
    const ISSUER: &str = "warden.test";
    const NOW_MS: i64 = 1_700_000_000_123;
    const NOW: i64 = 1_700_000_000;

    fn keys() -> Result<TokenKeys, Error> {
        TokenKeys::from_secret(SECRET, ISSUER)
    }

    #[test]
    fn sign_and_verify_round_trip() -> Result<(), Error> {
        let keys = keys()?;
        let token = keys.sign("alice", Purpose::ConfirmRegistration, 60, NOW_MS)?;

        let claims = keys.verify(&token, Purpose::ConfirmRegistration, NOW)?;
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.iat_ms, NOW_MS);
        assert_eq!(claims.exp, NOW + 60);
        assert!(Ulid::from_string(&claims.jti).is_ok());
        Ok(())
    }

    #[test]
    fn tokens_are_unique_per_issue() -> Result<(), Error> {
        let keys = keys()?;
        let first = keys.sign("alice", Purpose::AccessResources, 60, NOW_MS)?;
        let second = keys.sign("alice", Purpose::AccessResources, 60, NOW_MS)?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn rejects_wrong_purpose() -> Result<(), Error> {
        let keys = keys()?;
        let token = keys.sign("alice", Purpose::ForgotPassword, 60, NOW_MS)?;

        let result = keys.verify(&token, Purpose::ConfirmRegistration, NOW);
        assert!(matches!(
            result,
            Err(Error::WrongPurpose {
                expected: Purpose::ConfirmRegistration,
                found: Purpose::ForgotPassword,
            })
        ));
        Ok(())
    }

    #[test]
    fn rejects_expired() -> Result<(), Error> {
        let keys = keys()?;
        let token = keys.sign("alice", Purpose::AccessResources, 60, NOW_MS)?;

        assert!(keys.verify(&token, Purpose::AccessResources, NOW + 59).is_ok());
        assert!(matches!(
            keys.verify(&token, Purpose::AccessResources, NOW + 60),
            Err(Error::Expired)
        ));
        Ok(())
    }

    #[test]
    fn rejects_foreign_secret_and_issuer() -> Result<(), Error> {
        let token = keys()?.sign("alice", Purpose::AccessResources, 60, NOW_MS)?;

        let other_secret =
            TokenKeys::from_secret(b"another-secret-another-secret-another-secret", ISSUER)?;
        assert!(matches!(
            other_secret.verify(&token, Purpose::AccessResources, NOW),
            Err(Error::Jwt(_))
        ));

        let other_issuer = TokenKeys::from_secret(SECRET, "someone-else")?;
        assert!(matches!(
            other_issuer.verify(&token, Purpose::AccessResources, NOW),
            Err(Error::InvalidIssuer)
        ));
        Ok(())
    }

    #[test]
    fn rejects_tampered_and_garbage_tokens() -> Result<(), Error> {
        let keys = keys()?;
        let token = keys.sign("alice", Purpose::AccessResources, 60, NOW_MS)?;
        let forged = keys.sign("mallory", Purpose::AccessResources, 60, NOW_MS)?;
        let forged_payload = forged.split('.').nth(1).unwrap_or_default();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = forged_payload;
        let tampered = parts.join(".");

        assert!(keys.verify(&tampered, Purpose::AccessResources, NOW).is_err());
        assert!(keys.verify("", Purpose::AccessResources, NOW).is_err());
        assert!(keys.verify("not.a.token", Purpose::AccessResources, NOW).is_err());
        Ok(())
    }

    #[test]
    fn rejects_weak_secret_and_bad_ttl() -> Result<(), Error> {
        assert!(matches!(
            TokenKeys::from_secret(b"short", ISSUER),
            Err(Error::WeakSecret(MIN_SECRET_LEN))
        ));
        let keys = keys()?;
        assert!(matches!(
            keys.sign("alice", Purpose::AccessResources, 0, NOW_MS),
            Err(Error::InvalidTtl)
        ));
        Ok(())
    }

    #[test]
    fn freshness_is_inclusive_at_millisecond_precision() -> Result<(), Error> {
        let keys = keys()?;
        let token = keys.sign("alice", Purpose::AccessResources, 60, NOW_MS)?;
        let claims = keys.verify(&token, Purpose::AccessResources, NOW)?;

        assert!(claims.ensure_fresh(&[]).is_ok());
        assert!(claims.ensure_fresh(&[NOW_MS, NOW_MS - 5_000]).is_ok());
        assert!(matches!(
            claims.ensure_fresh(&[NOW_MS - 5_000, NOW_MS + 1]),
            Err(Error::Stale)
        ));
        Ok(())
    }

    #[test]
    fn subject_binding() -> Result<(), Error> {
        let keys = keys()?;
        let token = keys.sign("alice", Purpose::ForgotPassword, 60, NOW_MS)?;
        let claims = keys.verify(&token, Purpose::ForgotPassword, NOW)?;

        assert!(claims.ensure_subject("alice").is_ok());
        assert!(matches!(
            claims.ensure_subject("bob"),
            Err(Error::SubjectMismatch)
        ));
        Ok(())
    }

    #[test]
    fn debug_redacts_secret() -> Result<(), Error> {
        let rendered = format!("{:?}", keys()?);
        assert!(rendered.contains(ISSUER));
        assert!(!rendered.contains("0123456789abcdef"));
        Ok(())
    }
}

//! Token email outbox worker.
//!
//! Sign-up, resend-confirmation and forgot-password write a `pending` row into
//! `email_outbox` in the same transaction as the state change. A background
//! task polls that table, locks a batch with `FOR UPDATE SKIP LOCKED` and hands
//! each row to an [`EmailSender`]. Failed sends are retried with exponential
//! backoff and jitter until `max_attempts`, then the row is marked `failed`.
//!
//! The default sender is [`LogEmailSender`], which only logs the message.
use anyhow::{Context, Result};
use rand::Rng;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// One outbox row ready for delivery.
#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload: Value,
}

impl EmailMessage {
    #[must_use]
    pub fn subject(&self) -> &'static str {
        match self.template.as_str() {
            "confirm_registration" => "Confirm your registration",
            "forgot_password" => "Reset your password",
            _ => "Account notification",
        }
    }

    /// Link the recipient should follow, when the payload carries one.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.payload.get("link").and_then(Value::as_str)
    }

    #[must_use]
    pub fn body(&self) -> String {
        let greeting = self
            .payload
            .get("first_name")
            .and_then(Value::as_str)
            .map_or_else(|| "Hello,".to_string(), |name| format!("Hello {name},"));
        match self.link() {
            Some(link) => format!("{greeting}\n\n{}: {link}\n", self.subject()),
            None => format!("{greeting}\n\n{}\n", self.subject()),
        }
    }
}

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Sender that logs the rendered message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            subject = message.subject(),
            link = message.link().unwrap_or(""),
            "email outbox send stub"
        );
        debug!(body = %message.body(), "rendered email");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// 5s poll interval, 10 messages per batch, 5 attempts and a 5s to 5m
    /// backoff window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    /// Replace zero values with the smallest usable ones and keep
    /// `backoff_max >= backoff_base`.
    #[must_use]
    pub fn normalize(self) -> Self {
        let one_second = Duration::from_secs(1);
        let backoff_base = if self.backoff_base.is_zero() {
            one_second
        } else {
            self.backoff_base
        };
        Self {
            poll_interval: if self.poll_interval.is_zero() {
                one_second
            } else {
                self.poll_interval
            },
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What happens to a row after one delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Sent,
    Retry(Duration),
    Failed,
}

fn outcome(attempts_after: u32, delivered: bool, config: &EmailWorkerConfig) -> Outcome {
    if delivered {
        Outcome::Sent
    } else if attempts_after >= config.max_attempts() {
        Outcome::Failed
    } else {
        Outcome::Retry(backoff_delay(
            attempts_after,
            config.backoff_base(),
            config.backoff_max(),
        ))
    }
}

/// Spawn a background task that polls and processes the email outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        loop {
            if let Err(err) = process_outbox_batch(&pool, sender.as_ref(), &config).await {
                error!("email outbox batch failed: {err:#}");
            }
            sleep(config.poll_interval()).await;
        }
    })
}

/// Deliver one locked batch of due rows. Returns how many rows were handled.
pub(crate) async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    for row in &rows {
        let id: Uuid = row.get("id");
        let attempts = u32::try_from(row.get::<i32, _>("attempts")).unwrap_or(0);
        let payload_text: String = row.get("payload_json");
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
        };

        let attempts_after = attempts.saturating_add(1);
        let (delivered, last_error) = match sender.send(&message) {
            Ok(()) => (true, None),
            Err(err) => {
                warn!(%id, attempts = attempts_after, "email delivery failed: {err:#}");
                (false, Some(format!("{err:#}")))
            }
        };
        let next = outcome(attempts_after, delivered, config);
        record_outcome(&mut tx, id, attempts_after, next, last_error.as_deref()).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(rows.len())
}

async fn record_outcome(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempts: u32,
    outcome: Outcome,
    last_error: Option<&str>,
) -> Result<()> {
    let (status, delay_ms) = match outcome {
        Outcome::Sent => ("sent", 0),
        Outcome::Failed => ("failed", 0),
        Outcome::Retry(delay) => (
            "pending",
            i64::try_from(delay.as_millis()).unwrap_or(i64::MAX),
        ),
    };
    let query = r"
        UPDATE email_outbox
        SET status = $2,
            attempts = $3,
            last_error = $4,
            sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END,
            next_attempt_at = NOW() + ($5 * INTERVAL '1 millisecond')
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(status)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(last_error)
        .bind(delay_ms)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .with_context(|| format!("failed to mark outbox row {status}"))?;
    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let delay = base.checked_mul(1u32 << shift).unwrap_or(max);
    jitter_delay(delay.min(max))
}

/// Uniform jitter in `[delay / 2, delay]`.
fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=delay_ms - half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_support::database::TestDatabase;

    const WARDEN_SCHEMA_SQL: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    struct FailingSender {
        calls: AtomicUsize,
    }

    impl EmailSender for FailingSender {
        fn send(&self, _message: &EmailMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("smtp unavailable"))
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to_email: "alice@example.com".to_string(),
            template: "forgot_password".to_string(),
            payload: json!({
                "first_name": "Alice",
                "link": "https://warden.dev/reset-password?token=abc",
            }),
        }
    }

    #[test]
    fn message_renders_subject_and_link() {
        let message = message();
        assert_eq!(message.subject(), "Reset your password");
        assert_eq!(
            message.link(),
            Some("https://warden.dev/reset-password?token=abc")
        );
        let body = message.body();
        assert!(body.starts_with("Hello Alice,"));
        assert!(body.contains("token=abc"));
    }

    #[test]
    fn normalize_replaces_zero_values() {
        let config = EmailWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.backoff_max(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(4);
        let max = Duration::from_secs(20);
        let first = backoff_delay(1, base, max);
        assert!(first >= Duration::from_secs(2) && first <= base);
        let third = backoff_delay(3, base, max);
        assert!(third >= Duration::from_secs(8) && third <= Duration::from_secs(16));
        let capped = backoff_delay(30, base, max);
        assert!(capped >= Duration::from_secs(10) && capped <= max);
    }

    #[test]
    fn outcome_fails_after_max_attempts() {
        let config = EmailWorkerConfig::new().with_max_attempts(2);
        assert_eq!(outcome(1, true, &config), Outcome::Sent);
        assert!(matches!(outcome(1, false, &config), Outcome::Retry(_)));
        assert_eq!(outcome(2, false, &config), Outcome::Failed);
    }

    async fn enqueue(pool: &PgPool) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_outbox (to_email, template, payload_json) VALUES ($1, $2, $3::jsonb)",
        )
        .bind("alice@example.com")
        .bind("confirm_registration")
        .bind(r#"{"first_name":"Alice","link":"https://warden.dev/confirm-registration?token=t"}"#)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn status(pool: &PgPool) -> Result<(String, i32)> {
        let row = sqlx::query("SELECT status, attempts FROM email_outbox LIMIT 1")
            .fetch_one(pool)
            .await?;
        Ok((row.get("status"), row.get("attempts")))
    }

    #[tokio::test]
    async fn batch_marks_rows_sent() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();
        enqueue(pool).await?;

        let handled = process_outbox_batch(pool, &LogEmailSender, &EmailWorkerConfig::new()).await?;
        assert_eq!(handled, 1);
        assert_eq!(status(pool).await?, ("sent".to_string(), 1));

        let handled = process_outbox_batch(pool, &LogEmailSender, &EmailWorkerConfig::new()).await?;
        assert_eq!(handled, 0);
        Ok(())
    }

    #[tokio::test]
    async fn batch_retries_then_fails() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();
        enqueue(pool).await?;
        let sender = FailingSender {
            calls: AtomicUsize::new(0),
        };
        let config = EmailWorkerConfig::new().with_max_attempts(2).normalize();

        process_outbox_batch(pool, &sender, &config).await?;
        assert_eq!(status(pool).await?, ("pending".to_string(), 1));

        // Make the retry due immediately.
        sqlx::query("UPDATE email_outbox SET next_attempt_at = NOW()")
            .execute(pool)
            .await?;
        process_outbox_batch(pool, &sender, &config).await?;
        assert_eq!(status(pool).await?, ("failed".to_string(), 2));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}

//! Password login followed by a one-time code.
//!
//! A successful LOGIN (or REGISTER) issues a short-lived numeric code through
//! the [`CodeMailer`](crate::ports::CodeMailer) and parks the candidate
//! identity in a [`PendingAuth`] owned by the connection. The session only
//! exists once VERIFY_2FA presents that code before it expires.

use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;
use tokio::time::Instant;
use tracing::{debug, info};

use parley_shared::constants::CODE_LENGTH;
use parley_store::User;

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::Identity;

/// A fresh `CODE_LENGTH`-digit code, zero padded.
pub fn generate_code() -> String {
    let bound = 10u32.pow(CODE_LENGTH as u32);
    let n = OsRng.gen_range(0..bound);
    format!("{:0width$}", n, width = CODE_LENGTH)
}

/// Result of presenting a code to a [`PendingAuth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Accepted,
    /// Wrong code, more attempts left.
    Rejected { remaining: u32 },
    /// The code's lifetime ran out. Attempts are not consumed.
    Expired,
    /// Wrong code and no attempts left; the pending login must be dropped.
    Exhausted,
}

/// Login state between a verified password and a verified code.
#[derive(Debug)]
pub struct PendingAuth {
    pub identity: Identity,
    code: String,
    expires_at: Instant,
    attempts: u32,
}

impl PendingAuth {
    pub fn new(identity: Identity, code: String, ttl: Duration) -> Self {
        Self {
            identity,
            code,
            expires_at: Instant::now() + ttl,
            attempts: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn check(&mut self, submitted: &str, max_attempts: u32) -> CodeCheck {
        if self.is_expired() {
            return CodeCheck::Expired;
        }

        let matches: bool = submitted
            .trim()
            .as_bytes()
            .ct_eq(self.code.as_bytes())
            .into();
        if matches {
            return CodeCheck::Accepted;
        }

        self.attempts += 1;
        if self.attempts >= max_attempts {
            CodeCheck::Exhausted
        } else {
            CodeCheck::Rejected {
                remaining: max_attempts - self.attempts,
            }
        }
    }
}

/// Generate a code for `user`, record it, deliver it and return the pending
/// state the connection should hold on to.
pub async fn issue_code(ctx: &ServerContext, user: &User) -> Result<PendingAuth, ServerError> {
    let code = generate_code();
    let ttl = ctx.config.code_ttl;
    let expires_at = Utc::now()
        + chrono::Duration::from_std(ttl).map_err(|e| ServerError::Internal(e.to_string()))?;

    ctx.store
        .set_one_time_code(user.id, Some((code.as_str(), expires_at)))
        .await?;
    ctx.mailer.send_code(&user.email, &code).await?;

    info!(user = %user.id, username = %user.username, "One-time code sent");

    let identity = Identity {
        id: user.id,
        username: user.username.clone(),
    };
    Ok(PendingAuth::new(identity, code, ttl))
}

/// Confirm `code` is still the live code on record for the account.
///
/// A later login for the same account, from any connection, replaces the
/// stored code, so a pending login that lost that race is refused here.
pub async fn confirm_code(
    ctx: &ServerContext,
    identity: &Identity,
    code: &str,
) -> Result<bool, ServerError> {
    let live = ctx
        .store
        .check_one_time_code(identity.id, code, Utc::now())
        .await?;
    if !live {
        info!(user = %identity.id, "One-time code superseded");
    }
    Ok(live)
}

/// Forget the stored code once it has been used.
pub async fn consume_code(ctx: &ServerContext, identity: &Identity) {
    if let Err(e) = ctx.store.set_one_time_code(identity.id, None).await {
        debug!(user = %identity.id, error = %e, "Failed to clear one-time code");
    }
}

/// Account details carried by a REGISTER request as `user:email:password`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn parse(content: &str) -> Result<Self, &'static str> {
        let mut parts = content.splitn(3, ':');
        let (Some(username), Some(email), Some(password)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err("expected username:email:password");
        };

        let username = username.trim();
        let email = email.trim();

        if !valid_username(username) {
            return Err("username must be 3-32 letters, digits, '_', '.' or '-'");
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err("invalid email address");
        }
        if password.chars().count() < 6 {
            return Err("password must be at least 6 characters");
        }

        Ok(Self {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        })
    }
}

fn valid_username(name: &str) -> bool {
    (3..=32).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

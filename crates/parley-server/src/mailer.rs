//! Delivery of one-time login codes.
//!
//! Email transport is not part of this server. [`LogMailer`] writes each code
//! to the log so an operator (or a log shipper wired to a mail relay) can
//! pass it on.

use async_trait::async_trait;
use tracing::info;

use crate::error::ServerError;
use crate::ports::CodeMailer;

#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl CodeMailer for LogMailer {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), ServerError> {
        if !email.contains('@') {
            return Err(ServerError::Delivery(format!("invalid address '{email}'")));
        }
        info!(to = email, code, "One-time login code issued");
        Ok(())
    }
}

//! Delivery of activation tokens to their holders.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::tokens::Token;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

pub type MailFut<'a> = Pin<Box<dyn Future<Output = Result<(), MailerError>> + Send + 'a>>;

/// Hands a freshly minted token to the credential holder.
///
/// Called from supervised background work, never on the request path.
/// Implementations await their I/O rather than block the runtime thread.
pub trait Mailer: Send + Sync {
    fn send_activation<'a>(&'a self, token: &'a Token) -> MailFut<'a>;
}

/// Records each dispatch in the log without the plaintext.
#[derive(Debug, Default)]
pub struct TracingMailer;

impl Mailer for TracingMailer {
    fn send_activation<'a>(&'a self, token: &'a Token) -> MailFut<'a> {
        Box::pin(async move {
            tracing::info!(
                subject_id = token.subject_id,
                fingerprint = %token.fingerprint(),
                expiry = %token.expiry.to_rfc3339(),
                "Activation token dispatched"
            );
            Ok(())
        })
    }
}

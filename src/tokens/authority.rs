//! Minting, validating and revoking hashed bearer tokens.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

use crate::storage::models::{StoredToken, TokenScope};
use crate::storage::{Database, DatabaseError, TokenLookup};

use super::generator::{fingerprint, generate_plaintext, hash_plaintext, PLAINTEXT_LEN};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Token must be 26 characters long")]
    Invalid,
    #[error("Token not found")]
    NotFound,
    #[error("Secure random source unavailable: {0}")]
    RandomnessUnavailable(#[from] rand::Error),
    #[error("Database error: {0}")]
    Storage(#[from] DatabaseError),
}

impl TokenError {
    /// True for failures caused by the presented credential rather than the server.
    ///
    /// Callers must report all of these identically to clients.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            TokenError::Expired | TokenError::Invalid | TokenError::NotFound
        )
    }
}

/// A freshly minted token. The plaintext exists only in this value.
#[derive(Clone)]
pub struct Token {
    pub expiry: DateTime<Utc>,
    pub hash: [u8; 32],
    pub plaintext: String,
    pub scope: TokenScope,
    pub subject_id: u64,
}

impl Token {
    /// The part of the token that is persisted
    pub fn stored(&self) -> StoredToken {
        StoredToken {
            expiry: self.expiry,
            hash: self.hash,
            scope: self.scope,
            subject_id: self.subject_id,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.hash)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("expiry", &self.expiry)
            .field("fingerprint", &self.fingerprint())
            .field("plaintext", &"<redacted>")
            .field("scope", &self.scope)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

/// Outcome of redeeming a single-use token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redeemed {
    /// Tokens of the same subject and scope removed with it (itself included)
    pub revoked: usize,
    pub subject_id: u64,
}

#[derive(Clone)]
pub struct TokenAuthority {
    db: Database,
    storage_timeout: std::time::Duration,
}

impl TokenAuthority {
    pub fn new(db: Database, storage_timeout: std::time::Duration) -> Self {
        Self {
            db,
            storage_timeout,
        }
    }

    /// Mint a token for `subject_id`, persisting only its hash.
    pub async fn mint(
        &self,
        subject_id: u64,
        ttl: Duration,
        scope: TokenScope,
    ) -> Result<Token, TokenError> {
        self.mint_with(&mut OsRng, subject_id, ttl, scope).await
    }

    /// [`mint`](Self::mint) drawing randomness from `rng`. Nothing is stored
    /// when `rng` fails.
    pub async fn mint_with<R: RngCore + ?Sized>(
        &self,
        rng: &mut R,
        subject_id: u64,
        ttl: Duration,
        scope: TokenScope,
    ) -> Result<Token, TokenError> {
        let plaintext = generate_plaintext(rng)?;
        let token = Token {
            expiry: Utc::now() + ttl,
            hash: hash_plaintext(&plaintext),
            plaintext,
            scope,
            subject_id,
        };

        let stored = token.stored();
        self.db
            .run(self.storage_timeout, move |db| db.put_token(&stored))
            .await?;

        tracing::debug!(
            subject_id,
            scope = %scope,
            fingerprint = %token.fingerprint(),
            expiry = %token.expiry.to_rfc3339(),
            "Minted token"
        );
        Ok(token)
    }

    /// Resolve a presented plaintext to the subject it was issued to.
    pub async fn validate(&self, candidate: &str, scope: TokenScope) -> Result<u64, TokenError> {
        // Cheap format filter before touching storage
        if candidate.len() != PLAINTEXT_LEN {
            return Err(TokenError::Invalid);
        }

        let hash = hash_plaintext(candidate);
        let now = Utc::now();
        let lookup = self
            .db
            .run(self.storage_timeout, move |db| db.find_token(&hash, scope, now))
            .await?;

        match lookup {
            TokenLookup::Live(token) => Ok(token.subject_id),
            TokenLookup::Expired(token) => {
                tracing::debug!(
                    subject_id = token.subject_id,
                    scope = %scope,
                    fingerprint = %fingerprint(&hash),
                    "Token expired"
                );
                Err(TokenError::Expired)
            }
            TokenLookup::Missing => Err(TokenError::NotFound),
        }
    }

    /// Validate a single-use token and revoke every token its subject holds
    /// for `scope`, as one storage transaction.
    ///
    /// Of several concurrent calls with the same plaintext, exactly one
    /// succeeds; the rest see [`TokenError::NotFound`].
    pub async fn consume(&self, candidate: &str, scope: TokenScope) -> Result<Redeemed, TokenError> {
        if candidate.len() != PLAINTEXT_LEN {
            return Err(TokenError::Invalid);
        }

        let hash = hash_plaintext(candidate);
        let now = Utc::now();
        let (lookup, revoked) = self
            .db
            .run(self.storage_timeout, move |db| db.consume_token(&hash, scope, now))
            .await?;

        match lookup {
            TokenLookup::Live(token) => {
                tracing::debug!(
                    subject_id = token.subject_id,
                    scope = %scope,
                    fingerprint = %fingerprint(&hash),
                    revoked,
                    "Redeemed token"
                );
                Ok(Redeemed {
                    revoked,
                    subject_id: token.subject_id,
                })
            }
            TokenLookup::Expired(_) => Err(TokenError::Expired),
            TokenLookup::Missing => Err(TokenError::NotFound),
        }
    }

    /// Delete every token issued to `subject_id` for `scope`.
    pub async fn revoke_all(&self, subject_id: u64, scope: TokenScope) -> Result<usize, TokenError> {
        let revoked = self
            .db
            .run(self.storage_timeout, move |db| {
                db.delete_tokens_for_subject(scope, subject_id)
            })
            .await?;

        tracing::debug!(subject_id, scope = %scope, count = revoked, "Revoked tokens");
        Ok(revoked)
    }

    /// Remove tokens whose expiry has passed (called by the background cleaner)
    pub async fn cleanup_expired(&self) -> Result<usize, TokenError> {
        let now = Utc::now();
        let cleaned = self
            .db
            .run(self.storage_timeout, move |db| db.delete_expired_tokens(now))
            .await?;

        if cleaned > 0 {
            tracing::info!(count = cleaned, "Cleaned up expired tokens");
        }
        Ok(cleaned)
    }
}

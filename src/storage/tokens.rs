use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{expiry_key, expiry_key_ms, Database, DatabaseError};
use super::models::{StoredToken, TokenScope};
use super::tables::*;

/// Result of looking a token up by hash for a given scope.
#[derive(Debug)]
pub enum TokenLookup {
    Expired(StoredToken),
    Live(StoredToken),
    Missing,
}

fn subject_key(scope: TokenScope, subject_id: u64) -> String {
    format!("{scope}:{subject_id}")
}

/// Remove a subject's tokens for one scope, with their index entries.
fn remove_subject_tokens(
    write_txn: &WriteTransaction,
    scope: TokenScope,
    subject_id: u64,
) -> Result<usize, DatabaseError> {
    let key = subject_key(scope, subject_id);

    let mut index_table = write_txn.open_table(SUBJECT_TOKENS)?;
    let hashes: Vec<String> = match index_table.remove(key.as_str())? {
        Some(data) => rmp_serde::from_slice(data.value())?,
        None => Vec::new(),
    };

    let mut table = write_txn.open_table(TOKENS)?;
    let mut expiry_table = write_txn.open_table(TOKEN_EXPIRY)?;
    let mut deleted = 0;
    for hash in &hashes {
        let removed: Option<StoredToken> = match table.remove(hash.as_str())? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        if let Some(token) = removed {
            let ek = expiry_key(&token.expiry, hash);
            expiry_table.remove(ek.as_str())?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

impl Database {
    // ========================================================================
    // Token operations
    // ========================================================================

    /// Store a token hash with its subject, scope and expiry
    pub fn put_token(&self, token: &StoredToken) -> Result<(), DatabaseError> {
        let hash = token.hash_hex();

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(TOKENS)?;
            let data = rmp_serde::to_vec_named(token)?;
            table.insert(hash.as_str(), data.as_slice())?;

            let key = subject_key(token.scope, token.subject_id);
            let mut index_table = write_txn.open_table(SUBJECT_TOKENS)?;
            let mut hashes: Vec<String> = index_table
                .get(key.as_str())?
                .map(|v| rmp_serde::from_slice(v.value()))
                .transpose()?
                .unwrap_or_default();

            if !hashes.contains(&hash) {
                hashes.push(hash.clone());
                let index_data = rmp_serde::to_vec_named(&hashes)?;
                index_table.insert(key.as_str(), index_data.as_slice())?;
            }

            let mut expiry_table = write_txn.open_table(TOKEN_EXPIRY)?;
            let ek = expiry_key(&token.expiry, &hash);
            expiry_table.insert(ek.as_str(), hash.as_str())?;
        }
        self.commit(write_txn)?;
        Ok(())
    }

    /// Look a token up by hash, filtering on scope and expiry at query time
    pub fn find_token(
        &self,
        hash: &[u8; 32],
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<TokenLookup, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;

        let token: StoredToken = match table.get(hex::encode(hash).as_str())? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(TokenLookup::Missing),
        };

        if token.scope != scope {
            Ok(TokenLookup::Missing)
        } else if token.is_expired_at(now) {
            Ok(TokenLookup::Expired(token))
        } else {
            Ok(TokenLookup::Live(token))
        }
    }

    /// Delete every token issued to a subject for one scope
    pub fn delete_tokens_for_subject(
        &self,
        scope: TokenScope,
        subject_id: u64,
    ) -> Result<usize, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = remove_subject_tokens(&write_txn, scope, subject_id)?;
        self.commit(write_txn)?;
        Ok(deleted)
    }

    /// Redeem a single-use token: if it is live for `scope`, delete every
    /// token its subject holds for that scope in the same write transaction.
    ///
    /// Concurrent callers presenting the same hash are serialized by redb's
    /// single writer, so at most one of them sees `Live`.
    pub fn consume_token(
        &self,
        hash: &[u8; 32],
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<(TokenLookup, usize), DatabaseError> {
        let write_txn = self.begin_write()?;
        let lookup = {
            let table = write_txn.open_table(TOKENS)?;
            let stored: Option<StoredToken> = match table.get(hex::encode(hash).as_str())? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            match stored {
                Some(token) if token.scope != scope => TokenLookup::Missing,
                Some(token) if token.is_expired_at(now) => TokenLookup::Expired(token),
                Some(token) => TokenLookup::Live(token),
                None => TokenLookup::Missing,
            }
        };

        let live_subject = match &lookup {
            TokenLookup::Live(token) => Some(token.subject_id),
            _ => None,
        };
        let Some(subject_id) = live_subject else {
            write_txn.abort()?;
            return Ok((lookup, 0));
        };
        let revoked = remove_subject_tokens(&write_txn, scope, subject_id)?;
        self.commit(write_txn)?;
        Ok((lookup, revoked))
    }

    /// Delete tokens expired at `now` using the expiration index (no full table scan).
    pub fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let now_ms = now.timestamp_millis();

        let write_txn = self.begin_write()?;
        let deleted = {
            let mut expiry_table = write_txn.open_table(TOKEN_EXPIRY)?;

            let mut expired = Vec::new();
            for entry in expiry_table.iter()? {
                let (key, value) = entry?;
                let key_str = key.value().to_string();
                match expiry_key_ms(&key_str) {
                    Some(ms) if ms <= now_ms => expired.push((key_str, value.value().to_string())),
                    _ => break,
                }
            }

            let mut table = write_txn.open_table(TOKENS)?;
            let mut index_table = write_txn.open_table(SUBJECT_TOKENS)?;
            for (ek, hash) in &expired {
                expiry_table.remove(ek.as_str())?;

                let removed: Option<StoredToken> = match table.remove(hash.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                let Some(token) = removed else {
                    continue;
                };

                let key = subject_key(token.scope, token.subject_id);
                let hashes: Option<Vec<String>> = match index_table.get(key.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                if let Some(mut hashes) = hashes {
                    hashes.retain(|h| h != hash);
                    if hashes.is_empty() {
                        index_table.remove(key.as_str())?;
                    } else {
                        let index_data = rmp_serde::to_vec_named(&hashes)?;
                        index_table.insert(key.as_str(), index_data.as_slice())?;
                    }
                }
            }
            expired.len()
        };
        self.commit(write_txn)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_stored_token, setup_db};
    use chrono::Duration;

    #[test]
    fn test_find_token_filters_scope_and_expiry() {
        let (db, _temp) = setup_db();
        let now = Utc::now();

        let token = make_stored_token(1, 7, TokenScope::Authentication, now + Duration::hours(1));
        db.put_token(&token).unwrap();

        assert!(matches!(
            db.find_token(&token.hash, TokenScope::Authentication, now).unwrap(),
            TokenLookup::Live(t) if t.subject_id == 7
        ));
        assert!(matches!(
            db.find_token(&token.hash, TokenScope::Activation, now).unwrap(),
            TokenLookup::Missing
        ));
        assert!(matches!(
            db.find_token(&token.hash, TokenScope::Authentication, now + Duration::hours(2))
                .unwrap(),
            TokenLookup::Expired(_)
        ));
        assert!(matches!(
            db.find_token(&[0u8; 32], TokenScope::Authentication, now).unwrap(),
            TokenLookup::Missing
        ));
    }

    #[test]
    fn test_delete_tokens_for_subject_only_touches_that_scope() {
        let (db, _temp) = setup_db();
        let expiry = Utc::now() + Duration::hours(1);

        let a = make_stored_token(1, 7, TokenScope::Authentication, expiry);
        let b = make_stored_token(2, 7, TokenScope::Authentication, expiry);
        let c = make_stored_token(3, 7, TokenScope::Activation, expiry);
        let d = make_stored_token(4, 8, TokenScope::Authentication, expiry);
        for token in [&a, &b, &c, &d] {
            db.put_token(token).unwrap();
        }

        assert_eq!(
            db.delete_tokens_for_subject(TokenScope::Authentication, 7)
                .unwrap(),
            2
        );
        assert_eq!(
            db.delete_tokens_for_subject(TokenScope::Authentication, 7)
                .unwrap(),
            0
        );

        let now = Utc::now();
        assert!(matches!(
            db.find_token(&a.hash, TokenScope::Authentication, now).unwrap(),
            TokenLookup::Missing
        ));
        assert!(matches!(
            db.find_token(&c.hash, TokenScope::Activation, now).unwrap(),
            TokenLookup::Live(_)
        ));
        assert!(matches!(
            db.find_token(&d.hash, TokenScope::Authentication, now).unwrap(),
            TokenLookup::Live(_)
        ));
    }

    #[test]
    fn test_delete_expired_tokens_uses_expiry_order() {
        let (db, _temp) = setup_db();
        let now = Utc::now();

        let stale = make_stored_token(1, 7, TokenScope::Authentication, now - Duration::minutes(5));
        let fresh = make_stored_token(2, 7, TokenScope::Authentication, now + Duration::minutes(5));
        db.put_token(&stale).unwrap();
        db.put_token(&fresh).unwrap();

        assert_eq!(db.delete_expired_tokens(now).unwrap(), 1);
        assert_eq!(db.delete_expired_tokens(now).unwrap(), 0);

        assert!(matches!(
            db.find_token(&stale.hash, TokenScope::Authentication, now - Duration::hours(1))
                .unwrap(),
            TokenLookup::Missing
        ));
        // The subject index still points at the surviving token
        assert_eq!(
            db.delete_tokens_for_subject(TokenScope::Authentication, 7)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_consume_token_is_single_use() {
        let (db, _temp) = setup_db();
        let now = Utc::now();
        let expiry = now + Duration::hours(1);

        let first = make_stored_token(1, 7, TokenScope::Activation, expiry);
        let second = make_stored_token(2, 7, TokenScope::Activation, expiry);
        let session = make_stored_token(3, 7, TokenScope::Authentication, expiry);
        for token in [&first, &second, &session] {
            db.put_token(token).unwrap();
        }

        // Wrong scope is not redeemed and removes nothing
        let (lookup, revoked) = db
            .consume_token(&session.hash, TokenScope::Activation, now)
            .unwrap();
        assert!(matches!(lookup, TokenLookup::Missing));
        assert_eq!(revoked, 0);

        let (lookup, revoked) = db
            .consume_token(&first.hash, TokenScope::Activation, now)
            .unwrap();
        assert!(matches!(lookup, TokenLookup::Live(t) if t.subject_id == 7));
        assert_eq!(revoked, 2);

        // Redeeming again, or redeeming the sibling, finds nothing
        for hash in [&first.hash, &second.hash] {
            let (lookup, revoked) = db.consume_token(hash, TokenScope::Activation, now).unwrap();
            assert!(matches!(lookup, TokenLookup::Missing));
            assert_eq!(revoked, 0);
        }
        assert!(matches!(
            db.find_token(&session.hash, TokenScope::Authentication, now).unwrap(),
            TokenLookup::Live(_)
        ));
    }

    #[test]
    fn test_consume_expired_token_keeps_it() {
        let (db, _temp) = setup_db();
        let now = Utc::now();

        let stale = make_stored_token(1, 7, TokenScope::Activation, now - Duration::minutes(1));
        db.put_token(&stale).unwrap();

        let (lookup, revoked) = db
            .consume_token(&stale.hash, TokenScope::Activation, now)
            .unwrap();
        assert!(matches!(lookup, TokenLookup::Expired(_)));
        assert_eq!(revoked, 0);
        assert_eq!(db.delete_expired_tokens(now).unwrap(), 1);
    }
}

use redb::TableDefinition;

/// Bearer tokens: hex(sha256(plaintext)) -> StoredToken (msgpack)
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// Secondary index: "scope:subject_id" -> Vec<hash hex> (for revoking by subject)
pub const SUBJECT_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("subject_tokens");

/// Expiration index: "expiry_ms:hash" -> hash hex (ordered for cleanup)
pub const TOKEN_EXPIRY: TableDefinition<&str, &str> = TableDefinition::new("token_expiry");

/// Id sequences: record table name -> last assigned id
pub const RECORD_SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("record_sequences");

/// Movies: id -> VersionedRecord<Movie> (msgpack)
pub const MOVIES: TableDefinition<u64, &[u8]> = TableDefinition::new("movies");

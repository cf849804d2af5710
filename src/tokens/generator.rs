use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind every token
pub const TOKEN_BYTES: usize = 16;

/// Length of a base32 (unpadded) encoding of [`TOKEN_BYTES`]
pub const PLAINTEXT_LEN: usize = 26;

/// Generate a token plaintext from `rng`: 16 random bytes, base32 without padding.
///
/// A failing random source is an error, never a reason to fall back to a
/// weaker one.
pub fn generate_plaintext<R: RngCore + ?Sized>(rng: &mut R) -> Result<String, rand::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.try_fill_bytes(&mut bytes)?;
    Ok(BASE32_NOPAD.encode(&bytes))
}

/// Hash a token plaintext using SHA-256 (the only form that is stored)
pub fn hash_plaintext(plaintext: &str) -> [u8; 32] {
    let digest = Sha256::digest(plaintext.as_bytes());
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

/// Short, non-reversible label for a token hash, safe to put in logs
pub fn fingerprint(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BrokenRng;
    use rand::rngs::OsRng;

    #[test]
    fn test_generate_plaintext() {
        let token = generate_plaintext(&mut OsRng).unwrap();
        assert_eq!(token.len(), PLAINTEXT_LEN);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));

        // Ensure randomness
        let token2 = generate_plaintext(&mut OsRng).unwrap();
        assert_ne!(token, token2);
    }

    #[test]
    fn test_generate_plaintext_surfaces_rng_failure() {
        assert!(generate_plaintext(&mut BrokenRng).is_err());
    }

    #[test]
    fn test_hash_plaintext() {
        let hash1 = hash_plaintext("Y3QMGX3PJ3WLRL2YRTQGQ6KRHU");
        let hash2 = hash_plaintext("Y3QMGX3PJ3WLRL2YRTQGQ6KRHU");
        assert_eq!(hash1, hash2); // Deterministic

        let hash3 = hash_plaintext("different");
        assert_ne!(hash1, hash3);

        // Known SHA-256 vector
        assert_eq!(
            hex::encode(hash_plaintext("abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_hash_prefix() {
        let hash = hash_plaintext("abc");
        assert_eq!(fingerprint(&hash), "ba7816bf");
    }
}

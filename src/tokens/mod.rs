pub mod authority;
pub mod generator;

pub use authority::{Redeemed, Token, TokenAuthority, TokenError};
pub use generator::{generate_plaintext, hash_plaintext, PLAINTEXT_LEN};

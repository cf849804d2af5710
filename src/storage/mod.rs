pub mod db;
pub mod models;
mod records;
mod tables;
mod tokens;

pub use db::{Database, DatabaseError};
pub use records::{RecordTable, SwapOutcome};
pub use tables::*;
pub use tokens::TokenLookup;

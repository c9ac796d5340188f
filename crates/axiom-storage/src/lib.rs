//! AXIOM Storage Layer
//!
//! SQLite persistence for tab records. Writes that touch more than one row
//! run in a transaction.

mod database;
mod error;
mod migrations;
mod records;

pub use database::Database;
pub use error::StorageError;
pub use records::{TabRecord, TabStore};

pub type Result<T> = std::result::Result<T, StorageError>;

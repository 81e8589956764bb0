//! SQLite storage for records, lookups, settings and sweep checkpoints.

mod connection;
mod queries;

pub use connection::Database;
pub use queries::content_hash;

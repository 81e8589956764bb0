pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod refkeeper;
pub mod resolution;
pub mod rpc;
pub mod sweep;
pub mod types;

pub use errors::{RefKeeperError, Result};
pub use refkeeper::{RefKeeper, WriteOutcome};

use std::path::Path;

use rusqlite::Connection;

use crate::errors::{RefKeeperError, Result};

/// The embedded SQL schema applied when initializing a database.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite database backing the record store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Creates (or upgrades) the database at `db_path`, creating parent
    /// directories if needed.
    pub fn initialize(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RefKeeperError::Database {
                message: format!("failed to create database directory: {e}"),
                operation: "initialize".to_string(),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| RefKeeperError::Database {
            message: format!("failed to open database: {e}"),
            operation: "initialize".to_string(),
        })?;

        Self::apply_pragmas(&conn)?;

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| RefKeeperError::Database {
                message: format!("failed to apply schema: {e}"),
                operation: "initialize".to_string(),
            })?;

        Ok(Self { conn })
    }

    /// Opens an existing database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(RefKeeperError::Database {
                message: format!("database not found: {}", db_path.display()),
                operation: "open".to_string(),
            });
        }

        let conn = Connection::open(db_path).map_err(|e| RefKeeperError::Database {
            message: format!("failed to open database: {e}"),
            operation: "open".to_string(),
        })?;

        Self::apply_pragmas(&conn)?;

        Ok(Self { conn })
    }

    /// Opens a private in-memory database with the full schema.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RefKeeperError::Database {
            message: format!("failed to open in-memory database: {e}"),
            operation: "in_memory".to_string(),
        })?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| RefKeeperError::Database {
                message: format!("failed to apply schema: {e}"),
                operation: "in_memory".to_string(),
            })?;
        Ok(Self { conn })
    }

    /// Returns a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Returns the on-disk size of the database file in bytes.
    pub fn size(&self) -> Result<u64> {
        let size: i64 = self
            .conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .map_err(|e| RefKeeperError::Database {
                message: format!("failed to get database size: {e}"),
                operation: "size".to_string(),
            })?;
        Ok(size as u64)
    }

    /// WAL lets sweep workers read while the service writes; the busy timeout
    /// covers writer contention between processes.
    fn apply_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 120000;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16384;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| RefKeeperError::Database {
            message: format!("failed to apply pragmas: {e}"),
            operation: "apply_pragmas".to_string(),
        })
    }
}

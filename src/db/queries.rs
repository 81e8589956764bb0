use std::collections::BTreeMap;

use rusqlite::types::Type;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use super::connection::Database;
use crate::errors::{RefKeeperError, Result};
use crate::types::*;

/// SHA-256 of the canonical JSON rendering of a record body, hex encoded.
///
/// `serde_json::Map` keeps keys sorted, so equal bodies hash equally.
pub fn content_hash(body: &Record) -> String {
    let text = serde_json::to_string(body).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn db_error(operation: &'static str, what: &'static str) -> impl Fn(rusqlite::Error) -> RefKeeperError {
    move |e| RefKeeperError::Database {
        message: format!("failed to {what}: {e}"),
        operation: operation.to_string(),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

// ---------------------------------------------------------------------------
// Helper: map a rusqlite row to domain types
// ---------------------------------------------------------------------------

fn conversion_error<E>(index: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
}

fn id_column(row: &Row, name: &str) -> rusqlite::Result<ObjectId> {
    let text: String = row.get(name)?;
    ObjectId::parse(&text).ok_or_else(|| {
        conversion_error(
            0,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad id '{text}'")),
        )
    })
}

fn json_column<T: DeserializeOwned>(row: &Row, name: &str) -> rusqlite::Result<T> {
    let text: String = row.get(name)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(0, e))
}

fn collection_column(row: &Row, name: &str) -> rusqlite::Result<Collection> {
    let text: String = row.get(name)?;
    Collection::from_str(&text).ok_or_else(|| {
        conversion_error(
            0,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown collection '{text}'"),
            ),
        )
    })
}

/// Maps a row from the `records` table to a `StoredRecord`.
fn row_to_record(row: &Row) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: id_column(row, "id")?,
        collection: collection_column(row, "collection")?,
        body: json_column(row, "body")?,
        content_hash: row.get("content_hash")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Maps a row from the `lookups` table to a `LookupRow`.
fn row_to_lookup(row: &Row) -> rusqlite::Result<LookupRow> {
    let metadata: Option<String> = row.get("metadata")?;
    let metadata: Option<serde_json::Value> = metadata
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| conversion_error(0, e))?;

    Ok(LookupRow {
        id: id_column(row, "id")?,
        category: row.get("category")?,
        label: row.get("label")?,
        parent_value: row.get("parent_value")?,
        order: row.get("sort_order")?,
        active: row.get::<_, i32>("active")? != 0,
        metadata,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Maps a row from the `system_settings` table to a `SystemSetting`.
fn row_to_setting(row: &Row) -> rusqlite::Result<SystemSetting> {
    Ok(SystemSetting {
        key: row.get("key")?,
        category: row.get("category")?,
        value: json_column(row, "value")?,
        description: row.get("description")?,
        is_public: row.get::<_, i32>("is_public")? != 0,
        updated_at: row.get("updated_at")?,
    })
}

/// Maps a row from the `sweep_checkpoints` table to a `SweepCheckpoint`.
fn row_to_checkpoint(row: &Row) -> rusqlite::Result<SweepCheckpoint> {
    Ok(SweepCheckpoint {
        job: row.get("job")?,
        collection: collection_column(row, "collection")?,
        last_id: id_column(row, "last_id")?,
        scanned: row.get::<_, i64>("scanned")? as u64,
        changed: row.get::<_, i64>("changed")? as u64,
        updated_at: row.get("updated_at")?,
    })
}

const RECORD_COLUMNS: &str = "collection, id, body, content_hash, created_at, updated_at";
const LOOKUP_COLUMNS: &str = "id, category, label, parent_value, sort_order, active, metadata, \
                              created_at, updated_at";

// ---------------------------------------------------------------------------
// Record operations
// ---------------------------------------------------------------------------

impl Database {
    /// Inserts a new record under a fresh identifier.
    pub fn insert_record(&self, collection: Collection, body: &Record) -> Result<StoredRecord> {
        let now = current_timestamp();
        let stored = StoredRecord {
            id: ObjectId::new(),
            collection,
            body: body.clone(),
            content_hash: content_hash(body),
            created_at: now,
            updated_at: now,
        };
        let text = serde_json::to_string(body)?;

        self.conn()
            .execute(
                "INSERT INTO records (collection, id, body, content_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    collection.as_str(),
                    stored.id.to_string(),
                    text,
                    stored.content_hash,
                    now,
                    now,
                ],
            )
            .map_err(db_error("insert_record", "insert record"))?;
        Ok(stored)
    }

    /// Retrieves a record, returning `None` if not found.
    pub fn get_record(&self, collection: Collection, id: &ObjectId) -> Result<Option<StoredRecord>> {
        self.conn()
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?1 AND id = ?2"),
                params![collection.as_str(), id.to_string()],
                row_to_record,
            )
            .optional()
            .map_err(db_error("get_record", "get record"))
    }

    pub fn record_exists(&self, collection: Collection, id: &ObjectId) -> Result<bool> {
        self.conn()
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(db_error("record_exists", "check record"))
    }

    /// Keyset page of records ordered by id, starting after `after`.
    pub fn list_records(
        &self,
        collection: Collection,
        after: Option<&ObjectId>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let mut stmt = self
            .conn()
            .prepare_cached(&format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE collection = ?1 AND id > ?2
                 ORDER BY id LIMIT ?3"
            ))
            .map_err(db_error("list_records", "prepare query"))?;

        let after = after.map(|id| id.to_string()).unwrap_or_default();
        let rows = stmt
            .query_map(
                params![collection.as_str(), after, limit as i64],
                row_to_record,
            )
            .map_err(db_error("list_records", "query records"))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_error("list_records", "read record row"))?);
        }
        Ok(records)
    }

    /// Overwrites the body of an existing record.
    pub fn update_record(
        &self,
        collection: Collection,
        id: &ObjectId,
        body: &Record,
    ) -> Result<StoredRecord> {
        let hash = content_hash(body);
        let text = serde_json::to_string(body)?;
        let changed = self
            .conn()
            .execute(
                "UPDATE records SET body = ?3, content_hash = ?4, updated_at = ?5
                 WHERE collection = ?1 AND id = ?2",
                params![
                    collection.as_str(),
                    id.to_string(),
                    text,
                    hash,
                    current_timestamp(),
                ],
            )
            .map_err(db_error("update_record", "update record"))?;

        if changed == 0 {
            return Err(RefKeeperError::NotFound {
                entity: collection.entity_name().to_string(),
                id: id.to_string(),
            });
        }
        self.get_record(collection, id)?
            .ok_or_else(|| RefKeeperError::NotFound {
                entity: collection.entity_name().to_string(),
                id: id.to_string(),
            })
    }

    /// Compare-and-swap write: replaces the body only if the stored content
    /// hash still equals `expected_hash`. Returns `false` when another writer
    /// got there first (or the record is gone).
    pub fn replace_record_if_unchanged(
        &self,
        collection: Collection,
        id: &ObjectId,
        expected_hash: &str,
        body: &Record,
    ) -> Result<bool> {
        let text = serde_json::to_string(body)?;
        let changed = self
            .conn()
            .execute(
                "UPDATE records SET body = ?4, content_hash = ?5, updated_at = ?6
                 WHERE collection = ?1 AND id = ?2 AND content_hash = ?3",
                params![
                    collection.as_str(),
                    id.to_string(),
                    expected_hash,
                    text,
                    content_hash(body),
                    current_timestamp(),
                ],
            )
            .map_err(db_error("replace_record_if_unchanged", "swap record"))?;
        Ok(changed == 1)
    }

    /// Deletes a record, returning whether it existed.
    pub fn delete_record(&self, collection: Collection, id: &ObjectId) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id.to_string()],
            )
            .map_err(db_error("delete_record", "delete record"))?;
        Ok(changed > 0)
    }

    pub fn count_records(&self, collection: Collection) -> Result<u64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                params![collection.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(db_error("count_records", "count records"))
    }

    /// Ids of records whose dotted `field` equals `value` case-insensitively,
    /// at most `limit` of them.
    ///
    /// Arrays along the path are stepped into, so `phones.number` matches
    /// any element of `phones` and `tags` matches any element of `tags`.
    pub fn find_record_ids_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<ObjectId>> {
        let value = value.trim();
        if value.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let target = field_json_path(field);

        let mut stmt = self
            .conn()
            .prepare_cached(
                "SELECT r.id, t.fullkey FROM records r, json_tree(r.body) t
                 WHERE r.collection = ?1
                   AND t.type IN ('text', 'integer', 'real')
                   AND lower(trim(t.value)) = lower(?2)
                 ORDER BY r.id",
            )
            .map_err(db_error("find_record_ids_by_field", "prepare query"))?;

        let rows = stmt
            .query_map(params![collection.as_str(), value], |row| {
                Ok((id_column(row, "id")?, row.get::<_, String>("fullkey")?))
            })
            .map_err(db_error("find_record_ids_by_field", "query records"))?;

        let mut ids: Vec<ObjectId> = Vec::new();
        for row in rows {
            let (id, fullkey) = row.map_err(db_error("find_record_ids_by_field", "read id"))?;
            if strip_array_indices(&fullkey) != target || ids.last() == Some(&id) {
                continue;
            }
            ids.push(id);
            if ids.len() >= limit {
                break;
            }
        }
        Ok(ids)
    }
}

/// `phones.number` as the index-free JSON path `$.phones.number`.
fn field_json_path(field: &str) -> String {
    let segments: Vec<&str> = field
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    format!("$.{}", segments.join("."))
}

/// `$.phones[1].number` as `$.phones.number`.
fn strip_array_indices(fullkey: &str) -> String {
    let mut out = String::with_capacity(fullkey.len());
    let mut in_index = false;
    for c in fullkey.chars() {
        match c {
            '[' => in_index = true,
            ']' if in_index => in_index = false,
            _ if in_index => {}
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Lookup operations
// ---------------------------------------------------------------------------

impl Database {
    fn get_lookup_by_key(&self, category: &str, key: &str) -> Result<Option<LookupRow>> {
        self.conn()
            .query_row(
                &format!("SELECT {LOOKUP_COLUMNS} FROM lookups WHERE category = ?1 AND label_key = ?2"),
                params![category, key],
                row_to_lookup,
            )
            .optional()
            .map_err(db_error("get_lookup_by_key", "get lookup"))
    }

    /// Case- and whitespace-insensitive find. Blank labels yield `None`.
    pub fn find_lookup_by_label(&self, category: &str, label: &str) -> Result<Option<LookupRow>> {
        match label_key(label) {
            Some(key) => self.get_lookup_by_key(category, &key),
            None => Ok(None),
        }
    }

    /// Finds the row for `(category, label)` or creates it.
    ///
    /// Creation is an insert that does nothing on a unique-key conflict,
    /// followed by a re-fetch, so concurrent writers converge on one row. The
    /// flag is `true` when this call inserted the row.
    pub fn find_or_create_lookup(
        &self,
        category: &str,
        label: &str,
    ) -> Result<Option<(LookupRow, bool)>> {
        let Some(label) = normalize_label(label) else {
            return Ok(None);
        };
        let key = label.to_lowercase();
        if let Some(row) = self.get_lookup_by_key(category, &key)? {
            return Ok(Some((row, false)));
        }

        let now = current_timestamp();
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO lookups
                    (id, category, label, label_key, sort_order, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?5)
                 ON CONFLICT(category, label_key) DO NOTHING",
                params![ObjectId::new().to_string(), category, label, key, now],
            )
            .map_err(db_error("find_or_create_lookup", "insert lookup"))?;

        let row = self
            .get_lookup_by_key(category, &key)?
            .ok_or_else(|| RefKeeperError::Database {
                message: format!("lookup {category}:{label} vanished after insert"),
                operation: "find_or_create_lookup".to_string(),
            })?;
        Ok(Some((row, inserted == 1)))
    }

    /// Inserts a lookup row through the admin path. A row with the same
    /// normalized label in the category is a conflict.
    pub fn insert_lookup(&self, new: &NewLookup) -> Result<LookupRow> {
        let category = new.category.trim();
        if category.is_empty() {
            return Err(RefKeeperError::validation("lookups", "category", "is required"));
        }
        let label = normalize_label(&new.label)
            .ok_or_else(|| RefKeeperError::validation("lookups", "label", "is required"))?;
        let metadata = new.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let id = ObjectId::new();
        let now = current_timestamp();

        self.conn()
            .execute(
                "INSERT INTO lookups
                    (id, category, label, label_key, parent_value, sort_order, active,
                     metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)",
                params![
                    id.to_string(),
                    category,
                    label,
                    label.to_lowercase(),
                    new.parent_value,
                    new.order,
                    metadata,
                    now,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RefKeeperError::Conflict {
                        message: format!("lookup '{label}' already exists in {category}"),
                    }
                } else {
                    db_error("insert_lookup", "insert lookup")(e)
                }
            })?;

        self.get_lookup(&id)?.ok_or_else(|| RefKeeperError::NotFound {
            entity: "lookup".to_string(),
            id: id.to_string(),
        })
    }

    pub fn get_lookup(&self, id: &ObjectId) -> Result<Option<LookupRow>> {
        self.conn()
            .query_row(
                &format!("SELECT {LOOKUP_COLUMNS} FROM lookups WHERE id = ?1"),
                params![id.to_string()],
                row_to_lookup,
            )
            .optional()
            .map_err(db_error("get_lookup", "get lookup"))
    }

    /// Lists lookups ordered by category, order and label.
    pub fn list_lookups(&self, category: Option<&str>, active_only: bool) -> Result<Vec<LookupRow>> {
        let mut stmt = self
            .conn()
            .prepare_cached(&format!(
                "SELECT {LOOKUP_COLUMNS} FROM lookups
                 WHERE (?1 IS NULL OR category = ?1) AND (?2 = 0 OR active = 1)
                 ORDER BY category, sort_order, label COLLATE NOCASE"
            ))
            .map_err(db_error("list_lookups", "prepare query"))?;

        let rows = stmt
            .query_map(params![category, active_only as i32], row_to_lookup)
            .map_err(db_error("list_lookups", "query lookups"))?;

        let mut lookups = Vec::new();
        for row in rows {
            lookups.push(row.map_err(db_error("list_lookups", "read lookup row"))?);
        }
        Ok(lookups)
    }

    /// Applies a partial update. Renaming onto an existing label is a
    /// conflict.
    pub fn update_lookup(&self, id: &ObjectId, patch: &LookupPatch) -> Result<LookupRow> {
        let mut row = self.get_lookup(id)?.ok_or_else(|| RefKeeperError::NotFound {
            entity: "lookup".to_string(),
            id: id.to_string(),
        })?;

        if let Some(label) = &patch.label {
            row.label = normalize_label(label)
                .ok_or_else(|| RefKeeperError::validation("lookups", "label", "must not be blank"))?;
        }
        if let Some(parent) = &patch.parent_value {
            row.parent_value = Some(parent.clone());
        }
        if let Some(order) = patch.order {
            row.order = order;
        }
        if let Some(active) = patch.active {
            row.active = active;
        }
        if let Some(metadata) = &patch.metadata {
            row.metadata = Some(metadata.clone());
        }
        row.updated_at = current_timestamp();
        let metadata = row.metadata.as_ref().map(serde_json::to_string).transpose()?;

        self.conn()
            .execute(
                "UPDATE lookups
                 SET label = ?2, label_key = ?3, parent_value = ?4, sort_order = ?5,
                     active = ?6, metadata = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    row.label,
                    row.label.to_lowercase(),
                    row.parent_value,
                    row.order,
                    row.active as i32,
                    metadata,
                    row.updated_at,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RefKeeperError::Conflict {
                        message: format!("lookup '{}' already exists in {}", row.label, row.category),
                    }
                } else {
                    db_error("update_lookup", "update lookup")(e)
                }
            })?;
        Ok(row)
    }

    /// Deletes a lookup row, returning it if it existed.
    pub fn delete_lookup(&self, id: &ObjectId) -> Result<Option<LookupRow>> {
        let Some(row) = self.get_lookup(id)? else {
            return Ok(None);
        };
        self.conn()
            .execute("DELETE FROM lookups WHERE id = ?1", params![id.to_string()])
            .map_err(db_error("delete_lookup", "delete lookup"))?;
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// System settings
// ---------------------------------------------------------------------------

impl Database {
    /// Inserts or replaces a setting by key.
    pub fn upsert_setting(&self, setting: &SystemSetting) -> Result<SystemSetting> {
        let key = setting.key.trim();
        if key.is_empty() {
            return Err(RefKeeperError::validation("settings", "key", "is required"));
        }
        let category = match setting.category.trim() {
            "" => "general",
            c => c,
        };
        let now = current_timestamp();

        self.conn()
            .execute(
                "INSERT INTO system_settings (key, category, value, description, is_public, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                    category = excluded.category,
                    value = excluded.value,
                    description = excluded.description,
                    is_public = excluded.is_public,
                    updated_at = excluded.updated_at",
                params![
                    key,
                    category,
                    serde_json::to_string(&setting.value)?,
                    setting.description,
                    setting.is_public as i32,
                    now,
                ],
            )
            .map_err(db_error("upsert_setting", "upsert setting"))?;

        Ok(SystemSetting {
            key: key.to_string(),
            category: category.to_string(),
            value: setting.value.clone(),
            description: setting.description.clone(),
            is_public: setting.is_public,
            updated_at: now,
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<SystemSetting>> {
        self.conn()
            .query_row(
                "SELECT key, category, value, description, is_public, updated_at
                 FROM system_settings WHERE key = ?1",
                params![key.trim()],
                row_to_setting,
            )
            .optional()
            .map_err(db_error("get_setting", "get setting"))
    }

    /// Lists settings ordered by key, optionally filtered by category and
    /// visibility.
    pub fn list_settings(&self, category: Option<&str>, public_only: bool) -> Result<Vec<SystemSetting>> {
        let mut stmt = self
            .conn()
            .prepare_cached(
                "SELECT key, category, value, description, is_public, updated_at
                 FROM system_settings
                 WHERE (?1 IS NULL OR category = ?1) AND (?2 = 0 OR is_public = 1)
                 ORDER BY key",
            )
            .map_err(db_error("list_settings", "prepare query"))?;

        let rows = stmt
            .query_map(params![category, public_only as i32], row_to_setting)
            .map_err(db_error("list_settings", "query settings"))?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row.map_err(db_error("list_settings", "read setting row"))?);
        }
        Ok(settings)
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM system_settings WHERE key = ?1", params![key.trim()])
            .map_err(db_error("delete_setting", "delete setting"))?;
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
// Sweep checkpoints
// ---------------------------------------------------------------------------

impl Database {
    pub fn get_checkpoint(&self, job: &str, collection: Collection) -> Result<Option<SweepCheckpoint>> {
        self.conn()
            .query_row(
                "SELECT job, collection, last_id, scanned, changed, updated_at
                 FROM sweep_checkpoints WHERE job = ?1 AND collection = ?2",
                params![job, collection.as_str()],
                row_to_checkpoint,
            )
            .optional()
            .map_err(db_error("get_checkpoint", "get checkpoint"))
    }

    pub fn save_checkpoint(&self, checkpoint: &SweepCheckpoint) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO sweep_checkpoints
                    (job, collection, last_id, scanned, changed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    checkpoint.job,
                    checkpoint.collection.as_str(),
                    checkpoint.last_id.to_string(),
                    checkpoint.scanned as i64,
                    checkpoint.changed as i64,
                    checkpoint.updated_at,
                ],
            )
            .map_err(db_error("save_checkpoint", "save checkpoint"))?;
        Ok(())
    }

    pub fn clear_checkpoint(&self, job: &str, collection: Collection) -> Result<()> {
        self.conn()
            .execute(
                "DELETE FROM sweep_checkpoints WHERE job = ?1 AND collection = ?2",
                params![job, collection.as_str()],
            )
            .map_err(db_error("clear_checkpoint", "clear checkpoint"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

impl Database {
    fn grouped_counts(&self, sql: &str, operation: &'static str) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self
            .conn()
            .prepare(sql)
            .map_err(db_error(operation, "prepare query"))?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((key, count as u64))
            })
            .map_err(db_error(operation, "query counts"))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count) = row.map_err(db_error(operation, "read stats row"))?;
            counts.insert(key, count);
        }
        Ok(counts)
    }

    /// Returns aggregate statistics about the store.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let records_by_collection = self.grouped_counts(
            "SELECT collection, COUNT(*) FROM records GROUP BY collection",
            "get_stats",
        )?;
        let lookups_by_category = self.grouped_counts(
            "SELECT category, COUNT(*) FROM lookups GROUP BY category",
            "get_stats",
        )?;
        let setting_count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM system_settings", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(db_error("get_stats", "count settings"))? as u64;

        Ok(StoreStats {
            lookup_count: lookups_by_category.values().sum(),
            records_by_collection,
            lookups_by_category,
            setting_count,
            db_size_bytes: self.size().unwrap_or(0),
        })
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::LookupCache;
use crate::config::{get_db_path, get_refkeeper_dir, load_config, save_config, RefKeeperConfig};
use crate::db::Database;
use crate::errors::{RefKeeperError, Result};
use crate::models::{self, Model};
use crate::resolution::{
    invalidate_category, invalidate_entity, CachedReferenceTable, FieldPath, IdentifierPolicy,
    PreviewTable, ReferenceResolver, Resolution, ResolutionFailure,
};
use crate::sweep::Sweeper;
use crate::types::*;

/// Page size used when scanning a whole collection in memory-bounded steps.
const SCAN_PAGE: usize = 500;

/// Central orchestrator: the record store, the reference table, settings and
/// the resolver wired together.
pub struct RefKeeper {
    db: Database,
    config: RefKeeperConfig,
    project_root: PathBuf,
    cache: Arc<LookupCache>,
}

/// A stored record together with the soft failures of its resolution.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub record: StoredRecord,
    pub failures: Vec<ResolutionFailure>,
}

impl WriteOutcome {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "record": self.record.to_document(),
            "failures": self.failures,
        })
    }
}

/// Parses a caller-supplied identifier, reporting malformed ones as
/// validation errors.
pub fn parse_id(entity: &str, id: &str) -> Result<ObjectId> {
    ObjectId::parse(id.trim())
        .ok_or_else(|| RefKeeperError::validation(entity, "_id", "is not a valid identifier"))
}

/// Drops store-owned fields from an incoming payload.
fn strip_system_fields(payload: &Record) -> Record {
    let mut record = payload.clone();
    for field in SYSTEM_FIELDS {
        record.remove(*field);
    }
    record
}

fn not_found(collection: Collection, id: &ObjectId) -> RefKeeperError {
    RefKeeperError::NotFound {
        entity: collection.entity_name().to_string(),
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl RefKeeper {
    /// Initializes a store at the given root: writes the default
    /// configuration (unless one exists) and creates the database.
    pub fn init(project_root: &Path) -> Result<Self> {
        let config = load_config(project_root)?;
        save_config(project_root, &config)?;

        let db = Database::initialize(&get_db_path(project_root))?;
        info!(root = %project_root.display(), "initialized store");
        Ok(Self::assemble(db, config, project_root))
    }

    /// Opens an existing store at the given root.
    pub fn open(project_root: &Path) -> Result<Self> {
        let config = load_config(project_root)?;
        let db_path = get_db_path(project_root);

        if !db_path.exists() {
            return Err(RefKeeperError::Config {
                message: format!(
                    "no store found at '{}'; run 'refkeeper init' first",
                    db_path.display()
                ),
            });
        }

        let db = Database::open(&db_path)?;
        Ok(Self::assemble(db, config, project_root))
    }

    /// Returns `true` if a store has been initialized at the given root.
    pub fn is_initialized(project_root: &Path) -> bool {
        get_db_path(project_root).exists()
    }

    fn assemble(db: Database, config: RefKeeperConfig, project_root: &Path) -> Self {
        let cache = Arc::new(LookupCache::new(Duration::from_secs(config.cache_ttl_secs)));
        Self {
            db,
            config,
            project_root: project_root.to_path_buf(),
            cache,
        }
    }

    /// Replaces the lookup cache, e.g. to share one with other handles.
    pub fn with_cache(mut self, cache: Arc<LookupCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &RefKeeperConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn data_dir(&self) -> PathBuf {
        get_refkeeper_dir(&self.project_root)
    }

    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    /// A consistency sweep over this store, sharing its cache.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            get_db_path(&self.project_root),
            self.config.clone(),
            Arc::clone(&self.cache),
        )
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

impl RefKeeper {
    /// Runs the resolver over `record` with the reference fields of
    /// `collection`. Nothing is written except lazily created lookups.
    pub fn resolve(
        &self,
        collection: Collection,
        record: &Record,
        policy: Option<IdentifierPolicy>,
    ) -> Result<Resolution> {
        let table = CachedReferenceTable::new(&self.db, &self.cache);
        let resolver = ReferenceResolver::with_policy(
            &table,
            policy.unwrap_or(self.config.identifier_policy),
        );
        resolver.resolve(record, &self.config.descriptors(collection))
    }

    /// Resolves without creating lookups; labels that would be created get
    /// a placeholder id.
    fn preview(&self, collection: Collection, record: &Record) -> Result<Resolution> {
        let cached = CachedReferenceTable::new(&self.db, &self.cache);
        let table = PreviewTable::new(&cached);
        ReferenceResolver::with_policy(&table, self.config.identifier_policy)
            .resolve(record, &self.config.descriptors(collection))
    }

    /// Validates a write against a preview resolution, then resolves for
    /// real. Lookups are only created once the write is known to pass.
    ///
    /// With `base`, the resolved payload is merged over it (top-level keys
    /// replace).
    fn resolve_checked(
        &self,
        collection: Collection,
        payload: &Record,
        base: Option<&Record>,
        exclude: Option<&ObjectId>,
    ) -> Result<(Record, Vec<ResolutionFailure>)> {
        let merge = |resolved: Record| match base {
            Some(base) => {
                let mut body = base.clone();
                body.extend(resolved);
                body
            }
            None => resolved,
        };

        let preview = merge(self.preview(collection, payload)?.record);
        models::validate_record(collection, &preview)?;
        self.check_unique(collection, &preview, exclude)?;

        let resolution = self.resolve(collection, payload, None)?;
        Ok((merge(resolution.record), resolution.failures))
    }

    /// Rejects `record` if a unique field clashes with another record.
    fn check_unique(
        &self,
        collection: Collection,
        record: &Record,
        exclude: Option<&ObjectId>,
    ) -> Result<()> {
        for field in self.config.unique_fields(collection) {
            for value in FieldPath::parse(field).collect_strings(record) {
                let clash = self
                    .db
                    .find_record_ids_by_field(collection, field, &value, 2)?
                    .into_iter()
                    .any(|id| Some(&id) != exclude);
                if clash {
                    return Err(RefKeeperError::Conflict {
                        message: format!(
                            "{} with {field} '{value}' already exists",
                            collection.entity_name()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

impl RefKeeper {
    /// Resolves, validates and stores a new record. A rejected write creates
    /// no lookups.
    pub fn create(&self, collection: Collection, payload: &Record) -> Result<WriteOutcome> {
        let (body, failures) =
            self.resolve_checked(collection, &strip_system_fields(payload), None, None)?;

        let record = self.db.insert_record(collection, &body)?;
        debug!(%collection, id = %record.id, failures = failures.len(), "created record");
        Ok(WriteOutcome { record, failures })
    }

    pub fn get(&self, collection: Collection, id: &str) -> Result<StoredRecord> {
        let id = parse_id(collection.entity_name(), id)?;
        self.db
            .get_record(collection, &id)?
            .ok_or_else(|| not_found(collection, &id))
    }

    /// Fetches a record decoded into its typed model.
    pub fn get_typed<T: Model>(&self, id: &str) -> Result<(ObjectId, T)> {
        let stored = self.get(T::COLLECTION, id)?;
        Ok((stored.id, models::decode(&stored.body)?))
    }

    /// Keyset listing ordered by id.
    pub fn list(
        &self,
        collection: Collection,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let after = after
            .map(|id| parse_id(collection.entity_name(), id))
            .transpose()?;
        self.db.list_records(collection, after.as_ref(), limit)
    }

    /// Resolves `patch`, merges it over the stored body (top-level keys
    /// replace), validates and saves.
    pub fn update(&self, collection: Collection, id: &str, patch: &Record) -> Result<WriteOutcome> {
        let id = parse_id(collection.entity_name(), id)?;
        let existing = self
            .db
            .get_record(collection, &id)?
            .ok_or_else(|| not_found(collection, &id))?;

        let (body, failures) = self.resolve_checked(
            collection,
            &strip_system_fields(patch),
            Some(&existing.body),
            Some(&id),
        )?;

        let record = self.db.update_record(collection, &id, &body)?;
        debug!(%collection, id = %record.id, "updated record");
        Ok(WriteOutcome { record, failures })
    }

    pub fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let id = parse_id(collection.entity_name(), id)?;
        if !self.db.delete_record(collection, &id)? {
            return Err(not_found(collection, &id));
        }
        invalidate_entity(&self.cache, collection, &id);
        debug!(%collection, %id, "deleted record");
        Ok(())
    }

    /// Creates every row independently; failures are reported per row and
    /// never abort the batch.
    pub fn bulk_import(&self, collection: Collection, rows: &[Value]) -> BulkReport {
        let mut report = BulkReport {
            total: rows.len(),
            ..BulkReport::default()
        };

        for (index, row) in rows.iter().enumerate() {
            let outcome = match row.as_object() {
                Some(payload) => self.create(collection, payload),
                None => Err(RefKeeperError::validation(
                    collection.as_str(),
                    &format!("[{index}]"),
                    "row is not an object",
                )),
            };
            match outcome {
                Ok(written) => {
                    report.succeeded += 1;
                    report.ids.push(written.record.id);
                }
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(RowError {
                        index,
                        status: e.status_code(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            %collection,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk import finished"
        );
        report
    }

    /// Stored records sharing a duplicate-checked value with `candidate`.
    /// Comparison is case-insensitive; array paths match on any element.
    pub fn find_duplicates(
        &self,
        collection: Collection,
        candidate: &Record,
        exclude: Option<&ObjectId>,
    ) -> Result<Vec<DuplicateMatch>> {
        let wanted: Vec<(FieldPath, &String, BTreeSet<String>)> = self
            .config
            .duplicate_fields(collection)
            .iter()
            .map(|field| {
                let path = FieldPath::parse(field);
                let values: BTreeSet<String> = path
                    .collect_strings(candidate)
                    .into_iter()
                    .map(|v| v.to_lowercase())
                    .collect();
                (path, field, values)
            })
            .filter(|(_, _, values)| !values.is_empty())
            .collect();

        let mut matches = Vec::new();
        if wanted.is_empty() {
            return Ok(matches);
        }

        let mut after: Option<ObjectId> = None;
        loop {
            let page = self.db.list_records(collection, after.as_ref(), SCAN_PAGE)?;
            for stored in &page {
                if Some(&stored.id) == exclude {
                    continue;
                }
                for (path, field, values) in &wanted {
                    let hit = path
                        .collect_strings(&stored.body)
                        .into_iter()
                        .find(|v| values.contains(&v.to_lowercase()));
                    if let Some(value) = hit {
                        matches.push(DuplicateMatch {
                            id: stored.id,
                            field: field.to_string(),
                            value,
                        });
                    }
                }
            }
            match page.last() {
                Some(last) if page.len() == SCAN_PAGE => after = Some(last.id),
                _ => break,
            }
        }
        Ok(matches)
    }
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

impl RefKeeper {
    pub fn list_lookups(&self, category: Option<&str>, active_only: bool) -> Result<Vec<LookupRow>> {
        self.db.list_lookups(category, active_only)
    }

    /// All lookups grouped by category.
    pub fn lookups_by_category(&self, active_only: bool) -> Result<BTreeMap<String, Vec<LookupRow>>> {
        let mut grouped: BTreeMap<String, Vec<LookupRow>> = BTreeMap::new();
        for row in self.db.list_lookups(None, active_only)? {
            grouped.entry(row.category.clone()).or_default().push(row);
        }
        Ok(grouped)
    }

    pub fn get_lookup(&self, id: &str) -> Result<LookupRow> {
        let id = parse_id("lookup", id)?;
        self.db.get_lookup(&id)?.ok_or_else(|| RefKeeperError::NotFound {
            entity: "lookup".to_string(),
            id: id.to_string(),
        })
    }

    pub fn create_lookup(&self, new: &NewLookup) -> Result<LookupRow> {
        let row = self.db.insert_lookup(new)?;
        invalidate_category(&self.cache, &row.category);
        Ok(row)
    }

    pub fn update_lookup(&self, id: &str, patch: &LookupPatch) -> Result<LookupRow> {
        let id = parse_id("lookup", id)?;
        let row = self.db.update_lookup(&id, patch)?;
        invalidate_category(&self.cache, &row.category);
        Ok(row)
    }

    pub fn delete_lookup(&self, id: &str) -> Result<LookupRow> {
        let id = parse_id("lookup", id)?;
        let row = self.db.delete_lookup(&id)?.ok_or_else(|| RefKeeperError::NotFound {
            entity: "lookup".to_string(),
            id: id.to_string(),
        })?;
        invalidate_category(&self.cache, &row.category);
        Ok(row)
    }

    /// Bulk seed with partial success: rows that already exist are reported
    /// as conflicts, the rest are inserted.
    pub fn seed_lookups(&self, rows: &[NewLookup]) -> BulkReport {
        let mut report = BulkReport {
            total: rows.len(),
            ..BulkReport::default()
        };
        let mut touched = BTreeSet::new();

        for (index, new) in rows.iter().enumerate() {
            match self.db.insert_lookup(new) {
                Ok(row) => {
                    report.succeeded += 1;
                    report.ids.push(row.id);
                    touched.insert(row.category);
                }
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(RowError {
                        index,
                        status: e.status_code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        for category in &touched {
            invalidate_category(&self.cache, category);
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "seeded lookups"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// System settings and statistics
// ---------------------------------------------------------------------------

impl RefKeeper {
    pub fn list_settings(&self, category: Option<&str>, public_only: bool) -> Result<Vec<SystemSetting>> {
        self.db.list_settings(category, public_only)
    }

    pub fn get_setting(&self, key: &str) -> Result<SystemSetting> {
        self.db.get_setting(key)?.ok_or_else(|| RefKeeperError::NotFound {
            entity: "setting".to_string(),
            id: key.to_string(),
        })
    }

    pub fn upsert_setting(&self, setting: &SystemSetting) -> Result<SystemSetting> {
        self.db.upsert_setting(setting)
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        if !self.db.delete_setting(key)? {
            return Err(RefKeeperError::NotFound {
                entity: "setting".to_string(),
                id: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        self.db.get_stats()
    }
}

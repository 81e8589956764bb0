//! Consistency sweep.
//!
//! Re-runs the resolver over stored records and writes back what changed.
//! Pages are read in id order by a coordinator and processed concurrently on
//! blocking workers, each with its own connection. Write-back is a
//! compare-and-swap on the content hash, so a record edited mid-sweep is left
//! alone and picked up by the next run. Progress is checkpointed as a
//! contiguous low-water mark, so a crashed run resumes instead of restarting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::LookupCache;
use crate::config::RefKeeperConfig;
use crate::db::Database;
use crate::errors::{RefKeeperError, Result};
use crate::resolution::{
    CachedReferenceTable, FieldDescriptor, IdentifierPolicy, PreviewTable, ReferenceResolver,
    ReferenceTable, ResolutionFailure,
};
use crate::types::{current_timestamp, Collection, ObjectId, StoredRecord, SweepCheckpoint};

/// Checkpoint job name used when none is given.
pub const DEFAULT_JOB: &str = "default";

/// What to sweep and how.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Collections to scan; empty means all.
    pub collections: Vec<Collection>,
    pub concurrency: Option<usize>,
    pub page_size: Option<usize>,
    pub policy: Option<IdentifierPolicy>,
    /// Report what would change without writing records or checkpoints.
    pub dry_run: bool,
    /// Ignore (and discard) saved checkpoints.
    pub restart: bool,
    pub job: String,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            concurrency: None,
            page_size: None,
            policy: None,
            dry_run: false,
            restart: false,
            job: DEFAULT_JOB.to_string(),
        }
    }
}

/// One record the sweep changed, or would change.
#[derive(Debug, Clone, Serialize)]
pub struct RecordRepair {
    pub id: ObjectId,
    pub replaced: usize,
    pub nulled: usize,
    pub dropped: usize,
    pub failures: Vec<ResolutionFailure>,
    /// `true` when the record changed since it was read and was not written.
    pub conflict: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub collection: Collection,
    pub resumed_from: Option<ObjectId>,
    pub scanned: u64,
    pub changed: u64,
    pub conflicts: u64,
    pub repairs: Vec<RecordRepair>,
}

impl CollectionReport {
    fn new(collection: Collection, resumed_from: Option<ObjectId>) -> Self {
        Self {
            collection,
            resumed_from,
            scanned: 0,
            changed: 0,
            conflicts: 0,
            repairs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub job: String,
    pub dry_run: bool,
    pub collections: Vec<CollectionReport>,
    pub duration_ms: u64,
}

impl SweepReport {
    pub fn total_scanned(&self) -> u64 {
        self.collections.iter().map(|c| c.scanned).sum()
    }

    pub fn total_changed(&self) -> u64 {
        self.collections.iter().map(|c| c.changed).sum()
    }

    pub fn total_conflicts(&self) -> u64 {
        self.collections.iter().map(|c| c.conflicts).sum()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint tracking
// ---------------------------------------------------------------------------

/// Progress that is safe to persist: everything up to and including
/// `last_id` has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub last_id: ObjectId,
    pub scanned: u64,
    pub changed: u64,
}

/// Turns out-of-order page completions into a contiguous low-water mark.
///
/// Pages are numbered in the order they were read. The mark only advances
/// once every earlier page has completed, and its counts cover exactly the
/// pages below it, so a resumed run never counts a page twice.
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    next_seq: u64,
    pending: BTreeMap<u64, (ObjectId, u64, u64)>,
    scanned: u64,
    changed: u64,
    watermark: Option<Watermark>,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the counts of a saved checkpoint.
    pub fn resume(scanned: u64, changed: u64) -> Self {
        Self {
            scanned,
            changed,
            ..Self::default()
        }
    }

    /// Records completion of page `seq` ending at `last_id`. Returns the new
    /// mark if it moved.
    pub fn complete(
        &mut self,
        seq: u64,
        last_id: ObjectId,
        scanned: u64,
        changed: u64,
    ) -> Option<Watermark> {
        self.pending.insert(seq, (last_id, scanned, changed));
        let mut advanced = false;
        while let Some((id, scanned, changed)) = self.pending.remove(&self.next_seq) {
            self.scanned += scanned;
            self.changed += changed;
            self.watermark = Some(Watermark {
                last_id: id,
                scanned: self.scanned,
                changed: self.changed,
            });
            self.next_seq += 1;
            advanced = true;
        }
        if advanced {
            self.watermark
        } else {
            None
        }
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.watermark
    }
}

// ---------------------------------------------------------------------------
// Page processing
// ---------------------------------------------------------------------------

struct PageJob {
    seq: u64,
    collection: Collection,
    records: Vec<StoredRecord>,
    descriptors: Arc<Vec<FieldDescriptor>>,
    policy: IdentifierPolicy,
    dry_run: bool,
}

struct PageOutcome {
    seq: u64,
    last_id: ObjectId,
    scanned: u64,
    repairs: Vec<RecordRepair>,
}

fn process_page(db_path: &Path, cache: &LookupCache, job: PageJob) -> Result<PageOutcome> {
    let db = Database::open(db_path)?;
    let cached = CachedReferenceTable::new(&db, cache);
    let preview = PreviewTable::new(&cached);
    let table: &dyn ReferenceTable = if job.dry_run { &preview } else { &cached };
    let resolver = ReferenceResolver::with_policy(table, job.policy);

    let last_id = job
        .records
        .last()
        .map(|r| r.id)
        .ok_or_else(|| RefKeeperError::Task {
            message: "empty sweep page".to_string(),
        })?;

    let mut repairs = Vec::new();
    for stored in &job.records {
        let resolution = resolver.resolve(&stored.body, &job.descriptors)?;
        if !resolution.changed {
            continue;
        }
        let written = job.dry_run
            || db.replace_record_if_unchanged(
                job.collection,
                &stored.id,
                &stored.content_hash,
                &resolution.record,
            )?;
        if !written {
            warn!(collection = %job.collection, id = %stored.id, "record changed during sweep; skipped");
        }
        repairs.push(RecordRepair {
            id: stored.id,
            replaced: resolution.replaced,
            nulled: resolution.nulled,
            dropped: resolution.dropped,
            failures: resolution.failures,
            conflict: !written,
        });
    }

    debug!(
        collection = %job.collection,
        page = job.seq,
        records = job.records.len(),
        repaired = repairs.len(),
        "sweep page done"
    );
    Ok(PageOutcome {
        seq: job.seq,
        last_id,
        scanned: job.records.len() as u64,
        repairs,
    })
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

/// Runs consistency sweeps against one store.
pub struct Sweeper {
    db_path: PathBuf,
    config: RefKeeperConfig,
    cache: Arc<LookupCache>,
}

type SharedDb = Arc<Mutex<Database>>;

/// Runs `f` against the coordinator connection on a blocking thread.
async fn with_db<T, F>(db: &SharedDb, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let guard = db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    })
    .await
    .map_err(|e| RefKeeperError::Task {
        message: e.to_string(),
    })?
}

impl Sweeper {
    pub fn new(db_path: PathBuf, config: RefKeeperConfig, cache: Arc<LookupCache>) -> Self {
        Self {
            db_path,
            config,
            cache,
        }
    }

    /// Sweeps the selected collections one after another.
    pub async fn run(&self, options: &SweepOptions) -> Result<SweepReport> {
        let started = Instant::now();
        let db_path = self.db_path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&db_path))
            .await
            .map_err(|e| RefKeeperError::Task {
                message: e.to_string(),
            })??;
        let db: SharedDb = Arc::new(Mutex::new(db));

        let collections = if options.collections.is_empty() {
            Collection::all().to_vec()
        } else {
            options.collections.clone()
        };

        let mut reports = Vec::new();
        for collection in collections {
            reports.push(self.sweep_collection(&db, collection, options).await?);
        }

        let report = SweepReport {
            job: options.job.clone(),
            dry_run: options.dry_run,
            collections: reports,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            job = %report.job,
            scanned = report.total_scanned(),
            changed = report.total_changed(),
            conflicts = report.total_conflicts(),
            dry_run = report.dry_run,
            "sweep finished"
        );
        Ok(report)
    }

    async fn sweep_collection(
        &self,
        db: &SharedDb,
        collection: Collection,
        options: &SweepOptions,
    ) -> Result<CollectionReport> {
        let concurrency = options
            .concurrency
            .unwrap_or(self.config.sweep.concurrency)
            .max(1);
        let page_size = options.page_size.unwrap_or(self.config.sweep.page_size).max(1);
        let policy = options.policy.unwrap_or(self.config.sweep.identifier_policy);
        let descriptors = Arc::new(self.config.descriptors(collection));
        let job = options.job.clone();

        let resume = {
            let job = job.clone();
            let restart = options.restart;
            let dry_run = options.dry_run;
            with_db(db, move |db| {
                if restart {
                    if !dry_run {
                        db.clear_checkpoint(&job, collection)?;
                    }
                    return Ok(None);
                }
                Ok(db.get_checkpoint(&job, collection)?)
            })
            .await?
        };

        let resumed_from = resume.as_ref().map(|c| c.last_id);
        let mut report = CollectionReport::new(collection, resumed_from);
        let mut tracker = match &resume {
            Some(checkpoint) => {
                report.scanned = checkpoint.scanned;
                report.changed = checkpoint.changed;
                info!(%collection, after = %checkpoint.last_id, "resuming sweep from checkpoint");
                CheckpointTracker::resume(checkpoint.scanned, checkpoint.changed)
            }
            None => {
                info!(%collection, "starting sweep");
                CheckpointTracker::new()
            }
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<Result<PageOutcome>> = JoinSet::new();
        let mut after = resumed_from;
        let mut seq = 0u64;

        loop {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| RefKeeperError::Task {
                    message: e.to_string(),
                })?;

            let records = with_db(db, move |db| db.list_records(collection, after.as_ref(), page_size)).await?;
            let Some(last) = records.last() else {
                break;
            };
            after = Some(last.id);
            let exhausted = records.len() < page_size;

            let page = PageJob {
                seq,
                collection,
                records,
                descriptors: Arc::clone(&descriptors),
                policy,
                dry_run: options.dry_run,
            };
            let db_path = self.db_path.clone();
            let cache = Arc::clone(&self.cache);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                process_page(&db_path, &cache, page)
            });
            seq += 1;

            while let Some(joined) = tasks.try_join_next() {
                self.absorb(db, joined, &mut report, &mut tracker, &job, options.dry_run)
                    .await?;
            }
            if exhausted {
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.absorb(db, joined, &mut report, &mut tracker, &job, options.dry_run)
                .await?;
        }

        if !options.dry_run {
            let job = job.clone();
            with_db(db, move |db| db.clear_checkpoint(&job, collection)).await?;
        }

        info!(
            %collection,
            scanned = report.scanned,
            changed = report.changed,
            conflicts = report.conflicts,
            "collection swept"
        );
        Ok(report)
    }

    /// Folds a finished page into the report and moves the checkpoint.
    async fn absorb(
        &self,
        db: &SharedDb,
        joined: std::result::Result<Result<PageOutcome>, tokio::task::JoinError>,
        report: &mut CollectionReport,
        tracker: &mut CheckpointTracker,
        job: &str,
        dry_run: bool,
    ) -> Result<()> {
        let outcome = joined.map_err(|e| RefKeeperError::Task {
            message: e.to_string(),
        })??;

        let changed = outcome.repairs.iter().filter(|r| !r.conflict).count() as u64;
        report.scanned += outcome.scanned;
        report.changed += changed;
        report.conflicts += outcome.repairs.len() as u64 - changed;
        report.repairs.extend(outcome.repairs);

        let moved = tracker.complete(outcome.seq, outcome.last_id, outcome.scanned, changed);
        let Some(watermark) = moved else {
            return Ok(());
        };
        if dry_run {
            return Ok(());
        }
        let checkpoint = SweepCheckpoint {
            job: job.to_string(),
            collection: report.collection,
            last_id: watermark.last_id,
            scanned: watermark.scanned,
            changed: watermark.changed,
            updated_at: current_timestamp(),
        };
        with_db(db, move |db| db.save_checkpoint(&checkpoint)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = (0..n).map(|_| ObjectId::new()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_tracker_advances_in_order() {
        let ids = ids(3);
        let mut tracker = CheckpointTracker::new();
        let mark = |t: Option<Watermark>| t.map(|w| w.last_id);
        assert_eq!(mark(tracker.complete(0, ids[0], 10, 1)), Some(ids[0]));
        assert_eq!(mark(tracker.complete(1, ids[1], 10, 2)), Some(ids[1]));
        assert_eq!(mark(tracker.watermark()), Some(ids[1]));
    }

    #[test]
    fn test_tracker_waits_for_gaps() {
        let ids = ids(3);
        let mut tracker = CheckpointTracker::new();
        assert_eq!(tracker.complete(2, ids[2], 5, 5), None);
        assert_eq!(tracker.complete(1, ids[1], 5, 5), None);
        assert_eq!(tracker.watermark(), None);
        let mark = tracker.complete(0, ids[0], 5, 0).map(|w| w.last_id);
        assert_eq!(mark, Some(ids[2]));
    }

    #[test]
    fn test_tracker_counts_only_pages_below_the_mark() {
        let ids = ids(3);
        let mut tracker = CheckpointTracker::resume(100, 7);
        assert_eq!(tracker.complete(1, ids[1], 50, 3), None);
        let mark = tracker.complete(0, ids[0], 50, 1);
        assert_eq!(
            mark,
            Some(Watermark {
                last_id: ids[1],
                scanned: 200,
                changed: 11,
            })
        );

        // A finished page past a gap contributes nothing until the gap closes.
        assert_eq!(tracker.complete(3, ids[2], 50, 9), None);
        let saved = tracker.watermark().map(|w| (w.scanned, w.changed));
        assert_eq!(saved, Some((200, 11)));
    }

    #[test]
    fn test_default_options_sweep_everything() {
        let options = SweepOptions::default();
        assert!(options.collections.is_empty());
        assert_eq!(options.job, DEFAULT_JOB);
        assert!(!options.dry_run);
    }
}

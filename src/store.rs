//! The store orchestrator: owns the backend, the worker pool and the status of
//! every individual it has seen.

use std::any::Any;
use std::fmt;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustc_hash::FxHashMap;

use crate::annotate::{Annotated, VariantAnnotator};
use crate::cache::{check_id, FileCache};
use crate::config::{ReingestPolicy, StoreConfig};
use crate::db::{DatabaseController, GroupField, GroupedVariants, SortOrder, SqliteController, VariantFilter};
use crate::error::{Result, VariantStoreError};
use crate::header::{InputFormat, VariantHeader};
use crate::input::{open_iterator, VariantIterator};
use crate::resources::{self, install_bundled};
use crate::task::{CancelToken, Task};
use crate::variant::VariantRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndividualStatus {
    #[default]
    Unknown,
    Uploading,
    Stored,
    Removing,
}

impl fmt::Display for IndividualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndividualStatus::Unknown => "unknown",
            IndividualStatus::Uploading => "uploading",
            IndividualStatus::Stored => "stored",
            IndividualStatus::Removing => "removing",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Entry {
    /// Held by the worker for the whole operation on this individual.
    lock: Arc<Mutex<()>>,
    /// Bumped on every submission; only the latest one may publish a status.
    generation: u64,
    status: IndividualStatus,
    cancel: Option<CancelToken>,
}

#[derive(Default)]
struct Statuses(Mutex<FxHashMap<String, Entry>>);

impl Statuses {
    /// Register a new operation on `id`. With `reject_existing`, an id that is
    /// stored or uploading is refused under the same lock that registers it.
    fn begin(
        &self,
        id: &str,
        status: IndividualStatus,
        cancel: Option<CancelToken>,
        reject_existing: bool,
    ) -> Result<(u64, Arc<Mutex<()>>)> {
        let mut map = self.0.lock();
        let entry = map.entry(id.to_string()).or_default();
        if reject_existing && matches!(entry.status, IndividualStatus::Stored | IndividualStatus::Uploading) {
            return Err(VariantStoreError::AlreadyStored(id.to_string()));
        }
        entry.generation += 1;
        entry.status = status;
        entry.cancel = cancel;
        Ok((entry.generation, Arc::clone(&entry.lock)))
    }

    /// Publish the outcome of operation `generation`. An id that ends up
    /// unknown with nothing newer pending is forgotten.
    fn finish(&self, id: &str, generation: u64, status: IndividualStatus) {
        let mut map = self.0.lock();
        let Some(entry) = map.get_mut(id) else {
            return;
        };
        if entry.generation != generation {
            debug!("{} superseded by a later operation, not publishing {}", id, status);
            return;
        }
        if status == IndividualStatus::Unknown {
            map.remove(id);
        } else {
            entry.status = status;
            entry.cancel = None;
        }
    }

    fn get(&self, id: &str) -> IndividualStatus {
        self.0.lock().get(id).map(|e| e.status).unwrap_or_default()
    }

    fn cancel(&self, id: &str) -> bool {
        let map = self.0.lock();
        match map.get(id) {
            Some(Entry {
                status: IndividualStatus::Uploading,
                cancel: Some(token),
                ..
            }) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn mark_stored(&self, ids: Vec<String>) {
        let mut map = self.0.lock();
        for id in ids {
            map.entry(id).or_default().status = IndividualStatus::Stored;
        }
    }
}

/// Status after a failed operation: whatever the backend actually holds.
fn settled_status(controller: &dyn DatabaseController, id: &str) -> IndividualStatus {
    match controller.contains_individual(id) {
        Ok(true) => IndividualStatus::Stored,
        Ok(false) => IndividualStatus::Unknown,
        Err(e) => {
            debug!("cannot settle status of {}: {}", id, e);
            IndividualStatus::Unknown
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one operation of a worker job, turning a panic into an error for its task.
fn guarded<T>(id: &str, op: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(op)).unwrap_or_else(|payload| {
        Err(VariantStoreError::WorkerPanicked {
            id: id.to_string(),
            message: panic_message(&*payload),
        })
    })
}

/// Long-lived store instance.
///
/// Ingestion and removal run on the store's own pool and are serialized per
/// individual; queries run on the calling thread.
pub struct VariantStore {
    config: StoreConfig,
    controller: Arc<dyn DatabaseController>,
    statuses: Arc<Statuses>,
    cache: FileCache,
    pool: RwLock<Option<ThreadPool>>,
    annotator: Option<Arc<dyn VariantAnnotator>>,
    initialized: AtomicBool,
}

impl VariantStore {
    pub fn new(config: StoreConfig, controller: Arc<dyn DatabaseController>) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("variantstore-worker-{}", i))
            .panic_handler(|payload| error!("worker job panicked: {}", panic_message(&*payload)))
            .build()
            .map_err(|e| VariantStoreError::provisioning(&config.storage_path, e.to_string()))?;
        debug!("worker pool with {} threads", config.worker_threads.max(1));
        Ok(VariantStore {
            cache: FileCache::new(config.cache_path()),
            config,
            controller,
            statuses: Arc::default(),
            pool: RwLock::new(Some(pool)),
            annotator: None,
            initialized: AtomicBool::new(false),
        })
    }

    /// A store over the bundled SQLite backend.
    pub fn with_sqlite(config: StoreConfig) -> Result<Self> {
        VariantStore::new(config, Arc::new(SqliteController::new()))
    }

    /// Transform every ingested record with `annotator` before it is stored.
    pub fn with_annotator(mut self, annotator: Arc<dyn VariantAnnotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Provision the storage directory and open the backend. Safe to repeat.
    pub fn init(&self) -> Result<()> {
        self.ensure_running()?;
        let db_path = self.config.db_path();
        if install_bundled(&db_path)? {
            info!("provisioned new store at {}", self.config.storage_path.display());
        }
        self.cache.provision()?;
        self.controller.init(&db_path)?;
        let stored = self.controller.list_individuals()?;
        info!("{} individual(s) already stored", stored.len());
        self.statuses.mark_stored(stored);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.pool.read().is_none() {
            return Err(VariantStoreError::Stopped);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        self.ensure_running()?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(VariantStoreError::BackendUnavailable(
                "store is not initialized".to_string(),
            ));
        }
        Ok(())
    }

    fn spawn(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        match self.pool.read().as_ref() {
            Some(pool) => {
                pool.spawn_fifo(job);
                Ok(())
            }
            None => Err(VariantStoreError::Stopped),
        }
    }

    /// Submit a variant file for `id`.
    ///
    /// Returns an error right away if the store is stopped, the id is not
    /// usable, the file cannot be opened, its format is not recognized, or the
    /// individual is already stored under [`ReingestPolicy::Reject`].
    /// Otherwise the file is copied into the store's file cache and ingested
    /// from there in the background; the task resolves to the number of
    /// stored variants.
    pub fn add_individual(&self, id: &str, is_public: bool, path: impl AsRef<Path>) -> Result<Task<usize>> {
        self.ensure_ready()?;
        check_id(id)?;
        let path = path.as_ref().to_path_buf();
        File::open(&path).map_err(|e| VariantStoreError::ingestion(&path, 0, e.to_string()))?;
        let format = InputFormat::detect(&path)?;

        let header = VariantHeader::new(id, is_public, format);
        let cancel = CancelToken::new();
        let (generation, lock) = self.statuses.begin(
            id,
            IndividualStatus::Uploading,
            Some(cancel.clone()),
            self.config.reingest == ReingestPolicy::Reject,
        )?;
        let (task, done) = Task::new(id);
        info!("accepted {} ({}) for individual {}", path.display(), format, id);

        let controller = Arc::clone(&self.controller);
        let statuses = Arc::clone(&self.statuses);
        let cache = self.cache.clone();
        let annotator = self.annotator.clone();
        let id = id.to_string();
        let submitted = self.spawn(move || {
            let _guard = lock.lock();
            let result = ingest_cached(&*controller, &cache, &path, header, annotator, &cancel);
            let status = match &result {
                Ok(n) => {
                    info!("stored {} variants for {}", n, id);
                    IndividualStatus::Stored
                }
                Err(e) => {
                    error!("ingestion of {} for {} failed: {}", path.display(), id, e);
                    settled_status(&*controller, &id)
                }
            };
            statuses.finish(&id, generation, status);
            done.complete(result);
        });
        submitted.map(|_| task)
    }

    /// Remove every stored variant of `id`, and its cached file, in the
    /// background. The task resolves to the number of removed variants.
    pub fn remove_individual(&self, id: &str) -> Result<Task<usize>> {
        self.ensure_ready()?;
        check_id(id)?;
        let (generation, lock) = self.statuses.begin(id, IndividualStatus::Removing, None, false)?;
        let (task, done) = Task::new(id);
        debug!("accepted removal of {}", id);

        let controller = Arc::clone(&self.controller);
        let statuses = Arc::clone(&self.statuses);
        let cache = self.cache.clone();
        let id = id.to_string();
        self.spawn(move || {
            let _guard = lock.lock();
            let result = guarded(&id, || controller.remove_individual(&id));
            let status = match &result {
                Ok(_) => {
                    if let Err(e) = cache.remove(&id) {
                        warn!("could not remove cached file of {}: {}", id, e);
                    }
                    IndividualStatus::Unknown
                }
                Err(e) => {
                    error!("removal of {} failed: {}", id, e);
                    settled_status(&*controller, &id)
                }
            };
            statuses.finish(&id, generation, status);
            done.complete(result);
        })?;
        Ok(task)
    }

    /// The cached copy of the file `id` was last ingested from. Submitting it
    /// again with [`add_individual`](Self::add_individual) rebuilds the
    /// individual's variants.
    pub fn cached_file(&self, id: &str) -> Option<PathBuf> {
        check_id(id).ok()?;
        self.cache.get(id)
    }

    /// Ask an in-flight ingestion of `id` to stop. Returns false if there is
    /// none. An ingestion that has already drained its file still commits.
    pub fn cancel_ingestion(&self, id: &str) -> bool {
        let cancelled = self.statuses.cancel(id);
        if cancelled {
            info!("cancellation requested for {}", id);
        }
        cancelled
    }

    pub fn status(&self, id: &str) -> IndividualStatus {
        self.statuses.get(id)
    }

    pub fn list_individuals(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        self.controller.list_individuals()
    }

    pub fn query(&self, filter: &VariantFilter, group_by: GroupField) -> Result<GroupedVariants> {
        self.ensure_ready()?;
        self.controller.query(filter, group_by)
    }

    /// The `n` variants of `id` with the highest Exomiser variant score.
    /// Variants without a score follow the scored ones.
    pub fn top_harmful_variants(&self, id: &str, n: usize) -> Result<Vec<VariantRecord>> {
        let filter = VariantFilter {
            order: SortOrder::VariantScoreDesc,
            limit_per_group: Some(n),
            ..VariantFilter::for_individual(id)
        };
        let mut grouped = self.query(&filter, GroupField::Individual)?;
        Ok(grouped.swap_remove(id).unwrap_or_default())
    }

    /// Shut down the pool and release the backend. Safe to repeat.
    pub fn stop(&self) -> Result<()> {
        let pool = self.pool.write().take();
        if pool.is_none() {
            return Ok(());
        }
        // queued jobs still run; they fail once they reach the closed backend
        drop(pool);
        self.initialized.store(false, Ordering::Release);
        match self.controller.stop() {
            Ok(()) => {
                info!("store at {} stopped", self.config.storage_path.display());
                Ok(())
            }
            Err(e) => {
                warn!("error while stopping backend: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the store and delete its storage directory, backend and file
    /// cache included.
    pub fn destroy(self) -> Result<()> {
        self.stop()?;
        resources::clear(&self.config.storage_path)?;
        info!("removed store at {}", self.config.storage_path.display());
        Ok(())
    }
}

impl Drop for VariantStore {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}

/// Stage a copy of `source`, ingest from it, and keep it only if the backend
/// committed.
fn ingest_cached(
    controller: &dyn DatabaseController,
    cache: &FileCache,
    source: &Path,
    header: VariantHeader,
    annotator: Option<Arc<dyn VariantAnnotator>>,
    cancel: &CancelToken,
) -> Result<usize> {
    let id = header.individual_id.clone();
    let staged = cache.stage(&id, header.format, source)?;
    let result = guarded(&id, || ingest(controller, staged.path(), header, annotator, cancel));
    match result {
        Ok(n) => {
            if let Err(e) = cache.commit(staged) {
                warn!("variants of {} are stored but its file was not cached: {}", id, e);
            }
            Ok(n)
        }
        Err(e) => {
            cache.discard(staged);
            Err(e)
        }
    }
}

fn ingest(
    controller: &dyn DatabaseController,
    path: &Path,
    header: VariantHeader,
    annotator: Option<Arc<dyn VariantAnnotator>>,
    cancel: &CancelToken,
) -> Result<usize> {
    let variants = open_iterator(path, header)?;
    let mut variants: Box<dyn VariantIterator> = match annotator {
        Some(annotator) => Box::new(Annotated::new(variants, annotator)),
        None => variants,
    };
    controller.add_individual(&mut *variants, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::fixtures::{exomiser_file, exomiser_row};
    use crate::variant::{CallInfoField, VariantInfoField};
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn store(dir: &tempfile::TempDir, policy: ReingestPolicy) -> VariantStore {
        let config = StoreConfig::new(dir.path().join("store"))
            .with_worker_threads(2)
            .with_reingest(policy);
        let store = VariantStore::with_sqlite(config).unwrap();
        store.init().unwrap();
        store
    }

    fn rows(n: u64) -> Vec<String> {
        (0..n)
            .map(|i| exomiser_row("1", 1000 + i, "A", "0/1", ["0.01", ".", "0.05", ".", ".", ".", "."]))
            .collect()
    }

    fn scored_csv(scores: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(
            file,
            "CHROM,POS,REF,ALT,GT,QUAL,FILTER,GENE,FUNCTIONAL_CLASS,AF_AFR,AF_AMR,AF_EAS,AF_NFE,\
             VARIANT_SCORE,GENE_PHENO_SCORE,GENE_VARIANT_SCORE,GENE_COMBINED_SCORE"
        )
        .unwrap();
        for (i, score) in scores.iter().enumerate() {
            writeln!(
                file,
                "2,{},C,T,1|1,50,PASS,TTN,STOP_GAINED,.,.,.,.,{},.,.,.",
                100 + i,
                score
            )
            .unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_add_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(3));

        let task = store.add_individual("P1", true, file.path()).unwrap();
        assert_eq!(task.wait().unwrap(), 3);
        assert_eq!(store.status("P1"), IndividualStatus::Stored);

        let found = store
            .query(&VariantFilter::for_individual("P1"), GroupField::Individual)
            .unwrap();
        let records = &found["P1"];
        assert_eq!(records.iter().map(|r| r.start).collect::<Vec<_>>(), vec![1000, 1001, 1002]);
        assert_eq!(records[0].exac_af(), Some(0.05));
        assert_eq!(records[0].gene(), Some("BRCA2"));

        assert_eq!(store.remove_individual("P1").unwrap().wait().unwrap(), 3);
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);
        let found = store
            .query(&VariantFilter::for_individual("P1"), GroupField::Individual)
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_add_and_remove_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(50));
        let added = store.add_individual("P1", false, file.path()).unwrap();
        let removed = store.remove_individual("P1").unwrap();
        assert_eq!(added.wait().unwrap(), 50);
        assert_eq!(removed.wait().unwrap(), 50);
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);
        assert!(store.list_individuals().unwrap().is_empty());
    }

    #[test]
    fn test_immediate_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Reject);

        assert!(matches!(
            store.add_individual("P1", true, dir.path().join("missing.tsv")),
            Err(VariantStoreError::Ingestion { line: 0, .. })
        ));

        let mut unknown = tempfile::NamedTempFile::with_suffix(".dat").unwrap();
        writeln!(unknown, "a;b;c").unwrap();
        unknown.flush().unwrap();
        assert!(matches!(
            store.add_individual("P1", true, unknown.path()),
            Err(VariantStoreError::UnsupportedFormat(_))
        ));

        let file = exomiser_file(&rows(1));
        store.add_individual("P1", true, file.path()).unwrap().wait().unwrap();
        assert!(matches!(
            store.add_individual("P1", true, file.path()),
            Err(VariantStoreError::AlreadyStored(id)) if id == "P1"
        ));
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let first = exomiser_file(&rows(4));
        let second = exomiser_file(&rows(2));
        store.add_individual("P1", true, first.path()).unwrap().wait().unwrap();
        store.add_individual("P1", true, second.path()).unwrap().wait().unwrap();
        let found = store
            .query(&VariantFilter::for_individual("P1"), GroupField::Individual)
            .unwrap();
        assert_eq!(found["P1"].len(), 2);
    }

    #[test]
    fn test_malformed_file_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let mut rows = rows(2);
        rows.push(exomiser_row("1", 5000, "A", "0-1", ["."; 7]));
        let file = exomiser_file(&rows);

        let err = store.add_individual("P1", true, file.path()).unwrap().wait().unwrap_err();
        assert!(matches!(err, VariantStoreError::Ingestion { line: 4, .. }));
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);
        assert!(store.list_individuals().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, wait) = crossbeam_channel::bounded::<()>(0);
        let annotator = move |_: &VariantHeader, r: VariantRecord| -> Result<VariantRecord> {
            let _ = wait.recv_timeout(Duration::from_secs(5));
            Ok(r)
        };
        let store = store(&dir, ReingestPolicy::Overwrite).with_annotator(Arc::new(annotator));
        let file = exomiser_file(&rows(3));

        let task = store.add_individual("P1", true, file.path()).unwrap();
        assert_eq!(store.status("P1"), IndividualStatus::Uploading);
        assert!(store.cancel_ingestion("P1"));
        gate.send(()).unwrap();
        drop(gate);

        assert!(matches!(task.wait(), Err(VariantStoreError::Cancelled(_))));
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);
        assert!(!store.cancel_ingestion("P1"));
        assert!(store.list_individuals().unwrap().is_empty());
    }

    #[test]
    fn test_annotator_runs_before_storage() {
        let dir = tempfile::tempdir().unwrap();
        let annotator = |_: &VariantHeader, mut r: VariantRecord| -> Result<VariantRecord> {
            r.info.set(VariantInfoField::GeneEffect, "FRAMESHIFT_VARIANT");
            Ok(r)
        };
        let store = store(&dir, ReingestPolicy::Overwrite).with_annotator(Arc::new(annotator));
        let file = exomiser_file(&rows(2));
        store.add_individual("P1", true, file.path()).unwrap().wait().unwrap();
        let found = store.query(&VariantFilter::default(), GroupField::GeneEffect).unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["FRAMESHIFT_VARIANT"]);
    }

    #[test]
    fn test_top_harmful_variants() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = scored_csv(&["0.2", ".", "0.95", "0.6"]);
        store.add_individual("P2", false, file.path()).unwrap().wait().unwrap();

        let top = store.top_harmful_variants("P2", 2).unwrap();
        let scores: Vec<_> = top
            .iter()
            .map(|r| r.score(CallInfoField::ExomiserVariantScore))
            .collect();
        assert_eq!(scores, vec![Some(0.95), Some(0.6)]);
        assert_eq!(top[0].call().unwrap().genotype.to_string(), "1|1");

        let all = store.top_harmful_variants("P2", 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].score(CallInfoField::ExomiserVariantScore), None);
        assert!(store.top_harmful_variants("nobody", 3).unwrap().is_empty());
    }

    #[test]
    fn test_statuses_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let file = exomiser_file(&rows(1));
        {
            let store = store(&dir, ReingestPolicy::Overwrite);
            store.add_individual("P1", true, file.path()).unwrap().wait().unwrap();
            store.stop().unwrap();
        }
        let store = store(&dir, ReingestPolicy::Reject);
        store.init().unwrap();
        assert_eq!(store.status("P1"), IndividualStatus::Stored);
        assert_eq!(store.list_individuals().unwrap(), vec!["P1"]);
    }

    #[test]
    fn test_stopped_store_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(1));
        store.stop().unwrap();
        store.stop().unwrap();
        assert!(matches!(
            store.add_individual("P1", true, file.path()),
            Err(VariantStoreError::Stopped)
        ));
        assert!(matches!(store.remove_individual("P1"), Err(VariantStoreError::Stopped)));
        assert!(matches!(store.list_individuals(), Err(VariantStoreError::Stopped)));
        assert!(matches!(store.init(), Err(VariantStoreError::Stopped)));
    }

    #[test]
    fn test_uninitialized_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = VariantStore::with_sqlite(StoreConfig::new(dir.path())).unwrap();
        assert!(matches!(
            store.list_individuals(),
            Err(VariantStoreError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_reject_is_decided_with_registration() {
        let statuses = Statuses::default();
        let (first, _) = statuses.begin("P1", IndividualStatus::Uploading, None, true).unwrap();
        assert!(matches!(
            statuses.begin("P1", IndividualStatus::Uploading, None, true),
            Err(VariantStoreError::AlreadyStored(_))
        ));
        assert_eq!(statuses.get("P1"), IndividualStatus::Uploading);

        let (second, _) = statuses.begin("P1", IndividualStatus::Removing, None, false).unwrap();
        assert_eq!(second, first + 1);
        statuses.finish("P1", first, IndividualStatus::Stored);
        assert_eq!(statuses.get("P1"), IndividualStatus::Removing);
        statuses.finish("P1", second, IndividualStatus::Unknown);
        assert!(statuses.0.lock().is_empty());
    }

    #[test]
    fn test_unknown_ids_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(1));
        store.add_individual("P1", true, file.path()).unwrap().wait().unwrap();
        store.remove_individual("P1").unwrap().wait().unwrap();
        store.remove_individual("ghost").unwrap().wait().unwrap();
        assert!(store.statuses.0.lock().is_empty());
    }

    #[test]
    fn test_position_overflow_fails_only_its_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let bad = exomiser_file(&[exomiser_row("1", u64::MAX, "A", "0/1", ["."; 7])]);
        let err = store.add_individual("P1", true, bad.path()).unwrap().wait().unwrap_err();
        assert!(matches!(err, VariantStoreError::Ingestion { line: 2, .. }));
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);

        let good = exomiser_file(&rows(2));
        assert_eq!(store.add_individual("P1", true, good.path()).unwrap().wait().unwrap(), 2);
    }

    #[test]
    fn test_panicking_annotator_fails_only_its_task() {
        let dir = tempfile::tempdir().unwrap();
        let annotator = |_: &VariantHeader, r: VariantRecord| -> Result<VariantRecord> {
            if r.reference_name == "13" {
                panic!("no annotation for chromosome 13");
            }
            Ok(r)
        };
        let store = store(&dir, ReingestPolicy::Overwrite).with_annotator(Arc::new(annotator));
        let bad = exomiser_file(&[exomiser_row("13", 100, "A", "0/1", ["."; 7])]);
        match store.add_individual("P1", true, bad.path()).unwrap().wait() {
            Err(VariantStoreError::WorkerPanicked { id, message }) => {
                assert_eq!(id, "P1");
                assert!(message.contains("chromosome 13"));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);
        assert!(store.cached_file("P1").is_none());

        let good = exomiser_file(&rows(3));
        assert_eq!(store.add_individual("P1", true, good.path()).unwrap().wait().unwrap(), 3);
        assert_eq!(store.list_individuals().unwrap(), vec!["P1"]);
    }

    #[test]
    fn test_work_in_flight_at_stop_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, wait) = crossbeam_channel::bounded::<()>(0);
        let annotator = move |_: &VariantHeader, r: VariantRecord| -> Result<VariantRecord> {
            let _ = wait.recv_timeout(Duration::from_secs(5));
            Ok(r)
        };
        let store = store(&dir, ReingestPolicy::Overwrite).with_annotator(Arc::new(annotator));
        let file = exomiser_file(&rows(1));

        let task = store.add_individual("P1", true, file.path()).unwrap();
        store.stop().unwrap();
        gate.send(()).unwrap();
        drop(gate);

        assert!(matches!(task.wait(), Err(VariantStoreError::BackendUnavailable(_))));
        assert_eq!(store.status("P1"), IndividualStatus::Unknown);
    }

    #[test]
    fn test_distinct_individuals_ingest_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let arrived = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let annotator = {
            let arrived = Arc::clone(&arrived);
            let overlapped = Arc::clone(&overlapped);
            move |_: &VariantHeader, r: VariantRecord| -> Result<VariantRecord> {
                if r.start == 1000 {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while Instant::now() < deadline {
                        if arrived.load(Ordering::SeqCst) >= 2 {
                            overlapped.store(true, Ordering::SeqCst);
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                Ok(r)
            }
        };
        let store = store(&dir, ReingestPolicy::Overwrite).with_annotator(Arc::new(annotator));
        let first = exomiser_file(&rows(3));
        let second = exomiser_file(&rows(3));

        let p1 = store.add_individual("P1", true, first.path()).unwrap();
        let p2 = store.add_individual("P2", true, second.path()).unwrap();
        assert_eq!(p1.wait().unwrap(), 3);
        assert_eq!(p2.wait().unwrap(), 3);
        assert!(overlapped.load(Ordering::SeqCst));
        assert_eq!(store.list_individuals().unwrap(), vec!["P1", "P2"]);
    }

    #[test]
    fn test_file_cache_follows_stored_individuals() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(3));
        store.add_individual("P1", true, file.path()).unwrap().wait().unwrap();

        let cached = store.cached_file("P1").unwrap();
        assert_eq!(cached, dir.path().join("store").join("vcf").join("P1.tsv"));
        assert_eq!(
            std::fs::read_to_string(&cached).unwrap(),
            std::fs::read_to_string(file.path()).unwrap()
        );

        let mut broken = rows(1);
        broken.push(exomiser_row("1", 5000, "A", "0-1", ["."; 7]));
        let broken = exomiser_file(&broken);
        assert!(store.add_individual("P1", true, broken.path()).unwrap().wait().is_err());
        assert_eq!(std::fs::read_to_string(&cached).unwrap(), std::fs::read_to_string(file.path()).unwrap());
        let names: Vec<_> = std::fs::read_dir(dir.path().join("store").join("vcf"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["P1.tsv"]);

        assert_eq!(store.add_individual("P1", true, &cached).unwrap().wait().unwrap(), 3);
        assert_eq!(store.cached_file("P1"), Some(cached.clone()));

        store.remove_individual("P1").unwrap().wait().unwrap();
        assert!(store.cached_file("P1").is_none());
        assert!(!cached.exists());
    }

    #[test]
    fn test_invalid_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(1));
        assert!(matches!(
            store.add_individual("../P1", true, file.path()),
            Err(VariantStoreError::InvalidIndividual(_))
        ));
        assert!(matches!(
            store.remove_individual("a/b"),
            Err(VariantStoreError::InvalidIndividual(_))
        ));
        assert!(store.cached_file("../P1").is_none());
    }

    #[test]
    fn test_destroy_removes_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ReingestPolicy::Overwrite);
        let file = exomiser_file(&rows(1));
        store.add_individual("P1", true, file.path()).unwrap().wait().unwrap();
        store.destroy().unwrap();
        assert!(!dir.path().join("store").exists());
    }
}

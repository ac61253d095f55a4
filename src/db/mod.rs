//! The database: LSM coordination and the public API.
//!
//! ## Design overview
//!
//! The database organises data across three layers, queried newest
//! first:
//!
//! 1. **Active memtable** (per column family) — the in-memory sorted
//!    write buffer, backed by the shared WAL.
//! 2. **Frozen memtables** — read-only predecessors of the active
//!    memtable, awaiting flush.
//! 3. **Tables** — immutable block-based files on disk, organised into
//!    levels by the [`VersionSet`].
//!
//! Writes are WAL-first: a [`WriteBatch`] is stamped with the next
//! sequence number, appended (and optionally fsynced) to the WAL, and
//! only then applied to the target memtables.  When a memtable exceeds
//! `write_buffer_size`, the WAL is rotated, the memtable freezes, and a
//! background worker flushes it into a level-0 table whose installation
//! is one durable `VersionEdit`.
//!
//! ## Concurrency model
//!
//! All mutable state lives behind a single `RwLock`: readers take the
//! read lock to snapshot `(version, last_sequence, memtables)` and do
//! their table reads outside it; writers and the flush worker take the
//! write lock.  The open-table cache has its own mutex.  One background
//! worker drains a `crossbeam` channel of flush requests; `close`
//! drains and joins it.
//!
//! ## Recovery
//!
//! `open` replays the manifest named by `CURRENT`, then replays every
//! WAL at or above the manifest's minimum log number into fresh
//! memtables (stop-after-corruption), flushes what it recovered, writes
//! a fresh manifest snapshot, and only then deletes obsolete files.
//!
//! ## Guarantees
//!
//! - **Durability** — with `WriteOptions::sync`, a write is fsynced in
//!   the WAL before it is acknowledged.
//! - **Atomicity** — a batch is applied in full or not at all; failures
//!   before the WAL append leave no trace.
//! - **Isolation** — column families share the WAL and sequence space
//!   but have independent memtables and file trees.
//! - **Single ownership** — an advisory `LOCK` file rejects concurrent
//!   processes ([`DbError::Busy`]).

pub mod iterator;
pub mod options;

#[cfg(test)]
mod tests;

pub use iterator::DbIterator;
pub use options::{FlushOptions, Options, ReadOptions, WriteOptions};

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};
use fs2::FileExt;
use rand::RngCore;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchError, BatchRecord, WriteBatch};
use crate::checksum::{crc32c_value, mask_crc};
use crate::filenames::{self, FileKind};
use crate::keys::{COMPARATOR_NAME, SequenceNumber, ValueType};
use crate::manifest::version::{DEFAULT_CF_ID, VersionSet};
use crate::manifest::{FileMetaData, ManifestError, VersionEdit};
use crate::memtable::{Memtable, MemtableGet};
use crate::sstable::reader::TableReadOptions;
use crate::sstable::{Table, TableBuilder, TableError, TableLookup, TableOptions};
use crate::wal::{LogReader, LogWriter, RecoveryMode, WalError};

use iterator::{MergeSource, MergingIterator, VisibilityFilter};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the write-ahead log.
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Error from the manifest subsystem.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Error from a table file.
    #[error(transparent)]
    Table(#[from] TableError),

    /// Error from a write batch.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Persistent state violates the format.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller's request cannot be honored.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No database exists where one was expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another process owns the database lock.
    #[error("busy: {0}")]
    Busy(String),

    /// The database is closing or closed.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// The targeted column family no longer exists.
    #[error("column family dropped: {0}")]
    ColumnFamilyDropped(String),

    /// Internal invariant violation (poisoned lock, impossible state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Column family handles
// ------------------------------------------------------------------------------------------------

/// Caller-facing reference to a column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilyHandle {
    id: u32,
    name: String,
}

impl ColumnFamilyHandle {
    /// Stable id of the family.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Name of the family.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ------------------------------------------------------------------------------------------------
// Internal state
// ------------------------------------------------------------------------------------------------

/// Per-column-family runtime state.
struct FamilyRuntime {
    name: String,
    /// Write buffer currently accepting inserts.
    active: Memtable,
    /// Frozen memtables, oldest first, awaiting flush.
    immutable: Vec<Arc<Memtable>>,
}

impl FamilyRuntime {
    fn new(name: String) -> Self {
        Self {
            name,
            active: Memtable::new(),
            immutable: Vec::new(),
        }
    }
}

/// LRU cache of open tables, bounded by `max_open_files`.
struct TableCache {
    tables: HashMap<u64, (Arc<Table>, u64)>,
    capacity: usize,
    tick: u64,
}

impl TableCache {
    fn new(capacity: usize) -> Self {
        Self {
            tables: HashMap::new(),
            capacity: capacity.max(1),
            tick: 0,
        }
    }

    fn get(
        &mut self,
        db_path: &Path,
        file_number: u64,
        verify_checksums: bool,
    ) -> Result<Arc<Table>, DbError> {
        self.tick += 1;
        if let Some((table, last_used)) = self.tables.get_mut(&file_number) {
            *last_used = self.tick;
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(Table::open(
            filenames::table_file(db_path, file_number),
            TableReadOptions { verify_checksums },
        )?);

        if self.tables.len() >= self.capacity {
            if let Some((&oldest, _)) = self.tables.iter().min_by_key(|(_, (_, used))| *used) {
                self.tables.remove(&oldest);
            }
        }
        self.tables.insert(file_number, (Arc::clone(&table), self.tick));
        Ok(table)
    }

    fn evict(&mut self, file_number: u64) {
        self.tables.remove(&file_number);
    }
}

/// Mutable database state behind the big lock.
struct DbState {
    versions: VersionSet,
    families: HashMap<u32, FamilyRuntime>,

    /// The live WAL; `None` in read-only mode.
    wal: Option<LogWriter<File>>,
    wal_number: u64,

    /// Number of the live OPTIONS snapshot.
    options_file_number: u64,

    closed: bool,
}

enum WorkerMessage {
    Flush,
    Shutdown,
}

struct DbInner {
    path: PathBuf,
    options: Options,
    state: RwLock<DbState>,
    table_cache: Mutex<TableCache>,
    flush_tx: Sender<WorkerMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
    /// Held for the process lifetime; the advisory lock dies with it.
    _lock_file: Option<File>,
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// The database handle.  Cheap to clone; thread-safe.
pub struct Db {
    inner: Arc<DbInner>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("path", &self.inner.path).finish()
    }
}

impl Clone for Db {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Db {
    // --------------------------------------------------------------------
    // Opening
    // --------------------------------------------------------------------

    /// Opens (or creates, per [`Options::create_if_missing`]) the
    /// database at `path`.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self, DbError> {
        Self::open_internal(path.as_ref(), options, false, false)
    }

    /// Opens the database without engaging any write path.
    ///
    /// With `error_if_wal_exists`, the presence of any WAL file fails
    /// the open; otherwise WALs are replayed into read-only memtables.
    pub fn open_for_read_only(
        path: impl AsRef<Path>,
        options: Options,
        error_if_wal_exists: bool,
    ) -> Result<Self, DbError> {
        Self::open_internal(path.as_ref(), options, true, error_if_wal_exists)
    }

    fn open_internal(
        path: &Path,
        options: Options,
        read_only: bool,
        error_if_wal_exists: bool,
    ) -> Result<Self, DbError> {
        if options.comparator != COMPARATOR_NAME {
            return Err(DbError::InvalidArgument(format!(
                "unsupported comparator {:?}",
                options.comparator
            )));
        }
        if !matches!(options.format_version, 0 | 3..=6) {
            return Err(DbError::InvalidArgument(format!(
                "unsupported format version {}",
                options.format_version
            )));
        }

        let exists = VersionSet::exists(path);
        if !exists {
            if read_only {
                return Err(DbError::NotFound(format!(
                    "no database at {}",
                    path.display()
                )));
            }
            if !options.create_if_missing {
                return Err(DbError::NotFound(format!(
                    "no database at {} (create_if_missing is off)",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        } else if options.error_if_exists && !read_only {
            return Err(DbError::InvalidArgument(format!(
                "database already exists at {}",
                path.display()
            )));
        }

        // Single-process ownership.
        let lock_file = if read_only {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(filenames::lock_file(path))?;
            file.try_lock_exclusive().map_err(|_| {
                DbError::Busy(format!("database at {} is locked", path.display()))
            })?;
            Some(file)
        };

        if !read_only {
            ensure_identity(path)?;
        }

        let mut versions = if exists {
            VersionSet::recover(path)?
        } else {
            VersionSet::new(path)
        };

        let mut families: HashMap<u32, FamilyRuntime> = versions
            .families()
            .map(|f| (f.id, FamilyRuntime::new(f.name.clone())))
            .collect();

        // WAL replay: every log at or above the manifest's minimum.
        let min_log = versions.min_log_number();
        let mut wal_numbers: Vec<u64> = Vec::new();
        if exists {
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let name = entry.file_name();
                if let Some(FileKind::Log(n)) =
                    name.to_str().and_then(filenames::parse_file_name)
                {
                    if n >= min_log {
                        wal_numbers.push(n);
                    }
                }
            }
            wal_numbers.sort_unstable();
        }

        if read_only && error_if_wal_exists && !wal_numbers.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "write-ahead logs present: {wal_numbers:?}"
            )));
        }

        let mut max_sequence = versions.last_sequence;
        for &number in &wal_numbers {
            replay_wal(path, number, &mut families, &mut max_sequence)?;
        }
        versions.last_sequence = max_sequence;

        if read_only {
            let state = DbState {
                versions,
                families,
                wal: None,
                wal_number: 0,
                options_file_number: 0,
                closed: false,
            };
            return Ok(Self::assemble(path, options, state, None));
        }

        // Fresh WAL, fresh manifest snapshot, fresh OPTIONS file.
        let wal_number = versions.allocate_file_number();
        let wal_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(filenames::log_file(path, wal_number))?;
        let wal = LogWriter::new(wal_file);

        // Allocate the OPTIONS number first so the manifest snapshot's
        // next_file_number accounts for it.
        let options_file_number = versions.allocate_file_number();
        versions.create_manifest()?;
        write_options_snapshot(path, options_file_number, &options)?;

        let state = DbState {
            versions,
            families,
            wal: Some(wal),
            wal_number,
            options_file_number,
            closed: false,
        };
        let db = Self::assemble(path, options, state, lock_file);

        // Materialize whatever the WALs held, then drop the old files:
        // the new manifest still names the old log numbers until this
        // flush installs, so a crash here re-replays instead of losing.
        {
            let mut state = db.write_state()?;
            for family in state.families.values_mut() {
                if !family.active.is_empty() {
                    let frozen = std::mem::replace(&mut family.active, Memtable::new());
                    family.immutable.push(Arc::new(frozen));
                }
            }
            Self::flush_immutable(&db.inner, &mut state)?;
        }

        info!(path = %db.inner.path.display(), "database opened");
        Ok(db)
    }

    fn assemble(
        path: &Path,
        options: Options,
        state: DbState,
        lock_file: Option<File>,
    ) -> Self {
        let (flush_tx, flush_rx) = unbounded();
        let read_only = state.wal.is_none();
        let cache_capacity = options.max_open_files;

        let inner = Arc::new(DbInner {
            path: path.to_path_buf(),
            options,
            state: RwLock::new(state),
            table_cache: Mutex::new(TableCache::new(cache_capacity)),
            flush_tx,
            worker: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            _lock_file: lock_file,
        });

        if !read_only {
            let weak = Arc::downgrade(&inner);
            let handle = std::thread::Builder::new()
                .name("quarrydb-flush".into())
                .spawn(move || flush_worker_loop(weak, flush_rx))
                .expect("spawn flush worker");
            *inner.worker.lock().expect("fresh mutex") = Some(handle);
        }

        Self { inner }
    }

    // --------------------------------------------------------------------
    // Lock plumbing
    // --------------------------------------------------------------------

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, DbState>, DbError> {
        self.inner
            .state
            .read()
            .map_err(|_| DbError::Internal("state lock poisoned".into()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, DbState>, DbError> {
        self.inner
            .state
            .write()
            .map_err(|_| DbError::Internal("state lock poisoned".into()))
    }

    /// Handle for the always-present default column family.
    pub fn default_cf(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle {
            id: DEFAULT_CF_ID,
            name: crate::manifest::version::DEFAULT_CF_NAME.to_string(),
        }
    }

    // --------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------

    /// Inserts `key → value` into the default column family.
    pub fn put(&self, wo: &WriteOptions, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(wo, batch)
    }

    /// Inserts `key → value` into `cf`.
    pub fn put_cf(
        &self,
        wo: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), DbError> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf.id, key, value);
        self.write(wo, batch)
    }

    /// Deletes `key` from the default column family.
    pub fn delete(&self, wo: &WriteOptions, key: &[u8]) -> Result<(), DbError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(wo, batch)
    }

    /// Deletes `key` from `cf`.
    pub fn delete_cf(
        &self,
        wo: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<(), DbError> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf.id, key);
        self.write(wo, batch)
    }

    /// Applies a batch atomically: WAL first, then the memtables.
    pub fn write(&self, wo: &WriteOptions, mut batch: WriteBatch) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.write_state()?;
        if state.closed {
            return Err(DbError::ShutdownInProgress);
        }

        // Validate every record (and its target family) before the WAL
        // append so a failure leaves neither log nor memtable touched.
        for record in batch.iter() {
            let record = record?;
            if !state.families.contains_key(&record.cf_id()) {
                return Err(DbError::ColumnFamilyDropped(format!(
                    "column family {}",
                    record.cf_id()
                )));
            }
        }

        let sequence = state.versions.last_sequence + 1;
        batch.set_sequence(sequence);
        let count = u64::from(batch.count());

        let wal = state
            .wal
            .as_mut()
            .ok_or_else(|| DbError::InvalidArgument("database is read-only".into()))?;
        wal.add_record(batch.as_bytes())?;
        wal.flush()?;
        if wo.sync {
            wal.get_ref().sync_all()?;
        }

        apply_batch_to_memtables(&mut state, &batch)?;
        state.versions.last_sequence = sequence + count - 1;

        let budget = self.inner.options.write_buffer_size;
        if state
            .families
            .values()
            .any(|f| f.active.approximate_size() >= budget)
        {
            Self::switch_memtables(&self.inner, &mut state)?;
            let _ = self.inner.flush_tx.send(WorkerMessage::Flush);
        }
        Ok(())
    }

    // --------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------

    /// Point lookup in the default column family.
    pub fn get(&self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.get_cf(ro, &self.default_cf(), key)
    }

    /// Point lookup in `cf`.  `Ok(None)` means not found or deleted.
    pub fn get_cf(
        &self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, DbError> {
        let state = self.read_state()?;
        if state.closed {
            return Err(DbError::ShutdownInProgress);
        }
        let family = state.families.get(&cf.id).ok_or_else(|| {
            DbError::ColumnFamilyDropped(format!("column family {:?}", cf.name))
        })?;
        let snapshot = ro.snapshot.unwrap_or(state.versions.last_sequence);

        // 1. Active memtable.
        match family.active.get(key, snapshot) {
            MemtableGet::Value(v) => return Ok(Some(v)),
            MemtableGet::Deleted => return Ok(None),
            MemtableGet::NotFound => {}
        }

        // 2. Frozen memtables, newest first.
        for memtable in family.immutable.iter().rev() {
            match memtable.get(key, snapshot) {
                MemtableGet::Value(v) => return Ok(Some(v)),
                MemtableGet::Deleted => return Ok(None),
                MemtableGet::NotFound => {}
            }
        }

        // 3. Tables: L0 newest-first, then one candidate per level.
        let version = &state
            .versions
            .family(cf.id)
            .ok_or_else(|| {
                DbError::ColumnFamilyDropped(format!("column family {:?}", cf.name))
            })?
            .version;
        // The read lock is held across the table reads so no concurrent
        // install can delete a file the candidate list references.
        for (_, meta) in version.candidate_files(key) {
            let table = self.open_table(meta.file_number)?;
            match table.get(key, snapshot)? {
                TableLookup::Value(v) => return Ok(Some(v)),
                TableLookup::Deletion => return Ok(None),
                TableLookup::None => {}
            }
        }
        Ok(None)
    }

    /// Snapshot iterator over the default column family.
    pub fn new_iterator(&self, ro: &ReadOptions) -> Result<DbIterator, DbError> {
        self.new_iterator_cf(ro, &self.default_cf())
    }

    /// Snapshot iterator over `cf`, merging memtables and tables with
    /// sequence-number visibility applied.
    pub fn new_iterator_cf(
        &self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
    ) -> Result<DbIterator, DbError> {
        let state = self.read_state()?;
        if state.closed {
            return Err(DbError::ShutdownInProgress);
        }
        let family = state.families.get(&cf.id).ok_or_else(|| {
            DbError::ColumnFamilyDropped(format!("column family {:?}", cf.name))
        })?;
        let snapshot = ro.snapshot.unwrap_or(state.versions.last_sequence);

        // Sources newest first: active, frozen (newest first), L0
        // newest first, then deeper levels.
        let mut sources: Vec<MergeSource> = Vec::new();
        let collect_mem = |m: &Memtable| -> Vec<(Vec<u8>, Vec<u8>)> {
            m.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect()
        };
        sources.push(Box::new(collect_mem(&family.active).into_iter()));
        for memtable in family.immutable.iter().rev() {
            sources.push(Box::new(collect_mem(memtable).into_iter()));
        }

        let version = &state
            .versions
            .family(cf.id)
            .ok_or_else(|| {
                DbError::ColumnFamilyDropped(format!("column family {:?}", cf.name))
            })?
            .version;
        for (_, meta) in version.all_files() {
            let table = self.open_table(meta.file_number)?;
            sources.push(Box::new(table_entries(&table)?.into_iter()));
        }

        let merged = MergingIterator::new(sources);
        let visible: Vec<(Vec<u8>, Vec<u8>)> =
            VisibilityFilter::new(merged, snapshot).collect();
        Ok(DbIterator::new(visible))
    }

    fn open_table(&self, file_number: u64) -> Result<Arc<Table>, DbError> {
        self.inner
            .table_cache
            .lock()
            .map_err(|_| DbError::Internal("table cache lock poisoned".into()))?
            .get(
                &self.inner.path,
                file_number,
                self.inner.options.verify_checksums,
            )
    }

    // --------------------------------------------------------------------
    // Column families
    // --------------------------------------------------------------------

    /// Creates a new column family and returns its handle.
    pub fn create_column_family(&self, name: &str) -> Result<ColumnFamilyHandle, DbError> {
        let mut state = self.write_state()?;
        if state.closed {
            return Err(DbError::ShutdownInProgress);
        }
        if state.wal.is_none() {
            return Err(DbError::InvalidArgument("database is read-only".into()));
        }
        if state.families.values().any(|f| f.name == name) {
            return Err(DbError::InvalidArgument(format!(
                "column family {name:?} already exists"
            )));
        }

        let id = state.versions.max_column_family + 1;
        let edit = VersionEdit {
            column_family: Some(id),
            column_family_add: Some(name.to_string()),
            max_column_family: Some(id),
            ..VersionEdit::default()
        };
        state.versions.log_and_apply(&edit)?;
        state
            .families
            .insert(id, FamilyRuntime::new(name.to_string()));

        info!(name, id, "column family created");
        Ok(ColumnFamilyHandle {
            id,
            name: name.to_string(),
        })
    }

    /// Drops a column family; its files become obsolete.
    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<(), DbError> {
        if cf.id == DEFAULT_CF_ID {
            return Err(DbError::InvalidArgument(
                "the default column family cannot be dropped".into(),
            ));
        }
        let mut state = self.write_state()?;
        if state.closed {
            return Err(DbError::ShutdownInProgress);
        }
        if !state.families.contains_key(&cf.id) {
            return Err(DbError::ColumnFamilyDropped(format!(
                "column family {:?}",
                cf.name
            )));
        }

        let edit = VersionEdit {
            column_family: Some(cf.id),
            column_family_drop: true,
            ..VersionEdit::default()
        };
        state.versions.log_and_apply(&edit)?;
        state.families.remove(&cf.id);
        remove_obsolete_files(&self.inner, &mut state);

        info!(name = %cf.name, id = cf.id, "column family dropped");
        Ok(())
    }

    /// Resolves a column family handle by name.
    pub fn cf_handle(&self, name: &str) -> Result<Option<ColumnFamilyHandle>, DbError> {
        let state = self.read_state()?;
        Ok(state
            .versions
            .family_by_name(name)
            .map(|f| ColumnFamilyHandle {
                id: f.id,
                name: f.name.clone(),
            }))
    }

    /// Lists the column families of a database without opening it.
    pub fn list_column_families(path: impl AsRef<Path>) -> Result<Vec<String>, DbError> {
        let set = VersionSet::recover(path.as_ref())?;
        Ok(set.families().map(|f| f.name.clone()).collect())
    }

    // --------------------------------------------------------------------
    // Flush & close
    // --------------------------------------------------------------------

    /// Freezes the active memtables and flushes them to level-0 tables.
    pub fn flush(&self, fo: &FlushOptions) -> Result<(), DbError> {
        let mut state = self.write_state()?;
        if state.closed {
            return Err(DbError::ShutdownInProgress);
        }
        if state.wal.is_none() {
            return Err(DbError::InvalidArgument("database is read-only".into()));
        }

        Self::switch_memtables(&self.inner, &mut state)?;
        if fo.wait {
            Self::flush_immutable(&self.inner, &mut state)?;
        } else {
            let _ = self.inner.flush_tx.send(WorkerMessage::Flush);
        }
        Ok(())
    }

    /// Gracefully shuts the database down: flushes everything, stops
    /// the background worker, and fsyncs the directory.
    pub fn close(&self) -> Result<(), DbError> {
        {
            let mut state = self.write_state()?;
            if state.closed {
                return Ok(());
            }
            if state.wal.is_some() {
                Self::switch_memtables(&self.inner, &mut state)?;
                Self::flush_immutable(&self.inner, &mut state)?;
                if let Some(wal) = state.wal.as_mut() {
                    wal.flush()?;
                    wal.get_ref().sync_all()?;
                }
            }
            state.closed = true;
        }

        self.inner.shutdown.store(true, AtomicOrdering::SeqCst);
        let _ = self.inner.flush_tx.send(WorkerMessage::Shutdown);
        if let Ok(mut worker) = self.inner.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }

        File::open(&self.inner.path)?.sync_all()?;
        info!(path = %self.inner.path.display(), "database closed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Flush internals
    // --------------------------------------------------------------------

    /// Rotates the WAL and freezes every non-empty active memtable.
    ///
    /// Returns true when something was frozen.
    fn switch_memtables(inner: &DbInner, state: &mut DbState) -> Result<bool, DbError> {
        if state.families.values().all(|f| f.active.is_empty()) {
            return Ok(false);
        }

        let new_wal_number = state.versions.allocate_file_number();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(filenames::log_file(&inner.path, new_wal_number))?;

        if let Some(old) = state.wal.as_mut() {
            old.flush()?;
            old.get_ref().sync_all()?;
        }
        state.wal = Some(LogWriter::new(file));
        state.wal_number = new_wal_number;

        for family in state.families.values_mut() {
            if !family.active.is_empty() {
                let frozen = std::mem::replace(&mut family.active, Memtable::new());
                family.immutable.push(Arc::new(frozen));
            }
        }
        debug!(wal = new_wal_number, "memtables frozen, WAL rotated");
        Ok(true)
    }

    /// Flushes every frozen memtable (oldest first, per family) into a
    /// level-0 table, installing one `VersionEdit` per table, then
    /// removes files nothing references anymore.
    fn flush_immutable(inner: &DbInner, state: &mut DbState) -> Result<(), DbError> {
        let cf_ids: Vec<u32> = state.families.keys().copied().collect();

        for cf_id in cf_ids {
            loop {
                let Some(memtable) = state
                    .families
                    .get(&cf_id)
                    .and_then(|f| f.immutable.first().cloned())
                else {
                    break;
                };

                let file_number = state.versions.allocate_file_number();
                let path = filenames::table_file(&inner.path, file_number);

                let table_options = TableOptions {
                    block_size: inner.options.block_size,
                    restart_interval: inner.options.restart_interval,
                    format_version: inner.options.format_version,
                    compression: inner.options.compression,
                    checksum: inner.options.checksum,
                    filter_bits_per_key: inner.options.filter_bits_per_key,
                    column_family_id: cf_id,
                    base_context_checksum: if inner.options.format_version >= 6 {
                        mask_crc(crc32c_value(&file_number.to_le_bytes()))
                    } else {
                        0
                    },
                };
                let mut builder = TableBuilder::create(&path, table_options)?;
                for (key, value) in memtable.iter() {
                    builder.add(key, value)?;
                }
                let file_size = builder.finish()?;

                let (smallest, largest, smallest_seqno, largest_seqno) = memtable
                    .key_bounds()
                    .ok_or_else(|| DbError::Internal("flushed an empty memtable".into()))?;

                let edit = VersionEdit {
                    column_family: (cf_id != DEFAULT_CF_ID).then_some(cf_id),
                    log_number: Some(state.wal_number),
                    next_file_number: Some(state.versions.next_file_number),
                    last_sequence: Some(state.versions.last_sequence),
                    new_files: vec![(
                        0,
                        FileMetaData {
                            file_number,
                            file_size,
                            smallest,
                            largest,
                            smallest_seqno,
                            largest_seqno,
                        },
                    )],
                    ..VersionEdit::default()
                };
                state.versions.log_and_apply(&edit)?;

                let family = state
                    .families
                    .get_mut(&cf_id)
                    .ok_or_else(|| DbError::Internal("family vanished during flush".into()))?;
                family.immutable.remove(0);

                info!(
                    cf = cf_id,
                    file = file_number,
                    entries = memtable.len(),
                    size = file_size,
                    "memtable flushed to level 0"
                );
            }

            // Families with nothing to flush still advance their log
            // number so drained WALs can be reclaimed.
            let logged = state
                .versions
                .family(cf_id)
                .map(|f| f.log_number)
                .unwrap_or(0);
            if logged < state.wal_number {
                let edit = VersionEdit {
                    column_family: (cf_id != DEFAULT_CF_ID).then_some(cf_id),
                    log_number: Some(state.wal_number),
                    ..VersionEdit::default()
                };
                state.versions.log_and_apply(&edit)?;
            }
        }

        remove_obsolete_files(inner, state);
        Ok(())
    }
}

impl Drop for DbInner {
    fn drop(&mut self) {
        // Last handle gone: ask the worker to stop; joining is close()'s
        // job, but the channel disconnect alone unblocks the thread.
        self.shutdown.store(true, AtomicOrdering::SeqCst);
        let _ = self.flush_tx.send(WorkerMessage::Shutdown);
    }
}

// ------------------------------------------------------------------------------------------------
// Background worker
// ------------------------------------------------------------------------------------------------

fn flush_worker_loop(inner: Weak<DbInner>, rx: Receiver<WorkerMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Shutdown => break,
            WorkerMessage::Flush => {
                let Some(inner) = inner.upgrade() else { break };
                if inner.shutdown.load(AtomicOrdering::SeqCst) {
                    break;
                }
                let Ok(mut state) = inner.state.write() else { break };
                if state.closed {
                    continue;
                }
                if let Err(e) = Db::flush_immutable(&inner, &mut state) {
                    error!(error = %e, "background flush failed");
                }
            }
        }
    }
    debug!("flush worker stopped");
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Applies every record of a validated batch to its family's memtable.
fn apply_batch_to_memtables(state: &mut DbState, batch: &WriteBatch) -> Result<(), DbError> {
    let base = batch.sequence();
    for (i, record) in batch.iter().enumerate() {
        let record = record?;
        let sequence = base + i as u64;
        let family = state.families.get_mut(&record.cf_id()).ok_or_else(|| {
            DbError::ColumnFamilyDropped(format!("column family {}", record.cf_id()))
        })?;
        match record {
            BatchRecord::Put { key, value, .. } => {
                family.active.add(sequence, ValueType::Value, key, value);
            }
            BatchRecord::Delete { key, .. } => {
                family.active.add(sequence, ValueType::Deletion, key, b"");
            }
            BatchRecord::SingleDelete { key, .. } => {
                family
                    .active
                    .add(sequence, ValueType::SingleDeletion, key, b"");
            }
            BatchRecord::Merge { key, value, .. } => {
                family.active.add(sequence, ValueType::Merge, key, value);
            }
        }
    }
    Ok(())
}

/// Replays one WAL into the runtime memtables.
///
/// Corruption after at least one clean record ends the replay silently
/// (stop-after-corruption); corruption before any record fails the
/// open.
fn replay_wal(
    path: &Path,
    number: u64,
    families: &mut HashMap<u32, FamilyRuntime>,
    max_sequence: &mut SequenceNumber,
) -> Result<(), DbError> {
    let file = File::open(filenames::log_file(path, number))?;
    let mut reader = LogReader::new(
        BufReader::new(file),
        RecoveryMode::TolerateCorruptedTail,
        None,
    );

    let mut records = 0u64;
    while let Some(record) = reader.read_record()? {
        let batch = WriteBatch::from_bytes(record)?;
        let base = batch.sequence();
        for (i, batch_record) in batch.iter().enumerate() {
            let batch_record = batch_record?;
            let sequence = base + i as u64;
            let Some(family) = families.get_mut(&batch_record.cf_id()) else {
                // The family was dropped after this record was logged.
                warn!(
                    cf = batch_record.cf_id(),
                    wal = number,
                    "skipping record for dropped column family"
                );
                continue;
            };
            match batch_record {
                BatchRecord::Put { key, value, .. } => {
                    family.active.add(sequence, ValueType::Value, key, value);
                }
                BatchRecord::Delete { key, .. } => {
                    family.active.add(sequence, ValueType::Deletion, key, b"");
                }
                BatchRecord::SingleDelete { key, .. } => {
                    family
                        .active
                        .add(sequence, ValueType::SingleDeletion, key, b"");
                }
                BatchRecord::Merge { key, value, .. } => {
                    family.active.add(sequence, ValueType::Merge, key, value);
                }
            }
        }
        *max_sequence = (*max_sequence).max(batch.end_sequence().saturating_sub(1));
        records += 1;
    }

    info!(wal = number, records, "write-ahead log replayed");
    Ok(())
}

/// Collects a table's entries for the merging iterator.
fn table_entries(table: &Table) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
    let mut iter = table.iter();
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.take_status()?;
    Ok(out)
}

/// Deletes files no live version references: drained WALs, replaced
/// manifests, orphaned tables, leftover temp files.
fn remove_obsolete_files(inner: &DbInner, state: &mut DbState) {
    let live = state.versions.live_files();
    let min_log = state.versions.min_log_number();
    let manifest = state.versions.manifest_number();

    let entries = match fs::read_dir(&inner.path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "cannot scan database directory for cleanup");
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(kind) = name.to_str().and_then(filenames::parse_file_name) else {
            continue;
        };
        let delete = match kind {
            FileKind::Log(n) => n < min_log && n != state.wal_number,
            FileKind::Table(n) => {
                let obsolete = !live.contains(&n);
                if obsolete {
                    if let Ok(mut cache) = inner.table_cache.lock() {
                        cache.evict(n);
                    }
                }
                obsolete
            }
            FileKind::Manifest(n) => n != manifest,
            FileKind::Options(n) => n != state.options_file_number,
            FileKind::Temp => true,
            _ => false,
        };
        if delete {
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => debug!(file = %path.display(), "obsolete file removed"),
                Err(e) => warn!(file = %path.display(), error = %e, "cannot remove obsolete file"),
            }
        }
    }
}

/// Writes the `IDENTITY` file on first open.
fn ensure_identity(path: &Path) -> Result<(), DbError> {
    let identity_path = filenames::identity_file(path);
    if identity_path.exists() {
        return Ok(());
    }
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let id = format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        u32::from_be_bytes(bytes[0..4].try_into().expect("4 bytes")),
        u16::from_be_bytes(bytes[4..6].try_into().expect("2 bytes")),
        u16::from_be_bytes(bytes[6..8].try_into().expect("2 bytes")),
        u16::from_be_bytes(bytes[8..10].try_into().expect("2 bytes")),
        u64::from_be_bytes([
            0, 0, bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
        ]),
    );
    let mut file = File::create(&identity_path)?;
    file.write_all(id.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Renders the live options into `OPTIONS-<N>`.
fn write_options_snapshot(path: &Path, number: u64, options: &Options) -> Result<(), DbError> {
    let mut out = String::new();
    out.push_str("[Version]\n  format=1\n\n[DBOptions]\n");
    out.push_str(&format!("  create_if_missing={}\n", options.create_if_missing));
    out.push_str(&format!("  error_if_exists={}\n", options.error_if_exists));
    out.push_str(&format!("  max_open_files={}\n", options.max_open_files));
    out.push_str("\n[CFOptions \"default\"]\n");
    out.push_str(&format!("  write_buffer_size={}\n", options.write_buffer_size));
    out.push_str(&format!("  block_size={}\n", options.block_size));
    out.push_str(&format!("  format_version={}\n", options.format_version));
    out.push_str(&format!("  compression={}\n", options.compression.name()));
    out.push_str(&format!(
        "  filter_bits_per_key={}\n",
        options.filter_bits_per_key
    ));
    out.push_str(&format!("  comparator={}\n", options.comparator));

    let mut file = File::create(filenames::options_file(path, number))?;
    file.write_all(out.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

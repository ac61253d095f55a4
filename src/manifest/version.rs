//! Versions and the version set: the in-memory LSM state.
//!
//! A [`Version`] is one column family's immutable view of the tree: per
//! level, an ordered list of table-file metadata.  Level 0 files may
//! overlap and are searched newest-first; levels 1+ hold disjoint
//! user-key ranges sorted ascending, so a point lookup touches at most
//! one file per level.
//!
//! The [`VersionSet`] owns every column family's current version plus
//! the global counters (`next_file_number`, `last_sequence`,
//! `max_column_family`), persists transitions by appending
//! [`VersionEdit`] records to the live `MANIFEST-<N>`, and reconstructs
//! everything on open by replaying the manifest named in `CURRENT`.
//!
//! # Durability protocol
//!
//! 1. A new manifest is written as a full snapshot (one edit per column
//!    family) and fsynced.
//! 2. `CURRENT` is updated by writing a temp file, fsyncing it, and
//!    renaming over `CURRENT`, then fsyncing the directory — the switch
//!    is atomic.
//! 3. Subsequent edits append to the live manifest and fsync before the
//!    in-memory state changes.
//!
//! Atomic groups commit all-or-nothing on replay: edits tagged
//! `InAtomicGroup` are buffered and applied only once the edit with
//! `remaining = 0` has parsed cleanly; an unfinished group at the log
//! tail is discarded.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::filenames::{current_file, manifest_file};
use crate::keys::{COMPARATOR_NAME, compare_internal, extract_user_key};
use crate::wal::{LogReader, LogWriter, RecoveryMode};

use super::{FileMetaData, ManifestError, VersionEdit};

/// Number of LSM levels.
pub const NUM_LEVELS: usize = 7;

/// Id of the default column family.
pub const DEFAULT_CF_ID: u32 = 0;

/// Name of the default column family.
pub const DEFAULT_CF_NAME: &str = "default";

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// One column family's file layout, immutable once installed.
#[derive(Debug, Clone, Default)]
pub struct Version {
    /// Per-level file lists.  L0 is sorted newest-first (by largest
    /// sequence number); L1+ ascending by smallest key.
    files: Vec<Vec<FileMetaData>>,
}

impl Version {
    /// An empty version.
    pub fn new() -> Self {
        Self {
            files: vec![Vec::new(); NUM_LEVELS],
        }
    }

    /// Files of one level, in search order.
    pub fn level_files(&self, level: usize) -> &[FileMetaData] {
        &self.files[level]
    }

    /// Total number of table files.
    pub fn file_count(&self) -> usize {
        self.files.iter().map(Vec::len).sum()
    }

    /// All files, shallowest level first.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &FileMetaData)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    fn add_file(&mut self, level: u32, meta: FileMetaData) -> Result<(), ManifestError> {
        let level = level as usize;
        if level >= NUM_LEVELS {
            return Err(ManifestError::Corruption(format!(
                "file {} targets level {level}, max is {}",
                meta.file_number,
                NUM_LEVELS - 1
            )));
        }
        // Boundary keys must be internal keys (at least a trailer).
        if meta.smallest.len() < crate::keys::TRAILER_SIZE
            || meta.largest.len() < crate::keys::TRAILER_SIZE
        {
            return Err(ManifestError::Corruption(format!(
                "file {} has truncated boundary keys",
                meta.file_number
            )));
        }
        self.files[level].push(meta);
        Ok(())
    }

    fn remove_file(&mut self, level: u32, file_number: u64) -> Result<(), ManifestError> {
        let level = level as usize;
        if level >= NUM_LEVELS {
            return Err(ManifestError::Corruption(format!(
                "deleted file {file_number} names level {level}"
            )));
        }
        let before = self.files[level].len();
        self.files[level].retain(|f| f.file_number != file_number);
        if self.files[level].len() == before {
            return Err(ManifestError::Corruption(format!(
                "deleted file {file_number} not present on level {level}"
            )));
        }
        Ok(())
    }

    /// Restores the per-level orderings after a batch of mutations.
    fn finalize(&mut self) {
        // L0: newest first.
        self.files[0].sort_by(|a, b| {
            b.largest_seqno
                .cmp(&a.largest_seqno)
                .then(b.file_number.cmp(&a.file_number))
        });
        // L1+: ascending, disjoint ranges.
        for level in 1..NUM_LEVELS {
            self.files[level].sort_by(|a, b| compare_internal(&a.smallest, &b.smallest));
        }
    }

    /// Verifies the L1+ disjointness invariant.
    pub fn check_invariants(&self) -> Result<(), ManifestError> {
        for level in 1..NUM_LEVELS {
            for pair in self.files[level].windows(2) {
                let prev_largest = extract_user_key(&pair[0].largest);
                let next_smallest = extract_user_key(&pair[1].smallest);
                if prev_largest >= next_smallest {
                    return Err(ManifestError::Corruption(format!(
                        "level {level} files {} and {} overlap",
                        pair[0].file_number, pair[1].file_number
                    )));
                }
            }
        }
        Ok(())
    }

    /// Files that may contain `user_key`, in the order a lookup must
    /// consult them: L0 newest-first, then one candidate per level.
    pub fn candidate_files(&self, user_key: &[u8]) -> Vec<(usize, &FileMetaData)> {
        let mut out = Vec::new();

        for meta in &self.files[0] {
            if file_may_contain(meta, user_key) {
                out.push((0, meta));
            }
        }

        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            // First file whose largest user key is >= user_key.
            let idx = files
                .partition_point(|f| extract_user_key(&f.largest) < user_key);
            if idx < files.len() && file_may_contain(&files[idx], user_key) {
                out.push((level, &files[idx]));
            }
        }
        out
    }
}

fn file_may_contain(meta: &FileMetaData, user_key: &[u8]) -> bool {
    extract_user_key(&meta.smallest) <= user_key && user_key <= extract_user_key(&meta.largest)
}

// ------------------------------------------------------------------------------------------------
// Column families
// ------------------------------------------------------------------------------------------------

/// One column family's durable identity and current version.
#[derive(Debug, Clone)]
pub struct ColumnFamily {
    /// Stable id; 0 is the default family.
    pub id: u32,

    /// User-visible name.
    pub name: String,

    /// Current file layout.
    pub version: Version,

    /// WAL number below which this family's data is all in tables.
    pub log_number: u64,
}

// ------------------------------------------------------------------------------------------------
// VersionSet
// ------------------------------------------------------------------------------------------------

/// The authoritative, durable LSM state: all column families plus the
/// global counters, backed by the live MANIFEST.
pub struct VersionSet {
    db_path: PathBuf,

    /// Next table/WAL/manifest file number to allocate.
    pub next_file_number: u64,

    /// Highest sequence number made durable.
    pub last_sequence: u64,

    /// Legacy two-log recovery pointer; zero in streams we write.
    pub prev_log_number: u64,

    /// Highest column-family id ever allocated (ids are never reused).
    pub max_column_family: u32,

    /// Number of the live manifest file.
    manifest_number: u64,

    /// Appender for the live manifest; absent in read-only mode.
    writer: Option<LogWriter<File>>,

    /// Column families by id.
    families: BTreeMap<u32, ColumnFamily>,
}

impl VersionSet {
    /// Creates the in-memory state for a brand-new database: a default
    /// column family and fresh counters.  Nothing is written until
    /// [`create_manifest`](Self::create_manifest).
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        let mut families = BTreeMap::new();
        families.insert(
            DEFAULT_CF_ID,
            ColumnFamily {
                id: DEFAULT_CF_ID,
                name: DEFAULT_CF_NAME.to_string(),
                version: Version::new(),
                log_number: 0,
            },
        );
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            next_file_number: 1,
            last_sequence: 0,
            prev_log_number: 0,
            max_column_family: 0,
            manifest_number: 0,
            writer: None,
            families,
        }
    }

    /// True when `CURRENT` exists, i.e. a database lives at `db_path`.
    pub fn exists(db_path: &Path) -> bool {
        current_file(db_path).is_file()
    }

    /// Reconstructs the version set by replaying the manifest named in
    /// `CURRENT`.  Does not open a manifest writer; call
    /// [`create_manifest`](Self::create_manifest) to resume writing.
    pub fn recover(db_path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let db_path = db_path.as_ref();

        let current = read_current(db_path)?;
        let manifest_path = db_path.join(&current);
        let manifest_number = current
            .strip_prefix("MANIFEST-")
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| {
                ManifestError::Corruption(format!("CURRENT names invalid file {current:?}"))
            })?;

        let file = File::open(&manifest_path)?;
        let mut reader = LogReader::new(
            BufReader::new(file),
            RecoveryMode::TolerateCorruptedTail,
            None,
        );

        // The default family (id 0) is implicit; the snapshot re-creates
        // every other family through ColumnFamilyAdd edits.
        let mut set = Self::new(db_path);
        set.manifest_number = manifest_number;

        // Atomic-group buffering: edits are applied only when the group
        // closes cleanly.
        let mut pending_group: Vec<VersionEdit> = Vec::new();
        let mut expected_remaining: Option<u32> = None;
        let mut applied = 0usize;

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;

            match edit.atomic_group_remaining {
                Some(remaining) => {
                    if let Some(expected) = expected_remaining {
                        if remaining != expected {
                            return Err(ManifestError::Corruption(format!(
                                "atomic group counter {remaining}, expected {expected}"
                            )));
                        }
                    }
                    expected_remaining = remaining.checked_sub(1);
                    pending_group.push(edit);
                    if remaining == 0 {
                        for edit in pending_group.drain(..) {
                            set.apply(&edit)?;
                            applied += 1;
                        }
                        expected_remaining = None;
                    }
                }
                None => {
                    if !pending_group.is_empty() {
                        return Err(ManifestError::Corruption(
                            "plain edit inside an open atomic group".into(),
                        ));
                    }
                    set.apply(&edit)?;
                    applied += 1;
                }
            }
        }

        if !pending_group.is_empty() {
            // The tail of an atomic group never made it to disk: the
            // whole group is discarded.
            warn!(
                edits = pending_group.len(),
                "discarding unfinished atomic group at manifest tail"
            );
        }

        if set.families.is_empty() {
            return Err(ManifestError::Corruption(
                "manifest replay produced no column families".into(),
            ));
        }

        info!(
            manifest = %manifest_path.display(),
            edits = applied,
            families = set.families.len(),
            next_file_number = set.next_file_number,
            last_sequence = set.last_sequence,
            "manifest recovered"
        );
        Ok(set)
    }

    // --------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------

    /// Column families by id, ascending.
    pub fn families(&self) -> impl Iterator<Item = &ColumnFamily> {
        self.families.values()
    }

    /// Looks up a family by id.
    pub fn family(&self, id: u32) -> Option<&ColumnFamily> {
        self.families.get(&id)
    }

    /// Looks up a family by name.
    pub fn family_by_name(&self, name: &str) -> Option<&ColumnFamily> {
        self.families.values().find(|f| f.name == name)
    }

    /// Number of the live manifest file.
    pub fn manifest_number(&self) -> u64 {
        self.manifest_number
    }

    /// Smallest WAL number still needed by any column family.
    pub fn min_log_number(&self) -> u64 {
        self.families
            .values()
            .map(|f| f.log_number)
            .min()
            .unwrap_or(0)
    }

    /// File numbers referenced by any live version (tables plus the
    /// live manifest).
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live = HashSet::new();
        live.insert(self.manifest_number);
        for family in self.families.values() {
            for (_, meta) in family.version.all_files() {
                live.insert(meta.file_number);
            }
        }
        live
    }

    /// Allocates the next globally-unique file number.
    pub fn allocate_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    // --------------------------------------------------------------------
    // Manifest writing
    // --------------------------------------------------------------------

    /// Writes a full snapshot into a fresh `MANIFEST-<N>` and atomically
    /// points `CURRENT` at it.  Subsequent edits append to this file.
    pub fn create_manifest(&mut self) -> Result<(), ManifestError> {
        let number = self.allocate_file_number();
        let path = manifest_file(&self.db_path, number);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = LogWriter::new(file);

        // Snapshot: the default family's edit carries the counters.
        for family in self.families.values() {
            if family.id != DEFAULT_CF_ID {
                let create = VersionEdit {
                    column_family: Some(family.id),
                    column_family_add: Some(family.name.clone()),
                    comparator: Some(COMPARATOR_NAME.to_string()),
                    ..VersionEdit::default()
                };
                writer.add_record(&create.encode())?;
            }

            let mut edit = VersionEdit {
                comparator: Some(COMPARATOR_NAME.to_string()),
                log_number: Some(family.log_number),
                ..VersionEdit::default()
            };
            if family.id != DEFAULT_CF_ID {
                edit.column_family = Some(family.id);
            } else {
                edit.next_file_number = Some(self.next_file_number);
                edit.last_sequence = Some(self.last_sequence);
                edit.max_column_family = Some(self.max_column_family);
            }
            for (level, meta) in family.version.all_files() {
                edit.new_files.push((level as u32, meta.clone()));
            }
            writer.add_record(&edit.encode())?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        set_current(&self.db_path, number)?;
        self.manifest_number = number;
        self.writer = Some(writer);

        info!(manifest = %path.display(), "manifest created");
        Ok(())
    }

    /// Appends one edit to the live manifest (fsynced) and applies it to
    /// the in-memory state.
    ///
    /// The edit is validated against a scratch copy of the family state
    /// *before* anything is appended, so an invalid edit can never
    /// poison the durable stream.
    pub fn log_and_apply(&mut self, edit: &VersionEdit) -> Result<(), ManifestError> {
        let mut trial = self.families.clone();
        Self::apply_to_families(&mut trial, edit)?;

        let writer = self.writer.as_mut().ok_or_else(|| {
            ManifestError::Corruption("version set has no manifest writer".into())
        })?;
        writer.add_record(&edit.encode())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        self.families = trial;
        self.apply_counters(edit);
        debug!(manifest = self.manifest_number, "version edit installed");
        Ok(())
    }

    /// Appends several edits as one atomic group, then applies them.
    pub fn log_and_apply_group(&mut self, edits: &mut [VersionEdit]) -> Result<(), ManifestError> {
        let mut trial = self.families.clone();
        for edit in edits.iter() {
            Self::apply_to_families(&mut trial, edit)?;
        }

        let writer = self.writer.as_mut().ok_or_else(|| {
            ManifestError::Corruption("version set has no manifest writer".into())
        })?;
        let n = edits.len() as u32;
        for (i, edit) in edits.iter_mut().enumerate() {
            edit.atomic_group_remaining = Some(n - 1 - i as u32);
            writer.add_record(&edit.encode())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        self.families = trial;
        for edit in edits.iter() {
            self.apply_counters(edit);
        }
        Ok(())
    }

    // --------------------------------------------------------------------
    // Edit application
    // --------------------------------------------------------------------

    /// Applies one edit to the in-memory state.
    fn apply(&mut self, edit: &VersionEdit) -> Result<(), ManifestError> {
        Self::apply_to_families(&mut self.families, edit)?;
        self.apply_counters(edit);
        Ok(())
    }

    /// The fallible half of edit application: column-family lifecycle
    /// and per-family file mutations, against any family map.
    fn apply_to_families(
        families: &mut BTreeMap<u32, ColumnFamily>,
        edit: &VersionEdit,
    ) -> Result<(), ManifestError> {
        if let Some(comparator) = &edit.comparator {
            if comparator != COMPARATOR_NAME {
                return Err(ManifestError::Corruption(format!(
                    "manifest written with comparator {comparator:?}, need {COMPARATOR_NAME:?}"
                )));
            }
        }

        let cf_id = edit.column_family.unwrap_or(DEFAULT_CF_ID);

        if let Some(name) = &edit.column_family_add {
            if families.contains_key(&cf_id) {
                return Err(ManifestError::Corruption(format!(
                    "column family {cf_id} created twice"
                )));
            }
            families.insert(
                cf_id,
                ColumnFamily {
                    id: cf_id,
                    name: name.clone(),
                    version: Version::new(),
                    log_number: 0,
                },
            );
        } else if edit.column_family_drop {
            if cf_id == DEFAULT_CF_ID {
                return Err(ManifestError::Corruption(
                    "the default column family cannot be dropped".into(),
                ));
            }
            if families.remove(&cf_id).is_none() {
                return Err(ManifestError::Corruption(format!(
                    "dropped column family {cf_id} does not exist"
                )));
            }
        } else if !edit.deleted_files.is_empty()
            || !edit.new_files.is_empty()
            || edit.log_number.is_some()
        {
            let family = families.get_mut(&cf_id).ok_or_else(|| {
                ManifestError::Corruption(format!("edit targets unknown column family {cf_id}"))
            })?;
            for (level, file_number) in &edit.deleted_files {
                family.version.remove_file(*level, *file_number)?;
            }
            for (level, meta) in &edit.new_files {
                family.version.add_file(*level, meta.clone())?;
            }
            family.version.finalize();
            family.version.check_invariants()?;
            if let Some(log_number) = edit.log_number {
                family.log_number = log_number;
            }
        }
        Ok(())
    }

    /// The infallible half: global counters.
    fn apply_counters(&mut self, edit: &VersionEdit) {
        if edit.column_family_add.is_some() {
            let cf_id = edit.column_family.unwrap_or(DEFAULT_CF_ID);
            self.max_column_family = self.max_column_family.max(cf_id);
        }
        if let Some(v) = edit.next_file_number {
            self.next_file_number = self.next_file_number.max(v);
        }
        if let Some(v) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(v);
        }
        if let Some(v) = edit.max_column_family {
            self.max_column_family = self.max_column_family.max(v);
        }
        if let Some(v) = edit.prev_log_number {
            self.prev_log_number = v;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// CURRENT handling
// ------------------------------------------------------------------------------------------------

/// Reads and validates `CURRENT`, returning the manifest file name.
fn read_current(db_path: &Path) -> Result<String, ManifestError> {
    let path = current_file(db_path);
    let mut contents = String::new();
    File::open(&path)
        .map_err(|e| {
            ManifestError::Corruption(format!("cannot read CURRENT at {}: {e}", path.display()))
        })?
        .read_to_string(&mut contents)?;

    let name = contents.strip_suffix('\n').ok_or_else(|| {
        ManifestError::Corruption("CURRENT is not newline-terminated".into())
    })?;
    if !name.starts_with("MANIFEST-") {
        return Err(ManifestError::Corruption(format!(
            "CURRENT names {name:?}, expected a MANIFEST file"
        )));
    }
    Ok(name.to_string())
}

/// Atomically points `CURRENT` at `MANIFEST-<number>`.
fn set_current(db_path: &Path, number: u64) -> Result<(), ManifestError> {
    let tmp = db_path.join(format!("CURRENT.{number}.dbtmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(format!("MANIFEST-{number:06}\n").as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, current_file(db_path))?;
    // Make the rename durable.
    File::open(db_path)?.sync_all()?;
    Ok(())
}

//! On-disk file naming under a database directory.
//!
//! ```text
//! CURRENT          — ASCII, one line: "MANIFEST-NNNNNN\n"
//! MANIFEST-<N>     — WAL-framed VersionEdit stream
//! <N>.log          — data WAL
//! <N>.sst          — table file
//! LOCK             — advisory single-process lock
//! IDENTITY         — stable database UUID, assigned on first open
//! OPTIONS-<N>      — human-readable options snapshot
//! ```
//!
//! File numbers are globally unique and monotonically increasing, drawn
//! from the manifest's `next_file_number`.

use std::path::{Path, PathBuf};

/// What a directory entry is, per its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `CURRENT`.
    Current,
    /// `LOCK`.
    Lock,
    /// `IDENTITY`.
    Identity,
    /// `MANIFEST-<N>`.
    Manifest(u64),
    /// `<N>.log`.
    Log(u64),
    /// `<N>.sst`.
    Table(u64),
    /// `OPTIONS-<N>`.
    Options(u64),
    /// Temporary files from atomic-rename sequences.
    Temp,
}

/// `CURRENT` path.
pub fn current_file(db: &Path) -> PathBuf {
    db.join("CURRENT")
}

/// `LOCK` path.
pub fn lock_file(db: &Path) -> PathBuf {
    db.join("LOCK")
}

/// `IDENTITY` path.
pub fn identity_file(db: &Path) -> PathBuf {
    db.join("IDENTITY")
}

/// `MANIFEST-<N>` path.
pub fn manifest_file(db: &Path, number: u64) -> PathBuf {
    db.join(format!("MANIFEST-{number:06}"))
}

/// `<N>.log` path.
pub fn log_file(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.log"))
}

/// `<N>.sst` path.
pub fn table_file(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.sst"))
}

/// `OPTIONS-<N>` path.
pub fn options_file(db: &Path, number: u64) -> PathBuf {
    db.join(format!("OPTIONS-{number:06}"))
}

/// Classifies a directory entry by name; `None` for foreign files.
pub fn parse_file_name(name: &str) -> Option<FileKind> {
    match name {
        "CURRENT" => return Some(FileKind::Current),
        "LOCK" => return Some(FileKind::Lock),
        "IDENTITY" => return Some(FileKind::Identity),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse().ok().map(FileKind::Manifest);
    }
    if let Some(rest) = name.strip_prefix("OPTIONS-") {
        return rest.parse().ok().map(FileKind::Options);
    }
    if name.ends_with(".tmp") || name.ends_with(".dbtmp") {
        return Some(FileKind::Temp);
    }
    if let Some(rest) = name.strip_suffix(".log") {
        return rest.parse().ok().map(FileKind::Log);
    }
    if let Some(rest) = name.strip_suffix(".sst") {
        return rest.parse().ok().map(FileKind::Table);
    }
    None
}

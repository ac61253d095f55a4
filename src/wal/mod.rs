//! Write-Ahead Logging (WAL) module.
//!
//! This module implements the **durable**, **append-only** record log
//! used both for the data WAL (`<N>.log`) and for the MANIFEST stream.
//! The framing is the interchange format: any reader of the reference
//! format can replay a log written here.
//!
//! # On-disk layout
//!
//! The file is a sequence of 32 KiB blocks.  A logical record is split
//! into one or more fragments, each with its own header; fragments never
//! span a block boundary, and a block tail smaller than a header is
//! zero-filled and skipped on read.
//!
//! ```text
//! legacy header (7 B):      checksum:u32_le ‖ length:u16_le ‖ type:u8
//! recyclable header (11 B): checksum:u32_le ‖ length:u16_le ‖ type:u8 ‖ log_number:u32_le
//!
//! type ∈ { Full=1, First=2, Middle=3, Last=4,
//!          RecyclableFull=5, RecyclableFirst=6, RecyclableMiddle=7, RecyclableLast=8 }
//! ```
//!
//! The checksum is a masked CRC32C over `type ‖ fragment` (legacy) or
//! `type ‖ log_number ‖ fragment` (recyclable).  A logical record is the
//! concatenation of a `First`, zero or more `Middle`, and a `Last`
//! fragment, or a single `Full` fragment.
//!
//! # Recovery modes
//!
//! [`LogReader`] runs in one of two modes:
//!
//! - **Strict** — any framing violation is an error.
//! - **TolerateCorruptedTail** — once at least one record has been
//!   returned, the first corruption ends the log cleanly; a truncated
//!   final fragment is always treated as end-of-file, not corruption.
//!
//! Together these give the stop-after-corruption property: the reader
//! yields exactly the records whose fragments all precede the first
//! corrupted byte, and nothing after it.

#[cfg(test)]
mod tests;

use std::io::{Read, Write};

use thiserror::Error;
use tracing::{trace, warn};

use crate::checksum::{masked_crc32c, unmask_crc};
use crate::encoding::{decode_fixed16, decode_fixed32};

/// Size of one log block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Legacy fragment header size.
pub const HEADER_SIZE: usize = 7;

/// Recyclable fragment header size (adds the 4-byte log number).
pub const RECYCLABLE_HEADER_SIZE: usize = 11;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or checksum violation in the log.
    #[error("corrupt log record at offset {offset}: {reason}")]
    Corruption {
        /// File offset of the offending fragment header.
        offset: u64,
        /// What was wrong.
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// Record types
// ------------------------------------------------------------------------------------------------

const ZERO_TYPE: u8 = 0;
const FULL_TYPE: u8 = 1;
const FIRST_TYPE: u8 = 2;
const MIDDLE_TYPE: u8 = 3;
const LAST_TYPE: u8 = 4;
const RECYCLABLE_FULL_TYPE: u8 = 5;
const RECYCLABLE_FIRST_TYPE: u8 = 6;
const RECYCLABLE_MIDDLE_TYPE: u8 = 7;
const RECYCLABLE_LAST_TYPE: u8 = 8;
const MAX_RECORD_TYPE: u8 = RECYCLABLE_LAST_TYPE;

#[inline]
fn is_recyclable(record_type: u8) -> bool {
    (RECYCLABLE_FULL_TYPE..=RECYCLABLE_LAST_TYPE).contains(&record_type)
}

// ------------------------------------------------------------------------------------------------
// LogWriter
// ------------------------------------------------------------------------------------------------

/// Appends framed records to a log.
///
/// Generic over the sink so the framing logic is testable against plain
/// byte buffers; the database uses `LogWriter<std::fs::File>` and syncs
/// through [`get_ref`](Self::get_ref).
#[derive(Debug)]
pub struct LogWriter<W: Write> {
    writer: W,

    /// Offset within the current 32 KiB block.
    block_offset: usize,

    /// Total bytes written (= file offset of the next fragment).
    position: u64,

    /// Log number stamped into recyclable headers.
    log_number: u32,

    /// Emit recyclable framing instead of legacy framing.
    recyclable: bool,
}

impl<W: Write> LogWriter<W> {
    /// Creates a writer emitting legacy (7-byte header) framing.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            block_offset: 0,
            position: 0,
            log_number: 0,
            recyclable: false,
        }
    }

    /// Creates a writer emitting recyclable (11-byte header) framing
    /// stamped with `log_number`.
    pub fn new_recyclable(writer: W, log_number: u32) -> Self {
        Self {
            writer,
            block_offset: 0,
            position: 0,
            log_number,
            recyclable: true,
        }
    }

    /// Shared access to the sink (for fsync).
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Total bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Appends one logical record, fragmenting across blocks as needed.
    ///
    /// Returns the file offset of the record's first fragment header.
    pub fn add_record(&mut self, record: &[u8]) -> Result<u64, WalError> {
        let header_size = if self.recyclable {
            RECYCLABLE_HEADER_SIZE
        } else {
            HEADER_SIZE
        };

        let mut left = record;
        let mut begin = true;
        let mut start_offset = None;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < header_size {
                // Too small for another header: zero-fill to block end.
                if leftover > 0 {
                    const ZEROS: [u8; RECYCLABLE_HEADER_SIZE] = [0; RECYCLABLE_HEADER_SIZE];
                    self.writer.write_all(&ZEROS[..leftover])?;
                    self.position += leftover as u64;
                }
                self.block_offset = 0;
            }

            if start_offset.is_none() {
                start_offset = Some(self.position);
            }

            let available = BLOCK_SIZE - self.block_offset - header_size;
            let fragment_len = left.len().min(available);
            let end = fragment_len == left.len();

            let record_type = match (self.recyclable, begin, end) {
                (false, true, true) => FULL_TYPE,
                (false, true, false) => FIRST_TYPE,
                (false, false, false) => MIDDLE_TYPE,
                (false, false, true) => LAST_TYPE,
                (true, true, true) => RECYCLABLE_FULL_TYPE,
                (true, true, false) => RECYCLABLE_FIRST_TYPE,
                (true, false, false) => RECYCLABLE_MIDDLE_TYPE,
                (true, false, true) => RECYCLABLE_LAST_TYPE,
            };

            self.emit_fragment(record_type, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;
            if end {
                break;
            }
        }

        Ok(start_offset.expect("loop ran at least once"))
    }

    /// Flushes buffered bytes to the sink.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        Ok(())
    }

    fn emit_fragment(&mut self, record_type: u8, data: &[u8]) -> Result<(), WalError> {
        let type_byte = [record_type];
        let log_number_bytes = self.log_number.to_le_bytes();

        let crc = if self.recyclable {
            masked_crc32c(&[&type_byte, &log_number_bytes, data])
        } else {
            masked_crc32c(&[&type_byte, data])
        };

        let mut header = Vec::with_capacity(RECYCLABLE_HEADER_SIZE);
        header.extend_from_slice(&crc.to_le_bytes());
        header.extend_from_slice(&(data.len() as u16).to_le_bytes());
        header.push(record_type);
        if self.recyclable {
            header.extend_from_slice(&log_number_bytes);
        }

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;
        self.block_offset += header.len() + data.len();
        self.position += (header.len() + data.len()) as u64;

        trace!(
            record_type,
            len = data.len(),
            block_offset = self.block_offset,
            "log fragment written"
        );
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// LogReader
// ------------------------------------------------------------------------------------------------

/// How the reader responds to framing violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Every violation is an error.
    Strict,
    /// After at least one clean record, the first corruption ends the
    /// log; truncated tails always read as end-of-file.
    TolerateCorruptedTail,
}

/// Outcome of reading one physical fragment.
enum Fragment {
    /// A fragment of the given type with its payload.
    Data(u8, Vec<u8>),
    /// Clean end of the log (including a truncated tail).
    Eof,
    /// A framing violation at the given offset.
    Bad { offset: u64, reason: String },
}

/// Replays framed records from a log.
pub struct LogReader<R: Read> {
    reader: R,
    mode: RecoveryMode,

    /// Expected log number for recyclable fragments; `None` accepts any.
    expected_log_number: Option<u32>,

    /// Current block's bytes.
    block: Vec<u8>,
    /// Read cursor within `block`.
    block_pos: usize,
    /// True when the current block is the file's final, short block.
    last_block: bool,
    /// File offset of `block[0]`.
    block_start: u64,

    /// At least one logical record has been returned.
    returned_any: bool,
    /// Reader has stopped (EOF or tolerated corruption).
    done: bool,
}

impl<R: Read> LogReader<R> {
    /// Creates a reader.
    ///
    /// `expected_log_number` is checked against recyclable fragment
    /// headers: a mismatch means the fragment is a leftover from the
    /// file's previous life and ends the log (or errors, when strict).
    pub fn new(reader: R, mode: RecoveryMode, expected_log_number: Option<u32>) -> Self {
        Self {
            reader,
            mode,
            expected_log_number,
            block: Vec::new(),
            block_pos: 0,
            last_block: false,
            block_start: 0,
            returned_any: false,
            done: false,
        }
    }

    /// Reads the next logical record, or `None` at the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, WalError> {
        if self.done {
            return Ok(None);
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_fragment()? {
                Fragment::Eof => {
                    if in_fragmented_record {
                        // A record whose tail was never written: the
                        // canonical partial-tail case.
                        warn!("log ends inside a fragmented record; treating as end of file");
                        if self.mode == RecoveryMode::Strict {
                            return self.fail(self.block_start + self.block_pos as u64,
                                "partial record at end of log".into());
                        }
                    }
                    self.done = true;
                    return Ok(None);
                }

                Fragment::Bad { offset, reason } => {
                    return self.fail(offset, reason);
                }

                Fragment::Data(record_type, data) => {
                    let logical = match record_type {
                        FULL_TYPE | RECYCLABLE_FULL_TYPE => {
                            if in_fragmented_record {
                                return self.fail(
                                    self.block_start + self.block_pos as u64,
                                    "full record inside fragmented record".into(),
                                );
                            }
                            Some(data)
                        }
                        FIRST_TYPE | RECYCLABLE_FIRST_TYPE => {
                            if in_fragmented_record {
                                return self.fail(
                                    self.block_start + self.block_pos as u64,
                                    "first fragment inside fragmented record".into(),
                                );
                            }
                            scratch = data;
                            in_fragmented_record = true;
                            None
                        }
                        MIDDLE_TYPE | RECYCLABLE_MIDDLE_TYPE => {
                            if !in_fragmented_record {
                                return self.fail(
                                    self.block_start + self.block_pos as u64,
                                    "middle fragment without first".into(),
                                );
                            }
                            scratch.extend_from_slice(&data);
                            None
                        }
                        LAST_TYPE | RECYCLABLE_LAST_TYPE => {
                            if !in_fragmented_record {
                                return self.fail(
                                    self.block_start + self.block_pos as u64,
                                    "last fragment without first".into(),
                                );
                            }
                            scratch.extend_from_slice(&data);
                            Some(std::mem::take(&mut scratch))
                        }
                        other => {
                            return self.fail(
                                self.block_start + self.block_pos as u64,
                                format!("unknown record type {other}"),
                            );
                        }
                    };

                    if let Some(record) = logical {
                        self.returned_any = true;
                        return Ok(Some(record));
                    }
                }
            }
        }
    }

    /// Applies the recovery mode to a corruption.
    fn fail(&mut self, offset: u64, reason: String) -> Result<Option<Vec<u8>>, WalError> {
        self.done = true;
        if self.mode == RecoveryMode::TolerateCorruptedTail && self.returned_any {
            warn!(offset, reason, "stopping log replay at corruption");
            return Ok(None);
        }
        Err(WalError::Corruption { offset, reason })
    }

    /// Reads and validates one physical fragment.
    fn read_fragment(&mut self) -> Result<Fragment, WalError> {
        loop {
            // Need at least a legacy header to continue in this block.
            if self.block.len() - self.block_pos < HEADER_SIZE {
                if !self.refill_block()? {
                    return Ok(Fragment::Eof);
                }
                continue;
            }

            let offset = self.block_start + self.block_pos as u64;
            let header = &self.block[self.block_pos..];
            let stored_crc = decode_fixed32(header).expect("checked length");
            let length = decode_fixed16(&header[4..]).expect("checked length") as usize;
            let record_type = header[6];

            if record_type == ZERO_TYPE && length == 0 && stored_crc == 0 {
                // Zero-filled padding (or preallocated space): skip the
                // rest of this block.
                self.block_pos = self.block.len();
                continue;
            }

            if record_type > MAX_RECORD_TYPE {
                return Ok(Fragment::Bad {
                    offset,
                    reason: format!("unknown record type {record_type}"),
                });
            }

            let recyclable = is_recyclable(record_type);
            let header_size = if recyclable {
                RECYCLABLE_HEADER_SIZE
            } else {
                HEADER_SIZE
            };

            let available = self.block.len() - self.block_pos;
            if header_size + length > available {
                if self.last_block {
                    // Truncated tail: the writer crashed mid-fragment.
                    trace!(offset, "truncated fragment at end of log");
                    return Ok(Fragment::Eof);
                }
                return Ok(Fragment::Bad {
                    offset,
                    reason: format!(
                        "fragment length {length} exceeds block ({available} bytes left)"
                    ),
                });
            }

            let mut payload_start = self.block_pos + HEADER_SIZE;
            let mut log_number = 0u32;
            if recyclable {
                log_number = decode_fixed32(&self.block[payload_start..]).expect("checked");
                payload_start += 4;
            }
            let payload = &self.block[payload_start..payload_start + length];

            // Verify before honoring the log-number check so corrupt
            // headers are not mistaken for old records.
            let computed = if recyclable {
                masked_crc32c(&[&[record_type], &log_number.to_le_bytes(), payload])
            } else {
                masked_crc32c(&[&[record_type], payload])
            };
            if computed != stored_crc {
                return Ok(Fragment::Bad {
                    offset,
                    reason: format!(
                        "checksum mismatch (stored {:#010x}, computed {:#010x})",
                        unmask_crc(stored_crc),
                        unmask_crc(computed)
                    ),
                });
            }

            if recyclable {
                if let Some(expected) = self.expected_log_number {
                    if log_number != expected {
                        // A verified fragment from the file's previous
                        // life: the log ends here.
                        if self.mode == RecoveryMode::Strict {
                            return Ok(Fragment::Bad {
                                offset,
                                reason: format!(
                                    "recycled fragment from log {log_number}, expected {expected}"
                                ),
                            });
                        }
                        return Ok(Fragment::Eof);
                    }
                }
            }

            let data = payload.to_vec();
            self.block_pos = payload_start + length;
            return Ok(Fragment::Data(record_type, data));
        }
    }

    /// Loads the next 32 KiB block; returns false at end of file.
    fn refill_block(&mut self) -> Result<bool, WalError> {
        if self.last_block {
            return Ok(false);
        }
        self.block_start += self.block.len() as u64;

        self.block.clear();
        self.block.resize(BLOCK_SIZE, 0);
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.reader.read(&mut self.block[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.block.truncate(filled);
        self.block_pos = 0;
        self.last_block = filled < BLOCK_SIZE;
        Ok(filled > 0)
    }
}

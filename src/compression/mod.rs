//! Per-block compression codecs.
//!
//! Blocks are compressed independently, and each persisted block records
//! its codec in the compression-type byte of the 5-byte trailer.  Five
//! codecs are supported:
//!
//! | Codec  | Tag | Framing                                                  |
//! |--------|-----|----------------------------------------------------------|
//! | None   | 0   | identity                                                 |
//! | Snappy | 1   | standard raw snappy                                      |
//! | Zlib   | 2   | raw deflate (no zlib header); varint32 size prefix (fv≥2)|
//! | LZ4    | 4   | LZ4 block format; varint32 size prefix (fv≥2)            |
//! | Zstd   | 7   | standard zstd frame                                      |
//!
//! For format versions ≥ 2 the Zlib and LZ4 payloads are prefixed with a
//! varint32 of the uncompressed size, which lets the decompressor size
//! its output buffer exactly.  Snappy and Zstd frames carry their own
//! length information.
//!
//! The table writer calls [`maybe_compress`], which falls back to storing
//! the block uncompressed (tag 0) whenever the compressed output is not
//! strictly smaller than the input.


use std::io::{Read, Write};

use thiserror::Error;
use tracing::trace;

use crate::encoding::{get_varint32, put_varint32};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced by compression and decompression.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The compression-type byte does not name a known codec.
    #[error("unknown compression tag {0}")]
    UnknownTag(u8),

    /// The compressed payload could not be decoded.
    #[error("corrupt compressed block ({codec}): {reason}")]
    Corrupt {
        /// Codec that rejected the payload.
        codec: &'static str,
        /// Decoder-specific detail.
        reason: String,
    },

    /// The varint32 uncompressed-size prefix is missing or malformed.
    #[error("corrupt compressed block: bad uncompressed-size prefix")]
    BadSizePrefix,
}

// ------------------------------------------------------------------------------------------------
// Codec identifiers
// ------------------------------------------------------------------------------------------------

/// On-wire compression codec identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionKind {
    /// Store blocks verbatim.
    #[default]
    None = 0,
    /// Raw snappy.
    Snappy = 1,
    /// Raw deflate.
    Zlib = 2,
    /// LZ4 block format.
    Lz4 = 4,
    /// Zstandard.
    Zstd = 7,
}

impl CompressionKind {
    /// Decodes a compression-type byte from a block trailer.
    pub fn from_wire(byte: u8) -> Result<Self, CompressionError> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Snappy),
            2 => Ok(Self::Zlib),
            4 => Ok(Self::Lz4),
            7 => Ok(Self::Zstd),
            other => Err(CompressionError::UnknownTag(other)),
        }
    }

    /// Name used in the table properties block.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NoCompression",
            Self::Snappy => "Snappy",
            Self::Zlib => "Zlib",
            Self::Lz4 => "LZ4",
            Self::Zstd => "ZSTD",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Compression
// ------------------------------------------------------------------------------------------------

/// Compresses `input` with `kind`, applying the format-version framing
/// rules described in the module docs.
pub fn compress(
    kind: CompressionKind,
    input: &[u8],
    format_version: u32,
) -> Result<Vec<u8>, CompressionError> {
    match kind {
        CompressionKind::None => Ok(input.to_vec()),

        CompressionKind::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            encoder.compress_vec(input).map_err(|e| CompressionError::Corrupt {
                codec: "snappy",
                reason: e.to_string(),
            })
        }

        CompressionKind::Zlib => {
            let mut out = Vec::with_capacity(input.len() / 2 + 16);
            if format_version >= 2 {
                put_varint32(&mut out, input.len() as u32);
            }
            let mut encoder =
                flate2::write::DeflateEncoder::new(&mut out, flate2::Compression::default());
            encoder
                .write_all(input)
                .and_then(|_| encoder.finish().map(|_| ()))
                .map_err(|e| CompressionError::Corrupt {
                    codec: "zlib",
                    reason: e.to_string(),
                })?;
            Ok(out)
        }

        CompressionKind::Lz4 => {
            let mut out = Vec::with_capacity(input.len() / 2 + 16);
            if format_version >= 2 {
                put_varint32(&mut out, input.len() as u32);
            }
            out.extend_from_slice(&lz4_flex::block::compress(input));
            Ok(out)
        }

        CompressionKind::Zstd => zstd::bulk::compress(input, 0).map_err(|e| {
            CompressionError::Corrupt {
                codec: "zstd",
                reason: e.to_string(),
            }
        }),
    }
}

/// Compresses `input` and decides whether the result is worth keeping.
///
/// Returns the bytes to persist and the codec tag that describes them.
/// When the compressed output is not strictly smaller than the input the
/// block is stored verbatim with tag [`CompressionKind::None`].
pub fn maybe_compress(
    kind: CompressionKind,
    input: &[u8],
    format_version: u32,
) -> Result<(Vec<u8>, CompressionKind), CompressionError> {
    if kind == CompressionKind::None {
        return Ok((input.to_vec(), CompressionKind::None));
    }
    let compressed = compress(kind, input, format_version)?;
    if compressed.len() < input.len() {
        Ok((compressed, kind))
    } else {
        trace!(
            codec = kind.name(),
            raw = input.len(),
            compressed = compressed.len(),
            "compression not profitable, storing block raw"
        );
        Ok((input.to_vec(), CompressionKind::None))
    }
}

// ------------------------------------------------------------------------------------------------
// Decompression
// ------------------------------------------------------------------------------------------------

/// Decompresses a block payload written by [`compress`].
pub fn decompress(
    kind: CompressionKind,
    input: &[u8],
    format_version: u32,
) -> Result<Vec<u8>, CompressionError> {
    match kind {
        CompressionKind::None => Ok(input.to_vec()),

        CompressionKind::Snappy => {
            let mut decoder = snap::raw::Decoder::new();
            decoder.decompress_vec(input).map_err(|e| CompressionError::Corrupt {
                codec: "snappy",
                reason: e.to_string(),
            })
        }

        CompressionKind::Zlib => {
            let (payload, size_hint) = split_size_prefix(input, format_version)?;
            let mut decoder = flate2::read::DeflateDecoder::new(payload);
            let mut out = Vec::with_capacity(size_hint.unwrap_or(payload.len() * 4));
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CompressionError::Corrupt {
                    codec: "zlib",
                    reason: e.to_string(),
                })?;
            if let Some(expected) = size_hint {
                if out.len() != expected {
                    return Err(CompressionError::Corrupt {
                        codec: "zlib",
                        reason: format!("size prefix {expected} != inflated {}", out.len()),
                    });
                }
            }
            Ok(out)
        }

        CompressionKind::Lz4 => {
            let (payload, size_hint) = split_size_prefix(input, format_version)?;
            let expected = size_hint.ok_or(CompressionError::BadSizePrefix)?;
            lz4_flex::block::decompress(payload, expected).map_err(|e| {
                CompressionError::Corrupt {
                    codec: "lz4",
                    reason: e.to_string(),
                }
            })
        }

        CompressionKind::Zstd => {
            zstd::stream::decode_all(input).map_err(|e| CompressionError::Corrupt {
                codec: "zstd",
                reason: e.to_string(),
            })
        }
    }
}

/// Splits off the varint32 uncompressed-size prefix for format
/// versions ≥ 2; earlier versions have no prefix.
fn split_size_prefix(
    input: &[u8],
    format_version: u32,
) -> Result<(&[u8], Option<usize>), CompressionError> {
    if format_version < 2 {
        return Ok((input, None));
    }
    let (size, n) = get_varint32(input).map_err(|_| CompressionError::BadSizePrefix)?;
    Ok((&input[n..], Some(size as usize)))
}

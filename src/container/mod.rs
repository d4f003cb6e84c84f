//! Container Module
//!
//! Byte-level mechanics of the block container. Knows nothing about pages.
//!
//! ## Responsibilities
//! - Write a gzip-compatible stream as a sequence of independently
//!   resumable deflate blocks (full flush between blocks)
//! - Keep a rolling CRC32/length over the logical decompressed stream
//! - Reserve, patch and parse the block index in the gzip header extra field
//! - Decompress a single block span, or the whole stream as a fallback
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ gzip Header (10)   1F 8B 08 | FLG=FEXTRA | MTIME | XFL | OS  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Extra Field        XLEN (2) | 'B' 'I' | LEN (2)              │
//! │   Count: u32 (4)   0 = no index                              │
//! │   [EndOffset u32][Crc32Cum u32][LenCum u32][Reserved u32]    │
//! │   ... Count records, zero padded to LEN ...                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Block 0            document header      (full flush)         │
//! │ Block 1..N         one per page         (full flush)         │
//! │ Block N+1          manifest             (final)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Trailer (8)        CRC32 (4) | ISIZE (4)                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Record `i` holds the stream state right after block `i`: where it ends in
//! the file and the CRC/length of everything decompressed so far.

mod reader;
mod record;
mod stream;
mod writer;

pub use reader::{inflate_all, read_block, read_index, verify, InflateOutcome, VerifyReport};
pub use record::{BlockIndex, BlockRecord, HeaderLayout, RollingChecksum};
pub use stream::{Container, FileContainer};
pub use writer::{append_block, patch_index, write_header, write_trailer};

// =============================================================================
// Shared Constants (used by writer, reader)
// =============================================================================

/// gzip magic bytes plus the deflate compression method
pub const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// gzip FLG bit announcing an extra field
pub(crate) const FLAG_EXTRA: u8 = 0x04;

/// Fixed gzip header size: magic (3) + FLG + MTIME (4) + XFL + OS
pub(crate) const GZIP_HEADER_SIZE: u64 = 10;

/// Subfield id of the block index inside the extra field
pub(crate) const INDEX_SUBFIELD_ID: [u8; 2] = *b"BI";

/// Size of one serialized block record
pub const RECORD_SIZE: usize = 16;

/// Size of the record count that precedes the records
pub(crate) const INDEX_COUNT_SIZE: usize = 4;

/// Size of the gzip trailer: CRC32 (4) + ISIZE (4)
pub const TRAILER_SIZE: u64 = 8;

/// Largest record count whose subfield still fits under the 16-bit XLEN:
/// 4 (subfield header) + 4 (count) + 16 * n <= 65535
pub const MAX_INDEX_RECORDS: usize = (u16::MAX as usize - 4 - INDEX_COUNT_SIZE) / RECORD_SIZE;

//! Store Module
//!
//! Whole-document load and save on top of the block container.
//!
//! ## Responsibilities
//! - Decide between a full rewrite and a partial rewrite from the pivot page
//! - Keep the block index and per-page block references consistent with
//!   what is durably on disk
//! - Load lazily from the embedded index, or eagerly by inflating the whole
//!   stream when the index is missing or untrustworthy
//! - Read and write the inline and linked multi-file forms
//!
//! ## Save Paths
//! ```text
//!            ┌──────────────┐  PARTIAL, same container, index present
//!  save() ──►│ find pivot   ├───────────────────────────┐
//!            └──────┬───────┘                           ▼
//!                   │ otherwise              seek to record[pivot], seed CRC,
//!                   ▼                        rewrite pages ≥ pivot + manifest
//!      truncate, header, all pages,          trailer, patch index, truncate
//!      manifest, trailer, patch index
//! ```

mod file;
mod legacy;
mod load;
mod save;

use std::ops::{BitOr, BitOrAssign};

use crate::document::{Document, PayloadCodec};

pub use file::{extract_thumbnail, open_path, save_path};
pub use legacy::page_file_path;

// =============================================================================
// Save Options
// =============================================================================

/// Save option bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveFlags(u32);

impl SaveFlags {
    pub const NORMAL: SaveFlags = SaveFlags(0x0);
    /// Save even if nothing changed
    pub const FORCE: SaveFlags = SaveFlags(0x1);
    /// Write the linked form: index file plus one file per page
    pub const MULTIFILE: SaveFlags = SaveFlags(0x2);
    /// Write a duplicate; the document keeps its container and dirty state
    pub const COPY: SaveFlags = SaveFlags(0x4);
    /// Allow rewriting only from the first changed page onward
    pub const PARTIAL: SaveFlags = SaveFlags(0x10);

    pub fn contains(self, other: SaveFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for SaveFlags {
    type Output = SaveFlags;

    fn bitor(self, rhs: SaveFlags) -> SaveFlags {
        SaveFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SaveFlags {
    fn bitor_assign(&mut self, rhs: SaveFlags) {
        self.0 |= rhs.0;
    }
}

/// Per-save manifest contents that do not live in the document
#[derive(Debug, Clone, Default)]
pub struct ManifestExtras {
    /// Raw thumbnail image bytes (stored base64-encoded)
    pub thumbnail: Option<Vec<u8>>,
}

impl ManifestExtras {
    pub fn with_thumbnail(image: impl Into<Vec<u8>>) -> Self {
        Self {
            thumbnail: Some(image.into()),
        }
    }
}

// =============================================================================
// Load Results
// =============================================================================

/// How a successful load went. A load that recovers nothing usable is
/// `Err(InkError::LoadFatal)` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Normal, writable, current format
    Ok,
    /// At least one page recovered, but with errors; do not overwrite the source
    NonFatal,
    /// Zero-length input; a fresh document
    EmptyDocument,
    /// Written by a newer format version
    NewerVersion,
    /// Content recovered from a form that cannot safely be resaved in place
    NonWritable,
}

impl LoadOutcome {
    /// May the document be saved back over its source?
    pub fn is_writable(self) -> bool {
        matches!(self, LoadOutcome::Ok | LoadOutcome::EmptyDocument)
    }
}

/// A loaded document plus how the load went
pub struct Loaded<C: PayloadCodec> {
    pub document: Document<C>,
    pub outcome: LoadOutcome,
}

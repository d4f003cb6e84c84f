//! Document Module
//!
//! The Document/Page data model the store persists.
//!
//! ## Responsibilities
//! - Own pages in reading order (an index-addressed arena)
//! - Track dirty state at document and page level
//! - Track which block of the container holds each page
//! - Own the open container handle for the document's lifetime
//!
//! Pages never point back at their document. "Which page number am I" is a
//! lookup of a `PageId` against the arena.

mod codec;
pub mod format;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::container::{BlockIndex, Container};
use crate::error::{InkError, Result};

pub use codec::{PayloadCodec, RawPayloadCodec};
pub use format::{Manifest, FORMAT_VERSION};

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a page, independent of its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u64);

impl PageId {
    fn next() -> Self {
        Self(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Page geometry and style. Only width and height mean anything to the
/// engine (they go into the manifest); the rest is carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProps {
    pub width: f32,
    pub height: f32,
    pub x_ruling: f32,
    pub y_ruling: f32,
    pub margin_left: f32,
    /// Paper color, RGBA
    pub color: u32,
    /// Rule line color, RGBA
    pub rule_color: u32,
}

impl PageProps {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            x_ruling: 0.0,
            y_ruling: 0.0,
            margin_left: 0.0,
            color: 0xffff_ffff,
            rule_color: 0x0000_ffff,
        }
    }
}

/// Residency of a page's content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loaded,
    /// Sticky until `Document::check_and_clear_errors()`
    LoadError,
}

/// How a document is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// Block gzip container with embedded index (`.svgz`, `.gz`)
    Block,
    /// Uncompressed logical stream in one file (`.svg`)
    Inline,
    /// Index file plus one file per page (`.html`, `.htm`, anything else)
    Linked,
}

impl StorageFormat {
    /// Pick the format from a file extension
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "svgz" | "gz" => StorageFormat::Block,
            "svg" => StorageFormat::Inline,
            _ => StorageFormat::Linked,
        }
    }
}

// =============================================================================
// Page
// =============================================================================

/// One page of a document
#[derive(Debug)]
pub struct Page<T> {
    id: PageId,
    pub(crate) props: PageProps,
    pub(crate) state: LoadState,
    /// Nonzero: content changed since this page's block was last written
    pub(crate) dirty_count: u32,
    /// Block holding this page as of its last write; `None` if never written
    /// to the current container
    pub(crate) block_idx: Option<usize>,
    /// Backing file in the linked multi-file form
    pub(crate) file_name: Option<PathBuf>,
    pub(crate) content: Option<T>,
    pub(crate) resident_bytes: usize,
}

impl<T> Page<T> {
    /// A new, empty, resident page
    pub fn blank(props: PageProps) -> Self {
        Self {
            id: PageId::next(),
            props,
            state: LoadState::Loaded,
            dirty_count: 0,
            block_idx: None,
            file_name: None,
            content: None,
            resident_bytes: 0,
        }
    }

    /// A page whose content still lives in block `block_idx`
    pub(crate) fn unloaded(props: PageProps, block_idx: usize) -> Self {
        Self {
            state: LoadState::NotLoaded,
            block_idx: Some(block_idx),
            ..Self::blank(props)
        }
    }

    /// A page whose content still lives in its own file
    pub(crate) fn linked(props: PageProps, file: PathBuf) -> Self {
        Self {
            state: LoadState::NotLoaded,
            file_name: Some(file),
            ..Self::blank(props)
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn props(&self) -> &PageProps {
        &self.props
    }

    pub fn width(&self) -> f32 {
        self.props.width
    }

    pub fn height(&self) -> f32 {
        self.props.height
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    pub fn dirty_count(&self) -> u32 {
        self.dirty_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_count != 0
    }

    pub fn block_idx(&self) -> Option<usize> {
        self.block_idx
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    /// Content, if resident. `None` on a loaded page means blank.
    pub fn content(&self) -> Option<&T> {
        self.content.as_ref()
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// Record an edit made by the editing/undo layer
    pub fn mark_dirty(&mut self) {
        self.dirty_count += 1;
    }

    /// Can this page's content be read back after an unload?
    pub(crate) fn is_reloadable(&self, indexed: bool) -> bool {
        (self.block_idx.is_some() && indexed) || self.file_name.is_some()
    }

    pub(crate) fn set_loaded(&mut self, content: Option<T>, resident_bytes: usize) {
        self.content = content;
        self.resident_bytes = resident_bytes;
        self.state = LoadState::Loaded;
    }

    pub(crate) fn set_load_error(&mut self) {
        self.content = None;
        self.resident_bytes = 0;
        self.state = LoadState::LoadError;
    }

    /// Drop resident content. Callers guarantee the page is clean.
    pub(crate) fn unload(&mut self) {
        debug_assert_eq!(self.dirty_count, 0, "unloading a dirty page");
        self.content = None;
        self.resident_bytes = 0;
        self.state = LoadState::NotLoaded;
    }

    /// Page was durably written as block `block_idx`
    pub(crate) fn set_written(&mut self, block_idx: Option<usize>) {
        self.dirty_count = 0;
        self.block_idx = block_idx;
    }
}

// =============================================================================
// Document
// =============================================================================

/// An ordered set of pages backed by one container
pub struct Document<C: PayloadCodec> {
    pub(crate) pages: Vec<Page<C::Content>>,
    /// Nonzero: unsaved structural change (insert, delete, move, config)
    pub(crate) dirty_count: u32,
    pub(crate) container: Option<Box<dyn Container>>,
    pub(crate) block_index: BlockIndex,
    pub(crate) codec: C,
    pub(crate) config: BTreeMap<String, String>,
    pub(crate) format: StorageFormat,
    /// Format version the document was loaded from
    pub(crate) format_version: u32,
}

impl<C: PayloadCodec> Document<C> {
    /// A new, empty document with no container
    pub fn new(codec: C) -> Self {
        Self {
            pages: Vec::new(),
            dirty_count: 0,
            container: None,
            block_index: BlockIndex::default(),
            codec,
            config: BTreeMap::new(),
            format: StorageFormat::Block,
            format_version: FORMAT_VERSION,
        }
    }

    // =========================================================================
    // Page Access
    // =========================================================================

    pub fn pages(&self) -> &[Page<C::Content>] {
        &self.pages
    }

    pub fn page(&self, idx: usize) -> Option<&Page<C::Content>> {
        self.pages.get(idx)
    }

    pub fn page_mut(&mut self, idx: usize) -> Option<&mut Page<C::Content>> {
        self.pages.get_mut(idx)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Current position of a page, by identity
    pub fn page_number(&self, id: PageId) -> Option<usize> {
        self.pages.iter().position(|p| p.id == id)
    }

    /// Content of a resident page
    pub fn page_content(&self, idx: usize) -> Option<&C::Content> {
        self.pages.get(idx).and_then(|p| p.content.as_ref())
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Insert a page at `at` (or append when `None`/out of range).
    /// Returns its position.
    pub fn insert_page(&mut self, page: Page<C::Content>, at: Option<usize>) -> usize {
        let pos = match at {
            Some(at) if at < self.pages.len() => {
                self.pages.insert(at, page);
                at
            }
            _ => {
                self.pages.push(page);
                self.pages.len() - 1
            }
        };
        self.dirty_count += 1;
        pos
    }

    pub fn push_blank_page(&mut self, props: PageProps) -> usize {
        self.insert_page(Page::blank(props), None)
    }

    /// Remove a page and hand it back (e.g. to an undo history).
    ///
    /// The page is loaded first so it stays usable once detached; it no
    /// longer refers to any block or file.
    pub fn delete_page(&mut self, at: usize) -> Result<Page<C::Content>> {
        if at >= self.pages.len() {
            return Err(InkError::InvalidPage(at));
        }
        if let Err(e) = self.load_if_needed(at) {
            tracing::warn!(page = at, error = %e, "deleting page that failed to load");
        }

        let mut page = self.pages.remove(at);
        page.block_idx = None;
        page.file_name = None;
        self.dirty_count += 1;
        Ok(page)
    }

    /// Move the page at `from` so it ends up at `to`
    pub fn move_page(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.pages.len();
        if from >= len {
            return Err(InkError::InvalidPage(from));
        }
        if to >= len {
            return Err(InkError::InvalidPage(to));
        }
        let page = self.pages.remove(from);
        self.pages.insert(to, page);
        self.dirty_count += 1;
        Ok(())
    }

    /// Replace a page's content, marking it dirty
    pub fn set_page_content(&mut self, idx: usize, content: C::Content) -> Result<()> {
        let resident = self.codec.resident_size(&content);
        let page = self.pages.get_mut(idx).ok_or(InkError::InvalidPage(idx))?;
        page.set_loaded(Some(content), resident);
        page.dirty_count += 1;
        Ok(())
    }

    /// Change a page's geometry/style, marking it dirty.
    ///
    /// The page is loaded first; otherwise a later load would bring the old
    /// properties back from its block.
    pub fn set_page_props(&mut self, idx: usize, props: PageProps) -> Result<()> {
        self.load_if_needed(idx)?;
        let page = self.pages.get_mut(idx).ok_or(InkError::InvalidPage(idx))?;
        page.props = props;
        page.dirty_count += 1;
        Ok(())
    }

    // =========================================================================
    // Document State
    // =========================================================================

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn set_config(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
        self.dirty_count += 1;
    }

    pub fn dirty_count(&self) -> u32 {
        self.dirty_count
    }

    /// Any unsaved change, structural or to a page
    pub fn is_modified(&self) -> bool {
        self.dirty_count != 0 || self.pages.iter().any(|p| p.dirty_count != 0)
    }

    pub fn block_index(&self) -> &BlockIndex {
        &self.block_index
    }

    pub fn format(&self) -> StorageFormat {
        self.format
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn has_container(&self) -> bool {
        self.container.is_some()
    }

    pub fn container_path(&self) -> Option<&Path> {
        self.container.as_ref().and_then(|c| c.path())
    }

    /// Release the container handle, consuming the document
    pub fn into_container(self) -> Option<Box<dyn Container>> {
        self.container
    }

    /// Total resident content size across pages
    pub fn resident_bytes(&self) -> usize {
        self.pages.iter().map(|p| p.resident_bytes).sum()
    }

    /// Clear sticky load errors ahead of a save under a new name.
    ///
    /// If any page failed to load, every other page is loaded and the failed
    /// ones become blank resident pages. Returns whether errors were found.
    pub fn check_and_clear_errors(&mut self) -> bool {
        if !self.pages.iter().any(|p| p.state == LoadState::LoadError) {
            return false;
        }

        for idx in 0..self.pages.len() {
            if let Err(e) = self.load_if_needed(idx) {
                tracing::debug!(page = idx, error = %e, "page still unreadable");
            }
        }
        for page in &mut self.pages {
            page.file_name = None;
            if page.state == LoadState::LoadError {
                page.set_loaded(None, 0);
            }
        }
        true
    }

    /// Load a page without any memory check
    pub(crate) fn load_if_needed(&mut self, idx: usize) -> Result<()> {
        let page = self.pages.get(idx).ok_or(InkError::InvalidPage(idx))?;
        match page.state {
            LoadState::Loaded => Ok(()),
            LoadState::LoadError => Err(InkError::PageLoad {
                page: idx,
                reason: "page previously failed to load".to_string(),
            }),
            LoadState::NotLoaded => self.load_page(idx),
        }
    }
}

impl<C: PayloadCodec + Default> Default for Document<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

//! Document Load
//!
//! Opening a container and bringing single pages into memory.
//!
//! ## Load Order
//! 1. Zero-length input: a fresh document
//! 2. gzip with a usable index: pages are created unloaded from the manifest
//! 3. gzip without one: inflate everything and build pages eagerly
//! 4. Plain logical stream: inline or linked form
//! 5. Numbered page files next to the named file
//!
//! Anything else, or nothing recovered, is fatal.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::container::{inflate_all, read_block, read_index, BlockIndex, Container, GZIP_MAGIC};
use crate::document::format::{self, Frame, PageFrame, FORMAT_VERSION};
use crate::document::{Document, LoadState, Page, PageProps, PayloadCodec, StorageFormat};
use crate::error::{DecodeError, InkError, Result};

use super::legacy;
use super::{LoadOutcome, Loaded};

/// What a pass over a decoded logical stream found
#[derive(Debug, Default)]
pub(crate) struct FrameSummary {
    pub has_header: bool,
    pub has_links: bool,
    pub version: u32,
    /// Any frame or page failed to decode
    pub damaged: bool,
}

impl FrameSummary {
    /// Turn what was found into a load result
    pub fn outcome(&self, pages: usize) -> Result<LoadOutcome> {
        if pages == 0 && !(self.has_header && !self.damaged) {
            return Err(InkError::LoadFatal("no pages could be recovered".to_string()));
        }
        Ok(if self.damaged {
            LoadOutcome::NonFatal
        } else if self.version > FORMAT_VERSION {
            LoadOutcome::NewerVersion
        } else if !self.has_header {
            LoadOutcome::NonWritable
        } else {
            LoadOutcome::Ok
        })
    }
}

impl<C: PayloadCodec> Document<C> {
    /// Open a document, taking ownership of `container` whatever happens.
    ///
    /// A load that recovers nothing is `Err(InkError::LoadFatal)`.
    pub fn load(mut container: Box<dyn Container>, codec: C) -> Result<Loaded<C>> {
        let mut doc = Document::new(codec);

        let len = container.seek(SeekFrom::End(0))?;
        container.seek(SeekFrom::Start(0))?;
        if len == 0 {
            doc.format = container
                .path()
                .map(StorageFormat::for_path)
                .unwrap_or(StorageFormat::Block);
            doc.container = Some(container);
            info!("empty container, starting a new document");
            return Ok(Loaded {
                document: doc,
                outcome: LoadOutcome::EmptyDocument,
            });
        }

        let mut magic = [0u8; 3];
        let is_gzip = len >= 3 && {
            container.read_exact(&mut magic)?;
            magic == GZIP_MAGIC
        };
        container.seek(SeekFrom::Start(0))?;

        if is_gzip {
            doc.format = StorageFormat::Block;
            doc.container = Some(container);
            let outcome = doc.load_block_container()?;
            return Ok(Loaded {
                document: doc,
                outcome,
            });
        }

        let mut bytes = Vec::new();
        container.read_to_end(&mut bytes)?;
        let index_path = container.path().map(Path::to_path_buf);

        if format::looks_like_stream(&bytes) {
            let base_dir = index_path.as_deref().and_then(Path::parent);
            let summary = doc.load_frames(&bytes, true, base_dir);
            match summary.outcome(doc.pages.len()) {
                Ok(outcome) => {
                    doc.format = if summary.has_links {
                        StorageFormat::Linked
                    } else {
                        StorageFormat::Inline
                    };
                    doc.container = Some(container);
                    info!(pages = doc.pages.len(), ?outcome, format = ?doc.format, "loaded");
                    return Ok(Loaded {
                        document: doc,
                        outcome,
                    });
                }
                Err(e) => warn!(error = %e, "logical stream unusable"),
            }
            doc.pages.clear();
            doc.config.clear();
        }

        if let Some(path) = index_path.as_deref() {
            let recovered = doc.load_numbered_pages(path);
            if recovered > 0 {
                warn!(pages = recovered, "recovered numbered page files");
                doc.format = StorageFormat::Linked;
                doc.container = Some(container);
                return Ok(Loaded {
                    document: doc,
                    outcome: LoadOutcome::NonFatal,
                });
            }
        }

        Err(InkError::LoadFatal("unrecognized document format".to_string()))
    }

    /// Index first; on any doubt, inflate the whole stream
    fn load_block_container(&mut self) -> Result<LoadOutcome> {
        let container = self.container.as_mut().ok_or(InkError::NoContainer)?;
        if let Some(index) = read_index(&mut **container)? {
            match self.load_from_index(index) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "block index unusable, inflating whole container"),
            }
        } else {
            debug!("no block index, inflating whole container");
        }
        self.load_full_stream()
    }

    /// Build unloaded pages from the manifest block alone
    fn load_from_index(&mut self, index: BlockIndex) -> Result<LoadOutcome> {
        let block = index
            .manifest_block()
            .ok_or_else(|| InkError::Format("index has no manifest block".to_string()))?;
        let (from, to) = index
            .span(block)
            .ok_or_else(|| InkError::Format("manifest block outside index".to_string()))?;

        let mut bytes = Vec::new();
        {
            let container = self.container.as_mut().ok_or(InkError::NoContainer)?;
            read_block(&mut **container, &from, &to, &mut bytes)?;
        }

        let manifest = match format::decode_frame(&bytes)? {
            (Frame::Manifest(manifest), _) => manifest,
            _ => return Err(InkError::Format("last block is not a manifest".to_string())),
        };
        if Some(manifest.page_sizes.len()) != index.page_count() {
            return Err(InkError::Format(format!(
                "manifest lists {} pages but index has {} page blocks",
                manifest.page_sizes.len(),
                index.page_count().unwrap_or(0)
            )));
        }

        self.pages = manifest
            .page_sizes
            .iter()
            .enumerate()
            .map(|(idx, &(width, height))| Page::unloaded(PageProps::new(width, height), idx + 1))
            .collect();
        self.config = manifest.config;
        self.format_version = manifest.format_version;
        self.block_index = index;

        info!(pages = self.pages.len(), version = self.format_version, "loaded from block index");
        Ok(if self.format_version > FORMAT_VERSION {
            LoadOutcome::NewerVersion
        } else {
            LoadOutcome::Ok
        })
    }

    /// Inflate everything and build every page eagerly
    fn load_full_stream(&mut self) -> Result<LoadOutcome> {
        let container = self.container.as_mut().ok_or(InkError::NoContainer)?;
        let inflated = inflate_all(&mut **container)?;
        if let Some(e) = &inflated.error {
            warn!(error = %e, recovered = inflated.data.len(), "container damaged");
        }
        if inflated.data.is_empty() {
            return Err(InkError::LoadFatal(
                inflated.error.unwrap_or_else(|| "container decompresses to nothing".to_string()),
            ));
        }

        self.block_index.clear();
        let summary = self.load_frames(&inflated.data, inflated.is_clean(), None);
        let outcome = summary.outcome(self.pages.len())?;
        info!(pages = self.pages.len(), ?outcome, "loaded by full decompression");
        Ok(outcome)
    }

    /// Build pages from a decoded logical stream. Page frames are loaded
    /// eagerly; link frames become unloaded pages backed by their file.
    pub(crate) fn load_frames(
        &mut self,
        bytes: &[u8],
        clean: bool,
        base_dir: Option<&Path>,
    ) -> FrameSummary {
        let parsed = format::decode_stream(bytes);
        let mut summary = FrameSummary {
            damaged: !clean,
            ..FrameSummary::default()
        };
        if let Some(e) = &parsed.error {
            warn!(error = %e, frames = parsed.frames.len(), "logical stream truncated");
            summary.damaged = true;
        }

        for frame in parsed.frames {
            match frame {
                Frame::Header(header) => {
                    summary.has_header = true;
                    summary.version = summary.version.max(header.version);
                }
                Frame::Page(page) => {
                    let idx = self.pages.len();
                    self.pages.push(Page::blank(page.props.clone()));
                    if self.apply_page_frame(idx, page).is_err() {
                        summary.damaged = true;
                    }
                }
                Frame::Link(link) => {
                    summary.has_links = true;
                    let file = match base_dir {
                        Some(dir) => dir.join(&link.file),
                        None => PathBuf::from(&link.file),
                    };
                    let idx = self.pages.len();
                    let props = PageProps::new(link.width, link.height);
                    self.pages.push(Page::linked(props, file));
                    // No size recorded: the page file is the only source for it
                    if !(link.width > 0.0 && link.height > 0.0) && self.load_page(idx).is_err() {
                        summary.damaged = true;
                    }
                }
                Frame::Manifest(manifest) => {
                    summary.version = summary.version.max(manifest.format_version);
                    self.config = manifest.config;
                }
            }
        }

        if summary.version != 0 {
            self.format_version = summary.version;
        }
        summary
    }

    /// Load `<stem>_page001.page`, `<stem>_page002.page`, ... next to `path`
    fn load_numbered_pages(&mut self, path: &Path) -> usize {
        for file in legacy::numbered_page_files(path) {
            let idx = self.pages.len();
            self.pages.push(Page::linked(PageProps::new(0.0, 0.0), file));
            if let Err(e) = self.load_page(idx) {
                debug!(page = idx, error = %e, "numbered page file unreadable");
            }
        }
        self.pages.iter().filter(|p| p.is_loaded()).count()
    }

    // =========================================================================
    // Single Pages
    // =========================================================================

    /// Bring one page's content into memory.
    ///
    /// Block-backed pages are read through the index. If that read fails
    /// the index is no longer trusted: the whole container is inflated once,
    /// every unloaded page is materialized from it, and the index is dropped.
    pub fn load_page(&mut self, idx: usize) -> Result<()> {
        let page = self.pages.get(idx).ok_or(InkError::InvalidPage(idx))?;
        if page.state == LoadState::Loaded {
            return Ok(());
        }

        match (page.block_idx, page.file_name.clone()) {
            (Some(block), _) if !self.block_index.is_empty() => self.load_block_page(idx, block),
            (_, Some(file)) => self.load_file_page(idx, &file),
            _ => {
                self.pages[idx].set_load_error();
                Err(InkError::PageLoad {
                    page: idx,
                    reason: "page has no stored content".to_string(),
                })
            }
        }
    }

    fn load_block_page(&mut self, idx: usize, block: usize) -> Result<()> {
        let mut bytes = Vec::new();
        let read = match (self.block_index.span(block), self.container.as_mut()) {
            (Some((from, to)), Some(container)) => {
                read_block(&mut **container, &from, &to, &mut bytes)
            }
            (None, _) => Err(DecodeError::InvalidSpan(format!(
                "block {} not in index",
                block
            ))),
            (_, None) => return Err(InkError::NoContainer),
        };

        match read {
            Ok(()) => {
                debug!(page = idx, block, bytes = bytes.len(), "page block inflated");
                self.apply_page_bytes(idx, &bytes)
            }
            Err(e) => {
                warn!(page = idx, block, error = %e, "block read failed, inflating whole container");
                self.recover_from_full_stream()?;
                match self.pages[idx].state {
                    LoadState::Loaded => Ok(()),
                    _ => Err(InkError::PageLoad {
                        page: idx,
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    fn load_file_page(&mut self, idx: usize, file: &Path) -> Result<()> {
        let bytes = match fs::read(file) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pages[idx].set_load_error();
                return Err(InkError::PageLoad {
                    page: idx,
                    reason: format!("{}: {}", file.display(), e),
                });
            }
        };
        self.apply_page_bytes(idx, &bytes)
    }

    /// Decode a PAGE frame into page `idx`
    fn apply_page_bytes(&mut self, idx: usize, bytes: &[u8]) -> Result<()> {
        match format::decode_frame(bytes) {
            Ok((Frame::Page(page), _)) => self.apply_page_frame(idx, page),
            Ok(_) => {
                self.pages[idx].set_load_error();
                Err(InkError::PageLoad {
                    page: idx,
                    reason: "block does not hold a page".to_string(),
                })
            }
            Err(e) => {
                self.pages[idx].set_load_error();
                Err(InkError::PageLoad {
                    page: idx,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn apply_page_frame(&mut self, idx: usize, frame: PageFrame) -> Result<()> {
        let decoded = if frame.payload.is_empty() {
            Ok(None)
        } else {
            self.codec.decode(&frame.payload).map(Some)
        };

        match decoded {
            Ok(content) => {
                let resident = content.as_ref().map_or(0, |c| self.codec.resident_size(c));
                let page = &mut self.pages[idx];
                page.props = frame.props;
                page.set_loaded(content, resident);
                Ok(())
            }
            Err(e) => {
                self.pages[idx].set_load_error();
                Err(InkError::PageLoad {
                    page: idx,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Materialize every unloaded block-backed page from one full inflate,
    /// then forget the index
    fn recover_from_full_stream(&mut self) -> Result<()> {
        let container = self.container.as_mut().ok_or(InkError::NoContainer)?;
        let inflated = inflate_all(&mut **container)?;
        let parsed = format::decode_stream(&inflated.data);

        let mut page_frames: Vec<Option<PageFrame>> = parsed
            .frames
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Page(page) => Some(Some(page)),
                _ => None,
            })
            .collect();

        let mut recovered = 0;
        for idx in 0..self.pages.len() {
            let page = &self.pages[idx];
            if page.state != LoadState::NotLoaded {
                continue;
            }
            let Some(block) = page.block_idx else {
                continue;
            };
            // Page blocks are numbered from 1, in stream order
            let frame = block
                .checked_sub(1)
                .and_then(|at| page_frames.get_mut(at))
                .and_then(Option::take);
            match frame {
                Some(frame) => {
                    if self.apply_page_frame(idx, frame).is_ok() {
                        recovered += 1;
                    }
                }
                None => self.pages[idx].set_load_error(),
            }
        }

        self.block_index.clear();
        for page in &mut self.pages {
            page.block_idx = None;
        }
        warn!(recovered, "block index dropped after full decompression");
        Ok(())
    }
}

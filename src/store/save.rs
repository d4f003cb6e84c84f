//! Document Save
//!
//! Full and partial rewrites of the block container.

use std::io::{self, Seek, SeekFrom, Write};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::container::{
    append_block, patch_index, write_header, write_trailer, BlockIndex, BlockRecord, Container,
    RollingChecksum,
};
use crate::document::format::{self, Manifest, FORMAT_VERSION};
use crate::document::{Document, PayloadCodec, StorageFormat};
use crate::error::{InkError, Result, SaveError};

use super::{ManifestExtras, SaveFlags};

/// Everything a rewrite emits, encoded before the container is touched
struct EncodedBlocks {
    /// First page being written
    start: usize,
    header: Vec<u8>,
    pages: Vec<Vec<u8>>,
    manifest: Vec<u8>,
}

impl<C: PayloadCodec> Document<C> {
    /// Save the document.
    ///
    /// `target` is a different container to save into (save-as); `None`
    /// saves into the document's own container. A supplied container is
    /// adopted only on success; on failure it is handed back inside the
    /// `SaveError`. The format is the document's current one, or the linked
    /// multi-file form with `MULTIFILE`.
    pub fn save(
        &mut self,
        target: Option<Box<dyn Container>>,
        extras: &ManifestExtras,
        flags: SaveFlags,
        config: &Config,
    ) -> std::result::Result<(), SaveError> {
        let format = if flags.contains(SaveFlags::MULTIFILE) {
            StorageFormat::Linked
        } else {
            self.format
        };
        self.save_as(target, format, extras, flags, config)
    }

    /// Save in an explicit storage format
    pub fn save_as(
        &mut self,
        target: Option<Box<dyn Container>>,
        format: StorageFormat,
        extras: &ManifestExtras,
        flags: SaveFlags,
        config: &Config,
    ) -> std::result::Result<(), SaveError> {
        if target.is_none() {
            if flags.contains(SaveFlags::COPY) {
                return Err(SaveError::new(
                    InkError::Config("a copy needs a target container".to_string()),
                    None,
                ));
            }
            if self.container.is_none() {
                return Err(SaveError::new(InkError::NoContainer, None));
            }
            if !flags.contains(SaveFlags::FORCE) && !self.is_modified() && format == self.format {
                debug!("document unchanged, nothing to save");
                return Ok(());
            }
        }

        match format {
            StorageFormat::Block => self.save_block(target, extras, flags, config),
            StorageFormat::Inline => self.save_inline(target, extras, flags),
            StorageFormat::Linked => self.save_linked(target, extras, flags),
        }
    }

    fn save_block(
        &mut self,
        target: Option<Box<dyn Container>>,
        extras: &ManifestExtras,
        flags: SaveFlags,
        config: &Config,
    ) -> std::result::Result<(), SaveError> {
        let copy = flags.contains(SaveFlags::COPY);
        let same_container = target.is_none();

        let pivot = if flags.contains(SaveFlags::PARTIAL)
            && same_container
            && self.format == StorageFormat::Block
            && !self.block_index.is_empty()
        {
            self.find_pivot()
        } else {
            None
        };
        let start = pivot.unwrap_or(0);

        // Every page from the pivot on is re-emitted, possibly at a new
        // position, so it has to be resident even if it is clean
        if let Err(e) = self.load_from(start) {
            return Err(SaveError::new(e, target));
        }
        let encoded = match self.encode_blocks(start, extras) {
            Ok(encoded) => encoded,
            Err(e) => return Err(SaveError::new(e, target)),
        };

        let mut out = match target {
            Some(t) => t,
            None => match self.container.take() {
                Some(c) => c,
                None => return Err(SaveError::new(InkError::NoContainer, None)),
            },
        };

        let level = config.compression_level;
        let written = match pivot {
            Some(pivot) => write_partial(&mut *out, &self.block_index, pivot, &encoded, level),
            None => write_full(&mut *out, config.max_index_records, &encoded, level),
        };

        let index = match written {
            Ok(index) => index,
            Err(e) => {
                let e = InkError::from(e);
                debug!(pivot = start, "block container write failed");
                if same_container {
                    self.recover_failed_write(&mut *out, pivot);
                }
                return self.hand_back(out, same_container, e);
            }
        };

        if copy {
            info!(pages = self.pages.len(), "saved copy");
            return Ok(());
        }

        for (idx, page) in self.pages.iter_mut().enumerate().skip(start) {
            page.set_written(Some(idx + 1));
            page.file_name = None;
        }
        info!(
            pages = self.pages.len(),
            rewritten = self.pages.len() - start,
            partial = pivot.is_some(),
            bytes = index.last().map(|r| r.end_offset).unwrap_or(0),
            "saved block container"
        );
        self.block_index = index;
        self.dirty_count = 0;
        self.format = StorageFormat::Block;
        // Replaces (and releases) any previously owned container
        self.container = Some(out);
        Ok(())
    }

    /// First page that is dirty or no longer sits in the block it was written
    /// to. `None` if the index cannot seed a rewrite from there.
    pub(crate) fn find_pivot(&self) -> Option<usize> {
        let pivot = self
            .pages
            .iter()
            .enumerate()
            .position(|(idx, page)| page.dirty_count != 0 || page.block_idx != Some(idx + 1))
            .unwrap_or(self.pages.len());

        // The seed is record[pivot]: the header or a page block, never the manifest.
        // After a failed write the index ends at the last block still on disk.
        if pivot < self.block_index.len() {
            Some(pivot)
        } else {
            debug!(pivot, records = self.block_index.len(), "pivot beyond index, full rewrite");
            None
        }
    }

    /// Load every page from `start` on, failing on the first unreadable page
    pub(crate) fn load_from(&mut self, start: usize) -> Result<()> {
        for idx in start..self.pages.len() {
            self.load_if_needed(idx)?;
        }
        Ok(())
    }

    fn encode_blocks(&self, start: usize, extras: &ManifestExtras) -> Result<EncodedBlocks> {
        let mut pages = Vec::with_capacity(self.pages.len().saturating_sub(start));
        for page in &self.pages[start..] {
            let payload = match &page.content {
                Some(content) => self.codec.encode(content)?,
                None => Vec::new(),
            };
            pages.push(format::encode_page(&page.props, payload)?);
        }

        let manifest = format::encode_manifest(&self.build_manifest(extras))?;
        Ok(EncodedBlocks {
            start,
            header: format::encode_header()?,
            pages,
            manifest,
        })
    }

    pub(crate) fn build_manifest(&self, extras: &ManifestExtras) -> Manifest {
        let mut manifest = Manifest {
            format_version: FORMAT_VERSION,
            page_sizes: self.pages.iter().map(|p| (p.props.width, p.props.height)).collect(),
            config: self.config.clone(),
            thumbnail: None,
        };
        manifest.set_thumbnail(extras.thumbnail.as_deref());
        manifest
    }

    /// Leave the document consistent after a failed write into its own
    /// container: nothing before the pivot offset was touched, everything
    /// after it is discarded.
    fn recover_failed_write(&mut self, out: &mut dyn Container, pivot: Option<usize>) {
        let keep = pivot.and_then(|p| self.block_index.get(p).map(|r| (p, r.end_offset)));
        let (first_unwritten, truncate_to) = match keep {
            Some((p, offset)) => (p, u64::from(offset)),
            None => (0, 0),
        };

        if let Err(e) = out.truncate(truncate_to) {
            warn!(offset = truncate_to, error = %e, "could not truncate after failed save");
        }
        match keep {
            Some((p, _)) => self.block_index.truncate(p + 1),
            None => self.block_index.clear(),
        }
        for page in &mut self.pages[first_unwritten..] {
            page.block_idx = None;
        }
    }

    /// Put back whichever container a failed save was using
    pub(crate) fn hand_back(
        &mut self,
        out: Box<dyn Container>,
        same_container: bool,
        error: InkError,
    ) -> std::result::Result<(), SaveError> {
        warn!(error = %error, "save failed");
        if same_container {
            self.container = Some(out);
            Err(SaveError::new(error, None))
        } else {
            Err(SaveError::new(error, Some(out)))
        }
    }
}

/// Write a complete container from scratch
fn write_full(
    out: &mut dyn Container,
    capacity: usize,
    encoded: &EncodedBlocks,
    level: u32,
) -> io::Result<BlockIndex> {
    out.truncate(0)?;
    out.seek(SeekFrom::Start(0))?;

    let layout = write_header(out, capacity)?;
    let mut index = BlockIndex::new(layout);
    let mut checksum = RollingChecksum::new();

    checksum = append_recorded(out, &encoded.header, checksum, level, false, &mut index)?;
    finish_blocks(out, encoded, checksum, level, index)
}

/// Rewrite from the pivot page on, leaving every earlier byte alone
fn write_partial(
    out: &mut dyn Container,
    current: &BlockIndex,
    pivot: usize,
    encoded: &EncodedBlocks,
    level: u32,
) -> io::Result<BlockIndex> {
    let seed = *current
        .get(pivot)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "pivot outside block index"))?;
    debug_assert_eq!(encoded.start, pivot);

    let mut index = current.clone();
    index.truncate(pivot + 1);
    out.seek(SeekFrom::Start(u64::from(seed.end_offset)))?;
    debug!(pivot, offset = seed.end_offset, "partial rewrite");

    finish_blocks(out, encoded, seed.checksum(), level, index)
}

/// Page blocks, manifest, trailer, index patch, truncate
fn finish_blocks(
    out: &mut dyn Container,
    encoded: &EncodedBlocks,
    mut checksum: RollingChecksum,
    level: u32,
    mut index: BlockIndex,
) -> io::Result<BlockIndex> {
    for page in &encoded.pages {
        checksum = append_recorded(out, page, checksum, level, false, &mut index)?;
    }
    checksum = append_recorded(out, &encoded.manifest, checksum, level, true, &mut index)?;

    write_trailer(out, checksum)?;
    let end = out.stream_position()?;

    let layout = *index.layout();
    if !patch_index(out, &layout, index.records())? {
        warn!(
            records = index.len(),
            capacity = layout.capacity,
            "too many pages for the header index; loads will inflate the whole file"
        );
    }

    // Drop stale bytes left over from a longer previous version
    out.truncate(end)?;
    out.flush()?;
    out.sync()?;
    Ok(index)
}

fn append_recorded(
    out: &mut dyn Container,
    bytes: &[u8],
    checksum: RollingChecksum,
    level: u32,
    finish: bool,
    index: &mut BlockIndex,
) -> io::Result<RollingChecksum> {
    let (checksum, written) = append_block(out, bytes, checksum, level, finish)?;
    let end = out.stream_position()?;
    let end = u32::try_from(end)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "container larger than 4 GiB"))?;

    tracing::trace!(block = index.len(), raw = bytes.len(), written, end, "block");
    index.push(BlockRecord::new(end, checksum));
    Ok(checksum)
}

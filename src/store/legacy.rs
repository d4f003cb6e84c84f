//! Inline and linked forms
//!
//! The inline form is the uncompressed logical stream in one file. The
//! linked form splits it: the named file holds the header, one LINK frame
//! per page and the manifest, and every page lives in its own
//! `<stem>_pageNNN.page` file next to it holding a single PAGE frame.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::container::Container;
use crate::document::format::{self, PageLink};
use crate::document::{Document, PayloadCodec, StorageFormat};
use crate::error::{InkError, Result, SaveError};

use super::{ManifestExtras, SaveFlags};

/// Path of page file `number` (1-based) belonging to the index file `index_path`
pub fn page_file_path(index_path: &Path, number: usize) -> PathBuf {
    let stem = index_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    index_path.with_file_name(format!("{}_page{:03}.page", stem, number))
}

/// Consecutive existing page files for `index_path`, starting at number 1
pub(crate) fn numbered_page_files(index_path: &Path) -> Vec<PathBuf> {
    numbered_page_files_from(index_path, 1)
}

impl<C: PayloadCodec> Document<C> {
    pub(crate) fn save_inline(
        &mut self,
        target: Option<Box<dyn Container>>,
        extras: &ManifestExtras,
        flags: SaveFlags,
    ) -> std::result::Result<(), SaveError> {
        let bytes = match self.load_from(0).and_then(|_| self.encode_inline(extras)) {
            Ok(bytes) => bytes,
            Err(e) => return Err(SaveError::new(e, target)),
        };

        let same_container = target.is_none();
        let mut out = match target.or_else(|| self.container.take()) {
            Some(out) => out,
            None => return Err(SaveError::new(InkError::NoContainer, None)),
        };

        if let Err(e) = rewrite_whole(&mut *out, &bytes) {
            return self.hand_back(out, same_container, e.into());
        }
        if flags.contains(SaveFlags::COPY) {
            return Ok(());
        }

        for page in &mut self.pages {
            page.set_written(None);
            page.file_name = None;
        }
        self.block_index.clear();
        self.dirty_count = 0;
        self.format = StorageFormat::Inline;
        self.container = Some(out);
        info!(pages = self.pages.len(), bytes = bytes.len(), "saved inline document");
        Ok(())
    }

    fn encode_inline(&self, extras: &ManifestExtras) -> Result<Vec<u8>> {
        let mut bytes = format::encode_header()?;
        for page in &self.pages {
            let payload = match &page.content {
                Some(content) => self.codec.encode(content)?,
                None => Vec::new(),
            };
            bytes.extend_from_slice(&format::encode_page(&page.props, payload)?);
        }
        bytes.extend_from_slice(&format::encode_manifest(&self.build_manifest(extras))?);
        Ok(bytes)
    }

    pub(crate) fn save_linked(
        &mut self,
        target: Option<Box<dyn Container>>,
        extras: &ManifestExtras,
        flags: SaveFlags,
    ) -> std::result::Result<(), SaveError> {
        let same_container = target.is_none();
        let mut out = match target.or_else(|| self.container.take()) {
            Some(out) => out,
            None => return Err(SaveError::new(InkError::NoContainer, None)),
        };
        let Some(index_path) = out.path().map(Path::to_path_buf) else {
            return self.hand_back(
                out,
                same_container,
                InkError::Config("the linked form needs a file-backed container".to_string()),
            );
        };

        match self.write_linked(&mut *out, &index_path, extras, flags) {
            Ok(files) => {
                if flags.contains(SaveFlags::COPY) {
                    return Ok(());
                }
                for (page, file) in self.pages.iter_mut().zip(files) {
                    page.set_written(None);
                    page.file_name = Some(file);
                }
                self.block_index.clear();
                self.dirty_count = 0;
                self.format = StorageFormat::Linked;
                self.container = Some(out);
                info!(pages = self.pages.len(), index = %index_path.display(), "saved linked document");
                Ok(())
            }
            Err(e) => self.hand_back(out, same_container, e),
        }
    }

    /// Write changed page files, the index file, and remove stale page files.
    /// Returns the page file of every page, in order.
    fn write_linked(
        &mut self,
        out: &mut dyn Container,
        index_path: &Path,
        extras: &ManifestExtras,
        flags: SaveFlags,
    ) -> Result<Vec<PathBuf>> {
        let files: Vec<PathBuf> = (1..=self.pages.len())
            .map(|number| page_file_path(index_path, number))
            .collect();

        let rewrite_all = flags.contains(SaveFlags::FORCE) || flags.contains(SaveFlags::COPY);
        let stale: Vec<bool> = self
            .pages
            .iter()
            .zip(&files)
            .map(|(page, file)| {
                rewrite_all
                    || page.is_dirty()
                    || page.file_name.as_deref() != Some(file.as_path())
                    || !file.is_file()
            })
            .collect();

        // A page file about to be rewritten may still be the source of some
        // other unloaded page, so everything is brought in first
        if stale.iter().any(|&s| s) {
            self.load_from(0)?;
        }

        for (idx, file) in files.iter().enumerate() {
            if !stale[idx] {
                continue;
            }
            let page = &self.pages[idx];
            let payload = match &page.content {
                Some(content) => self.codec.encode(content)?,
                None => Vec::new(),
            };
            fs::write(file, format::encode_page(&page.props, payload)?)?;
            debug!(page = idx, file = %file.display(), "page file written");
        }

        let mut bytes = format::encode_header()?;
        for (page, file) in self.pages.iter().zip(&files) {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            bytes.extend_from_slice(&format::encode_link(&PageLink {
                file: name,
                width: page.props.width,
                height: page.props.height,
            })?);
        }
        bytes.extend_from_slice(&format::encode_manifest(&self.build_manifest(extras))?);
        rewrite_whole(out, &bytes)?;

        for extra in numbered_page_files_from(index_path, files.len() + 1) {
            if let Err(e) = fs::remove_file(&extra) {
                warn!(file = %extra.display(), error = %e, "could not remove stale page file");
            }
        }
        Ok(files)
    }
}

fn numbered_page_files_from(index_path: &Path, first: usize) -> Vec<PathBuf> {
    (first..)
        .map(|number| page_file_path(index_path, number))
        .take_while(|path| path.is_file())
        .collect()
}

fn rewrite_whole(out: &mut dyn Container, bytes: &[u8]) -> std::io::Result<()> {
    out.truncate(0)?;
    out.seek(SeekFrom::Start(0))?;
    out.write_all(bytes)?;
    out.sync()
}

//! Path-level entry points
//!
//! Opening and saving by file name, picking the storage format from the
//! extension, and pulling the thumbnail out without loading a document.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::config::Config;
use crate::container::{inflate_all, read_block, read_index, Container, FileContainer, GZIP_MAGIC};
use crate::document::format::{self, Frame};
use crate::document::{Document, PayloadCodec, StorageFormat};
use crate::error::{Result, SaveError};

use super::{LoadOutcome, Loaded, ManifestExtras, SaveFlags};

/// Open the document stored at `path`.
///
/// A missing file gives an empty document with no container yet; its format
/// follows the extension and `save_path` creates the file.
pub fn open_path<C: PayloadCodec>(path: impl AsRef<Path>, codec: C) -> Result<Loaded<C>> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no such file, new document");
        let mut document = Document::new(codec);
        document.format = StorageFormat::for_path(path);
        return Ok(Loaded {
            document,
            outcome: LoadOutcome::EmptyDocument,
        });
    }

    let container = FileContainer::open(path)?;
    let writable = container.is_writable();
    let mut loaded = Document::load(Box::new(container), codec)?;
    if !writable && loaded.outcome == LoadOutcome::Ok {
        loaded.outcome = LoadOutcome::NonWritable;
    }
    Ok(loaded)
}

/// Save `doc` to `path`: in place when it is the document's own file,
/// otherwise into a newly created file in the format its extension implies.
pub fn save_path<C: PayloadCodec>(
    doc: &mut Document<C>,
    path: impl AsRef<Path>,
    extras: &ManifestExtras,
    flags: SaveFlags,
    config: &Config,
) -> std::result::Result<(), SaveError> {
    let path = path.as_ref();
    if doc.container_path() == Some(path) {
        return doc.save(None, extras, flags, config);
    }

    let container = FileContainer::create(path).map_err(|e| SaveError::new(e.into(), None))?;
    let format = if flags.contains(SaveFlags::MULTIFILE) {
        StorageFormat::Linked
    } else {
        StorageFormat::for_path(path)
    };
    doc.save_as(Some(Box::new(container)), format, extras, flags, config)
}

/// Read the thumbnail image saved in the manifest, touching only the
/// manifest block when the container is indexed
pub fn extract_thumbnail(container: &mut dyn Container) -> Result<Option<Vec<u8>>> {
    if let Some(index) = read_index(container)? {
        if let Some((from, to)) = index.manifest_block().and_then(|block| index.span(block)) {
            let mut bytes = Vec::new();
            if read_block(container, &from, &to, &mut bytes).is_ok() {
                if let Ok((Frame::Manifest(manifest), _)) = format::decode_frame(&bytes) {
                    return manifest.thumbnail_bytes();
                }
            }
        }
        debug!("indexed manifest unreadable, scanning whole stream for thumbnail");
    }

    container.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 3];
    let n = container.read(&mut magic)?;
    let bytes = if n == magic.len() && magic == GZIP_MAGIC {
        inflate_all(container)?.data
    } else {
        container.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        container.read_to_end(&mut bytes)?;
        bytes
    };

    let manifest = format::decode_stream(&bytes)
        .frames
        .into_iter()
        .filter_map(|frame| match frame {
            Frame::Manifest(manifest) => Some(manifest),
            _ => None,
        })
        .last();
    match manifest {
        Some(manifest) => manifest.thumbnail_bytes(),
        None => Ok(None),
    }
}

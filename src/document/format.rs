//! Logical stream format
//!
//! What a container decompresses to, and what the inline form stores raw.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Tag (4)  │ Len (4)  │       Body (bincode)        │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Frames by Tag
//! - INKD: document header `{ version }`, one per stream, always first
//! - PAGE: `{ props, payload }`, one per page in reading order
//! - LINK: `{ file, width, height }`, linked multi-file index only
//! - MANI: manifest `{ format_version, page_sizes, config, thumbnail }`

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{InkError, Result};

use super::PageProps;

/// Highest format version this engine reads and the version it writes
pub const FORMAT_VERSION: u32 = 2;

/// Frame header size: tag (4) + body length (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum frame body size (256 MB)
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

pub const TAG_HEADER: [u8; 4] = *b"INKD";
pub const TAG_PAGE: [u8; 4] = *b"PAGE";
pub const TAG_LINK: [u8; 4] = *b"LINK";
pub const TAG_MANIFEST: [u8; 4] = *b"MANI";

// =============================================================================
// Frame Bodies
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocHeader {
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFrame {
    pub props: PageProps,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    /// File name relative to the index file's directory
    pub file: String,
    pub width: f32,
    pub height: f32,
}

/// Trailing block: everything needed to open a document without reading pages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// (width, height) per page, in page order
    pub page_sizes: Vec<(f32, f32)>,
    /// Opaque key/value document configuration
    pub config: BTreeMap<String, String>,
    /// Base64 of the thumbnail image, if one was saved
    pub thumbnail: Option<String>,
}

impl Manifest {
    pub fn set_thumbnail(&mut self, image: Option<&[u8]>) {
        self.thumbnail = image.map(|bytes| STANDARD.encode(bytes));
    }

    pub fn thumbnail_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.thumbnail
            .as_deref()
            .map(|encoded| {
                STANDARD
                    .decode(encoded)
                    .map_err(|e| InkError::Format(format!("bad thumbnail encoding: {}", e)))
            })
            .transpose()
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Header(DocHeader),
    Page(PageFrame),
    Link(PageLink),
    Manifest(Manifest),
}

// =============================================================================
// Encoding/Decoding
// =============================================================================

pub fn encode_header() -> Result<Vec<u8>> {
    encode_frame(TAG_HEADER, &DocHeader { version: FORMAT_VERSION })
}

pub fn encode_page(props: &PageProps, payload: Vec<u8>) -> Result<Vec<u8>> {
    encode_frame(TAG_PAGE, &PageFrame { props: props.clone(), payload })
}

pub fn encode_link(link: &PageLink) -> Result<Vec<u8>> {
    encode_frame(TAG_LINK, link)
}

pub fn encode_manifest(manifest: &Manifest) -> Result<Vec<u8>> {
    encode_frame(TAG_MANIFEST, manifest)
}

fn encode_frame<T: Serialize>(tag: [u8; 4], body: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(body)?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(InkError::Format(format!(
            "frame too large: {} bytes (max {})",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&tag);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns the frame and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize)> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(InkError::Format(format!(
            "incomplete frame header: expected {} bytes, got {}",
            FRAME_HEADER_SIZE,
            bytes.len()
        )));
    }

    let tag = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let body_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if body_len > MAX_FRAME_SIZE {
        return Err(InkError::Format(format!(
            "frame too large: {} bytes (max {})",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let total = FRAME_HEADER_SIZE + body_len as usize;
    if bytes.len() < total {
        return Err(InkError::Format(format!(
            "incomplete frame body: expected {} bytes, got {}",
            total,
            bytes.len()
        )));
    }
    let body = &bytes[FRAME_HEADER_SIZE..total];

    let frame = match tag {
        TAG_HEADER => Frame::Header(bincode::deserialize(body)?),
        TAG_PAGE => Frame::Page(bincode::deserialize(body)?),
        TAG_LINK => Frame::Link(bincode::deserialize(body)?),
        TAG_MANIFEST => Frame::Manifest(bincode::deserialize(body)?),
        _ => {
            return Err(InkError::Format(format!(
                "unknown frame tag: {:?}",
                String::from_utf8_lossy(&tag)
            )))
        }
    };
    Ok((frame, total))
}

/// Result of decoding a whole logical stream
#[derive(Debug, Default)]
pub struct ParsedStream {
    pub frames: Vec<Frame>,
    /// First decode error; frames before it are kept
    pub error: Option<InkError>,
}

/// Decode frames until the input ends or a frame fails to decode
pub fn decode_stream(bytes: &[u8]) -> ParsedStream {
    let mut parsed = ParsedStream::default();
    let mut pos = 0;
    while pos < bytes.len() {
        match decode_frame(&bytes[pos..]) {
            Ok((frame, used)) => {
                parsed.frames.push(frame);
                pos += used;
            }
            Err(e) => {
                parsed.error = Some(e);
                break;
            }
        }
    }
    parsed
}

/// Does `bytes` start like a logical stream (any known frame tag)?
pub fn looks_like_stream(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && [TAG_HEADER, TAG_PAGE, TAG_LINK].iter().any(|tag| bytes[..4] == tag[..])
}

//! Payload codec
//!
//! The ink content of a page is opaque to the engine. A collaborator codec
//! turns it into bytes for a page block and back.

use bytes::Bytes;

use crate::error::Result;

/// Serializes one page's content to and from bytes
pub trait PayloadCodec {
    /// In-memory representation of a page's content
    type Content;

    fn encode(&self, content: &Self::Content) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Content>;

    /// Approximate resident size, used by the paging policy's memory budget
    fn resident_size(&self, content: &Self::Content) -> usize;
}

/// Identity codec: the content is the payload bytes themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPayloadCodec;

impl PayloadCodec for RawPayloadCodec {
    type Content = Bytes;

    fn encode(&self, content: &Bytes) -> Result<Vec<u8>> {
        Ok(content.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn resident_size(&self, content: &Bytes) -> usize {
        content.len()
    }
}

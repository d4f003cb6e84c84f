//! Error types for inkstore
//!
//! Provides a unified error type for all operations, plus the narrower
//! `DecodeError` returned by block reads and the `SaveError` that hands a
//! caller-supplied container back when a save fails.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::container::Container;

/// Result type alias using InkError
pub type Result<T> = std::result::Result<T, InkError>;

/// Unified error type for inkstore operations
#[derive(Debug, Error)]
pub enum InkError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Container Errors
    // -------------------------------------------------------------------------
    #[error("Block decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid container format: {0}")]
    Format(String),

    #[error("Document has no container")]
    NoContainer,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Payload codec error: {0}")]
    Payload(String),

    // -------------------------------------------------------------------------
    // Document Errors
    // -------------------------------------------------------------------------
    #[error("Page {page} failed to load: {reason}")]
    PageLoad { page: usize, reason: String },

    #[error("Page index out of range: {0}")]
    InvalidPage(usize),

    #[error("Nothing usable could be loaded: {0}")]
    LoadFatal(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for InkError {
    fn from(e: bincode::Error) -> Self {
        InkError::Serialization(e.to_string())
    }
}

/// Failure to decompress a span of the container between two block records.
///
/// Any of these means the embedded index cannot be trusted.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("premature end of container: expected {expected} bytes, got {actual}")]
    PrematureEof { expected: u64, actual: u64 },

    #[error("inflate failed: {0}")]
    Inflate(String),

    #[error("block checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("block length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u32, actual: u32 },

    #[error("invalid block span: {0}")]
    InvalidSpan(String),

    #[error("seek failed: {0}")]
    Seek(io::Error),

    #[error("read failed: {0}")]
    Io(io::Error),
}

/// A failed save.
///
/// `save()` only takes ownership of a caller-supplied container when it
/// succeeds; on failure the container comes back here.
pub struct SaveError {
    pub error: InkError,
    pub container: Option<Box<dyn Container>>,
}

impl SaveError {
    pub(crate) fn new(error: InkError, container: Option<Box<dyn Container>>) -> Self {
        Self { error, container }
    }

    /// Take back the container that was passed to `save()`, if any.
    pub fn into_container(self) -> Option<Box<dyn Container>> {
        self.container
    }
}

impl From<InkError> for SaveError {
    fn from(error: InkError) -> Self {
        Self::new(error, None)
    }
}

impl fmt::Debug for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveError")
            .field("error", &self.error)
            .field("container_returned", &self.container.is_some())
            .finish()
    }
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "save failed: {}", self.error)
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

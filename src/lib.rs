//! # inkstore
//!
//! Paged storage engine for handwritten-note documents:
//! - gzip-compatible block container with its index in the header extra field
//! - Partial rewrites from the first changed page, leaving earlier bytes alone
//! - Lazy page loading with farthest-from-view eviction
//! - Fallback loading when the index is missing or damaged
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Editing / Viewing                        │
//! │            (page content through a PayloadCodec)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Document + Pages                           │
//! │         (dirty counts, block references, config)             │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │      Store      │                │     Paging      │
//!   │ (save / load)   │                │ (lazy + evict)  │
//!   └────────┬────────┘                └─────────────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐
//!   │    Container    │
//!   │ (gzip blocks +  │
//!   │  header index)  │
//!   └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod container;
pub mod document;
pub mod store;
pub mod paging;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{InkError, Result, SaveError};
pub use config::Config;
pub use container::{Container, FileContainer};
pub use document::{Document, LoadState, Page, PageId, PageProps, PayloadCodec, RawPayloadCodec, StorageFormat};
pub use paging::{EvictionReport, PagingPolicy};
pub use store::{LoadOutcome, Loaded, ManifestExtras, SaveFlags};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of inkstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

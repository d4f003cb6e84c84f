//! Configuration for inkstore
//!
//! Centralized configuration with sensible defaults. Nothing here is global:
//! a `Config` is passed explicitly into `save()` and into the paging policy.

use crate::container::MAX_INDEX_RECORDS;

/// Main configuration for saving and paging documents
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Paging Configuration
    // -------------------------------------------------------------------------
    /// Resident page-content budget in bytes. When exceeded, clean pages far
    /// from the current view are unloaded until usage drops below half.
    /// `0` disables eviction.
    pub memory_limit: usize,

    // -------------------------------------------------------------------------
    // Container Configuration
    // -------------------------------------------------------------------------
    /// Deflate level (0-9) used for every block
    pub compression_level: u32,

    /// Number of block records reserved in the gzip header extra field.
    /// Documents needing more (pages + 2) are written without an index.
    pub max_index_records: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_limit: 0,
            compression_level: 2,
            max_index_records: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the resident memory limit (in bytes, 0 = unlimited)
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    /// Set the deflate compression level (clamped to 0-9)
    pub fn compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level.min(9);
        self
    }

    /// Set the index capacity (clamped to what the gzip extra field can hold)
    pub fn max_index_records(mut self, count: usize) -> Self {
        self.config.max_index_records = count.min(MAX_INDEX_RECORDS);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

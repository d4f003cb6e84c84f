//! Paging Module
//!
//! Lazy page loading plus a memory budget for resident page content.
//!
//! ## Eviction Order
//! ```text
//!   page:   0   1   2   3   4   5   6   7   8   9
//!           ▲                               ▲   ▲
//!         front ──►                  ◄── back  protect
//! ```
//! Two cursors walk in from both ends toward the protected page; whichever
//! is farther from it goes next. Only clean, reloadable pages are unloaded.
//! The sweep runs once usage reaches the limit and stops below half of it.

use tracing::{debug, trace};

use crate::config::Config;
use crate::document::{Document, LoadState, Page, PayloadCodec};
use crate::error::Result;

/// Memory budget for resident page content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPolicy {
    memory_limit: usize,
}

/// What one eviction sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Unloaded pages, in eviction order
    pub evicted: Vec<usize>,
    pub resident_before: usize,
    pub resident_after: usize,
}

impl PagingPolicy {
    /// `memory_limit` of 0 disables eviction
    pub fn new(memory_limit: usize) -> Self {
        Self { memory_limit }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.memory_limit)
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn is_enabled(&self) -> bool {
        self.memory_limit != 0
    }

    /// Unload pages farthest from `protect` until usage drops below half
    /// the limit. `indexed` says whether block-backed pages can be read back.
    pub fn sweep<T>(&self, pages: &mut [Page<T>], protect: usize, indexed: bool) -> EvictionReport {
        let resident: usize = pages.iter().map(|p| p.resident_bytes).sum();
        let mut report = EvictionReport {
            evicted: Vec::new(),
            resident_before: resident,
            resident_after: resident,
        };
        if !self.is_enabled() || pages.is_empty() || resident < self.memory_limit {
            return report;
        }

        let protect = protect.min(pages.len() - 1);
        let target = self.memory_limit / 2;
        let mut usage = resident;
        let (mut front, mut back) = (0, pages.len() - 1);

        while usage > target && !(front == protect && back == protect) {
            let idx = if protect - front > back - protect {
                front += 1;
                front - 1
            } else {
                back -= 1;
                back + 1
            };

            let page = &mut pages[idx];
            if page.state != LoadState::Loaded || page.is_dirty() || !page.is_reloadable(indexed) {
                trace!(page = idx, "not evictable");
                continue;
            }
            usage -= page.resident_bytes;
            page.unload();
            report.evicted.push(idx);
        }

        report.resident_after = usage;
        debug!(
            evicted = report.evicted.len(),
            before = report.resident_before,
            after = usage,
            limit = self.memory_limit,
            "eviction sweep"
        );
        report
    }
}

impl<C: PayloadCodec> Document<C> {
    /// Make page `idx` resident, first enforcing `memory` if given.
    ///
    /// The sweep never touches `protect`, normally the page in view.
    pub fn ensure_loaded(
        &mut self,
        idx: usize,
        protect: usize,
        memory: Option<&PagingPolicy>,
    ) -> Result<()> {
        if let Some(policy) = memory {
            self.check_memory_usage(protect, policy);
        }
        self.load_if_needed(idx)
    }

    /// Load every page. Tries all of them and reports the first failure.
    pub fn ensure_pages_loaded(&mut self) -> Result<()> {
        let mut first_error = None;
        for idx in 0..self.pages.len() {
            if let Err(e) = self.load_if_needed(idx) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run one eviction sweep around `protect`
    pub fn check_memory_usage(&mut self, protect: usize, policy: &PagingPolicy) -> EvictionReport {
        let indexed = !self.block_index.is_empty();
        policy.sweep(&mut self.pages, protect, indexed)
    }
}

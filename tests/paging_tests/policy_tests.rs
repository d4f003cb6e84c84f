//! Tests for lazy loading and eviction
//!
//! These tests verify:
//! - The sweep does nothing below the limit or when disabled
//! - Farthest-from-protected order, from both ends
//! - Dirty, protected and non-reloadable pages are never unloaded
//! - Evicted pages reload with identical content

use std::io::Cursor;

use bytes::Bytes;
use inkstore::{
    Config, Document, LoadState, ManifestExtras, PageProps, PagingPolicy, RawPayloadCodec,
    SaveFlags,
};

// =============================================================================
// Helper Functions
// =============================================================================

const PAGE_BYTES: usize = 1000;

fn payload(page: usize) -> Bytes {
    Bytes::from(vec![page as u8; PAGE_BYTES])
}

fn unsaved_document(pages: usize) -> Document<RawPayloadCodec> {
    let mut doc = Document::new(RawPayloadCodec);
    for i in 0..pages {
        let idx = doc.push_blank_page(PageProps::new(100.0, 100.0));
        doc.set_page_content(idx, payload(i)).unwrap();
    }
    doc
}

/// Every page resident, clean and backed by an indexed block
fn saved_document(pages: usize) -> Document<RawPayloadCodec> {
    let mut doc = unsaved_document(pages);
    doc.save(
        Some(Box::new(Cursor::new(Vec::new()))),
        &ManifestExtras::default(),
        SaveFlags::NORMAL,
        &Config::default(),
    )
    .unwrap();
    doc
}

fn loaded_pages(doc: &Document<RawPayloadCodec>) -> Vec<usize> {
    (0..doc.page_count())
        .filter(|&i| doc.page(i).unwrap().is_loaded())
        .collect()
}

// =============================================================================
// Policy Tests
// =============================================================================

#[test]
fn test_policy_from_config() {
    let config = Config::builder().memory_limit(4096).build();
    let policy = PagingPolicy::from_config(&config);

    assert_eq!(policy.memory_limit(), 4096);
    assert!(policy.is_enabled());
    assert!(!PagingPolicy::from_config(&Config::default()).is_enabled());
}

#[test]
fn test_disabled_policy_never_evicts() {
    let mut doc = saved_document(10);
    let report = doc.check_memory_usage(9, &PagingPolicy::new(0));

    assert!(report.evicted.is_empty());
    assert_eq!(report.resident_after, 10 * PAGE_BYTES);
}

#[test]
fn test_below_limit_does_nothing() {
    let mut doc = saved_document(10);
    let report = doc.check_memory_usage(9, &PagingPolicy::new(10 * PAGE_BYTES + 1));

    assert!(report.evicted.is_empty());
    assert_eq!(loaded_pages(&doc).len(), 10);
}

// =============================================================================
// Eviction Order Tests
// =============================================================================

#[test]
fn test_evicts_farthest_first_from_end() {
    let mut doc = saved_document(10);
    let report = doc.check_memory_usage(9, &PagingPolicy::new(8 * PAGE_BYTES));

    // Down to half the limit: six pages go, page 0 first
    assert_eq!(report.evicted, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(report.resident_before, 10 * PAGE_BYTES);
    assert_eq!(report.resident_after, 4 * PAGE_BYTES);
    assert_eq!(doc.resident_bytes(), 4 * PAGE_BYTES);
    assert_eq!(loaded_pages(&doc), vec![6, 7, 8, 9]);
}

#[test]
fn test_evicts_from_both_ends_around_middle() {
    let mut doc = saved_document(10);
    let report = doc.check_memory_usage(5, &PagingPolicy::new(8 * PAGE_BYTES));

    assert_eq!(report.evicted, vec![0, 9, 1, 8, 2, 7]);
    assert_eq!(loaded_pages(&doc), vec![3, 4, 5, 6]);
}

#[test]
fn test_protected_page_survives() {
    let mut doc = saved_document(3);
    let report = doc.check_memory_usage(1, &PagingPolicy::new(2));

    assert_eq!(report.evicted.len(), 2);
    assert!(doc.page(1).unwrap().is_loaded());
    assert_eq!(report.resident_after, PAGE_BYTES);
}

#[test]
fn test_out_of_range_protect_is_clamped() {
    let mut doc = saved_document(4);
    let report = doc.check_memory_usage(100, &PagingPolicy::new(2));

    assert_eq!(report.evicted, vec![0, 1, 2]);
    assert!(doc.page(3).unwrap().is_loaded());
}

// =============================================================================
// Eviction Safety Tests
// =============================================================================

#[test]
fn test_dirty_pages_never_evicted() {
    let mut doc = saved_document(10);
    for i in 0..5 {
        doc.set_page_content(i, payload(i + 100)).unwrap();
    }

    let report = doc.check_memory_usage(9, &PagingPolicy::new(8 * PAGE_BYTES));

    assert_eq!(report.evicted, vec![5, 6, 7, 8]);
    assert_eq!(report.resident_after, 6 * PAGE_BYTES);
    for i in 0..5 {
        assert!(doc.page(i).unwrap().is_dirty());
        assert!(doc.page(i).unwrap().is_loaded());
    }
}

#[test]
fn test_unsaved_pages_never_evicted() {
    let mut doc = unsaved_document(10);
    let report = doc.check_memory_usage(9, &PagingPolicy::new(PAGE_BYTES));

    assert!(report.evicted.is_empty());
    assert_eq!(loaded_pages(&doc).len(), 10);
}

#[test]
fn test_evicted_page_reloads_identically() {
    let mut doc = saved_document(6);
    let policy = PagingPolicy::new(4 * PAGE_BYTES);

    doc.check_memory_usage(5, &policy);
    assert_eq!(doc.page(0).unwrap().state(), LoadState::NotLoaded);
    assert!(doc.page_content(0).is_none());

    doc.ensure_loaded(0, 0, Some(&policy)).unwrap();
    assert_eq!(doc.page_content(0), Some(&payload(0)));
    assert!(!doc.page(0).unwrap().is_dirty());
}

#[test]
fn test_ensure_loaded_sweeps_around_protected_page() {
    let mut doc = saved_document(10);
    let policy = PagingPolicy::new(8 * PAGE_BYTES);

    doc.ensure_loaded(0, 0, Some(&policy)).unwrap();

    assert!(doc.page(0).unwrap().is_loaded());
    assert!(!doc.page(9).unwrap().is_loaded());
    assert_eq!(doc.resident_bytes(), 4 * PAGE_BYTES);
}

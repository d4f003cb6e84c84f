//! Tests for the inline and linked multi-file forms
//!
//! These tests verify:
//! - Inline (.svg) save and eager reload
//! - Linked (.html) index file plus per-page files
//! - Only changed page files are rewritten; stale ones are removed
//! - Numbered page file recovery and header-less streams
//! - Sticky load errors and check_and_clear_errors()

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use inkstore::document::format;
use inkstore::store::{open_path, page_file_path, save_path};
use inkstore::{
    Config, Document, InkError, LoadOutcome, LoadState, ManifestExtras, PageProps,
    RawPayloadCodec, SaveFlags, StorageFormat,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn payload(page: usize, revision: usize) -> Bytes {
    Bytes::from(format!("stroke data {} / {} ", page, revision).repeat(20))
}

fn document_with_pages(count: usize) -> Document<RawPayloadCodec> {
    let mut doc = Document::new(RawPayloadCodec);
    for i in 0..count {
        let idx = doc.push_blank_page(PageProps::new(500.0, 700.0 + i as f32));
        doc.set_page_content(idx, payload(i, 0)).unwrap();
    }
    doc
}

fn save_new(doc: &mut Document<RawPayloadCodec>, path: &Path) {
    save_path(doc, path, &ManifestExtras::default(), SaveFlags::NORMAL, &Config::default())
        .unwrap();
}

fn resave(doc: &mut Document<RawPayloadCodec>, flags: SaveFlags) {
    doc.save(None, &ManifestExtras::default(), flags, &Config::default())
        .unwrap();
}

fn page_file(index: &Path, number: usize) -> PathBuf {
    page_file_path(index, number)
}

// =============================================================================
// Inline Form Tests
// =============================================================================

#[test]
fn test_inline_round_trip() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.svg");
    let mut doc = document_with_pages(3);
    save_new(&mut doc, &path);

    assert_eq!(doc.format(), StorageFormat::Inline);
    assert!(doc.block_index().is_empty());
    assert_eq!(&fs::read(&path).unwrap()[..4], b"INKD");

    let loaded = open_path(&path, RawPayloadCodec).unwrap();
    assert_eq!(loaded.outcome, LoadOutcome::Ok);
    let doc = loaded.document;
    assert_eq!(doc.format(), StorageFormat::Inline);
    assert!(doc.pages().iter().all(|p| p.is_loaded()));
    assert_eq!(doc.page_content(2), Some(&payload(2, 0)));
    assert_eq!(doc.page(2).unwrap().height(), 702.0);
}

#[test]
fn test_page_frames_without_header_are_not_writable() {
    let temp = setup_temp_dir();
    let path = temp.path().join("fragment.svg");
    let mut bytes = format::encode_page(&PageProps::new(1.0, 2.0), b"one".to_vec()).unwrap();
    bytes.extend(format::encode_page(&PageProps::new(1.0, 2.0), b"two".to_vec()).unwrap());
    fs::write(&path, bytes).unwrap();

    let loaded = open_path(&path, RawPayloadCodec).unwrap();
    assert_eq!(loaded.outcome, LoadOutcome::NonWritable);
    assert!(!loaded.outcome.is_writable());
    assert_eq!(loaded.document.page_count(), 2);
    assert_eq!(loaded.document.page_content(1).map(|b| &b[..]), Some(&b"two"[..]));
}

#[test]
fn test_block_document_converted_to_inline() {
    let temp = setup_temp_dir();
    let block_path = temp.path().join("notes.svgz");
    let inline_path = temp.path().join("notes.svg");
    let mut doc = document_with_pages(2);
    save_new(&mut doc, &block_path);

    let mut lazy = open_path(&block_path, RawPayloadCodec).unwrap().document;
    save_new(&mut lazy, &inline_path);
    assert_eq!(lazy.container_path(), Some(inline_path.as_path()));

    let reloaded = open_path(&inline_path, RawPayloadCodec).unwrap().document;
    assert_eq!(reloaded.page_content(1), Some(&payload(1, 0)));
}

// =============================================================================
// Linked Form Tests
// =============================================================================

#[test]
fn test_linked_save_writes_page_files() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    let mut doc = document_with_pages(3);
    save_new(&mut doc, &path);

    assert_eq!(doc.format(), StorageFormat::Linked);
    for number in 1..=3 {
        assert!(page_file(&path, number).is_file());
    }
    assert_eq!(page_file(&path, 2), temp.path().join("notes_page002.page"));
    assert_eq!(doc.page(0).unwrap().file_name(), Some(page_file(&path, 1).as_path()));

    let loaded = open_path(&path, RawPayloadCodec).unwrap();
    assert_eq!(loaded.outcome, LoadOutcome::Ok);
    let mut doc = loaded.document;
    assert_eq!(doc.format(), StorageFormat::Linked);
    assert!(doc.pages().iter().all(|p| p.state() == LoadState::NotLoaded));
    assert_eq!(doc.page(1).unwrap().height(), 701.0);

    doc.ensure_loaded(1, 1, None).unwrap();
    assert_eq!(doc.page_content(1), Some(&payload(1, 0)));
}

#[test]
fn test_linked_resave_skips_unchanged_pages() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    let mut doc = document_with_pages(3);
    save_new(&mut doc, &path);

    // Replace the first page's file behind the engine's back
    let marker = format::encode_page(&PageProps::new(1.0, 1.0), b"untouched".to_vec()).unwrap();
    fs::write(page_file(&path, 1), &marker).unwrap();

    doc.set_page_content(2, payload(2, 1)).unwrap();
    resave(&mut doc, SaveFlags::NORMAL);

    assert_eq!(fs::read(page_file(&path, 1)).unwrap(), marker);
    let mut reloaded = open_path(&path, RawPayloadCodec).unwrap().document;
    reloaded.ensure_loaded(2, 2, None).unwrap();
    assert_eq!(reloaded.page_content(2), Some(&payload(2, 1)));
}

#[test]
fn test_linked_force_rewrites_all_pages() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    let mut doc = document_with_pages(2);
    save_new(&mut doc, &path);

    fs::write(page_file(&path, 1), b"garbage").unwrap();
    resave(&mut doc, SaveFlags::FORCE);

    let mut reloaded = open_path(&path, RawPayloadCodec).unwrap().document;
    reloaded.ensure_loaded(0, 0, None).unwrap();
    assert_eq!(reloaded.page_content(0), Some(&payload(0, 0)));
}

#[test]
fn test_linked_delete_removes_stale_page_files() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    let mut doc = document_with_pages(3);
    save_new(&mut doc, &path);

    doc.delete_page(0).unwrap();
    resave(&mut doc, SaveFlags::NORMAL);

    assert!(page_file(&path, 1).is_file());
    assert!(page_file(&path, 2).is_file());
    assert!(!page_file(&path, 3).exists());

    let mut reloaded = open_path(&path, RawPayloadCodec).unwrap().document;
    assert_eq!(reloaded.page_count(), 2);
    reloaded.ensure_pages_loaded().unwrap();
    assert_eq!(reloaded.page_content(0), Some(&payload(1, 0)));
    assert_eq!(reloaded.page_content(1), Some(&payload(2, 0)));
}

#[test]
fn test_multifile_flag_needs_named_file() {
    let mut doc = document_with_pages(1);
    let err = doc
        .save(
            Some(Box::new(Cursor::new(Vec::new()))),
            &ManifestExtras::default(),
            SaveFlags::MULTIFILE,
            &Config::default(),
        )
        .unwrap_err();

    assert!(matches!(err.error, InkError::Config(_)));
    assert!(err.into_container().is_some());
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_numbered_page_files_recovered() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    let mut doc = document_with_pages(3);
    save_new(&mut doc, &path);
    drop(doc);

    fs::write(&path, b"<html>lost index</html>").unwrap();

    let loaded = open_path(&path, RawPayloadCodec).unwrap();
    assert_eq!(loaded.outcome, LoadOutcome::NonFatal);
    let doc = loaded.document;
    assert_eq!(doc.page_count(), 3);
    assert_eq!(doc.page_content(2), Some(&payload(2, 0)));
    assert_eq!(doc.page(2).unwrap().height(), 702.0);
}

#[test]
fn test_unrecognized_file_is_fatal() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    fs::write(&path, b"nothing useful here").unwrap();

    let result = open_path(&path, RawPayloadCodec);
    assert!(matches!(result, Err(InkError::LoadFatal(_))));
}

#[test]
fn test_missing_page_file_is_sticky_until_cleared() {
    let temp = setup_temp_dir();
    let path = temp.path().join("notes.html");
    let mut doc = document_with_pages(3);
    save_new(&mut doc, &path);
    drop(doc);

    fs::remove_file(page_file(&path, 2)).unwrap();
    let mut doc = open_path(&path, RawPayloadCodec).unwrap().document;

    assert!(doc.ensure_loaded(1, 1, None).is_err());
    assert_eq!(doc.page(1).unwrap().state(), LoadState::LoadError);
    // No retry while the error is sticky
    assert!(doc.ensure_loaded(1, 1, None).is_err());

    assert!(doc.check_and_clear_errors());
    assert!(doc.pages().iter().all(|p| p.is_loaded()));
    assert!(doc.page(1).unwrap().content().is_none());
    assert_eq!(doc.page_content(2), Some(&payload(2, 0)));
    assert!(!doc.check_and_clear_errors());
}

//! Tests for the block container
//!
//! These tests verify:
//! - gzip header layout and the reserved index region
//! - Standard gzip decoders read the container unchanged
//! - Each block inflates on its own and matches the CRC/length chain
//! - Index capacity overflow and corrupted records fall back cleanly
//! - verify() agrees with the trailer

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use flate2::read::GzDecoder;
use inkstore::container::{
    append_block, inflate_all, patch_index, read_block, read_index, verify, write_header,
    write_trailer, BlockRecord, RollingChecksum, GZIP_MAGIC, MAX_INDEX_RECORDS, RECORD_SIZE,
    TRAILER_SIZE,
};
use inkstore::error::DecodeError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Write `blocks` as a container; the last block finishes the deflate stream
fn build_container(blocks: &[Vec<u8>], capacity: usize) -> (Cursor<Vec<u8>>, Vec<BlockRecord>) {
    let mut stream = Cursor::new(Vec::new());
    let layout = write_header(&mut stream, capacity).unwrap();

    let mut checksum = RollingChecksum::new();
    let mut records = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        let finish = i == blocks.len() - 1;
        let (next, written) = append_block(&mut stream, block, checksum, 6, finish).unwrap();
        assert!(written > 0);
        checksum = next;
        records.push(BlockRecord::new(stream.position() as u32, checksum));
    }
    write_trailer(&mut stream, checksum).unwrap();
    patch_index(&mut stream, &layout, &records).unwrap();
    (stream, records)
}

fn sample_blocks(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("block {} ", i).repeat(50 + i * 10).into_bytes())
        .collect()
}

fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let mut stream = Cursor::new(Vec::new());
    let layout = write_header(&mut stream, 8).unwrap();
    let bytes = stream.into_inner();

    assert_eq!(&bytes[0..3], &GZIP_MAGIC);
    assert_eq!(bytes[3], 0x04); // FEXTRA only
    assert_eq!(&bytes[4..8], &[0, 0, 0, 0]); // MTIME
    assert_eq!(bytes[9], 0xff); // OS unknown

    let sub_len = 4 + 8 * RECORD_SIZE;
    let xlen = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    assert_eq!(xlen, 4 + sub_len);
    assert_eq!(&bytes[12..14], b"BI");
    assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]) as usize, sub_len);

    assert_eq!(layout.reserved_offset, 16);
    assert_eq!(layout.capacity, 8);
    assert_eq!(layout.data_start, 16 + sub_len as u64);
    assert_eq!(bytes.len() as u64, layout.data_start);
    // Reserved region reads back as "no index"
    assert!(bytes[16..].iter().all(|&b| b == 0));
}

#[test]
fn test_header_capacity_clamped() {
    let mut stream = Cursor::new(Vec::new());
    let layout = write_header(&mut stream, MAX_INDEX_RECORDS + 100).unwrap();

    assert_eq!(layout.capacity, MAX_INDEX_RECORDS);
    let bytes = stream.into_inner();
    let xlen = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    assert!(xlen <= u16::MAX as usize);
}

#[test]
fn test_record_little_endian_layout() {
    let record = BlockRecord::new(
        0x0102_0304,
        RollingChecksum {
            crc: 0xaabb_ccdd,
            len: 7,
        },
    );
    let bytes = record.to_bytes();

    assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&bytes[4..8], &[0xdd, 0xcc, 0xbb, 0xaa]);
    assert_eq!(&bytes[8..12], &[7, 0, 0, 0]);
    assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    assert_eq!(BlockRecord::from_bytes(&bytes), record);
}

// =============================================================================
// gzip Compatibility Tests
// =============================================================================

#[test]
fn test_standard_decoder_reads_container() {
    let blocks = sample_blocks(4);
    let (stream, _) = build_container(&blocks, 16);

    assert_eq!(gunzip(stream.get_ref()), blocks.concat());
}

#[test]
fn test_trailer_matches_whole_stream() {
    let blocks = sample_blocks(3);
    let (stream, records) = build_container(&blocks, 16);
    let bytes = stream.into_inner();

    let all = blocks.concat();
    let trailer = &bytes[bytes.len() - TRAILER_SIZE as usize..];
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

    assert_eq!(crc, crc32fast::hash(&all));
    assert_eq!(isize as usize, all.len());

    let last = records.last().unwrap();
    assert_eq!(last.crc32_cumulative, crc);
    assert_eq!(last.len_cumulative, isize);
    assert_eq!(u64::from(last.end_offset) + TRAILER_SIZE, bytes.len() as u64);
}

// =============================================================================
// Index and Block Tests
// =============================================================================

#[test]
fn test_read_index_returns_written_records() {
    let blocks = sample_blocks(5);
    let (mut stream, records) = build_container(&blocks, 16);

    let index = read_index(&mut stream).unwrap().expect("index present");
    assert_eq!(index.records(), &records[..]);
    assert_eq!(index.page_count(), Some(3));
    assert_eq!(index.manifest_block(), Some(4));
    assert_eq!(index.layout().capacity, 16);
}

#[test]
fn test_each_block_inflates_independently() {
    let blocks = sample_blocks(5);
    let (mut stream, _) = build_container(&blocks, 16);
    let index = read_index(&mut stream).unwrap().unwrap();

    // Out of order on purpose
    for block in [3, 0, 4, 1, 2] {
        let (from, to) = index.span(block).unwrap();
        let mut out = Vec::new();
        read_block(&mut stream, &from, &to, &mut out).unwrap();
        assert_eq!(out, blocks[block]);
    }
}

#[test]
fn test_cumulative_chain_is_consistent() {
    let blocks = sample_blocks(4);
    let (_, records) = build_container(&blocks, 16);

    let mut expected = RollingChecksum::new();
    for (block, record) in blocks.iter().zip(&records) {
        expected.update(block);
        assert_eq!(record.checksum(), expected);
    }

    let mut prefix = Vec::new();
    for (block, record) in blocks.iter().zip(&records) {
        prefix.extend_from_slice(block);
        assert_eq!(record.crc32_cumulative, crc32fast::hash(&prefix));
    }
}

#[test]
fn test_index_overflow_writes_no_index() {
    let blocks = sample_blocks(6);
    let (mut stream, _) = build_container(&blocks, 4);

    assert!(read_index(&mut stream).unwrap().is_none());

    let inflated = inflate_all(&mut stream).unwrap();
    assert!(inflated.is_clean());
    assert_eq!(inflated.data, blocks.concat());
}

#[test]
fn test_read_index_rejects_non_gzip() {
    let mut stream = Cursor::new(b"INKD plain bytes, not a container".to_vec());
    assert!(read_index(&mut stream).unwrap().is_none());

    let mut empty = Cursor::new(Vec::new());
    assert!(read_index(&mut empty).unwrap().is_none());
}

#[test]
fn test_read_index_rejects_decreasing_offsets() {
    let blocks = sample_blocks(3);
    let (stream, records) = build_container(&blocks, 16);
    let mut bytes = stream.into_inner();

    // Swap the end offsets of records 0 and 1
    let first = 16 + 4;
    let second = first + RECORD_SIZE;
    let a = records[0].end_offset.to_le_bytes();
    let b = records[1].end_offset.to_le_bytes();
    bytes[first..first + 4].copy_from_slice(&b);
    bytes[second..second + 4].copy_from_slice(&a);

    let mut stream = Cursor::new(bytes);
    assert!(read_index(&mut stream).unwrap().is_none());
}

#[test]
fn test_corrupted_record_checksum_detected() {
    let blocks = sample_blocks(3);
    let (stream, _) = build_container(&blocks, 16);
    let mut bytes = stream.into_inner();

    // Flip the CRC of record 1
    let crc_at = 16 + 4 + RECORD_SIZE + 4;
    bytes[crc_at] ^= 0xff;
    let mut stream = Cursor::new(bytes);

    let index = read_index(&mut stream).unwrap().unwrap();
    let (from, to) = index.span(1).unwrap();
    let mut out = Vec::new();
    let err = read_block(&mut stream, &from, &to, &mut out).unwrap_err();
    assert!(matches!(err, DecodeError::ChecksumMismatch { .. }));

    // The stream itself is still intact
    assert_eq!(inflate_all(&mut stream).unwrap().data, blocks.concat());
}

#[test]
fn test_truncated_container_keeps_prefix() {
    let blocks = sample_blocks(4);
    let (stream, records) = build_container(&blocks, 16);
    let mut bytes = stream.into_inner();
    bytes.truncate(records[1].end_offset as usize);

    let mut stream = Cursor::new(bytes);
    let inflated = inflate_all(&mut stream).unwrap();
    assert!(!inflated.is_clean());
    assert!(inflated.data.starts_with(&blocks[0]));
}

#[test]
fn test_span_past_end_is_premature_eof() {
    let blocks = sample_blocks(3);
    let (stream, records) = build_container(&blocks, 16);
    let mut bytes = stream.into_inner();
    bytes.truncate(records[1].end_offset as usize + 2);

    let mut stream = Cursor::new(bytes);
    let mut out = Vec::new();
    let err = read_block(&mut stream, &records[1], &records[2], &mut out).unwrap_err();
    assert!(matches!(err, DecodeError::PrematureEof { .. }));
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_clean_container() {
    let blocks = sample_blocks(4);
    let (mut stream, _) = build_container(&blocks, 16);

    let report = verify(&mut stream).unwrap();
    assert!(report.indexed);
    assert_eq!(report.blocks, 4);
    assert_eq!(report.blocks_ok, 4);
    assert!(report.chain_matches_trailer);
    assert!(report.is_ok(), "{:?}", report.errors);
}

#[test]
fn test_verify_detects_bad_trailer() {
    let blocks = sample_blocks(3);
    let (mut stream, _) = build_container(&blocks, 16);

    stream.seek(SeekFrom::End(-(TRAILER_SIZE as i64))).unwrap();
    stream.write_all(&[0, 0, 0, 0]).unwrap();

    let report = verify(&mut stream).unwrap();
    assert!(!report.chain_matches_trailer);
    assert!(!report.is_ok());
}

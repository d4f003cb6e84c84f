//! Container Reader
//!
//! Parses the embedded index, inflates individual block spans, and inflates
//! the whole stream when the index is missing or cannot be trusted.

use std::io::{self, Read, Seek, SeekFrom};

use flate2::read::GzDecoder;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::DecodeError;

use super::{
    BlockIndex, BlockRecord, HeaderLayout, RollingChecksum, FLAG_EXTRA, GZIP_HEADER_SIZE,
    GZIP_MAGIC, INDEX_COUNT_SIZE, INDEX_SUBFIELD_ID, RECORD_SIZE, TRAILER_SIZE,
};

/// Parse the block index out of the gzip header extra field.
///
/// Returns `Ok(None)` when there is no usable index: not a gzip stream, no
/// extra field, no index subfield, a zero count, or records that fail the
/// sanity checks. Only genuine I/O failures are errors.
pub fn read_index<R: Read + Seek + ?Sized>(stream: &mut R) -> io::Result<Option<BlockIndex>> {
    let total_len = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; GZIP_HEADER_SIZE as usize + 2];
    if !read_fully(stream, &mut header)? {
        return Ok(None);
    }
    if header[0..3] != GZIP_MAGIC {
        return Ok(None);
    }
    // Only FEXTRA is ever set on containers we write
    if header[3] != FLAG_EXTRA {
        return Ok(None);
    }

    let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
    let mut extra = vec![0u8; xlen];
    if !read_fully(stream, &mut extra)? {
        return Ok(None);
    }

    // Walk subfields: SI1 SI2 LEN(2) data
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = [extra[pos], extra[pos + 1]];
        let sub_len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let data_pos = pos + 4;
        if data_pos + sub_len > extra.len() {
            return Ok(None);
        }

        if id == INDEX_SUBFIELD_ID {
            let layout = HeaderLayout {
                reserved_offset: GZIP_HEADER_SIZE + 2 + data_pos as u64,
                capacity: sub_len.saturating_sub(INDEX_COUNT_SIZE) / RECORD_SIZE,
                data_start: GZIP_HEADER_SIZE + 2 + xlen as u64,
            };
            let data = &extra[data_pos..data_pos + sub_len];
            return Ok(parse_records(layout, data, total_len));
        }
        pos = data_pos + sub_len;
    }

    Ok(None)
}

/// Decode and sanity-check the records in the index subfield
fn parse_records(layout: HeaderLayout, data: &[u8], total_len: u64) -> Option<BlockIndex> {
    if data.len() < INDEX_COUNT_SIZE {
        return None;
    }
    let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

    // At least the header block and the manifest block
    if count < 2 || count > layout.capacity {
        return None;
    }

    let mut records = Vec::with_capacity(count);
    let mut prev = BlockRecord::new(layout.data_start as u32, RollingChecksum::new());
    for chunk in data[INDEX_COUNT_SIZE..INDEX_COUNT_SIZE + count * RECORD_SIZE].chunks_exact(RECORD_SIZE) {
        let bytes: &[u8; RECORD_SIZE] = chunk.try_into().ok()?;
        let record = BlockRecord::from_bytes(bytes);

        if record.end_offset <= prev.end_offset || record.len_cumulative < prev.len_cumulative {
            return None;
        }
        if u64::from(record.end_offset) > total_len {
            return None;
        }
        records.push(record);
        prev = record;
    }

    Some(BlockIndex::from_parts(layout, records))
}

/// Inflate the block span `(from, to]` and append the output to `sink`.
///
/// `from` may be the sentinel returned by `BlockIndex::start_record()`. The
/// decompressed bytes are checked against the cumulative CRC/length chain:
/// seeded from `from`, they must land exactly on `to`.
pub fn read_block<R: Read + Seek + ?Sized>(
    stream: &mut R,
    from: &BlockRecord,
    to: &BlockRecord,
    sink: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    if to.end_offset <= from.end_offset {
        return Err(DecodeError::InvalidSpan(format!(
            "block ends at {} but starts at {}",
            to.end_offset, from.end_offset
        )));
    }
    let span = u64::from(to.end_offset - from.end_offset);

    stream
        .seek(SeekFrom::Start(u64::from(from.end_offset)))
        .map_err(DecodeError::Seek)?;

    let mut compressed = Vec::with_capacity(span as usize);
    (&mut *stream)
        .take(span)
        .read_to_end(&mut compressed)
        .map_err(DecodeError::Io)?;
    if compressed.len() as u64 != span {
        return Err(DecodeError::PrematureEof {
            expected: span,
            actual: compressed.len() as u64,
        });
    }

    let start = sink.len();
    inflate_raw(&compressed, sink)?;

    let mut checksum = from.checksum();
    checksum.update(&sink[start..]);
    if checksum.len != to.len_cumulative {
        return Err(DecodeError::LengthMismatch {
            expected: to.len_cumulative,
            actual: checksum.len,
        });
    }
    if checksum.crc != to.crc32_cumulative {
        return Err(DecodeError::ChecksumMismatch {
            expected: to.crc32_cumulative,
            actual: checksum.crc,
        });
    }
    Ok(())
}

/// Raw inflate of a span that starts on a block boundary
fn inflate_raw(input: &[u8], sink: &mut Vec<u8>) -> Result<(), DecodeError> {
    let mut inflater = Decompress::new(false);
    sink.reserve(input.len() * 3);

    loop {
        if sink.len() == sink.capacity() {
            sink.reserve(sink.capacity().max(256));
        }

        let before = (inflater.total_in(), inflater.total_out());
        let consumed = inflater.total_in() as usize;
        let status = inflater
            .decompress_vec(&input[consumed..], sink, FlushDecompress::Sync)
            .map_err(|e| DecodeError::Inflate(e.to_string()))?;

        let all_in = inflater.total_in() as usize == input.len();
        match status {
            Status::StreamEnd if all_in => return Ok(()),
            Status::StreamEnd => {
                return Err(DecodeError::Inflate(format!(
                    "stream ended after {} of {} bytes",
                    inflater.total_in(),
                    input.len()
                )))
            }
            _ if all_in && sink.len() < sink.capacity() => return Ok(()),
            _ => {}
        }

        if (inflater.total_in(), inflater.total_out()) == before && sink.len() < sink.capacity() {
            return Err(DecodeError::Inflate("inflate made no progress".to_string()));
        }
    }
}

/// Result of inflating a whole container
#[derive(Debug, Default)]
pub struct InflateOutcome {
    /// Everything that could be decompressed, even if an error followed
    pub data: Vec<u8>,
    pub error: Option<String>,
}

impl InflateOutcome {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Inflate the whole container from its start, ignoring the index.
///
/// The gzip decoder checks the trailer CRC/length; a mismatch or truncated
/// stream is reported in `error` with the recovered prefix kept in `data`.
pub fn inflate_all<R: Read + Seek + ?Sized>(stream: &mut R) -> io::Result<InflateOutcome> {
    stream.seek(SeekFrom::Start(0))?;

    let mut decoder = GzDecoder::new(&mut *stream);
    let mut outcome = InflateOutcome::default();
    if let Err(e) = decoder.read_to_end(&mut outcome.data) {
        outcome.error = Some(e.to_string());
    }
    Ok(outcome)
}

/// Integrity report for a container
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Whether a usable index was found in the header
    pub indexed: bool,
    pub blocks: usize,
    /// Blocks that inflated independently and matched the chain
    pub blocks_ok: usize,
    pub stream_checksum: RollingChecksum,
    pub trailer_checksum: RollingChecksum,
    /// Last index record agrees with the trailer (always true when unindexed)
    pub chain_matches_trailer: bool,
    pub errors: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
            && self.blocks_ok == self.blocks
            && self.stream_checksum == self.trailer_checksum
            && self.chain_matches_trailer
    }
}

/// Check a container end to end: every indexed block on its own, the whole
/// stream in one pass, and the trailer against the last index record.
pub fn verify<R: Read + Seek + ?Sized>(stream: &mut R) -> io::Result<VerifyReport> {
    let mut report = VerifyReport::default();

    let total_len = stream.seek(SeekFrom::End(0))?;
    if total_len < TRAILER_SIZE {
        report.errors.push(format!("container too short: {} bytes", total_len));
        return Ok(report);
    }
    stream.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
    let mut trailer = [0u8; TRAILER_SIZE as usize];
    stream.read_exact(&mut trailer)?;
    report.trailer_checksum = RollingChecksum {
        crc: u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]),
        len: u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]),
    };

    report.chain_matches_trailer = true;
    if let Some(index) = read_index(stream)? {
        report.indexed = true;
        report.blocks = index.len();
        for block in 0..index.len() {
            let Some((from, to)) = index.span(block) else {
                continue;
            };
            let mut sink = Vec::new();
            match read_block(stream, &from, &to, &mut sink) {
                Ok(()) => report.blocks_ok += 1,
                Err(e) => report.errors.push(format!("block {}: {}", block, e)),
            }
        }
        if let Some(last) = index.last() {
            report.chain_matches_trailer = last.checksum() == report.trailer_checksum
                && u64::from(last.end_offset) + TRAILER_SIZE == total_len;
        }
    }

    let whole = inflate_all(stream)?;
    let mut checksum = RollingChecksum::new();
    checksum.update(&whole.data);
    report.stream_checksum = checksum;
    if let Some(e) = whole.error {
        report.errors.push(format!("full inflate: {}", e));
    }

    Ok(report)
}

/// `read_exact` that reports a short read as `false` instead of an error
fn read_fully<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

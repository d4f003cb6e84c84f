//! Container Writer
//!
//! Emits the gzip header with a reserved index region, full-flushed deflate
//! blocks, the trailer, and finally patches the index back into the header.

use std::io::{self, Seek, SeekFrom, Write};

use flate2::{Compress, Compression, FlushCompress, Status};

use super::{
    BlockRecord, HeaderLayout, RollingChecksum, FLAG_EXTRA, GZIP_HEADER_SIZE, GZIP_MAGIC,
    INDEX_COUNT_SIZE, INDEX_SUBFIELD_ID, MAX_INDEX_RECORDS, RECORD_SIZE,
};

/// Write a gzip header whose extra field reserves room for `capacity` records.
///
/// Writes at the current position, which must be the start of the container.
/// The reserved region is zero-filled, which reads back as "no index".
pub fn write_header<W: Write + Seek + ?Sized>(
    stream: &mut W,
    capacity: usize,
) -> io::Result<HeaderLayout> {
    let capacity = capacity.min(MAX_INDEX_RECORDS);
    let sub_len = INDEX_COUNT_SIZE + capacity * RECORD_SIZE;
    let xlen = 4 + sub_len;

    let start = stream.stream_position()?;

    // Fixed header: magic + CM, FLG, MTIME (0), XFL (0), OS (unknown)
    let mut header = Vec::with_capacity(GZIP_HEADER_SIZE as usize + 2 + xlen);
    header.extend_from_slice(&GZIP_MAGIC);
    header.push(FLAG_EXTRA);
    header.extend_from_slice(&[0, 0, 0, 0]);
    header.push(0);
    header.push(0xff);

    // Extra field: XLEN, then a single subfield SI1 SI2 LEN data
    header.extend_from_slice(&(xlen as u16).to_le_bytes());
    header.extend_from_slice(&INDEX_SUBFIELD_ID);
    header.extend_from_slice(&(sub_len as u16).to_le_bytes());
    header.resize(header.len() + sub_len, 0);

    stream.write_all(&header)?;

    let reserved_offset = start + GZIP_HEADER_SIZE + 2 + 4;
    Ok(HeaderLayout {
        reserved_offset,
        capacity,
        data_start: reserved_offset + sub_len as u64,
    })
}

/// Compress `bytes` as one block and append it at the current position.
///
/// Non-final blocks end with a full flush, so the next block starts on a byte
/// boundary with an empty dictionary and can be inflated on its own. The
/// final block (`finish`) terminates the deflate stream.
///
/// Returns the updated rolling checksum and the number of bytes written.
pub fn append_block<W: Write + ?Sized>(
    stream: &mut W,
    bytes: &[u8],
    running: RollingChecksum,
    level: u32,
    finish: bool,
) -> io::Result<(RollingChecksum, usize)> {
    let compressed = deflate_block(bytes, level, finish)?;
    stream.write_all(&compressed)?;

    let mut checksum = running;
    checksum.update(bytes);
    Ok((checksum, compressed.len()))
}

/// Write the standard gzip trailer: CRC32 then ISIZE, both little-endian
pub fn write_trailer<W: Write + ?Sized>(stream: &mut W, checksum: RollingChecksum) -> io::Result<()> {
    stream.write_all(&checksum.crc.to_le_bytes())?;
    stream.write_all(&checksum.len.to_le_bytes())?;
    Ok(())
}

/// Seek back to the reserved region and write the records.
///
/// If they do not fit, a zero count is written instead so readers see "no
/// index". Returns whether the index was written. The stream position is
/// restored afterwards.
pub fn patch_index<W: Write + Seek + ?Sized>(
    stream: &mut W,
    layout: &HeaderLayout,
    records: &[BlockRecord],
) -> io::Result<bool> {
    let fits = records.len() <= layout.capacity;
    let pos = stream.stream_position()?;

    stream.seek(SeekFrom::Start(layout.reserved_offset))?;
    if fits {
        let mut region = Vec::with_capacity(INDEX_COUNT_SIZE + records.len() * RECORD_SIZE);
        region.extend_from_slice(&(records.len() as u32).to_le_bytes());
        for record in records {
            region.extend_from_slice(&record.to_bytes());
        }
        stream.write_all(&region)?;
    } else {
        stream.write_all(&0u32.to_le_bytes())?;
    }

    stream.seek(SeekFrom::Start(pos))?;
    Ok(fits)
}

/// Raw deflate of one block with a fresh compressor
fn deflate_block(input: &[u8], level: u32, finish: bool) -> io::Result<Vec<u8>> {
    let mut deflater = Compress::new(Compression::new(level), false);
    let flush = if finish {
        FlushCompress::Finish
    } else {
        FlushCompress::Full
    };

    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(64));
        }

        let consumed = deflater.total_in() as usize;
        let status = deflater
            .compress_vec(&input[consumed..], &mut out, flush)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let all_in = deflater.total_in() as usize == input.len();
        match status {
            Status::StreamEnd => break,
            // A flush is complete once output space is left over
            _ if !finish && all_in && out.len() < out.capacity() => break,
            _ => {}
        }
    }
    Ok(out)
}

//! Block records and the block index
//!
//! Records are cumulative: entry `i` carries the CRC32 and length of the
//! whole logical stream up to the end of block `i`, so any record can seed
//! the running checksum for a rewrite that starts right after it.

use super::RECORD_SIZE;

/// Running CRC32 and length over the logical decompressed stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollingChecksum {
    pub crc: u32,
    /// Length modulo 2^32, like the gzip ISIZE field
    pub len: u32,
}

impl RollingChecksum {
    /// State at the very start of the stream
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut hasher = crc32fast::Hasher::new_with_initial(self.crc);
        hasher.update(bytes);
        self.crc = hasher.finalize();
        self.len = self.len.wrapping_add(bytes.len() as u32);
    }
}

impl From<&BlockRecord> for RollingChecksum {
    fn from(record: &BlockRecord) -> Self {
        Self {
            crc: record.crc32_cumulative,
            len: record.len_cumulative,
        }
    }
}

/// Stream state immediately after one block has been written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    /// Byte offset in the container where the block ends
    pub end_offset: u32,
    pub crc32_cumulative: u32,
    pub len_cumulative: u32,
    pub reserved: u32,
}

impl BlockRecord {
    pub fn new(end_offset: u32, checksum: RollingChecksum) -> Self {
        Self {
            end_offset,
            crc32_cumulative: checksum.crc,
            len_cumulative: checksum.len,
            reserved: 0,
        }
    }

    pub fn checksum(&self) -> RollingChecksum {
        RollingChecksum::from(self)
    }

    /// Little-endian, like the rest of the gzip header
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.end_offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.crc32_cumulative.to_le_bytes());
        out[8..12].copy_from_slice(&self.len_cumulative.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            end_offset: word(0),
            crc32_cumulative: word(4),
            len_cumulative: word(8),
            reserved: word(12),
        }
    }
}

/// Where the header put things
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Offset of the record count inside the extra field
    pub reserved_offset: u64,
    /// Number of records the reserved region can hold
    pub capacity: usize,
    /// Offset of the first deflate byte (start of block 0)
    pub data_start: u64,
}

/// Ordered block records plus the header layout they belong to.
///
/// By convention: record 0 ends the document header block, records 1..=N end
/// the page blocks, record N+1 ends the manifest block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    layout: HeaderLayout,
    records: Vec<BlockRecord>,
}

impl BlockIndex {
    pub fn new(layout: HeaderLayout) -> Self {
        Self {
            layout,
            records: Vec::new(),
        }
    }

    pub fn from_parts(layout: HeaderLayout, records: Vec<BlockRecord>) -> Self {
        Self { layout, records }
    }

    pub fn layout(&self) -> &HeaderLayout {
        &self.layout
    }

    pub fn records(&self) -> &[BlockRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&BlockRecord> {
        self.records.get(idx)
    }

    pub fn last(&self) -> Option<&BlockRecord> {
        self.records.last()
    }

    pub fn push(&mut self, record: BlockRecord) {
        self.records.push(record);
    }

    pub fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.layout = HeaderLayout::default();
    }

    /// Sentinel "before block 0": start of the deflate data, empty checksum
    pub fn start_record(&self) -> BlockRecord {
        BlockRecord::new(self.layout.data_start as u32, RollingChecksum::new())
    }

    /// The records bounding block `block`: (state before it, state after it)
    pub fn span(&self, block: usize) -> Option<(BlockRecord, BlockRecord)> {
        let to = *self.records.get(block)?;
        let from = if block == 0 {
            self.start_record()
        } else {
            self.records[block - 1]
        };
        Some((from, to))
    }

    /// Index of the manifest block (always the last one)
    pub fn manifest_block(&self) -> Option<usize> {
        if self.records.len() >= 2 {
            Some(self.records.len() - 1)
        } else {
            None
        }
    }

    /// Page count implied by the header + pages + manifest convention
    pub fn page_count(&self) -> Option<usize> {
        self.records.len().checked_sub(2)
    }
}

// SPDX-License-Identifier: MIT

//! The refcount index: loads the refcount-table-of-blocks at open time and
//! answers "refcount of host cluster at offset O".

use crate::error::{Qcow2Error, Qcow2Result};
use crate::header::Header;
use crate::reader::{read_exact_at, ByteRangeReader};

const REFCOUNT_TABLE_ENTRY_SIZE: u64 = 8;

/// One entry of the refcount table: the host offset of the refcount block it
/// points to, or 0 if no block is allocated for that range of host clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefcountTableEntry {
    pub block_offset: u64,
}

/// The loaded refcount table, immutable after construction.
#[derive(Debug, Clone)]
pub struct RefcountTable {
    entries: Vec<RefcountTableEntry>,
    entries_per_block: u64,
    refcount_bits: u32,
    cluster_size: u64,
}

impl RefcountTable {
    /// Loads `header.refcount_table_clusters` clusters of refcount table
    /// starting at `header.refcount_table_offset`.
    pub fn load<R: ByteRangeReader>(reader: &mut R, header: &Header) -> Qcow2Result<RefcountTable> {
        let cluster_size = header.cluster_size();
        let total_table_size = header.refcount_table_clusters as u64 * cluster_size;
        let total_entry_count = total_table_size / REFCOUNT_TABLE_ENTRY_SIZE;

        let buf = read_exact_at(reader, header.refcount_table_offset, total_table_size as usize)?;

        let mut entries = Vec::with_capacity(total_entry_count as usize);
        for index in 0..total_entry_count {
            let offset = (index * REFCOUNT_TABLE_ENTRY_SIZE) as usize;
            let word = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
            // Only the upper 55 bits (shifted left by 9) are meaningful.
            let block_offset = (word & ((1u64 << 55) - 1)) << 9;
            entries.push(RefcountTableEntry { block_offset });
        }

        Ok(RefcountTable {
            entries,
            entries_per_block: header.refcount_entries_per_block(),
            refcount_bits: header.refcount_bits(),
            cluster_size,
        })
    }

    /// Returns the refcount of the host cluster containing `host_offset`.
    pub fn refcount_at<R: ByteRangeReader>(
        &self,
        reader: &mut R,
        host_offset: u64,
    ) -> Qcow2Result<u64> {
        let cluster_index = host_offset / self.cluster_size;
        let table_idx = (cluster_index / self.entries_per_block) as usize;
        let block_idx = cluster_index % self.entries_per_block;

        let Some(entry) = self.entries.get(table_idx) else {
            return Err(Qcow2Error::CorruptImage("refcount table index out of range"));
        };
        if entry.block_offset == 0 {
            return Ok(0);
        }
        if entry.block_offset % self.cluster_size != 0 {
            return Err(Qcow2Error::CorruptImage(
                "refcount block offset not cluster-aligned",
            ));
        }

        let block = read_exact_at(reader, entry.block_offset, self.cluster_size as usize)?;
        extract_refcount(&block, block_idx, self.refcount_bits)
    }
}

fn extract_refcount(block: &[u8], index: u64, bits: u32) -> Qcow2Result<u64> {
    let bit_offset = index * bits as u64;
    if bit_offset % 8 != 0 {
        return Err(Qcow2Error::Unsupported("sub-byte refcount widths"));
    }
    let byte_index = (bit_offset / 8) as usize;

    match bits {
        16 => Ok(u16::from_be_bytes(block[byte_index..byte_index + 2].try_into().unwrap()) as u64),
        32 => Ok(u32::from_be_bytes(block[byte_index..byte_index + 4].try_into().unwrap()) as u64),
        64 => Ok(u64::from_be_bytes(block[byte_index..byte_index + 8].try_into().unwrap())),
        _ => Err(Qcow2Error::Unsupported("non-byte-aligned refcount width")),
    }
}

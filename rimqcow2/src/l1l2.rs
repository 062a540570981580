// SPDX-License-Identifier: MIT

//! The L1/L2 resolver: loads the L1 table, decodes L2 entries on demand, and
//! translates virtual offsets to a tagged host-cluster descriptor.

use crate::error::{Qcow2Error, Qcow2Result};
use crate::header::Header;
use crate::reader::{read_exact_at, ByteRangeReader};

const L1_ENTRY_SIZE: u64 = 8;
const L2_ENTRY_SIZE: u64 = 8;

/// Only bits 9..55 of an L1/L2 "standard" word are the host offset.
const OFFSET_MASK_9_55: u64 = (1u64 << 56) - (1u64 << 9);

/// One entry of the L1 table: the L2 table it points to, and whether that
/// L2 table's refcount is known to be exactly 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1Entry {
    pub l2_table_offset: u64,
    pub refcount_exactly_one: bool,
}

/// A decoded L2 entry: the `flag` bit plus exactly one of two descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Entry {
    pub flag: bool,
    pub descriptor: L2Descriptor,
}

/// Sum type over the two L2 descriptor variants. Exactly one is inhabited —
/// modeled as an enum rather than two nullable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Descriptor {
    Standard { all_zero: bool, data_offset: u64 },
    Compressed { data_offset: u64, additional_sectors: u32 },
}

/// The loaded L1 table, immutable after construction.
#[derive(Debug, Clone)]
pub struct L1Table {
    entries: Vec<L1Entry>,
    cluster_size: u64,
    l2_entries_per_table: u64,
    cluster_bits: u32,
}

impl L1Table {
    /// Loads `header.l1_size` entries starting at `header.l1_table_offset`.
    pub fn load<R: ByteRangeReader>(reader: &mut R, header: &Header) -> Qcow2Result<L1Table> {
        let cluster_size = header.cluster_size();
        let total_size = header.l1_size as u64 * L1_ENTRY_SIZE;
        let buf = read_exact_at(reader, header.l1_table_offset, total_size as usize)?;

        let mut entries = Vec::with_capacity(header.l1_size as usize);
        for index in 0..header.l1_size as u64 {
            let offset = (index * L1_ENTRY_SIZE) as usize;
            let word = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());

            let l2_table_offset = word & OFFSET_MASK_9_55;
            if l2_table_offset != 0 && l2_table_offset % cluster_size != 0 {
                return Err(Qcow2Error::CorruptImage(
                    "L1 entry's L2 table offset not aligned to cluster boundary",
                ));
            }

            entries.push(L1Entry {
                l2_table_offset,
                refcount_exactly_one: (word >> 63) & 1 == 1,
            });
        }

        Ok(L1Table {
            entries,
            cluster_size,
            l2_entries_per_table: header.l2_entries_per_table(),
            cluster_bits: header.cluster_bits,
        })
    }

    pub fn entries(&self) -> &[L1Entry] {
        &self.entries
    }

    /// Translates a virtual offset into its L2 entry, re-reading one cluster
    /// of L2 table from the backing store on every call.
    pub fn find_l2_entry<R: ByteRangeReader>(
        &self,
        reader: &mut R,
        virtual_offset: u64,
    ) -> Qcow2Result<L2Entry> {
        let cluster_idx = virtual_offset / self.cluster_size;
        let l1_idx = (cluster_idx / self.l2_entries_per_table) as usize;
        let l2_idx = cluster_idx % self.l2_entries_per_table;

        let Some(l1_entry) = self.entries.get(l1_idx) else {
            return Ok(unallocated_entry());
        };
        if l1_entry.l2_table_offset == 0 {
            return Ok(unallocated_entry());
        }

        let l2_table = read_exact_at(reader, l1_entry.l2_table_offset, self.cluster_size as usize)?;
        extract_l2_entry(&l2_table, l2_idx, self.cluster_bits)
    }
}

fn unallocated_entry() -> L2Entry {
    L2Entry {
        flag: false,
        descriptor: L2Descriptor::Standard {
            all_zero: false,
            data_offset: 0,
        },
    }
}

/// Decodes one 8-byte big-endian L2 word at `index` within `block`.
///
/// Bit-field widths depend on `cluster_bits`; see `split` below. Two bugs
/// present in the implementation this format was distilled from are fixed
/// here: the byte stride is `index * 8` (not `index`), and the sector-count
/// mask is `(1 << N) - 1` (N ones), not `1 << N`.
fn extract_l2_entry(block: &[u8], index: u64, cluster_bits: u32) -> Qcow2Result<L2Entry> {
    let offset = (index * L2_ENTRY_SIZE) as usize;
    let raw = u64::from_be_bytes(block[offset..offset + 8].try_into().unwrap());

    let flag = (raw >> 63) & 1 == 1;
    let type_bit = (raw >> 62) & 1;

    let descriptor = if type_bit == 0 {
        L2Descriptor::Standard {
            all_zero: raw & 1 == 1,
            data_offset: raw & OFFSET_MASK_9_55,
        }
    } else {
        let x = cluster_bits - 8;
        let split = 62 - x;
        let data_offset = raw & ((1u64 << split) - 1);
        let sector_count_bits = 62 - split;
        let additional_sectors = ((raw >> split) & ((1u64 << sector_count_bits) - 1)) as u32;
        L2Descriptor::Compressed {
            data_offset,
            additional_sectors,
        }
    };

    Ok(L2Entry { flag, descriptor })
}

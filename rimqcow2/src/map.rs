// SPDX-License-Identifier: MIT

//! The map builder: walks the virtual address space cluster by cluster,
//! classifies each cluster, and emits a run-length-merged region list.

use crate::error::Qcow2Result;
use crate::l1l2::{L1Table, L2Descriptor, L2Entry};
use crate::reader::ByteRangeReader;

/// A maximal run of adjacent virtual clusters sharing the same
/// `{present, zero, data, compressed}` classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub length: u64,
    pub depth: u32,
    pub present: bool,
    pub zero: bool,
    pub data: bool,
    pub compressed: bool,
    /// Host byte offset, present only for non-zero standard clusters.
    pub host_offset: Option<u64>,
}

impl Region {
    /// Whether two regions are mergeable: host offset and depth are not merge keys.
    fn mergeable_with(&self, other: &Region) -> bool {
        self.present == other.present
            && self.zero == other.zero
            && self.data == other.data
            && self.compressed == other.compressed
    }
}

/// The per-cluster classification, before run-merging.
struct ClusterClass {
    present: bool,
    zero: bool,
    data: bool,
    compressed: bool,
    host_offset: Option<u64>,
    depth: u32,
}

fn classify(entry: &L2Entry, has_backing_file: bool) -> ClusterClass {
    match entry.descriptor {
        L2Descriptor::Compressed { .. } => ClusterClass {
            present: true,
            zero: false,
            data: true,
            compressed: true,
            host_offset: None,
            depth: 0,
        },
        L2Descriptor::Standard { all_zero: true, .. } => ClusterClass {
            present: true,
            zero: true,
            data: false,
            compressed: false,
            host_offset: None,
            depth: 0,
        },
        L2Descriptor::Standard {
            all_zero: false,
            data_offset: 0,
        } if !entry.flag => {
            // Unallocated: treated as present-from-backing if one is
            // configured, else plain unallocated (absent, reads as zero).
            ClusterClass {
                present: false,
                zero: true,
                data: false,
                compressed: false,
                host_offset: None,
                depth: if has_backing_file { 1 } else { 0 },
            }
        }
        L2Descriptor::Standard { data_offset, .. } => ClusterClass {
            present: true,
            zero: false,
            data: true,
            compressed: false,
            host_offset: Some(data_offset),
            depth: 0,
        },
    }
}

/// Walks `0..virtual_size` in `cluster_size` steps, folding adjacent
/// equivalent clusters into merged regions.
pub fn build_map<R: ByteRangeReader>(
    reader: &mut R,
    l1_table: &L1Table,
    virtual_size: u64,
    cluster_size: u64,
    has_backing_file: bool,
) -> Qcow2Result<Vec<Region>> {
    let mut regions = Vec::new();
    let mut offset = 0u64;

    let mut active: Option<Region> = None;

    while offset < virtual_size {
        let entry = l1_table.find_l2_entry(reader, offset)?;
        let class = classify(&entry, has_backing_file);
        let length = cluster_size.min(virtual_size - offset);

        let candidate = Region {
            start: offset,
            length,
            depth: class.depth,
            present: class.present,
            zero: class.zero,
            data: class.data,
            compressed: class.compressed,
            host_offset: class.host_offset,
        };

        active = Some(match active {
            None => candidate,
            Some(mut acc) if acc.mergeable_with(&candidate) => {
                acc.length += candidate.length;
                acc
            }
            Some(acc) => {
                regions.push(acc);
                candidate
            }
        });

        offset += length;
    }

    if let Some(acc) = active {
        regions.push(acc);
    }

    Ok(regions)
}

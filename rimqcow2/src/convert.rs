// SPDX-License-Identifier: MIT

//! Materializes the logical byte sequence of an image to a flat (raw) sink,
//! expanding compressed clusters on the fly.

use std::io::{Seek, SeekFrom, Write};

use crate::cluster::read_compressed_cluster;
use crate::error::Qcow2Result;
use crate::header::Header;
use crate::l1l2::{L1Table, L2Descriptor};
use crate::map::Region;
use crate::reader::ByteRangeReader;

/// Writes the full logical disk described by `regions` to `sink`, reading
/// source data through `reader`.
///
/// A merged region is not guaranteed to be host-contiguous (host offset is
/// not a merge key — see the map builder), so standard and compressed
/// regions are both walked one cluster at a time, re-deriving each cluster's
/// host location via `find_l2_entry`.
pub fn convert_to_raw<R: ByteRangeReader, W: Write + Seek>(
    reader: &mut R,
    l1_table: &L1Table,
    header: &Header,
    regions: &[Region],
    sink: &mut W,
) -> Qcow2Result<()> {
    let cluster_size = header.cluster_size();
    let mut scratch = vec![0u8; cluster_size as usize];

    for region in regions {
        if !region.present || region.zero || !region.data {
            zero_fill(sink, region.start, region.length)?;
            continue;
        }

        let mut offset = region.start;
        let end = region.start + region.length;
        while offset < end {
            let len = cluster_size.min(end - offset) as usize;
            let entry = l1_table.find_l2_entry(reader, offset)?;

            match entry.descriptor {
                L2Descriptor::Compressed {
                    data_offset,
                    additional_sectors,
                } => {
                    let plaintext =
                        read_compressed_cluster(reader, data_offset, additional_sectors, len)?;
                    sink.seek(SeekFrom::Start(offset))?;
                    sink.write_all(&plaintext)?;
                }
                L2Descriptor::Standard { data_offset, .. } if data_offset != 0 => {
                    let n = reader.read_at(&mut scratch[..len], data_offset)?;
                    if n < len {
                        return Err(crate::error::Qcow2Error::UnexpectedEOF);
                    }
                    sink.seek(SeekFrom::Start(offset))?;
                    sink.write_all(&scratch[..len])?;
                }
                _ => zero_fill(sink, offset, len as u64)?,
            }

            offset += len as u64;
        }
    }

    Ok(())
}

fn zero_fill<W: Write + Seek>(sink: &mut W, start: u64, length: u64) -> Qcow2Result<()> {
    const ZERO_BUF: [u8; 8192] = [0u8; 8192];
    sink.seek(SeekFrom::Start(start))?;
    let mut remaining = length;
    while remaining > 0 {
        let chunk = remaining.min(ZERO_BUF.len() as u64) as usize;
        sink.write_all(&ZERO_BUF[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

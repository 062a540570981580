// SPDX-License-Identifier: MIT

//! The image handle: opens a reader, parses the header, and loads the
//! refcount table and L1 table up front. Read-only for its whole lifetime.

use crate::convert::convert_to_raw;
use crate::error::{Qcow2Error, Qcow2Result};
use crate::header::Header;
use crate::l1l2::L1Table;
use crate::map::{build_map, Region};
use crate::reader::ByteRangeReader;
use crate::refcount::RefcountTable;

/// An opened QCOW2 image: header, refcount table and L1 table are all loaded
/// at open time and never change afterwards. Every operation borrows the
/// reader mutably for the duration of the call, so the reader's own
/// synchronization (if any) governs concurrent access — the image itself
/// holds no internal locks.
pub struct Qcow2Image {
    header: Header,
    refcount_table: RefcountTable,
    l1_table: L1Table,
}

impl Qcow2Image {
    /// Opens an image: parses the header, then loads the refcount table and
    /// L1 table. All-or-nothing — any failure at any step leaves no
    /// partially-constructed handle behind.
    pub fn open<R: ByteRangeReader>(reader: &mut R) -> Qcow2Result<Qcow2Image> {
        let header = Header::parse(reader)?;
        if header.is_encrypted() {
            return Err(Qcow2Error::EncryptedUnsupported);
        }

        let refcount_table = RefcountTable::load(reader, &header)?;
        let l1_table = L1Table::load(reader, &header)?;

        Ok(Qcow2Image {
            header,
            refcount_table,
            l1_table,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Builds the run-length-merged region list over the full virtual
    /// address space.
    pub fn build_map<R: ByteRangeReader>(&self, reader: &mut R) -> Qcow2Result<Vec<Region>> {
        build_map(
            reader,
            &self.l1_table,
            self.header.virtual_size,
            self.header.cluster_size(),
            self.header.has_backing_file(),
        )
    }

    /// Returns the refcount of the host cluster containing `host_offset`.
    pub fn refcount_at<R: ByteRangeReader>(
        &self,
        reader: &mut R,
        host_offset: u64,
    ) -> Qcow2Result<u64> {
        self.refcount_table.refcount_at(reader, host_offset)
    }

    /// Materializes the full logical disk to `sink`, expanding compressed
    /// clusters and zero-filling absent or explicitly-zero regions.
    pub fn convert_to_raw<R: ByteRangeReader, W: std::io::Write + std::io::Seek>(
        &self,
        reader: &mut R,
        sink: &mut W,
    ) -> Qcow2Result<()> {
        let regions = self.build_map(reader)?;
        convert_to_raw(reader, &self.l1_table, &self.header, &regions, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_image(cluster_bits: u32, virtual_size: u64) -> Vec<u8> {
        let cluster_size = 1u64 << cluster_bits;
        let mut buf = vec![0u8; (cluster_size * 3) as usize];

        buf[0..4].copy_from_slice(b"QFI\xfb");
        buf[4..8].copy_from_slice(&2u32.to_be_bytes());
        buf[20..24].copy_from_slice(&cluster_bits.to_be_bytes());
        buf[24..32].copy_from_slice(&virtual_size.to_be_bytes());

        // L1 table: one entry, at cluster 1, pointing at an empty L2 table (cluster 2).
        buf[36..40].copy_from_slice(&1u32.to_be_bytes()); // l1_size
        buf[40..48].copy_from_slice(&cluster_size.to_be_bytes()); // l1_table_offset
        let l1_entry_offset = cluster_size as usize;
        buf[l1_entry_offset..l1_entry_offset + 8].copy_from_slice(&(cluster_size * 2).to_be_bytes());

        // refcount table: zero clusters declared, so no refcount data required.
        buf[48..56].copy_from_slice(&0u64.to_be_bytes()); // refcount_table_offset
        buf[56..60].copy_from_slice(&0u32.to_be_bytes()); // refcount_table_clusters

        buf
    }

    #[test]
    fn open_succeeds_on_minimal_image_and_maps_as_fully_unallocated() {
        let cluster_bits = 16;
        let virtual_size = 1 << 20;
        let buf = minimal_image(cluster_bits, virtual_size);
        let mut cur = Cursor::new(buf);

        let image = Qcow2Image::open(&mut cur).unwrap();
        assert_eq!(image.header().cluster_bits, cluster_bits);

        let regions = image.build_map(&mut cur).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start, 0);
        assert_eq!(regions[0].length, virtual_size);
        assert!(!regions[0].present);
    }

    #[test]
    fn open_rejects_encrypted_images() {
        let mut buf = minimal_image(16, 1 << 20);
        buf[32..36].copy_from_slice(&1u32.to_be_bytes()); // crypt_method
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            Qcow2Image::open(&mut cur),
            Err(Qcow2Error::EncryptedUnsupported)
        ));
    }

    #[test]
    fn convert_of_unallocated_image_zero_fills_entire_output() {
        let cluster_bits = 16;
        let virtual_size = 1 << 17; // 2 clusters
        let buf = minimal_image(cluster_bits, virtual_size);
        let mut cur = Cursor::new(buf);
        let image = Qcow2Image::open(&mut cur).unwrap();

        let mut sink = Cursor::new(vec![0xFFu8; virtual_size as usize]);
        image.convert_to_raw(&mut cur, &mut sink).unwrap();
        assert_eq!(sink.into_inner(), vec![0u8; virtual_size as usize]);
    }

    /// Builds a file-backed image with one standard data cluster sandwiched
    /// between unallocated regions, opens it through a real `File`, and
    /// converts it through a real output file.
    #[test]
    fn file_backed_roundtrip_with_one_standard_cluster() {
        use std::fs;
        use std::io::{Read, Seek, SeekFrom};

        let cluster_bits = 16;
        let cluster_size = 1u64 << cluster_bits;
        let virtual_size = cluster_size * 4;

        let mut buf = minimal_image(cluster_bits, virtual_size);
        buf.resize((cluster_size * 4) as usize, 0);

        // L2 table (cluster 2) has 4 entries; entry index 1 points at a data
        // cluster (cluster 3) holding a recognizable byte pattern.
        let l2_offset = (cluster_size * 2) as usize;
        let data_cluster_offset = cluster_size * 3;
        buf[l2_offset + 8..l2_offset + 16].copy_from_slice(&data_cluster_offset.to_be_bytes());
        let data_start = data_cluster_offset as usize;
        buf[data_start..data_start + cluster_size as usize].fill(0x7E);

        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("image.qcow2");
        fs::write(&image_path, &buf).unwrap();

        let mut file = fs::File::open(&image_path).unwrap();
        let image = Qcow2Image::open(&mut file).unwrap();

        let regions = image.build_map(&mut file).unwrap();
        assert_eq!(regions.len(), 3);
        assert!(!regions[0].present && regions[0].length == cluster_size);
        assert!(regions[1].present && regions[1].data && !regions[1].compressed);
        assert_eq!(regions[1].length, cluster_size);
        assert!(!regions[2].present);

        let out_path = dir.path().join("image.raw");
        let mut out_file = fs::File::create(&out_path).unwrap();
        out_file.set_len(virtual_size).unwrap();
        image.convert_to_raw(&mut file, &mut out_file).unwrap();

        let mut out_file = fs::File::open(&out_path).unwrap();
        let mut expected_data = vec![0u8; cluster_size as usize];
        out_file.seek(SeekFrom::Start(cluster_size)).unwrap();
        out_file.read_exact(&mut expected_data).unwrap();
        assert_eq!(expected_data, vec![0x7Eu8; cluster_size as usize]);

        let mut tail = vec![0u8; cluster_size as usize];
        out_file.read_exact(&mut tail).unwrap();
        assert_eq!(tail, vec![0u8; cluster_size as usize]);
    }
}

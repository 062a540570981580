// SPDX-License-Identifier: MIT

//! QCOW2 header parsing: the fixed 72-byte v2 header plus the extended
//! 32-byte v3 fields, yielding the geometry constants every other
//! component derives from.

use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Qcow2Error, Qcow2Result};
use crate::reader::{read_exact_at, ByteRangeReader};

/// QCOW2 magic: `"QFI\xfb"`.
pub const QCOW2_MAGIC: u32 = 0x5146_49fb;

const MIN_CLUSTER_BITS: u32 = 9;
/// Implementation limit of the reference hypervisor (2 MiB clusters).
const MAX_CLUSTER_BITS: u32 = 21;

/// The fixed 72-byte v2 header, big-endian throughout.
#[repr(C)]
#[derive(FromBytes, KnownLayout, Immutable, Clone, Copy)]
struct HeaderV2Raw {
    magic: U32<BigEndian>,
    version: U32<BigEndian>,
    backing_file_offset: U64<BigEndian>,
    backing_file_size: U32<BigEndian>,
    cluster_bits: U32<BigEndian>,
    size: U64<BigEndian>,
    crypt_method: U32<BigEndian>,
    l1_size: U32<BigEndian>,
    l1_table_offset: U64<BigEndian>,
    refcount_table_offset: U64<BigEndian>,
    refcount_table_clusters: U32<BigEndian>,
    nb_snapshots: U32<BigEndian>,
    snapshots_offset: U64<BigEndian>,
}

/// The extended 32-byte v3 tail (bytes 72..104 of the header).
#[repr(C)]
#[derive(FromBytes, KnownLayout, Immutable, Clone, Copy)]
struct HeaderV3Extra {
    incompatible_features: U64<BigEndian>,
    compatible_features: U64<BigEndian>,
    autoclear_features: U64<BigEndian>,
    refcount_order: U32<BigEndian>,
    header_length: U32<BigEndian>,
}

/// Parsed QCOW2 header: geometry constants plus the fields kept only for
/// introspection (snapshots, feature bitmasks, crypt method).
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u32,
    pub backing_file_offset: u64,
    pub backing_file_size: u32,
    pub cluster_bits: u32,
    pub virtual_size: u64,
    pub crypt_method: u32,
    pub l1_size: u32,
    pub l1_table_offset: u64,
    pub refcount_table_offset: u64,
    pub refcount_table_clusters: u32,
    pub nb_snapshots: u32,
    pub snapshots_offset: u64,
    pub incompatible_features: u64,
    pub compatible_features: u64,
    pub autoclear_features: u64,
    pub refcount_order: u32,
    pub header_length: u32,
}

impl Header {
    /// Reads and validates the header at offset 0 of `reader`.
    pub fn parse<R: ByteRangeReader>(reader: &mut R) -> Qcow2Result<Header> {
        let buf = read_exact_at(reader, 0, 104)?;

        if &buf[0..4] != b"QFI\xfb" {
            return Err(Qcow2Error::BadMagic);
        }

        let v2 = HeaderV2Raw::read_from_bytes(&buf[0..72])
            .map_err(|_| Qcow2Error::CorruptImage("malformed v2 header"))?;

        let version = v2.version.get();
        if version != 2 && version != 3 {
            return Err(Qcow2Error::UnsupportedVersion(version));
        }

        let cluster_bits = v2.cluster_bits.get();
        if !(MIN_CLUSTER_BITS..=MAX_CLUSTER_BITS).contains(&cluster_bits) {
            return Err(Qcow2Error::CorruptImage("cluster_bits out of range"));
        }

        let (refcount_order, header_length, incompatible_features, compatible_features, autoclear_features) =
            if version == 3 {
                let extra = HeaderV3Extra::read_from_bytes(&buf[72..104])
                    .map_err(|_| Qcow2Error::CorruptImage("malformed v3 header extension"))?;
                (
                    extra.refcount_order.get(),
                    extra.header_length.get(),
                    extra.incompatible_features.get(),
                    extra.compatible_features.get(),
                    extra.autoclear_features.get(),
                )
            } else {
                (4, 72, 0, 0, 0)
            };

        if refcount_order > 6 {
            return Err(Qcow2Error::Unsupported("refcount_order > 6"));
        }

        Ok(Header {
            version,
            backing_file_offset: v2.backing_file_offset.get(),
            backing_file_size: v2.backing_file_size.get(),
            cluster_bits,
            virtual_size: v2.size.get(),
            crypt_method: v2.crypt_method.get(),
            l1_size: v2.l1_size.get(),
            l1_table_offset: v2.l1_table_offset.get(),
            refcount_table_offset: v2.refcount_table_offset.get(),
            refcount_table_clusters: v2.refcount_table_clusters.get(),
            nb_snapshots: v2.nb_snapshots.get(),
            snapshots_offset: v2.snapshots_offset.get(),
            incompatible_features,
            compatible_features,
            autoclear_features,
            refcount_order,
            header_length,
        })
    }

    /// `cluster_size = 1 << cluster_bits`, in bytes.
    #[inline]
    pub fn cluster_size(&self) -> u64 {
        1u64 << self.cluster_bits
    }

    /// Number of L2 entries covered by one L2 table (one cluster, 8 bytes/entry).
    #[inline]
    pub fn l2_entries_per_table(&self) -> u64 {
        self.cluster_size() / 8
    }

    /// Width in bits of one refcount block entry.
    #[inline]
    pub fn refcount_bits(&self) -> u32 {
        if self.version == 2 {
            16
        } else {
            1u32 << self.refcount_order
        }
    }

    /// Number of refcount block entries packed into one refcount block cluster.
    #[inline]
    pub fn refcount_entries_per_block(&self) -> u64 {
        self.cluster_size() * 8 / self.refcount_bits() as u64
    }

    /// Whether resolving data clusters must be refused (`crypt_method != 0`).
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.crypt_method != 0
    }

    /// Whether the image declares a backing file.
    #[inline]
    pub fn has_backing_file(&self) -> bool {
        self.backing_file_offset != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_v2_header(cluster_bits: u32, virtual_size: u64) -> Vec<u8> {
        let mut buf = vec![0u8; 104];
        buf[0..4].copy_from_slice(b"QFI\xfb");
        buf[4..8].copy_from_slice(&2u32.to_be_bytes());
        buf[20..24].copy_from_slice(&cluster_bits.to_be_bytes());
        buf[24..32].copy_from_slice(&virtual_size.to_be_bytes());
        buf[36..40].copy_from_slice(&1u32.to_be_bytes()); // l1_size
        buf
    }

    #[test]
    fn parses_minimal_v2_header() {
        let buf = minimal_v2_header(16, 1 << 20);
        let mut cur = Cursor::new(buf);
        let header = Header::parse(&mut cur).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.cluster_bits, 16);
        assert_eq!(header.cluster_size(), 65536);
        assert_eq!(header.virtual_size, 1 << 20);
        assert_eq!(header.refcount_bits(), 16);
        assert_eq!(header.l2_entries_per_table(), 65536 / 8);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_v2_header(16, 0);
        buf[0..4].copy_from_slice(b"XFI\xfb");
        let mut cur = Cursor::new(buf);
        assert!(matches!(Header::parse(&mut cur), Err(Qcow2Error::BadMagic)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut buf = minimal_v2_header(16, 0);
        buf[4..8].copy_from_slice(&1u32.to_be_bytes());
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            Header::parse(&mut cur),
            Err(Qcow2Error::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn rejects_cluster_bits_below_minimum() {
        let buf = minimal_v2_header(8, 0);
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            Header::parse(&mut cur),
            Err(Qcow2Error::CorruptImage(_))
        ));
    }

    #[test]
    fn parses_v3_extension() {
        let mut buf = minimal_v2_header(16, 1 << 20);
        buf[4..8].copy_from_slice(&3u32.to_be_bytes());
        buf[96..100].copy_from_slice(&5u32.to_be_bytes()); // refcount_order
        buf[100..104].copy_from_slice(&104u32.to_be_bytes()); // header_length
        let mut cur = Cursor::new(buf);
        let header = Header::parse(&mut cur).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.refcount_order, 5);
        assert_eq!(header.refcount_bits(), 32);
    }

    #[test]
    fn rejects_refcount_order_above_six() {
        let mut buf = minimal_v2_header(16, 0);
        buf[4..8].copy_from_slice(&3u32.to_be_bytes());
        buf[96..100].copy_from_slice(&7u32.to_be_bytes());
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            Header::parse(&mut cur),
            Err(Qcow2Error::Unsupported(_))
        ));
    }
}

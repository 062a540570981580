// SPDX-License-Identifier: MIT

//! The compressed reader: given a compressed descriptor, reads the
//! straddling sector range and inflates one cluster of raw DEFLATE data.

use std::io::Read;

use flate2::read::DeflateDecoder;

use crate::error::Qcow2Error;
use crate::reader::ByteRangeReader;

const SECTOR_SIZE: u64 = 512;

/// Reads and decompresses one compressed cluster.
///
/// `data_offset` is sector-aligned, not cluster-aligned; the payload spans
/// `additional_sectors + 1` sectors of 512 bytes. The stream is raw DEFLATE
/// (RFC 1951) — no zlib header, no trailing Adler-32 checksum — and decoding
/// stops once `cluster_len` plaintext bytes have been produced; any trailing
/// input belongs to an adjacent compressed cluster and is ignored.
pub fn read_compressed_cluster<R: ByteRangeReader>(
    reader: &mut R,
    data_offset: u64,
    additional_sectors: u32,
    cluster_len: usize,
) -> Result<Vec<u8>, Qcow2Error> {
    let nbytes = (additional_sectors as u64 + 1) * SECTOR_SIZE;
    let mut compressed = vec![0u8; nbytes as usize];
    let n = reader.read_at(&mut compressed, data_offset)?;
    compressed.truncate(n);

    let mut decoder = DeflateDecoder::new(&compressed[..]);
    let mut out = vec![0u8; cluster_len];
    let mut total = 0;
    while total < cluster_len {
        match decoder.read(&mut out[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) => return Err(Qcow2Error::DecompressError(e)),
        }
    }
    out.truncate(total);
    Ok(out)
}

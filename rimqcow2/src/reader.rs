// SPDX-License-Identifier: MIT

//! The byte-range reader abstraction: the only I/O primitive the core assumes.
//!
//! Unlike a block-I/O trait meant for read/write storage, this contract is
//! read-only and positional, and explicitly allows short reads at EOF —
//! callers decide whether a short read is acceptable for the structure they
//! asked for.

use std::io::{self, Read, Seek, SeekFrom};

/// Random-access read contract over an image: position + length -> bytes.
pub trait ByteRangeReader {
    /// Fills `buf` starting at `offset`, returning the number of bytes
    /// actually read. A short read at EOF is not an error at this layer.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

/// Adapts any `Read + Seek` stream (a file, a cursor over memory, ...) into a
/// [`ByteRangeReader`] by seeking to the requested offset before reading.
impl<T: Read + Seek> ByteRangeReader for T {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match self.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

/// Reads a full structure of known size, treating any short read as `UnexpectedEOF`.
pub(crate) fn read_exact_at<R: ByteRangeReader>(
    reader: &mut R,
    offset: u64,
    len: usize,
) -> crate::error::Qcow2Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = reader.read_at(&mut buf, offset)?;
    if n < len {
        return Err(crate::error::Qcow2Error::UnexpectedEOF);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_within_bounds() {
        let mut cur = Cursor::new(vec![1u8, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = [0u8; 4];
        let n = cur.read_at(&mut buf, 2).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [3, 4, 5, 6]);
    }

    #[test]
    fn short_read_at_eof_is_not_an_error() {
        let mut cur = Cursor::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 8];
        let n = cur.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn read_exact_at_rejects_short_read() {
        let mut cur = Cursor::new(vec![1u8, 2, 3]);
        let err = read_exact_at(&mut cur, 0, 8).unwrap_err();
        assert!(matches!(err, crate::error::Qcow2Error::UnexpectedEOF));
    }
}

// SPDX-License-Identifier: MIT

use core::fmt;
use std::io;

/// Result type for QCOW2 operations.
pub type Qcow2Result<T = ()> = core::result::Result<T, Qcow2Error>;

/// Unified error type for the QCOW2 metadata interpreter.
#[derive(Debug)]
pub enum Qcow2Error {
    /// First four bytes are not the QCOW2 magic (`QFI\xfb`).
    BadMagic,
    /// `version` field is neither 2 nor 3.
    UnsupportedVersion(u32),
    /// Internal inconsistency: misaligned table, out-of-range index, impossible field combo.
    CorruptImage(&'static str),
    /// A short read where the format requires a full structure.
    UnexpectedEOF,
    /// The underlying reader failed.
    IOError(io::Error),
    /// `crypt_method != 0` and data resolution was attempted.
    EncryptedUnsupported,
    /// The raw-DEFLATE stream was malformed.
    DecompressError(io::Error),
    /// A spec-permitted feature this core does not implement.
    Unsupported(&'static str),
}

impl Qcow2Error {
    pub fn msg(&self) -> &'static str {
        match self {
            Qcow2Error::BadMagic => "bad QCOW2 magic",
            Qcow2Error::UnsupportedVersion(_) => "unsupported QCOW2 version",
            Qcow2Error::CorruptImage(msg) => msg,
            Qcow2Error::UnexpectedEOF => "unexpected EOF reading metadata structure",
            Qcow2Error::IOError(_) => "I/O error",
            Qcow2Error::EncryptedUnsupported => "encrypted image, data resolution unsupported",
            Qcow2Error::DecompressError(_) => "DEFLATE decompression failed",
            Qcow2Error::Unsupported(msg) => msg,
        }
    }
}

impl fmt::Display for Qcow2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qcow2Error::UnsupportedVersion(v) => write!(f, "unsupported QCOW2 version {v}"),
            Qcow2Error::IOError(e) => write!(f, "I/O error: {e}"),
            Qcow2Error::DecompressError(e) => write!(f, "DEFLATE decompression failed: {e}"),
            _ => write!(f, "{}", self.msg()),
        }
    }
}

impl std::error::Error for Qcow2Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Qcow2Error::IOError(e) => Some(e),
            Qcow2Error::DecompressError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Qcow2Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Qcow2Error::UnexpectedEOF
        } else {
            Qcow2Error::IOError(e)
        }
    }
}

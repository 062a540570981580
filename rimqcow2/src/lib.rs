// SPDX-License-Identifier: MIT

//! QCOW2 metadata interpreter and cluster-resolution engine.
//!
//! Parses a QCOW2 header, resolves the two-level L1/L2 cluster mapping and
//! the refcount structures, inflates compressed clusters, and builds a
//! run-length-merged map of the virtual address space. No write support: the
//! crate reads and converts, it does not allocate clusters or grow images.

pub mod cluster;
pub mod convert;
pub mod error;
pub mod header;
pub mod image;
pub mod l1l2;
pub mod map;
pub mod refcount;
mod reader;

pub mod prelude {
    pub use super::error::{Qcow2Error, Qcow2Result};
    pub use super::header::Header;
    pub use super::image::Qcow2Image;
    pub use super::l1l2::{L1Entry, L2Descriptor, L2Entry};
    pub use super::map::Region;
    pub use super::reader::ByteRangeReader;
}

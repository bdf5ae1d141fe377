//! content kept inside the inode record
//!
//! inline bytes `[0, FIXED_REGION_SIZE)` live in the block pointer array,
//! the rest in the value of the `system.data` extended attribute.
//! Everything here runs under the inline lock of the inode, the record it
//! works on is the one that lock guards.
mod capacity;
mod convert;
mod dir;
mod file;
mod locator;
mod store;

pub use capacity::*;
pub use dir::{InlineDirEntry, InlineDirIter, InlineInsert};
pub use file::{
    read_inline_page, Extent, InlineMapping, InlineWrite, WriteBegin, FIEMAP_EXTENT_DATA_INLINE,
    FIEMAP_EXTENT_LAST, FIEMAP_EXTENT_NOT_ALIGNED,
};
pub use locator::*;
pub use store::*;

use super::{xattr::XattrNamespace, N_BLOCKS};

/// bytes of inline content held by the block pointer array
pub const FIXED_REGION_SIZE: usize = N_BLOCKS * 4;
pub(crate) const INLINE_DATA_INDEX: u8 = XattrNamespace::System.index();
pub(crate) const INLINE_DATA_NAME: &[u8] = b"data";

/// where an inline directory keeps its parent inode number
pub const INLINE_DOTDOT_OFFSET: usize = 2;
pub const INLINE_DOTDOT_SIZE: usize = 4;

#[cfg(test)]
mod tests;

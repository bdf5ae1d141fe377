//! our custom filesystem, small files and directories live inside their inode
mod block_dir;
pub mod block_group;
pub mod directory;
pub mod filekind;
pub mod fs_layout;
pub mod inline;
pub mod inode;
pub mod journal;
pub mod page;
pub mod superblock;
pub mod xattr;
mod fs_api_impl;
pub(crate) use block_group::*;
pub use directory::{DirCursor, DirEntryInfo};
pub use filekind::*;
pub use inline::{
    Extent, InlineMapping, WriteBegin, FIEMAP_EXTENT_DATA_INLINE, FIEMAP_EXTENT_LAST, FIEMAP_EXTENT_NOT_ALIGNED,
};
pub use fs_layout::*;
pub use inode::*;
pub use superblock::*;

const FS_MAGIC: u32 = 0x1324a;
pub const ROOT_INODE: u64 = 1;
/// on-disk size of one inode record
pub const INODE_SIZE: u32 = 512;
/// leading part of a record holding the encoded [Inode]
pub const INODE_CORE_SIZE: u32 = 256;
/// extra space reserved after the core for newly created inodes
pub const DEFAULT_EXTRA_ISIZE: u16 = 32;
const DIRECT_POINTERS: u8 = 12;
/// 12 direct pointers, indirect, double and triple indirect
pub const N_BLOCKS: usize = 15;
pub const PAGE_SIZE: usize = 4096;

pub type Errno = i32;
/// reported when on-disk metadata does not make sense
pub const EFSCORRUPTED: Errno = libc::EUCLEAN;

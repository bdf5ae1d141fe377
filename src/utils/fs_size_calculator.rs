//! This module contains functions to calculate the size of differennt fs components

use crate::fs::INODE_SIZE;

/// calculate needed Inode Table size
/// # Arguments
/// - `block_size`: the block size, a group holds `block_size * 8` inodes
/// # Return
/// the size of the Inode Table
/// # Example
/// ```
/// use inlinefs::utils::fs_size_calculator::inode_table_size;
/// use inlinefs::INODE_SIZE;
/// let block_size = 512;
/// let table_size = inode_table_size(block_size);
/// assert_eq!(table_size, 512 * 8 * INODE_SIZE as u64);
/// ```
pub const fn inode_table_size(block_size: u32) -> u64 {
    block_size as u64 * 8 * INODE_SIZE as u64
}

/// caculate block group size
/// # Example
/// ```
/// use inlinefs::utils::fs_size_calculator::block_group_size;
/// use inlinefs::INODE_SIZE;
/// let block_size = 512;
/// let group_size = block_group_size(block_size);
/// assert_eq!(group_size, 2 * 512 + 512 * 8 * INODE_SIZE as u64 + 512 * 512 * 8);
/// ```
pub const fn block_group_size(block_size: u32) -> u64 {
    block_size as u64 + // data bitmap
            block_size as u64 + // inode bitmap
            inode_table_size(block_size) +
            data_table_size(block_size)
}
/// calculate data table size
/// # Example
/// ```
/// use inlinefs::utils::fs_size_calculator::data_table_size;
/// let block_size = 512;
/// let table_size = data_table_size(block_size);
/// assert_eq!(table_size, 2 << 20);
/// ```
pub const fn data_table_size(block_size: u32) -> u64 {
    block_size as u64 * block_size as u64 * 8
}

/// image bytes needed for `groups` block groups plus the superblock
pub const fn image_size(block_size: u32, groups: u32) -> u64 {
    block_size as u64 + block_group_size(block_size) * groups as u64
}

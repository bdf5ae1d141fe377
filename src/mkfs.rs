//! create our filesystem
use crate::{
    fs::{SuperBlock, INODE_CORE_SIZE, INODE_SIZE},
    utils,
};
use anyhow::anyhow;
use byte_unit::{Byte, ByteUnit};
use log::info;
use memmap2::{MmapMut, MmapOptions};
use std::{fs::OpenOptions, path::Path};
use utils::traits::SerializeAndDigest;

/// smallest xattr body that still holds the inline data entry:
/// header magic, one entry header with its name, and the terminator
const MIN_INLINE_IBODY: u16 = 4 + 16 + 4 + 4;

/// how to lay out a new filesystem
#[derive(Debug, Clone)]
pub struct MkfsOptions {
    /// the size of the image file, rounded down to whole block groups
    pub file_size: u64,
    /// the number of inodes, at most `block_size * 8` per group
    pub inode_count: u64,
    pub block_size: u32,
    /// let small files and directories keep their content inside the inode
    pub inline_data: bool,
    /// checksum tails in directory blocks
    pub metadata_csum: bool,
    /// extra record space reserved after the inode core
    pub want_extra_isize: u16,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        let block_size = 512;
        MkfsOptions {
            file_size: utils::fs_size_calculator::image_size(block_size, 1),
            inode_count: block_size as u64 * 8,
            block_size,
            inline_data: true,
            metadata_csum: false,
            want_extra_isize: crate::fs::DEFAULT_EXTRA_ISIZE,
        }
    }
}

impl MkfsOptions {
    /// the superblock these options describe, or why they don't make sense
    fn superblock(&self) -> anyhow::Result<SuperBlock> {
        let block_size = self.block_size;
        if !block_size.is_power_of_two() || block_size < INODE_SIZE {
            return Err(anyhow!(
                "block size must be a power of two and at least {}, got {block_size}",
                Byte::from_bytes(INODE_SIZE as _).get_adjusted_unit(ByteUnit::B)
            ));
        }
        if self.want_extra_isize % 4 != 0 {
            return Err(anyhow!("extra inode size {} is not a multiple of 4", self.want_extra_isize));
        }
        if self.inline_data
            && INODE_CORE_SIZE as u64 + self.want_extra_isize as u64 + MIN_INLINE_IBODY as u64 > INODE_SIZE as u64
        {
            return Err(anyhow!(
                "extra inode size {} leaves no room for inline data",
                self.want_extra_isize
            ));
        }
        // check if specified file_size is enough
        // if `file_size` < superblock + a `block_group`'s size,return error
        let block_group_size = utils::fs_size_calculator::block_group_size(block_size);
        let space_needed = utils::fs_size_calculator::image_size(block_size, 1);
        if self.file_size < space_needed {
            return Err(anyhow!(
                "File size must be at least {} for block size {}",
                Byte::from_bytes(space_needed as _).get_appropriate_unit(true),
                Byte::from_bytes(block_size as _).get_adjusted_unit(ByteUnit::B),
            ));
        }
        // if file size is 1.3x block groups(for example),we will create 1 block group
        // and shrink the file size to fit 1x block group
        let groups = ((self.file_size - block_size as u64) / block_group_size) as u32;
        let inode_count = self.inode_count.clamp(1, groups as u64 * block_size as u64 * 8);

        // use `users` crate to get the uid and gid of this program
        let uid = users::get_effective_uid();
        let gid = users::get_effective_gid();
        let mut superblock = SuperBlock::new(inode_count, block_size, groups, uid, gid);
        superblock.feature_inline_data = self.inline_data;
        superblock.feature_metadata_csum = self.metadata_csum;
        superblock.want_extra_isize = self.want_extra_isize;
        Ok(superblock)
    }
}

/// bytes the image of `superblock` takes
fn image_len(superblock: &SuperBlock) -> u64 {
    utils::fs_size_calculator::image_size(superblock.block_size, superblock.groups)
}

/// write an empty filesystem into `image`, which must be zeroed and large enough
fn format_image(image: &mut [u8], superblock: &mut SuperBlock) -> anyhow::Result<()> {
    if (image.len() as u64) < image_len(superblock) {
        return Err(anyhow!("image is too small for {} block groups", superblock.groups));
    }
    let encoded = superblock.serialize()?;
    if encoded.len() > superblock.block_size as usize {
        return Err(anyhow!("superblock does not fit in one block"));
    }
    // all bitmaps and tables stay zero, the root directory is made on first open
    image[..encoded.len()].copy_from_slice(&encoded);
    Ok(())
}

/// create a new filesystem in a new image file
/// # Params
/// - `image_file_path`: the path of the image file, must not exist yet
/// - `options`: sizes and features of the filesystem
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P, options: &MkfsOptions) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let mut superblock = options.superblock()?;
    // open image file and prepare to write fs components
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_file_path.as_ref())?;
    // all other region are set to zero using `set_len` method
    file.set_len(image_len(&superblock))?;

    let mut file_mmap_area = unsafe { MmapMut::map_mut(&file)? };
    format_image(&mut file_mmap_area, &mut superblock)?;
    file_mmap_area.flush()?;
    info!(
        "created {} with {} block groups of {} byte blocks, inline data {}",
        image_file_path.as_ref().display(),
        superblock.groups,
        superblock.block_size,
        if superblock.feature_inline_data { "on" } else { "off" }
    );
    Ok(())
}

/// a formatted filesystem image in anonymous memory, ready for [MyFS::from_image](crate::MyFS::from_image)
pub fn mkfs_in_memory(options: &MkfsOptions) -> anyhow::Result<MmapMut> {
    let mut superblock = options.superblock()?;
    let mut image = MmapOptions::new().len(image_len(&superblock) as usize).map_anon()?;
    format_image(&mut image, &mut superblock)?;
    Ok(image)
}

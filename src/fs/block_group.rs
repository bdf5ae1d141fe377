use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::anyhow;
use bitvec::prelude::*;

use crate::utils::*;

/// allocation state of one block group: which inodes and data blocks are taken
#[derive(Debug, Default, Clone)]
pub struct Group {
    pub data_bitmap: BitVec<u8, Lsb0>,
    pub inode_bitmap: BitVec<u8, Lsb0>,
}
/// for serialize and deserialize
impl Group {
    /// write the bitmaps of `groups` to their places in the image
    pub fn serialize_into<W>(mut w: W, block_size: u32, groups: &[(usize, &Group)]) -> anyhow::Result<()>
    where
        W: Write + Seek,
    {
        for (idx, g) in groups {
            w.seek(SeekFrom::Start(Self::bitmap_position(block_size, *idx)))?;
            w.write_all(g.inode_bitmap.as_raw_slice())?;
            w.write_all(g.data_bitmap.as_raw_slice())?;
        }

        Ok(())
    }

    pub fn deserialize_from<R>(mut r: R, block_size: u32, group_count: u32) -> anyhow::Result<Vec<Group>>
    where
        R: Read + Seek,
    {
        if group_count == 0 {
            return Err(anyhow!("filesystem has no block group"));
        }
        let mut groups = Vec::with_capacity(group_count as usize);
        let mut buf = vec![0; block_size as usize];

        for idx in 0..group_count as usize {
            r.seek(SeekFrom::Start(Self::bitmap_position(block_size, idx)))?;
            r.read_exact(&mut buf)?;
            let inode_bitmap = BitVec::<u8, Lsb0>::from_slice(&buf);
            r.read_exact(&mut buf)?;
            let data_bitmap = BitVec::<u8, Lsb0>::from_slice(&buf);
            groups.push(Group::new(inode_bitmap, data_bitmap));
        }

        Ok(groups)
    }

    #[inline]
    fn bitmap_position(block_size: u32, idx: usize) -> u64 {
        block_size as u64 // for `SuperBlock`
            + fs_size_calculator::block_group_size(block_size) * idx as u64
    }
}
impl Group {
    pub fn new(inode_bitmap: BitVec<u8, Lsb0>, data_bitmap: BitVec<u8, Lsb0>) -> Self {
        Group {
            inode_bitmap,
            data_bitmap,
        }
    }
}
/// for inode and data block allocation
impl Group {
    /// check if inode exists
    /// # Params
    /// - `i`: inode index inside this group,start at 1
    pub fn has_inode(&self, i: usize) -> bool {
        i > 0 && self.inode_bitmap.get(i - 1).as_deref() == Some(&true)
    }

    /// check if data block exists
    /// # Params
    /// - `i`: data block index inside this group,start at 1
    pub fn has_data_block(&self, i: usize) -> bool {
        i > 0 && self.data_bitmap.get(i - 1).as_deref() == Some(&true)
    }

    /// calculate the number of free inodes
    pub fn free_inodes(&self) -> usize {
        self.inode_bitmap.count_zeros()
    }

    /// calculate the number of free data blocks
    pub fn free_data_blocks(&self) -> usize {
        self.data_bitmap.count_zeros()
    }

    /// allocate the first free inode
    pub fn allocate_inode(&mut self) -> Option<usize> {
        let index = self.inode_bitmap.first_zero()?;
        self.inode_bitmap.set(index, true);
        Some(index + 1)
    }

    /// allocate a free data block, searching from `goal` first
    /// # Params
    /// - `goal`: preferred index,start at 1
    pub fn allocate_data_block(&mut self, goal: Option<usize>) -> Option<usize> {
        let from_goal = goal
            .filter(|goal| *goal > 0 && *goal <= self.data_bitmap.len())
            .and_then(|goal| self.data_bitmap[goal - 1..].first_zero().map(|p| p + goal - 1));
        let index = from_goal.or_else(|| self.data_bitmap.first_zero())?;
        self.data_bitmap.set(index, true);
        Some(index + 1)
    }

    /// release data block
    /// # Params
    /// - `index`: data block index,start at 1
    pub fn release_data_block(&mut self, index: usize) {
        self.data_bitmap.set(index - 1, false);
    }

    /// release inode
    /// # Params
    /// - `index`: inode index,start at 1
    pub fn release_inode(&mut self, index: usize) {
        self.inode_bitmap.set(index - 1, false);
    }
}

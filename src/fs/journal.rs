//! deferred transactions
//!
//! a [Handle] collects every buffer an operation changes; nothing reaches the
//! image until [MyFS::journal_stop](super::MyFS::journal_stop) applies them all
//! under the image lock. Dropping or aborting a handle throws the buffers away.
use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::{inode::InodeRecord, Errno};

/// what a staged buffer will overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BufferKey {
    /// an inode record
    Inode(u64),
    /// a data block
    Block(u32),
}

#[derive(Debug)]
pub struct Handle {
    id: u64,
    pub(crate) buffers: BTreeMap<BufferKey, Vec<u8>>,
    pub(crate) superblock_dirty: bool,
    pub(crate) dirty_groups: BTreeSet<usize>,
    /// allocated by this transaction, given back on abort
    pub(crate) allocated_blocks: Vec<u32>,
    pub(crate) allocated_inodes: Vec<u64>,
    /// released once the transaction commits
    pub(crate) freed_blocks: Vec<u32>,
    pub(crate) freed_inodes: Vec<u64>,
    finished: bool,
}

impl Handle {
    pub(crate) fn new(id: u64) -> Self {
        Handle {
            id,
            buffers: BTreeMap::new(),
            superblock_dirty: false,
            dirty_groups: BTreeSet::new(),
            allocated_blocks: Vec::new(),
            allocated_inodes: Vec::new(),
            freed_blocks: Vec::new(),
            freed_inodes: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// stage the current state of an inode record
    pub fn mark_inode_dirty(&mut self, record: &mut InodeRecord) -> Result<(), Errno> {
        let bytes = record.encode()?;
        self.buffers
            .insert(BufferKey::Inode(record.inode.inode_number), bytes);
        Ok(())
    }

    pub fn staged_inode(&self, ino: u64) -> Option<&[u8]> {
        self.buffers.get(&BufferKey::Inode(ino)).map(Vec::as_slice)
    }

    /// a zeroed buffer for a block whose old content does not matter
    pub fn get_create_access(&mut self, block: u32, block_size: usize) -> &mut [u8] {
        let buf = self
            .buffers
            .entry(BufferKey::Block(block))
            .or_insert_with(Vec::new);
        buf.clear();
        buf.resize(block_size, 0);
        buf
    }

    /// the staged copy of `block`, loaded with `load` the first time
    pub fn get_write_access<F>(&mut self, block: u32, load: F) -> Result<&mut [u8], Errno>
    where
        F: FnOnce() -> Result<Vec<u8>, Errno>,
    {
        let key = BufferKey::Block(block);
        if !self.buffers.contains_key(&key) {
            let bytes = load()?;
            self.buffers.insert(key, bytes);
        }
        Ok(self
            .buffers
            .get_mut(&key)
            .map(Vec::as_mut_slice)
            .unwrap_or_default())
    }

    pub fn staged_block(&self, block: u32) -> Option<&[u8]> {
        self.buffers.get(&BufferKey::Block(block)).map(Vec::as_slice)
    }

    pub fn mark_superblock_dirty(&mut self) {
        self.superblock_dirty = true;
    }

    pub fn mark_group_dirty(&mut self, group: usize) {
        self.dirty_groups.insert(group);
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                "transaction {} dropped, discarding {} staged buffers",
                self.id,
                self.buffers.len()
            );
        }
    }
}

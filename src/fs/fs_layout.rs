//! what does our filesystem look like in the memory

use crate::utils::{self, traits::SerializeAndDigest};

use super::{
    inline,
    journal::{BufferKey, Handle},
    superblock::SuperBlock,
    Errno, FileKind, Group, Inode, InodeRecord, DIRECT_POINTERS, EFSCORRUPTED, FS_MAGIC,
    INODE_SIZE,
};
use anyhow::anyhow;
use log::{debug, error, warn};
use memmap2::MmapMut;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
const DIRECT_POINTERS_U64: u64 = DIRECT_POINTERS as u64;

/// An inode as the filesystem keeps it in memory, with its two locks.
///
/// Lock order: [size_lock](CachedInode::size_lock) first, then
/// [inline_lock](CachedInode::inline_lock), then the filesystem wide locks.
#[derive(Debug)]
pub struct CachedInode {
    pub ino: u64,
    /// guards the size fields and the choice between inline and block storage
    size_lock: RwLock<()>,
    /// guards the record: xattr layout, inline state and content
    inline_lock: RwLock<InodeRecord>,
}

impl CachedInode {
    fn new(record: InodeRecord) -> Self {
        CachedInode {
            ino: record.inode.inode_number,
            size_lock: RwLock::new(()),
            inline_lock: RwLock::new(record),
        }
    }

    pub fn size_lock(&self) -> &RwLock<()> {
        &self.size_lock
    }

    pub fn inline_lock(&self) -> &RwLock<InodeRecord> {
        &self.inline_lock
    }

    /// a copy of the inode fields
    pub fn inode(&self) -> Inode {
        self.inline_lock.read().inode.clone()
    }
}

/// it has the following layout:
/// - superblock
/// - block groups, each with an inode bitmap, a data bitmap, an inode table and data blocks
#[derive(Debug)]
pub struct MyFS {
    /// the superblock of this filesystem
    superblock: Mutex<SuperBlock>,
    /// data block groups of this filesystem
    block_groups: Mutex<Vec<Group>>,
    /// the image, a file or an anonymous mapping
    image: RwLock<MmapMut>,
    file_backed: bool,
    block_size: u32,
    inodes: Mutex<HashMap<u64, Arc<CachedInode>>>,
    next_transaction: AtomicU64,
}

impl MyFS {
    /// open a filesystem image created by [mkfs](crate::mkfs::mkfs)
    /// # Params
    /// - `image_path`: the path of the image file,\
    /// something like `Block Device`,like **/dev/sda1**
    /// # Return
    /// an [anyhow::Result] type,\
    /// which contains a [MyFS] instance if the operation is successful
    pub fn open<P>(image_path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        // open the "device" for read and write
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(image_path.as_ref())?;

        // Safety
        // This method returns an error when the underlying system call fails,
        // which can happen for a variety of reasons,
        // such as when the file is not open with read and write permissions.
        // from https://docs.rs/memmap2/0.5.10/memmap2/struct.MmapMut.html
        let file_mmap_area = unsafe { MmapMut::map_mut(&file)? };
        Self::load(file_mmap_area, true)
    }

    /// mount an image already mapped in memory
    pub fn from_image(image: MmapMut) -> anyhow::Result<Self> {
        Self::load(image, false)
    }

    fn load(image: MmapMut, file_backed: bool) -> anyhow::Result<Self> {
        let (mut superblock, _) = SuperBlock::deserialize(&image[..])?;
        if superblock.magic != FS_MAGIC {
            return Err(anyhow!("bad magic number {:#x}", superblock.magic));
        }
        if superblock.inode_size != INODE_SIZE {
            return Err(anyhow!(
                "unsupported inode size {}, expected {INODE_SIZE}",
                superblock.inode_size
            ));
        }
        let needed = utils::fs_size_calculator::image_size(superblock.block_size, superblock.groups);
        if (image.len() as u64) < needed {
            return Err(anyhow!("image is {} bytes, {needed} needed", image.len()));
        }
        let block_groups =
            Group::deserialize_from(Cursor::new(&image[..]), superblock.block_size, superblock.groups)?;
        superblock.update_last_mounted_at();
        let block_size = superblock.block_size;
        let orphans = superblock.orphans.clone();
        // restore the original FS state
        let fs = MyFS {
            superblock: Mutex::new(superblock),
            block_groups: Mutex::new(block_groups),
            image: RwLock::new(image),
            file_backed,
            block_size,
            inodes: Mutex::new(HashMap::new()),
            next_transaction: AtomicU64::new(1),
        };
        fs.create_root()?;
        fs.recover_orphans(&orphans)
            .map_err(|e| anyhow!("orphan recovery failed with errno {e}"))?;
        Ok(fs)
    }

    /// create root directory "/"
    fn create_root(&self) -> anyhow::Result<()> {
        let (group_index, _) = self.inode_offsets(super::ROOT_INODE);
        let has_root = self
            .block_groups
            .lock()
            .get(group_index as usize)
            .ok_or(anyhow!("can't find the first group"))?
            .has_inode(1);
        // if already has root inode, do nothing
        if has_root {
            return Ok(());
        }
        let root = super::ROOT_INODE as u32;
        self.transaction(|handle| {
            let dir = self.new_inode(handle, FileKind::Directory, 0o777)?;
            if dir.ino != super::ROOT_INODE {
                error!("root inode index must be 1, not {}", dir.ino);
                return Err(EFSCORRUPTED);
            }
            self.init_directory(handle, &dir, root)
        })
        .map_err(|e| anyhow!("failed to create the root directory, errno {e}"))
    }

    /// finish interrupted truncates and deletes of inodes left on the orphan list
    fn recover_orphans(&self, orphans: &[u64]) -> Result<(), Errno> {
        for ino in orphans {
            warn!("recovering orphan inode {ino}");
            let inode = self.iget(*ino)?;
            let (links, size) = {
                let record = inode.inline_lock().read();
                (record.inode.hard_links, record.inode.file_size)
            };
            if links == 0 {
                self.transaction(|handle| self.evict_inode(handle, &inode))?;
            } else {
                self.truncate_inode(&inode, size)?;
            }
            self.transaction(|handle| {
                self.orphan_del(handle, *ino);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// write superblock and bitmaps back and flush the image
    pub fn sync(&self) -> anyhow::Result<()> {
        let groups = self.block_groups.lock();
        let mut superblock = self.superblock.lock();
        let mut image = self.image.write();
        superblock.update_modified_at();
        let encoded = superblock.serialize()?;
        if encoded.len() > self.block_size as usize {
            return Err(anyhow!("superblock does not fit in one block"));
        }
        image[..encoded.len()].copy_from_slice(&encoded);
        let all: Vec<_> = groups.iter().enumerate().collect();
        Group::serialize_into(Cursor::new(&mut image[..]), self.block_size, &all)?;
        if self.file_backed {
            image.flush()?;
        }
        Ok(())
    }
}
/// get [SuperBlock] and [Group]s of this filesystem
impl MyFS {
    #[inline]
    pub fn superblock(&self) -> MutexGuard<'_, SuperBlock> {
        self.superblock.lock()
    }

    #[inline]
    pub fn groups(&self) -> MutexGuard<'_, Vec<Group>> {
        self.block_groups.lock()
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// bytes reserved at the end of a directory block for its checksum
    pub(crate) fn csum_size(&self) -> usize {
        if self.superblock().feature_metadata_csum {
            super::directory::DIRENT_TAIL_SIZE
        } else {
            0
        }
    }

    /// record detected corruption, the filesystem needs checking
    pub(crate) fn error_inode(&self, ino: u64, what: &str) -> Errno {
        error!("corrupted inode {ino}: {what}");
        self.superblock().errors = true;
        EFSCORRUPTED
    }
}
/// transactions
impl MyFS {
    pub fn journal_start(&self) -> Handle {
        Handle::new(self.next_transaction.fetch_add(1, Ordering::Relaxed))
    }

    /// apply everything `handle` staged to the image in one step
    pub fn journal_stop(&self, mut handle: Handle) -> Result<(), Errno> {
        handle.finish();
        let mut groups = self.block_groups.lock();
        let mut superblock = self.superblock.lock();
        for block in handle.freed_blocks.drain(..) {
            let (group_index, block_index) = self.data_block_offsets(block as u64);
            if let Some(group) = groups.get_mut(group_index as usize) {
                group.release_data_block(1 + block_index as usize);
                superblock.free_blocks_count += 1;
                handle.dirty_groups.insert(group_index as usize);
            }
            handle.superblock_dirty = true;
        }
        for ino in handle.freed_inodes.drain(..) {
            let (group_index, bitmap_index) = self.inode_offsets(ino);
            if let Some(group) = groups.get_mut(group_index as usize) {
                group.release_inode(1 + bitmap_index as usize);
                superblock.free_inodes += 1;
                handle.dirty_groups.insert(group_index as usize);
            }
            handle.buffers.insert(BufferKey::Inode(ino), vec![0u8; INODE_SIZE as usize]);
            handle.superblock_dirty = true;
        }

        let mut image = self.image.write();
        for (key, bytes) in &handle.buffers {
            let position = match key {
                BufferKey::Inode(ino) => self.inode_seek_position(*ino),
                BufferKey::Block(block) => self.data_block_seek_position(*block as u64),
            } as usize;
            image[position..position + bytes.len()].copy_from_slice(bytes);
        }
        if !handle.dirty_groups.is_empty() {
            let dirty: Vec<_> = handle
                .dirty_groups
                .iter()
                .filter_map(|idx| groups.get(*idx).map(|g| (*idx, g)))
                .collect();
            Group::serialize_into(Cursor::new(&mut image[..]), self.block_size, &dirty).map_err(|e| {
                error!("failed to write block group bitmaps: {e}");
                libc::EIO
            })?;
        }
        if handle.superblock_dirty {
            let encoded = superblock.serialize().map_err(|_| libc::EIO)?;
            if encoded.len() > self.block_size as usize {
                error!("superblock does not fit in one block");
                return Err(libc::EOVERFLOW);
            }
            image[..encoded.len()].copy_from_slice(&encoded);
        }
        debug!(
            "transaction {} committed {} buffers",
            handle.id(),
            handle.buffers.len()
        );
        Ok(())
    }

    /// throw away what `handle` staged and give back what it allocated
    pub fn journal_abort(&self, mut handle: Handle) {
        handle.finish();
        let mut groups = self.block_groups.lock();
        let mut superblock = self.superblock.lock();
        for block in handle.allocated_blocks.drain(..) {
            let (group_index, block_index) = self.data_block_offsets(block as u64);
            if let Some(group) = groups.get_mut(group_index as usize) {
                group.release_data_block(1 + block_index as usize);
                superblock.free_blocks_count += 1;
            }
        }
        for ino in handle.allocated_inodes.drain(..) {
            let (group_index, bitmap_index) = self.inode_offsets(ino);
            if let Some(group) = groups.get_mut(group_index as usize) {
                group.release_inode(1 + bitmap_index as usize);
                superblock.free_inodes += 1;
            }
            self.inodes.lock().remove(&ino);
        }
        debug!("transaction {} aborted", handle.id());
    }

    /// run `f` in a transaction, committed when it succeeds and aborted otherwise
    pub fn transaction<T, F>(&self, f: F) -> Result<T, Errno>
    where
        F: FnOnce(&mut Handle) -> Result<T, Errno>,
    {
        let mut handle = self.journal_start();
        let result = f(&mut handle);
        self.end_transaction(handle, result)
    }

    /// commit `handle` when `result` is a success, abort it otherwise
    pub(crate) fn end_transaction<T>(&self, handle: Handle, result: Result<T, Errno>) -> Result<T, Errno> {
        match result {
            Ok(value) => {
                self.journal_stop(handle)?;
                Ok(value)
            }
            Err(e) => {
                self.journal_abort(handle);
                Err(e)
            }
        }
    }

    /// keep `ino` on the orphan list until [orphan_del](MyFS::orphan_del)
    pub(crate) fn orphan_add(&self, handle: &mut Handle, ino: u64) {
        self.superblock().add_orphan(ino);
        handle.mark_superblock_dirty();
    }

    pub(crate) fn orphan_del(&self, handle: &mut Handle, ino: u64) {
        self.superblock().remove_orphan(ino);
        handle.mark_superblock_dirty();
    }
}
/// [Inode] operations
impl MyFS {
    /// the in-memory inode for `ino`, read from the image the first time
    pub fn iget(&self, ino: u64) -> Result<Arc<CachedInode>, Errno> {
        if let Some(inode) = self.inodes.lock().get(&ino) {
            return Ok(inode.clone());
        }
        let mut record = self.read_record(ino)?;
        if record.inode.has_inline_data() {
            inline::find_inline_data_nolock(&mut record)?;
            if record.inode.inline_off == 0 {
                return Err(self.error_inode(ino, "inline data flag set without inline data"));
            }
        }
        record.inode.may_inline_data = record.inode.has_inline_data()
            || (self.superblock().feature_inline_data
                && record.inode.file_kind.may_inline()
                && record.inode.file_size == 0
                && record.inode.block.iter().all(|b| *b == 0));
        let mut inodes = self.inodes.lock();
        let inode = inodes
            .entry(ino)
            .or_insert_with(|| Arc::new(CachedInode::new(record)));
        Ok(inode.clone())
    }

    fn read_record(&self, ino: u64) -> Result<InodeRecord, Errno> {
        // locate current inode's group and bitmap index pair
        let (group_index, bitmap_index) = self.inode_offsets(ino);
        if ino == 0
            || !self
                .groups()
                .get(group_index as usize)
                .ok_or(libc::ENOENT)?
                .has_inode(1 + bitmap_index as usize)
        {
            return Err(libc::ENOENT);
        }
        // find inode physical location
        let offset = self.inode_seek_position(ino) as usize;
        let image = self.image.read();
        let record = InodeRecord::decode(&image[offset..offset + INODE_SIZE as usize]).map_err(|e| {
            error!("failed to decode inode {ino}: {e}");
            libc::EIO
        })?;
        if record.inode.inode_number != ino {
            drop(image);
            return Err(self.error_inode(ino, "record belongs to another inode"));
        }
        Ok(record)
    }

    /// allocate and stage a fresh inode
    pub(crate) fn new_inode(&self, handle: &mut Handle, kind: FileKind, perm: u16) -> Result<Arc<CachedInode>, Errno> {
        let ino = self.allocate_inode(handle)?;
        let (feature_inline_data, extra_isize, uid, gid) = {
            let superblock = self.superblock();
            (
                superblock.feature_inline_data,
                superblock.want_extra_isize,
                superblock.uid,
                superblock.gid,
            )
        };
        let mut inode = Inode::new(ino, kind, self.block_size);
        inode.mode = kind.mode_bits() | (perm & 0o7777);
        inode.user_id = uid;
        inode.group_id = gid;
        inode.extra_isize = extra_isize;
        inode.may_inline_data = feature_inline_data && kind.may_inline();
        let mut record = InodeRecord::new(inode);
        handle.mark_inode_dirty(&mut record)?;
        let cached = Arc::new(CachedInode::new(record));
        self.inodes.lock().insert(ino, cached.clone());
        Ok(cached)
    }

    /// free the blocks and the slot of an inode nobody links to anymore
    pub(crate) fn evict_inode(&self, handle: &mut Handle, inode: &CachedInode) -> Result<(), Errno> {
        let mut record = inode.inline_lock().write();
        if !record.inode.has_inline_data() {
            self.release_blocks_from(handle, &mut record, 0)?;
        }
        handle.freed_inodes.push(inode.ino);
        self.inodes.lock().remove(&inode.ino);
        Ok(())
    }

    // (group_block_index, bitmap_index),start at 1
    #[inline]
    fn inode_offsets(&self, index: u64) -> (u64, u64) {
        let inodes_per_group = self.block_size as u64 * 8;
        let index = index.max(1);
        let inode_bg = (index - 1) / inodes_per_group;
        let bitmap_index = (index - 1) & (inodes_per_group - 1);
        (inode_bg, bitmap_index)
    }

    /// byte position of an inode record in the image
    #[inline]
    pub(crate) fn inode_seek_position(&self, index: u64) -> u64 {
        let (group_index, bitmap_index) = self.inode_offsets(index);

        let block_size = self.block_size as u64;
        block_size + // for `SuperBlock`
        group_index
            * utils::fs_size_calculator::block_group_size(self.block_size)
            + 2 * block_size // inode bitmap and block bitmap
            + bitmap_index * INODE_SIZE as u64
    }

    #[inline]
    fn data_block_offsets(&self, index: u64) -> (u64, u64) {
        let data_blocks_per_group = self.block_size as u64 * 8;
        let index = index.max(1);
        let group_index = (index - 1) / data_blocks_per_group;
        let block_index = (index - 1) & (data_blocks_per_group - 1);

        (group_index, block_index)
    }

    #[inline]
    pub(crate) fn data_block_seek_position(&self, index: u64) -> u64 {
        let (group_index, block_index) = self.data_block_offsets(index);

        let block_size = self.block_size as u64;
        block_size // superblock
            + group_index * utils::fs_size_calculator::block_group_size(self.block_size) // block_group
            + 2 * block_size // 2 block for inode bitmap and block bitmap
            + utils::fs_size_calculator::inode_table_size(self.block_size) //inode table
            + block_size * block_index // data block
    }

    fn allocate_inode(&self, handle: &mut Handle) -> Result<u64, Errno> {
        let mut groups = self.block_groups.lock();
        let mut superblock = self.superblock.lock();
        if superblock.free_inodes == 0 {
            return Err(libc::ENOSPC);
        }
        let group_index = groups
            .iter()
            .position(|g| g.free_inodes() > 0)
            .ok_or(libc::ENOSPC)?;
        let index = groups[group_index].allocate_inode().ok_or(libc::ENOSPC)?;
        superblock.free_inodes -= 1;
        let ino = index as u64 + group_index as u64 * self.block_size as u64 * 8;
        handle.allocated_inodes.push(ino);
        handle.mark_group_dirty(group_index);
        handle.mark_superblock_dirty();
        Ok(ino)
    }

    /// allocate one data block, preferably at or after `goal`
    pub(crate) fn allocate_data_block(&self, handle: &mut Handle, goal: u32) -> Result<u32, Errno> {
        let mut groups = self.block_groups.lock();
        let mut superblock = self.superblock.lock();
        let per_group = self.block_size as usize * 8;
        let (goal_group, goal_index) = if goal == 0 {
            (0, None)
        } else {
            let (g, i) = self.data_block_offsets(goal as u64);
            (g as usize, Some(1 + i as usize))
        };
        let order = (goal_group..groups.len()).chain(0..goal_group.min(groups.len()));
        for group_index in order {
            let goal = if group_index == goal_group { goal_index } else { None };
            if let Some(index) = groups[group_index].allocate_data_block(goal) {
                superblock.free_blocks_count -= 1;
                let block = (index + group_index * per_group) as u32;
                handle.allocated_blocks.push(block);
                handle.mark_group_dirty(group_index);
                handle.mark_superblock_dirty();
                return Ok(block);
            }
        }
        Err(libc::ENOSPC)
    }

    /// free `block` once `handle` commits
    pub(crate) fn free_data_block(&self, handle: &mut Handle, block: u32) {
        handle.freed_blocks.push(block);
    }

    /// take every free data block, so the next allocation fails
    #[cfg(test)]
    pub(crate) fn exhaust_data_blocks(&self) {
        self.leave_free_data_blocks(0);
    }

    /// take data blocks until only the last `keep` of the first group are free
    #[cfg(test)]
    pub(crate) fn leave_free_data_blocks(&self, keep: usize) {
        let mut groups = self.block_groups.lock();
        let mut superblock = self.superblock.lock();
        for group in groups.iter_mut() {
            group.data_bitmap.fill(true);
        }
        let first = &mut groups[0].data_bitmap;
        let len = first.len();
        first[len - keep..].fill(false);
        superblock.free_blocks_count = keep as u64;
    }
}
/// read and write data blocks
impl MyFS {
    /// a data block as the transaction sees it, or as committed without one
    pub(crate) fn read_block(&self, handle: Option<&Handle>, block: u32) -> Result<Vec<u8>, Errno> {
        if let Some(staged) = handle.and_then(|h| h.staged_block(block)) {
            return Ok(staged.to_vec());
        }
        let (group_index, block_index) = self.data_block_offsets(block as u64);
        let allocated = self
            .groups()
            .get(group_index as usize)
            .map_or(false, |g| g.has_data_block(1 + block_index as usize));
        if block == 0 || !allocated {
            error!("reading unallocated data block {block}");
            return Err(libc::EIO);
        }
        let position = self.data_block_seek_position(block as u64) as usize;
        let image = self.image.read();
        Ok(image[position..position + self.block_size as usize].to_vec())
    }

    /// the staged copy of a data block for modification
    pub(crate) fn block_write_access<'h>(&self, handle: &'h mut Handle, block: u32) -> Result<&'h mut [u8], Errno> {
        handle.get_write_access(block, || self.read_block(None, block))
    }
}
/// the block map: 12 direct pointers and one indirect block
impl MyFS {
    /// number of logical blocks the block map can address
    pub(crate) fn max_logical_blocks(&self) -> u64 {
        DIRECT_POINTERS_U64 + self.block_size as u64 / 4
    }

    /// physical block backing logical block `lblk`, if any
    pub(crate) fn bmap(&self, handle: Option<&Handle>, inode: &Inode, lblk: u64) -> Result<Option<u32>, Errno> {
        if lblk >= self.max_logical_blocks() {
            return Ok(None);
        }
        let block = if lblk < DIRECT_POINTERS_U64 {
            inode.block[lblk as usize]
        } else {
            let indirect = inode.indirect_block();
            if indirect == 0 {
                return Ok(None);
            }
            let pointers = self.read_block(handle, indirect)?;
            let at = (lblk - DIRECT_POINTERS_U64) as usize * 4;
            u32::from_le_bytes([pointers[at], pointers[at + 1], pointers[at + 2], pointers[at + 3]])
        };
        Ok((block != 0).then_some(block))
    }

    /// like [bmap](MyFS::bmap) but allocates a zeroed block when there is none
    pub(crate) fn map_block_create(
        &self,
        handle: &mut Handle,
        record: &mut InodeRecord,
        lblk: u64,
    ) -> Result<u32, Errno> {
        if lblk >= self.max_logical_blocks() {
            return Err(libc::EFBIG);
        }
        if let Some(block) = self.bmap(Some(handle), &record.inode, lblk)? {
            return Ok(block);
        }
        let goal = record.inode.block.iter().copied().filter(|b| *b != 0).max().unwrap_or(0);
        let block_size = self.block_size as usize;
        if lblk < DIRECT_POINTERS_U64 {
            let block = self.allocate_data_block(handle, goal)?;
            handle.get_create_access(block, block_size);
            record.inode.block[lblk as usize] = block;
            record.inode.block_count += 1;
            return Ok(block);
        }
        let mut indirect = record.inode.indirect_block();
        if indirect == 0 {
            indirect = self.allocate_data_block(handle, goal)?;
            handle.get_create_access(indirect, block_size);
            record.inode.set_indirect_block(indirect);
            record.inode.block_count += 1;
        }
        let block = self.allocate_data_block(handle, indirect)?;
        handle.get_create_access(block, block_size);
        let at = (lblk - DIRECT_POINTERS_U64) as usize * 4;
        self.block_write_access(handle, indirect)?[at..at + 4].copy_from_slice(&block.to_le_bytes());
        record.inode.block_count += 1;
        Ok(block)
    }

    /// free every block mapped at or after logical block `from`
    pub(crate) fn release_blocks_from(
        &self,
        handle: &mut Handle,
        record: &mut InodeRecord,
        from: u64,
    ) -> Result<(), Errno> {
        for lblk in from..DIRECT_POINTERS_U64 {
            let block = &mut record.inode.block[lblk as usize];
            if *block != 0 {
                handle.freed_blocks.push(*block);
                *block = 0;
                record.inode.block_count -= 1;
            }
        }
        let indirect = record.inode.indirect_block();
        if indirect == 0 {
            return Ok(());
        }
        let first = from.saturating_sub(DIRECT_POINTERS_U64) as usize;
        let pointers = self.block_write_access(handle, indirect)?;
        let mut freed = Vec::new();
        for slot in pointers.chunks_exact_mut(4).skip(first) {
            let block = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
            if block != 0 {
                freed.push(block);
                slot.fill(0);
            }
        }
        record.inode.block_count -= freed.len() as u32;
        handle.freed_blocks.extend(freed);
        if first == 0 {
            self.free_data_block(handle, indirect);
            record.inode.set_indirect_block(0);
            record.inode.block_count -= 1;
        }
        Ok(())
    }
}

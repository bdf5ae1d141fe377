//! file and directory operations, the surface embedders and tests call
use log::{debug, info};

use crate::utils::time_util;

use super::{
    block_dir::BlockDirEntry,
    directory::{DirCursor, DirEntryInfo, MAX_NAME_LEN},
    inline::{self, Extent, InlineDirEntry, InlineInsert, InlineMapping, WriteBegin, FIEMAP_EXTENT_LAST},
    journal::Handle,
    page::Page,
    CachedInode, Errno, FileKind, Inode, InodeRecord, MyFS,
};

/// where a directory entry lives
#[derive(Debug, Clone, Copy)]
enum EntryLocation {
    Inline(usize),
    Block { lblk: u64, offset: usize },
}

fn check_name(name: &str) -> Result<&[u8], Errno> {
    if name.is_empty() || name.contains('/') {
        return Err(libc::EINVAL);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(libc::ENAMETOOLONG);
    }
    Ok(name.as_bytes())
}

/// bytes `[offset, end)` of an inline file from its first page, zeros past the page
fn inline_range(page: &Page, offset: u64, end: u64) -> Vec<u8> {
    let mut content = vec![0u8; (end - offset) as usize];
    let page_end = end.min(page.data().len() as u64);
    if offset < page_end {
        content[..(page_end - offset) as usize].copy_from_slice(&page.data()[offset as usize..page_end as usize]);
    }
    content
}

/// directory entry helpers shared by the operations below
impl MyFS {
    fn find_entry(
        &self,
        handle: Option<&Handle>,
        dir: &InodeRecord,
        name: &[u8],
    ) -> Result<Option<(u64, EntryLocation)>, Errno> {
        if !dir.inode.is_dir() {
            return Err(libc::ENOTDIR);
        }
        if dir.inode.has_inline_data() {
            let found = self.find_inline_dir_entry(dir, name)?;
            return Ok(found.map(|InlineDirEntry { offset, inode, .. }| (inode as u64, EntryLocation::Inline(offset))));
        }
        let found = self.find_block_entry(handle, dir, name)?;
        Ok(found.map(|BlockDirEntry { lblk, offset, entry }| {
            (entry.inode as u64, EntryLocation::Block { lblk, offset })
        }))
    }

    fn add_entry(
        &self,
        handle: &mut Handle,
        dir: &mut InodeRecord,
        name: &[u8],
        ino: u64,
        kind: FileKind,
    ) -> Result<(), Errno> {
        if dir.inode.has_inline_data() {
            match self.try_add_inline_entry(handle, dir, name, ino as u32, kind.into())? {
                InlineInsert::Added => return Ok(()),
                InlineInsert::Converted => {}
            }
        }
        self.add_block_entry(handle, dir, name, ino as u32, kind.into())
    }

    fn remove_entry(&self, handle: &mut Handle, dir: &mut InodeRecord, location: EntryLocation) -> Result<(), Errno> {
        match location {
            EntryLocation::Inline(offset) => self.delete_inline_entry(handle, dir, offset),
            EntryLocation::Block { lblk, offset } => self.delete_block_entry(handle, dir, lblk, offset),
        }
    }

    /// give a new directory its "." and "..", inline when it can be
    pub(crate) fn init_directory(&self, handle: &mut Handle, dir: &CachedInode, parent: u32) -> Result<(), Errno> {
        let mut record = dir.inline_lock().write();
        match self.try_create_inline_dir(handle, &mut record, parent) {
            Ok(()) => return Ok(()),
            Err(libc::ENOSPC) => {
                debug!("directory {} can't be inline, using a block", dir.ino);
            }
            Err(e) => return Err(e),
        }
        self.init_block_dir(handle, &mut record, parent)
    }

    fn is_empty_dir(&self, dir: &InodeRecord) -> Result<bool, Errno> {
        if dir.inode.has_inline_data() {
            self.empty_inline_dir(dir)
        } else {
            self.empty_block_dir(dir)
        }
    }
}

/// file content helpers
impl MyFS {
    fn read_blocks(&self, record: &InodeRecord, offset: u64, end: u64) -> Result<Vec<u8>, Errno> {
        let block_size = self.block_size() as u64;
        let mut buf = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let lblk = pos / block_size;
            let in_block = (pos % block_size) as usize;
            let n = (block_size - in_block as u64).min(end - pos) as usize;
            match self.bmap(None, &record.inode, lblk)? {
                Some(block) => buf.extend_from_slice(&self.read_block(None, block)?[in_block..in_block + n]),
                // a hole
                None => buf.resize(buf.len() + n, 0),
            }
            pos += n as u64;
        }
        Ok(buf)
    }

    fn write_blocks(&self, inode: &CachedInode, offset: u64, data: &[u8]) -> Result<usize, Errno> {
        let block_size = self.block_size() as u64;
        self.transaction(|handle| {
            let mut record = inode.inline_lock().write();
            let mut done = 0;
            while done < data.len() {
                let pos = offset + done as u64;
                let in_block = (pos % block_size) as usize;
                let n = (block_size as usize - in_block).min(data.len() - done);
                let block = self.map_block_create(handle, &mut record, pos / block_size)?;
                self.block_write_access(handle, block)?[in_block..in_block + n]
                    .copy_from_slice(&data[done..done + n]);
                done += n;
            }
            record.inode.adjust_size(offset + data.len() as u64);
            record.inode.update_modified_at();
            handle.mark_inode_dirty(&mut record)?;
            Ok(data.len())
        })
    }

    fn truncate_blocks(&self, inode: &CachedInode, size: u64) -> Result<(), Errno> {
        let block_size = self.block_size() as u64;
        self.transaction(|handle| {
            self.orphan_add(handle, inode.ino);
            Ok(())
        })?;
        self.transaction(|handle| {
            let mut record = inode.inline_lock().write();
            if size < record.inode.file_size {
                self.release_blocks_from(handle, &mut record, size.div_ceil(block_size))?;
                let tail = (size % block_size) as usize;
                if tail != 0 {
                    if let Some(block) = self.bmap(Some(&*handle), &record.inode, size / block_size)? {
                        self.block_write_access(handle, block)?[tail..].fill(0);
                    }
                }
            }
            record.inode.file_size = size;
            record.inode.disk_size = size;
            // a sized file keeps its content in blocks, holes included
            if size > 0 {
                record.inode.may_inline_data = false;
            }
            record.inode.update_modified_at();
            self.orphan_del(handle, inode.ino);
            handle.mark_inode_dirty(&mut record)
        })
    }

    /// set the size of `inode`, the content-size lock is taken here
    pub(crate) fn truncate_inode(&self, inode: &CachedInode, size: u64) -> Result<(), Errno> {
        let _size_guard = inode.size_lock().write();
        let (is_dir, inline, inline_size, max) = {
            let record = inode.inline_lock().read();
            (
                record.inode.is_dir(),
                record.inode.has_inline_data(),
                record.inode.inline_size as u64,
                inline::max_inline_size(&record) as u64,
            )
        };
        if is_dir {
            return Err(libc::EISDIR);
        }
        if inline {
            if size > max {
                self.convert_inline_inode(inode)?;
            } else {
                if size > inline_size {
                    let grown = self.transaction(|handle| {
                        inline::prepare_inline_data(handle, &mut inode.inline_lock().write(), size as usize)
                    });
                    match grown {
                        Ok(()) => {}
                        Err(libc::ENOSPC) => {
                            self.convert_inline_inode(inode)?;
                            return self.truncate_blocks(inode, size);
                        }
                        Err(e) => return Err(e),
                    }
                }
                return self.inline_data_truncate(inode, size);
            }
        }
        self.truncate_blocks(inode, size)
    }
}

/// operations
impl MyFS {
    pub fn getattr(&self, ino: u64) -> Result<Inode, Errno> {
        info!("getattr() called with inode number: {ino}");
        Ok(self.iget(ino)?.inode())
    }

    pub fn lookup(&self, parent: u64, name: &str) -> Result<Inode, Errno> {
        info!("lookup() called with parent inode number: {parent} and name: {name:?}");
        let name = check_name(name)?;
        let dir = self.iget(parent)?;
        let ino = {
            let _size_guard = dir.size_lock().read();
            let record = dir.inline_lock().read();
            self.find_entry(None, &record, name)?.ok_or(libc::ENOENT)?.0
        };
        Ok(self.iget(ino)?.inode())
    }

    /// create an empty regular file
    pub fn create(&self, parent: u64, name: &str, mode: u16) -> Result<Inode, Errno> {
        info!("create() called with parent inode number: {parent} and name: {name:?}");
        self.make_node(parent, name, FileKind::RegularFile, mode)
    }

    pub fn mkdir(&self, parent: u64, name: &str, mode: u16) -> Result<Inode, Errno> {
        info!("mkdir() called with parent inode number: {parent} and name: {name:?}");
        self.make_node(parent, name, FileKind::Directory, mode)
    }

    fn make_node(&self, parent: u64, name: &str, kind: FileKind, mode: u16) -> Result<Inode, Errno> {
        let name = check_name(name)?;
        let dir = self.iget(parent)?;
        let _size_guard = dir.size_lock().write();
        self.transaction(|handle| {
            let mut dir_record = dir.inline_lock().write();
            // the insert may convert the parent before failing, an aborted
            // handle must find the record it started from
            let before = dir_record.clone();
            let made = self.link_new_node(handle, &mut dir_record, parent, name, kind, mode);
            if made.is_err() {
                *dir_record = before;
            }
            made
        })
    }

    fn link_new_node(
        &self,
        handle: &mut Handle,
        dir_record: &mut InodeRecord,
        parent: u64,
        name: &[u8],
        kind: FileKind,
        mode: u16,
    ) -> Result<Inode, Errno> {
        if self.find_entry(Some(&*handle), dir_record, name)?.is_some() {
            return Err(libc::EEXIST);
        }
        let child = self.new_inode(handle, kind, mode)?;
        if kind == FileKind::Directory {
            self.init_directory(handle, &child, parent as u32)?;
        }
        self.add_entry(handle, dir_record, name, child.ino, kind)?;
        if kind == FileKind::Directory {
            dir_record.inode.hard_links += 1;
        }
        handle.mark_inode_dirty(dir_record)?;
        Ok(child.inode())
    }

    pub fn unlink(&self, parent: u64, name: &str) -> Result<(), Errno> {
        info!("unlink() called with parent inode number: {parent} and name: {name:?}");
        let name = check_name(name)?;
        if name == b"." || name == b".." {
            return Err(libc::EISDIR);
        }
        let dir = self.iget(parent)?;
        let _size_guard = dir.size_lock().write();
        let (ino, location) = self
            .find_entry(None, &dir.inline_lock().read(), name)?
            .ok_or(libc::ENOENT)?;
        let target = self.iget(ino)?;
        let _target_guard = target.size_lock().write();
        if target.inode().is_dir() {
            return Err(libc::EISDIR);
        }
        self.transaction(|handle| {
            self.remove_entry(handle, &mut dir.inline_lock().write(), location)?;
            let mut record = target.inline_lock().write();
            record.inode.hard_links = record.inode.hard_links.saturating_sub(1);
            record.inode.metadata_changed_at = Some(time_util::now());
            if record.inode.hard_links == 0 {
                drop(record);
                self.evict_inode(handle, &target)
            } else {
                handle.mark_inode_dirty(&mut record)
            }
        })
    }

    pub fn rmdir(&self, parent: u64, name: &str) -> Result<(), Errno> {
        info!("rmdir() called with parent inode number: {parent} and name: {name:?}");
        let name = check_name(name)?;
        if name == b"." {
            return Err(libc::EINVAL);
        }
        if name == b".." {
            return Err(libc::ENOTEMPTY);
        }
        let dir = self.iget(parent)?;
        let _size_guard = dir.size_lock().write();
        let (ino, location) = self
            .find_entry(None, &dir.inline_lock().read(), name)?
            .ok_or(libc::ENOENT)?;
        let target = self.iget(ino)?;
        let _target_guard = target.size_lock().write();
        {
            let record = target.inline_lock().read();
            if !record.inode.is_dir() {
                return Err(libc::ENOTDIR);
            }
            if !self.is_empty_dir(&record)? {
                return Err(libc::ENOTEMPTY);
            }
        }
        self.transaction(|handle| {
            let mut dir_record = dir.inline_lock().write();
            self.remove_entry(handle, &mut dir_record, location)?;
            dir_record.inode.hard_links = dir_record.inode.hard_links.saturating_sub(1);
            handle.mark_inode_dirty(&mut dir_record)?;
            drop(dir_record);
            self.evict_inode(handle, &target)
        })
    }

    pub fn read(&self, ino: u64, offset: u64, size: usize) -> Result<Vec<u8>, Errno> {
        info!("read() called with inode number: {ino}, offset: {offset}, size: {size}");
        let inode = self.iget(ino)?;
        let _size_guard = inode.size_lock().read();
        let file = inode.inode();
        if file.is_dir() {
            return Err(libc::EISDIR);
        }
        if offset >= file.file_size {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(size as u64).min(file.file_size);
        let mut page = Page::new(0);
        match self.readpage_inline(&inode, &mut page) {
            Ok(_) => return Ok(inline_range(&page, offset, end)),
            Err(libc::EAGAIN) => {}
            Err(e) => return Err(e),
        }
        let record = inode.inline_lock().read();
        let content = self.read_blocks(&record, offset, end)?;
        Ok(content)
    }

    pub fn write(&self, ino: u64, offset: u64, data: &[u8]) -> Result<usize, Errno> {
        info!(
            "write() called with inode number: {ino}, offset: {offset}, {} bytes",
            data.len()
        );
        let inode = self.iget(ino)?;
        let _size_guard = inode.size_lock().write();
        let (is_dir, may_inline) = {
            let record = inode.inline_lock().read();
            (
                record.inode.is_dir(),
                record.inode.has_inline_data() || record.inode.may_inline_data,
            )
        };
        if is_dir {
            return Err(libc::EISDIR);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if may_inline {
            let pos = usize::try_from(offset).map_err(|_| libc::EFBIG)?;
            match self.try_to_write_inline_data(&inode, pos, data.len())? {
                WriteBegin::Inline(mut write) => {
                    write.page.data_mut()[pos..pos + data.len()].copy_from_slice(data);
                    return self.write_inline_data_end(&inode, write, data.len());
                }
                WriteBegin::Converted => {}
            }
        }
        self.write_blocks(&inode, offset, data)
    }

    pub fn truncate(&self, ino: u64, size: u64) -> Result<(), Errno> {
        info!("truncate() called with inode number: {ino}, size: {size}");
        let inode = self.iget(ino)?;
        self.truncate_inode(&inode, size)
    }

    /// up to `max` entries from `cursor` on, "." and ".." included
    pub fn readdir(&self, ino: u64, cursor: &mut DirCursor, max: usize) -> Result<Vec<DirEntryInfo>, Errno> {
        info!("readdir() called with inode number: {ino}");
        let dir = self.iget(ino)?;
        let _size_guard = dir.size_lock().read();
        let record = dir.inline_lock().read();
        if !record.inode.is_dir() {
            return Err(libc::ENOTDIR);
        }
        if record.inode.has_inline_data() {
            return self
                .read_inline_dir(&record, cursor)?
                .take(max)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.bad_inline_dir(ino, e));
        }
        self.read_block_dir(&record, cursor, max)
    }

    pub fn has_inline_data(&self, ino: u64) -> Result<bool, Errno> {
        info!("has_inline_data() called with inode number: {ino}");
        Ok(self.iget(ino)?.inline_lock().read().inode.has_inline_data())
    }

    /// bytes of inline capacity, 0 for a block based inode
    pub fn inline_size(&self, ino: u64) -> Result<usize, Errno> {
        info!("inline_size() called with inode number: {ino}");
        inline::inline_capacity(&self.iget(ino)?.inline_lock().read())
    }

    /// the most bytes `ino` could store inline right now
    pub fn max_inline_size(&self, ino: u64) -> Result<usize, Errno> {
        info!("max_inline_size() called with inode number: {ino}");
        Ok(inline::max_inline_size(&self.iget(ino)?.inline_lock().read()))
    }

    pub fn convert_inline_data(&self, ino: u64) -> Result<(), Errno> {
        info!("convert_inline_data() called with inode number: {ino}");
        let inode = self.iget(ino)?;
        let _size_guard = inode.size_lock().write();
        self.convert_inline_inode(&inode)
    }

    /// where the inline content is in the image, `EAGAIN` when it is in blocks
    pub fn iomap(&self, ino: u64) -> Result<InlineMapping, Errno> {
        info!("iomap() called with inode number: {ino}");
        let inode = self.iget(ino)?;
        let _size_guard = inode.size_lock().read();
        self.inline_data_iomap(&inode)
    }

    /// extents covering `[start, start + len)`
    pub fn fiemap(&self, ino: u64, start: u64, len: u64) -> Result<Vec<Extent>, Errno> {
        info!("fiemap() called with inode number: {ino}, start: {start}, len: {len}");
        let inode = self.iget(ino)?;
        let _size_guard = inode.size_lock().read();
        match self.inline_data_fiemap(&inode, start, len) {
            Ok(extent) => return Ok(extent.into_iter().collect()),
            Err(libc::EAGAIN) => {}
            Err(e) => return Err(e),
        }

        let record = inode.inline_lock().read();
        let block_size = self.block_size() as u64;
        let end = start.saturating_add(len).min(record.inode.file_size);
        let mut extents: Vec<Extent> = Vec::new();
        let mut lblk = start / block_size;
        while lblk * block_size < end {
            if let Some(block) = self.bmap(None, &record.inode, lblk)? {
                let logical = lblk * block_size;
                let physical = self.data_block_seek_position(block as u64);
                let contiguous = extents
                    .last()
                    .map_or(false, |last| last.logical + last.length == logical && last.physical + last.length == physical);
                if contiguous {
                    if let Some(last) = extents.last_mut() {
                        last.length += block_size;
                    }
                } else {
                    extents.push(Extent {
                        logical,
                        physical,
                        length: block_size,
                        flags: 0,
                    });
                }
            }
            lblk += 1;
        }
        if let Some(last) = extents.last_mut() {
            last.flags |= FIEMAP_EXTENT_LAST;
        }
        Ok(extents)
    }
}

//! regular files whose content lives in the inode
use log::{debug, info};

use super::{
    destroy_inline_data_nolock, find_inline_data_nolock, max_inline_size, prepare_inline_data,
    read_inline_data, write_inline_data, FIXED_REGION_SIZE, INLINE_DATA_INDEX, INLINE_DATA_NAME,
};
use crate::fs::{
    journal::Handle, page::Page, xattr, CachedInode, Errno, InodeRecord, MyFS, PAGE_SIZE,
};

/// the extent holds data stored with its metadata
pub const FIEMAP_EXTENT_DATA_INLINE: u32 = 0x0000_0200;
/// the extent is not block aligned
pub const FIEMAP_EXTENT_NOT_ALIGNED: u32 = 0x0000_0100;
/// the last extent of the file
pub const FIEMAP_EXTENT_LAST: u32 = 0x0000_0001;

/// one entry of a fiemap reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub logical: u64,
    pub physical: u64,
    pub length: u64,
    pub flags: u32,
}

/// where the inline content of an inode sits in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineMapping {
    /// byte address of the first inline byte in the image
    pub addr: u64,
    pub offset: u64,
    pub length: u64,
}

/// a write prepared against inline storage, finished by
/// [write_inline_data_end](MyFS::write_inline_data_end)
#[derive(Debug)]
pub struct InlineWrite {
    pub(crate) handle: Handle,
    pub page: Page,
    pub pos: usize,
    pub len: usize,
}

#[derive(Debug)]
pub enum WriteBegin {
    /// copy the new bytes into the page, then end the write
    Inline(InlineWrite),
    /// the inode is block based now, write through the block map
    Converted,
}

/// fill `page` from inline content; pages past the first are zero
pub fn read_inline_page(record: &InodeRecord, page: &mut Page) -> Result<usize, Errno> {
    if page.index > 0 {
        page.zero_segment(0, PAGE_SIZE);
        page.set_uptodate();
        return Ok(0);
    }
    let len = (record.inode.inline_size as u64).min(record.inode.file_size) as usize;
    read_inline_data(record, 0, &mut page.data_mut()[..len])?;
    page.zero_segment(len, PAGE_SIZE);
    page.set_uptodate();
    Ok(len)
}

/// the caller holds the content-size lock of `inode` in write mode through
/// [try_to_write_inline_data](MyFS::try_to_write_inline_data) and
/// [write_inline_data_end](MyFS::write_inline_data_end)
impl MyFS {
    /// make room for writing `len` bytes at `pos` inline, or convert when they can't fit
    pub fn try_to_write_inline_data(&self, inode: &CachedInode, pos: usize, len: usize) -> Result<WriteBegin, Errno> {
        let end = pos.checked_add(len).ok_or(libc::EFBIG)?;
        let max = max_inline_size(&inode.inline_lock().read());
        if end > max {
            debug!("write of [{pos}, {end}) can't stay inline in inode {}", inode.ino);
            self.convert_inline_inode(inode)?;
            return Ok(WriteBegin::Converted);
        }

        let mut handle = self.journal_start();
        let prepared = prepare_inline_data(&mut handle, &mut inode.inline_lock().write(), end);
        match prepared {
            Ok(()) => {}
            Err(libc::ENOSPC) => {
                self.journal_abort(handle);
                self.convert_inline_inode(inode)?;
                return Ok(WriteBegin::Converted);
            }
            Err(e) => {
                self.journal_abort(handle);
                return Err(e);
            }
        }

        let mut page = Page::new(0);
        let record = inode.inline_lock().read();
        // a write covering all current content has nothing to read first
        if pos > 0 || (len as u64) < record.inode.file_size {
            if let Err(e) = read_inline_page(&record, &mut page) {
                drop(record);
                self.journal_abort(handle);
                return Err(e);
            }
        }
        drop(record);
        Ok(WriteBegin::Inline(InlineWrite {
            handle,
            page,
            pos,
            len,
        }))
    }

    /// store `copied` bytes of the page at the prepared position and commit
    ///
    /// returns how many bytes made it, 0 when a short copy left the page stale
    pub fn write_inline_data_end(&self, inode: &CachedInode, write: InlineWrite, copied: usize) -> Result<usize, Errno> {
        let InlineWrite {
            mut handle,
            page,
            pos,
            len,
        } = write;
        if copied < len && !page.is_uptodate() {
            self.journal_stop(handle)?;
            return Ok(0);
        }
        let result = self.commit_inline_write(&mut handle, inode, &page.data()[pos..pos + copied], pos);
        self.end_transaction(handle, result)?;
        Ok(copied)
    }

    fn commit_inline_write(&self, handle: &mut Handle, inode: &CachedInode, bytes: &[u8], pos: usize) -> Result<(), Errno> {
        let mut record = inode.inline_lock().write();
        if !record.inode.has_inline_data() {
            return Err(self.error_inode(inode.ino, "inline data disappeared during a write"));
        }
        // the extension may have moved since the write began
        find_inline_data_nolock(&mut record)?;
        write_inline_data(&mut record, pos, bytes)?;
        record.inode.adjust_size((pos + bytes.len()) as u64);
        record.inode.update_modified_at();
        handle.mark_inode_dirty(&mut record)
    }

    /// fill `page` from inline content, `EAGAIN` when the inode is block based
    pub fn readpage_inline(&self, inode: &CachedInode, page: &mut Page) -> Result<usize, Errno> {
        let record = inode.inline_lock().read();
        if !record.inode.has_inline_data() {
            return Err(libc::EAGAIN);
        }
        read_inline_page(&record, page)
    }

    /// set the size of an inline file to `new_size`, dropping content past it
    ///
    /// the caller holds the content-size lock in write mode and has already made
    /// room when the file grows; `EAGAIN` when the inode is not inline
    pub(crate) fn inline_data_truncate(&self, inode: &CachedInode, new_size: u64) -> Result<(), Errno> {
        if !inode.inline_lock().read().inode.has_inline_data() {
            return Err(libc::EAGAIN);
        }
        self.transaction(|handle| {
            self.orphan_add(handle, inode.ino);
            Ok(())
        })?;

        let mut handle = self.journal_start();
        let result = truncate_inline_record(&mut handle, &mut inode.inline_lock().write(), new_size);
        self.orphan_del(&mut handle, inode.ino);
        self.end_transaction(handle, result)
    }

    /// where the inline bytes of `inode` are in the image
    pub fn inline_data_iomap(&self, inode: &CachedInode) -> Result<InlineMapping, Errno> {
        let record = inode.inline_lock().read();
        if !record.inode.has_inline_data() {
            return Err(libc::EAGAIN);
        }
        Ok(InlineMapping {
            addr: self.inode_seek_position(inode.ino),
            offset: 0,
            length: (record.inode.inline_size as u64).min(record.inode.file_size),
        })
    }

    /// the single inline extent intersecting `[start, start + len)`, if any
    pub fn inline_data_fiemap(&self, inode: &CachedInode, start: u64, len: u64) -> Result<Option<Extent>, Errno> {
        let record = inode.inline_lock().read();
        if !record.inode.has_inline_data() {
            return Err(libc::EAGAIN);
        }
        let mut inline_len = (record.inode.inline_size as u64).min(record.inode.file_size);
        if start >= inline_len {
            return Ok(None);
        }
        inline_len = inline_len.min(start.saturating_add(len)) - start;
        Ok(Some(Extent {
            logical: start,
            physical: self.inode_seek_position(inode.ino) + start,
            length: inline_len,
            flags: FIEMAP_EXTENT_DATA_INLINE | FIEMAP_EXTENT_NOT_ALIGNED | FIEMAP_EXTENT_LAST,
        }))
    }
}

fn truncate_inline_record(handle: &mut Handle, record: &mut InodeRecord, new_size: u64) -> Result<(), Errno> {
    if !record.inode.has_inline_data() {
        return Err(libc::EAGAIN);
    }
    find_inline_data_nolock(record)?;
    record.inode.file_size = new_size;
    record.inode.disk_size = new_size;
    let inline_size = record.inode.inline_size as u64;
    if new_size == 0 {
        destroy_inline_data_nolock(handle, record)?;
        record.inode.may_inline_data = true;
    } else if new_size < inline_size {
        shrink_inline_data(record, new_size as usize)?;
    }
    info!(
        "inline inode {} truncated to {new_size}, {} bytes inline",
        record.inode.inode_number, record.inode.inline_size
    );
    record.inode.update_modified_at();
    handle.mark_inode_dirty(record)
}

/// cut inline content down to `new_size` bytes, keeping at least the fixed region
fn shrink_inline_data(record: &mut InodeRecord, new_size: usize) -> Result<(), Errno> {
    if record.inode.inline_size as usize > FIXED_REGION_SIZE {
        let mut value = xattr::get(&record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME)?;
        value.truncate(new_size.saturating_sub(FIXED_REGION_SIZE));
        xattr::set(&mut record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME, Some(&value))?;
        find_inline_data_nolock(record)?;
    }
    if new_size < FIXED_REGION_SIZE {
        let mut fixed = record.inode.block_bytes();
        fixed[new_size..].fill(0);
        record.inode.set_block_bytes(&fixed);
    }
    record.inode.inline_size = new_size.max(FIXED_REGION_SIZE) as u32;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileKind, Inode};

    #[test]
    fn test_read_inline_page_zero_fills() {
        let mut inode = Inode::new(4, FileKind::RegularFile, 512);
        inode.extra_isize = 32;
        inode.may_inline_data = true;
        let mut record = InodeRecord::new(inode);
        let mut handle = Handle::new(1);
        prepare_inline_data(&mut handle, &mut record, 80).unwrap();
        write_inline_data(&mut record, 0, &[0xaa; 80]).unwrap();
        record.inode.file_size = 70;

        let mut page = Page::new(0);
        page.data_mut().fill(0xff);
        assert_eq!(read_inline_page(&record, &mut page).unwrap(), 70);
        assert!(page.is_uptodate());
        assert!(page.data()[..70].iter().all(|b| *b == 0xaa));
        assert!(page.data()[70..].iter().all(|b| *b == 0));

        let mut second = Page::new(1);
        second.data_mut().fill(0xff);
        assert_eq!(read_inline_page(&record, &mut second).unwrap(), 0);
        assert!(second.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_shrink_keeps_the_fixed_floor() {
        let mut inode = Inode::new(4, FileKind::RegularFile, 512);
        inode.extra_isize = 32;
        inode.may_inline_data = true;
        let mut record = InodeRecord::new(inode);
        let mut handle = Handle::new(1);
        prepare_inline_data(&mut handle, &mut record, 100).unwrap();
        write_inline_data(&mut record, 0, &[1; 100]).unwrap();

        shrink_inline_data(&mut record, 70).unwrap();
        assert_eq!(record.inode.inline_size, 70);
        assert_eq!(xattr::get(&record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME).unwrap(), vec![1; 10]);

        shrink_inline_data(&mut record, 20).unwrap();
        assert_eq!(record.inode.inline_size, 60);
        let fixed = record.inode.block_bytes();
        assert!(fixed[..20].iter().all(|b| *b == 1));
        assert!(fixed[20..].iter().all(|b| *b == 0));
    }
}

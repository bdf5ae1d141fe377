//! directories whose entries live in the inode
//!
//! inline bytes `[0, 4)` hold the parent inode, "." and ".." are not stored.
//! Entries fill `[4, 60)` and, once the directory grew, the whole extension;
//! the last entry of each region spans to the end of that region.
use log::debug;
use smallvec::SmallVec;

use super::{
    max_inline_xattr_value_size, prepare_inline_data, read_inline_vec, update_inline_data,
    write_inline_data, FIXED_REGION_SIZE, INLINE_DOTDOT_OFFSET, INLINE_DOTDOT_SIZE,
};
use crate::fs::{
    directory::{self, check_dir_entry, dir_rec_len, DirCursor, DirEntries, DirEntryInfo},
    journal::Handle,
    Errno, FileKind, InodeRecord, MyFS, EFSCORRUPTED, INODE_FLAG_INDEX,
};

/// listing position of "."
const DOT_POS: u64 = 0;
/// listing position of "..", where it would be in a directory block
const DOTDOT_POS: u64 = dir_rec_len(1) as u64;
const FIRST_ENTRY_POS: u64 = (dir_rec_len(1) + dir_rec_len(2)) as u64;
/// listing position minus inline offset of a stored entry
const POS_SHIFT: u64 = FIRST_ENTRY_POS - INLINE_DOTDOT_SIZE as u64;

/// an entry found in an inline directory, `offset` is its inline byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineDirEntry {
    pub offset: usize,
    pub inode: u32,
    pub file_type: u8,
    pub name: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineInsert {
    Added,
    /// no room left, the directory is block based now and the entry still has to be added
    Converted,
}

/// a copy of one region of entries
struct DirRegion {
    start: usize,
    buf: Vec<u8>,
}

fn dir_regions(record: &InodeRecord) -> Result<SmallVec<[DirRegion; 2]>, Errno> {
    let inline_size = record.inode.inline_size as usize;
    let mut regions = SmallVec::new();
    regions.push(DirRegion {
        start: INLINE_DOTDOT_SIZE,
        buf: read_inline_vec(record, INLINE_DOTDOT_SIZE, FIXED_REGION_SIZE - INLINE_DOTDOT_SIZE)?,
    });
    if inline_size > FIXED_REGION_SIZE {
        regions.push(DirRegion {
            start: FIXED_REGION_SIZE,
            buf: read_inline_vec(record, FIXED_REGION_SIZE, inline_size - FIXED_REGION_SIZE)?,
        });
    }
    Ok(regions)
}

fn inline_parent(record: &InodeRecord) -> u32 {
    let fixed = record.inode.block_bytes();
    u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]])
}

fn check_inline_dir(record: &InodeRecord) -> Result<(), Errno> {
    if !record.inode.has_inline_data() {
        return Err(libc::EAGAIN);
    }
    if !record.inode.is_dir() {
        return Err(libc::ENOTDIR);
    }
    Ok(())
}

impl MyFS {
    pub(crate) fn bad_inline_dir(&self, ino: u64, e: Errno) -> Errno {
        if e == EFSCORRUPTED {
            self.error_inode(ino, "bad entry in inline directory")
        } else {
            e
        }
    }

    /// start `record` as an inline directory under `parent`
    ///
    /// `ENOSPC` when it can't be inline, the caller makes a block directory then
    pub(crate) fn try_create_inline_dir(&self, handle: &mut Handle, record: &mut InodeRecord, parent: u32) -> Result<(), Errno> {
        prepare_inline_data(handle, record, FIXED_REGION_SIZE)?;
        write_inline_data(record, 0, &parent.to_le_bytes())?;
        let mut entries = [0u8; FIXED_REGION_SIZE - INLINE_DOTDOT_SIZE];
        let len = entries.len();
        directory::update_final_de(&mut entries, 0, len);
        write_inline_data(record, INLINE_DOTDOT_SIZE, &entries)?;
        record.inode.hard_links = 2;
        record.inode.file_size = FIXED_REGION_SIZE as u64;
        record.inode.disk_size = FIXED_REGION_SIZE as u64;
        handle.mark_inode_dirty(record)
    }

    /// look `name` up in an inline directory, "." and ".." included
    pub(crate) fn find_inline_dir_entry(&self, record: &InodeRecord, name: &[u8]) -> Result<Option<InlineDirEntry>, Errno> {
        check_inline_dir(record)?;
        let ino = record.inode.inode_number;
        let file_type = u8::from(FileKind::Directory);
        if name == b"." {
            return Ok(Some(InlineDirEntry {
                offset: 0,
                inode: ino as u32,
                file_type,
                name: name.to_vec(),
            }));
        }
        if name == b".." {
            return Ok(Some(InlineDirEntry {
                offset: INLINE_DOTDOT_OFFSET,
                inode: inline_parent(record),
                file_type,
                name: name.to_vec(),
            }));
        }
        for region in dir_regions(record)? {
            let found = directory::search(ino, &region.buf, name).map_err(|e| self.bad_inline_dir(ino, e))?;
            if let Some((offset, entry)) = found {
                return Ok(Some(InlineDirEntry {
                    offset: region.start + offset,
                    inode: entry.inode,
                    file_type: entry.file_type,
                    name: entry.name,
                }));
            }
        }
        Ok(None)
    }

    /// add `name` to an inline directory, growing into the xattr body or
    /// converting to a block when it doesn't fit
    pub(crate) fn try_add_inline_entry(
        &self,
        handle: &mut Handle,
        record: &mut InodeRecord,
        name: &[u8],
        inode: u32,
        file_type: u8,
    ) -> Result<InlineInsert, Errno> {
        check_inline_dir(record)?;
        if self.find_inline_dir_entry(record, name)?.is_some() {
            return Err(libc::EEXIST);
        }
        let mut added = self.add_dirent_to_inline(record, 0, name, inode, file_type)?;
        if !added {
            if record.inode.inline_size as usize == FIXED_REGION_SIZE {
                match self.update_inline_dir(handle, record) {
                    Ok(()) | Err(libc::ENOSPC) => {}
                    Err(e) => return Err(e),
                }
            }
            if record.inode.inline_size as usize > FIXED_REGION_SIZE {
                added = self.add_dirent_to_inline(record, 1, name, inode, file_type)?;
            }
        }
        if !added {
            debug!(
                "inline directory {} is full, converting",
                record.inode.inode_number
            );
            self.convert_inline_data_nolock(handle, record)?;
            return Ok(InlineInsert::Converted);
        }
        record.inode.update_modified_at();
        record.inode.clear_flag(INODE_FLAG_INDEX);
        record.inode.version += 1;
        handle.mark_inode_dirty(record)?;
        Ok(InlineInsert::Added)
    }

    /// `Ok(false)` when region `index` has no room for the entry
    fn add_dirent_to_inline(
        &self,
        record: &mut InodeRecord,
        index: usize,
        name: &[u8],
        inode: u32,
        file_type: u8,
    ) -> Result<bool, Errno> {
        let ino = record.inode.inode_number;
        let mut regions = dir_regions(record)?;
        let Some(region) = regions.get_mut(index) else {
            return Ok(false);
        };
        let offset = match directory::find_dest(ino, &region.buf, name) {
            Ok(offset) => offset,
            Err(libc::ENOSPC) => return Ok(false),
            Err(e) => return Err(self.bad_inline_dir(ino, e)),
        };
        directory::insert_dentry(&mut region.buf, offset, name, inode, file_type);
        write_inline_data(record, region.start, &region.buf)?;
        Ok(true)
    }

    /// take all free xattr space for the entry stream of the extension
    fn update_inline_dir(&self, handle: &mut Handle, record: &mut InodeRecord) -> Result<(), Errno> {
        let old_size = record.inode.inline_size as usize - FIXED_REGION_SIZE;
        let new_size = max_inline_xattr_value_size(record);
        if new_size.saturating_sub(old_size) <= dir_rec_len(1) {
            return Err(libc::ENOSPC);
        }
        update_inline_data(handle, record, new_size + FIXED_REGION_SIZE)?;
        let mut extension = read_inline_vec(record, FIXED_REGION_SIZE, new_size)?;
        directory::update_final_de(&mut extension, old_size, new_size);
        write_inline_data(record, FIXED_REGION_SIZE, &extension)?;
        record.inode.file_size = record.inode.inline_size as u64;
        record.inode.disk_size = record.inode.file_size;
        debug!(
            "inline directory {} grew to {} bytes",
            record.inode.inode_number, record.inode.inline_size
        );
        handle.mark_inode_dirty(record)
    }

    /// remove the entry at inline `offset`, its space goes to the entry before it
    pub(crate) fn delete_inline_entry(&self, handle: &mut Handle, record: &mut InodeRecord, offset: usize) -> Result<(), Errno> {
        check_inline_dir(record)?;
        if offset < INLINE_DOTDOT_SIZE {
            return Err(libc::EINVAL);
        }
        let ino = record.inode.inode_number;
        let mut regions = dir_regions(record)?;
        let region = regions
            .iter_mut()
            .find(|r| offset >= r.start && offset < r.start + r.buf.len())
            .ok_or(libc::ENOENT)?;
        directory::delete_entry(ino, &mut region.buf, offset - region.start)
            .map_err(|e| self.bad_inline_dir(ino, e))?;
        write_inline_data(record, region.start, &region.buf)?;
        record.inode.update_modified_at();
        record.inode.version += 1;
        handle.mark_inode_dirty(record)
    }

    /// no live entry besides "." and ".."
    pub(crate) fn empty_inline_dir(&self, record: &InodeRecord) -> Result<bool, Errno> {
        check_inline_dir(record)?;
        let ino = record.inode.inode_number;
        if inline_parent(record) == 0 {
            return Err(self.error_inode(ino, "bad inline directory, no `..'"));
        }
        for region in dir_regions(record)? {
            for item in DirEntries::new(ino, &region.buf) {
                let (_, entry) = item.map_err(|e| self.bad_inline_dir(ino, e))?;
                if entry.inode != 0 {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// list an inline directory from `cursor` on
    ///
    /// entries come from a copy taken now; the cursor moves past every entry handed out
    pub(crate) fn read_inline_dir<'c>(&self, record: &InodeRecord, cursor: &'c mut DirCursor) -> Result<InlineDirIter<'c>, Errno> {
        check_inline_dir(record)?;
        let inline_size = record.inode.inline_size as usize;
        let buf = read_inline_vec(record, 0, inline_size)?;
        let end = inline_size as u64 + POS_SHIFT;
        if cursor.version != record.inode.version {
            cursor.pos = resync_position(&buf, cursor.pos, end);
            cursor.version = record.inode.version;
        }
        Ok(InlineDirIter {
            dir: record.inode.inode_number,
            parent: inline_parent(record),
            buf,
            end,
            cursor,
            failed: false,
        })
    }
}

/// first entry boundary at or after `pos`
fn resync_position(buf: &[u8], pos: u64, end: u64) -> u64 {
    let mut i = DOT_POS;
    while i < end && i < pos {
        if i == DOT_POS {
            i = DOTDOT_POS;
            continue;
        }
        if i == DOTDOT_POS {
            i = FIRST_ENTRY_POS;
            continue;
        }
        let rec_len = directory::rec_len_at(buf, (i - POS_SHIFT) as usize);
        if rec_len < dir_rec_len(1) {
            break;
        }
        i += rec_len as u64;
    }
    i
}

/// entries of an inline directory, "." and ".." first
pub struct InlineDirIter<'c> {
    dir: u64,
    parent: u32,
    buf: Vec<u8>,
    end: u64,
    cursor: &'c mut DirCursor,
    failed: bool,
}

impl<'c> Iterator for InlineDirIter<'c> {
    type Item = Result<DirEntryInfo, Errno>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let pos = self.cursor.pos;
            if pos == DOT_POS {
                self.cursor.pos = DOTDOT_POS;
                return Some(Ok(DirEntryInfo::new(self.dir, FileKind::Directory, b".")));
            }
            if pos == DOTDOT_POS {
                self.cursor.pos = FIRST_ENTRY_POS;
                return Some(Ok(DirEntryInfo::new(
                    self.parent as u64,
                    FileKind::Directory,
                    b"..",
                )));
            }
            if pos >= self.end {
                return None;
            }
            if pos < FIRST_ENTRY_POS {
                self.cursor.pos = FIRST_ENTRY_POS;
                continue;
            }
            let offset = (pos - POS_SHIFT) as usize;
            // an entry of the fixed region must not run into the extension
            let region_end = if offset < FIXED_REGION_SIZE {
                FIXED_REGION_SIZE
            } else {
                self.buf.len()
            };
            match check_dir_entry(self.dir, &self.buf[..region_end], offset) {
                Ok(entry) => {
                    self.cursor.pos += entry.rec_len as u64;
                    if entry.inode != 0 {
                        return Some(Ok(DirEntryInfo::new(
                            entry.inode as u64,
                            entry.file_type.into(),
                            &entry.name,
                        )));
                    }
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fs::{CachedInode, ROOT_INODE},
        utils::test_util::new_test_fs,
    };
    use std::sync::Arc;

    fn inline_dir(fs: &MyFS) -> Arc<CachedInode> {
        fs.transaction(|handle| {
            let dir = fs.new_inode(handle, FileKind::Directory, 0o755)?;
            fs.try_create_inline_dir(handle, &mut dir.inline_lock().write(), ROOT_INODE as u32)?;
            Ok(dir)
        })
        .unwrap()
    }

    fn add(fs: &MyFS, dir: &CachedInode, name: &str, ino: u32) -> Result<InlineInsert, Errno> {
        fs.transaction(|handle| {
            fs.try_add_inline_entry(handle, &mut dir.inline_lock().write(), name.as_bytes(), ino, 1)
        })
    }

    fn names(fs: &MyFS, dir: &CachedInode) -> Vec<String> {
        let mut cursor = DirCursor::default();
        let record = dir.inline_lock().read();
        fs.read_inline_dir(&record, &mut cursor)
            .unwrap()
            .map(|entry| entry.unwrap().name)
            .collect()
    }

    #[test]
    fn test_new_inline_dir() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        let record = dir.inline_lock().read();
        assert_eq!(record.inode.file_size, 60);
        assert_eq!(record.inode.hard_links, 2);
        assert!(fs.empty_inline_dir(&record).unwrap());
        let dotdot = fs.find_inline_dir_entry(&record, b"..").unwrap().unwrap();
        assert_eq!((dotdot.offset, dotdot.inode), (2, 1));
        let dot = fs.find_inline_dir_entry(&record, b".").unwrap().unwrap();
        assert_eq!((dot.offset, dot.inode as u64), (0, dir.ino));
        drop(record);
        assert_eq!(names(&fs, &dir), vec![".", ".."]);
    }

    #[test]
    fn test_entries_list_in_insertion_order() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        let inserted = ["zeta", "alpha", "mid", "b"];
        for (i, name) in inserted.iter().enumerate() {
            assert_eq!(add(&fs, &dir, name, 100 + i as u32), Ok(InlineInsert::Added));
        }
        let mut expected = vec![".".to_string(), "..".to_string()];
        expected.extend(inserted.iter().map(|n| n.to_string()));
        assert_eq!(names(&fs, &dir), expected);

        let record = dir.inline_lock().read();
        let found = fs.find_inline_dir_entry(&record, b"mid").unwrap().unwrap();
        assert_eq!(found.inode, 102);
        assert!(fs.find_inline_dir_entry(&record, b"nope").unwrap().is_none());
        assert!(!fs.empty_inline_dir(&record).unwrap());
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        add(&fs, &dir, "twice", 5).unwrap();
        assert_eq!(add(&fs, &dir, "twice", 6), Err(libc::EEXIST));
    }

    #[test]
    fn test_fixed_region_overflows_into_the_extension() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        // 16 bytes per entry, three fit in the 56 bytes after ".."
        for i in 0..3 {
            add(&fs, &dir, &format!("file{i:04}"), 10 + i).unwrap();
        }
        assert_eq!(dir.inode().inline_size, 60);
        add(&fs, &dir, "file0003", 13).unwrap();
        let inode = dir.inode();
        assert!(inode.has_inline_data());
        assert_eq!(inode.inline_size, 256);
        assert_eq!(inode.file_size, 256);
        let record = dir.inline_lock().read();
        let found = fs.find_inline_dir_entry(&record, b"file0003").unwrap().unwrap();
        assert_eq!(found.offset, 60);
    }

    #[test]
    fn test_deleted_space_is_reused() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        for i in 0..3 {
            add(&fs, &dir, &format!("file{i:04}"), 10 + i).unwrap();
        }
        let offset = {
            let record = dir.inline_lock().read();
            fs.find_inline_dir_entry(&record, b"file0001").unwrap().unwrap().offset
        };
        fs.transaction(|handle| fs.delete_inline_entry(handle, &mut dir.inline_lock().write(), offset))
            .unwrap();
        {
            let record = dir.inline_lock().read();
            assert!(fs.find_inline_dir_entry(&record, b"file0001").unwrap().is_none());
        }
        add(&fs, &dir, "file0009", 19).unwrap();
        // still only the fixed region
        assert_eq!(dir.inode().inline_size, 60);
        assert_eq!(names(&fs, &dir), vec![".", "..", "file0000", "file0009", "file0002"]);
    }

    #[test]
    fn test_cursor_survives_a_delete() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        for name in ["aaaa", "bbbb", "cccc"] {
            add(&fs, &dir, name, 42).unwrap();
        }
        let mut cursor = DirCursor::default();
        {
            let record = dir.inline_lock().read();
            let first: Vec<_> = fs
                .read_inline_dir(&record, &mut cursor)
                .unwrap()
                .take(3)
                .map(|e| e.unwrap().name)
                .collect();
            assert_eq!(first, vec![".", "..", "aaaa"]);
        }
        assert_eq!(cursor.pos, FIRST_ENTRY_POS + 12);
        let offset = {
            let record = dir.inline_lock().read();
            fs.find_inline_dir_entry(&record, b"bbbb").unwrap().unwrap().offset
        };
        fs.transaction(|handle| fs.delete_inline_entry(handle, &mut dir.inline_lock().write(), offset))
            .unwrap();

        let record = dir.inline_lock().read();
        let rest: Vec<_> = fs
            .read_inline_dir(&record, &mut cursor)
            .unwrap()
            .map(|e| e.unwrap().name)
            .collect();
        assert_eq!(rest, vec!["cccc"]);
        assert_eq!(cursor.version, record.inode.version);
    }

    #[test]
    fn test_missing_parent_is_corruption() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        let mut record = dir.inline_lock().write();
        write_inline_data(&mut record, 0, &[0u8; 4]).unwrap();
        assert_eq!(fs.empty_inline_dir(&record), Err(EFSCORRUPTED));
        assert!(fs.superblock().errors);
    }

    #[test]
    fn test_bad_rec_len_is_corruption() {
        let fs = new_test_fs();
        let dir = inline_dir(&fs);
        add(&fs, &dir, "x", 3).unwrap();
        let mut record = dir.inline_lock().write();
        // rec_len of the first entry, past the fixed region
        write_inline_data(&mut record, 8, &200u16.to_le_bytes()).unwrap();
        assert_eq!(fs.find_inline_dir_entry(&record, b"y"), Err(EFSCORRUPTED));
        assert!(fs.superblock().errors);
        let mut handle = fs.journal_start();
        assert_eq!(
            fs.try_add_inline_entry(&mut handle, &mut record, b"y", 4, 1),
            Err(EFSCORRUPTED)
        );
        fs.journal_abort(handle);
    }
}

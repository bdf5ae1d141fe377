//! directories stored in data blocks, linear entries like ext2
use log::debug;

use super::{
    directory::{
        self, check_dir_entry, dir_rec_len, find_dest, insert_dentry, DirCursor, DirEntries, DirEntry,
        DirEntryInfo,
    },
    journal::Handle,
    Errno, InodeRecord, MyFS, EFSCORRUPTED, INODE_FLAG_INDEX,
};

/// a directory entry found in block `lblk` at byte `offset`
#[derive(Debug, Clone)]
pub(crate) struct BlockDirEntry {
    pub lblk: u64,
    pub offset: usize,
    pub entry: DirEntry,
}

impl MyFS {
    /// bytes of a directory block available to entries
    fn dir_data_len(&self) -> usize {
        self.block_size() as usize - self.csum_size()
    }

    fn dir_blocks(&self, record: &InodeRecord) -> u64 {
        record.inode.file_size / self.block_size() as u64
    }

    fn bad_dir_block(&self, ino: u64, e: Errno) -> Errno {
        if e == EFSCORRUPTED {
            self.error_inode(ino, "bad entry in directory block")
        } else {
            e
        }
    }

    /// make `record` a directory of one block holding "." and ".."
    pub(crate) fn init_block_dir(&self, handle: &mut Handle, record: &mut InodeRecord, parent: u32) -> Result<(), Errno> {
        let ino = record.inode.inode_number;
        let block_size = self.block_size() as usize;
        let csum_size = self.csum_size();
        let block = self.map_block_create(handle, record, 0)?;
        let buf = handle.get_create_access(block, block_size);
        directory::init_dot_dotdot(buf, ino as u32, parent, block_size, csum_size, false);
        if csum_size != 0 {
            directory::init_dirent_tail(buf);
            directory::set_dirent_csum(ino, buf);
        }
        record.inode.hard_links = 2;
        record.inode.file_size = block_size as u64;
        record.inode.disk_size = block_size as u64;
        handle.mark_inode_dirty(record)
    }

    /// physical number and content of directory block `lblk`, checksum verified
    fn read_dir_block(&self, handle: Option<&Handle>, record: &InodeRecord, lblk: u64) -> Result<(u32, Vec<u8>), Errno> {
        let ino = record.inode.inode_number;
        let Some(block) = self.bmap(handle, &record.inode, lblk)? else {
            return Err(self.error_inode(ino, "hole in a directory"));
        };
        let buf = self.read_block(handle, block)?;
        if self.csum_size() != 0 && !directory::verify_dirent_csum(ino, &buf) {
            return Err(self.error_inode(ino, "directory block checksum mismatch"));
        }
        Ok((block, buf))
    }

    pub(crate) fn find_block_entry(
        &self,
        handle: Option<&Handle>,
        record: &InodeRecord,
        name: &[u8],
    ) -> Result<Option<BlockDirEntry>, Errno> {
        let ino = record.inode.inode_number;
        let data_len = self.dir_data_len();
        for lblk in 0..self.dir_blocks(record) {
            let (_, buf) = self.read_dir_block(handle, record, lblk)?;
            let found = directory::search(ino, &buf[..data_len], name).map_err(|e| self.bad_dir_block(ino, e))?;
            if let Some((offset, entry)) = found {
                return Ok(Some(BlockDirEntry { lblk, offset, entry }));
            }
        }
        Ok(None)
    }

    /// add `name` to the first block with room, appending a block when all are full
    pub(crate) fn add_block_entry(
        &self,
        handle: &mut Handle,
        record: &mut InodeRecord,
        name: &[u8],
        inode: u32,
        file_type: u8,
    ) -> Result<(), Errno> {
        let ino = record.inode.inode_number;
        let data_len = self.dir_data_len();
        let csum_size = self.csum_size();
        let mut target = None;
        for lblk in 0..self.dir_blocks(record) {
            let (block, buf) = self.read_dir_block(Some(handle), record, lblk)?;
            match find_dest(ino, &buf[..data_len], name) {
                Ok(offset) => {
                    target = Some((block, offset));
                    break;
                }
                Err(libc::ENOSPC) => {}
                Err(e) => return Err(self.bad_dir_block(ino, e)),
            }
        }

        let (block, offset) = match target {
            Some(target) => target,
            None => {
                let lblk = self.dir_blocks(record);
                let block = self.map_block_create(handle, record, lblk)?;
                let buf = handle.get_create_access(block, self.block_size() as usize);
                directory::update_final_de(&mut buf[..data_len], 0, data_len);
                if csum_size != 0 {
                    directory::init_dirent_tail(buf);
                }
                record.inode.file_size += self.block_size() as u64;
                record.inode.disk_size = record.inode.file_size;
                debug!("directory {ino} grew to {} blocks", lblk + 1);
                (block, 0)
            }
        };
        let buf = self.block_write_access(handle, block)?;
        insert_dentry(&mut buf[..data_len], offset, name, inode, file_type);
        if csum_size != 0 {
            directory::set_dirent_csum(ino, buf);
        }
        record.inode.update_modified_at();
        record.inode.clear_flag(INODE_FLAG_INDEX);
        record.inode.version += 1;
        handle.mark_inode_dirty(record)
    }

    pub(crate) fn delete_block_entry(
        &self,
        handle: &mut Handle,
        record: &mut InodeRecord,
        lblk: u64,
        offset: usize,
    ) -> Result<(), Errno> {
        let ino = record.inode.inode_number;
        let data_len = self.dir_data_len();
        let (block, _) = self.read_dir_block(Some(handle), record, lblk)?;
        let buf = self.block_write_access(handle, block)?;
        directory::delete_entry(ino, &mut buf[..data_len], offset).map_err(|e| self.bad_dir_block(ino, e))?;
        if self.csum_size() != 0 {
            directory::set_dirent_csum(ino, buf);
        }
        record.inode.update_modified_at();
        record.inode.version += 1;
        handle.mark_inode_dirty(record)
    }

    /// no live entry besides "." and ".."
    pub(crate) fn empty_block_dir(&self, record: &InodeRecord) -> Result<bool, Errno> {
        let ino = record.inode.inode_number;
        let data_len = self.dir_data_len();
        for lblk in 0..self.dir_blocks(record) {
            let (_, buf) = self.read_dir_block(None, record, lblk)?;
            for item in DirEntries::new(ino, &buf[..data_len]) {
                let (_, entry) = item.map_err(|e| self.bad_dir_block(ino, e))?;
                let dots = lblk == 0 && (entry.name == b"." || entry.name == b"..");
                if entry.inode != 0 && !dots {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// up to `max` entries from `cursor` on, the cursor is `block * block_size + offset`
    pub(crate) fn read_block_dir(
        &self,
        record: &InodeRecord,
        cursor: &mut DirCursor,
        max: usize,
    ) -> Result<Vec<DirEntryInfo>, Errno> {
        let ino = record.inode.inode_number;
        let block_size = self.block_size() as u64;
        let data_len = self.dir_data_len();
        let mut current: Option<(u64, Vec<u8>)> = None;
        if cursor.version != record.inode.version {
            let lblk = cursor.pos / block_size;
            let target = (cursor.pos % block_size) as usize;
            if lblk < self.dir_blocks(record) {
                let (_, buf) = self.read_dir_block(None, record, lblk)?;
                let mut offset = 0;
                while offset < target {
                    let rec_len = directory::rec_len_at(&buf, offset);
                    if rec_len < dir_rec_len(1) {
                        break;
                    }
                    offset += rec_len;
                }
                cursor.pos = lblk * block_size + offset as u64;
                current = Some((lblk, buf));
            }
            cursor.version = record.inode.version;
        }

        let mut entries = Vec::new();
        while entries.len() < max && cursor.pos < record.inode.file_size {
            let lblk = cursor.pos / block_size;
            let offset = (cursor.pos % block_size) as usize;
            if offset >= data_len {
                cursor.pos = (lblk + 1) * block_size;
                continue;
            }
            if current.as_ref().map(|(l, _)| *l) != Some(lblk) {
                current = Some((lblk, self.read_dir_block(None, record, lblk)?.1));
            }
            let Some((_, buf)) = current.as_ref() else {
                break;
            };
            let entry = check_dir_entry(ino, &buf[..data_len], offset).map_err(|e| self.bad_dir_block(ino, e))?;
            cursor.pos += entry.rec_len as u64;
            if entry.inode != 0 {
                entries.push(DirEntryInfo::new(entry.inode as u64, entry.file_type.into(), &entry.name));
            }
        }
        Ok(entries)
    }
}

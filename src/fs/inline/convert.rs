//! moving inline content out to a data block, for good
use log::{debug, error};

use super::{
    create_inline_data, destroy_inline_data_nolock, read_inline_vec, write_inline_data,
    INLINE_DOTDOT_SIZE,
};
use crate::fs::{
    directory::{self, DirEntries},
    journal::Handle,
    CachedInode, Errno, InodeRecord, MyFS,
};

impl MyFS {
    /// move the inline content of `record` into a freshly allocated block
    ///
    /// the caller holds both locks of the inode in write mode. On failure the
    /// inline content is put back as it was before.
    pub(crate) fn convert_inline_data_nolock(&self, handle: &mut Handle, record: &mut InodeRecord) -> Result<(), Errno> {
        let ino = record.inode.inode_number;
        let inline_size = record.inode.inline_size as usize;
        let snapshot = read_inline_vec(record, 0, inline_size)?;
        if record.inode.is_dir() {
            for item in DirEntries::starting_at(ino, &snapshot, INLINE_DOTDOT_SIZE) {
                if item.is_err() {
                    return Err(self.error_inode(ino, "bad inline directory entry, not converting"));
                }
            }
        }

        destroy_inline_data_nolock(handle, record)?;
        let populated = self.populate_converted_block(handle, record, &snapshot);
        match populated {
            Ok(block) => {
                debug!("inode {ino} converted from inline data to block {block}");
                handle.mark_inode_dirty(record)
            }
            Err(e) => {
                if record.inode.block[0] != 0 {
                    self.free_data_block(handle, record.inode.block[0]);
                    record.inode.block[0] = 0;
                    record.inode.block_count = record.inode.block_count.saturating_sub(1);
                }
                if let Err(restore) = restore_inline_data(handle, record, &snapshot) {
                    error!(
                        "error restoring inline_data for inode -- potential data loss! (inode {ino}, error {restore})"
                    );
                }
                Err(e)
            }
        }
    }

    fn populate_converted_block(&self, handle: &mut Handle, record: &mut InodeRecord, snapshot: &[u8]) -> Result<u32, Errno> {
        let block_size = self.block_size() as usize;
        let block = self.map_block_create(handle, record, 0)?;
        let ino = record.inode.inode_number;
        if !record.inode.is_dir() {
            let buf = handle.get_create_access(block, block_size);
            buf[..snapshot.len()].copy_from_slice(snapshot);
            return Ok(block);
        }

        let csum_size = self.csum_size();
        let parent = u32::from_le_bytes([snapshot[0], snapshot[1], snapshot[2], snapshot[3]]);
        let buf = handle.get_create_access(block, block_size);
        let start = directory::init_dot_dotdot(buf, ino as u32, parent, block_size, csum_size, true);
        let entries = &snapshot[INLINE_DOTDOT_SIZE..];
        buf[start..start + entries.len()].copy_from_slice(entries);
        directory::update_final_de(buf, start + entries.len(), block_size - csum_size);
        if csum_size != 0 {
            directory::init_dirent_tail(buf);
            directory::set_dirent_csum(ino, buf);
        }
        record.inode.file_size = block_size as u64;
        record.inode.disk_size = block_size as u64;
        Ok(block)
    }

    /// convert `inode` to block storage if it is inline
    ///
    /// the caller holds the content-size lock in write mode
    pub(crate) fn convert_inline_inode(&self, inode: &CachedInode) -> Result<(), Errno> {
        let mut record = inode.inline_lock().write();
        if !record.inode.has_inline_data() {
            record.inode.may_inline_data = false;
            return Ok(());
        }
        let mut handle = self.journal_start();
        let result = self.convert_inline_data_nolock(&mut handle, &mut record);
        drop(record);
        // a restored inode is committed too, memory and image must agree
        self.journal_stop(handle)?;
        result
    }
}

fn restore_inline_data(handle: &mut Handle, record: &mut InodeRecord, snapshot: &[u8]) -> Result<(), Errno> {
    create_inline_data(handle, record, snapshot.len())?;
    write_inline_data(record, 0, snapshot)?;
    record.inode.may_inline_data = true;
    handle.mark_inode_dirty(record)
}

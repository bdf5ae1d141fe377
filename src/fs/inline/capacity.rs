//! creating, growing and dropping the `system.data` extension
use log::{debug, error};

use super::{
    find_inline_data_nolock, max_inline_size, FIXED_REGION_SIZE, INLINE_DATA_INDEX,
    INLINE_DATA_NAME,
};
use crate::fs::{
    journal::Handle, xattr, Errno, InodeRecord, EFSCORRUPTED, INODE_FLAG_INLINE_DATA, N_BLOCKS,
};

/// start inline storage of `len` bytes, content zeroed
///
/// `ENOSPC` when the body can't even hold an empty `system.data` entry,
/// the inode then stops trying to go inline
pub fn create_inline_data(handle: &mut Handle, record: &mut InodeRecord, len: usize) -> Result<(), Errno> {
    if record.inode.has_inline_data() {
        return Err(libc::EINVAL);
    }
    if !record.has_xattr_space() {
        record.inode.may_inline_data = false;
        return Err(libc::ENOSPC);
    }
    let value = vec![0u8; len.saturating_sub(FIXED_REGION_SIZE)];
    match xattr::set(&mut record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME, Some(&value)) {
        Ok(()) => {}
        Err(libc::ENOSPC) => {
            record.inode.may_inline_data = false;
            return Err(libc::ENOSPC);
        }
        Err(e) => return Err(e),
    }
    record.inode.set_block_bytes(&[0u8; N_BLOCKS * 4]);
    record.inode.set_flag(INODE_FLAG_INLINE_DATA);
    record.inode.inline_size = (FIXED_REGION_SIZE + value.len()) as u32;
    find_inline_data_nolock(record)?;
    debug!(
        "inode {} stores {} bytes inline",
        record.inode.inode_number, record.inode.inline_size
    );
    handle.mark_inode_dirty(record)
}

/// grow the inline capacity to `len`, new bytes are zero
pub fn update_inline_data(handle: &mut Handle, record: &mut InodeRecord, len: usize) -> Result<(), Errno> {
    if len <= record.inode.inline_size as usize {
        return Ok(());
    }
    let mut value = match xattr::get(&record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME) {
        Ok(value) => value,
        Err(libc::ENODATA) => {
            error!(
                "inode {} has inline data but no inline data entry",
                record.inode.inode_number
            );
            return Err(EFSCORRUPTED);
        }
        Err(e) => return Err(e),
    };
    value.resize(len - FIXED_REGION_SIZE, 0);
    xattr::set(&mut record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME, Some(&value))?;
    record.inode.inline_size = len as u32;
    find_inline_data_nolock(record)?;
    record.inode.set_flag(INODE_FLAG_INLINE_DATA);
    record.inode.may_inline_data = true;
    handle.mark_inode_dirty(record)
}

/// drop inline storage altogether, a no-op when there is none
pub fn destroy_inline_data_nolock(handle: &mut Handle, record: &mut InodeRecord) -> Result<(), Errno> {
    if !record.inode.has_inline_data() && record.inode.inline_off == 0 {
        return Ok(());
    }
    if record.has_xattr_space() {
        match xattr::remove(&mut record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME) {
            Ok(()) | Err(libc::ENODATA) => {}
            Err(e) => return Err(e),
        }
    }
    record.inode.set_block_bytes(&[0u8; N_BLOCKS * 4]);
    record.inode.clear_flag(INODE_FLAG_INLINE_DATA);
    record.inode.inline_off = 0;
    record.inode.inline_size = 0;
    record.inode.may_inline_data = false;
    debug!("inode {} no longer stores data inline", record.inode.inode_number);
    handle.mark_inode_dirty(record)
}

/// make room for `len` inline bytes, creating or growing the extension
///
/// `ENOSPC` tells the caller to convert instead
pub fn prepare_inline_data(handle: &mut Handle, record: &mut InodeRecord, len: usize) -> Result<(), Errno> {
    if !record.inode.may_inline_data || len > max_inline_size(record) {
        return Err(libc::ENOSPC);
    }
    if record.inode.inline_size == 0 {
        create_inline_data(handle, record, len)
    } else {
        update_inline_data(handle, record, len)
    }
}

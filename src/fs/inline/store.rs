use super::{region_for_offset, InlineRegion, FIXED_REGION_SIZE};
use crate::fs::{Errno, InodeRecord};

/// copy inline bytes `[offset, offset + buf.len())` into `buf`
///
/// a range past the inline size is `EINVAL`
pub fn read_inline_data(record: &InodeRecord, offset: usize, buf: &mut [u8]) -> Result<(), Errno> {
    check_range(record, offset, buf.len())?;
    let fixed = record.inode.block_bytes();
    let mut done = 0;
    while done < buf.len() {
        let pos = offset + done;
        let region = region_for_offset(record, pos)?;
        let n = (region.end() - pos).min(buf.len() - done);
        let src = match region {
            InlineRegion::Fixed { .. } => &fixed[pos..pos + n],
            InlineRegion::Extension { value_start, .. } => {
                let at = value_start + pos - FIXED_REGION_SIZE;
                &record.ibody[at..at + n]
            }
        };
        buf[done..done + n].copy_from_slice(src);
        done += n;
    }
    Ok(())
}

/// the whole `[offset, offset + len)` range as a new buffer
pub fn read_inline_vec(record: &InodeRecord, offset: usize, len: usize) -> Result<Vec<u8>, Errno> {
    let mut buf = vec![0u8; len];
    read_inline_data(record, offset, &mut buf)?;
    Ok(buf)
}

/// overwrite inline bytes starting at `offset`, the caller marks the inode dirty
pub fn write_inline_data(record: &mut InodeRecord, offset: usize, bytes: &[u8]) -> Result<(), Errno> {
    check_range(record, offset, bytes.len())?;
    let mut done = 0;
    while done < bytes.len() {
        let pos = offset + done;
        let region = region_for_offset(record, pos)?;
        let n = (region.end() - pos).min(bytes.len() - done);
        match region {
            InlineRegion::Fixed { .. } => {
                let mut fixed = record.inode.block_bytes();
                fixed[pos..pos + n].copy_from_slice(&bytes[done..done + n]);
                record.inode.set_block_bytes(&fixed);
            }
            InlineRegion::Extension { value_start, .. } => {
                let at = value_start + pos - FIXED_REGION_SIZE;
                record.ibody[at..at + n].copy_from_slice(&bytes[done..done + n]);
            }
        }
        done += n;
    }
    Ok(())
}

fn check_range(record: &InodeRecord, offset: usize, len: usize) -> Result<(), Errno> {
    let end = offset.checked_add(len).ok_or(libc::EINVAL)?;
    if end > record.inode.inline_size as usize {
        log::warn!(
            "inline access [{offset}, {end}) past inline size {} of inode {}",
            record.inode.inline_size,
            record.inode.inode_number
        );
        return Err(libc::EINVAL);
    }
    Ok(())
}

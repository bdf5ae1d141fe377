use log::error;

use super::{FIXED_REGION_SIZE, INLINE_DATA_INDEX, INLINE_DATA_NAME};
use crate::fs::{
    xattr::{self, xattr_len, xattr_size, XattrEntry, XATTR_HEADER_LEN, XATTR_ROUND},
    Errno, InodeRecord, EFSCORRUPTED,
};

/// which part of the inline content a byte offset falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineRegion {
    /// the block pointer array, `[0, FIXED_REGION_SIZE)`
    Fixed { start: usize, end: usize },
    /// the attribute value, `value_start` is its position in the xattr body
    Extension {
        value_start: usize,
        start: usize,
        end: usize,
    },
}

impl InlineRegion {
    /// first inline offset covered by this region
    pub fn start(&self) -> usize {
        match *self {
            InlineRegion::Fixed { start, .. } | InlineRegion::Extension { start, .. } => start,
        }
    }

    pub fn end(&self) -> usize {
        match *self {
            InlineRegion::Fixed { end, .. } | InlineRegion::Extension { end, .. } => end,
        }
    }

    pub fn len(&self) -> usize {
        self.end() - self.start()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// the `system.data` entry as the xattr body has it right now
pub fn find_inline_entry_nolock(record: &InodeRecord) -> Result<Option<XattrEntry>, Errno> {
    if !record.has_xattr_space() {
        return Ok(None);
    }
    xattr::find(&record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME)
}

/// refresh `inline_off` and `inline_size` from the xattr body
///
/// leaves them alone when there is no `system.data` entry
pub fn find_inline_data_nolock(record: &mut InodeRecord) -> Result<(), Errno> {
    if let Some(entry) = find_inline_entry_nolock(record)? {
        record.inode.inline_off = entry.offset as u16;
        record.inode.inline_size = (FIXED_REGION_SIZE + entry.value_len) as u32;
    }
    Ok(())
}

/// inline capacity resolved from the record, 0 when there is none
pub fn inline_capacity(record: &InodeRecord) -> Result<usize, Errno> {
    if !record.inode.has_inline_data() || !record.has_xattr_space() {
        return Ok(0);
    }
    if record.inode.inline_off == 0 {
        return Ok(FIXED_REGION_SIZE);
    }
    Ok(find_inline_entry_nolock(record)?.map_or(0, |entry| FIXED_REGION_SIZE + entry.value_len))
}

/// largest value `system.data` could have with the free space of the body right now
pub fn max_inline_xattr_value_size(record: &InodeRecord) -> usize {
    if !record.has_xattr_space() {
        return 0;
    }
    let body = &record.ibody;
    if !xattr::has_header(body) {
        // an empty body also pays for the header and the terminator
        let free = body.len() - XATTR_HEADER_LEN;
        let overhead = xattr_len(INLINE_DATA_NAME.len()) + XATTR_ROUND + 4;
        return xattr_size(free.saturating_sub(overhead));
    }
    let layout = match xattr::walk(body) {
        Ok(layout) => layout,
        Err(_) => return 0,
    };
    let mut free = layout.free();
    if record.inode.inline_off != 0 {
        let Some(entry) = layout.find(INLINE_DATA_INDEX, INLINE_DATA_NAME) else {
            error!(
                "inode {} lost its inline data entry",
                record.inode.inode_number
            );
            return 0;
        };
        return free + xattr_size(entry.value_len);
    }
    free = free.saturating_sub(xattr_len(INLINE_DATA_NAME.len()));
    if free > XATTR_ROUND {
        xattr_size(free - XATTR_ROUND)
    } else {
        0
    }
}

/// the most inline bytes this inode could hold if the extension took all free space
pub fn max_inline_size(record: &InodeRecord) -> usize {
    if record.inode.extra_isize == 0 {
        return 0;
    }
    match max_inline_xattr_value_size(record) {
        0 => 0,
        value => value + FIXED_REGION_SIZE,
    }
}

/// the region `offset` falls in, re-resolved from the current body
///
/// `EINVAL` past the inline capacity, `EFSCORRUPTED` when the extension entry went missing
pub fn region_for_offset(record: &InodeRecord, offset: usize) -> Result<InlineRegion, Errno> {
    let inline_size = record.inode.inline_size as usize;
    if !record.inode.has_inline_data() || offset >= inline_size {
        return Err(libc::EINVAL);
    }
    if offset < FIXED_REGION_SIZE {
        return Ok(InlineRegion::Fixed {
            start: 0,
            end: FIXED_REGION_SIZE,
        });
    }
    let entry = find_inline_entry_nolock(record)?.ok_or(EFSCORRUPTED)?;
    if FIXED_REGION_SIZE + entry.value_len < inline_size {
        error!(
            "inline data entry of inode {} is shorter than its inline size {inline_size}",
            record.inode.inode_number
        );
        return Err(EFSCORRUPTED);
    }
    Ok(InlineRegion::Extension {
        value_start: entry.value_start,
        start: FIXED_REGION_SIZE,
        end: inline_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileKind, Inode, INODE_FLAG_INLINE_DATA};

    fn record(extra_isize: u16) -> InodeRecord {
        let mut inode = Inode::new(12, FileKind::RegularFile, 512);
        inode.extra_isize = extra_isize;
        InodeRecord::new(inode)
    }

    fn set_data(record: &mut InodeRecord, len: usize) {
        xattr::set(&mut record.ibody, INLINE_DATA_INDEX, INLINE_DATA_NAME, Some(&vec![0u8; len])).unwrap();
        record.inode.set_flag(INODE_FLAG_INLINE_DATA);
        find_inline_data_nolock(record).unwrap();
    }

    #[test]
    fn test_fresh_record_max_size() {
        let record = record(32);
        // 224 bytes body: header, one entry, terminator and rounding
        assert_eq!(max_inline_xattr_value_size(&record), 196);
        assert_eq!(max_inline_size(&record), 256);
    }

    #[test]
    fn test_no_extra_space_means_no_inline_data() {
        let record = record(0);
        assert_eq!(max_inline_xattr_value_size(&record), 0);
        assert_eq!(max_inline_size(&record), 0);
        assert_eq!(inline_capacity(&record).unwrap(), 0);
    }

    #[test]
    fn test_existing_entry_counts_its_value() {
        let mut record = record(32);
        set_data(&mut record, 10);
        assert_ne!(record.inode.inline_off, 0);
        assert_eq!(record.inode.inline_size, 70);
        assert_eq!(inline_capacity(&record).unwrap(), 70);
        // growing the value in place can still reach the same maximum
        assert_eq!(max_inline_size(&record), 256);
    }

    #[test]
    fn test_other_attributes_reduce_the_maximum() {
        let mut record = record(32);
        xattr::set(&mut record.ibody, 1, b"comment", Some(&[1u8; 20])).unwrap();
        let max = max_inline_size(&record);
        assert!(max < 256);
        set_data(&mut record, max - FIXED_REGION_SIZE);
        assert_eq!(record.inode.inline_size as usize, max);
        assert_eq!(max_inline_size(&record), max);
    }

    #[test]
    fn test_corrupted_body_has_no_room() {
        let mut record = record(32);
        set_data(&mut record, 4);
        // entry name length running past the body
        let off = record.inode.inline_off as usize;
        record.ibody[off] = 0xff;
        assert_eq!(max_inline_xattr_value_size(&record), 0);
    }

    #[test]
    fn test_region_for_offset() {
        let mut record = record(32);
        set_data(&mut record, 10);
        assert_eq!(
            region_for_offset(&record, 59).unwrap(),
            InlineRegion::Fixed { start: 0, end: 60 }
        );
        let InlineRegion::Extension { start, end, .. } = region_for_offset(&record, 60).unwrap() else {
            panic!("offset 60 is in the extension");
        };
        assert_eq!((start, end), (60, 70));
        assert_eq!(region_for_offset(&record, 70), Err(libc::EINVAL));
    }
}

//! linear directory entry format, shared by directory blocks and inline directories
//!
//! an entry is `inode u32 | rec_len u16 | name_len u8 | file_type u8 | name`,
//! `rec_len` spans the entry and whatever free space follows it.
use log::error;

use crate::utils::digest::block_checksum;

use super::{Errno, FileKind, EFSCORRUPTED};

pub const DIRENT_HEADER_LEN: usize = 8;
/// size of the checksum entry at the end of a directory block
pub const DIRENT_TAIL_SIZE: usize = 12;
const DIRENT_TAIL_FILE_TYPE: u8 = 0xde;
pub const MAX_NAME_LEN: usize = 255;

/// space an entry with a `name_len` bytes name needs
pub const fn dir_rec_len(name_len: usize) -> usize {
    (name_len + DIRENT_HEADER_LEN + 3) & !3
}

/// where a directory listing stopped, `version` detects changes in between
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirCursor {
    pub pos: u64,
    pub version: u64,
}

/// one entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub ino: u64,
    pub kind: FileKind,
    pub name: String,
}

impl DirEntryInfo {
    pub(crate) fn new(ino: u64, kind: FileKind, name: &[u8]) -> Self {
        DirEntryInfo {
            ino,
            kind,
            name: String::from_utf8_lossy(name).into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub rec_len: usize,
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// bytes the entry itself uses, free space after it excluded
    pub fn used_len(&self) -> usize {
        if self.inode == 0 {
            0
        } else {
            dir_rec_len(self.name.len())
        }
    }
}

fn read_header(buf: &[u8], offset: usize) -> Option<(u32, usize, usize, u8)> {
    let header = buf.get(offset..offset + DIRENT_HEADER_LEN)?;
    let inode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let rec_len = u16::from_le_bytes([header[4], header[5]]) as usize;
    Some((inode, rec_len, header[6] as usize, header[7]))
}

pub fn rec_len_at(buf: &[u8], offset: usize) -> usize {
    read_header(buf, offset).map_or(0, |(_, rec_len, _, _)| rec_len)
}

pub fn set_rec_len(buf: &mut [u8], offset: usize, rec_len: usize) {
    buf[offset + 4..offset + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
}

pub fn set_inode(buf: &mut [u8], offset: usize, inode: u32) {
    buf[offset..offset + 4].copy_from_slice(&inode.to_le_bytes());
}

/// decode the entry at `offset` of `buf`, rejecting anything not fully inside `buf`
pub fn check_dir_entry(dir: u64, buf: &[u8], offset: usize) -> Result<DirEntry, Errno> {
    let Some((inode, rec_len, name_len, file_type)) = read_header(buf, offset) else {
        return Err(bad_entry(dir, offset, "directory entry overrun", 0));
    };
    let problem = if rec_len < dir_rec_len(1) {
        Some("rec_len is smaller than minimal")
    } else if rec_len % 4 != 0 {
        Some("rec_len % 4 != 0")
    } else if rec_len < dir_rec_len(name_len) {
        Some("rec_len is too small for name_len")
    } else if offset + rec_len > buf.len() {
        Some("directory entry overrun")
    } else {
        None
    };
    if let Some(problem) = problem {
        return Err(bad_entry(dir, offset, problem, rec_len));
    }
    let name_start = offset + DIRENT_HEADER_LEN;
    Ok(DirEntry {
        inode,
        rec_len,
        file_type,
        name: buf[name_start..name_start + name_len].to_vec(),
    })
}

fn bad_entry(dir: u64, offset: usize, problem: &str, rec_len: usize) -> Errno {
    error!("bad entry in directory {dir}: {problem} - offset={offset}, rec_len={rec_len}");
    EFSCORRUPTED
}

/// checked walk over the entries of a buffer, stops after the first error
pub struct DirEntries<'a> {
    dir: u64,
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> DirEntries<'a> {
    pub fn new(dir: u64, buf: &'a [u8]) -> Self {
        DirEntries::starting_at(dir, buf, 0)
    }

    pub fn starting_at(dir: u64, buf: &'a [u8], offset: usize) -> Self {
        DirEntries {
            dir,
            buf,
            offset,
            failed: false,
        }
    }
}

impl<'a> Iterator for DirEntries<'a> {
    type Item = Result<(usize, DirEntry), Errno>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match check_dir_entry(self.dir, self.buf, self.offset) {
            Ok(entry) => {
                let offset = self.offset;
                self.offset += entry.rec_len;
                Some(Ok((offset, entry)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// offset of the live entry called `name`
pub fn search(dir: u64, buf: &[u8], name: &[u8]) -> Result<Option<(usize, DirEntry)>, Errno> {
    for item in DirEntries::new(dir, buf) {
        let (offset, entry) = item?;
        if entry.inode != 0 && entry.name == name {
            return Ok(Some((offset, entry)));
        }
    }
    Ok(None)
}

/// first entry with room for `name` after its own bytes
///
/// `EEXIST` when the name is already there, `ENOSPC` when nothing fits
pub fn find_dest(dir: u64, buf: &[u8], name: &[u8]) -> Result<usize, Errno> {
    let needed = dir_rec_len(name.len());
    for item in DirEntries::new(dir, buf) {
        let (offset, entry) = item?;
        if entry.inode != 0 && entry.name == name {
            return Err(libc::EEXIST);
        }
        if entry.rec_len >= entry.used_len() + needed {
            return Ok(offset);
        }
    }
    Err(libc::ENOSPC)
}

/// write a new entry into the space found by [find_dest]
///
/// a live entry is split, its tail becomes the new entry, an unused one is taken over
pub fn insert_dentry(buf: &mut [u8], offset: usize, name: &[u8], inode: u32, file_type: u8) {
    let (old_inode, rec_len, name_len, _) = read_header(buf, offset).unwrap_or_default();
    let offset = if old_inode != 0 {
        let used = dir_rec_len(name_len);
        set_rec_len(buf, offset, used);
        set_rec_len(buf, offset + used, rec_len - used);
        offset + used
    } else {
        offset
    };
    set_inode(buf, offset, inode);
    buf[offset + 6] = name.len() as u8;
    buf[offset + 7] = file_type;
    buf[offset + DIRENT_HEADER_LEN..offset + DIRENT_HEADER_LEN + name.len()].copy_from_slice(name);
}

/// drop the entry at `target`, its space goes to the entry before it
pub fn delete_entry(dir: u64, buf: &mut [u8], target: usize) -> Result<(), Errno> {
    let mut prev = None;
    let mut found = None;
    for item in DirEntries::new(dir, buf) {
        let (offset, entry) = item?;
        if offset == target {
            found = Some(entry.rec_len);
            break;
        }
        prev = Some((offset, entry.rec_len));
    }
    let rec_len = found.ok_or(libc::ENOENT)?;
    match prev {
        Some((prev_offset, prev_rec_len)) => set_rec_len(buf, prev_offset, prev_rec_len + rec_len),
        None => set_inode(buf, target, 0),
    }
    Ok(())
}

/// the last entry of `buf[..old_size]` grows to end at `new_size`,
/// an empty buffer gets a single unused entry covering it
pub fn update_final_de(buf: &mut [u8], old_size: usize, new_size: usize) {
    if old_size == 0 {
        set_inode(buf, 0, 0);
        set_rec_len(buf, 0, new_size);
        buf[6] = 0;
        buf[7] = 0;
        return;
    }
    let mut offset = 0;
    let mut last = 0;
    while offset < old_size {
        last = offset;
        let rec_len = rec_len_at(buf, offset);
        if rec_len == 0 {
            break;
        }
        offset += rec_len;
    }
    let rec_len = rec_len_at(buf, last);
    set_rec_len(buf, last, rec_len + new_size - old_size);
}

/// "." and ".." at the start of a directory block, returns where the next entry goes
///
/// with `dotdot_real_len` ".." only takes its own bytes, otherwise it spans the block
pub fn init_dot_dotdot(
    buf: &mut [u8],
    dir: u32,
    parent: u32,
    blocksize: usize,
    csum_size: usize,
    dotdot_real_len: bool,
) -> usize {
    let dot_len = dir_rec_len(1);
    set_inode(buf, 0, dir);
    set_rec_len(buf, 0, dot_len);
    buf[6] = 1;
    buf[7] = 2;
    buf[8] = b'.';

    let dotdot_len = if dotdot_real_len {
        dir_rec_len(2)
    } else {
        blocksize - csum_size - dot_len
    };
    set_inode(buf, dot_len, parent);
    set_rec_len(buf, dot_len, dotdot_len);
    buf[dot_len + 6] = 2;
    buf[dot_len + 7] = 2;
    buf[dot_len + 8..dot_len + 10].copy_from_slice(b"..");
    dot_len + dotdot_len
}

/// write the checksum entry at the end of a directory block
pub fn init_dirent_tail(block: &mut [u8]) {
    let tail = block.len() - DIRENT_TAIL_SIZE;
    block[tail..].fill(0);
    set_rec_len(block, tail, DIRENT_TAIL_SIZE);
    block[tail + 7] = DIRENT_TAIL_FILE_TYPE;
}

pub fn has_dirent_tail(block: &[u8]) -> bool {
    let tail = block.len() - DIRENT_TAIL_SIZE;
    read_header(block, tail) == Some((0, DIRENT_TAIL_SIZE, 0, DIRENT_TAIL_FILE_TYPE))
}

pub fn set_dirent_csum(dir: u64, block: &mut [u8]) {
    let tail = block.len() - DIRENT_TAIL_SIZE;
    let csum = block_checksum(dir, &block[..tail]);
    block[tail + 8..].copy_from_slice(&csum.to_le_bytes());
}

pub fn verify_dirent_csum(dir: u64, block: &[u8]) -> bool {
    let tail = block.len() - DIRENT_TAIL_SIZE;
    has_dirent_tail(block)
        && block[tail + 8..] == block_checksum(dir, &block[..tail]).to_le_bytes()
}

//! extended attributes kept in the tail of an inode record
//!
//! layout of the body:
//! - 4 bytes header magic
//! - entries growing upward, each a 16 bytes header followed by the name padded to 4
//! - 4 zero bytes ending the entry list
//! - free space
//! - values growing downward from the end of the body, each padded to 4
//!
//! `value_offs` of an entry counts from the first entry, right after the header.
//! Every set rewrites the body, so entry and value positions are only valid
//! until the next change.
use log::error;

use super::{Errno, EFSCORRUPTED};

pub const XATTR_MAGIC: u32 = 0xEA02_0000;
pub const XATTR_HEADER_LEN: usize = 4;
const ENTRY_HEADER_LEN: usize = 16;
pub const XATTR_ROUND: usize = 3;

/// space an entry with a `name_len` bytes name takes in the entry list
pub const fn xattr_len(name_len: usize) -> usize {
    (name_len + XATTR_ROUND + ENTRY_HEADER_LEN) & !XATTR_ROUND
}

/// space a `size` bytes value takes in the value area
pub const fn xattr_size(size: usize) -> usize {
    (size + XATTR_ROUND) & !XATTR_ROUND
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrNamespace {
    User,
    Trusted,
    Security,
    System,
}

impl XattrNamespace {
    /// `name_index` stored in an entry
    pub const fn index(self) -> u8 {
        match self {
            XattrNamespace::User => 1,
            XattrNamespace::Trusted => 4,
            XattrNamespace::Security => 6,
            XattrNamespace::System => 7,
        }
    }
}

/// one decoded entry, positions are byte offsets from the start of the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XattrEntry {
    pub name_index: u8,
    pub name: Vec<u8>,
    pub offset: usize,
    pub value_start: usize,
    pub value_len: usize,
}

/// result of walking the entry list once
#[derive(Debug, Default)]
pub struct XattrLayout {
    pub entries: Vec<XattrEntry>,
    /// position of the terminating zero word
    pub end: usize,
    /// lowest value position, the value area starts here
    pub min_offs: usize,
}

impl XattrLayout {
    /// bytes between the terminator and the value area
    pub fn free(&self) -> usize {
        self.min_offs.saturating_sub(self.end + 4)
    }

    pub fn find(&self, name_index: u8, name: &[u8]) -> Option<&XattrEntry> {
        self.entries
            .iter()
            .find(|e| e.name_index == name_index && e.name == name)
    }
}

pub fn has_header(body: &[u8]) -> bool {
    read_u32(body, 0) == Some(XATTR_MAGIC)
}

/// walk every entry, checking that names and values stay inside the body
pub fn walk(body: &[u8]) -> Result<XattrLayout, Errno> {
    let mut layout = XattrLayout {
        entries: Vec::new(),
        end: XATTR_HEADER_LEN,
        min_offs: body.len(),
    };
    if !has_header(body) {
        return Ok(layout);
    }
    let mut pos = XATTR_HEADER_LEN;
    loop {
        match read_u32(body, pos) {
            None => return Err(corrupted("entry list runs past the body", pos)),
            Some(0) => break,
            Some(_) => {}
        }
        if pos + ENTRY_HEADER_LEN > body.len() {
            return Err(corrupted("entry header runs past the body", pos));
        }
        let name_len = body[pos] as usize;
        let name_index = body[pos + 1];
        let value_offs = u16::from_le_bytes([body[pos + 2], body[pos + 3]]) as usize;
        let value_inum = read_u32(body, pos + 4).unwrap_or_default();
        let value_len = read_u32(body, pos + 8).unwrap_or_default() as usize;
        let next = pos + xattr_len(name_len);
        if next + 4 > body.len() {
            return Err(corrupted("entry name runs past the body", pos));
        }
        if value_inum != 0 {
            return Err(corrupted("value stored outside the inode", pos));
        }
        let value_start = if value_len == 0 {
            0
        } else {
            let start = XATTR_HEADER_LEN + value_offs;
            if start + value_len > body.len() {
                return Err(corrupted("value runs past the body", pos));
            }
            layout.min_offs = layout.min_offs.min(start);
            start
        };
        layout.entries.push(XattrEntry {
            name_index,
            name: body[pos + ENTRY_HEADER_LEN..pos + ENTRY_HEADER_LEN + name_len].to_vec(),
            offset: pos,
            value_start,
            value_len,
        });
        pos = next;
    }
    layout.end = pos;
    if layout.min_offs < layout.end + 4 {
        return Err(corrupted("value overlaps the entry list", layout.min_offs));
    }
    Ok(layout)
}

pub fn find(body: &[u8], name_index: u8, name: &[u8]) -> Result<Option<XattrEntry>, Errno> {
    Ok(walk(body)?.find(name_index, name).cloned())
}

/// copy out a value, `ENODATA` when there is no such attribute
pub fn get(body: &[u8], name_index: u8, name: &[u8]) -> Result<Vec<u8>, Errno> {
    let entry = find(body, name_index, name)?.ok_or(libc::ENODATA)?;
    Ok(body[entry.value_start..entry.value_start + entry.value_len].to_vec())
}

/// create, replace or (with `None`) remove an attribute
///
/// `ENOSPC` leaves the body untouched, removing a missing attribute is `ENODATA`
pub fn set(body: &mut [u8], name_index: u8, name: &[u8], value: Option<&[u8]>) -> Result<(), Errno> {
    if name.is_empty() || name.len() > u8::MAX as usize {
        return Err(libc::ERANGE);
    }
    let layout = walk(body)?;
    let mut attrs: Vec<(u8, Vec<u8>, Vec<u8>)> = layout
        .entries
        .iter()
        .map(|e| {
            let value = body[e.value_start..e.value_start + e.value_len].to_vec();
            (e.name_index, e.name.clone(), value)
        })
        .collect();
    let existing = attrs
        .iter()
        .position(|(index, n, _)| *index == name_index && n == name);
    match (existing, value) {
        (None, None) => return Err(libc::ENODATA),
        (Some(i), None) => {
            attrs.remove(i);
        }
        (Some(i), Some(value)) => attrs[i].2 = value.to_vec(),
        (None, Some(value)) => attrs.push((name_index, name.to_vec(), value.to_vec())),
    }

    let needed = XATTR_HEADER_LEN
        + attrs
            .iter()
            .map(|(_, n, v)| xattr_len(n.len()) + xattr_size(v.len()))
            .sum::<usize>()
        + 4;
    if needed > body.len() {
        return Err(libc::ENOSPC);
    }
    encode(body, &attrs);
    Ok(())
}

pub fn remove(body: &mut [u8], name_index: u8, name: &[u8]) -> Result<(), Errno> {
    set(body, name_index, name, None)
}

/// lay the attributes out from scratch, in order
fn encode(body: &mut [u8], attrs: &[(u8, Vec<u8>, Vec<u8>)]) {
    body.fill(0);
    body[..4].copy_from_slice(&XATTR_MAGIC.to_le_bytes());
    let mut pos = XATTR_HEADER_LEN;
    let mut value_end = body.len();
    for (name_index, name, value) in attrs {
        let value_offs = if value.is_empty() {
            0
        } else {
            value_end -= xattr_size(value.len());
            body[value_end..value_end + value.len()].copy_from_slice(value);
            value_end - XATTR_HEADER_LEN
        };
        body[pos] = name.len() as u8;
        body[pos + 1] = *name_index;
        body[pos + 2..pos + 4].copy_from_slice(&(value_offs as u16).to_le_bytes());
        body[pos + 8..pos + 12].copy_from_slice(&(value.len() as u32).to_le_bytes());
        body[pos + 12..pos + 16].copy_from_slice(&entry_hash(name, value).to_le_bytes());
        body[pos + ENTRY_HEADER_LEN..pos + ENTRY_HEADER_LEN + name.len()].copy_from_slice(name);
        pos += xattr_len(name.len());
    }
}

fn entry_hash(name: &[u8], value: &[u8]) -> u32 {
    let mut hash = name
        .iter()
        .fold(0u32, |hash, c| (hash << 5) ^ (hash >> 27) ^ *c as u32);
    for word in value.chunks(4) {
        let mut padded = [0u8; 4];
        padded[..word.len()].copy_from_slice(word);
        hash = (hash << 16) ^ (hash >> 16) ^ u32::from_le_bytes(padded);
    }
    hash
}

fn read_u32(body: &[u8], pos: usize) -> Option<u32> {
    let bytes = body.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn corrupted(what: &str, pos: usize) -> Errno {
    error!("corrupted in-inode xattr body: {what} at offset {pos}");
    EFSCORRUPTED
}

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::utils::{
    self,
    time_util::TimeDurationStruct,
    traits::{DigestInSelf, SerializeAndDigest},
};

use super::{filekind::FileKind, Errno, DIRECT_POINTERS, INODE_CORE_SIZE, INODE_SIZE, N_BLOCKS};

/// content is stored inside the inode
pub const INODE_FLAG_INLINE_DATA: u32 = 0x1000_0000;
/// directory is laid out for hashed lookups
pub const INODE_FLAG_INDEX: u32 = 0x0000_1000;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Inode {
    /// block pointers, or the first bytes of inline content.
    /// Kept first so it sits at the start of the record.
    pub block: [u32; N_BLOCKS],
    pub block_size: u32,
    pub inode_number: u64,
    pub file_size: u64,
    /// size the last committed transaction made durable
    pub disk_size: u64,
    pub mode: u16,
    pub hard_links: u32,
    pub user_id: libc::uid_t,
    pub group_id: libc::gid_t,
    pub block_count: u32,
    pub file_kind: FileKind,
    pub flags: u32,
    /// bytes between the encoded inode and the xattr body
    pub extra_isize: u16,
    /// bumped whenever directory entries change
    pub version: u64,
    pub created_at: TimeDurationStruct,
    pub accessed_at: Option<TimeDurationStruct>,
    pub modified_at: Option<TimeDurationStruct>,
    pub metadata_changed_at: Option<TimeDurationStruct>,
    pub digest: [u8; 32],
    /// position of the inline data entry in the xattr body, 0 when there is none
    #[serde(skip)]
    pub inline_off: u16,
    /// bytes of inline capacity currently reserved
    #[serde(skip)]
    pub inline_size: u32,
    /// a write may still fit inline
    #[serde(skip)]
    pub may_inline_data: bool,
}

/// This block is about digest and verify digest
impl DigestInSelf for Inode {
    fn digest(&mut self) {
        self.digest = [0u8; 32];
        self.digest = utils::digest::digest(&self).unwrap_or_default();
    }

    fn verify_digest(&mut self) -> bool {
        let current_digest = self.digest;
        self.digest = [0u8; 32];
        let ok = utils::digest::digest(&self).map_or(false, |digest| digest == current_digest);
        self.digest = current_digest;
        ok
    }
}
// This block is about serialization and deserialization
impl SerializeAndDigest for Inode {}

impl Inode {
    pub fn new(index: u64, file_kind: impl Into<FileKind>, block_size: u32) -> Self {
        let now = utils::time_util::now();
        Inode {
            inode_number: index,
            hard_links: 1,
            file_kind: file_kind.into(),
            created_at: now,
            accessed_at: Some(now),
            modified_at: Some(now),
            metadata_changed_at: Some(now),
            block_size,
            // don't calculate digest and other fields now
            ..Inode::default()
        }
    }
}

/// This block is about file metadata operations
impl Inode {
    pub fn is_dir(&self) -> bool {
        self.file_kind == FileKind::Directory
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    pub fn has_inline_data(&self) -> bool {
        self.has_flag(INODE_FLAG_INLINE_DATA)
    }

    /// new content: modification and change time
    pub fn update_modified_at(&mut self) {
        let now = utils::time_util::now();
        self.metadata_changed_at = Some(now);
        self.modified_at = Some(now);
    }

    /// grow the size fields to cover `len` bytes
    pub fn adjust_size(&mut self, len: u64) {
        if len > self.file_size {
            self.file_size = len;
        }
        if len > self.disk_size {
            self.disk_size = len;
        }
    }
}

/// This block is about the block pointer array
impl Inode {
    /// the pointer array as raw bytes, the fixed region of an inline inode
    pub fn block_bytes(&self) -> [u8; N_BLOCKS * 4] {
        let mut bytes = [0u8; N_BLOCKS * 4];
        for (chunk, pointer) in bytes.chunks_exact_mut(4).zip(self.block.iter()) {
            chunk.copy_from_slice(&pointer.to_le_bytes());
        }
        bytes
    }

    pub fn set_block_bytes(&mut self, bytes: &[u8; N_BLOCKS * 4]) {
        for (pointer, chunk) in self.block.iter_mut().zip(bytes.chunks_exact(4)) {
            *pointer = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    pub fn indirect_block(&self) -> u32 {
        self.block[DIRECT_POINTERS as usize]
    }

    pub fn set_indirect_block(&mut self, block: u32) {
        self.block[DIRECT_POINTERS as usize] = block;
    }
}

/// An inode record as stored in the inode table: the encoded [Inode],
/// `extra_isize` reserved bytes, then the in-inode xattr body.
#[derive(Debug, Clone)]
pub struct InodeRecord {
    pub inode: Inode,
    /// the xattr body, empty when the record has no room for one
    pub ibody: Vec<u8>,
}

impl InodeRecord {
    pub fn new(inode: Inode) -> Self {
        let ibody = vec![0u8; Self::ibody_len(inode.extra_isize)];
        InodeRecord { inode, ibody }
    }

    /// size of the xattr body for a given `extra_isize`
    ///
    /// zero unless there is room for the header magic and the entry list terminator
    pub fn ibody_len(extra_isize: u16) -> usize {
        let start = INODE_CORE_SIZE as usize + extra_isize as usize;
        let len = (INODE_SIZE as usize).saturating_sub(start);
        if len < 8 {
            0
        } else {
            len
        }
    }

    /// the body can hold extended attributes at all
    pub fn has_xattr_space(&self) -> bool {
        self.inode.extra_isize != 0 && !self.ibody.is_empty()
    }

    pub fn encode(&mut self) -> Result<Vec<u8>, Errno> {
        let core = SerializeAndDigest::serialize(&mut self.inode).map_err(|e| {
            log::error!("failed to encode inode {}: {e}", self.inode.inode_number);
            libc::EIO
        })?;
        if core.len() > INODE_CORE_SIZE as usize {
            log::error!(
                "encoded inode {} takes {} bytes, more than its record allows",
                self.inode.inode_number,
                core.len()
            );
            return Err(libc::EOVERFLOW);
        }
        let mut record = vec![0u8; INODE_SIZE as usize];
        record[..core.len()].copy_from_slice(&core);
        record[INODE_SIZE as usize - self.ibody.len()..].copy_from_slice(&self.ibody);
        Ok(record)
    }

    pub fn decode(record: &[u8]) -> anyhow::Result<Self> {
        if record.len() < INODE_SIZE as usize {
            return Err(anyhow!("inode record is only {} bytes", record.len()));
        }
        let (inode, _) = <Inode as SerializeAndDigest>::deserialize(&record[..INODE_CORE_SIZE as usize])?;
        let ibody_len = Self::ibody_len(inode.extra_isize);
        let ibody = record[INODE_SIZE as usize - ibody_len..INODE_SIZE as usize].to_vec();
        Ok(InodeRecord { inode, ibody })
    }
}

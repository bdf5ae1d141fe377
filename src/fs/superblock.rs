use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::utils::{
    digest,
    time_util::{self, *},
    traits::{DigestInSelf, SerializeAndDigest},
};

use super::{inline::FIXED_REGION_SIZE, DEFAULT_EXTRA_ISIZE, FS_MAGIC, INODE_SIZE};

type InodeCountType = u64;
type BlockCountType = u64;
/// The superblock of this filesystem
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct SuperBlock {
    /// magic number
    pub magic: u32,
    /// data block size
    pub block_size: u32,
    pub created_at: TimeDurationStruct,
    pub modified_at: Option<TimeDurationStruct>,
    pub last_mounted_at: Option<TimeDurationStruct>,
    /// data block count
    pub block_count: BlockCountType,
    pub free_blocks_count: BlockCountType,
    pub inode_count: InodeCountType,
    pub free_inodes: InodeCountType,
    pub groups: u32,
    pub data_blocks_per_group: u32,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    /// on-disk size of one inode record
    pub inode_size: u32,
    /// extra record space new inodes reserve after the core
    pub want_extra_isize: u16,
    /// bytes of content kept in the block pointer array of an inline inode
    pub inline_fixed_size: u8,
    /// new files and directories start with their content inside the inode
    pub feature_inline_data: bool,
    /// directory blocks carry a checksum tail
    pub feature_metadata_csum: bool,
    /// raised when corrupted metadata was detected
    pub errors: bool,
    /// inodes in the middle of a destructive resize
    pub orphans: Vec<u64>,
    /// to verify the integrity of this superblock
    /// intend to use a fast secure hash function,like [blake3]
    pub digest: [u8; 32],
}
impl SuperBlock {
    pub fn new(inode_count: u64, block_size: u32, groups: u32, uid: u32, gid: u32) -> Self {
        let total_block_count = block_size as u64 * 8 * groups as u64;
        let now = time_util::now();
        let mut superblock = Self {
            inode_count,
            block_size,
            groups,
            uid,
            gid,
            magic: FS_MAGIC,
            created_at: now,
            modified_at: None,
            last_mounted_at: None,
            free_inodes: inode_count,
            block_count: total_block_count,
            free_blocks_count: total_block_count,
            data_blocks_per_group: block_size * 8, // 1 byte has 8 bits to store block index
            inode_size: INODE_SIZE,
            want_extra_isize: DEFAULT_EXTRA_ISIZE,
            inline_fixed_size: FIXED_REGION_SIZE as u8,
            feature_inline_data: true,
            feature_metadata_csum: false,
            errors: false,
            orphans: Vec::new(),
            digest: [0u8; 32],
        };
        superblock.digest();
        superblock
    }
}
impl SuperBlock {
    pub fn update_last_mounted_at(&mut self) {
        self.last_mounted_at = Some(time_util::now());
    }

    pub fn update_modified_at(&mut self) {
        self.modified_at = Some(time_util::now());
    }

    /// put `ino` on the orphan list, a no-op when it is already there
    pub fn add_orphan(&mut self, ino: u64) {
        if !self.orphans.contains(&ino) {
            self.orphans.push(ino);
        }
    }

    pub fn remove_orphan(&mut self, ino: u64) {
        self.orphans.retain(|orphan| *orphan != ino);
    }
}

impl DigestInSelf for SuperBlock {
    fn digest(&mut self) {
        self.digest = [0u8; 32];
        self.digest = digest::digest(self).unwrap_or_default();
    }

    fn verify_digest(&mut self) -> bool {
        // get digest from itself
        let digest = self.digest;
        // clear the digest from struct
        self.digest = [0u8; 32];
        // calulate the digest
        let Ok(digest2) = digest::digest(self) else {
            self.digest = digest;
            return false;
        };
        // verify
        let ok = digest == digest2;
        // store newest digest to itself
        self.digest = digest2;
        // return verify result
        ok
    }
}

impl SerializeAndDigest for SuperBlock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_digest_round_trip() -> anyhow::Result<()> {
        let mut superblock = SuperBlock::new(4096, 512, 1, 0, 0);
        superblock.add_orphan(12);
        superblock.add_orphan(12);
        assert_eq!(superblock.orphans, vec![12]);

        let encoded = SerializeAndDigest::serialize(&mut superblock)?;
        let (mut decoded, _) = <SuperBlock as SerializeAndDigest>::deserialize(&encoded)?;
        assert_eq!(decoded.orphans, vec![12]);
        assert!(decoded.feature_inline_data);
        assert_eq!(decoded.inline_fixed_size as usize, FIXED_REGION_SIZE);

        decoded.remove_orphan(12);
        assert!(decoded.orphans.is_empty());
        Ok(())
    }

    #[test]
    fn test_tampered_superblock_is_rejected() -> anyhow::Result<()> {
        let mut superblock = SuperBlock::new(4096, 512, 1, 0, 0);
        let mut encoded = SerializeAndDigest::serialize(&mut superblock)?;
        // block_size lives right after the magic number
        encoded[4] ^= 0xff;
        assert!(<SuperBlock as SerializeAndDigest>::deserialize(&encoded).is_err());
        Ok(())
    }
}

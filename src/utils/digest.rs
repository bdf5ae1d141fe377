use bincode::config;
use serde::Serialize;

/// cacluate [blake3] hash of a serilizeable object
pub fn digest<T: Serialize>(t: &T) -> anyhow::Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    let config = config::legacy();
    hasher.update(&bincode::serde::encode_to_vec(t, config)?);
    let mut hash = hasher.finalize_xof();
    let mut output = [0u8; 32];
    hash.fill(&mut output);
    Ok(output)
}

/// 32-bit checksum of a metadata block, seeded with the owning inode number
pub fn block_checksum(ino: u64, bytes: &[u8]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&ino.to_le_bytes());
    hasher.update(bytes);
    let hash = hasher.finalize();
    let mut low = [0u8; 4];
    low.copy_from_slice(&hash.as_bytes()[..4]);
    u32::from_le_bytes(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_checksum_depends_on_owner() {
        let block = [7u8; 64];
        assert_eq!(block_checksum(2, &block), block_checksum(2, &block));
        assert_ne!(block_checksum(2, &block), block_checksum(3, &block));
    }
}

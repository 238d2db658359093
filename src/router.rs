//! Shard router
//!
//! Maps a shard key to an index in `[0, shard_count)`. The scheme matches the
//! pecl/memcache standard crc32 placement over UTF-16LE encoded keys, so data
//! already sharded this way keeps landing on the same server.
//!
//! Do not switch the encoding to UTF-8: every existing key would move.

use crate::error::RouterError;

/// Mask applied after dropping the low 16 bits of the checksum.
const SHIFT_MASK: u32 = 0x7fff;

/// CRC-32 (IEEE, zlib-compatible) of the key's UTF-16LE bytes.
pub fn shard_hash(key: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for unit in key.encode_utf16() {
        hasher.update(&unit.to_le_bytes());
    }
    hasher.finalize()
}

/// Compute the shard index for `key` among `shard_count` shards.
///
/// Returns `InvalidConfiguration` for zero shards.
pub fn shard_index(key: &str, shard_count: usize) -> Result<usize, RouterError> {
    if shard_count == 0 {
        return Err(RouterError::InvalidConfiguration(
            "shard count must be at least 1".to_string(),
        ));
    }

    let shift = (shard_hash(key) >> 16) & SHIFT_MASK;
    Ok(shift as usize % shard_count)
}

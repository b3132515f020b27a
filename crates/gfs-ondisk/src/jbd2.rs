use gfs_types::{JBD2_MAGIC, JBD2_SUPERBLOCK_V2, put_be_u32};

/// jbd2 journal superblock, written into the journal inode's first block.
///
/// All fields are big-endian on disk. Only the geometry fields a fresh,
/// never-replayed journal needs are modelled; the rest of the block stays
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalSuperblock {
    /// Journal device block size in bytes.
    pub block_size: u32,
    /// Total number of blocks in the journal file.
    pub max_len: u32,
}

impl JournalSuperblock {
    /// Encode into the first journal block. `buf.len()` must be at least 32.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than the 32-byte header area.
    pub fn encode_into(&self, buf: &mut [u8]) {
        put_be_u32(buf, 0x00, JBD2_MAGIC); // h_magic
        put_be_u32(buf, 0x04, JBD2_SUPERBLOCK_V2); // h_blocktype
        put_be_u32(buf, 0x08, 0); // h_sequence
        put_be_u32(buf, 0x0C, self.block_size); // s_blocksize
        put_be_u32(buf, 0x10, self.max_len); // s_maxlen
        put_be_u32(buf, 0x14, 1); // s_first: first log block
        put_be_u32(buf, 0x18, 1); // s_sequence: first expected commit
        put_be_u32(buf, 0x1C, 0); // s_start: empty journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_be_u32(buf: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
    }

    #[test]
    fn journal_superblock_layout() {
        let mut block = vec![0_u8; 4096];
        JournalSuperblock {
            block_size: 4096,
            max_len: 1024,
        }
        .encode_into(&mut block);

        assert_eq!(read_be_u32(&block, 0x00), 0xC03B_3998);
        assert_eq!(read_be_u32(&block, 0x04), 4); // V2 superblock
        assert_eq!(read_be_u32(&block, 0x0C), 4096);
        assert_eq!(read_be_u32(&block, 0x10), 1024);
        assert_eq!(read_be_u32(&block, 0x14), 1);
        assert_eq!(read_be_u32(&block, 0x18), 1);
        assert_eq!(read_be_u32(&block, 0x1C), 0); // empty journal
        // Remainder of the block untouched.
        assert!(block[0x20..].iter().all(|b| *b == 0));
    }
}

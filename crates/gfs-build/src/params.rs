use gfs_error::{BuildError, Result};
use gfs_types::BlockSize;
use serde::{Deserialize, Serialize};

/// Default inode size in bytes.
pub const DEFAULT_INODE_SIZE: u16 = 256;

/// Build parameters for one image.
///
/// Everything the build depends on is in here — UUID and timestamps
/// included, so the same parameters always produce byte-identical images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    /// Target image length in bytes. Rounded down to a whole number of
    /// blocks before any derived value is computed.
    pub len_bytes: u64,
    pub block_size: BlockSize,
    /// Inode record size; must be a power of two, at least 128, and divide
    /// the block size.
    pub inode_size: u16,
    /// Requested total inode count. The layout rounds this up so inode
    /// tables fill whole blocks; `None` picks one inode per four blocks.
    pub inode_count: Option<u32>,
    /// Blocks per block group; `None` picks the format default of
    /// `block_size * 8` (one full block bitmap per group).
    pub blocks_per_group: Option<u32>,
    /// Whether to create a journal inode.
    pub journal: bool,
    /// Volume label, at most 16 bytes.
    pub label: String,
    /// Filesystem UUID, caller-supplied for reproducible builds.
    pub uuid: [u8; 16],
    /// Build timestamp (seconds); stamps `s_mkfs_time` and every inode.
    pub timestamp: u32,
}

impl BuildParams {
    /// Parameters with the defaults the CLI exposes.
    pub fn new(len_bytes: u64, block_size: u32) -> Result<Self> {
        let block_size = BlockSize::new(block_size)
            .map_err(|e| BuildError::Config(e.to_string()))?;
        Ok(Self {
            len_bytes,
            block_size,
            inode_size: DEFAULT_INODE_SIZE,
            inode_count: None,
            blocks_per_group: None,
            journal: true,
            label: String::new(),
            uuid: [0_u8; 16],
            timestamp: 0,
        })
    }

    /// Validate cross-field consistency. Called by the layout calculator
    /// before anything is derived.
    pub fn validate(&self) -> Result<()> {
        let bs = self.block_size.get();

        if self.inode_size < 128 || !self.inode_size.is_power_of_two() {
            return Err(BuildError::Config(format!(
                "inode size {} must be a power of two >= 128",
                self.inode_size
            )));
        }
        if u32::from(self.inode_size) > bs {
            return Err(BuildError::Config(format!(
                "inode size {} exceeds block size {bs}",
                self.inode_size
            )));
        }
        if self.label.len() > 16 {
            return Err(BuildError::Config(format!(
                "label {:?} exceeds 16 bytes",
                self.label
            )));
        }
        if let Some(bpg) = self.blocks_per_group {
            if bpg == 0 || bpg > bs * 8 {
                return Err(BuildError::Config(format!(
                    "blocks per group {bpg} must be in 1..={} (one bitmap block)",
                    bs * 8
                )));
            }
        }
        if let Some(count) = self.inode_count {
            if count == 0 {
                return Err(BuildError::Config(
                    "inode count cannot be zero".to_owned(),
                ));
            }
        }
        if self.len_bytes < u64::from(bs) {
            return Err(BuildError::Config(format!(
                "target length {} is smaller than one {bs}-byte block",
                self.len_bytes
            )));
        }
        Ok(())
    }

    /// Effective blocks-per-group value.
    #[must_use]
    pub fn effective_blocks_per_group(&self) -> u32 {
        self.blocks_per_group
            .unwrap_or(self.block_size.get() * 8)
    }
}

use crate::params::BuildParams;
use gfs_alloc::{Region, RegionList};
use gfs_error::{BuildError, Result};
use gfs_types::{BlockNumber, EXT4_GROUP_DESC_SIZE, GroupNumber};
use serde::{Deserialize, Serialize};

/// Journal sizing bounds, in blocks.
const JOURNAL_MIN_BLOCKS: u32 = 1024;
const JOURNAL_MAX_BLOCKS: u32 = 32768;

/// Growth headroom the reserved descriptor blocks provide (the classic
/// 1024x online-resize allowance).
const RESIZE_GROWTH_FACTOR: u64 = 1024;

/// Derived image geometry.
///
/// A pure function of [`BuildParams`]: no allocation happens here, and the
/// same parameters always derive the same layout. Everything downstream —
/// metadata reservation, free-count accounting, the superblock — consumes
/// these numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub total_blocks: u32,
    pub first_data_block: u32,
    pub blocks_per_group: u32,
    pub block_groups: u32,
    pub inodes_per_group: u32,
    pub total_inodes: u32,
    /// Inode table blocks per group (the table fills whole blocks exactly).
    pub inode_table_blocks: u32,
    /// Group descriptor table blocks.
    pub gdt_blocks: u32,
    /// Descriptor blocks reserved after the table for future growth.
    pub reserved_gdt_blocks: u32,
    /// Journal length in blocks; zero when the journal is disabled.
    pub journal_blocks: u32,
}

impl Layout {
    /// Derive the geometry, or fail with `Config` when the target cannot
    /// hold a viable filesystem.
    pub fn compute(params: &BuildParams) -> Result<Self> {
        params.validate()?;

        let bs = params.block_size.get();
        let total_blocks_u64 = params.len_bytes / u64::from(bs);
        let total_blocks = u32::try_from(total_blocks_u64).map_err(|_| {
            BuildError::Config(format!(
                "{} bytes exceeds the 32-bit block space at block size {bs}",
                params.len_bytes
            ))
        })?;

        let first_data_block = u32::from(bs == 1024);
        let usable = total_blocks.saturating_sub(first_data_block);
        if usable == 0 {
            return Err(BuildError::Config(
                "target holds no blocks after the boot padding".to_owned(),
            ));
        }

        let blocks_per_group = params.effective_blocks_per_group();
        let block_groups = usable.div_ceil(blocks_per_group);

        // Inode geometry: round the per-group count up so inode tables
        // fill whole blocks. The (possibly larger) resulting total is the
        // real total — never silently discarded.
        let inodes_per_block = bs / u32::from(params.inode_size);
        let requested_inodes = params
            .inode_count
            .unwrap_or(total_blocks / 4)
            .max(16);
        // Group 0 must hold the ten reserved inodes plus lost+found, so
        // the per-group count never drops below 16.
        let inodes_per_group = requested_inodes
            .div_ceil(block_groups)
            .max(16)
            .div_ceil(inodes_per_block)
            * inodes_per_block;
        if inodes_per_group > bs * 8 {
            return Err(BuildError::Config(format!(
                "{requested_inodes} inodes need {inodes_per_group} per group, \
                 more than one inode bitmap block can track ({})",
                bs * 8
            )));
        }
        let total_inodes_u64 = u64::from(inodes_per_group) * u64::from(block_groups);
        let total_inodes = u32::try_from(total_inodes_u64).map_err(|_| {
            BuildError::Config("total inode count exceeds 32 bits".to_owned())
        })?;
        let inode_table_blocks =
            inodes_per_group * u32::from(params.inode_size) / bs;

        let gdt_blocks = block_groups
            .checked_mul(EXT4_GROUP_DESC_SIZE)
            .map(|bytes| bytes.div_ceil(bs))
            .ok_or_else(|| {
                BuildError::Config("group descriptor table size overflows".to_owned())
            })?;
        let reserved_gdt_blocks = Self::reserved_gdt_blocks(
            total_blocks,
            first_data_block,
            blocks_per_group,
            bs,
            gdt_blocks,
        );

        let journal_blocks = if params.journal {
            (total_blocks / 64).clamp(JOURNAL_MIN_BLOCKS, JOURNAL_MAX_BLOCKS)
        } else {
            0
        };

        let layout = Self {
            total_blocks,
            first_data_block,
            blocks_per_group,
            block_groups,
            inodes_per_group,
            total_inodes,
            inode_table_blocks,
            gdt_blocks,
            reserved_gdt_blocks,
            journal_blocks,
        };
        layout.check_viability()?;
        Ok(layout)
    }

    /// Reserved descriptor blocks for growth to `RESIZE_GROWTH_FACTOR`
    /// times the current size, capped at `block_size / 4` (the pointer
    /// capacity of the resize inode's indirection block).
    #[allow(clippy::cast_possible_truncation)] // capped at bs / 4
    fn reserved_gdt_blocks(
        total_blocks: u32,
        first_data_block: u32,
        blocks_per_group: u32,
        bs: u32,
        gdt_blocks: u32,
    ) -> u32 {
        let grown_blocks = (u64::from(total_blocks) * RESIZE_GROWTH_FACTOR)
            .min(u64::from(u32::MAX));
        let grown_groups = grown_blocks
            .saturating_sub(u64::from(first_data_block))
            .div_ceil(u64::from(blocks_per_group));
        let grown_gdt = (grown_groups * u64::from(EXT4_GROUP_DESC_SIZE))
            .div_ceil(u64::from(bs));
        grown_gdt
            .saturating_sub(u64::from(gdt_blocks))
            .min(u64::from(bs / 4)) as u32
    }

    /// Every group must be able to hold its own metadata, with room left
    /// for the journal and the root directory tree in the pool.
    fn check_viability(&self) -> Result<()> {
        let mut metadata_total = u64::from(self.first_data_block);
        for g in 0..self.block_groups {
            let group = GroupNumber(g);
            let in_group = self.blocks_in_group(group);
            let overhead = self.group_metadata_overhead(group);
            if in_group <= overhead {
                return Err(BuildError::Config(format!(
                    "group {g} holds {in_group} blocks but needs {overhead} for metadata; \
                     the target length is below the minimum viable layout"
                )));
            }
            metadata_total += u64::from(overhead);
        }

        // Journal, root directory, lost+found, and their extent spares.
        let baseline = u64::from(self.journal_blocks) + 8;
        if metadata_total + baseline > u64::from(self.total_blocks) {
            return Err(BuildError::Config(format!(
                "{} blocks of metadata plus {baseline} baseline blocks exceed \
                 the {} block target",
                metadata_total, self.total_blocks
            )));
        }
        Ok(())
    }

    /// First block of a group.
    #[must_use]
    pub fn group_start(&self, group: GroupNumber) -> BlockNumber {
        gfs_types::group_first_block(group, self.blocks_per_group, self.first_data_block)
    }

    /// Blocks in a group (the last group may be short).
    #[must_use]
    pub fn blocks_in_group(&self, group: GroupNumber) -> u32 {
        let start = self.group_start(group).0;
        (self.total_blocks - start).min(self.blocks_per_group)
    }

    /// Whether a group starts with a superblock + descriptor-table copy
    /// (sparse-super policy: groups 0, 1, and powers of 3, 5, 7).
    #[must_use]
    pub fn has_super_copy(&self, group: GroupNumber) -> bool {
        fn is_power_of(mut n: u32, base: u32) -> bool {
            while n > 1 && n % base == 0 {
                n /= base;
            }
            n == 1
        }
        let g = group.0;
        g <= 1 || is_power_of(g, 3) || is_power_of(g, 5) || is_power_of(g, 7)
    }

    /// Backup superblock groups, in ascending order (group 0 excluded).
    #[must_use]
    pub fn backup_groups(&self) -> Vec<GroupNumber> {
        (1..self.block_groups)
            .map(GroupNumber)
            .filter(|g| self.has_super_copy(*g))
            .collect()
    }

    /// Metadata blocks at the start of a group: the optional superblock +
    /// GDT + reserved-GDT copy, both bitmaps, and the inode table.
    #[must_use]
    pub fn group_metadata_overhead(&self, group: GroupNumber) -> u32 {
        let copy = if self.has_super_copy(group) {
            1 + self.gdt_blocks + self.reserved_gdt_blocks
        } else {
            0
        };
        copy + 2 + self.inode_table_blocks
    }

    /// Block bitmap location for a group.
    #[must_use]
    pub fn block_bitmap_block(&self, group: GroupNumber) -> BlockNumber {
        let copy = if self.has_super_copy(group) {
            1 + self.gdt_blocks + self.reserved_gdt_blocks
        } else {
            0
        };
        BlockNumber(self.group_start(group).0 + copy)
    }

    /// Inode bitmap location for a group.
    #[must_use]
    pub fn inode_bitmap_block(&self, group: GroupNumber) -> BlockNumber {
        BlockNumber(self.block_bitmap_block(group).0 + 1)
    }

    /// Inode table location for a group.
    #[must_use]
    pub fn inode_table_block(&self, group: GroupNumber) -> BlockNumber {
        BlockNumber(self.block_bitmap_block(group).0 + 2)
    }

    /// The reserved-GDT block runs across all superblock-copy groups;
    /// the regions the resize inode's extent tree covers.
    #[must_use]
    pub fn reserved_gdt_regions(&self) -> RegionList {
        let mut regions = RegionList::new();
        if self.reserved_gdt_blocks == 0 {
            return regions;
        }
        for g in 0..self.block_groups {
            let group = GroupNumber(g);
            if self.has_super_copy(group) {
                let start = self.group_start(group).0 + 1 + self.gdt_blocks;
                regions.insert(Region::new(start, self.reserved_gdt_blocks));
            }
        }
        regions
    }

    /// Total free blocks a fresh image of this layout would report if
    /// nothing but metadata were allocated (used by tests as a baseline).
    #[must_use]
    pub fn metadata_blocks(&self) -> u64 {
        let mut total = u64::from(self.first_data_block);
        for g in 0..self.block_groups {
            total += u64::from(self.group_metadata_overhead(GroupNumber(g)));
        }
        total
    }
}

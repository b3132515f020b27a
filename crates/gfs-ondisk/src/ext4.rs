#![allow(clippy::module_name_repetitions)]

use gfs_types::{
    BlockNumber, BlockSize, EXT4_EXTENT_MAGIC, EXT4_SUPER_MAGIC, EXT4_SUPERBLOCK_SIZE,
    GroupNumber, InodeNumber, ParseError, put_bytes, put_le_u16, put_le_u32, read_fixed,
    read_le_u16, read_le_u32,
};
use serde::{Deserialize, Serialize};

/// Size of an extent header (`ext4_extent_header`).
pub const EXTENT_HEADER_SIZE: usize = 12;
/// Size of an extent leaf or index record.
pub const EXTENT_RECORD_SIZE: usize = 12;
/// Leaf slots usable in the inode's 60-byte `i_block` root (`eh_max`).
pub const INLINE_EXTENT_SLOTS: usize = 3;

// ── Feature flags ───────────────────────────────────────────────────────────

/// ext4 compatible feature flags (`s_feature_compat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatFeatures(pub u32);

impl CompatFeatures {
    pub const HAS_JOURNAL: Self = Self(0x0004);
    pub const EXT_ATTR: Self = Self(0x0008);
    pub const RESIZE_INODE: Self = Self(0x0010);
    pub const DIR_INDEX: Self = Self(0x0020);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0004, "HAS_JOURNAL"),
        (0x0008, "EXT_ATTR"),
        (0x0010, "RESIZE_INODE"),
        (0x0020, "DIR_INDEX"),
    ];

    /// Flags every built image carries, before the journal decision.
    pub const BASE: Self =
        Self(Self::EXT_ATTR.0 | Self::RESIZE_INODE.0 | Self::DIR_INDEX.0);

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    /// Return names of all set flags.
    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }
}

impl std::fmt::Display for CompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// ext4 incompatible feature flags (`s_feature_incompat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatFeatures(pub u32);

impl IncompatFeatures {
    pub const FILETYPE: Self = Self(0x0002);
    pub const EXTENTS: Self = Self(0x0040);

    const KNOWN: &[(u32, &'static str)] = &[(0x0002, "FILETYPE"), (0x0040, "EXTENTS")];

    /// Flags every built image carries.
    pub const BASE: Self = Self(Self::FILETYPE.0 | Self::EXTENTS.0);

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }
}

impl std::fmt::Display for IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// ext4 read-only compatible feature flags (`s_feature_ro_compat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoCompatFeatures(pub u32);

impl RoCompatFeatures {
    pub const SPARSE_SUPER: Self = Self(0x0001);
    pub const LARGE_FILE: Self = Self(0x0002);
    pub const GDT_CSUM: Self = Self(0x0010);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "SPARSE_SUPER"),
        (0x0002, "LARGE_FILE"),
        (0x0010, "GDT_CSUM"),
    ];

    /// Flags every built image carries.
    pub const BASE: Self =
        Self(Self::SPARSE_SUPER.0 | Self::LARGE_FILE.0 | Self::GDT_CSUM.0);

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }
}

impl std::fmt::Display for RoCompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Collect names of all set bits from a `(bit, name)` table.
fn describe_flags(bits: u32, known: &[(u32, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Format a bitmask as a pipe-separated list of flag names.
///
/// Example output: `FILETYPE|EXTENTS` or `(none)` when zero. Unknown bits
/// are appended as hex.
fn format_flags(
    f: &mut std::fmt::Formatter<'_>,
    bits: u32,
    known: &[(u32, &'static str)],
) -> std::fmt::Result {
    if bits == 0 {
        return f.write_str("(none)");
    }
    let mut first = true;
    let mut remaining = bits;
    for &(bit, name) in known {
        if remaining & bit != 0 {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            remaining &= !bit;
            first = false;
        }
    }
    if remaining != 0 {
        if !first {
            f.write_str("|")?;
        }
        write!(f, "0x{remaining:X}")?;
    }
    Ok(())
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Builder-side view of the ext4 superblock.
///
/// Mirrors the build parameters plus the computed totals; `encode` produces
/// the 1024-byte on-disk record. `block_group_nr` distinguishes the primary
/// copy (0) from sparse-super backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub mkfs_time: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub reserved_gdt_blocks: u16,
    pub journal_inum: u32,
    pub feature_compat: CompatFeatures,
    pub feature_incompat: IncompatFeatures,
    pub feature_ro_compat: RoCompatFeatures,
    pub uuid: [u8; 16],
    pub volume_name: String,
}

/// Filesystem state: cleanly unmounted.
const STATE_VALID_FS: u16 = 1;
/// On-error behaviour: continue.
const ERRORS_CONTINUE: u16 = 1;
/// Creator OS: Linux.
const OS_LINUX: u32 = 0;
/// Revision with dynamic inode sizes.
const REV_DYNAMIC: u32 = 1;
/// Default hash version: half-MD4.
const HASH_HALF_MD4: u8 = 1;

impl Superblock {
    /// Encode the 1024-byte on-disk superblock record.
    #[must_use]
    pub fn encode(&self) -> [u8; EXT4_SUPERBLOCK_SIZE] {
        let mut sb = [0_u8; EXT4_SUPERBLOCK_SIZE];
        let log_block_size = self.block_size.trailing_zeros() - 10;

        put_le_u32(&mut sb, 0x00, self.inodes_count);
        put_le_u32(&mut sb, 0x04, self.blocks_count);
        put_le_u32(&mut sb, 0x08, self.reserved_blocks_count);
        put_le_u32(&mut sb, 0x0C, self.free_blocks_count);
        put_le_u32(&mut sb, 0x10, self.free_inodes_count);
        put_le_u32(&mut sb, 0x14, self.first_data_block);
        put_le_u32(&mut sb, 0x18, log_block_size);
        put_le_u32(&mut sb, 0x1C, log_block_size); // cluster size == block size
        put_le_u32(&mut sb, 0x20, self.blocks_per_group);
        put_le_u32(&mut sb, 0x24, self.blocks_per_group); // clusters per group
        put_le_u32(&mut sb, 0x28, self.inodes_per_group);
        put_le_u32(&mut sb, 0x2C, 0); // s_mtime: never mounted
        put_le_u32(&mut sb, 0x30, self.mkfs_time); // s_wtime
        put_le_u16(&mut sb, 0x34, 0); // s_mnt_count
        put_le_u16(&mut sb, 0x36, 0xFFFF); // s_max_mnt_count: disabled
        put_le_u16(&mut sb, 0x38, EXT4_SUPER_MAGIC);
        put_le_u16(&mut sb, 0x3A, STATE_VALID_FS);
        put_le_u16(&mut sb, 0x3C, ERRORS_CONTINUE);
        put_le_u16(&mut sb, 0x3E, 0); // s_minor_rev_level
        put_le_u32(&mut sb, 0x40, self.mkfs_time); // s_lastcheck
        put_le_u32(&mut sb, 0x44, 0); // s_checkinterval
        put_le_u32(&mut sb, 0x48, OS_LINUX);
        put_le_u32(&mut sb, 0x4C, REV_DYNAMIC);
        put_le_u16(&mut sb, 0x50, 0); // s_def_resuid
        put_le_u16(&mut sb, 0x52, 0); // s_def_resgid
        put_le_u32(&mut sb, 0x54, InodeNumber::FIRST_NON_RESERVED.0);
        put_le_u16(&mut sb, 0x58, self.inode_size);
        put_le_u16(&mut sb, 0x5A, self.block_group_nr);
        put_le_u32(&mut sb, 0x5C, self.feature_compat.bits());
        put_le_u32(&mut sb, 0x60, self.feature_incompat.bits());
        put_le_u32(&mut sb, 0x64, self.feature_ro_compat.bits());
        put_bytes(&mut sb, 0x68, &self.uuid);

        let name = self.volume_name.as_bytes();
        put_bytes(&mut sb, 0x78, &name[..name.len().min(16)]);

        put_le_u16(&mut sb, 0xCE, self.reserved_gdt_blocks);
        put_le_u32(&mut sb, 0xE0, self.journal_inum);
        sb[0xFC] = HASH_HALF_MD4;
        put_le_u32(&mut sb, 0x108, self.mkfs_time); // s_mkfs_time

        sb
    }
}

/// Decode a 1024-byte superblock region back into the builder-side view.
///
/// Verification aid for the encoder; rejects a wrong magic or an invalid
/// block-size shift but performs no broader validation.
pub fn parse_superblock_region(region: &[u8]) -> Result<Superblock, ParseError> {
    if region.len() < EXT4_SUPERBLOCK_SIZE {
        return Err(ParseError::InsufficientData {
            needed: EXT4_SUPERBLOCK_SIZE,
            offset: 0,
            actual: region.len(),
        });
    }

    let magic = read_le_u16(region, 0x38)?;
    if magic != EXT4_SUPER_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(EXT4_SUPER_MAGIC),
            actual: u64::from(magic),
        });
    }

    let log_block_size = read_le_u32(region, 0x18)?;
    let shift = 10_u32
        .checked_add(log_block_size)
        .filter(|s| *s < 32)
        .ok_or(ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "invalid shift",
        })?;
    let block_size = 1_u32 << shift;

    let volume_name_raw = read_fixed::<16>(region, 0x78)?;
    let end = volume_name_raw
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(volume_name_raw.len());
    let volume_name = String::from_utf8_lossy(&volume_name_raw[..end]).into_owned();

    Ok(Superblock {
        inodes_count: read_le_u32(region, 0x00)?,
        blocks_count: read_le_u32(region, 0x04)?,
        reserved_blocks_count: read_le_u32(region, 0x08)?,
        free_blocks_count: read_le_u32(region, 0x0C)?,
        free_inodes_count: read_le_u32(region, 0x10)?,
        first_data_block: read_le_u32(region, 0x14)?,
        block_size,
        blocks_per_group: read_le_u32(region, 0x20)?,
        inodes_per_group: read_le_u32(region, 0x28)?,
        mkfs_time: read_le_u32(region, 0x108)?,
        inode_size: read_le_u16(region, 0x58)?,
        block_group_nr: read_le_u16(region, 0x5A)?,
        reserved_gdt_blocks: read_le_u16(region, 0xCE)?,
        journal_inum: read_le_u32(region, 0xE0)?,
        feature_compat: CompatFeatures(read_le_u32(region, 0x5C)?),
        feature_incompat: IncompatFeatures(read_le_u32(region, 0x60)?),
        feature_ro_compat: RoCompatFeatures(read_le_u32(region, 0x64)?),
        uuid: read_fixed::<16>(region, 0x68)?,
        volume_name,
    })
}

// ── Group descriptor ────────────────────────────────────────────────────────

/// Offset of `bg_checksum` within a group descriptor.
const GD_CHECKSUM_OFFSET: usize = 0x1E;

/// Builder-side view of a 32-byte block group descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDesc {
    pub block_bitmap: BlockNumber,
    pub inode_bitmap: BlockNumber,
    pub inode_table: BlockNumber,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pub itable_unused: u16,
    pub flags: u16,
    pub checksum: u16,
}

impl GroupDesc {
    /// Encode the 32-byte on-disk descriptor record.
    #[must_use]
    pub fn encode(&self) -> [u8; 32] {
        let mut gd = [0_u8; 32];
        put_le_u32(&mut gd, 0x00, self.block_bitmap.0);
        put_le_u32(&mut gd, 0x04, self.inode_bitmap.0);
        put_le_u32(&mut gd, 0x08, self.inode_table.0);
        put_le_u16(&mut gd, 0x0C, self.free_blocks_count);
        put_le_u16(&mut gd, 0x0E, self.free_inodes_count);
        put_le_u16(&mut gd, 0x10, self.used_dirs_count);
        put_le_u16(&mut gd, 0x12, self.flags);
        put_le_u16(&mut gd, 0x1C, self.itable_unused);
        put_le_u16(&mut gd, GD_CHECKSUM_OFFSET, self.checksum);
        gd
    }

    /// Decode a 32-byte descriptor record (verification aid).
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 32 {
            return Err(ParseError::InsufficientData {
                needed: 32,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            block_bitmap: BlockNumber(read_le_u32(bytes, 0x00)?),
            inode_bitmap: BlockNumber(read_le_u32(bytes, 0x04)?),
            inode_table: BlockNumber(read_le_u32(bytes, 0x08)?),
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
            flags: read_le_u16(bytes, 0x12)?,
            itable_unused: read_le_u16(bytes, 0x1C)?,
            checksum: read_le_u16(bytes, GD_CHECKSUM_OFFSET)?,
        })
    }
}

/// Compute a group descriptor's 16-bit checksum.
///
/// crc32c over (seed, little-endian group number, descriptor with the
/// checksum field zeroed), truncated to 16 bits. The seed is
/// `crc32c(~0, uuid)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // checksum is the low 16 bits
pub fn group_desc_checksum(csum_seed: u32, group: GroupNumber, raw_gd: &[u8; 32]) -> u16 {
    let le_group = group.0.to_le_bytes();
    let mut csum = crc32c::crc32c_append(csum_seed, &le_group);
    csum = crc32c::crc32c_append(csum, &raw_gd[..GD_CHECKSUM_OFFSET]);
    csum = crc32c::crc32c_append(csum, &[0, 0]);
    // Nothing follows the checksum field in a 32-byte descriptor.
    (csum & 0xFFFF) as u16
}

// ── Inode record ────────────────────────────────────────────────────────────

/// Builder-side view of an ext4 inode.
///
/// `block_data` is the raw 60-byte `i_block` area — for this builder always
/// an extent tree root. `blocks` counts 512-byte sectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub size: u64,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    pub generation: u32,
    #[serde(with = "serde_block_data")]
    pub block_data: [u8; 60],
}

/// serde glue for the 60-byte `block_data` array — `serde` only provides
/// `Serialize`/`Deserialize` impls for arrays up to length 32, so the derive
/// on [`InodeRecord`] needs a helper for this field.
mod serde_block_data {
    use serde::de::{Error as _, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &[u8; 60], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 60], D::Error> {
        struct ArrayVisitor;

        impl<'de> Visitor<'de> for ArrayVisitor {
            type Value = [u8; 60];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("60 bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<[u8; 60], E> {
                v.try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<[u8; 60], A::Error> {
                let mut out = [0u8; 60];
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| A::Error::invalid_length(i, &self))?;
                }
                Ok(out)
            }
        }

        deserializer.deserialize_bytes(ArrayVisitor)
    }
}

impl InodeRecord {
    /// An all-zero record (used for unoccupied inode-table slots the
    /// builder still has to stamp, e.g. the reserved boot-loader range).
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            links_count: 0,
            blocks: 0,
            flags: 0,
            generation: 0,
            block_data: [0_u8; 60],
        }
    }

    /// Encode into an inode-table slot of `inode_size` bytes.
    ///
    /// `buf.len()` must equal the filesystem's inode size (>= 128). When
    /// the slot is larger than the 128-byte base record, `i_extra_isize`
    /// and the creation time are stamped into the extended area.
    #[allow(clippy::cast_possible_truncation)] // lo/hi splits are intentional
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<(), ParseError> {
        if buf.len() < 128 {
            return Err(ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: buf.len(),
            });
        }
        buf.fill(0);

        put_le_u16(buf, 0x00, self.mode);
        put_le_u16(buf, 0x02, self.uid);
        put_le_u32(buf, 0x04, self.size as u32);
        put_le_u32(buf, 0x08, self.atime);
        put_le_u32(buf, 0x0C, self.ctime);
        put_le_u32(buf, 0x10, self.mtime);
        put_le_u32(buf, 0x14, 0); // i_dtime: never deleted
        put_le_u16(buf, 0x18, self.gid);
        put_le_u16(buf, 0x1A, self.links_count);
        put_le_u32(buf, 0x1C, self.blocks);
        put_le_u32(buf, 0x20, self.flags);
        put_bytes(buf, 0x28, &self.block_data);
        put_le_u32(buf, 0x64, self.generation);
        put_le_u32(buf, 0x6C, (self.size >> 32) as u32);

        if buf.len() >= 160 {
            // i_extra_isize covers the extended timestamps through crtime.
            put_le_u16(buf, 0x80, 32);
            put_le_u32(buf, 0x90, self.ctime); // i_crtime
        }
        Ok(())
    }
}

// ── Extent records ──────────────────────────────────────────────────────────

/// Extent header (`ext4_extent_header`, 12 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentHeader {
    pub entries: u16,
    pub max_entries: u16,
    pub depth: u16,
    pub generation: u32,
}

impl ExtentHeader {
    /// Encode into `buf` at `offset`.
    pub fn encode_into(&self, buf: &mut [u8], offset: usize) {
        put_le_u16(buf, offset, EXT4_EXTENT_MAGIC);
        put_le_u16(buf, offset + 2, self.entries);
        put_le_u16(buf, offset + 4, self.max_entries);
        put_le_u16(buf, offset + 6, self.depth);
        put_le_u32(buf, offset + 8, self.generation);
    }

    /// Leaf records that fit one extent block of `block_size` bytes.
    #[must_use]
    pub fn max_entries_per_block(block_size: BlockSize) -> usize {
        (block_size.get() as usize - EXTENT_HEADER_SIZE) / EXTENT_RECORD_SIZE
    }
}

/// Leaf extent: a run of logical blocks mapped to physical blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentLeaf {
    pub logical_block: u32,
    pub len: u16,
    pub physical_start: BlockNumber,
}

impl ExtentLeaf {
    pub fn encode_into(&self, buf: &mut [u8], offset: usize) {
        put_le_u32(buf, offset, self.logical_block);
        put_le_u16(buf, offset + 4, self.len);
        put_le_u16(buf, offset + 6, 0); // ee_start_hi: 32-bit block space
        put_le_u32(buf, offset + 8, self.physical_start.0);
    }
}

/// Index record pointing at a child extent block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentIndex {
    pub logical_block: u32,
    pub leaf_block: BlockNumber,
}

impl ExtentIndex {
    pub fn encode_into(&self, buf: &mut [u8], offset: usize) {
        put_le_u32(buf, offset, self.logical_block);
        put_le_u32(buf, offset + 4, self.leaf_block.0);
        put_le_u16(buf, offset + 8, 0); // ei_leaf_hi
        put_le_u16(buf, offset + 10, 0); // ei_unused
    }
}

/// Decoded view of one extent node (root or overflow block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentTreeView {
    Leaf(Vec<ExtentLeaf>),
    Index(Vec<ExtentIndex>),
}

/// Decode an extent node from raw bytes (verification aid).
pub fn parse_extent_tree(bytes: &[u8]) -> Result<(ExtentHeader, ExtentTreeView), ParseError> {
    if bytes.len() < EXTENT_HEADER_SIZE {
        return Err(ParseError::InsufficientData {
            needed: EXTENT_HEADER_SIZE,
            offset: 0,
            actual: bytes.len(),
        });
    }

    let magic = read_le_u16(bytes, 0x00)?;
    if magic != EXT4_EXTENT_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(EXT4_EXTENT_MAGIC),
            actual: u64::from(magic),
        });
    }

    let header = ExtentHeader {
        entries: read_le_u16(bytes, 0x02)?,
        max_entries: read_le_u16(bytes, 0x04)?,
        depth: read_le_u16(bytes, 0x06)?,
        generation: read_le_u32(bytes, 0x08)?,
    };

    if header.entries > header.max_entries {
        return Err(ParseError::InvalidField {
            field: "eh_entries",
            reason: "entries exceed max",
        });
    }

    let entries_len = usize::from(header.entries);
    let needed = EXTENT_HEADER_SIZE + entries_len * EXTENT_RECORD_SIZE;
    if bytes.len() < needed {
        return Err(ParseError::InsufficientData {
            needed,
            offset: EXTENT_HEADER_SIZE,
            actual: bytes.len().saturating_sub(EXTENT_HEADER_SIZE),
        });
    }

    if header.depth == 0 {
        let mut extents = Vec::with_capacity(entries_len);
        for idx in 0..entries_len {
            let base = EXTENT_HEADER_SIZE + idx * EXTENT_RECORD_SIZE;
            extents.push(ExtentLeaf {
                logical_block: read_le_u32(bytes, base)?,
                len: read_le_u16(bytes, base + 4)?,
                physical_start: BlockNumber(read_le_u32(bytes, base + 8)?),
            });
        }
        Ok((header, ExtentTreeView::Leaf(extents)))
    } else {
        let mut indexes = Vec::with_capacity(entries_len);
        for idx in 0..entries_len {
            let base = EXTENT_HEADER_SIZE + idx * EXTENT_RECORD_SIZE;
            indexes.push(ExtentIndex {
                logical_block: read_le_u32(bytes, base)?,
                leaf_block: BlockNumber(read_le_u32(bytes, base + 4)?),
            });
        }
        Ok((header, ExtentTreeView::Index(indexes)))
    }
}

// ── Directory entry file types ──────────────────────────────────────────────

/// ext4 file type constants for directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DirFileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl DirFileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

#![forbid(unsafe_code)]
//! ext4 on-disk record encoders.
//!
//! Fixed-layout encoders for the structures the image builder emits:
//! superblock, group descriptor, inode record, extent header/leaf/index
//! records, and the jbd2 journal superblock. Each encoder has a matching
//! decoder used by tests to verify the bytes round-trip; the decoders are
//! not a general-purpose parser.

mod ext4;
mod jbd2;

pub use ext4::{
    CompatFeatures, DirFileType, ExtentHeader, ExtentIndex, ExtentLeaf, ExtentTreeView,
    GroupDesc, IncompatFeatures, InodeRecord, RoCompatFeatures, Superblock,
    EXTENT_HEADER_SIZE, EXTENT_RECORD_SIZE, INLINE_EXTENT_SLOTS, group_desc_checksum,
    parse_extent_tree, parse_superblock_region,
};
pub use jbd2::JournalSuperblock;

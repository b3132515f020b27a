#![forbid(unsafe_code)]
//! Extent tree construction.
//!
//! Turns an allocation's region list into the on-disk extent tree for one
//! inode: either an inline root (`depth = 0`, up to three leaf records in
//! the inode's 60-byte `i_block` area) or a single-overflow-block tree
//! (`depth = 1`, the root holding one index record pointing at an
//! out-of-band block that carries all the leaves). Trees deeper than one
//! level are an explicit unsupported case — fragmentation past one overflow
//! block fails with `TooManyExtents`.

use gfs_alloc::{Allocation, RegionAllocator, RegionList};
use gfs_error::{BuildError, Result};
use gfs_ondisk::{
    EXTENT_HEADER_SIZE, EXTENT_RECORD_SIZE, ExtentHeader, ExtentIndex, ExtentLeaf,
    INLINE_EXTENT_SLOTS,
};
use gfs_types::{BlockNumber, BlockSize, SECTOR_SIZE};

/// Longest initialized extent a single leaf record can describe.
const MAX_LEAF_BLOCKS: u32 = 1 << 15;

/// A built extent tree plus the inode accounting it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentTree {
    /// Content of the inode's 60-byte `i_block` area.
    pub root: [u8; 60],
    /// The overflow extent block, when the tree has depth 1.
    pub overflow: Option<OverflowBlock>,
    /// Data blocks addressed through the tree's logical space.
    pub logical_blocks: u32,
    /// `i_blocks` value: 512-byte sectors, overflow block included.
    pub sectors: u32,
    leaves: Vec<ExtentLeaf>,
}

/// An out-of-band extent block: its location and encoded content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowBlock {
    pub block: BlockNumber,
    pub bytes: Vec<u8>,
}

impl ExtentTree {
    /// Walk the leaves in logical order back into a region list.
    ///
    /// The result carries the same physical block assignments and total
    /// block count that went in (adjacent split leaves re-merge).
    #[must_use]
    pub fn flatten(&self) -> RegionList {
        let mut list = RegionList::new();
        for leaf in &self.leaves {
            list.insert(gfs_alloc::Region {
                start: leaf.physical_start,
                len: u32::from(leaf.len),
            });
        }
        list
    }

    #[must_use]
    pub fn leaves(&self) -> &[ExtentLeaf] {
        &self.leaves
    }
}

/// Build the extent tree for a freshly allocated file.
///
/// `allocation` must hold one spare block beyond the file's data blocks
/// (allocate `blocks + 1`); the spare becomes the overflow block when the
/// data fragments past the inline capacity, and is returned to the pool
/// otherwise.
pub fn build(
    byte_len: u64,
    allocation: &mut Allocation,
    allocator: &mut RegionAllocator,
    block_size: BlockSize,
) -> Result<ExtentTree> {
    let data_blocks = block_size.bytes_to_blocks_ceil(byte_len);
    if allocation.data.total_blocks() != data_blocks + 1 {
        return Err(BuildError::Inconsistency(format!(
            "extent build expects {} blocks (data + spare), allocation holds {}",
            data_blocks + 1,
            allocation.data.total_blocks()
        )));
    }

    // Peek at the data-only shape: the spare is the trailing block and must
    // not count toward the inline-vs-overflow decision.
    let leaves = split_leaves(without_tail(&allocation.data, 1));
    if leaves.len() <= INLINE_EXTENT_SLOTS {
        allocator.reduce(allocation, 1);
        assemble(byte_len, leaves, None, block_size)
    } else {
        let oob = allocator.reserve_out_of_band(allocation, 1);
        let index_block = oob.as_slice()[0].start;
        assemble(byte_len, leaves, Some(index_block), block_size)
    }
}

/// Build an extent tree over fixed, already-reserved regions.
///
/// Used for inodes whose backing blocks are laid out by the layout
/// calculator rather than the allocator (the resize inode over the
/// reserved-GDT blocks). The out-of-band block, when the regions fragment
/// past the inline capacity, is allocated from the pool.
pub fn build_over_regions(
    byte_len: u64,
    regions: &RegionList,
    allocator: &mut RegionAllocator,
    block_size: BlockSize,
) -> Result<ExtentTree> {
    let leaves = split_leaves(regions.iter().copied().collect());
    if leaves.len() <= INLINE_EXTENT_SLOTS {
        assemble(byte_len, leaves, None, block_size)
    } else {
        let oob = allocator.allocate(1)?;
        let index_block = oob.data.as_slice()[0].start;
        assemble(byte_len, leaves, Some(index_block), block_size)
    }
}

/// Data regions minus the trailing `tail` blocks.
fn without_tail(data: &RegionList, tail: u32) -> Vec<gfs_alloc::Region> {
    let mut regions: Vec<gfs_alloc::Region> = data.iter().copied().collect();
    let mut remaining = tail;
    while remaining > 0 {
        let Some(last) = regions.last_mut() else { break };
        if last.len <= remaining {
            remaining -= last.len;
            regions.pop();
        } else {
            last.len -= remaining;
            remaining = 0;
        }
    }
    regions
}

/// Split regions into leaf records, assigning logical offsets and capping
/// each leaf at the format's maximum initialized length.
fn split_leaves(regions: Vec<gfs_alloc::Region>) -> Vec<ExtentLeaf> {
    let mut leaves = Vec::new();
    let mut logical = 0_u32;
    for region in regions {
        let mut offset = 0_u32;
        while offset < region.len {
            let len = (region.len - offset).min(MAX_LEAF_BLOCKS);
            leaves.push(ExtentLeaf {
                logical_block: logical,
                #[allow(clippy::cast_possible_truncation)] // capped at 1 << 15
                len: len as u16,
                physical_start: BlockNumber(region.start.0 + offset),
            });
            logical += len;
            offset += len;
        }
    }
    leaves
}

/// Encode the root (and overflow block, if any) from the leaf list.
fn assemble(
    byte_len: u64,
    leaves: Vec<ExtentLeaf>,
    index_block: Option<BlockNumber>,
    block_size: BlockSize,
) -> Result<ExtentTree> {
    let logical_blocks: u32 = leaves.iter().map(|l| u32::from(l.len)).sum();
    let sectors_per_block = block_size.get() / SECTOR_SIZE;
    let mut root = [0_u8; 60];

    let tree = match index_block {
        None => {
            debug_assert!(leaves.len() <= INLINE_EXTENT_SLOTS);
            let header = ExtentHeader {
                #[allow(clippy::cast_possible_truncation)] // at most 3
                entries: leaves.len() as u16,
                max_entries: INLINE_EXTENT_SLOTS as u16,
                depth: 0,
                generation: 0,
            };
            header.encode_into(&mut root, 0);
            for (idx, leaf) in leaves.iter().enumerate() {
                leaf.encode_into(&mut root, EXTENT_HEADER_SIZE + idx * EXTENT_RECORD_SIZE);
            }
            ExtentTree {
                root,
                overflow: None,
                logical_blocks,
                sectors: logical_blocks * sectors_per_block,
                leaves,
            }
        }
        Some(block) => {
            let max = ExtentHeader::max_entries_per_block(block_size);
            if leaves.len() > max {
                return Err(BuildError::TooManyExtents {
                    extents: leaves.len(),
                    max,
                });
            }

            let mut bytes = vec![0_u8; block_size.get() as usize];
            let header = ExtentHeader {
                #[allow(clippy::cast_possible_truncation)] // bounded by max above
                entries: leaves.len() as u16,
                #[allow(clippy::cast_possible_truncation)] // (64K - 12) / 12 fits u16
                max_entries: max as u16,
                depth: 0,
                generation: 0,
            };
            header.encode_into(&mut bytes, 0);
            for (idx, leaf) in leaves.iter().enumerate() {
                leaf.encode_into(&mut bytes, EXTENT_HEADER_SIZE + idx * EXTENT_RECORD_SIZE);
            }

            let root_header = ExtentHeader {
                entries: 1,
                max_entries: INLINE_EXTENT_SLOTS as u16,
                depth: 1,
                generation: 0,
            };
            root_header.encode_into(&mut root, 0);
            ExtentIndex {
                logical_block: 0,
                leaf_block: block,
            }
            .encode_into(&mut root, EXTENT_HEADER_SIZE);

            // The overflow block consumes device space even though it holds
            // no file data: add it to the block count before converting to
            // sectors.
            ExtentTree {
                root,
                overflow: Some(OverflowBlock { block, bytes }),
                logical_blocks,
                sectors: (logical_blocks + 1) * sectors_per_block,
                leaves,
            }
        }
    };

    debug_assert!(u64::from(tree.logical_blocks) * u64::from(block_size.get()) >= byte_len);
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gfs_alloc::Region;
    use gfs_ondisk::{ExtentTreeView, parse_extent_tree};

    const BS: u32 = 4096;

    fn bs() -> BlockSize {
        BlockSize::new(BS).unwrap()
    }

    fn byte_len(blocks: u32) -> u64 {
        u64::from(blocks) * u64::from(BS)
    }

    #[test]
    fn inline_tree_for_contiguous_file() {
        let mut allocator = RegionAllocator::new(1000);
        let mut alloc = allocator.allocate(11).unwrap();
        let tree = build(byte_len(10), &mut alloc, &mut allocator, bs()).unwrap();

        assert!(tree.overflow.is_none());
        assert_eq!(tree.logical_blocks, 10);
        assert_eq!(tree.sectors, 10 * 8);
        // The spare block went back to the pool.
        assert_eq!(allocator.free_blocks(), 990);
        assert_eq!(alloc.data.total_blocks(), 10);
        assert!(alloc.oob.is_empty());

        let (header, view) = parse_extent_tree(&tree.root).unwrap();
        assert_eq!(header.depth, 0);
        assert_eq!(header.entries, 1);
        assert_eq!(header.max_entries, 3);
        let ExtentTreeView::Leaf(leaves) = view else {
            panic!("expected leaf root");
        };
        assert_eq!(leaves[0].logical_block, 0);
        assert_eq!(leaves[0].len, 10);
    }

    #[test]
    fn inline_tree_holds_three_fragments() {
        // Small pool with two holes: no single free run fits 31 blocks, so
        // the request fragments into exactly three runs.
        let mut allocator = RegionAllocator::new(40);
        allocator.mark_used(Region::new(10, 2)).unwrap();
        allocator.mark_used(Region::new(22, 2)).unwrap();
        let mut alloc = allocator.allocate(31).unwrap();
        assert_eq!(alloc.data.len(), 3);

        let tree = build(byte_len(30), &mut alloc, &mut allocator, bs()).unwrap();
        assert!(tree.overflow.is_none());
        assert_eq!(tree.logical_blocks, 30);
        assert_eq!(tree.flatten().total_blocks(), 30);
    }

    #[test]
    fn overflow_tree_for_four_fragments() {
        // Largest free run is 397 blocks, so 401 blocks fragment across
        // four disjoint runs and force more than three leaves.
        let mut allocator = RegionAllocator::new(700);
        allocator.mark_used(Region::new(100, 1)).unwrap();
        allocator.mark_used(Region::new(201, 1)).unwrap();
        allocator.mark_used(Region::new(302, 1)).unwrap();
        let mut alloc = allocator.allocate(400 + 1).unwrap();
        assert_eq!(alloc.data.len(), 4);

        let free_before = allocator.free_blocks();
        let tree = build(byte_len(400), &mut alloc, &mut allocator, bs()).unwrap();

        // The conservative spare became the out-of-band index block; the
        // pool was not touched again.
        assert_eq!(allocator.free_blocks(), free_before);
        assert_eq!(alloc.oob.total_blocks(), 1);
        assert_eq!(alloc.data.total_blocks(), 400);

        let overflow = tree.overflow.as_ref().expect("depth-1 tree");
        assert_eq!(tree.logical_blocks, 400);
        // Sector count includes the overflow block.
        assert_eq!(tree.sectors, (400 + 1) * 8);

        // Root is a single index record pointing at the overflow block.
        let (root_header, root_view) = parse_extent_tree(&tree.root).unwrap();
        assert_eq!(root_header.depth, 1);
        assert_eq!(root_header.entries, 1);
        let ExtentTreeView::Index(indexes) = root_view else {
            panic!("expected index root");
        };
        assert_eq!(indexes[0].leaf_block, overflow.block);
        assert_eq!(indexes[0].logical_block, 0);

        // The overflow block holds all leaves, sorted with no logical gaps.
        let (leaf_header, leaf_view) = parse_extent_tree(&overflow.bytes).unwrap();
        assert_eq!(leaf_header.depth, 0);
        assert_eq!(usize::from(leaf_header.max_entries), 340);
        let ExtentTreeView::Leaf(leaves) = leaf_view else {
            panic!("expected leaf node");
        };
        assert_eq!(leaves.len(), usize::from(leaf_header.entries));
        let mut expect_logical = 0_u32;
        for leaf in &leaves {
            assert_eq!(leaf.logical_block, expect_logical);
            expect_logical += u32::from(leaf.len);
        }
        assert_eq!(expect_logical, 400);
    }

    #[test]
    fn flatten_round_trips_fragmented_allocation() {
        // No free run covers 501 blocks: the allocation spans five runs.
        let mut allocator = RegionAllocator::new(600);
        allocator.mark_used(Region::new(50, 1)).unwrap();
        allocator.mark_used(Region::new(120, 1)).unwrap();
        allocator.mark_used(Region::new(260, 1)).unwrap();
        allocator.mark_used(Region::new(400, 1)).unwrap();
        let mut alloc = allocator.allocate(500 + 1).unwrap();
        let expected: Vec<Region> = without_tail(&alloc.data, 1);

        let tree = build(byte_len(500), &mut alloc, &mut allocator, bs()).unwrap();
        let flat = tree.flatten();
        assert_eq!(flat.total_blocks(), 500);
        assert_eq!(flat.as_slice(), expected.as_slice());
    }

    #[test]
    fn long_region_splits_at_max_leaf_length() {
        let mut allocator = RegionAllocator::new(100_000);
        let blocks = MAX_LEAF_BLOCKS + 100;
        let mut alloc = allocator.allocate(blocks + 1).unwrap();
        assert_eq!(alloc.data.len(), 1);

        let tree = build(byte_len(blocks), &mut alloc, &mut allocator, bs()).unwrap();
        // One contiguous run still needs two leaves, which fit inline.
        assert!(tree.overflow.is_none());
        assert_eq!(tree.leaves().len(), 2);
        assert_eq!(u32::from(tree.leaves()[0].len), MAX_LEAF_BLOCKS);
        assert_eq!(tree.leaves()[1].logical_block, MAX_LEAF_BLOCKS);
        assert_eq!(u32::from(tree.leaves()[1].len), 100);
        // Split leaves re-merge on flatten.
        assert_eq!(tree.flatten().len(), 1);
        assert_eq!(tree.flatten().total_blocks(), blocks);
    }

    #[test]
    fn too_many_extents_fails_loudly() {
        let bs1k = BlockSize::new(1024).unwrap();
        let max = ExtentHeader::max_entries_per_block(bs1k); // 84
        let count = max as u32 + 2;
        // Alternate 1 used / 1 free across the whole pool so every
        // allocated block is its own region.
        let mut allocator = RegionAllocator::new((count + 1) * 2);
        for i in 0..=count {
            allocator.mark_used(Region::new(i * 2 + 1, 1)).unwrap();
        }
        let mut alloc = allocator.allocate(count + 1).unwrap();
        assert_eq!(alloc.data.len(), (count + 1) as usize);

        let err = build(
            u64::from(count) * 1024,
            &mut alloc,
            &mut allocator,
            bs1k,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::TooManyExtents { extents, max: m } if extents == count as usize && m == max
        ));
    }

    #[test]
    fn build_over_regions_inline() {
        let mut allocator = RegionAllocator::new(1000);
        allocator.mark_used(Region::new(10, 7)).unwrap();
        let regions = RegionList::from_region(Region::new(10, 7));

        let tree =
            build_over_regions(byte_len(7), &regions, &mut allocator, bs()).unwrap();
        assert!(tree.overflow.is_none());
        assert_eq!(tree.logical_blocks, 7);
        assert_eq!(tree.sectors, 7 * 8);
    }

    #[test]
    fn build_over_regions_allocates_index_block() {
        let mut allocator = RegionAllocator::new(1000);
        let mut regions = RegionList::new();
        for i in 0..5 {
            let region = Region::new(100 + i * 10, 2);
            allocator.mark_used(region).unwrap();
            regions.insert(region);
        }
        let free_before = allocator.free_blocks();

        let tree =
            build_over_regions(byte_len(10), &regions, &mut allocator, bs()).unwrap();
        let overflow = tree.overflow.expect("five fragments need an index block");
        // The index block came out of the pool.
        assert_eq!(allocator.free_blocks(), free_before - 1);
        assert!(!allocator.is_free(overflow.block));
        assert_eq!(tree.sectors, (10 + 1) * 8);
    }

    #[test]
    fn mismatched_allocation_is_inconsistency() {
        let mut allocator = RegionAllocator::new(1000);
        let mut alloc = allocator.allocate(5).unwrap();
        let err = build(byte_len(10), &mut alloc, &mut allocator, bs()).unwrap_err();
        assert!(matches!(err, BuildError::Inconsistency(_)));
    }
}

use crate::layout::Layout;
use crate::params::BuildParams;
use gfs_alloc::{Region, RegionAllocator, bitmap_count_free, bitmap_set};
use gfs_dir::DirectoryBuilder;
use gfs_error::{BuildError, Result};
use gfs_extent::ExtentTree;
use gfs_ondisk::{
    CompatFeatures, DirFileType, GroupDesc, IncompatFeatures, InodeRecord, JournalSuperblock,
    RoCompatFeatures, Superblock, group_desc_checksum,
};
use gfs_sparse::{BackedBlockList, ChunkSink, ImageGeometry};
use gfs_types::{
    BlockNumber, EXT4_EXTENTS_FL, EXT4_SUPERBLOCK_OFFSET, EXT4_SUPERBLOCK_SIZE, GroupNumber,
    InodeNumber, S_IFDIR, S_IFREG, inode_index_in_group, inode_to_group,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Group descriptor flag: inode table/bitmap not initialized.
const GD_FLAG_INODE_UNINIT: u16 = 0x0001;

/// Reserved inode numbers 1..=10 are always marked used in the bitmap.
const RESERVED_INODES: u32 = 10;

// ── Inode lifecycle ─────────────────────────────────────────────────────────

/// Inode lifecycle states. An inode that does not exist yet is implicitly
/// `Unallocated`; creation moves it straight to `DataAllocated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InodeState {
    DataAllocated,
    PermissionsFinalized,
    Frozen,
}

#[derive(Debug)]
struct InodeSlot {
    record: InodeRecord,
    state: InodeState,
    is_dir: bool,
}

impl InodeSlot {
    fn with_data(record: InodeRecord, is_dir: bool) -> Self {
        Self {
            record,
            state: InodeState::DataAllocated,
            is_dir,
        }
    }

    fn finalize_permissions(&mut self, mode: u16, uid: u16, gid: u16, ts: u32) -> Result<()> {
        if self.state != InodeState::DataAllocated {
            return Err(BuildError::Inconsistency(format!(
                "permission finalization in state {:?}",
                self.state
            )));
        }
        self.record.mode = mode;
        self.record.uid = uid;
        self.record.gid = gid;
        self.record.atime = ts;
        self.record.ctime = ts;
        self.record.mtime = ts;
        self.state = InodeState::PermissionsFinalized;
        Ok(())
    }

    fn freeze(&mut self) -> Result<()> {
        if self.state != InodeState::PermissionsFinalized {
            return Err(BuildError::Inconsistency(format!(
                "freeze in state {:?}",
                self.state
            )));
        }
        self.state = InodeState::Frozen;
        Ok(())
    }

    fn frozen_record(&self) -> Result<&InodeRecord> {
        if self.state != InodeState::Frozen {
            return Err(BuildError::Inconsistency(format!(
                "inode encoded in state {:?}",
                self.state
            )));
        }
        Ok(&self.record)
    }
}

// ── Pending files ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FileSpec {
    name: Vec<u8>,
    data: Arc<[u8]>,
    mode: u16,
    uid: u16,
    gid: u16,
}

// ── Session ─────────────────────────────────────────────────────────────────

/// One image construction run.
///
/// Owns the parameters, layout, region allocator, backed-block list, and
/// inode counters; there is no global state. Building a second image means
/// constructing a second session.
#[derive(Debug)]
pub struct BuildSession {
    params: BuildParams,
    layout: Layout,
    allocator: RegionAllocator,
    list: BackedBlockList,
    next_ino: u32,
    inodes: BTreeMap<u32, InodeSlot>,
    pending_files: Vec<FileSpec>,
}

impl BuildSession {
    /// Derive the layout and reserve every fixed metadata region.
    pub fn new(params: BuildParams) -> Result<Self> {
        let layout = Layout::compute(&params)?;
        let mut allocator = RegionAllocator::new(layout.total_blocks);

        // The 1024-byte boot padding occupies all of block 0 at 1K blocks;
        // it belongs to no group.
        if layout.first_data_block == 1 {
            allocator.mark_used(Region::new(0, 1))?;
        }
        // Per group: (superblock + GDT + reserved GDT)? + bitmaps + inode
        // table, all contiguous at the group start.
        for g in 0..layout.block_groups {
            let group = GroupNumber(g);
            allocator.mark_used(Region::new(
                layout.group_start(group).0,
                layout.group_metadata_overhead(group),
            ))?;
        }

        debug!(
            total_blocks = layout.total_blocks,
            block_groups = layout.block_groups,
            inodes = layout.total_inodes,
            journal_blocks = layout.journal_blocks,
            free_blocks = allocator.free_blocks(),
            "session created"
        );

        let block_size = params.block_size;
        Ok(Self {
            params,
            layout,
            allocator,
            list: BackedBlockList::new(block_size),
            next_ino: InodeNumber::FIRST_NON_RESERVED.0,
            inodes: BTreeMap::new(),
            pending_files: Vec::new(),
        })
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    /// Queue a regular file under the root directory.
    pub fn add_file(
        &mut self,
        name: &[u8],
        data: impl Into<Arc<[u8]>>,
        mode: u16,
        uid: u16,
        gid: u16,
    ) -> Result<()> {
        self.pending_files.push(FileSpec {
            name: name.to_vec(),
            data: data.into(),
            mode,
            uid,
            gid,
        });
        Ok(())
    }

    fn alloc_ino(&mut self) -> Result<InodeNumber> {
        if self.next_ino > self.layout.total_inodes {
            return Err(BuildError::Inconsistency(format!(
                "inode counter exceeded the {} inode table slots",
                self.layout.total_inodes
            )));
        }
        let ino = InodeNumber(self.next_ino);
        self.next_ino += 1;
        Ok(ino)
    }

    /// Allocate blocks for `data`, build the extent tree, register the
    /// backing chunks, and create the inode in `DataAllocated` state.
    fn build_inode_with_data(
        &mut self,
        ino: InodeNumber,
        data: &Arc<[u8]>,
        is_dir: bool,
        links_count: u16,
    ) -> Result<()> {
        let byte_len = data.len() as u64;
        let blocks = self.params.block_size.bytes_to_blocks_ceil(byte_len);
        // One spare beyond the data: the extent builder's conservative
        // out-of-band reservation.
        let mut allocation = self.allocator.allocate(blocks + 1)?;
        let tree = gfs_extent::build(
            byte_len,
            &mut allocation,
            &mut self.allocator,
            self.params.block_size,
        )?;
        self.back_file_data(&tree, data)?;
        self.register_tree_overflow(&tree)?;
        self.insert_inode(ino, &tree, byte_len, is_dir, links_count)
    }

    /// Register the file bytes for every leaf of the tree.
    fn back_file_data(&mut self, tree: &ExtentTree, data: &Arc<[u8]>) -> Result<()> {
        let bs = self.params.block_size.get() as usize;
        for leaf in tree.leaves() {
            let start = leaf.logical_block as usize * bs;
            let len = usize::from(leaf.len) * bs;
            if start == 0 && len == data.len() {
                // Block-aligned single-leaf file: share the caller's buffer.
                self.list.add_shared(leaf.physical_start, Arc::clone(data))?;
            } else {
                let avail = data.len().saturating_sub(start).min(len);
                let mut buf = vec![0_u8; len];
                buf[..avail].copy_from_slice(&data[start..start + avail]);
                self.list.add_owned(leaf.physical_start, buf)?;
            }
        }
        Ok(())
    }

    fn register_tree_overflow(&mut self, tree: &ExtentTree) -> Result<()> {
        if let Some(overflow) = &tree.overflow {
            self.list.add_owned(overflow.block, overflow.bytes.clone())?;
        }
        Ok(())
    }

    fn insert_inode(
        &mut self,
        ino: InodeNumber,
        tree: &ExtentTree,
        byte_len: u64,
        is_dir: bool,
        links_count: u16,
    ) -> Result<()> {
        let mut record = InodeRecord::zeroed();
        record.size = byte_len;
        record.blocks = tree.sectors;
        record.flags = EXT4_EXTENTS_FL;
        record.links_count = links_count;
        record.block_data = tree.root;
        if self.inodes.insert(ino.0, InodeSlot::with_data(record, is_dir)).is_some() {
            return Err(BuildError::Inconsistency(format!(
                "inode {ino} allocated twice"
            )));
        }
        Ok(())
    }

    fn finalize_inode(&mut self, ino: InodeNumber, mode: u16, uid: u16, gid: u16) -> Result<()> {
        let ts = self.params.timestamp;
        let slot = self.inodes.get_mut(&ino.0).ok_or_else(|| {
            BuildError::Inconsistency(format!("inode {ino} finalized before allocation"))
        })?;
        slot.finalize_permissions(mode, uid, gid, ts)?;
        slot.freeze()
    }

    /// Run the rest of the pipeline: directory tree, journal and resize
    /// inodes, bitmaps, inode tables, descriptors, superblocks.
    ///
    /// Any failure aborts the whole build — a partial image is never
    /// emitted.
    pub fn finish(mut self) -> Result<BuiltImage> {
        let ts = self.params.timestamp;
        let bs = self.params.block_size;

        // Inode capacity up front: reserved + lost+found + files.
        let needed = RESERVED_INODES + 1 + u32::try_from(self.pending_files.len())
            .map_err(|_| BuildError::Config("too many files".to_owned()))?;
        if needed > self.layout.total_inodes {
            return Err(BuildError::Config(format!(
                "{} files need {needed} inodes, layout provides {}",
                self.pending_files.len(),
                self.layout.total_inodes
            )));
        }

        // ── Root directory, two-pass ────────────────────────────────────
        //
        // Entries are registered before their inode numbers exist and
        // back-patched once each child is allocated.
        let mut root_dir = DirectoryBuilder::new(bs);
        root_dir.add_entry(Some(InodeNumber::ROOT), b".", DirFileType::Dir)?;
        root_dir.add_entry(Some(InodeNumber::ROOT), b"..", DirFileType::Dir)?;
        let lost_found_handle = root_dir.add_entry(None, b"lost+found", DirFileType::Dir)?;
        let pending = std::mem::take(&mut self.pending_files);
        let file_handles: Vec<_> = pending
            .iter()
            .map(|spec| root_dir.add_entry(None, &spec.name, DirFileType::RegFile))
            .collect::<Result<_>>()?;

        // lost+found: first non-reserved inode, allocated inside the
        // root's numbering sequence.
        let lost_found_ino = self.alloc_ino()?;
        root_dir.set_inode(lost_found_handle, lost_found_ino);
        let mut lf_dir = DirectoryBuilder::new(bs);
        lf_dir.add_entry(Some(lost_found_ino), b".", DirFileType::Dir)?;
        lf_dir.add_entry(Some(InodeNumber::ROOT), b"..", DirFileType::Dir)?;
        let lf_data: Arc<[u8]> = lf_dir.build()?.into();
        self.build_inode_with_data(lost_found_ino, &lf_data, true, 2)?;
        self.finalize_inode(lost_found_ino, S_IFDIR | 0o700, 0, 0)?;

        // ── Regular files ───────────────────────────────────────────────
        for (spec, handle) in pending.iter().zip(file_handles) {
            let ino = self.alloc_ino()?;
            root_dir.set_inode(handle, ino);
            self.build_inode_with_data(ino, &spec.data, false, 1)?;
            self.finalize_inode(ino, S_IFREG | (spec.mode & 0o7777), spec.uid, spec.gid)?;
            debug!(ino = ino.0, name = %String::from_utf8_lossy(&spec.name),
                bytes = spec.data.len(), "file inode built");
        }

        // ── Journal inode ───────────────────────────────────────────────
        if self.layout.journal_blocks > 0 {
            self.build_journal_inode()?;
        }

        // ── Resize inode ────────────────────────────────────────────────
        self.build_resize_inode()?;

        // ── Root directory data ─────────────────────────────────────────
        let subdirs = u16::try_from(root_dir.subdirectory_count())
            .map_err(|_| BuildError::Config("too many subdirectories".to_owned()))?;
        let root_data: Arc<[u8]> = root_dir.build()?.into();
        self.build_inode_with_data(InodeNumber::ROOT, &root_data, true, 2 + subdirs)?;
        self.finalize_inode(InodeNumber::ROOT, S_IFDIR | 0o755, 0, 0)?;

        // ── Finalization: bitmaps, tables, descriptors, superblocks ─────
        let image = self.finalize_image()?;
        info!(
            total_blocks = image.layout.total_blocks,
            free_blocks = image.superblock.free_blocks_count,
            inodes = image.superblock.inodes_count,
            backed_blocks = image.backed_blocks(),
            mkfs_time = ts,
            "image built"
        );
        Ok(image)
    }

    /// Journal inode: an ordinary extent-backed file. Only the first block
    /// (the jbd2 superblock) is backed with data — the log area itself is
    /// skip space.
    fn build_journal_inode(&mut self) -> Result<()> {
        let bs = self.params.block_size;
        let blocks = self.layout.journal_blocks;
        let byte_len = u64::from(blocks) * u64::from(bs.get());

        let mut allocation = self.allocator.allocate(blocks + 1)?;
        let tree = gfs_extent::build(byte_len, &mut allocation, &mut self.allocator, bs)?;

        let first_physical = tree
            .leaves()
            .first()
            .map(|l| l.physical_start)
            .ok_or_else(|| {
                BuildError::Inconsistency("journal extent tree has no leaves".to_owned())
            })?;
        let mut first_block = vec![0_u8; bs.get() as usize];
        JournalSuperblock {
            block_size: bs.get(),
            max_len: blocks,
        }
        .encode_into(&mut first_block);
        self.list.add_owned(first_physical, first_block)?;
        self.register_tree_overflow(&tree)?;

        self.insert_inode(InodeNumber::JOURNAL, &tree, byte_len, false, 1)?;
        self.finalize_inode(InodeNumber::JOURNAL, S_IFREG | 0o600, 0, 0)?;
        debug!(blocks, first_physical = first_physical.0, "journal inode built");
        Ok(())
    }

    /// Resize inode: an ordinary extent-backed file over the reserved-GDT
    /// regions of every superblock-copy group.
    fn build_resize_inode(&mut self) -> Result<()> {
        let bs = self.params.block_size;
        let regions = self.layout.reserved_gdt_regions();
        let byte_len = u64::from(regions.total_blocks()) * u64::from(bs.get());

        let tree =
            gfs_extent::build_over_regions(byte_len, &regions, &mut self.allocator, bs)?;
        self.register_tree_overflow(&tree)?;

        self.insert_inode(InodeNumber::RESIZE, &tree, byte_len, false, 1)?;
        self.finalize_inode(InodeNumber::RESIZE, S_IFREG | 0o600, 0, 0)
    }

    // ── Finalization ────────────────────────────────────────────────────

    #[allow(clippy::too_many_lines)]
    fn finalize_image(mut self) -> Result<BuiltImage> {
        let bs = self.params.block_size;
        let bs_usize = bs.get() as usize;
        let layout = self.layout.clone();
        let csum_seed = crc32c::crc32c_append(!0_u32, &self.params.uuid);

        // Per-group used-inode maps, derived once from the slot table.
        let mut used_inodes: Vec<Vec<u32>> = vec![Vec::new(); layout.block_groups as usize];
        let mut used_dirs: Vec<u16> = vec![0; layout.block_groups as usize];
        for (&ino, slot) in &self.inodes {
            let ino = InodeNumber(ino);
            let group = inode_to_group(ino, layout.inodes_per_group);
            used_inodes[group.0 as usize].push(inode_index_in_group(ino, layout.inodes_per_group));
            if slot.is_dir {
                used_dirs[group.0 as usize] += 1;
            }
        }

        // ── Inode tables ────────────────────────────────────────────────
        //
        // Only groups that hold an allocated inode get a table written;
        // fully unused groups carry INODE_UNINIT and leave the table as
        // skip space.
        for g in 0..layout.block_groups {
            let group = GroupNumber(g);
            if used_inodes[g as usize].is_empty() {
                continue;
            }
            let mut table =
                vec![0_u8; layout.inode_table_blocks as usize * bs_usize];
            for (&ino, slot) in &self.inodes {
                let ino = InodeNumber(ino);
                if inode_to_group(ino, layout.inodes_per_group) != group {
                    continue;
                }
                let index = inode_index_in_group(ino, layout.inodes_per_group) as usize;
                let offset = index * usize::from(self.params.inode_size);
                slot.frozen_record()?
                    .encode_into(&mut table[offset..offset + usize::from(self.params.inode_size)])
                    .map_err(|e| BuildError::Inconsistency(e.to_string()))?;
            }
            self.list.add_owned(layout.inode_table_block(group), table)?;
        }

        // ── Bitmaps and group descriptors ───────────────────────────────
        let mut descriptors = Vec::with_capacity(layout.block_groups as usize);
        let mut free_blocks_total = 0_u64;
        let mut free_inodes_total = 0_u64;

        for g in 0..layout.block_groups {
            let group = GroupNumber(g);
            let group_start = layout.group_start(group).0;
            let in_group = layout.blocks_in_group(group);

            // Block bitmap: start from all-used, clear the allocator's
            // free runs, keep the padding bits set.
            let mut block_bitmap = vec![0xFF_u8; bs_usize];
            for region in self.allocator.free_regions() {
                let lo = region.start.0.max(group_start);
                let hi = region.end().min(group_start + in_group);
                for block in lo..hi {
                    gfs_alloc::bitmap_clear(&mut block_bitmap, block - group_start);
                }
            }
            let group_free_blocks = bitmap_count_free(&block_bitmap, in_group);

            // Inode bitmap: reserved inodes in group 0, allocated inodes,
            // padding bits set.
            let mut inode_bitmap = vec![0_u8; bs_usize];
            if g == 0 {
                for index in 0..RESERVED_INODES {
                    bitmap_set(&mut inode_bitmap, index);
                }
            }
            for &index in &used_inodes[g as usize] {
                bitmap_set(&mut inode_bitmap, index);
            }
            for index in layout.inodes_per_group..(bs.get() * 8) {
                bitmap_set(&mut inode_bitmap, index);
            }
            let group_free_inodes =
                bitmap_count_free(&inode_bitmap, layout.inodes_per_group);

            self.list
                .add_owned(layout.block_bitmap_block(group), block_bitmap)?;
            self.list
                .add_owned(layout.inode_bitmap_block(group), inode_bitmap)?;

            let empty = used_inodes[g as usize].is_empty();
            let itable_unused = if empty {
                layout.inodes_per_group
            } else {
                let last = used_inodes[g as usize]
                    .iter()
                    .copied()
                    .max()
                    .unwrap_or(0);
                layout.inodes_per_group - (last + 1)
            };

            let mut desc = GroupDesc {
                block_bitmap: layout.block_bitmap_block(group),
                inode_bitmap: layout.inode_bitmap_block(group),
                inode_table: layout.inode_table_block(group),
                free_blocks_count: narrow_u16(group_free_blocks, "bg_free_blocks")?,
                free_inodes_count: narrow_u16(group_free_inodes, "bg_free_inodes")?,
                used_dirs_count: used_dirs[g as usize],
                itable_unused: narrow_u16(itable_unused, "bg_itable_unused")?,
                flags: if empty { GD_FLAG_INODE_UNINIT } else { 0 },
                checksum: 0,
            };
            desc.checksum = group_desc_checksum(csum_seed, group, &desc.encode());
            descriptors.push(desc);

            free_blocks_total += u64::from(group_free_blocks);
            free_inodes_total += u64::from(group_free_inodes);
        }

        // ── Free-count identities ───────────────────────────────────────
        //
        // The descriptor sums must reproduce the allocator's and inode
        // counter's view exactly; a mismatch is a bug, not bad input.
        if free_blocks_total != u64::from(self.allocator.free_blocks()) {
            return Err(BuildError::Inconsistency(format!(
                "group free-block sum {free_blocks_total} != allocator total {}",
                self.allocator.free_blocks()
            )));
        }
        let used_inode_count =
            RESERVED_INODES + (self.next_ino - InodeNumber::FIRST_NON_RESERVED.0);
        let expected_free_inodes =
            u64::from(layout.total_inodes) - u64::from(used_inode_count);
        if free_inodes_total != expected_free_inodes {
            return Err(BuildError::Inconsistency(format!(
                "group free-inode sum {free_inodes_total} != expected {expected_free_inodes}"
            )));
        }

        // ── Group descriptor table ──────────────────────────────────────
        let mut gdt = vec![0_u8; layout.gdt_blocks as usize * bs_usize];
        for (idx, desc) in descriptors.iter().enumerate() {
            gdt[idx * 32..idx * 32 + 32].copy_from_slice(&desc.encode());
        }

        // ── Superblocks ─────────────────────────────────────────────────
        let superblock = Superblock {
            inodes_count: layout.total_inodes,
            blocks_count: layout.total_blocks,
            reserved_blocks_count: 0,
            free_blocks_count: self.allocator.free_blocks(),
            free_inodes_count: narrow_u32(expected_free_inodes, "s_free_inodes_count")?,
            first_data_block: layout.first_data_block,
            block_size: bs.get(),
            blocks_per_group: layout.blocks_per_group,
            inodes_per_group: layout.inodes_per_group,
            mkfs_time: self.params.timestamp,
            inode_size: self.params.inode_size,
            block_group_nr: 0,
            reserved_gdt_blocks: narrow_u16(layout.reserved_gdt_blocks, "s_reserved_gdt_blocks")?,
            journal_inum: if layout.journal_blocks > 0 {
                InodeNumber::JOURNAL.0
            } else {
                0
            },
            feature_compat: if layout.journal_blocks > 0 {
                CompatFeatures::BASE.with(CompatFeatures::HAS_JOURNAL)
            } else {
                CompatFeatures::BASE
            },
            feature_incompat: IncompatFeatures::BASE,
            feature_ro_compat: RoCompatFeatures::BASE,
            uuid: self.params.uuid,
            volume_name: self.params.label.clone(),
        };

        // Primary copy: always at byte offset 1024. At 1K blocks that is
        // block 1 (the group start); at larger block sizes it sits inside
        // block 0 after the boot padding.
        if bs.get() == 1024 {
            self.list
                .add_owned(BlockNumber(1), superblock.encode().to_vec())?;
        } else {
            let mut block0 = vec![0_u8; bs_usize];
            block0[EXT4_SUPERBLOCK_OFFSET..EXT4_SUPERBLOCK_OFFSET + EXT4_SUPERBLOCK_SIZE]
                .copy_from_slice(&superblock.encode());
            self.list.add_owned(BlockNumber(0), block0)?;
        }
        let gdt_start = BlockNumber(layout.group_start(GroupNumber(0)).0 + 1);
        self.list.add_owned(gdt_start, gdt.clone())?;

        // Backup copies: the superblock (stamped with its group number) at
        // the group start, the descriptor table right after.
        for group in layout.backup_groups() {
            let mut backup = superblock.clone();
            backup.block_group_nr = narrow_u16(group.0, "s_block_group_nr")?;
            let mut block = vec![0_u8; bs_usize];
            block[..EXT4_SUPERBLOCK_SIZE].copy_from_slice(&backup.encode());
            self.list.add_owned(layout.group_start(group), block)?;
            self.list.add_owned(
                BlockNumber(layout.group_start(group).0 + 1),
                gdt.clone(),
            )?;
        }

        Ok(BuiltImage {
            superblock,
            layout,
            list: self.list,
        })
    }
}

fn narrow_u16(value: u32, field: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| BuildError::Inconsistency(format!("{field} {value} exceeds u16")))
}

fn narrow_u32(value: u64, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| BuildError::Inconsistency(format!("{field} {value} exceeds u32")))
}

// ── Output ──────────────────────────────────────────────────────────────────

/// A finished image: the backed-block list plus the final superblock and
/// layout, ready to serialize exactly once.
#[derive(Debug)]
pub struct BuiltImage {
    pub superblock: Superblock,
    pub layout: Layout,
    list: BackedBlockList,
}

impl BuiltImage {
    #[must_use]
    pub fn geometry(&self) -> ImageGeometry {
        ImageGeometry {
            block_size: self.list.block_size(),
            total_blocks: self.layout.total_blocks,
        }
    }

    /// Chunks a serialization pass will emit (skips included).
    pub fn count_chunks(&self) -> Result<u32> {
        self.list.count_chunks(self.layout.total_blocks)
    }

    /// Blocks carrying literal data.
    #[must_use]
    pub fn backed_blocks(&self) -> u32 {
        self.list.backed_blocks()
    }

    /// Serialize into a sink. The list walks in block order, emitting skip
    /// runs for every gap.
    pub fn write_to(&self, sink: &mut dyn ChunkSink) -> Result<()> {
        self.list.serialize(self.layout.total_blocks, sink)
    }
}

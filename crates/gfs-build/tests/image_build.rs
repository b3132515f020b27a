//! End-to-end image construction scenarios.
//!
//! Each test builds an image through the public pipeline, serializes it
//! into memory, and verifies the on-disk bytes by decoding them back —
//! superblock, group descriptors, inode records, extent trees, directory
//! blocks.

use gfs_build::{BuildParams, BuildSession};
use gfs_dir::walk_entries;
use gfs_error::BuildError;
use gfs_ondisk::{
    ExtentTreeView, GroupDesc, RoCompatFeatures, Superblock, group_desc_checksum,
    parse_extent_tree, parse_superblock_region,
};
use gfs_sparse::{MemoryImageSink, SparseChunkKind, SparseImageSink, parse_sparse_image};
use gfs_types::{BlockSize, InodeNumber, S_IFDIR, S_IFMT, read_le_u16, read_le_u32};

fn build_dense(params: BuildParams, files: &[(&[u8], Vec<u8>)]) -> Vec<u8> {
    let mut session = BuildSession::new(params).unwrap();
    for (name, data) in files {
        session.add_file(name, data.clone(), 0o644, 0, 0).unwrap();
    }
    let image = session.finish().unwrap();
    let mut sink = MemoryImageSink::new();
    image.write_to(&mut sink).unwrap();
    sink.into_bytes()
}

fn parse_sb(image: &[u8]) -> Superblock {
    parse_superblock_region(&image[1024..2048]).expect("valid primary superblock")
}

fn parse_group_descs(image: &[u8], sb: &Superblock) -> Vec<GroupDesc> {
    let bs = sb.block_size as usize;
    let gdt_offset = (sb.first_data_block as usize + 1) * bs;
    let groups = (sb.blocks_count - sb.first_data_block).div_ceil(sb.blocks_per_group) as usize;
    (0..groups)
        .map(|g| {
            GroupDesc::parse_from_bytes(&image[gdt_offset + g * 32..gdt_offset + g * 32 + 32])
                .expect("valid group descriptor")
        })
        .collect()
}

fn inode_bytes<'a>(
    image: &'a [u8],
    sb: &Superblock,
    descs: &[GroupDesc],
    ino: InodeNumber,
) -> &'a [u8] {
    let group = ((ino.0 - 1) / sb.inodes_per_group) as usize;
    let index = ((ino.0 - 1) % sb.inodes_per_group) as usize;
    let table = descs[group].inode_table.0 as usize * sb.block_size as usize;
    let offset = table + index * usize::from(sb.inode_size);
    &image[offset..offset + usize::from(sb.inode_size)]
}

/// Resolve an inode's data by walking its extent tree (depth <= 1).
fn read_inode_data(image: &[u8], sb: &Superblock, inode: &[u8], len: usize) -> Vec<u8> {
    let bs = sb.block_size as usize;
    let (header, view) = parse_extent_tree(&inode[0x28..0x28 + 60]).expect("extent root");

    let leaves = match view {
        ExtentTreeView::Leaf(leaves) => leaves,
        ExtentTreeView::Index(indexes) => {
            assert_eq!(header.depth, 1);
            assert_eq!(indexes.len(), 1, "single overflow block");
            let block = indexes[0].leaf_block.0 as usize;
            let (leaf_header, leaf_view) =
                parse_extent_tree(&image[block * bs..(block + 1) * bs]).expect("overflow block");
            assert_eq!(leaf_header.depth, 0);
            match leaf_view {
                ExtentTreeView::Leaf(leaves) => leaves,
                ExtentTreeView::Index(_) => panic!("depth-2 tree is unsupported"),
            }
        }
    };

    let mut data = Vec::new();
    for leaf in &leaves {
        let start = leaf.physical_start.0 as usize * bs;
        data.extend_from_slice(&image[start..start + usize::from(leaf.len) * bs]);
    }
    data.truncate(len);
    data
}

// ── Scenario: 64 MiB default build, accounting identity ─────────────────────

#[test]
fn accounting_identity_64mib() {
    let params = BuildParams::new(64 << 20, 4096).unwrap();
    let mut session = BuildSession::new(params.clone()).unwrap();
    let layout = session.layout().clone();
    session.add_file(b"hello.txt", b"hello".to_vec(), 0o644, 0, 0).unwrap();
    let image = session.finish().unwrap();

    let mut sink = MemoryImageSink::new();
    image.write_to(&mut sink).unwrap();
    let dense = sink.into_bytes();
    assert_eq!(dense.len(), 64 << 20);

    let sb = parse_sb(&dense);
    assert_eq!(sb.blocks_count, 16384);
    assert_eq!(sb.inodes_count, layout.total_inodes);

    // Used blocks reconcile exactly: metadata + journal + root dir +
    // lost+found + the one-block file. (Single group: the resize inode's
    // reserved-GDT region is one run, so no overflow block anywhere.)
    let expected_used = layout.metadata_blocks()
        + u64::from(layout.journal_blocks)
        + 1 // root directory block
        + 1 // lost+found block
        + 1; // hello.txt
    assert_eq!(
        u64::from(sb.blocks_count - sb.free_blocks_count),
        expected_used
    );

    // Per-group free counts sum to the superblock totals.
    let descs = parse_group_descs(&dense, &sb);
    let free_blocks: u64 = descs.iter().map(|d| u64::from(d.free_blocks_count)).sum();
    let free_inodes: u64 = descs.iter().map(|d| u64::from(d.free_inodes_count)).sum();
    assert_eq!(free_blocks, u64::from(sb.free_blocks_count));
    assert_eq!(free_inodes, u64::from(sb.free_inodes_count));

    // 10 reserved inodes + lost+found + one file are in use.
    assert_eq!(sb.free_inodes_count, sb.inodes_count - 12);

    // Descriptor checksums verify against the UUID-derived seed.
    let seed = crc32c::crc32c_append(!0_u32, &sb.uuid);
    for (g, desc) in descs.iter().enumerate() {
        let mut unsigned = *desc;
        unsigned.checksum = 0;
        assert_eq!(
            group_desc_checksum(seed, gfs_types::GroupNumber(g as u32), &unsigned.encode()),
            desc.checksum,
            "descriptor checksum for group {g}"
        );
    }
    assert!(sb.feature_ro_compat.contains(RoCompatFeatures::GDT_CSUM));
}

// ── Scenario: directory tree wiring ─────────────────────────────────────────

#[test]
fn root_directory_and_lost_found() {
    let params = BuildParams::new(64 << 20, 4096).unwrap();
    let dense = build_dense(params, &[(b"app.bin", vec![0x5A; 10_000])]);
    let sb = parse_sb(&dense);
    let descs = parse_group_descs(&dense, &sb);
    let bs = BlockSize::new(sb.block_size).unwrap();

    // Root inode: directory mode, 3 links (".", "..", lost+found's "..").
    let root = inode_bytes(&dense, &sb, &descs, InodeNumber::ROOT);
    assert_eq!(read_le_u16(root, 0).unwrap() & S_IFMT, S_IFDIR);
    assert_eq!(read_le_u16(root, 0x1A).unwrap(), 3);

    let root_size = u64::from(read_le_u32(root, 0x04).unwrap());
    let root_data = read_inode_data(&dense, &sb, root, root_size as usize);
    let entries = walk_entries(&root_data, bs).unwrap();
    let names: Vec<&[u8]> = entries.iter().map(|e| e.name.as_slice()).collect();
    assert_eq!(names, vec![&b"."[..], b"..", b"lost+found", b"app.bin"]);
    assert_eq!(entries[0].ino, InodeNumber::ROOT);
    assert_eq!(entries[2].ino, InodeNumber(11));
    assert_eq!(entries[3].ino, InodeNumber(12));

    // lost+found: its own '.' and a '..' back to root.
    let lf = inode_bytes(&dense, &sb, &descs, InodeNumber(11));
    assert_eq!(read_le_u16(lf, 0).unwrap() & S_IFMT, S_IFDIR);
    let lf_size = u64::from(read_le_u32(lf, 0x04).unwrap());
    let lf_data = read_inode_data(&dense, &sb, lf, lf_size as usize);
    let lf_entries = walk_entries(&lf_data, bs).unwrap();
    assert_eq!(lf_entries.len(), 2);
    assert_eq!(lf_entries[1].name, b"..");
    assert_eq!(lf_entries[1].ino, InodeNumber::ROOT);

    // The file's content round-trips.
    let file = inode_bytes(&dense, &sb, &descs, InodeNumber(12));
    let file_size = u64::from(read_le_u32(file, 0x04).unwrap());
    assert_eq!(file_size, 10_000);
    assert_eq!(
        read_inode_data(&dense, &sb, file, 10_000),
        vec![0x5A; 10_000]
    );
    // Group 0 carries two directories (root, lost+found).
    assert_eq!(descs[0].used_dirs_count, 2);
}

// ── Scenario: fragmentation forces a depth-1 extent tree ────────────────────

#[test]
fn fragmented_file_grows_overflow_block() {
    // Small groups chop free space into runs of ~1000 blocks; a 12 MiB
    // file cannot fit any single run and fragments across four of them.
    let mut params = BuildParams::new(32 << 20, 4096).unwrap();
    params.blocks_per_group = Some(1024);
    params.inode_count = Some(16);
    params.journal = false;

    let file_len = 12 << 20;
    let payload: Vec<u8> = (0..file_len).map(|i| (i % 251) as u8).collect();
    let dense = build_dense(params, &[(b"big.dat", payload.clone())]);

    let sb = parse_sb(&dense);
    let descs = parse_group_descs(&dense, &sb);
    let file = inode_bytes(&dense, &sb, &descs, InodeNumber(12));

    // The root of the extent tree is a single index record.
    let (header, view) = parse_extent_tree(&file[0x28..0x28 + 60]).unwrap();
    assert_eq!(header.depth, 1);
    assert_eq!(header.entries, 1);
    assert!(matches!(view, ExtentTreeView::Index(_)));

    // i_blocks includes the overflow block: (data + 1) * 8 sectors.
    let file_blocks = read_le_u32(file, 0x1C).unwrap();
    let data_blocks = file_len as u32 / 4096;
    assert_eq!(file_blocks, (data_blocks + 1) * 8);

    // Content reassembles exactly from the fragmented extents.
    assert_eq!(read_inode_data(&dense, &sb, file, file_len), payload);
}

// ── Scenario: sparse wire accounting ────────────────────────────────────────

#[test]
fn sparse_container_accounts_exactly() {
    let params = BuildParams::new(64 << 20, 4096).unwrap();
    let mut session = BuildSession::new(params).unwrap();
    session.add_file(b"data.bin", vec![7_u8; 123_456], 0o600, 0, 0).unwrap();
    let image = session.finish().unwrap();

    let declared = image.count_chunks().unwrap();
    let mut sink = SparseImageSink::new(Vec::new());
    image.write_to(&mut sink).unwrap();
    let container = sink.into_inner();

    let (header, chunks) = parse_sparse_image(&container).unwrap();
    assert_eq!(header.total_chunks, declared);
    assert_eq!(chunks.len() as u32, declared);
    let covered: u64 = chunks.iter().map(|c| u64::from(c.blocks)).sum();
    assert_eq!(covered, u64::from(header.total_blocks));
    assert_eq!(header.total_blocks, 16384);

    // A mostly-empty image stays a fraction of its logical size.
    assert!(container.len() < (64 << 20) / 4);
    assert!(chunks.iter().any(|c| c.kind == SparseChunkKind::DontCare));

    // The sparse container reconstructs the same dense bytes.
    let mut dense_from_sparse = Vec::new();
    for chunk in &chunks {
        match chunk.kind {
            SparseChunkKind::Raw => dense_from_sparse.extend_from_slice(&chunk.data),
            SparseChunkKind::DontCare => dense_from_sparse
                .resize(dense_from_sparse.len() + chunk.blocks as usize * 4096, 0),
        }
    }
    let params = BuildParams::new(64 << 20, 4096).unwrap();
    let mut session = BuildSession::new(params).unwrap();
    session.add_file(b"data.bin", vec![7_u8; 123_456], 0o600, 0, 0).unwrap();
    let image = session.finish().unwrap();
    let mut memory = MemoryImageSink::new();
    image.write_to(&mut memory).unwrap();
    assert_eq!(dense_from_sparse, memory.into_bytes());
}

// ── Scenario: determinism ───────────────────────────────────────────────────

#[test]
fn identical_params_build_identical_images() {
    let mut params = BuildParams::new(48 << 20, 4096).unwrap();
    params.label = "genesis".to_owned();
    params.uuid = *b"fixed-uuid-bytes";
    params.timestamp = 1_700_000_000;

    let files: Vec<(&[u8], Vec<u8>)> = vec![
        (b"a.txt".as_slice(), vec![1_u8; 5000]),
        (b"b.txt".as_slice(), vec![2_u8; 70_000]),
    ];
    let first = build_dense(params.clone(), &files);
    let second = build_dense(params, &files);
    assert_eq!(first, second);

    let sb = parse_sb(&first);
    assert_eq!(sb.volume_name, "genesis");
    assert_eq!(sb.uuid, *b"fixed-uuid-bytes");
    assert_eq!(sb.mkfs_time, 1_700_000_000);
}

// ── Scenario: journal inode ─────────────────────────────────────────────────

#[test]
fn journal_inode_carries_jbd2_superblock() {
    let params = BuildParams::new(64 << 20, 4096).unwrap();
    let dense = build_dense(params, &[]);
    let sb = parse_sb(&dense);
    assert_eq!(sb.journal_inum, 8);

    let descs = parse_group_descs(&dense, &sb);
    let journal = inode_bytes(&dense, &sb, &descs, InodeNumber::JOURNAL);
    let size = u64::from(read_le_u32(journal, 0x04).unwrap());
    assert_eq!(size, 1024 * 4096); // clamped journal minimum

    // First journal block holds the big-endian jbd2 superblock.
    let data = read_inode_data(&dense, &sb, journal, 4096);
    assert_eq!(&data[0..4], &[0xC0, 0x3B, 0x39, 0x98]);
    assert_eq!(data[7], 4); // V2 superblock block type
    let max_len = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    assert_eq!(max_len, 1024);
}

#[test]
fn journal_can_be_disabled() {
    let mut params = BuildParams::new(64 << 20, 4096).unwrap();
    params.journal = false;
    let dense = build_dense(params, &[]);
    let sb = parse_sb(&dense);
    assert_eq!(sb.journal_inum, 0);
    assert!(!sb
        .feature_compat
        .contains(gfs_ondisk::CompatFeatures::HAS_JOURNAL));
}

// ── Scenario: backup superblocks ────────────────────────────────────────────

#[test]
fn backup_superblocks_at_sparse_groups() {
    let params = BuildParams::new(1 << 30, 4096).unwrap(); // 8 groups
    let dense = build_dense(params, &[]);
    let sb = parse_sb(&dense);
    assert!(sb.feature_ro_compat.contains(RoCompatFeatures::SPARSE_SUPER));

    for group in [1_u32, 3, 5, 7] {
        let offset = group as usize * 32768 * 4096;
        let backup = parse_superblock_region(&dense[offset..offset + 1024])
            .unwrap_or_else(|e| panic!("backup superblock in group {group}: {e}"));
        assert_eq!(backup.block_group_nr, group as u16);
        assert_eq!(backup.blocks_count, sb.blocks_count);
        assert_eq!(backup.uuid, sb.uuid);

        // The descriptor table copy follows in the next block.
        let gdt_copy = &dense[offset + 4096..offset + 4096 + 32 * 8];
        let primary = &dense[4096..4096 + 32 * 8];
        assert_eq!(gdt_copy, primary);
    }

    // Group 2 carries no copy: its first block belongs to the bitmap
    // metadata, not a superblock.
    let offset = 2 * 32768 * 4096;
    assert!(parse_superblock_region(&dense[offset..offset + 1024]).is_err());
}

// ── Scenario: 1K block size ─────────────────────────────────────────────────

#[test]
fn one_kib_block_image() {
    let mut params = BuildParams::new(16 << 20, 1024).unwrap();
    params.journal = false;
    let dense = build_dense(params, &[(b"cfg", b"x=1\n".to_vec())]);

    let sb = parse_sb(&dense);
    assert_eq!(sb.block_size, 1024);
    assert_eq!(sb.first_data_block, 1);
    assert_eq!(sb.blocks_count, 16384);

    let descs = parse_group_descs(&dense, &sb);
    let file = inode_bytes(&dense, &sb, &descs, InodeNumber(12));
    assert_eq!(read_inode_data(&dense, &sb, file, 4), b"x=1\n");
}

// ── Negative scenarios ──────────────────────────────────────────────────────

#[test]
fn file_larger_than_image_is_out_of_space() {
    let mut params = BuildParams::new(8 << 20, 4096).unwrap();
    params.journal = false;
    let mut session = BuildSession::new(params).unwrap();
    session
        .add_file(b"huge.bin", vec![0_u8; 16 << 20], 0o644, 0, 0)
        .unwrap();
    let err = session.finish().unwrap_err();
    assert!(matches!(err, BuildError::OutOfSpace { .. }));
}

#[test]
fn sub_minimum_target_is_config_error() {
    let err = BuildSession::new(BuildParams::new(2 << 20, 4096).unwrap()).unwrap_err();
    assert!(matches!(err, BuildError::Config(_)));
}

#[test]
fn too_many_files_for_inode_table() {
    let mut params = BuildParams::new(32 << 20, 4096).unwrap();
    params.inode_count = Some(16);
    params.journal = false;
    let mut session = BuildSession::new(params).unwrap();
    // 16 requested inodes round up to one table block's worth; hundreds of
    // files cannot fit.
    for i in 0..200_u32 {
        let name = format!("f{i}");
        session.add_file(name.as_bytes(), vec![0_u8; 16], 0o644, 0, 0).unwrap();
    }
    let err = session.finish().unwrap_err();
    assert!(matches!(err, BuildError::Config(_)));
}

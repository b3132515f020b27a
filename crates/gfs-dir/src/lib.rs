#![forbid(unsafe_code)]
//! Directory entry packing.
//!
//! Packs `ext4_dir_entry_2` records into directory blocks using the
//! format's `rec_len` discipline: entries are 4-byte aligned and the last
//! entry of every block absorbs the block's slack. Directory content is
//! ordinary file data — the caller backs the packed bytes with an extent
//! tree like any other file.
//!
//! Children can be registered before their inode numbers exist: `add_entry`
//! returns an [`EntryHandle`] and `set_inode` back-patches the number later
//! (the root directory names `lost+found` before that inode is allocated).

use gfs_error::{BuildError, Result};
use gfs_ondisk::DirFileType;
use gfs_types::{BlockSize, InodeNumber, put_le_u16, put_le_u32};

/// Directory entry header size (`ext4_dir_entry_2` before the name).
const DIR_ENTRY_HEADER_LEN: usize = 8;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// On-disk size of an entry with an `n`-byte name.
fn required_rec_len(name_len: usize) -> usize {
    align4(DIR_ENTRY_HEADER_LEN + name_len)
}

fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(BuildError::Config(
            "directory entry name cannot be empty".to_owned(),
        ));
    }
    if name.len() > usize::from(u8::MAX) {
        return Err(BuildError::Config(
            "directory entry name exceeds 255 bytes".to_owned(),
        ));
    }
    if name.iter().any(|b| *b == 0 || *b == b'/') {
        return Err(BuildError::Config(
            "directory entry name contains NUL or '/'".to_owned(),
        ));
    }
    Ok(())
}

/// Handle to a not-yet-finalized directory entry, used to back-patch the
/// child's inode number once it has been allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle(usize);

#[derive(Debug, Clone)]
struct PendingEntry {
    ino: u32,
    name: Vec<u8>,
    file_type: DirFileType,
}

/// Accumulates directory entries and packs them into blocks.
#[derive(Debug, Clone)]
pub struct DirectoryBuilder {
    block_size: BlockSize,
    entries: Vec<PendingEntry>,
}

impl DirectoryBuilder {
    #[must_use]
    pub fn new(block_size: BlockSize) -> Self {
        Self {
            block_size,
            entries: Vec::new(),
        }
    }

    /// Append an entry. `ino` may be `None` for a child that does not exist
    /// yet; it must be back-patched via [`set_inode`](Self::set_inode)
    /// before [`build`](Self::build).
    pub fn add_entry(
        &mut self,
        ino: Option<InodeNumber>,
        name: &[u8],
        file_type: DirFileType,
    ) -> Result<EntryHandle> {
        validate_name(name)?;
        self.entries.push(PendingEntry {
            ino: ino.map_or(0, |i| i.0),
            name: name.to_vec(),
            file_type,
        });
        Ok(EntryHandle(self.entries.len() - 1))
    }

    /// Back-patch a child's inode number.
    pub fn set_inode(&mut self, handle: EntryHandle, ino: InodeNumber) {
        self.entries[handle.0].ino = ino.0;
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of subdirectory entries, `.` and `..` excluded.
    ///
    /// The owning directory's link count is 2 plus this (each child's
    /// `..` adds one).
    #[must_use]
    pub fn subdirectory_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.file_type == DirFileType::Dir && e.name != b"." && e.name != b"..")
            .count()
    }

    /// Pack all entries into whole directory blocks.
    ///
    /// Returns at least one block; the last entry of each block extends to
    /// the block boundary. Fails with `Inconsistency` if any entry still
    /// has no inode number.
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.entries.is_empty() {
            return Err(BuildError::Inconsistency(
                "directory has no entries (missing '.' and '..')".to_owned(),
            ));
        }

        let block_size = self.block_size.get() as usize;
        let mut blocks: Vec<u8> = Vec::new();
        let mut block_start = 0_usize;
        let mut cursor = 0_usize;
        // Offset of the previous entry in the current block, so its
        // rec_len can absorb slack when the block closes.
        let mut prev_entry: Option<usize> = None;

        for entry in &self.entries {
            if entry.ino == 0 {
                return Err(BuildError::Inconsistency(format!(
                    "directory entry {:?} was never assigned an inode",
                    String::from_utf8_lossy(&entry.name)
                )));
            }
            let need = required_rec_len(entry.name.len());

            if blocks.is_empty() || cursor + need > block_start + block_size {
                // Close the current block: the last entry absorbs the tail.
                if let Some(prev) = prev_entry {
                    let tail = block_start + block_size - prev;
                    set_rec_len(&mut blocks, prev, tail)?;
                }
                block_start = blocks.len();
                blocks.resize(block_start + block_size, 0);
                cursor = block_start;
                prev_entry = None;
            }

            write_entry(
                &mut blocks,
                cursor,
                entry.ino,
                need,
                entry.file_type,
                &entry.name,
            )?;
            prev_entry = Some(cursor);
            cursor += need;
        }

        if let Some(prev) = prev_entry {
            let tail = block_start + block_size - prev;
            set_rec_len(&mut blocks, prev, tail)?;
        }

        Ok(blocks)
    }
}

fn set_rec_len(blocks: &mut [u8], offset: usize, rec_len: usize) -> Result<()> {
    let rec_len_u16 = u16::try_from(rec_len).map_err(|_| {
        BuildError::Inconsistency("directory entry rec_len exceeds u16".to_owned())
    })?;
    put_le_u16(blocks, offset + 4, rec_len_u16);
    Ok(())
}

fn write_entry(
    blocks: &mut [u8],
    offset: usize,
    ino: u32,
    rec_len: usize,
    file_type: DirFileType,
    name: &[u8],
) -> Result<()> {
    let name_len_u8 = u8::try_from(name.len()).map_err(|_| {
        BuildError::Config("directory entry name exceeds 255 bytes".to_owned())
    })?;
    let rec_len_u16 = u16::try_from(rec_len).map_err(|_| {
        BuildError::Inconsistency("directory entry rec_len exceeds u16".to_owned())
    })?;

    put_le_u32(blocks, offset, ino);
    put_le_u16(blocks, offset + 4, rec_len_u16);
    blocks[offset + 6] = name_len_u8;
    blocks[offset + 7] = file_type as u8;
    blocks[offset + DIR_ENTRY_HEADER_LEN..offset + DIR_ENTRY_HEADER_LEN + name.len()]
        .copy_from_slice(name);
    Ok(())
}

/// A decoded directory entry (verification aid).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedEntry {
    pub ino: InodeNumber,
    pub rec_len: u16,
    pub file_type: DirFileType,
    pub name: Vec<u8>,
}

/// Walk the live entries of packed directory blocks in storage order.
///
/// Rejects malformed `rec_len` chains; skips entries with inode 0.
pub fn walk_entries(blocks: &[u8], block_size: BlockSize) -> Result<Vec<WalkedEntry>> {
    let bs = block_size.get() as usize;
    if blocks.len() % bs != 0 {
        return Err(BuildError::Inconsistency(
            "directory data is not a whole number of blocks".to_owned(),
        ));
    }

    let mut out = Vec::new();
    for block in blocks.chunks(bs) {
        let mut off = 0_usize;
        while off + DIR_ENTRY_HEADER_LEN <= bs {
            let ino = u32::from_le_bytes([
                block[off],
                block[off + 1],
                block[off + 2],
                block[off + 3],
            ]);
            let rec_len = u16::from_le_bytes([block[off + 4], block[off + 5]]);
            let name_len = usize::from(block[off + 6]);
            let rl = usize::from(rec_len);

            if rl < DIR_ENTRY_HEADER_LEN || rl % 4 != 0 || off + rl > bs {
                return Err(BuildError::Inconsistency(format!(
                    "invalid rec_len {rec_len} at offset {off}"
                )));
            }
            if off + DIR_ENTRY_HEADER_LEN + name_len > bs {
                return Err(BuildError::Inconsistency(format!(
                    "name overruns block at offset {off}"
                )));
            }

            if ino != 0 {
                out.push(WalkedEntry {
                    ino: InodeNumber(ino),
                    rec_len,
                    file_type: DirFileType::from_raw(block[off + 7]),
                    name: block[off + DIR_ENTRY_HEADER_LEN
                        ..off + DIR_ENTRY_HEADER_LEN + name_len]
                        .to_vec(),
                });
            }
            off += rl;
        }
    }
    Ok(out)
}

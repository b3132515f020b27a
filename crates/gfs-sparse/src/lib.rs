#![forbid(unsafe_code)]
//! Backed-block tracking and sparse serialization.
//!
//! During image construction every component that produces bytes registers
//! them here as `(start block, payload)` chunks. The list stays sorted by
//! start block and gap-aware; serialization walks it once in block order,
//! synthesizing "skip" runs for the gaps, and hands each run to a
//! [`ChunkSink`] — either a dense raw-image writer or the Android sparse
//! wire format.
//!
//! Chunk accounting is exact by construction: the chunk count is computed
//! up front (the wire header declares it before any chunk bytes stream
//! out) and the write pass must reproduce it, and the emitted block sum
//! must equal the image's total block count. Any divergence fails loudly —
//! silently emitting a truncated chunk is the worst possible failure mode
//! here.

mod sink;
mod wire;

pub use sink::{ChunkSink, MemoryImageSink, RawImageSink, SparseImageSink};
pub use wire::{
    CHUNK_TYPE_CRC32, CHUNK_TYPE_DONT_CARE, CHUNK_TYPE_FILL, CHUNK_TYPE_RAW, SPARSE_HEADER_SIZE,
    SPARSE_MAGIC, SparseChunk, SparseChunkKind, SparseHeader, parse_sparse_image,
};

use gfs_error::{BuildError, Result};
use gfs_types::{BlockNumber, BlockSize};
use std::sync::Arc;
use tracing::debug;

/// Geometry handed to sinks before the first chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    pub block_size: BlockSize,
    pub total_blocks: u32,
}

impl ImageGeometry {
    #[must_use]
    pub fn total_bytes(self) -> u64 {
        u64::from(self.total_blocks) * u64::from(self.block_size.get())
    }
}

/// Chunk payload ownership kinds.
#[derive(Debug, Clone)]
pub enum BackedPayload {
    /// Buffer owned by the list.
    Owned(Vec<u8>),
    /// Externally-owned buffer shared with the producer.
    Shared(Arc<[u8]>),
    /// A single fill value repeated across the chunk. Reserved for future
    /// use; the serializer rejects it rather than guessing an encoding.
    Fill(u32),
}

/// One backed run of blocks.
#[derive(Debug, Clone)]
pub struct BackedChunk {
    start: BlockNumber,
    blocks: u32,
    payload: BackedPayload,
}

impl BackedChunk {
    #[must_use]
    pub fn start(&self) -> BlockNumber {
        self.start
    }

    #[must_use]
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    fn end(&self) -> u32 {
        self.start.0 + self.blocks
    }
}

/// Ordered, gap-aware collection of the written portions of the image.
///
/// Append-only during construction; consumed exactly once by
/// [`serialize`](Self::serialize).
#[derive(Debug)]
pub struct BackedBlockList {
    block_size: BlockSize,
    chunks: Vec<BackedChunk>,
}

impl BackedBlockList {
    #[must_use]
    pub fn new(block_size: BlockSize) -> Self {
        Self {
            block_size,
            chunks: Vec::new(),
        }
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Blocks carrying payload (gaps excluded).
    #[must_use]
    pub fn backed_blocks(&self) -> u32 {
        self.chunks.iter().map(|c| c.blocks).sum()
    }

    #[must_use]
    pub fn chunks(&self) -> &[BackedChunk] {
        &self.chunks
    }

    /// Register an owned buffer at `start`.
    pub fn add_owned(&mut self, start: BlockNumber, bytes: Vec<u8>) -> Result<()> {
        let blocks = self.payload_blocks(bytes.len())?;
        self.insert(BackedChunk {
            start,
            blocks,
            payload: BackedPayload::Owned(bytes),
        })
    }

    /// Register an externally-owned buffer at `start`.
    pub fn add_shared(&mut self, start: BlockNumber, bytes: Arc<[u8]>) -> Result<()> {
        let blocks = self.payload_blocks(bytes.len())?;
        self.insert(BackedChunk {
            start,
            blocks,
            payload: BackedPayload::Shared(bytes),
        })
    }

    /// Register a fill-value chunk (reserved; serialization will reject it).
    pub fn add_fill(&mut self, start: BlockNumber, blocks: u32, value: u32) -> Result<()> {
        if blocks == 0 {
            return Err(BuildError::SerializationFormat(
                "fill chunk cannot be empty".to_owned(),
            ));
        }
        self.insert(BackedChunk {
            start,
            blocks,
            payload: BackedPayload::Fill(value),
        })
    }

    fn payload_blocks(&self, len: usize) -> Result<u32> {
        let bs = self.block_size.get() as usize;
        if len == 0 || len % bs != 0 {
            return Err(BuildError::SerializationFormat(format!(
                "payload of {len} bytes is not a whole number of {bs}-byte blocks"
            )));
        }
        gfs_types::usize_to_u32(len / bs, "chunk_blocks")
            .map_err(|e| BuildError::Inconsistency(e.to_string()))
    }

    /// Insert keeping the list sorted by start block; overlap is a builder
    /// bug.
    fn insert(&mut self, chunk: BackedChunk) -> Result<()> {
        let idx = self
            .chunks
            .partition_point(|c| c.start.0 < chunk.start.0);

        if idx > 0 && self.chunks[idx - 1].end() > chunk.start.0 {
            return Err(BuildError::Inconsistency(format!(
                "chunk at block {} overlaps chunk ending at {}",
                chunk.start,
                self.chunks[idx - 1].end()
            )));
        }
        if idx < self.chunks.len() && chunk.end() > self.chunks[idx].start.0 {
            return Err(BuildError::Inconsistency(format!(
                "chunk at block {} overlaps chunk starting at {}",
                chunk.start, self.chunks[idx].start
            )));
        }

        self.chunks.insert(idx, chunk);
        Ok(())
    }

    /// Number of chunks a serialization pass will emit: data chunks plus
    /// the skip runs inserted for gaps and the trailing gap.
    ///
    /// The wire container declares this count in its leading header, so it
    /// must be known before any chunk bytes are written.
    pub fn count_chunks(&self, total_blocks: u32) -> Result<u32> {
        self.check_bounds(total_blocks)?;

        let mut count = 0_u32;
        let mut last = 0_u32;
        for chunk in &self.chunks {
            if chunk.start.0 > last {
                count += 1; // leading skip
            }
            count += 1;
            last = chunk.end();
        }
        if last < total_blocks {
            count += 1; // trailing skip (an empty image is one big skip)
        }
        Ok(count)
    }

    fn check_bounds(&self, total_blocks: u32) -> Result<()> {
        if let Some(chunk) = self.chunks.last() {
            if chunk.end() > total_blocks {
                return Err(BuildError::SerializationFormat(format!(
                    "chunk ending at block {} exceeds image size of {total_blocks} blocks",
                    chunk.end()
                )));
            }
        }
        Ok(())
    }

    /// Serialize the image: walk chunks in block order, emitting skip runs
    /// for gaps, and hand everything to `sink`.
    ///
    /// The emitted chunk count must equal [`count_chunks`](Self::count_chunks)
    /// and the emitted block sum must equal `total_blocks` exactly.
    pub fn serialize(&self, total_blocks: u32, sink: &mut dyn ChunkSink) -> Result<()> {
        let declared = self.count_chunks(total_blocks)?;
        let geometry = ImageGeometry {
            block_size: self.block_size,
            total_blocks,
        };
        sink.begin(geometry, declared)?;

        let mut emitted = 0_u32;
        let mut covered = 0_u64;
        let mut last = 0_u32;
        for chunk in &self.chunks {
            if chunk.start.0 > last {
                let gap = chunk.start.0 - last;
                sink.skip(BlockNumber(last), gap)?;
                emitted += 1;
                covered += u64::from(gap);
            }
            match &chunk.payload {
                BackedPayload::Owned(bytes) => sink.data(chunk.start, bytes)?,
                BackedPayload::Shared(bytes) => sink.data(chunk.start, bytes)?,
                BackedPayload::Fill(value) => {
                    return Err(BuildError::SerializationFormat(format!(
                        "fill chunk (value {value:#x}) at block {} is a reserved kind \
                         this serializer does not emit",
                        chunk.start
                    )));
                }
            }
            emitted += 1;
            covered += u64::from(chunk.blocks);
            last = chunk.end();
        }
        if last < total_blocks {
            let gap = total_blocks - last;
            sink.skip(BlockNumber(last), gap)?;
            emitted += 1;
            covered += u64::from(gap);
        }

        if emitted != declared {
            return Err(BuildError::Inconsistency(format!(
                "serializer emitted {emitted} chunks but declared {declared}"
            )));
        }
        if covered != u64::from(total_blocks) {
            return Err(BuildError::Inconsistency(format!(
                "serializer covered {covered} blocks of {total_blocks}"
            )));
        }

        debug!(
            chunks = emitted,
            backed_blocks = self.backed_blocks(),
            total_blocks,
            "image serialized"
        );
        sink.finish()
    }
}

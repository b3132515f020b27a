//! Chunk sinks: where serialized images go.
//!
//! [`RawImageSink`] writes a dense image with pwrite-style positioned I/O,
//! leaving skip regions untouched (holes on a fresh file). [`SparseImageSink`]
//! streams the Android sparse wire format. [`MemoryImageSink`] materializes
//! the dense image in memory for tests and callers that post-process.

use crate::ImageGeometry;
use crate::wire::{
    CHUNK_TYPE_DONT_CARE, CHUNK_TYPE_RAW, SPARSE_CHUNK_HEADER_SIZE, SparseHeader,
    encode_chunk_header,
};
use gfs_error::{BuildError, Result};
use gfs_types::BlockNumber;
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Consumer of the serializer's chunk stream.
///
/// `begin` is called exactly once before any chunk, with the image
/// geometry and the exact number of chunks that will follow; `finish`
/// exactly once after the last chunk. Skip chunks transfer no bytes — the
/// destination keeps whatever it already contains there.
pub trait ChunkSink {
    fn begin(&mut self, geometry: ImageGeometry, total_chunks: u32) -> Result<()>;

    /// Write literal data at a block position. `bytes` is a whole number
    /// of blocks.
    fn data(&mut self, start: BlockNumber, bytes: &[u8]) -> Result<()>;

    /// Acknowledge a skip run; no bytes are transferred.
    fn skip(&mut self, start: BlockNumber, blocks: u32) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

// ── Dense file sink ─────────────────────────────────────────────────────────

/// Dense image writer over a file, using positioned writes.
///
/// Skip regions are never written; on a freshly created file they read
/// back as zero (filesystem holes).
#[derive(Debug)]
pub struct RawImageSink {
    file: File,
    geometry: Option<ImageGeometry>,
}

impl RawImageSink {
    /// Create (or truncate) the destination file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            file,
            geometry: None,
        })
    }

    fn geometry(&self) -> Result<ImageGeometry> {
        self.geometry.ok_or_else(|| {
            BuildError::Inconsistency("sink used before begin()".to_owned())
        })
    }
}

impl ChunkSink for RawImageSink {
    fn begin(&mut self, geometry: ImageGeometry, _total_chunks: u32) -> Result<()> {
        self.file.set_len(geometry.total_bytes())?;
        self.geometry = Some(geometry);
        Ok(())
    }

    fn data(&mut self, start: BlockNumber, bytes: &[u8]) -> Result<()> {
        let geometry = self.geometry()?;
        let offset = geometry.block_size.block_to_byte(start);
        self.file.write_all_at(bytes, offset)?;
        Ok(())
    }

    fn skip(&mut self, _start: BlockNumber, _blocks: u32) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ── In-memory sink ──────────────────────────────────────────────────────────

/// Dense image materialized in memory.
#[derive(Debug, Default)]
pub struct MemoryImageSink {
    bytes: Vec<u8>,
    geometry: Option<ImageGeometry>,
}

impl MemoryImageSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl ChunkSink for MemoryImageSink {
    fn begin(&mut self, geometry: ImageGeometry, _total_chunks: u32) -> Result<()> {
        let len = usize::try_from(geometry.total_bytes()).map_err(|_| {
            BuildError::Inconsistency("image too large for memory sink".to_owned())
        })?;
        self.bytes = vec![0_u8; len];
        self.geometry = Some(geometry);
        Ok(())
    }

    fn data(&mut self, start: BlockNumber, bytes: &[u8]) -> Result<()> {
        let geometry = self.geometry.ok_or_else(|| {
            BuildError::Inconsistency("sink used before begin()".to_owned())
        })?;
        let offset = usize::try_from(geometry.block_size.block_to_byte(start))
            .map_err(|_| BuildError::Inconsistency("offset overflows usize".to_owned()))?;
        let end = offset + bytes.len();
        if end > self.bytes.len() {
            return Err(BuildError::Inconsistency(format!(
                "data chunk at block {start} overruns the image"
            )));
        }
        self.bytes[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn skip(&mut self, _start: BlockNumber, _blocks: u32) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── Sparse wire-format sink ─────────────────────────────────────────────────

/// Streams the Android sparse wire format into any `Write`.
///
/// The container header carries the total chunk count, which is why the
/// serializer precomputes it: chunks stream out one at a time and are
/// never buffered here.
#[derive(Debug)]
pub struct SparseImageSink<W: Write> {
    writer: W,
    geometry: Option<ImageGeometry>,
    declared_chunks: u32,
    emitted_chunks: u32,
}

impl<W: Write> SparseImageSink<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            geometry: None,
            declared_chunks: 0,
            emitted_chunks: 0,
        }
    }

    /// Consume the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn block_size(&self) -> Result<u32> {
        self.geometry
            .map(|g| g.block_size.get())
            .ok_or_else(|| BuildError::Inconsistency("sink used before begin()".to_owned()))
    }
}

impl<W: Write> ChunkSink for SparseImageSink<W> {
    fn begin(&mut self, geometry: ImageGeometry, total_chunks: u32) -> Result<()> {
        let header = SparseHeader {
            block_size: geometry.block_size.get(),
            total_blocks: geometry.total_blocks,
            total_chunks,
            image_checksum: 0,
        };
        self.writer.write_all(&header.encode())?;
        self.geometry = Some(geometry);
        self.declared_chunks = total_chunks;
        Ok(())
    }

    fn data(&mut self, _start: BlockNumber, bytes: &[u8]) -> Result<()> {
        let block_size = self.block_size()?;
        let blocks = gfs_types::usize_to_u32(bytes.len() / block_size as usize, "chunk_blocks")
            .map_err(|e| BuildError::SerializationFormat(e.to_string()))?;
        let total_bytes = u32::try_from(bytes.len() + usize::from(SPARSE_CHUNK_HEADER_SIZE))
            .map_err(|_| {
                BuildError::SerializationFormat(
                    "RAW chunk exceeds the wire format's 32-bit size field".to_owned(),
                )
            })?;

        self.writer
            .write_all(&encode_chunk_header(CHUNK_TYPE_RAW, blocks, total_bytes))?;
        self.writer.write_all(bytes)?;
        self.emitted_chunks += 1;
        Ok(())
    }

    fn skip(&mut self, _start: BlockNumber, blocks: u32) -> Result<()> {
        self.block_size()?;
        self.writer.write_all(&encode_chunk_header(
            CHUNK_TYPE_DONT_CARE,
            blocks,
            u32::from(SPARSE_CHUNK_HEADER_SIZE),
        ))?;
        self.emitted_chunks += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.emitted_chunks != self.declared_chunks {
            return Err(BuildError::SerializationFormat(format!(
                "container declared {} chunks but {} were written",
                self.declared_chunks, self.emitted_chunks
            )));
        }
        self.writer.flush()?;
        Ok(())
    }
}

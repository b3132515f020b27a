//! Android sparse image wire format.
//!
//! Container header (28 bytes, little-endian):
//! magic, major/minor version, header size, chunk-header size, block size,
//! total output blocks, total chunk count, image checksum (unused, zero).
//! Each chunk is a 12-byte header — type, reserved, size in blocks, total
//! byte size including the header — followed by the payload for `RAW`
//! chunks. `DONT_CARE` chunks carry no payload. `FILL` and `CRC32` are
//! format constants the producer side never emits.

use gfs_error::{BuildError, Result};
use gfs_types::{ParseError, put_le_u16, put_le_u32, read_le_u16, read_le_u32};

pub const SPARSE_MAGIC: u32 = 0xED26_FF3A;
pub const SPARSE_MAJOR_VERSION: u16 = 1;
pub const SPARSE_MINOR_VERSION: u16 = 0;
pub const SPARSE_HEADER_SIZE: u16 = 28;
pub const SPARSE_CHUNK_HEADER_SIZE: u16 = 12;

pub const CHUNK_TYPE_RAW: u16 = 0xCAC1;
pub const CHUNK_TYPE_FILL: u16 = 0xCAC2;
pub const CHUNK_TYPE_DONT_CARE: u16 = 0xCAC3;
pub const CHUNK_TYPE_CRC32: u16 = 0xCAC4;

/// Decoded container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

impl SparseHeader {
    /// Encode the 28-byte container header.
    #[must_use]
    pub fn encode(&self) -> [u8; SPARSE_HEADER_SIZE as usize] {
        let mut hdr = [0_u8; SPARSE_HEADER_SIZE as usize];
        put_le_u32(&mut hdr, 0x00, SPARSE_MAGIC);
        put_le_u16(&mut hdr, 0x04, SPARSE_MAJOR_VERSION);
        put_le_u16(&mut hdr, 0x06, SPARSE_MINOR_VERSION);
        put_le_u16(&mut hdr, 0x08, SPARSE_HEADER_SIZE);
        put_le_u16(&mut hdr, 0x0A, SPARSE_CHUNK_HEADER_SIZE);
        put_le_u32(&mut hdr, 0x0C, self.block_size);
        put_le_u32(&mut hdr, 0x10, self.total_blocks);
        put_le_u32(&mut hdr, 0x14, self.total_chunks);
        put_le_u32(&mut hdr, 0x18, self.image_checksum);
        hdr
    }

    /// Decode and validate a container header.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        let magic = read_le_u32(bytes, 0x00)?;
        if magic != SPARSE_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(SPARSE_MAGIC),
                actual: u64::from(magic),
            });
        }
        let major = read_le_u16(bytes, 0x04)?;
        if major != SPARSE_MAJOR_VERSION {
            return Err(ParseError::InvalidField {
                field: "major_version",
                reason: "unsupported major version",
            });
        }
        if read_le_u16(bytes, 0x08)? != SPARSE_HEADER_SIZE {
            return Err(ParseError::InvalidField {
                field: "file_hdr_sz",
                reason: "unexpected header size",
            });
        }
        if read_le_u16(bytes, 0x0A)? != SPARSE_CHUNK_HEADER_SIZE {
            return Err(ParseError::InvalidField {
                field: "chunk_hdr_sz",
                reason: "unexpected chunk header size",
            });
        }
        Ok(Self {
            block_size: read_le_u32(bytes, 0x0C)?,
            total_blocks: read_le_u32(bytes, 0x10)?,
            total_chunks: read_le_u32(bytes, 0x14)?,
            image_checksum: read_le_u32(bytes, 0x18)?,
        })
    }
}

/// Encode a 12-byte chunk header.
#[must_use]
pub(crate) fn encode_chunk_header(chunk_type: u16, blocks: u32, total_bytes: u32) -> [u8; 12] {
    let mut hdr = [0_u8; 12];
    put_le_u16(&mut hdr, 0x00, chunk_type);
    put_le_u16(&mut hdr, 0x02, 0); // reserved
    put_le_u32(&mut hdr, 0x04, blocks);
    put_le_u32(&mut hdr, 0x08, total_bytes);
    hdr
}

/// Decoded chunk kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseChunkKind {
    Raw,
    DontCare,
}

/// One decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseChunk {
    pub kind: SparseChunkKind,
    pub blocks: u32,
    /// Literal payload for `Raw` chunks.
    pub data: Vec<u8>,
}

/// Decode a complete sparse image (verification aid for the serializer).
///
/// Returns the header and every chunk. `FILL` and `CRC32` chunks are
/// rejected as unsupported — this reader only consumes what the producer
/// side emits.
pub fn parse_sparse_image(bytes: &[u8]) -> Result<(SparseHeader, Vec<SparseChunk>)> {
    let header = SparseHeader::parse(bytes)
        .map_err(|e| BuildError::SerializationFormat(e.to_string()))?;

    let mut chunks = Vec::new();
    let mut offset = usize::from(SPARSE_HEADER_SIZE);
    for index in 0..header.total_chunks {
        let chunk_type = read_le_u16(bytes, offset)
            .map_err(|e| BuildError::SerializationFormat(e.to_string()))?;
        let blocks = read_le_u32(bytes, offset + 4)
            .map_err(|e| BuildError::SerializationFormat(e.to_string()))?;
        let total_bytes = read_le_u32(bytes, offset + 8)
            .map_err(|e| BuildError::SerializationFormat(e.to_string()))? as usize;
        let payload_len = total_bytes
            .checked_sub(usize::from(SPARSE_CHUNK_HEADER_SIZE))
            .ok_or_else(|| {
                BuildError::SerializationFormat(format!(
                    "chunk {index}: total size smaller than the chunk header"
                ))
            })?;
        let payload_start = offset + usize::from(SPARSE_CHUNK_HEADER_SIZE);

        let chunk = match chunk_type {
            CHUNK_TYPE_RAW => {
                let expected = u64::from(blocks) * u64::from(header.block_size);
                if payload_len as u64 != expected {
                    return Err(BuildError::SerializationFormat(format!(
                        "chunk {index}: RAW payload of {payload_len} bytes does not match \
                         {blocks} blocks"
                    )));
                }
                let end = payload_start + payload_len;
                if end > bytes.len() {
                    return Err(BuildError::SerializationFormat(format!(
                        "chunk {index}: payload extends past the container"
                    )));
                }
                SparseChunk {
                    kind: SparseChunkKind::Raw,
                    blocks,
                    data: bytes[payload_start..end].to_vec(),
                }
            }
            CHUNK_TYPE_DONT_CARE => {
                if payload_len != 0 {
                    return Err(BuildError::SerializationFormat(format!(
                        "chunk {index}: DONT_CARE chunk carries {payload_len} payload bytes"
                    )));
                }
                SparseChunk {
                    kind: SparseChunkKind::DontCare,
                    blocks,
                    data: Vec::new(),
                }
            }
            CHUNK_TYPE_FILL | CHUNK_TYPE_CRC32 => {
                return Err(BuildError::SerializationFormat(format!(
                    "chunk {index}: type {chunk_type:#06x} is not produced by this builder"
                )));
            }
            other => {
                return Err(BuildError::SerializationFormat(format!(
                    "chunk {index}: unknown chunk type {other:#06x}"
                )));
            }
        };

        chunks.push(chunk);
        offset += total_bytes;
    }

    if offset != bytes.len() {
        return Err(BuildError::SerializationFormat(format!(
            "container has {} trailing bytes after the last chunk",
            bytes.len() - offset
        )));
    }

    let covered: u64 = chunks.iter().map(|c| u64::from(c.blocks)).sum();
    if covered != u64::from(header.total_blocks) {
        return Err(BuildError::SerializationFormat(format!(
            "chunks cover {covered} blocks, header declares {}",
            header.total_blocks
        )));
    }

    Ok((header, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let hdr = SparseHeader {
            block_size: 4096,
            total_blocks: 30,
            total_chunks: 5,
            image_checksum: 0,
        };
        let raw = hdr.encode();
        assert_eq!(raw.len(), 28);
        // Magic bytes, little-endian.
        assert_eq!(&raw[0..4], &[0x3A, 0xFF, 0x26, 0xED]);
        assert_eq!(SparseHeader::parse(&raw).unwrap(), hdr);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut raw = SparseHeader {
            block_size: 4096,
            total_blocks: 1,
            total_chunks: 1,
            image_checksum: 0,
        }
        .encode();
        raw[0] = 0;
        assert!(SparseHeader::parse(&raw).is_err());
    }

    #[test]
    fn chunk_header_layout() {
        let hdr = encode_chunk_header(CHUNK_TYPE_RAW, 5, 12 + 5 * 4096);
        assert_eq!(u16::from_le_bytes([hdr[0], hdr[1]]), 0xCAC1);
        assert_eq!(u16::from_le_bytes([hdr[2], hdr[3]]), 0);
        assert_eq!(u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]), 5);
        assert_eq!(
            u32::from_le_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]),
            12 + 5 * 4096
        );
    }

    #[test]
    fn reader_rejects_fill_chunks() {
        let mut image = Vec::new();
        image.extend_from_slice(
            &SparseHeader {
                block_size: 4096,
                total_blocks: 4,
                total_chunks: 1,
                image_checksum: 0,
            }
            .encode(),
        );
        image.extend_from_slice(&encode_chunk_header(CHUNK_TYPE_FILL, 4, 12 + 4));
        image.extend_from_slice(&0u32.to_le_bytes());

        let err = parse_sparse_image(&image).unwrap_err();
        assert!(matches!(err, BuildError::SerializationFormat(_)));
    }
}

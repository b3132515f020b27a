#![forbid(unsafe_code)]
//! Error types for GenesisFS.
//!
//! # Error Taxonomy
//!
//! GenesisFS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Decoding | `ParseError` | `gfs-types` | Byte-level violations in the decode helpers used to verify built images |
//! | Build | `BuildError` | `gfs-error` (this crate) | User-facing errors for the image builder, serializer, and CLI |
//!
//! `gfs-error` is intentionally independent of `gfs-types` to avoid cyclic
//! dependencies; `ParseError` converts into `BuildError::Inconsistency` at
//! the crate boundaries that use the decode helpers (a decode failure on
//! bytes this builder just produced is a builder bug, not an input error).
//!
//! ## Propagation Policy
//!
//! Every variant is fatal to the whole build. There is no partial-success
//! mode: a build either produces a complete, internally consistent image or
//! nothing. The variants exist to tell the caller *which* component gave up
//! and with what context, not to offer recovery paths.
//!
//! | Variant | Raised by | Meaning |
//! |---------|-----------|---------|
//! | `Config` | layout calculator | Parameters are invalid or the target is too small before any allocation happens |
//! | `OutOfSpace` | region allocator | A block request exceeds the remaining free pool; allocator state is unchanged |
//! | `TooManyExtents` | extent builder | File fragmentation exceeds one overflow extent block (depth 2 is unsupported by design) |
//! | `SerializationFormat` | sparse serializer | Unsupported chunk payload or wire accounting violation; never degrades to truncated output |
//! | `Inconsistency` | any | An internal invariant broke (free-count mismatch, state-machine misuse) — a bug, not bad input |
//! | `Io` | chunk sinks | Propagated verbatim; retry policy belongs to the sink's owner |

use thiserror::Error;

/// Unified error type for all GenesisFS operations.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid or inconsistent build parameters.
    ///
    /// Detected before any allocation; e.g. a requested length smaller than
    /// the minimum viable layout, or an inode size that does not divide the
    /// block size.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The region allocator cannot satisfy a request.
    ///
    /// The allocator's visible free total is unchanged when this is
    /// returned.
    #[error("out of space: requested {requested} blocks, {free} free")]
    OutOfSpace { requested: u32, free: u32 },

    /// A file's fragmentation exceeds what one overflow extent block can
    /// index.
    ///
    /// Extent trees deeper than one level are an explicit unsupported case.
    #[error("too many extents: {extents} regions, at most {max} fit one extent block")]
    TooManyExtents { extents: usize, max: usize },

    /// An unsupported chunk payload kind reached the serializer, or chunk
    /// accounting failed to reconcile.
    ///
    /// Deliberately loud: silently emitting a truncated or zero-filled chunk
    /// is the single worst failure mode of the serializer.
    #[error("sparse serialization error: {0}")]
    SerializationFormat(String),

    /// An internal invariant broke.
    ///
    /// Free-count aggregation mismatches, inode state-machine misuse, or a
    /// decode failure on bytes this builder itself produced. Indicates a
    /// bug in GenesisFS, not bad input.
    #[error("internal consistency error: {0}")]
    Inconsistency(String),

    /// Operating system I/O error from a chunk sink (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias using `BuildError`.
pub type Result<T> = std::result::Result<T, BuildError>;

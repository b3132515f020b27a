#![forbid(unsafe_code)]
//! Filesystem image construction.
//!
//! The pipeline is a strict sequence: [`Layout`] derives the geometry from
//! [`BuildParams`], a [`BuildSession`] reserves metadata and builds every
//! inode (directory tree, queued files, journal, resize inode), and
//! finalization materializes bitmaps, inode tables, group descriptors, and
//! superblock copies into the session's backed-block list. The resulting
//! [`BuiltImage`] serializes exactly once through a
//! [`gfs_sparse::ChunkSink`].
//!
//! Single-threaded by design: one session, one owner, no shared state. A
//! second image starts from a fresh session.
//!
//! ```no_run
//! use gfs_build::{BuildParams, BuildSession};
//! use gfs_sparse::{RawImageSink, SparseImageSink};
//!
//! # fn main() -> gfs_error::Result<()> {
//! let params = BuildParams::new(64 << 20, 4096)?;
//! let mut session = BuildSession::new(params)?;
//! session.add_file(b"boot.cfg", &b"console=ttyS0\n"[..], 0o644, 0, 0)?;
//! let image = session.finish()?;
//!
//! let mut sink = RawImageSink::create("rootfs.img")?;
//! image.write_to(&mut sink)?;
//! # Ok(())
//! # }
//! ```

mod layout;
mod params;
mod session;

pub use layout::Layout;
pub use params::{BuildParams, DEFAULT_INODE_SIZE};
pub use session::{BuildSession, BuiltImage};

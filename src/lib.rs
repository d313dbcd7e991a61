//! Transparent random-access gzip compression over sparse host files.
//!
//! The on-disk format is a 4096-byte header followed by fixed-size physical
//! slots, one per logical block. Each slot holds a type byte and either the
//! raw payload or a single gzip member. All-zero blocks and the unused tail
//! of compressed slots are punched out of the host file, so on extent-based
//! filesystems (xfs, ext4) disk usage tracks the compressed content rather
//! than the logical length. Block devices work as backing targets through
//! the [`SparseFile`] trait.
//!
//! Compression granularity is the logical block, so seeking never requires
//! decompressing more than one block.
//!
//! ```no_run
//! use spgz::{OpenFlags, SpgzFile};
//! use std::io::{Read, Seek, SeekFrom, Write};
//!
//! # fn main() -> spgz::Result<()> {
//! let mut f = SpgzFile::open(
//!     "data.spgz",
//!     OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
//! )?;
//! f.write_all(b"hello")?;
//! f.seek(SeekFrom::Start(0))?;
//! let mut buf = String::new();
//! f.read_to_string(&mut buf)?;
//! f.close()?;
//! # Ok(())
//! # }
//! ```

use slog::Drain;

mod block;
mod errors;
mod file;
mod header;
mod sparse_file;

pub use errors::{Error, Result};
pub use file::{OpenFlags, SpgzFile};
pub use header::DEFAULT_BLOCK_SIZE;
pub use sparse_file::SparseFile;

fn default_logger() -> slog::Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}

//! The fixed 4096-byte header: magic tag plus the block size in 4 KiB units.

use crate::errors::{InvalidFormatSnafu, Result};
use crate::sparse_file::read_full_at;
use positioned_io::{ReadAt, WriteAt};
use snafu::ensure;

pub(crate) const HEADER_SIZE: u64 = 4096;

const MAGIC: &[u8; 8] = b"SPGZ0001";

/// Logical block size used when creating a file without an explicit size:
/// 1 MiB slots, one byte of which holds the block type tag.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024 - 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub block_size: u64,
}

impl Header {
    /// Reads and validates the header. `Ok(None)` means the file is empty;
    /// a short or mismatching prefix is an invalid format. Bytes 12..4095
    /// are reserved and not inspected.
    pub fn read<F: ReadAt>(f: &F) -> Result<Option<Header>> {
        let mut buf = [0u8; 12];
        let n = read_full_at(f, 0, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        ensure!(n == buf.len(), InvalidFormatSnafu);
        ensure!(&buf[..8] == MAGIC, InvalidFormatSnafu);
        let units = u32::from_le_bytes(buf[8..].try_into().unwrap());
        ensure!(units > 0, InvalidFormatSnafu);
        Ok(Some(Header {
            block_size: units as u64 * 4096 - 1,
        }))
    }

    /// Writes the 12 meaningful header bytes. The reserved remainder of the
    /// header area is never written; the first slot write extends the file
    /// past it, leaving a hole.
    pub fn write<F: WriteAt>(f: &mut F, block_size: u64) -> Result<()> {
        let units = ((block_size + 1) / 4096) as u32;
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..].copy_from_slice(&units.to_le_bytes());
        f.write_all_at(0, &buf)?;
        Ok(())
    }

    /// Rounds a requested logical block size up to the nearest `N * 4096 - 1`.
    pub fn round_block_size(requested: u64) -> u64 {
        let units = ((requested + 4096) / 4096).max(1);
        units * 4096 - 1
    }
}

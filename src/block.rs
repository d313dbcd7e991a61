//! The single resident block and its physical slot encoding.

use crate::errors::{InvalidFormatSnafu, PunchHoleNotSupportedSnafu, Result};
use crate::header::HEADER_SIZE;
use crate::sparse_file::{read_full_at, SparseFile};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use snafu::ResultExt;
use std::io::{Read, Write};
use std::mem;

pub(crate) const BLK_UNCOMPRESSED: u8 = 0;
pub(crate) const BLK_COMPRESSED: u8 = 1;

/// One logical block held in memory: the decompressed payload plus the
/// scratch buffer its physical slot is read into and encoded from.
#[derive(Debug)]
pub(crate) struct Block {
    pub num: u64,
    pub dirty: bool,
    /// Physical slot scratch: type byte followed by the stored form.
    raw: Vec<u8>,
    /// Owned payload. Unused while `payload_is_raw`; the payload is then
    /// `raw[1..]` and must be copied out before any mutation.
    buf: Vec<u8>,
    payload_is_raw: bool,
}

impl Block {
    pub fn new() -> Self {
        Self {
            num: 0,
            dirty: false,
            raw: Vec::new(),
            buf: Vec::new(),
            payload_is_raw: false,
        }
    }

    /// The decompressed payload; its length equals the logical content this
    /// block contributes.
    pub fn data(&self) -> &[u8] {
        if self.payload_is_raw {
            &self.raw[1..]
        } else {
            &self.buf
        }
    }

    /// Mutable payload access. The payload must already be owned; see
    /// [`Block::prepare_write`].
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        debug_assert!(!self.payload_is_raw);
        &mut self.buf
    }

    /// Copies a raw-aliased payload into the owned buffer so mutation cannot
    /// corrupt the slot scratch.
    pub fn prepare_write(&mut self) {
        if self.payload_is_raw {
            self.buf.clear();
            self.buf.extend_from_slice(&self.raw[1..]);
            self.payload_is_raw = false;
        }
    }

    /// Loads block `num` from its slot. Returns `Ok(false)` when the slot
    /// lies entirely past the end of the host file; the payload is then
    /// empty, which the write path treats as a fresh writable block.
    pub fn load<F: SparseFile>(&mut self, f: &F, block_size: u64, num: u64) -> Result<bool> {
        self.num = num;
        match self.load_slot(f, block_size, num) {
            Ok(present) => {
                self.dirty = false;
                Ok(present)
            }
            Err(e) => {
                self.buf.clear();
                self.payload_is_raw = false;
                Err(e)
            }
        }
    }

    fn load_slot<F: SparseFile>(&mut self, f: &F, block_size: u64, num: u64) -> Result<bool> {
        self.raw.resize(block_size as usize + 1, 0);
        let n = read_full_at(f, HEADER_SIZE + num * (block_size + 1), &mut self.raw)?;
        if n == 0 {
            self.buf.clear();
            self.payload_is_raw = false;
            return Ok(false);
        }
        self.raw.truncate(n);
        match self.raw[0] {
            BLK_UNCOMPRESSED => {
                self.payload_is_raw = true;
            }
            BLK_COMPRESSED => self.load_compressed(f, block_size)?,
            _ => return InvalidFormatSnafu.fail(),
        }
        Ok(true)
    }

    fn load_compressed<F: SparseFile>(&mut self, f: &F, block_size: u64) -> Result<()> {
        self.buf.clear();
        let mut decoder = GzDecoder::new(&self.raw[1..]);
        decoder.read_to_end(&mut self.buf)?;
        self.payload_is_raw = false;

        // The compressor drops trailing zeros, but only the last block in
        // the file may have a short payload.
        if (self.buf.len() as u64) < block_size {
            let host_len = f.len()?;
            let last_block_num = (host_len - HEADER_SIZE) / (block_size + 1);
            if last_block_num > self.num {
                self.buf.resize(block_size as usize, 0);
            }
        }
        Ok(())
    }

    /// Writes the block into its slot. All-zero payloads become holes,
    /// compressible payloads are stored as a single gzip member with the
    /// unused slot tail punched out, everything else is stored verbatim.
    pub fn store<F: SparseFile>(&mut self, f: &mut F, block_size: u64, truncate: bool) -> Result<()> {
        let slot_start = HEADER_SIZE + self.num * (block_size + 1);
        let cur_offset;

        if is_all_zero(self.data()) {
            let punch_len = self.data().len() as u64 + 1;
            f.punch_hole(slot_start, punch_len)
                .context(PunchHoleNotSupportedSnafu)?;
            cur_offset = slot_start + punch_len;
            if f.len()? < cur_offset {
                // Keep the slot visible to last-block accounting even though
                // its bytes are a hole.
                f.truncate(cur_offset)?;
            }
        } else {
            self.prepare_write();
            self.raw.clear();
            self.raw.push(BLK_COMPRESSED);
            let mut encoder = GzEncoder::new(&mut self.raw, Compression::default());
            encoder.write_all(&self.buf)?;
            encoder.finish()?;

            let n = self.raw.len() as u64;
            // Compression must save at least two filesystem blocks to be
            // worth a fragmented slot.
            if (n as i64) + 1 < self.buf.len() as i64 - 2 * 4096 {
                f.write_all_at(slot_start, &self.raw)?;
                cur_offset = slot_start + n;
                f.punch_hole(cur_offset, block_size - n)
                    .context(PunchHoleNotSupportedSnafu)?;
            } else {
                self.raw.clear();
                self.raw.push(BLK_UNCOMPRESSED);
                self.raw.extend_from_slice(&self.buf);
                f.write_all_at(slot_start, &self.raw)?;
                cur_offset = slot_start + self.buf.len() as u64 + 1;
            }
        }

        self.dirty = false;

        let host_len = f.len()?;
        if truncate || host_len < slot_start + block_size + 1 {
            if host_len > cur_offset {
                f.truncate(cur_offset)?;
            }
        }
        Ok(())
    }
}

/// Word-at-a-time scan; true iff every byte is zero.
pub(crate) fn is_all_zero(buf: &[u8]) -> bool {
    const WORD: usize = mem::size_of::<u64>();
    let mut words = buf.chunks_exact(WORD);
    let tail = words.remainder();
    words.all(|w| u64::from_ne_bytes(w.try_into().unwrap()) == 0) && tail.iter().all(|&b| b == 0)
}

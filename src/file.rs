//! The file-like object layered over compressed blocks in a sparse host.

use crate::block::Block;
use crate::errors::{IsDirectorySnafu, Result};
use crate::header::{Header, DEFAULT_BLOCK_SIZE, HEADER_SIZE};
use crate::sparse_file::SparseFile;
use bitflags::bitflags;
use slog::{debug, o, Logger};
use snafu::ensure;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

bitflags! {
    /// Access-mode flags with the same meaning as a standard file open.
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        /// Create the file, failing if it already exists.
        const CREATE_NEW = 1 << 3;
    }
}

impl OpenFlags {
    fn writable(self) -> bool {
        self.intersects(OpenFlags::WRITE)
    }

    fn open_options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(self.contains(OpenFlags::READ))
            .write(self.contains(OpenFlags::WRITE))
            .create(self.contains(OpenFlags::CREATE))
            .create_new(self.contains(OpenFlags::CREATE_NEW));
        opts
    }
}

/// A random-access file whose contents are stored as independently
/// gzip-compressed blocks in a sparse host file.
///
/// Reads and writes go through a single resident block; changing blocks
/// stores a dirty resident block first, so at most one block is ever dirty.
/// Not safe for concurrent use; callers serialize access.
pub struct SpgzFile<F: SparseFile> {
    f: F,
    block_size: u64,
    block: Block,
    loaded: bool,
    offset: u64,
    logger: Logger,
}

impl SpgzFile<File> {
    /// Opens (or, with a writable mode, creates) a compressed file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<Self> {
        Self::open_with_logger(path, flags, crate::default_logger())
    }

    pub fn open_with_logger<P: AsRef<Path>>(
        path: P,
        flags: OpenFlags,
        logger: Logger,
    ) -> Result<Self> {
        Self::_open(path.as_ref(), flags, DEFAULT_BLOCK_SIZE, logger)
    }

    /// Like [`SpgzFile::open`], but a freshly created file uses the given
    /// logical block size, rounded up to the nearest `N * 4096 - 1`. The
    /// header of an existing file always wins.
    pub fn open_with_block_size<P: AsRef<Path>>(
        path: P,
        flags: OpenFlags,
        block_size: u64,
    ) -> Result<Self> {
        Self::_open(
            path.as_ref(),
            flags,
            Header::round_block_size(block_size),
            crate::default_logger(),
        )
    }

    fn _open(path: &Path, flags: OpenFlags, create_block_size: u64, logger: Logger) -> Result<Self> {
        let logger = logger.new(o!("file" => path.display().to_string()));
        if let Ok(meta) = std::fs::metadata(path) {
            ensure!(!meta.is_dir(), IsDirectorySnafu);
        }
        let file = flags.open_options().open(path)?;
        Self::init(file, flags, create_block_size, logger)
    }

    /// Wraps an already-open host file.
    pub fn from_file(file: File, flags: OpenFlags) -> Result<Self> {
        Self::from_file_with_logger(file, flags, crate::default_logger())
    }

    pub fn from_file_with_logger(file: File, flags: OpenFlags, logger: Logger) -> Result<Self> {
        ensure!(!file.metadata()?.is_dir(), IsDirectorySnafu);
        Self::init(file, flags, DEFAULT_BLOCK_SIZE, logger)
    }

    pub fn from_file_with_block_size(file: File, flags: OpenFlags, block_size: u64) -> Result<Self> {
        ensure!(!file.metadata()?.is_dir(), IsDirectorySnafu);
        Self::init(
            file,
            flags,
            Header::round_block_size(block_size),
            crate::default_logger(),
        )
    }
}

impl<F: SparseFile> SpgzFile<F> {
    /// Wraps a caller-supplied [`SparseFile`].
    pub fn from_sparse_file(f: F, flags: OpenFlags) -> Result<Self> {
        Self::init(f, flags, DEFAULT_BLOCK_SIZE, crate::default_logger())
    }

    pub fn from_sparse_file_with_logger(f: F, flags: OpenFlags, logger: Logger) -> Result<Self> {
        Self::init(f, flags, DEFAULT_BLOCK_SIZE, logger)
    }

    pub fn from_sparse_file_with_block_size(
        f: F,
        flags: OpenFlags,
        block_size: u64,
    ) -> Result<Self> {
        Self::init(
            f,
            flags,
            Header::round_block_size(block_size),
            crate::default_logger(),
        )
    }

    fn init(mut f: F, flags: OpenFlags, create_block_size: u64, logger: Logger) -> Result<Self> {
        let block_size = match Header::read(&f)? {
            Some(header) => header.block_size,
            None => {
                // A brand-new file; only writable modes may lay down the
                // header.
                if !flags.writable() {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                Header::write(&mut f, create_block_size)?;
                create_block_size
            }
        };
        debug!(logger, "opened"; "block_size" => block_size);
        Ok(SpgzFile {
            f,
            block_size,
            block: Block::new(),
            loaded: false,
            offset: 0,
            logger,
        })
    }

    /// Logical block size decoded from the header.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Current logical position.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Makes the block containing the current offset resident, storing a
    /// dirty foreign block first. Returns false when the slot lies past the
    /// end of the host file.
    fn ensure_loaded(&mut self) -> Result<bool> {
        let num = self.offset / self.block_size;
        if self.loaded && num == self.block.num {
            return Ok(true);
        }
        let block_size = self.block_size;
        let Self { f, block, logger, .. } = self;
        if block.dirty {
            debug!(logger, "storing block"; "num" => block.num);
            block.store(f, block_size, false)?;
        }
        debug!(logger, "loading block"; "num" => num);
        let present = block.load(f, block_size, num)?;
        self.loaded = true;
        Ok(present)
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.loaded && self.block.dirty {
            let block_size = self.block_size;
            let Self { f, block, logger, .. } = self;
            debug!(logger, "storing block"; "num" => block.num);
            block.store(f, block_size, false)?;
        }
        Ok(())
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_loaded()?;
        let o = (self.offset - self.block.num * self.block_size) as usize;
        let data = self.block.data();
        if o >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - o);
        buf[..n].copy_from_slice(&data[o..o + n]);
        self.offset += n as u64;
        Ok(n)
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            // A slot past the end of the host file is an empty writable
            // block, not an error.
            self.ensure_loaded()?;
            let o = (self.offset - self.block.num * self.block_size) as usize;
            let new_len = (o + rest.len()).min(self.block_size as usize);
            self.block.prepare_write();
            let data = self.block.data_mut();
            if new_len > data.len() {
                data.resize(new_len, 0);
            }
            let n = new_len - o;
            data[o..new_len].copy_from_slice(&rest[..n]);
            self.block.dirty = true;
            self.offset += n as u64;
            rest = &rest[n..];
        }
        Ok(buf.len())
    }

    /// Logical size, derived from the host file length and the payload
    /// length of the last block; there is no stored size field.
    pub fn size(&self) -> Result<u64> {
        let host_len = self.f.len()?;
        if host_len <= HEADER_SIZE {
            return Ok(0);
        }
        let last_block_num = (host_len - HEADER_SIZE) / (self.block_size + 1);
        // The resident block answers directly when it is the last block, or
        // when unstored dirty data extends the file past the last slot.
        if self.loaded
            && (last_block_num == self.block.num
                || (self.block.dirty && last_block_num < self.block.num))
        {
            return Ok(self.block.num * self.block_size + self.block.data().len() as u64);
        }
        let mut last = Block::new();
        last.load(&self.f, self.block_size, last_block_num)?;
        Ok(last_block_num * self.block_size + last.data().len() as u64)
    }

    /// Truncates (or extends) the logical content to exactly `size` bytes.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let block_num = size / self.block_size;
        let new_len = (size - block_num * self.block_size) as usize;

        if self.loaded && self.block.num > block_num {
            // The resident block lies wholly past the new end.
            self.loaded = false;
            self.block.dirty = false;
        }

        if new_len == 0 {
            // The new end lands exactly between blocks: drop the boundary
            // slot entirely, making the previous block the last one.
            if self.loaded && self.block.num == block_num {
                self.loaded = false;
                self.block.dirty = false;
            }
            self.f.truncate(HEADER_SIZE + block_num * (self.block_size + 1))?;
            return Ok(());
        }

        if self.loaded && self.block.num == block_num {
            let block_size = self.block_size;
            let Self { f, block, .. } = self;
            if block.data().len() != new_len {
                block.prepare_write();
                block.data_mut().resize(new_len, 0);
                block.store(f, block_size, true)?;
            }
            return Ok(());
        }

        let mut block = Block::new();
        block.load(&self.f, self.block_size, block_num)?;
        if block.data().len() != new_len {
            block.prepare_write();
            block.data_mut().resize(new_len, 0);
            block.store(&mut self.f, self.block_size, true)?;
        }
        Ok(())
    }

    /// Flushes the dirty resident block, then syncs the host file.
    pub fn sync(&mut self) -> Result<()> {
        self.flush_block()?;
        self.f.sync()?;
        Ok(())
    }

    /// Flushes any dirty state and consumes the file. Unlike dropping, this
    /// reports flush failures to the caller.
    pub fn close(mut self) -> Result<()> {
        self.flush_block()
    }

    /// Streams everything from the current offset into `w`; the bulk
    /// counterpart of repeated reads.
    pub fn copy_to<W: Write + ?Sized>(&mut self, w: &mut W) -> Result<u64> {
        let mut total = 0u64;
        loop {
            self.ensure_loaded()?;
            let o = (self.offset - self.block.num * self.block_size) as usize;
            let data = self.block.data();
            if o >= data.len() {
                return Ok(total);
            }
            let n = match w.write(&data[o..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.offset += n as u64;
            total += n as u64;
        }
    }

    /// Fills the file from `r` starting at the current offset, stopping at
    /// the source's end of input.
    pub fn copy_from<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<u64> {
        let mut total = 0u64;
        let block_size = self.block_size as usize;
        loop {
            self.ensure_loaded()?;
            let o = (self.offset - self.block.num * self.block_size) as usize;
            self.block.prepare_write();
            let data = self.block.data_mut();
            let old_len = data.len();
            data.resize(block_size, 0);
            let n = loop {
                match r.read(&mut data[o..]) {
                    Ok(n) => break n,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        data.truncate(old_len);
                        return Err(e.into());
                    }
                }
            };
            if n == 0 {
                data.truncate(old_len);
                return Ok(total);
            }
            data.truncate(old_len.max(o + n));
            self.block.dirty = true;
            self.offset += n as u64;
            total += n as u64;
        }
    }
}

impl<F: SparseFile> Read for SpgzFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_inner(buf).map_err(Into::into)
    }
}

impl<F: SparseFile> Write for SpgzFile<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_inner(buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_block().map_err(Into::into)
    }
}

impl<F: SparseFile> Seek for SpgzFile<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => o as i128,
            SeekFrom::Current(d) => self.offset as i128 + d as i128,
            SeekFrom::End(d) => self.size().map_err(io::Error::from)? as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }
        self.offset = target as u64;
        Ok(self.offset)
    }
}

impl<F: SparseFile> Drop for SpgzFile<F> {
    fn drop(&mut self) {
        // A dirty block must not be lost on drop; errors here have nowhere
        // to go, close() reports them instead.
        let _ = self.flush_block();
    }
}

impl<F: SparseFile> fmt::Debug for SpgzFile<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpgzFile")
            .field("block_size", &self.block_size)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

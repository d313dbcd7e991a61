//! The sparse host-file abstraction the block store sits on.

use positioned_io::{ReadAt, WriteAt};
use std::fs::File;
use std::io;

/// A positionally addressed file supporting byte-range deallocation.
///
/// `punch_hole` must leave subsequent reads of the range returning zeros
/// while letting the filesystem reclaim the physical space. Hosts that cannot
/// punch holes must fail the call so stores can surface
/// [`Error::PunchHoleNotSupported`](crate::Error::PunchHoleNotSupported).
pub trait SparseFile: ReadAt + WriteAt {
    /// Deallocates `length` bytes starting at `offset`.
    fn punch_hole(&mut self, offset: u64, length: u64) -> io::Result<()>;

    /// Truncates or extends the file to exactly `length` bytes.
    fn truncate(&mut self, length: u64) -> io::Result<()>;

    /// Current length of the file.
    fn len(&self) -> io::Result<u64>;

    /// Flushes file contents to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl SparseFile for File {
    fn punch_hole(&mut self, offset: u64, length: u64) -> io::Result<()> {
        punch_hole(self, offset, length)
    }

    fn truncate(&mut self, length: u64) -> io::Result<()> {
        self.set_len(length)
    }

    fn len(&self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

#[cfg(target_os = "linux")]
fn punch_hole(file: &File, offset: u64, length: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let res = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
            offset as libc::off_t,
            length as libc::off_t,
        )
    };
    if res == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn punch_hole(_file: &File, _offset: u64, _length: u64) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Reads at `pos` until `buf` is full or the file ends. The result is less
/// than `buf.len()` only at end of file.
pub(crate) fn read_full_at<F: ReadAt + ?Sized>(
    f: &F,
    mut pos: u64,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match f.read_at(pos, &mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                pos += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}


#[cfg(test)]
mod tests {
    use super::testing::MemSparseFile;
    use super::*;

    #[test]
    fn read_full_at_stops_at_eof() {
        let f = MemSparseFile {
            data: vec![1, 2, 3, 4, 5],
            ..Default::default()
        };
        let mut buf = [0u8; 8];
        assert_eq!(read_full_at(&f, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(read_full_at(&f, 3, &mut buf).unwrap(), 2);
        assert_eq!(read_full_at(&f, 5, &mut buf).unwrap(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn punch_hole_reads_back_zeros() {
        use positioned_io::WriteAt;

        let mut file = tempfile::tempfile().unwrap();
        file.write_all_at(0, &[0xAB; 8192]).unwrap();
        SparseFile::punch_hole(&mut file, 0, 4096).unwrap();

        let mut buf = [0u8; 8192];
        read_full_at(&file, 0, &mut buf).unwrap();
        assert!(buf[..4096].iter().all(|&b| b == 0));
        assert!(buf[4096..].iter().all(|&b| b == 0xAB));
        assert_eq!(SparseFile::len(&file).unwrap(), 8192);
    }
}

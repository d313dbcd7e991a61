//! A write adapter that turns runs of zero bytes into filesystem holes.
//!
//! Instead of writing zeros, [`SparseWriter`] accumulates their length and
//! seeks over them when the next non-zero data arrives. On filesystems with
//! sparse file support the skipped ranges are never allocated. A trailing run
//! of zeros is materialized by [`SparseWriter::finish`], which writes a single
//! zero byte at the final position so the file ends at the correct length.

use std::io;
use std::io::{Seek, SeekFrom, Write};
use std::mem;

const WORD: usize = mem::size_of::<u64>();

/// Granularity of the zero-run scan. Each incoming buffer is examined in
/// segments of this size; a segment is either skipped whole or written whole.
const SEGMENT_SIZE: usize = 32 * 1024;

/// Wraps a seekable sink, replacing zero runs with seeks.
///
/// The caller must invoke [`finish`](SparseWriter::finish) after the last
/// write; dropping the writer with zeros still pending loses the file tail.
pub struct SparseWriter<W> {
    inner: W,
    pending: u64,
}

impl<W> SparseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, pending: 0 }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Number of zero bytes seeked over but not yet materialized.
    pub fn pending(&self) -> u64 {
        self.pending
    }
}

impl<W: Write + Seek> SparseWriter<W> {
    /// Materializes any pending trailing zeros and flushes the sink.
    ///
    /// A bare seek does not move the end-of-file marker, so the last pending
    /// byte is written out as a literal zero.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.pending > 0 {
            self.inner.seek(SeekFrom::Current(self.pending as i64 - 1))?;
            self.inner.write_all(&[0])?;
            self.pending = 0;
        }
        self.inner.flush()
    }
}

impl<W: Write + Seek> Write for SparseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for segment in buf.chunks(SEGMENT_SIZE) {
            if is_zero(segment) {
                self.pending += segment.len() as u64;
            } else {
                if self.pending > 0 {
                    self.inner.seek(SeekFrom::Current(self.pending as i64))?;
                    self.pending = 0;
                }
                self.inner.write_all(segment)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn is_zero(buf: &[u8]) -> bool {
    let mut words = buf.chunks_exact(WORD);
    let tail = words.remainder();
    words.all(|w| u64::from_ne_bytes(w.try_into().unwrap()) == 0) && tail.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Seek, SeekFrom};

    #[test]
    fn is_zero_scan() {
        assert!(is_zero(&[]));
        assert!(is_zero(&[0; 17]));
        assert!(!is_zero(&[0, 0, 0, 0, 0, 0, 0, 0, 1]));
        let mut buf = vec![0u8; 1024];
        buf[1023] = 0xFF;
        assert!(!is_zero(&buf));
    }

    #[test]
    fn plain_data_passes_through() {
        let mut w = SparseWriter::new(Cursor::new(Vec::new()));
        w.write_all(b"hello world").unwrap();
        w.finish().unwrap();
        assert_eq!(w.into_inner().into_inner(), b"hello world");
    }

    #[test]
    fn trailing_zeros_set_final_length() {
        let mut w = SparseWriter::new(Cursor::new(Vec::new()));
        w.write_all(b"abc").unwrap();
        w.write_all(&[0u8; 100]).unwrap();
        assert_eq!(w.pending(), 100);
        w.finish().unwrap();
        let out = w.into_inner().into_inner();
        assert_eq!(out.len(), 103);
        assert_eq!(&out[..3], b"abc");
        assert!(out[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zeros_only() {
        let mut w = SparseWriter::new(Cursor::new(Vec::new()));
        w.write_all(&[0u8; 64]).unwrap();
        w.finish().unwrap();
        assert_eq!(w.into_inner().into_inner(), vec![0u8; 64]);
    }

    #[test]
    fn finish_without_pending_is_noop() {
        let mut w = SparseWriter::new(Cursor::new(Vec::new()));
        w.finish().unwrap();
        assert!(w.into_inner().into_inner().is_empty());
    }

    #[test]
    fn hole_in_the_middle_round_trips() {
        let mut content = Vec::new();
        content.extend_from_slice(&[0xAB; 40]);
        content.extend_from_slice(&vec![0u8; 2 * SEGMENT_SIZE]);
        content.extend_from_slice(&[0xCD; 40]);

        let mut file = tempfile::tempfile().unwrap();
        let mut w = SparseWriter::new(&mut file);
        w.write_all(&content).unwrap();
        w.finish().unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn sparse_file_ends_at_logical_length() {
        let mut file = tempfile::tempfile().unwrap();
        let mut w = SparseWriter::new(&mut file);
        w.write_all(&[1u8; 10]).unwrap();
        w.write_all(&vec![0u8; SEGMENT_SIZE]).unwrap();
        w.finish().unwrap();
        let len = file.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(len, 10 + SEGMENT_SIZE as u64);
    }
}

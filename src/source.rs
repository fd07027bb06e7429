//! Byte sources feeding the demuxer.
//!
//! Pull mode reads ranges on demand through [`ByteSource`]. Push mode
//! accumulates caller-delivered chunks in a [`PushAdapter`] until a whole
//! KLV packet is available.

use std::io::{Read, Seek, SeekFrom};

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Random-access byte source
///
/// Offsets are absolute file offsets, run-in included.
pub trait ByteSource: Send {
    /// Read up to `size` bytes at `offset`.
    ///
    /// May return fewer bytes near the end of the source. Reading at or past
    /// the end returns [`Error::EndOfStream`].
    fn pull_range(&mut self, offset: u64, size: usize) -> Result<Bytes>;

    /// Total size in bytes, if known.
    fn size(&mut self) -> Option<u64>;

    /// Read exactly `size` bytes. A short read is end of stream.
    fn pull_exact(&mut self, offset: u64, size: usize) -> Result<Bytes> {
        let data = self.pull_range(offset, size)?;
        if data.len() != size {
            tracing::debug!(offset, size, got = data.len(), "short read");
            return Err(Error::EndOfStream);
        }
        Ok(data)
    }
}

/// Byte source over any `Read + Seek` value (files, cursors)
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
    size: Option<u64>,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, size: None }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek + Send> ByteSource for ReaderSource<R> {
    fn pull_range(&mut self, offset: u64, size: usize) -> Result<Bytes> {
        if let Some(total) = self.size() {
            if offset >= total {
                return Err(Error::EndOfStream);
            }
        }

        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buffer = BytesMut::zeroed(size);
        let mut filled = 0;
        while filled < size {
            match self.inner.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 && size > 0 {
            return Err(Error::EndOfStream);
        }
        buffer.truncate(filled);
        Ok(buffer.freeze())
    }

    fn size(&mut self) -> Option<u64> {
        if self.size.is_none() {
            let current = self.inner.stream_position().ok()?;
            let end = self.inner.seek(SeekFrom::End(0)).ok()?;
            self.inner.seek(SeekFrom::Start(current)).ok()?;
            self.size = Some(end);
        }
        self.size
    }
}

/// Byte source over in-memory data
///
/// Slicing shares the underlying buffer, so payloads are zero-copy.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn pull_range(&mut self, offset: u64, size: usize) -> Result<Bytes> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Err(Error::EndOfStream);
        }
        let start = offset as usize;
        let end = start.saturating_add(size).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Byte source over a memory-mapped file
#[cfg(feature = "memory-mapped")]
#[derive(Debug, Clone)]
pub struct MmapSource {
    mmap: std::sync::Arc<memmap2::Mmap>,
}

#[cfg(feature = "memory-mapped")]
impl MmapSource {
    pub fn new(mmap: memmap2::Mmap) -> Self {
        Self {
            mmap: std::sync::Arc::new(mmap),
        }
    }

    pub fn from_arc(mmap: std::sync::Arc<memmap2::Mmap>) -> Self {
        Self { mmap }
    }
}

#[cfg(feature = "memory-mapped")]
impl ByteSource for MmapSource {
    fn pull_range(&mut self, offset: u64, size: usize) -> Result<Bytes> {
        let len = self.mmap.len();
        let start = usize::try_from(offset).map_err(|_| Error::EndOfStream)?;
        if start >= len {
            return Err(Error::EndOfStream);
        }
        let end = start.checked_add(size).map_or(len, |end| end.min(len));
        // Returns None instead of panicking
        let slice = self.mmap.get(start..end).ok_or(Error::EndOfStream)?;
        Ok(Bytes::copy_from_slice(slice))
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.mmap.len() as u64)
    }
}

/// Accumulates pushed chunks until complete packets can be taken
#[derive(Debug, Default)]
pub struct PushAdapter {
    buffer: BytesMut,
}

impl PushAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Look at the first `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.buffer.get(..n)
    }

    /// Drop up to `n` bytes from the front.
    pub fn flush(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.advance(n);
    }

    /// Take exactly `n` bytes from the front.
    pub fn take(&mut self, n: usize) -> Option<Bytes> {
        if self.buffer.len() < n {
            return None;
        }
        Some(self.buffer.split_to(n).freeze())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_source_short_read() {
        let mut src = ReaderSource::new(Cursor::new(vec![1u8, 2, 3, 4, 5]));
        assert_eq!(src.size(), Some(5));
        assert_eq!(&src.pull_range(1, 2).unwrap()[..], &[2, 3]);
        assert_eq!(&src.pull_range(3, 10).unwrap()[..], &[4, 5]);
        assert!(src.pull_range(5, 1).unwrap_err().is_eos());
        assert!(src.pull_exact(3, 10).unwrap_err().is_eos());
    }

    #[test]
    fn test_memory_source_slices() {
        let mut src = MemorySource::new(vec![9u8; 32]);
        assert_eq!(src.pull_exact(30, 2).unwrap().len(), 2);
        assert!(src.pull_range(32, 1).unwrap_err().is_eos());
    }

    #[test]
    fn test_push_adapter() {
        let mut adapter = PushAdapter::new();
        adapter.push(&[1, 2, 3]);
        adapter.push(&[4, 5]);
        assert_eq!(adapter.available(), 5);
        assert_eq!(adapter.peek(2), Some(&[1u8, 2][..]));
        assert!(adapter.peek(6).is_none());
        adapter.flush(1);
        assert_eq!(&adapter.take(3).unwrap()[..], &[2, 3, 4]);
        assert!(adapter.take(2).is_none());
        adapter.clear();
        assert_eq!(adapter.available(), 0);
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! The random-access byte source contract (§6) and the bounded lazy readers
//! built on top of it (§4.4).
//!
//! No [`Source`] implementation advances a shared cursor: every read is
//! positional, so two readers over the same source can be used
//! concurrently, provided the underlying source supports concurrent
//! positional reads (true of file descriptors opened for reading).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

/// Minimum contract for a byte source this crate can parse: positional
/// reads at `(buf, offset)`, with no shared-cursor side effects.
pub trait Source: Send + Sync {
    /// Reads as many bytes as are available into `buf`, starting at
    /// `offset`, returning the number of bytes read (which may be less
    /// than `buf.len()` at end-of-file).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source ended before the requested range was filled",
                ));
            }
            filled += n;
        }
        Ok(())
    }
}

impl Source for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.len() {
            return Ok(0);
        }
        let available = &self[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

impl Source for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }
}

#[cfg(unix)]
impl Source for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl Source for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Wraps any `Read + Seek` in a positional-read adapter by serializing
/// access through a mutex. Used for sources that are neither a raw `File`
/// nor an in-memory buffer (e.g. a caller's custom reader).
pub struct SeekSource<T>(Mutex<T>);

impl<T> SeekSource<T> {
    /// Wraps `inner` as a [`Source`].
    pub fn new(inner: T) -> Self {
        Self(Mutex::new(inner))
    }

    /// Unwraps back into the underlying reader.
    pub fn into_inner(self) -> T {
        self.0.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Read + Seek + Send> Source for SeekSource<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.seek(SeekFrom::Start(offset))?;
        guard.read(buf)
    }
}

/// A bounded reader over a `[start, start + len)` window of a [`Source`],
/// anchored at its own independent offset. Used for segment and section
/// payloads (§4.4): opening one never disturbs the source's own cursor,
/// and multiple readers over the same source may be used at once.
pub struct BoundedReader<S> {
    source: S,
    start: u64,
    len: u64,
    pos: u64,
}

impl<S: AsRef<dyn Source>> BoundedReader<S> {
    /// Creates a reader bounded to `[start, start + len)` within `source`.
    pub fn new(source: S, start: u64, len: u64) -> Self {
        Self {
            source,
            start,
            len,
            pos: 0,
        }
    }

    /// Reads the entire bounded range into a freshly allocated `Vec<u8>`.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len as usize];
        self.source.as_ref().read_exact_at(self.start, &mut buf)?;
        Ok(buf)
    }
}

impl<S: AsRef<dyn Source>> Read for BoundedReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self
            .source
            .as_ref()
            .read_at(self.start + self.pos, &mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: AsRef<dyn Source>> Seek for BoundedReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.len as i64 + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of bounded region",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn slice_source_reads_window() {
        let data: Vec<u8> = (0..32u8).collect();
        let mut buf = [0u8; 4];
        data.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn slice_source_short_read_at_eof() {
        let data = vec![1u8, 2, 3];
        let mut buf = [0u8; 8];
        let n = data.read_at(1, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn bounded_reader_reads_exact_window() {
        let data: Arc<dyn Source> = Arc::new((0..64u8).collect::<Vec<u8>>());
        let reader = BoundedReader::new(data, 8, 16);
        let bytes = reader.read_all().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], 8);
        assert_eq!(bytes[15], 23);
    }

    #[test]
    fn concurrent_bounded_readers_do_not_interfere() {
        let data: Arc<dyn Source> = Arc::new((0..64u8).collect::<Vec<u8>>());
        let a = BoundedReader::new(data.clone(), 0, 8);
        let b = BoundedReader::new(data, 32, 8);
        assert_eq!(a.read_all().unwrap(), (0..8).collect::<Vec<u8>>());
        assert_eq!(b.read_all().unwrap(), (32..40).collect::<Vec<u8>>());
    }
}

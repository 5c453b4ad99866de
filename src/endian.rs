/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Byte order handling and fixed-width integer reads.
//!
//! Mach-O files declare their byte order implicitly via the magic number
//! (§4.2 of the design). Every fixed-width field after that point is read
//! using [`scroll::Pread`] with the matching [`scroll::Endian`] context.

use scroll::{Pread, BE, LE};

use crate::error::{Error, Result};

/// The byte order a Mach-O file was written in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

impl ByteOrder {
    fn scroll_endian(self) -> scroll::Endian {
        match self {
            ByteOrder::Big => BE,
            ByteOrder::Little => LE,
        }
    }

    /// Reads a `u16` at `offset` in `buf` using this byte order.
    pub fn read_u16(self, buf: &[u8], offset: usize) -> Result<u16> {
        buf.pread_with(offset, self.scroll_endian())
            .map_err(|_| Error::CommandBlockTooSmall { offset: offset as u64 })
    }

    /// Reads a `u32` at `offset` in `buf` using this byte order.
    pub fn read_u32(self, buf: &[u8], offset: usize) -> Result<u32> {
        buf.pread_with(offset, self.scroll_endian())
            .map_err(|_| Error::CommandBlockTooSmall { offset: offset as u64 })
    }

    /// Reads a `u64` at `offset` in `buf` using this byte order.
    pub fn read_u64(self, buf: &[u8], offset: usize) -> Result<u64> {
        buf.pread_with(offset, self.scroll_endian())
            .map_err(|_| Error::CommandBlockTooSmall { offset: offset as u64 })
    }

    /// Reads an `i32` at `offset` in `buf` using this byte order.
    pub fn read_i32(self, buf: &[u8], offset: usize) -> Result<i32> {
        buf.pread_with(offset, self.scroll_endian())
            .map_err(|_| Error::CommandBlockTooSmall { offset: offset as u64 })
    }
}

/// Reads a NUL-terminated C string starting at `offset` within `buf`.
///
/// Returns the bytes before the NUL (or before the end of `buf`, if no NUL
/// is present). Used for names embedded in load commands and for string
/// table lookups, where the string is borrowed from its owning payload
/// rather than copied until the caller needs an owned `String`.
pub fn read_cstr_at(buf: &[u8], offset: usize) -> &[u8] {
    if offset >= buf.len() {
        return &[];
    }
    let tail = &buf[offset..];
    let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    &tail[..len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let buf = [0x01, 0x00, 0x00, 0x00];
        assert_eq!(ByteOrder::Little.read_u32(&buf, 0).unwrap(), 1);
        assert_eq!(ByteOrder::Big.read_u32(&buf, 0).unwrap(), 0x01000000);
    }

    #[test]
    fn cstr_stops_at_nul() {
        let buf = b"hello\0world";
        assert_eq!(read_cstr_at(buf, 0), b"hello");
        assert_eq!(read_cstr_at(buf, 6), b"world");
    }

    #[test]
    fn cstr_out_of_range_is_empty() {
        let buf = b"hi";
        assert_eq!(read_cstr_at(buf, 10), b"");
    }
}

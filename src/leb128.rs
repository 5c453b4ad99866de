/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! ULEB128 / SLEB128 variable-length integer codecs.
//!
//! These encodings show up throughout Mach-O: the export trie (§4.8) uses
//! them for terminal sizes, child offsets and export addresses; dyld's
//! rebase/bind opcode streams use them too, though decoding those streams is
//! outside this crate's scope.
//!
//! The accumulator is always widened to `u64` before shifting, even for the
//! first byte. A 32-bit intermediate shift (as some Mach-O tooling uses)
//! silently truncates any value with a bit set at or above bit 31; see the
//! "Open Questions" entry in the spec this crate implements.

use std::io::{self, Read};

use crate::error::{Error, Result};

fn io_err_to_error(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Leb128UnexpectedEof
    } else {
        Error::Io(err)
    }
}

/// Decodes a ULEB128 value from `buf` starting at `offset`.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn read_uleb128(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut pos = offset;
    loop {
        let byte = *buf.get(pos).ok_or(Error::Leb128UnexpectedEof)?;
        pos += 1;
        if shift < 64 {
            result |= u64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((result, pos - offset))
}

/// Decodes a ULEB128 value from an arbitrary byte reader.
///
/// End-of-input before a continuation-clear byte is reported as
/// [`Error::Leb128UnexpectedEof`]; any other I/O failure is reported as
/// [`Error::Io`].
pub fn read_uleb128_from<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let mut byte = [0u8];
        reader.read_exact(&mut byte).map_err(io_err_to_error)?;
        let byte = byte[0];
        if shift < 64 {
            result |= u64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(result)
}

/// Encodes `value` as ULEB128, appending the bytes to `out`.
///
/// Always emits at least one byte, even for zero.
pub fn write_uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decodes a SLEB128 value from `buf` starting at `offset`.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn read_sleb128(buf: &[u8], offset: usize) -> Result<(i64, usize)> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut pos = offset;
    let mut byte;
    loop {
        byte = *buf.get(pos).ok_or(Error::Leb128UnexpectedEof)?;
        pos += 1;
        if shift < 64 {
            result |= i64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= -(1i64 << shift);
    }
    Ok((result, pos - offset))
}

/// Decodes a SLEB128 value from an arbitrary byte reader. See
/// [`read_uleb128_from`] for the error-mapping convention.
pub fn read_sleb128_from<R: Read>(reader: &mut R) -> Result<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut byte;
    loop {
        let mut b = [0u8];
        reader.read_exact(&mut b).map_err(io_err_to_error)?;
        byte = b[0];
        if shift < 64 {
            result |= i64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= -(1i64 << shift);
    }
    Ok(result)
}

/// Encodes `value` as SLEB128, appending the bytes to `out`.
pub fn write_sleb128(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        // Arithmetic shift, sign-extending.
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn uleb128_zero() {
        let (v, n) = read_uleb128(&[0x00], 0).unwrap();
        assert_eq!(v, 0);
        assert_eq!(n, 1);
    }

    #[test]
    fn uleb128_624485() {
        let (v, n) = read_uleb128(&[0xE5, 0x8E, 0x26], 0).unwrap();
        assert_eq!(v, 624485);
        assert_eq!(n, 3);
    }

    #[test]
    fn uleb128_padded_zero() {
        let (v, n) = read_uleb128(&[0x80, 0x80, 0x80, 0x00], 0).unwrap();
        assert_eq!(v, 0);
        assert_eq!(n, 4);
    }

    #[test]
    fn sleb128_negative() {
        let (v, n) = read_sleb128(&[0xC0, 0xBB, 0x78], 0).unwrap();
        assert_eq!(v, -123456);
        assert_eq!(n, 3);
    }

    #[test]
    fn uleb128_truncated_is_eof() {
        let err = read_uleb128(&[0x80, 0x80], 0).unwrap_err();
        assert!(matches!(err, Error::Leb128UnexpectedEof));
    }

    #[test]
    fn uleb128_wide_value_does_not_truncate_at_bit_31() {
        // 1 << 40, which a 32-bit intermediate shift would lose entirely.
        let value: u64 = 1u64 << 40;
        let mut buf = Vec::new();
        write_uleb128(value, &mut buf);
        let (decoded, _) = read_uleb128(&buf, 0).unwrap();
        assert_eq!(decoded, value);
    }

    proptest! {
        #[test]
        fn uleb128_roundtrip(value: u64) {
            let mut buf = Vec::new();
            write_uleb128(value, &mut buf);
            let (decoded, consumed) = read_uleb128(&buf, 0).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buf.len());
        }

        #[test]
        fn sleb128_roundtrip(value: i64) {
            let mut buf = Vec::new();
            write_sleb128(value, &mut buf);
            let (decoded, consumed) = read_sleb128(&buf, 0).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buf.len());
        }
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Segment and section decoding (§4.4), including relocation entries.

use std::sync::Arc;

use crate::endian::{read_cstr_at, ByteOrder};
use crate::error::{Error, Result};
use crate::source::{BoundedReader, Source};

/// Clears the trailing NULs a fixed 16-byte `segname`/`sectname` field is
/// padded with and decodes it as UTF-8 (lossily; Mach-O names are
/// conventionally ASCII).
fn fixed_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(read_cstr_at(bytes, 0)).into_owned()
}

/// Bit set in a relocation's first word when it is a scattered relocation
/// rather than a plain one.
const R_SCATTERED: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// A plain (non-scattered) relocation entry.
    Plain {
        address: i32,
        symbolnum: u32,
        pc_relative: bool,
        length: u8,
        is_extern: bool,
        kind: u8,
    },
    /// A scattered relocation entry, used on 32-bit architectures where the
    /// relocated value doesn't correspond to a symbol table entry.
    Scattered {
        kind: u8,
        length: u8,
        pc_relative: bool,
        address: u32,
        value: i32,
    },
}

/// Decodes a relocation's two 32-bit words, already corrected into host
/// byte order, into a [`Relocation`].
///
/// The non-scattered `r_symbolnum`/flags word is a C bitfield
/// (`struct relocation_info`), and the bitfield packing order follows the
/// byte order the file was written in: little-endian packs
/// `value:24 | pcrel:1 | length:2 | extern:1 | type:4` starting from the
/// least-significant bit, while big-endian packs the same fields starting
/// from the most-significant bit (`value = symnum >> 8`). Scattered
/// relocations use a single bit layout regardless of byte order (§4.4).
fn parse_relocation(word0: u32, word1: u32, byte_order: ByteOrder) -> Relocation {
    if word0 & R_SCATTERED != 0 {
        Relocation::Scattered {
            kind: ((word0 >> 24) & 0xf) as u8,
            length: ((word0 >> 28) & 0x3) as u8,
            pc_relative: (word0 >> 30) & 0x1 != 0,
            address: word0 & 0x00ff_ffff,
            value: word1 as i32,
        }
    } else {
        let (symbolnum, pc_relative, length, is_extern, kind) = match byte_order {
            ByteOrder::Little => (
                word1 & 0x00ff_ffff,
                (word1 >> 24) & 0x1 != 0,
                ((word1 >> 25) & 0x3) as u8,
                (word1 >> 27) & 0x1 != 0,
                ((word1 >> 28) & 0xf) as u8,
            ),
            ByteOrder::Big => (
                word1 >> 8,
                (word1 >> 7) & 0x1 != 0,
                ((word1 >> 5) & 0x3) as u8,
                (word1 >> 4) & 0x1 != 0,
                (word1 & 0xf) as u8,
            ),
        };
        Relocation::Plain {
            address: word0 as i32,
            symbolnum,
            pc_relative,
            length,
            is_extern,
            kind,
        }
    }
}

fn read_relocations(
    source: &Arc<dyn Source>,
    reloff: u32,
    nreloc: u32,
    byte_order: ByteOrder,
) -> Result<Vec<Relocation>> {
    if nreloc == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; nreloc as usize * 8];
    source
        .as_ref()
        .read_exact_at(reloff as u64, &mut buf)
        .map_err(Error::Io)?;
    let mut out = Vec::with_capacity(nreloc as usize);
    for i in 0..nreloc as usize {
        let base = i * 8;
        let word0 = byte_order.read_u32(&buf, base)?;
        let word1 = byte_order.read_u32(&buf, base + 4)?;
        out.push(parse_relocation(word0, word1, byte_order));
    }
    Ok(out)
}

/// A section within a segment.
#[derive(Clone)]
pub struct Section {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u64,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: Option<u32>,
    pub relocations: Vec<Relocation>,
    source: Arc<dyn Source>,
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("sectname", &self.sectname)
            .field("segname", &self.segname)
            .field("addr", &self.addr)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("nreloc", &self.nreloc)
            .finish_non_exhaustive()
    }
}

impl Section {
    /// A lazy reader over this section's file payload; nothing is read
    /// until the caller pulls bytes from it.
    pub fn reader(&self) -> BoundedReader<Arc<dyn Source>> {
        BoundedReader::new(self.source.clone(), self.offset, self.size)
    }

    /// Reads this section's entire payload eagerly.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.reader().read_all().map_err(Error::Io)
    }
}

/// A `LC_SEGMENT`/`LC_SEGMENT_64` command and its sections.
#[derive(Clone)]
pub struct SegmentCommand {
    pub is_64: bool,
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub flags: u32,
    pub sections: Vec<Section>,
    source: Arc<dyn Source>,
}

impl std::fmt::Debug for SegmentCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCommand")
            .field("segname", &self.segname)
            .field("vmaddr", &self.vmaddr)
            .field("vmsize", &self.vmsize)
            .field("fileoff", &self.fileoff)
            .field("filesize", &self.filesize)
            .field("sections", &self.sections)
            .finish_non_exhaustive()
    }
}

impl SegmentCommand {
    /// A lazy reader over this segment's file payload; nothing is read
    /// until the caller pulls bytes from it (§4.4).
    pub fn reader(&self) -> BoundedReader<Arc<dyn Source>> {
        BoundedReader::new(self.source.clone(), self.fileoff, self.filesize)
    }

    /// Reads this segment's entire payload eagerly.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.reader().read_all().map_err(Error::Io)
    }
}

/// Decodes a `LC_SEGMENT`/`LC_SEGMENT_64` command from `slice`, the full
/// bytes of the command (header included), eagerly decoding each
/// section's header and relocations (but not its payload; see
/// [`Section::reader`]).
pub fn parse_segment(
    slice: &[u8],
    byte_order: ByteOrder,
    is_64: bool,
    command_offset: u64,
    source: &Arc<dyn Source>,
) -> Result<SegmentCommand> {
    let too_small = || Error::CommandBlockTooSmall {
        offset: command_offset,
    };

    let fixed_len = if is_64 { 72 } else { 56 };
    if slice.len() < fixed_len {
        return Err(too_small());
    }

    let segname = fixed_name(&slice[8..24]);
    let (vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags, section_base);
    if is_64 {
        vmaddr = byte_order.read_u64(slice, 24)?;
        vmsize = byte_order.read_u64(slice, 32)?;
        fileoff = byte_order.read_u64(slice, 40)?;
        filesize = byte_order.read_u64(slice, 48)?;
        maxprot = byte_order.read_i32(slice, 56)?;
        initprot = byte_order.read_i32(slice, 60)?;
        nsects = byte_order.read_u32(slice, 64)?;
        flags = byte_order.read_u32(slice, 68)?;
        section_base = 72;
    } else {
        vmaddr = byte_order.read_u32(slice, 24)? as u64;
        vmsize = byte_order.read_u32(slice, 28)? as u64;
        fileoff = byte_order.read_u32(slice, 32)? as u64;
        filesize = byte_order.read_u32(slice, 36)? as u64;
        maxprot = byte_order.read_i32(slice, 40)?;
        initprot = byte_order.read_i32(slice, 44)?;
        nsects = byte_order.read_u32(slice, 48)?;
        flags = byte_order.read_u32(slice, 52)?;
        section_base = 56;
    }

    let section_size = if is_64 { 80 } else { 68 };
    let mut sections = Vec::with_capacity(nsects as usize);
    for i in 0..nsects as usize {
        let base = section_base + i * section_size;
        if base + section_size > slice.len() {
            return Err(too_small());
        }
        let sectname = fixed_name(&slice[base..base + 16]);
        let segname_of_section = fixed_name(&slice[base + 16..base + 32]);

        let (addr, size, offset, align, reloff, nreloc, sect_flags, r1, r2, r3);
        if is_64 {
            addr = byte_order.read_u64(slice, base + 32)?;
            size = byte_order.read_u64(slice, base + 40)?;
            offset = byte_order.read_u32(slice, base + 48)? as u64;
            align = byte_order.read_u32(slice, base + 52)?;
            reloff = byte_order.read_u32(slice, base + 56)?;
            nreloc = byte_order.read_u32(slice, base + 60)?;
            sect_flags = byte_order.read_u32(slice, base + 64)?;
            r1 = byte_order.read_u32(slice, base + 68)?;
            r2 = byte_order.read_u32(slice, base + 72)?;
            r3 = Some(byte_order.read_u32(slice, base + 76)?);
        } else {
            addr = byte_order.read_u32(slice, base + 32)? as u64;
            size = byte_order.read_u32(slice, base + 36)? as u64;
            offset = byte_order.read_u32(slice, base + 40)? as u64;
            align = byte_order.read_u32(slice, base + 44)?;
            reloff = byte_order.read_u32(slice, base + 48)?;
            nreloc = byte_order.read_u32(slice, base + 52)?;
            sect_flags = byte_order.read_u32(slice, base + 56)?;
            r1 = byte_order.read_u32(slice, base + 60)?;
            r2 = byte_order.read_u32(slice, base + 64)?;
            r3 = None;
        }

        let relocations = read_relocations(source, reloff, nreloc, byte_order)?;

        sections.push(Section {
            sectname,
            segname: segname_of_section,
            addr,
            size,
            offset,
            align,
            reloff,
            nreloc,
            flags: sect_flags,
            reserved1: r1,
            reserved2: r2,
            reserved3: r3,
            relocations,
            source: source.clone(),
        });
    }

    Ok(SegmentCommand {
        is_64,
        segname,
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot,
        initprot,
        flags,
        sections,
        source: source.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> Arc<dyn Source> {
        Arc::new(vec![0u8; 4096])
    }

    fn push_segment64_header(
        buf: &mut Vec<u8>,
        segname: &str,
        nsects: u32,
        fileoff: u64,
        filesize: u64,
    ) {
        buf.extend_from_slice(&0u32.to_le_bytes()); // cmd (ignored by parse_segment)
        buf.extend_from_slice(&0u32.to_le_bytes()); // cmdsize (ignored)
        let mut name = [0u8; 16];
        name[..segname.len()].copy_from_slice(segname.as_bytes());
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&0u64.to_le_bytes()); // vmaddr
        buf.extend_from_slice(&0x1000u64.to_le_bytes()); // vmsize
        buf.extend_from_slice(&fileoff.to_le_bytes());
        buf.extend_from_slice(&filesize.to_le_bytes());
        buf.extend_from_slice(&7i32.to_le_bytes()); // maxprot
        buf.extend_from_slice(&5i32.to_le_bytes()); // initprot
        buf.extend_from_slice(&nsects.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
    }

    #[test]
    fn parses_segment_64_with_one_section() {
        let mut buf = Vec::new();
        push_segment64_header(&mut buf, "__TEXT", 1, 0, 0x1000);

        let mut sectname = [0u8; 16];
        sectname[..6].copy_from_slice(b"__text");
        buf.extend_from_slice(&sectname);
        let mut segname = [0u8; 16];
        segname[..6].copy_from_slice(b"__TEXT");
        buf.extend_from_slice(&segname);
        buf.extend_from_slice(&0x1000u64.to_le_bytes()); // addr
        buf.extend_from_slice(&0x200u64.to_le_bytes()); // size
        buf.extend_from_slice(&0x400u32.to_le_bytes()); // offset
        buf.extend_from_slice(&4u32.to_le_bytes()); // align
        buf.extend_from_slice(&0u32.to_le_bytes()); // reloff
        buf.extend_from_slice(&0u32.to_le_bytes()); // nreloc
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved1
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved2
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved3

        let source = src();
        let seg = parse_segment(&buf, ByteOrder::Little, true, 0, &source).unwrap();
        assert_eq!(seg.segname, "__TEXT");
        assert_eq!(seg.sections.len(), 1);
        assert_eq!(seg.sections[0].sectname, "__text");
        assert_eq!(seg.sections[0].offset, 0x400);
        assert_eq!(seg.sections[0].size, 0x200);
    }

    #[test]
    fn rejects_truncated_segment_command() {
        let buf = vec![0u8; 10];
        let source = src();
        let err = parse_segment(&buf, ByteOrder::Little, true, 0, &source).unwrap_err();
        assert!(matches!(err, Error::CommandBlockTooSmall { .. }));
    }

    #[test]
    fn segment_reader_is_bounded_to_fileoff_and_filesize() {
        let mut backing: Vec<u8> = (0..4096u32).map(|b| b as u8).collect();
        backing[0x400..0x400 + 4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let source: Arc<dyn Source> = Arc::new(backing);

        let mut buf = Vec::new();
        push_segment64_header(&mut buf, "__TEXT", 0, 0x400, 4);

        let seg = parse_segment(&buf, ByteOrder::Little, true, 0, &source).unwrap();
        assert_eq!(seg.read_all().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn decodes_plain_relocation_little_endian() {
        // address = 0x10, symbolnum = 5, pcrel = 1, length = 2, extern = 1, type = 3
        let word0 = 0x10u32;
        let word1 = 5u32 | (1 << 24) | (2 << 25) | (1 << 27) | (3 << 28);
        match parse_relocation(word0, word1, ByteOrder::Little) {
            Relocation::Plain {
                address,
                symbolnum,
                pc_relative,
                length,
                is_extern,
                kind,
            } => {
                assert_eq!(address, 0x10);
                assert_eq!(symbolnum, 5);
                assert!(pc_relative);
                assert_eq!(length, 2);
                assert!(is_extern);
                assert_eq!(kind, 3);
            }
            _ => panic!("expected Plain"),
        }
    }

    #[test]
    fn decodes_plain_relocation_big_endian() {
        // Same logical fields as the little-endian case above, but packed
        // from the most-significant end of the word, per §4.4.
        let word0 = 0x10u32;
        let word1 = (5u32 << 8) | (1 << 7) | (2 << 5) | (1 << 4) | 3;
        match parse_relocation(word0, word1, ByteOrder::Big) {
            Relocation::Plain {
                address,
                symbolnum,
                pc_relative,
                length,
                is_extern,
                kind,
            } => {
                assert_eq!(address, 0x10);
                assert_eq!(symbolnum, 5);
                assert!(pc_relative);
                assert_eq!(length, 2);
                assert!(is_extern);
                assert_eq!(kind, 3);
            }
            _ => panic!("expected Plain"),
        }
    }

    #[test]
    fn decodes_scattered_relocation() {
        let word0 = R_SCATTERED | (3 << 24) | (2 << 28) | (1 << 30) | 0x1234;
        let word1 = 0xdead_beefu32;
        match parse_relocation(word0, word1, ByteOrder::Little) {
            Relocation::Scattered {
                kind,
                length,
                pc_relative,
                address,
                value,
            } => {
                assert_eq!(kind, 3);
                assert_eq!(length, 2);
                assert!(pc_relative);
                assert_eq!(address, 0x1234);
                assert_eq!(value, 0xdead_beefu32 as i32);
            }
            _ => panic!("expected Scattered"),
        }
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! The top-level [`File`] handle (§4.6): owns the decoded header and load
//! commands, and exposes the byte source every lazy reader borrows from.

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::endian::ByteOrder;
use crate::error::{Error, Result};
use crate::macho::constants::DylibKind;
use crate::macho::header::{self, Header};
use crate::macho::load_command::{
    self, BuildVersionCommand, DyldInfoCommand, DylibCommand, LoadCommand,
};
use crate::macho::segment::{SegmentCommand, Section};
use crate::macho::symtab::{DysymtabCommand, Symbol, SymtabCommand};
use crate::source::Source;

/// Knobs controlling how tolerant a parse is of malformed-but-survivable
/// input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// When set, a symbol table entry whose name offset lies outside the
    /// string table is reported as [`Error::SymbolNameOutOfRange`] instead
    /// of being silently skipped.
    pub strict_symbols: bool,
}

/// A [`Source`] that rejects every read; installed in place of a closed
/// file's handle so [`File::close`] actually severs access instead of
/// merely looking like it did.
struct ClosedSource;

impl Source for ClosedSource {
    fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "file handle was explicitly closed",
        ))
    }
}

/// A parsed Mach-O object file.
///
/// Segment and section payloads are not read until asked for; see
/// [`Section::reader`].
#[derive(Clone)]
pub struct File {
    header: Header,
    byte_order: ByteOrder,
    loads: Vec<LoadCommand>,
    symtab_index: Option<usize>,
    dysymtab_index: Option<usize>,
    source: Arc<dyn Source>,
    /// Set only when this file opened its own handle via [`File::open`];
    /// a source supplied directly by the caller is never ours to close.
    owns_handle: bool,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("header", &self.header)
            .field("byte_order", &self.byte_order)
            .field("loads", &self.loads)
            .finish_non_exhaustive()
    }
}

impl File {
    /// Opens and parses the Mach-O file at `path`. The underlying handle
    /// is owned by this `File` and released on [`File::close`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(Error::Io)?;
        let mut file = Self::parse_with_options(Arc::new(file), ParseOptions::default())?;
        file.owns_handle = true;
        Ok(file)
    }

    /// Parses a complete Mach-O file already held in memory.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        Self::parse_with_options(Arc::new(bytes), ParseOptions::default())
    }

    /// Parses a Mach-O file from any [`Source`], with the given options.
    /// The source is treated as borrowed: [`File::close`] is a no-op for
    /// a file constructed this way.
    pub fn parse_with_options(source: Arc<dyn Source>, options: ParseOptions) -> Result<Self> {
        // The header is small and always at offset 0; read it eagerly.
        let mut header_buf = vec![0u8; 32];
        let read = source.as_ref().read_at(0, &mut header_buf).map_err(Error::Io)?;
        header_buf.truncate(read);
        let header = header::parse(&header_buf)?;
        let byte_order = header::byte_order_of(header.magic);

        let cmd_block_offset = header.command_block_offset() as u64;
        let mut cmd_block = vec![0u8; header.sizeofcmds as usize];
        if header.sizeofcmds > 0 {
            source
                .as_ref()
                .read_exact_at(cmd_block_offset, &mut cmd_block)
                .map_err(Error::Io)?;
        }

        let loads = load_command::parse_load_commands(
            &cmd_block,
            header.ncmds,
            header.sizeofcmds,
            byte_order,
            header.is_64_bit,
            cmd_block_offset,
            &source,
            options.strict_symbols,
        )?;

        let symtab_index = loads
            .iter()
            .position(|c| matches!(c, LoadCommand::Symtab(_)));
        let dysymtab_index = loads
            .iter()
            .position(|c| matches!(c, LoadCommand::Dysymtab(_)));

        Ok(File {
            header,
            byte_order,
            loads,
            symtab_index,
            dysymtab_index,
            source,
            owns_handle: false,
        })
    }

    /// Releases this file's ownership of its underlying handle, if any.
    ///
    /// Already-decoded metadata (the header, load commands, symbols)
    /// remains accessible; further reads through lazy segment/section
    /// readers obtained *after* this call fail. Readers obtained before
    /// the call keep whichever clone of the source they captured, so the
    /// OS-level handle itself is only released once every such reader has
    /// also been dropped. A no-op on a file that didn't open its own
    /// handle (see [`File::parse`]/[`File::parse_with_options`]).
    pub fn close(&mut self) {
        if self.owns_handle {
            self.source = Arc::new(ClosedSource);
            self.owns_handle = false;
        }
    }

    /// The fixed Mach-O header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The byte order this file was encoded in.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// All load commands, in file order.
    pub fn load_commands(&self) -> &[LoadCommand] {
        &self.loads
    }

    /// The symbol table, if this file carries one.
    pub fn symtab(&self) -> Option<&SymtabCommand> {
        self.symtab_index.map(|i| match &self.loads[i] {
            LoadCommand::Symtab(s) => s,
            _ => unreachable!(),
        })
    }

    /// The dynamic symbol table, if this file carries one.
    pub fn dysymtab(&self) -> Option<&DysymtabCommand> {
        self.dysymtab_index.map(|i| match &self.loads[i] {
            LoadCommand::Dysymtab(d) => d,
            _ => unreachable!(),
        })
    }

    /// All decoded symbols, or an empty slice if this file has no symbol
    /// table.
    pub fn symbols(&self) -> &[Symbol] {
        self.symtab().map(|s| s.symbols.as_slice()).unwrap_or(&[])
    }

    /// Looks up a symbol by its (already-normalized) name.
    pub fn symbol_by_name(&self, name: &str) -> Result<&Symbol> {
        self.symbols()
            .iter()
            .find(|s| s.name == name)
            .ok_or(Error::SymbolNotFound)
    }

    /// The value of the first symbol whose name matches `name`
    /// case-insensitively (§4.6).
    pub fn find_symbol_address(&self, name: &str) -> Result<u64> {
        self.symbols()
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.value)
            .ok_or(Error::SymbolNotFound)
    }

    /// The name of the first symbol whose value equals `address` (§4.6).
    pub fn find_address_symbol(&self, address: u64) -> Option<&str> {
        self.symbols()
            .iter()
            .find(|s| s.value == address)
            .map(|s| s.name.as_str())
    }

    /// All segment commands, in file order.
    pub fn segments(&self) -> impl Iterator<Item = &SegmentCommand> {
        self.loads.iter().filter_map(|c| match c {
            LoadCommand::Segment(s) => Some(s),
            _ => None,
        })
    }

    /// The first segment named `name`, if any (§4.6, testable property 7).
    pub fn segment(&self, name: &str) -> Option<&SegmentCommand> {
        self.segments().find(|s| s.segname == name)
    }

    /// All sections across all segments, in file order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.segments().flat_map(|s| s.sections.iter())
    }

    /// The first section named `name`, searched across every segment
    /// (§4.6, testable property 7).
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections().find(|s| s.sectname == name)
    }

    /// The first section named `sectname` within the segment `segname`,
    /// e.g. `("__TEXT", "__text")`. More specific than [`File::section`]
    /// for files with same-named sections in different segments.
    pub fn section_in_segment(&self, segname: &str, sectname: &str) -> Option<&Section> {
        self.sections()
            .find(|s| s.segname == segname && s.sectname == sectname)
    }

    /// All dylib-reference commands (`LC_LOAD_DYLIB` and its relatives).
    pub fn dylibs(&self) -> impl Iterator<Item = &DylibCommand> {
        self.loads.iter().filter_map(|c| match c {
            LoadCommand::Dylib(d) => Some(d),
            _ => None,
        })
    }

    /// Names of every imported library (§4.6): every `Dylib` command that
    /// is not weak, reexport, or upward-linked, in source order.
    pub fn imported_libraries(&self) -> Vec<&str> {
        self.dylibs()
            .filter(|d| {
                !matches!(
                    d.kind,
                    DylibKind::Weak | DylibKind::Reexport | DylibKind::Upward
                )
            })
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Names of the undefined symbols, i.e. `symbols[iundefsym ..
    /// iundefsym + nundefsym]` (§4.6, testable property 8). Fails with
    /// [`Error::MissingSymtab`] if either table is absent.
    pub fn imported_symbols(&self) -> Result<Vec<&str>> {
        let symtab = self.symtab().ok_or(Error::MissingSymtab)?;
        let dysymtab = self.dysymtab().ok_or(Error::MissingSymtab)?;
        let start = dysymtab.iundefsym as usize;
        let end = start + dysymtab.nundefsym as usize;
        let slice = symtab
            .symbols
            .get(start..end)
            .ok_or(Error::MissingSymtab)?;
        Ok(slice.iter().map(|s| s.name.as_str()).collect())
    }

    /// This file's UUID, if it carries one.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.loads.iter().find_map(|c| match c {
            LoadCommand::Uuid { uuid, .. } => Some(*uuid),
            _ => None,
        })
    }

    /// The `LC_ID_DYLIB` command, if this file is itself a dynamic
    /// library.
    pub fn dylib_id(&self) -> Option<&DylibCommand> {
        self.dylibs().find(|d| d.kind == DylibKind::Id)
    }

    /// The `LC_DYLD_INFO`/`LC_DYLD_INFO_ONLY` command, if present. Its
    /// `export_off`/`export_size` fields locate the export trie; see
    /// [`crate::trie`].
    pub fn dyld_info(&self) -> Option<&DyldInfoCommand> {
        self.loads.iter().find_map(|c| match c {
            LoadCommand::DyldInfo(info) => Some(info),
            _ => None,
        })
    }

    /// The `LC_SOURCE_VERSION` command's packed version, if present.
    pub fn source_version(&self) -> Option<u64> {
        self.loads.iter().find_map(|c| match c {
            LoadCommand::SourceVersion { version, .. } => Some(*version),
            _ => None,
        })
    }

    /// The `LC_SOURCE_VERSION` command's version, unpacked into
    /// `(a, b, c, d, e)`, if present.
    pub fn source_version_parts(&self) -> Option<(u64, u16, u16, u16, u16)> {
        self.loads.iter().find_map(|c| match c {
            LoadCommand::SourceVersion { decoded, .. } => Some(*decoded),
            _ => None,
        })
    }

    /// The `LC_BUILD_VERSION` command, if present.
    pub fn build_version(&self) -> Option<&BuildVersionCommand> {
        self.loads.iter().find_map(|c| match c {
            LoadCommand::BuildVersion(b) => Some(b),
            _ => None,
        })
    }

    /// Reads the bytes of the export trie out of this file's
    /// `LC_DYLD_INFO`/`LC_DYLD_INFO_ONLY` command, if any.
    pub fn export_trie_bytes(&self) -> Result<Option<Vec<u8>>> {
        let Some(info) = self.dyld_info() else {
            return Ok(None);
        };
        if info.export_size == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut buf = vec![0u8; info.export_size as usize];
        self.source
            .as_ref()
            .read_exact_at(info.export_off as u64, &mut buf)
            .map_err(Error::Io)?;
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_file_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&crate::macho::header::MH_MAGIC_64.to_le_bytes());
        buf.extend_from_slice(&0x0100000Ci32.to_le_bytes()); // cputype: ARM64
        buf.extend_from_slice(&0i32.to_le_bytes()); // cpusubtype
        buf.extend_from_slice(&2u32.to_le_bytes()); // filetype: MH_EXECUTE
        buf.extend_from_slice(&0u32.to_le_bytes()); // ncmds
        buf.extend_from_slice(&0u32.to_le_bytes()); // sizeofcmds
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf
    }

    #[test]
    fn parses_minimal_file_with_no_load_commands() {
        let file = File::parse(minimal_file_bytes()).unwrap();
        assert!(file.header().is_64_bit);
        assert_eq!(file.load_commands().len(), 0);
        assert!(file.symtab().is_none());
        assert_eq!(file.sections().count(), 0);
    }

    #[test]
    fn symbol_lookup_reports_not_found_when_no_symtab() {
        let file = File::parse(minimal_file_bytes()).unwrap();
        let err = file.symbol_by_name("main").unwrap_err();
        assert!(matches!(err, Error::SymbolNotFound));
    }

    #[test]
    fn imported_symbols_fails_without_dysymtab() {
        let file = File::parse(minimal_file_bytes()).unwrap();
        let err = file.imported_symbols().unwrap_err();
        assert!(matches!(err, Error::MissingSymtab));
    }

    #[test]
    fn segment_and_section_lookup_miss_on_absent_name() {
        let file = File::parse(minimal_file_bytes()).unwrap();
        assert!(file.segment("__TEXT").is_none());
        assert!(file.section("__text").is_none());
    }

    #[test]
    fn close_on_a_borrowed_source_is_a_no_op() {
        let mut file = File::parse(minimal_file_bytes()).unwrap();
        file.close();
        // Still readable: this file never owned its source.
        assert_eq!(file.export_trie_bytes().unwrap(), None);
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Symbol table decoding (§4.5): `LC_SYMTAB`/`LC_DYSYMTAB` and the `nlist`
//! records they describe.

use std::borrow::Cow;
use std::sync::Arc;

use crate::endian::{read_cstr_at, ByteOrder};
use crate::error::{Error, Result};
use crate::source::Source;

/// A single decoded symbol table entry (`nlist`/`nlist_64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    /// Widened to 64 bits uniformly, regardless of whether this came from
    /// a 32-bit or 64-bit symbol table.
    pub value: u64,
}

/// `LC_SYMTAB`: the string and symbol tables.
#[derive(Debug, Clone)]
pub struct SymtabCommand {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
    pub symbols: Vec<Symbol>,
}

/// `LC_DYSYMTAB`: the partitioning of the symbol table used by the dynamic
/// linker, plus the indirect symbol table.
#[derive(Debug, Clone)]
pub struct DysymtabCommand {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
    pub indirect_symbols: Vec<u32>,
}

/// Strips a single leading underscore from symbol names that look
/// C++-mangled or otherwise dotted, compensating for the conventional
/// underscore-prefixing of external symbol names.
///
/// A name without a `.` is returned unchanged, as is a dotted name that
/// doesn't start with `_`.
pub fn normalize_symbol_name(name: &str) -> Cow<'_, str> {
    if name.starts_with('_') && name.contains('.') {
        Cow::Owned(name[1..].to_string())
    } else {
        Cow::Borrowed(name)
    }
}

/// Decodes `LC_SYMTAB`, reading the `nlist` array and string table out of
/// `source` at the file offsets the command specifies (which need not lie
/// within the load-command block itself).
///
/// A symbol whose name offset falls outside the string table is skipped
/// unless `strict` is set, in which case it is reported as
/// [`Error::SymbolNameOutOfRange`].
///
/// Returns `Ok(None)` rather than an I/O error when the string table
/// itself cannot be read (e.g. `stroff` points past the end of the file):
/// this is a deliberate tolerance (§7) so that a single bad `Symtab`
/// doesn't fail the whole parse. The caller should retain this command as
/// [`super::load_command::LoadCommand::Unknown`] in that case.
pub fn parse_symtab(
    slice: &[u8],
    byte_order: ByteOrder,
    is_64: bool,
    command_offset: u64,
    source: &Arc<dyn Source>,
    strict: bool,
) -> Result<Option<SymtabCommand>> {
    if slice.len() < 24 {
        return Err(Error::CommandBlockTooSmall {
            offset: command_offset,
        });
    }
    let symoff = byte_order.read_u32(slice, 8)?;
    let nsyms = byte_order.read_u32(slice, 12)?;
    let stroff = byte_order.read_u32(slice, 16)?;
    let strsize = byte_order.read_u32(slice, 20)?;

    let mut strtab = vec![0u8; strsize as usize];
    if strsize > 0 && source.as_ref().read_exact_at(stroff as u64, &mut strtab).is_err() {
        log::warn!(
            "LC_SYMTAB string table at offset {stroff} (size {strsize}) is unreadable, \
             dropping this symbol table"
        );
        return Ok(None);
    }

    let entry_size = if is_64 { 16 } else { 12 };
    let mut symtab_bytes = vec![0u8; nsyms as usize * entry_size];
    if nsyms > 0 {
        source
            .as_ref()
            .read_exact_at(symoff as u64, &mut symtab_bytes)
            .map_err(Error::Io)?;
    }

    let mut symbols = Vec::with_capacity(nsyms as usize);
    for i in 0..nsyms as usize {
        let base = i * entry_size;
        let n_strx = byte_order.read_u32(&symtab_bytes, base)?;
        let n_type = symtab_bytes[base + 4];
        let n_sect = symtab_bytes[base + 5];
        let n_desc = byte_order.read_u16(&symtab_bytes, base + 6)?;
        let value = if is_64 {
            byte_order.read_u64(&symtab_bytes, base + 8)?
        } else {
            byte_order.read_u32(&symtab_bytes, base + 8)? as u64
        };

        if n_strx as u64 >= strsize as u64 {
            if strict {
                return Err(Error::SymbolNameOutOfRange {
                    offset: command_offset,
                    value: n_strx as u64,
                });
            }
            log::warn!(
                "symbol {} has out-of-range name offset {}, skipping",
                i,
                n_strx
            );
            continue;
        }

        let raw_name = String::from_utf8_lossy(read_cstr_at(&strtab, n_strx as usize)).into_owned();
        let name = normalize_symbol_name(&raw_name).into_owned();

        symbols.push(Symbol {
            name,
            n_type,
            n_sect,
            n_desc,
            value,
        });
    }

    Ok(Some(SymtabCommand {
        symoff,
        nsyms,
        stroff,
        strsize,
        symbols,
    }))
}

/// Decodes `LC_DYSYMTAB`, including the indirect symbol table.
pub fn parse_dysymtab(
    slice: &[u8],
    byte_order: ByteOrder,
    command_offset: u64,
    source: &Arc<dyn Source>,
) -> Result<DysymtabCommand> {
    if slice.len() < 80 {
        return Err(Error::CommandBlockTooSmall {
            offset: command_offset,
        });
    }
    let mut fields = [0u32; 18];
    for (i, field) in fields.iter_mut().enumerate() {
        *field = byte_order.read_u32(slice, 8 + i * 4)?;
    }
    let [
        ilocalsym,
        nlocalsym,
        iextdefsym,
        nextdefsym,
        iundefsym,
        nundefsym,
        tocoff,
        ntoc,
        modtaboff,
        nmodtab,
        extrefsymoff,
        nextrefsyms,
        indirectsymoff,
        nindirectsyms,
        extreloff,
        nextrel,
        locreloff,
        nlocrel,
    ] = fields;

    let mut indirect_bytes = vec![0u8; nindirectsyms as usize * 4];
    if nindirectsyms > 0 {
        source
            .as_ref()
            .read_exact_at(indirectsymoff as u64, &mut indirect_bytes)
            .map_err(Error::Io)?;
    }
    let mut indirect_symbols = Vec::with_capacity(nindirectsyms as usize);
    for i in 0..nindirectsyms as usize {
        indirect_symbols.push(byte_order.read_u32(&indirect_bytes, i * 4)?);
    }

    Ok(DysymtabCommand {
        ilocalsym,
        nlocalsym,
        iextdefsym,
        nextdefsym,
        iundefsym,
        nundefsym,
        tocoff,
        ntoc,
        modtaboff,
        nmodtab,
        extrefsymoff,
        nextrefsyms,
        indirectsymoff,
        nindirectsyms,
        extreloff,
        nextrel,
        locreloff,
        nlocrel,
        indirect_symbols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dotted_underscore_names() {
        assert_eq!(normalize_symbol_name("_foo.eh"), "foo.eh");
        assert_eq!(normalize_symbol_name("_foo"), "_foo");
        assert_eq!(normalize_symbol_name("foo.eh"), "foo.eh");
        assert_eq!(normalize_symbol_name("foo"), "foo");
    }

    fn build_symtab_command(symoff: u32, nsyms: u32, stroff: u32, strsize: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes()); // cmd = LC_SYMTAB
        buf.extend_from_slice(&24u32.to_le_bytes()); // cmdsize
        buf.extend_from_slice(&symoff.to_le_bytes());
        buf.extend_from_slice(&nsyms.to_le_bytes());
        buf.extend_from_slice(&stroff.to_le_bytes());
        buf.extend_from_slice(&strsize.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_symbols_and_skips_out_of_range_names() {
        // String table: "\0main\0_weird.eh\0"
        let strtab: &[u8] = b"\0main\0_weird.eh\0";
        let stroff = 100u32;
        let symoff = 200u32;

        // Two valid symbols, one with a name offset past the string table.
        let mut symtab_bytes = Vec::new();
        // symbol 0: name "main" at offset 1
        symtab_bytes.extend_from_slice(&1u32.to_le_bytes());
        symtab_bytes.push(0x0f); // n_type
        symtab_bytes.push(1); // n_sect
        symtab_bytes.extend_from_slice(&0u16.to_le_bytes()); // n_desc
        symtab_bytes.extend_from_slice(&0x1000u64.to_le_bytes()); // value (64-bit)
        // symbol 1: name "_weird.eh" at offset 6
        symtab_bytes.extend_from_slice(&6u32.to_le_bytes());
        symtab_bytes.push(0x0f);
        symtab_bytes.push(1);
        symtab_bytes.extend_from_slice(&0u16.to_le_bytes());
        symtab_bytes.extend_from_slice(&0x2000u64.to_le_bytes());
        // symbol 2: out-of-range name offset
        symtab_bytes.extend_from_slice(&9999u32.to_le_bytes());
        symtab_bytes.push(0x0f);
        symtab_bytes.push(1);
        symtab_bytes.extend_from_slice(&0u16.to_le_bytes());
        symtab_bytes.extend_from_slice(&0x3000u64.to_le_bytes());

        let mut backing = vec![0u8; 4096];
        backing[stroff as usize..stroff as usize + strtab.len()].copy_from_slice(strtab);
        backing[symoff as usize..symoff as usize + symtab_bytes.len()]
            .copy_from_slice(&symtab_bytes);
        let source: Arc<dyn Source> = Arc::new(backing);

        let cmd_slice = build_symtab_command(symoff, 3, stroff, strtab.len() as u32);
        let symtab = parse_symtab(&cmd_slice, ByteOrder::Little, true, 0, &source, false)
            .unwrap()
            .unwrap();

        assert_eq!(symtab.symbols.len(), 2);
        assert_eq!(symtab.symbols[0].name, "main");
        assert_eq!(symtab.symbols[0].value, 0x1000);
        assert_eq!(symtab.symbols[1].name, "weird.eh");
        assert_eq!(symtab.symbols[1].value, 0x2000);
    }

    #[test]
    fn strict_mode_errors_on_out_of_range_name() {
        let mut symtab_bytes = Vec::new();
        symtab_bytes.extend_from_slice(&9999u32.to_le_bytes());
        symtab_bytes.push(0);
        symtab_bytes.push(0);
        symtab_bytes.extend_from_slice(&0u16.to_le_bytes());
        symtab_bytes.extend_from_slice(&0u64.to_le_bytes());

        let mut backing = vec![0u8; 4096];
        backing[200..200 + symtab_bytes.len()].copy_from_slice(&symtab_bytes);
        let source: Arc<dyn Source> = Arc::new(backing);

        let cmd_slice = build_symtab_command(200, 1, 100, 4);
        let err =
            parse_symtab(&cmd_slice, ByteOrder::Little, true, 0, &source, true).unwrap_err();
        assert!(matches!(err, Error::SymbolNameOutOfRange { .. }));
    }

    #[test]
    fn stroff_past_eof_is_tolerated_as_no_symtab() {
        // A well-formed header whose Stroff points far beyond the backing
        // source's length; the string-table read fails and the whole
        // Symtab command should be swallowed rather than aborting the
        // parse (§7, scenario S3).
        let source: Arc<dyn Source> = Arc::new(vec![0u8; 16]);
        let cmd_slice = build_symtab_command(0, 0, 1_000_000, 16);
        let result = parse_symtab(&cmd_slice, ByteOrder::Little, true, 0, &source, false).unwrap();
        assert!(result.is_none());
    }
}

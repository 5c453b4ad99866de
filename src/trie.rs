/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! The dyld export trie (§4.8): a ULEB128-encoded prefix tree mapping
//! exported symbol names to their flags and address (or, for re-exports,
//! to the name of the dylib they're re-exported from).
//!
//! The trie is stored as a flat byte blob (the `LC_DYLD_INFO`/
//! `LC_DYLD_INFO_ONLY` command's `export_off`/`export_size`), read node by
//! node: each node starts with its own terminal-info size and payload (if
//! it is itself an export), followed by a count and a list of
//! (edge-string, child-offset) pairs.
//!
//! This module is independent of [`crate::macho`]: it only ever sees a
//! byte slice carved out of a Mach-O file by the caller.

use crate::error::{Error, Result};
use crate::leb128::read_uleb128;

/// Exported-name accumulation is rejected past this many bytes (§3, §4.8);
/// a well-formed trie never comes close, so exceeding it means either a
/// cyclic child offset or deliberately adversarial input.
const MAX_TRIE_PATH: usize = 32_768;

/// Defense-in-depth against a cyclic trie built entirely out of
/// zero-length edge labels, which would never grow the accumulated path
/// and so would never trip [`MAX_TRIE_PATH`]. No real trie comes
/// anywhere near this many nodes.
const MAX_TRIE_VISITS: usize = 1_000_000;

/// What kind of export an export-trie terminal record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Regular,
    ThreadLocal,
    Absolute,
}

const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;
const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;
const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u64 = 0x02;
const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION: u64 = 0x04;
const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

/// A node visited while walking the trie: its offset within the trie
/// region, and the edge-label path accumulated to reach it (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieNode {
    pub offset: usize,
    pub path: String,
}

/// A single decoded export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// The full, reconstructed symbol name (the concatenation of every
    /// edge string walked from the root).
    pub name: String,
    pub flags: u64,
    pub kind: ExportKind,
    pub weak_definition: bool,
    pub stub_and_resolver: bool,
    /// Present unless this export is a re-export (`flags & REEXPORT`).
    /// Biased by the caller-supplied load address.
    pub address: Option<u64>,
    /// Present only for a re-export: the name it's re-exported from (empty
    /// string means "same name as this export").
    pub imported_name: Option<String>,
    /// Present only when this export has a stub-and-resolver: the offset
    /// of the resolver function, biased by the load address.
    pub resolver_offset: Option<u64>,
    /// Present only for a re-export: the ordinal of the dylib it's
    /// imported from in the `LC_LOAD_DYLIB` list.
    pub library_ordinal: Option<u64>,
}

fn export_kind_of(flags: u64) -> ExportKind {
    match flags & EXPORT_SYMBOL_FLAGS_KIND_MASK {
        EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL => ExportKind::ThreadLocal,
        EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE => ExportKind::Absolute,
        _ => ExportKind::Regular,
    }
}

/// Decodes a terminal export payload (§4.8) starting at `offset`, the
/// first byte past the node's `terminal_size` field.
///
/// `load_address` is added to the address/resolver-offset fields of a
/// non-reexport terminal; a reexport's "address" is a symbolic ordinal
/// and is never biased.
pub fn read_export(buf: &[u8], offset: usize, name: &str, load_address: u64) -> Result<Export> {
    let (flags, consumed) = read_uleb128(buf, offset)?;
    let mut cursor = offset + consumed;

    let kind = export_kind_of(flags);
    let weak_definition = flags & EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION != 0;
    let stub_and_resolver = flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER != 0;

    if flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
        let (library_ordinal, consumed) = read_uleb128(buf, cursor)?;
        cursor += consumed;
        let imported_name =
            String::from_utf8_lossy(crate::endian::read_cstr_at(buf, cursor)).into_owned();
        return Ok(Export {
            name: name.to_string(),
            flags,
            kind,
            weak_definition,
            stub_and_resolver,
            address: None,
            imported_name: Some(imported_name),
            resolver_offset: None,
            library_ordinal: Some(library_ordinal),
        });
    }

    let (address, consumed) = read_uleb128(buf, cursor)?;
    cursor += consumed;
    let resolver_offset = if stub_and_resolver {
        let (resolver, _) = read_uleb128(buf, cursor)?;
        Some(resolver.wrapping_add(load_address))
    } else {
        None
    };

    Ok(Export {
        name: name.to_string(),
        flags,
        kind,
        weak_definition,
        stub_and_resolver,
        address: Some(address.wrapping_add(load_address)),
        imported_name: None,
        resolver_offset,
        library_ordinal: None,
    })
}

/// Reads a node's `child_count` byte and its `(edge_label, child_offset)`
/// pairs, invoking `visit` for each child. `pos` is the offset of the
/// `child_count` byte; returns the offset just past the node.
fn for_each_child(
    buf: &[u8],
    mut pos: usize,
    mut visit: impl FnMut(&[u8], usize) -> Result<()>,
) -> Result<()> {
    if pos >= buf.len() {
        return Ok(());
    }
    let child_count = buf[pos];
    pos += 1;
    for _ in 0..child_count {
        let edge_start = pos;
        let edge_end = buf[edge_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|i| edge_start + i)
            .ok_or(Error::Leb128UnexpectedEof)?;
        let edge = &buf[edge_start..edge_end];
        pos = edge_end + 1;

        let (child_offset, consumed) = read_uleb128(buf, pos)?;
        pos += consumed;

        visit(edge, child_offset as usize)?;
    }
    Ok(())
}

/// Depth-first traversal shared by [`parse_trie`] and [`parse_trie_exports`].
///
/// `on_node` is called once per visited node with its offset and
/// accumulated path; returning early on a node whose `terminal_size` is
/// nonzero is the caller's job.
fn walk(
    buf: &[u8],
    offset: usize,
    prefix: &mut Vec<u8>,
    visits: &mut usize,
    on_node: &mut impl FnMut(usize, &[u8], usize /* terminal payload offset, or 0 if none */) -> Result<()>,
) -> Result<()> {
    if offset >= buf.len() {
        return Ok(());
    }
    if prefix.len() > MAX_TRIE_PATH || *visits > MAX_TRIE_VISITS {
        return Err(Error::TrieTooDeep {
            offset: offset as u64,
        });
    }
    *visits += 1;

    let (terminal_size, consumed) = read_uleb128(buf, offset)?;
    let payload_offset = offset + consumed;
    on_node(
        offset,
        prefix,
        if terminal_size > 0 { payload_offset } else { 0 },
    )?;

    let children_start = payload_offset + terminal_size as usize;
    let mut child_results = Vec::new();
    for_each_child(buf, children_start, |edge, child_offset| {
        child_results.push((edge.to_vec(), child_offset));
        Ok(())
    })?;

    for (edge, child_offset) in child_results {
        let saved_len = prefix.len();
        prefix.extend_from_slice(&edge);
        let result = walk(buf, child_offset, prefix, visits, on_node);
        prefix.truncate(saved_len);
        result?;
    }
    Ok(())
}

/// Enumerates every node in the trie (terminal or not), in visitation
/// order, without decoding terminal payloads.
pub fn parse_trie(buf: &[u8]) -> Result<Vec<TrieNode>> {
    let mut nodes = Vec::new();
    if buf.is_empty() {
        return Ok(nodes);
    }
    let mut prefix = Vec::new();
    let mut visits = 0usize;
    walk(
        buf,
        0,
        &mut prefix,
        &mut visits,
        &mut |offset, path, _payload_offset| {
            nodes.push(TrieNode {
                offset,
                path: String::from_utf8_lossy(path).into_owned(),
            });
            Ok(())
        },
    )?;
    Ok(nodes)
}

/// Enumerates every export reachable from the trie's root node at offset
/// 0, decoding each terminal payload and biasing addresses by
/// `load_address`.
pub fn parse_trie_exports(buf: &[u8], load_address: u64) -> Result<Vec<Export>> {
    let mut terminals: Vec<(usize, String)> = Vec::new();
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let mut prefix = Vec::new();
    let mut visits = 0usize;
    walk(
        buf,
        0,
        &mut prefix,
        &mut visits,
        &mut |_offset, path, payload_offset| {
            if payload_offset != 0 {
                terminals.push((payload_offset, String::from_utf8_lossy(path).into_owned()));
            }
            Ok(())
        },
    )?;

    terminals
        .into_iter()
        .map(|(payload_offset, name)| read_export(buf, payload_offset, &name, load_address))
        .collect()
}

/// Looks up a single export by exact name without materializing the full
/// export list, following only the edges on the path to `name`, and
/// returns the offset of the first byte of its terminal payload (i.e.
/// what [`read_export`] expects as `offset`).
///
/// Per §4.8: `terminal_size` is always decoded with the full ULEB128
/// codec (values whose first byte is <= 127 happen to read identically
/// either way; the single-byte shortcut some producers assume is simply
/// the one-byte case of the same encoding).
pub fn walk_trie(buf: &[u8], name: &str) -> Result<usize> {
    let mut offset = 0usize;
    let mut str_index = 0usize;
    let mut steps = 0usize;

    loop {
        if offset >= buf.len() {
            return Err(Error::SymbolNotFound);
        }
        // A well-formed trie descends at most `name.len()` edges; guard
        // against a cyclic child offset reached via a zero-length edge.
        steps += 1;
        if steps > MAX_TRIE_VISITS {
            return Err(Error::TrieTooDeep {
                offset: offset as u64,
            });
        }
        let (terminal_size, consumed) = read_uleb128(buf, offset)?;
        let payload_offset = offset + consumed;

        if str_index == name.len() {
            return if terminal_size != 0 {
                Ok(payload_offset)
            } else {
                Err(Error::SymbolNotFound)
            };
        }

        let children_start = payload_offset + terminal_size as usize;
        if children_start >= buf.len() {
            return Err(Error::SymbolNotFound);
        }

        let remaining = &name[str_index..];
        let mut next: Option<(usize, usize)> = None; // (child_offset, new_str_index)
        for_each_child(buf, children_start, |edge, child_offset| {
            if next.is_none() && remaining.as_bytes().starts_with(edge) {
                next = Some((child_offset, str_index + edge.len()));
            }
            Ok(())
        })?;

        match next {
            Some((child_offset, new_str_index)) => {
                offset = child_offset;
                str_index = new_str_index;
            }
            None => return Err(Error::SymbolNotFound),
        }
    }
}

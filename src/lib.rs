/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! `machofile` reads Mach-O object files — the binary executable/library
//! format used by Apple platforms — and exposes their structure (header,
//! load commands, segments, sections, symbol table, dynamic linker
//! metadata) through an in-memory object model.
//!
//! It also implements the export-trie codec dyld uses to encode a
//! library's exported symbols as a compact prefix tree, independently of
//! the rest of the parser (see [`trie`]).
//!
//! This crate only reads Mach-O files; it never writes or mutates one,
//! never demultiplexes a universal ("fat") binary, and does not
//! disassemble code or unpack a dyld shared cache.
//!
//! ```no_run
//! use machofile::macho::File;
//!
//! let file = File::open("/path/to/a.out")?;
//! for segment in file.segments() {
//!     println!("{} @ {:#x}", segment.segname, segment.vmaddr);
//! }
//! # Ok::<(), machofile::Error>(())
//! ```

mod dwarf;
mod endian;
mod error;
mod leb128;
pub mod macho;
mod source;
mod trie;

pub use dwarf::DwarfSections;
pub use endian::ByteOrder;
pub use error::{Error, Result};
pub use leb128::{
    read_sleb128, read_sleb128_from, read_uleb128, read_uleb128_from, write_sleb128,
    write_uleb128,
};
pub use macho::{File, Header, LoadCommand, ParseOptions, Relocation, Section, Symbol};
pub use source::{BoundedReader, SeekSource, Source};
pub use trie::{
    parse_trie, parse_trie_exports, read_export, walk_trie, Export, ExportKind, TrieNode,
};

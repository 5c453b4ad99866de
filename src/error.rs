/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! The structured decode error shared by every module in this crate.

use thiserror::Error as ThisError;

/// A decode failure, carrying the byte offset at which the defect was
/// detected and, where applicable, the offending value.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The first four bytes of the file are not one of the recognised
    /// Mach-O magic values.
    #[error("invalid magic number at offset {offset}")]
    BadMagic {
        /// Always 0; kept for symmetry with the other offset-carrying
        /// variants and so callers can match on a single shape.
        offset: u64,
    },

    /// Fewer than 8 bytes remain in the command block for the next
    /// `(cmd, cmdsize)` pair.
    #[error("command block too small at offset {offset}")]
    CommandBlockTooSmall {
        /// Offset of the truncated command, relative to the start of the
        /// command block.
        offset: u64,
    },

    /// A load command's declared size is less than 8 or exceeds the
    /// remaining bytes in the command block.
    #[error("invalid command block size {value} at offset {offset}")]
    InvalidCommandSize {
        /// Offset of the command whose size is invalid.
        offset: u64,
        /// The declared `cmdsize`.
        value: u64,
    },

    /// An in-payload string offset (name/path/framework/client) was not
    /// strictly less than the payload length.
    #[error("invalid {field} in {command} at offset {offset}: offset {value} is out of range")]
    InvalidName {
        /// The load command kind the bad offset was found in, e.g. `"LC_LOAD_DYLIB"`.
        command: &'static str,
        /// Which string field was invalid, e.g. `"name"`, `"path"`.
        field: &'static str,
        /// Global byte offset of the command that failed.
        offset: u64,
        /// The offending (too-large) offset value.
        value: u64,
    },

    /// The export-trie traversal accumulated more than 32,768 bytes of
    /// path without reaching a terminal.
    #[error("possible malformed export trie: path too long at offset {offset}")]
    TrieTooDeep {
        /// Offset of the node at which the bound was exceeded.
        offset: u64,
    },

    /// `WalkTrie` reached the end of the tree without matching the
    /// requested name.
    #[error("symbol not in trie")]
    SymbolNotFound,

    /// A symbol table offset referenced a name past the end of the
    /// string table, and strict-symbol mode is enabled (see
    /// [`crate::ParseOptions`]).
    #[error("symbol name offset {value} out of range at offset {offset}")]
    SymbolNameOutOfRange {
        /// Offset of the symbol record.
        offset: u64,
        /// The out-of-range name offset.
        value: u64,
    },

    /// `ImportedSymbols` was called on a file missing a symbol table or
    /// dynamic symbol table.
    #[error("missing symbol table")]
    MissingSymtab,

    /// A ULEB128/SLEB128 buffer ended before a terminating byte was read.
    #[error("unexpected end of input while decoding a variable-length integer")]
    Leb128UnexpectedEof,

    /// The underlying byte source returned an I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Mach-O object file decoding: header, load commands, segments and
//! sections, and the symbol table.

pub mod constants;
pub mod file;
pub mod header;
pub mod load_command;
pub mod segment;
pub mod symtab;

pub use constants::{DylibKind, VersionMinPlatform};
pub use file::{File, ParseOptions};
pub use header::Header;
pub use load_command::{
    BuildToolEntry, BuildVersionCommand, DataInCodeEntry, DyldInfoCommand, DylibCommand,
    LoadCommand, VersionMinCommand,
};
pub use segment::{Relocation, SegmentCommand, Section};
pub use symtab::{DysymtabCommand, Symbol, SymtabCommand};

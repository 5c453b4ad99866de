/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Load-command dispatch (§4.3): walking the `(cmd, cmdsize)` stream
//! following the header and decoding each command into a [`LoadCommand`].

use std::sync::Arc;

use crate::endian::{read_cstr_at, ByteOrder};
use crate::error::{Error, Result};
use crate::macho::constants::*;
use crate::macho::segment::{self, SegmentCommand};
use crate::macho::symtab::{self, DysymtabCommand, SymtabCommand};
use crate::source::Source;

/// A decoded Mach-O load command.
///
/// Every variant keeps the command's raw bytes (header included) so a
/// caller who needs a field this crate treats as opaque can get at it
/// directly.
#[derive(Debug, Clone)]
pub enum LoadCommand {
    Segment(SegmentCommand),
    Symtab(SymtabCommand),
    Dysymtab(DysymtabCommand),
    Dylib(DylibCommand),
    UnixThread { raw: Vec<u8> },
    Uuid { uuid: [u8; 16], raw: Vec<u8> },
    Rpath { path: String, raw: Vec<u8> },
    SubFramework { umbrella: String, raw: Vec<u8> },
    SubClient { client: String, raw: Vec<u8> },
    CodeSignature { dataoff: u32, datasize: u32, raw: Vec<u8> },
    SplitInfo { dataoff: u32, datasize: u32, raw: Vec<u8> },
    FunctionStarts { dataoff: u32, datasize: u32, raw: Vec<u8> },
    DataInCode {
        dataoff: u32,
        datasize: u32,
        entries: Vec<DataInCodeEntry>,
        raw: Vec<u8>,
    },
    DyldInfo(DyldInfoCommand),
    SourceVersion {
        version: u64,
        /// `version` unpacked into `(a, b, c, d, e)`, per the
        /// `a24.b10.c10.d10.e10` layout `LC_SOURCE_VERSION` uses.
        decoded: (u64, u16, u16, u16, u16),
        raw: Vec<u8>,
    },
    VersionMin(VersionMinCommand),
    BuildVersion(BuildVersionCommand),
    Routines64 { init_address: u64, init_module: u64, raw: Vec<u8> },
    /// A command this crate doesn't interpret further, kept for
    /// round-tripping and so callers can decode it themselves.
    Unknown { cmd: u32, raw: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInCodeEntry {
    pub offset: u32,
    pub length: u16,
    pub kind: u16,
}

#[derive(Debug, Clone)]
pub struct DylibCommand {
    pub kind: DylibKind,
    pub name: String,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct DyldInfoCommand {
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VersionMinCommand {
    pub platform: VersionMinPlatform,
    pub version: (u16, u8, u8),
    pub sdk: (u16, u8, u8),
}

#[derive(Debug, Clone)]
pub struct BuildVersionCommand {
    pub platform: u32,
    pub min_os: (u16, u8, u8),
    pub sdk: (u16, u8, u8),
    pub tools: Vec<BuildToolEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildToolEntry {
    pub tool: u32,
    pub version: (u16, u8, u8),
}

/// Reads a string embedded in a load command at the `u32` byte offset
/// stored at `offset_field_pos` within `slice`, where the offset is
/// relative to the start of the command (as dyld's `lc_str` is).
fn read_lc_str(
    slice: &[u8],
    offset_field_pos: usize,
    byte_order: ByteOrder,
    command: &'static str,
    field: &'static str,
    command_offset: u64,
) -> Result<String> {
    let str_offset = byte_order.read_u32(slice, offset_field_pos)? as usize;
    if str_offset >= slice.len() {
        return Err(Error::InvalidName {
            command,
            field,
            offset: command_offset,
            value: str_offset as u64,
        });
    }
    Ok(String::from_utf8_lossy(read_cstr_at(slice, str_offset)).into_owned())
}

/// Walks the `ncmds` load commands following the header in `cmd_block`,
/// decoding each one.
///
/// `cmd_block` is the full file contents starting at the first load
/// command (i.e. `buf[header.command_block_offset()..]`). `source` gives
/// decoders access to file regions outside the load-command block itself
/// (the string table, indirect symbol table, relocation entries, data in
/// code entries, ...).
pub fn parse_load_commands(
    cmd_block: &[u8],
    ncmds: u32,
    sizeofcmds: u32,
    byte_order: ByteOrder,
    is_64: bool,
    header_offset: u64,
    source: &Arc<dyn Source>,
    strict_symbols: bool,
) -> Result<Vec<LoadCommand>> {
    let sizeofcmds = sizeofcmds as usize;
    if cmd_block.len() < sizeofcmds {
        return Err(Error::CommandBlockTooSmall {
            offset: header_offset,
        });
    }
    let cmd_block = &cmd_block[..sizeofcmds];

    let mut commands = Vec::with_capacity(ncmds as usize);
    let mut pos = 0usize;
    for _ in 0..ncmds {
        let command_offset = header_offset + pos as u64;
        if pos + 8 > cmd_block.len() {
            return Err(Error::CommandBlockTooSmall {
                offset: command_offset,
            });
        }
        let cmd = byte_order.read_u32(cmd_block, pos)?;
        let cmdsize = byte_order.read_u32(cmd_block, pos + 4)?;
        if cmdsize < 8 {
            return Err(Error::InvalidCommandSize {
                offset: command_offset,
                value: cmdsize as u64,
            });
        }
        if pos + cmdsize as usize > cmd_block.len() {
            return Err(Error::InvalidCommandSize {
                offset: command_offset,
                value: cmdsize as u64,
            });
        }
        let slice = &cmd_block[pos..pos + cmdsize as usize];

        let decoded = decode_one(
            cmd,
            slice,
            byte_order,
            is_64,
            command_offset,
            source,
            strict_symbols,
        )?;
        commands.push(decoded);
        pos += cmdsize as usize;
    }
    Ok(commands)
}

fn decode_one(
    cmd: u32,
    slice: &[u8],
    byte_order: ByteOrder,
    is_64: bool,
    command_offset: u64,
    source: &Arc<dyn Source>,
    strict_symbols: bool,
) -> Result<LoadCommand> {
    let raw = slice.to_vec();

    if cmd == LC_SEGMENT || cmd == LC_SEGMENT_64 {
        return Ok(LoadCommand::Segment(segment::parse_segment(
            slice,
            byte_order,
            cmd == LC_SEGMENT_64,
            command_offset,
            source,
        )?));
    }

    if cmd == LC_SYMTAB {
        return match symtab::parse_symtab(
            slice,
            byte_order,
            is_64,
            command_offset,
            source,
            strict_symbols,
        )? {
            Some(symtab) => Ok(LoadCommand::Symtab(symtab)),
            // The string table couldn't be read (e.g. Stroff past EOF).
            // Tolerated per §7: the file parses as if this command were
            // unknown, so `File::symtab` reports `None`.
            None => Ok(LoadCommand::Unknown { cmd, raw }),
        };
    }

    if cmd == LC_DYSYMTAB {
        return Ok(LoadCommand::Dysymtab(symtab::parse_dysymtab(
            slice,
            byte_order,
            command_offset,
            source,
        )?));
    }

    if let Some(kind) = DylibKind::from_cmd(cmd) {
        // dylib_command: cmd, cmdsize, then dylib { name (lc_str), timestamp,
        // current_version, compatibility_version }.
        let name = read_lc_str(slice, 8, byte_order, "dylib", "name", command_offset)?;
        let timestamp = byte_order.read_u32(slice, 12)?;
        let current_version = byte_order.read_u32(slice, 16)?;
        let compatibility_version = byte_order.read_u32(slice, 20)?;
        return Ok(LoadCommand::Dylib(DylibCommand {
            kind,
            name,
            timestamp,
            current_version,
            compatibility_version,
            raw,
        }));
    }

    if let Some(platform) = VersionMinPlatform::from_cmd(cmd) {
        let version_raw = byte_order.read_u32(slice, 8)?;
        let sdk_raw = byte_order.read_u32(slice, 12)?;
        return Ok(LoadCommand::VersionMin(VersionMinCommand {
            platform,
            version: decode_xyz_version(version_raw),
            sdk: decode_xyz_version(sdk_raw),
        }));
    }

    match cmd {
        LC_UNIXTHREAD => Ok(LoadCommand::UnixThread { raw }),

        LC_UUID => {
            let mut uuid = [0u8; 16];
            if slice.len() < 24 {
                return Err(Error::CommandBlockTooSmall {
                    offset: command_offset,
                });
            }
            uuid.copy_from_slice(&slice[8..24]);
            Ok(LoadCommand::Uuid { uuid, raw })
        }

        LC_RPATH => {
            let path = read_lc_str(slice, 8, byte_order, "rpath", "path", command_offset)?;
            Ok(LoadCommand::Rpath { path, raw })
        }

        LC_SUB_FRAMEWORK => {
            let umbrella =
                read_lc_str(slice, 8, byte_order, "sub_framework", "umbrella", command_offset)?;
            Ok(LoadCommand::SubFramework { umbrella, raw })
        }

        LC_SUB_CLIENT => {
            let client =
                read_lc_str(slice, 8, byte_order, "sub_client", "client", command_offset)?;
            Ok(LoadCommand::SubClient { client, raw })
        }

        LC_CODE_SIGNATURE => {
            let dataoff = byte_order.read_u32(slice, 8)?;
            let datasize = byte_order.read_u32(slice, 12)?;
            Ok(LoadCommand::CodeSignature {
                dataoff,
                datasize,
                raw,
            })
        }

        LC_SEGMENT_SPLIT_INFO => {
            let dataoff = byte_order.read_u32(slice, 8)?;
            let datasize = byte_order.read_u32(slice, 12)?;
            Ok(LoadCommand::SplitInfo {
                dataoff,
                datasize,
                raw,
            })
        }

        LC_FUNCTION_STARTS => {
            let dataoff = byte_order.read_u32(slice, 8)?;
            let datasize = byte_order.read_u32(slice, 12)?;
            Ok(LoadCommand::FunctionStarts {
                dataoff,
                datasize,
                raw,
            })
        }

        LC_DATA_IN_CODE => {
            let dataoff = byte_order.read_u32(slice, 8)?;
            let datasize = byte_order.read_u32(slice, 12)?;
            let entries = read_data_in_code_entries(source, dataoff, datasize, byte_order)?;
            Ok(LoadCommand::DataInCode {
                dataoff,
                datasize,
                entries,
                raw,
            })
        }

        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
            Ok(LoadCommand::DyldInfo(DyldInfoCommand {
                rebase_off: byte_order.read_u32(slice, 8)?,
                rebase_size: byte_order.read_u32(slice, 12)?,
                bind_off: byte_order.read_u32(slice, 16)?,
                bind_size: byte_order.read_u32(slice, 20)?,
                weak_bind_off: byte_order.read_u32(slice, 24)?,
                weak_bind_size: byte_order.read_u32(slice, 28)?,
                lazy_bind_off: byte_order.read_u32(slice, 32)?,
                lazy_bind_size: byte_order.read_u32(slice, 36)?,
                export_off: byte_order.read_u32(slice, 40)?,
                export_size: byte_order.read_u32(slice, 44)?,
            }))
        }

        LC_SOURCE_VERSION => {
            let version = byte_order.read_u64(slice, 8)?;
            let decoded = decode_source_version(version);
            Ok(LoadCommand::SourceVersion { version, decoded, raw })
        }

        LC_BUILD_VERSION => {
            let platform = byte_order.read_u32(slice, 8)?;
            let min_os = decode_xyz_version(byte_order.read_u32(slice, 12)?);
            let sdk = decode_xyz_version(byte_order.read_u32(slice, 16)?);
            let ntools = byte_order.read_u32(slice, 20)?;
            let mut tools = Vec::with_capacity(ntools as usize);
            let mut tool_pos = 24usize;
            for _ in 0..ntools {
                if tool_pos + 8 > slice.len() {
                    return Err(Error::CommandBlockTooSmall {
                        offset: command_offset + tool_pos as u64,
                    });
                }
                let tool = byte_order.read_u32(slice, tool_pos)?;
                let version = decode_xyz_version(byte_order.read_u32(slice, tool_pos + 4)?);
                tools.push(BuildToolEntry { tool, version });
                tool_pos += 8;
            }
            Ok(LoadCommand::BuildVersion(BuildVersionCommand {
                platform,
                min_os,
                sdk,
                tools,
            }))
        }

        LC_ROUTINES_64 => {
            let init_address = byte_order.read_u64(slice, 8)?;
            let init_module = byte_order.read_u64(slice, 16)?;
            Ok(LoadCommand::Routines64 {
                init_address,
                init_module,
                raw,
            })
        }

        other => {
            log::debug!("unrecognised load command {other:#x} at offset {command_offset}, keeping raw bytes");
            Ok(LoadCommand::Unknown { cmd: other, raw })
        }
    }
}

/// Reads the `data_in_code_entry` array (§3.1): each entry is `offset: u32,
/// length: u16, kind: u16`, covering a span of non-instruction data
/// embedded in a text section (jump tables, literal pools).
fn read_data_in_code_entries(
    source: &Arc<dyn Source>,
    dataoff: u32,
    datasize: u32,
    byte_order: ByteOrder,
) -> Result<Vec<DataInCodeEntry>> {
    if datasize == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; datasize as usize];
    source
        .as_ref()
        .read_exact_at(dataoff as u64, &mut buf)
        .map_err(Error::Io)?;

    const ENTRY_SIZE: usize = 8;
    let count = buf.len() / ENTRY_SIZE;
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * ENTRY_SIZE;
        entries.push(DataInCodeEntry {
            offset: byte_order.read_u32(&buf, base)?,
            length: byte_order.read_u16(&buf, base + 4)?,
            kind: byte_order.read_u16(&buf, base + 6)?,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source as _;

    fn empty_source() -> Arc<dyn Source> {
        Arc::new(Vec::<u8>::new())
    }

    #[test]
    fn decodes_uuid_command() {
        let mut slice = vec![0u8; 24];
        slice[0..4].copy_from_slice(&LC_UUID.to_le_bytes());
        slice[4..8].copy_from_slice(&24u32.to_le_bytes());
        for (i, b) in slice[8..24].iter_mut().enumerate() {
            *b = i as u8;
        }
        let source = empty_source();
        let cmd = decode_one(
            LC_UUID,
            &slice,
            ByteOrder::Little,
            true,
            0,
            &source,
            false,
        )
        .unwrap();
        match cmd {
            LoadCommand::Uuid { uuid, .. } => {
                assert_eq!(uuid, [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15])
            }
            _ => panic!("expected Uuid"),
        }
    }

    #[test]
    fn decodes_dylib_name_and_rejects_out_of_range_offset() {
        let mut slice = vec![0u8; 24];
        slice[0..4].copy_from_slice(&LC_LOAD_DYLIB.to_le_bytes());
        slice[4..8].copy_from_slice(&24u32.to_le_bytes());
        slice[8..12].copy_from_slice(&16u32.to_le_bytes()); // name offset
        slice[16..20].copy_from_slice(b"lib\0");
        let source = empty_source();
        let cmd = decode_one(
            LC_LOAD_DYLIB,
            &slice,
            ByteOrder::Little,
            true,
            0,
            &source,
            false,
        )
        .unwrap();
        match cmd {
            LoadCommand::Dylib(d) => {
                assert_eq!(d.kind, DylibKind::Load);
                assert_eq!(d.name, "lib");
            }
            _ => panic!("expected Dylib"),
        }

        // Now corrupt the offset to point past the command.
        slice[8..12].copy_from_slice(&1000u32.to_le_bytes());
        let err = decode_one(
            LC_LOAD_DYLIB,
            &slice,
            ByteOrder::Little,
            true,
            0,
            &source,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[test]
    fn unknown_command_is_preserved_as_raw() {
        let slice = vec![0u8; 8];
        let source = empty_source();
        let cmd = decode_one(0xdead_beef, &slice, ByteOrder::Little, true, 0, &source, false)
            .unwrap();
        assert!(matches!(cmd, LoadCommand::Unknown { cmd: 0xdead_beef, .. }));
    }

    #[test]
    fn rejects_truncated_command_block() {
        let cmd_block = vec![0u8; 4]; // shorter than a single command header
        let source = empty_source();
        let err =
            parse_load_commands(&cmd_block, 1, 8, ByteOrder::Little, true, 32, &source, false)
                .unwrap_err();
        assert!(matches!(err, Error::CommandBlockTooSmall { .. }));
    }
}

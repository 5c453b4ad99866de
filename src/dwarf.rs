/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! The DWARF shim (§4.7): collects `__debug_*`/`__zdebug_*` sections,
//! inflating any that are ZLIB-compressed, and hands them to `gimli` for
//! actual DIE decoding. Decoding the debug information itself is out of
//! scope for this crate; see the design's Non-goals.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;
use gimli::{Dwarf, EndianSlice, RunTimeEndian, SectionId};

use crate::endian::ByteOrder;
use crate::error::{Error, Result};
use crate::macho::File as MachOFile;

const DEBUG_PREFIX: &str = "__debug_";
const ZDEBUG_PREFIX: &str = "__zdebug_";

/// The section suffixes §4.7 requires ("feed the required set ... to the
/// DWARF decoder"); missing ones are logged rather than treated as fatal,
/// since `gimli` tolerates an absent optional section.
const REQUIRED_SECTIONS: [(&str, SectionId); 5] = [
    ("abbrev", SectionId::DebugAbbrev),
    ("info", SectionId::DebugInfo),
    ("str", SectionId::DebugStr),
    ("line", SectionId::DebugLine),
    ("ranges", SectionId::DebugRanges),
];

fn section_id_for_suffix(suffix: &str) -> Option<SectionId> {
    Some(match suffix {
        "abbrev" => SectionId::DebugAbbrev,
        "info" => SectionId::DebugInfo,
        "str" => SectionId::DebugStr,
        "line" => SectionId::DebugLine,
        "ranges" => SectionId::DebugRanges,
        "loc" => SectionId::DebugLoc,
        "aranges" => SectionId::DebugAranges,
        "line_str" => SectionId::DebugLineStr,
        "str_offsets" => SectionId::DebugStrOffsets,
        "addr" => SectionId::DebugAddr,
        "rnglists" => SectionId::DebugRngLists,
        "loclists" => SectionId::DebugLocLists,
        "pubnames" => SectionId::DebugPubNames,
        "pubtypes" => SectionId::DebugPubTypes,
        "macinfo" => SectionId::DebugMacinfo,
        "macro" => SectionId::DebugMacro,
        // "types" is handled separately: a Mach-O file may carry more
        // than one, so it isn't folded into the single-section `Dwarf`.
        _ => return None,
    })
}

/// Inflates `bytes` if it starts with the `ZLIB` magic followed by an
/// 8-byte big-endian decompressed length (§4.7); otherwise returns it
/// unchanged.
fn maybe_inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() >= 12 && &bytes[0..4] == b"ZLIB" {
        let declared_len = u64::from_be_bytes(bytes[4..12].try_into().unwrap()) as usize;
        let mut decoder = ZlibDecoder::new(&bytes[12..]);
        let mut out = Vec::with_capacity(declared_len);
        decoder.read_to_end(&mut out).map_err(Error::Io)?;
        Ok(out)
    } else {
        Ok(bytes.to_vec())
    }
}

/// The DWARF-bearing sections collected from a [`MachOFile`], ready to be
/// handed to `gimli`.
///
/// Built once via [`DwarfSections::collect`]; [`DwarfSections::dwarf`]
/// borrows from it on demand rather than copying the (possibly large,
/// possibly decompressed) section bytes again.
pub struct DwarfSections {
    byte_order: ByteOrder,
    sections: HashMap<SectionId, Vec<u8>>,
    /// `__debug_types`/`__zdebug_types` sections, in the order found,
    /// keyed by a stable `types-<index>` name (§4.7).
    type_units: Vec<(String, Vec<u8>)>,
}

impl DwarfSections {
    /// Scans every section in `file` for one whose name begins with
    /// `__debug_` or `__zdebug_`, inflating any that are ZLIB-compressed.
    pub fn collect(file: &MachOFile) -> Result<Self> {
        let mut sections = HashMap::new();
        let mut type_units = Vec::new();

        for section in file.sections() {
            let name = section.sectname.as_str();
            let suffix = name
                .strip_prefix(DEBUG_PREFIX)
                .or_else(|| name.strip_prefix(ZDEBUG_PREFIX));
            let Some(suffix) = suffix else {
                continue;
            };

            let raw = section.read_all()?;
            let data = maybe_inflate(&raw)?;

            if suffix == "types" {
                let index = type_units.len();
                type_units.push((format!("types-{index}"), data));
                continue;
            }

            if let Some(id) = section_id_for_suffix(suffix) {
                sections.insert(id, data);
            }
        }

        Ok(DwarfSections {
            byte_order: file.byte_order(),
            sections,
            type_units,
        })
    }

    fn endian(&self) -> RunTimeEndian {
        match self.byte_order {
            ByteOrder::Little => RunTimeEndian::Little,
            ByteOrder::Big => RunTimeEndian::Big,
        }
    }

    /// Builds a `gimli::Dwarf` borrowing the sections this shim
    /// collected. Missing optional sections resolve to an empty slice,
    /// which `gimli` treats the same as "not present".
    pub fn dwarf(&self) -> std::result::Result<Dwarf<EndianSlice<'_, RunTimeEndian>>, gimli::Error> {
        for (name, id) in REQUIRED_SECTIONS {
            if !self.sections.contains_key(id) {
                log::debug!("no __debug_{name}/__zdebug_{name} section found");
            }
        }
        let endian = self.endian();
        Dwarf::load(|id| -> std::result::Result<_, gimli::Error> {
            let data = self.sections.get(&id).map(Vec::as_slice).unwrap_or(&[]);
            Ok(EndianSlice::new(data, endian))
        })
    }

    /// Every `__debug_types`/`__zdebug_types` section found, keyed by its
    /// stable `types-<index>` name. Registered as auxiliary type units
    /// rather than folded into [`DwarfSections::dwarf`]'s single
    /// `debug_types` slot, since Mach-O builds can carry several.
    pub fn type_units(&self) -> impl Iterator<Item = (&str, EndianSlice<'_, RunTimeEndian>)> {
        let endian = self.endian();
        self.type_units
            .iter()
            .map(move |(name, data)| (name.as_str(), EndianSlice::new(data, endian)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflates_zlib_prefixed_section() {
        use std::io::Write;
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello debug info").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut framed = Vec::new();
        framed.extend_from_slice(b"ZLIB");
        framed.extend_from_slice(&17u64.to_be_bytes());
        framed.extend_from_slice(&compressed);

        let out = maybe_inflate(&framed).unwrap();
        assert_eq!(out, b"hello debug info");
    }

    #[test]
    fn passes_through_uncompressed_bytes() {
        let out = maybe_inflate(b"plain dwarf bytes").unwrap();
        assert_eq!(out, b"plain dwarf bytes");
    }

    #[test]
    fn section_id_recognises_required_suffixes() {
        for suffix in ["abbrev", "info", "str", "line", "ranges"] {
            assert!(section_id_for_suffix(suffix).is_some(), "{suffix}");
        }
        assert!(section_id_for_suffix("types").is_none());
        assert!(section_id_for_suffix("not_a_real_section").is_none());
    }
}

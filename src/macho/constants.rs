/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Load-command tag values and other opaque constants.
//!
//! Per the Non-goals, this crate treats these as tag values with
//! documented semantics rather than exhaustively modelling every flag
//! bitset (e.g. section flags, protection bits); callers who need that can
//! interpret the raw `u32`s exposed alongside each decoded command.

/// Commands introduced after the original, non-dynamic-linker Mach-O
/// format have this bit set in their `cmd` value.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
pub const LC_SUB_CLIENT: u32 = 0x14;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_ROUTINES_64: u32 = 0x1a;
pub const LC_UUID: u32 = 0x1b;
pub const LC_RPATH: u32 = 0x1c | LC_REQ_DYLD;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_SOURCE_VERSION: u32 = 0x2A;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_BUILD_VERSION: u32 = 0x32;

/// Which of the six dylib-reference load commands a [`super::DylibCommand`]
/// was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DylibKind {
    /// `LC_LOAD_DYLIB`.
    Load,
    /// `LC_ID_DYLIB`.
    Id,
    /// `LC_LOAD_WEAK_DYLIB`.
    Weak,
    /// `LC_REEXPORT_DYLIB`.
    Reexport,
    /// `LC_LOAD_UPWARD_DYLIB`.
    Upward,
    /// `LC_LAZY_LOAD_DYLIB`.
    Lazy,
}

impl DylibKind {
    pub(crate) fn from_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            LC_LOAD_DYLIB => Some(Self::Load),
            LC_ID_DYLIB => Some(Self::Id),
            LC_LOAD_WEAK_DYLIB => Some(Self::Weak),
            LC_REEXPORT_DYLIB => Some(Self::Reexport),
            LC_LOAD_UPWARD_DYLIB => Some(Self::Upward),
            LC_LAZY_LOAD_DYLIB => Some(Self::Lazy),
            _ => None,
        }
    }
}

/// The platform named by an `LC_VERSION_MIN_*` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionMinPlatform {
    MacOsx,
    IPhoneOs,
    TvOs,
    WatchOs,
}

impl VersionMinPlatform {
    pub(crate) fn from_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            LC_VERSION_MIN_MACOSX => Some(Self::MacOsx),
            LC_VERSION_MIN_IPHONEOS => Some(Self::IPhoneOs),
            LC_VERSION_MIN_TVOS => Some(Self::TvOs),
            LC_VERSION_MIN_WATCHOS => Some(Self::WatchOs),
            _ => None,
        }
    }
}

/// Decodes a packed `A.B.C` version of the form `a16.b8.c8` used by
/// `LC_VERSION_MIN_*` and `LC_BUILD_VERSION`.
pub fn decode_xyz_version(packed: u32) -> (u16, u8, u8) {
    (
        (packed >> 16) as u16,
        ((packed >> 8) & 0xff) as u8,
        (packed & 0xff) as u8,
    )
}

/// Decodes the packed `A.B.C.D.E` source version used by `LC_SOURCE_VERSION`,
/// stored as `a24.b10.c10.d10.e10`.
pub fn decode_source_version(packed: u64) -> (u64, u16, u16, u16, u16) {
    (
        packed >> 40,
        ((packed >> 30) & 0x3ff) as u16,
        ((packed >> 20) & 0x3ff) as u16,
        ((packed >> 10) & 0x3ff) as u16,
        (packed & 0x3ff) as u16,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_xyz_version() {
        // 12.3.1 packed as 0x000C0301
        assert_eq!(decode_xyz_version(0x000C_0301), (12, 3, 1));
    }

    #[test]
    fn decodes_source_version() {
        let (a, b, c, d, e) = decode_source_version(0);
        assert_eq!((a, b, c, d, e), (0, 0, 0, 0, 0));
    }

    #[test]
    fn dylib_kind_from_cmd() {
        assert_eq!(DylibKind::from_cmd(LC_LOAD_DYLIB), Some(DylibKind::Load));
        assert_eq!(
            DylibKind::from_cmd(LC_REEXPORT_DYLIB),
            Some(DylibKind::Reexport)
        );
        assert_eq!(DylibKind::from_cmd(LC_SEGMENT), None);
    }
}

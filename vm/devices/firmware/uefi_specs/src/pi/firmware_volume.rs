// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware volume headers.

use self::packed_nums::*;
use guid::Guid;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[allow(non_camel_case_types)]
mod packed_nums {
    pub type u64_le = zerocopy::U64<zerocopy::LittleEndian>;
}

/// `_FVH`
pub const EFI_FVH_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");

/// PI spec Vol. 3, 3.2.1 - revision implemented by this header layout.
pub const EFI_FVH_REVISION: u8 = 0x02;

/// File system GUID of a firmware volume that holds the NV variable store.
pub const EFI_SYSTEM_NV_DATA_FV_GUID: Guid =
    Guid::from_static_str("fff12b8d-7696-4c8b-a985-2747075b4f50");

/// Attributes the variable store firmware volume is created with
/// (`EFI_FVB2_READ_ENABLED_CAP | ... | EFI_FVB2_ALIGNMENT_16`).
pub const EFI_FVB2_NV_STORE_ATTRIBUTES: u32 = 0x0004_feff;

/// PI spec Vol. 3, 3.2.1 - EFI_FIRMWARE_VOLUME_HEADER
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EFI_FIRMWARE_VOLUME_HEADER {
    pub zero_vector: [u8; 16],
    pub file_system_guid: Guid,
    pub fv_length: u64_le,
    pub signature: u32,
    pub attributes: u32,
    /// Length of this header plus the block map, including its terminator.
    pub header_length: u16,
    /// Makes the 16-bit sum of the header and block map zero.
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
    // EFI_FV_BLOCK_MAP_ENTRY BlockMap[];
}

const_assert_eq!(size_of::<EFI_FIRMWARE_VOLUME_HEADER>(), 56);

/// PI spec Vol. 3, 3.2.1 - EFI_FV_BLOCK_MAP_ENTRY
///
/// The block map is terminated by an all-zero entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EFI_FV_BLOCK_MAP_ENTRY {
    pub num_blocks: u32,
    pub length: u32,
}

const_assert_eq!(size_of::<EFI_FV_BLOCK_MAP_ENTRY>(), 8);

impl EFI_FV_BLOCK_MAP_ENTRY {
    pub const TERMINATOR: Self = Self {
        num_blocks: 0,
        length: 0,
    };
}

/// Computes the value for [`EFI_FIRMWARE_VOLUME_HEADER::checksum`] such that
/// the 16-bit sum over `header` (header plus block map) is zero.
///
/// `header` must contain the checksum field set to zero.
pub fn fv_header_checksum(header: &[u8]) -> u16 {
    0u16.wrapping_sub(sum16(header))
}

/// Returns the 16-bit little-endian word sum of `data`, which is zero for a
/// correctly checksummed header.
pub fn sum16(data: &[u8]) -> u16 {
    data.chunks(2).fold(0u16, |sum, word| {
        let word = match *word {
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            [lo] => lo.into(),
            _ => 0,
        };
        sum.wrapping_add(word)
    })
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! EDK2 `VariableFormat.h`: the layout of the variable region inside the NV
//! store firmware volume.

use self::packed_nums::*;
use crate::uefi::time::EFI_TIME;
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

/// `gEfiAuthenticatedVariableGuid`: the store uses
/// [`AUTHENTICATED_VARIABLE_HEADER`].
pub const EFI_AUTHENTICATED_VARIABLE_GUID: Guid =
    Guid::from_static_str("aaf32c78-947b-439a-a180-2e144ec37792");

/// `gEfiVariableGuid`: the store uses the plain variable header, without
/// authentication fields.
pub const EFI_VARIABLE_GUID: Guid = Guid::from_static_str("ddcf3616-3275-4164-98b6-fe85707ffe7d");

/// `VARIABLE_STORE_FORMATTED`
pub const VARIABLE_STORE_FORMATTED: u8 = 0x5a;
/// `VARIABLE_STORE_HEALTHY`
pub const VARIABLE_STORE_HEALTHY: u8 = 0xfe;

/// `VARIABLE_DATA`: marks the start of every variable header.
pub const VARIABLE_DATA: u16 = 0x55aa;

/// Alignment of variable headers in the store.
pub const HEADER_ALIGNMENT: usize = 4;

/// Variable state bits. These are cleared one at a time as a variable moves
/// through its lifecycle, so a flash write never has to set a bit.
pub mod var_state {
    /// Variable is in obsoleting transition.
    pub const VAR_IN_DELETED_TRANSITION: u8 = 0xfe;
    /// Variable is obsolete.
    pub const VAR_DELETED: u8 = 0xfd;
    /// Variable header has been valid.
    pub const VAR_HEADER_VALID_ONLY: u8 = 0x7f;
    /// Variable has been completely added.
    pub const VAR_ADDED: u8 = 0x3f;
}

/// `VARIABLE_STORE_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VARIABLE_STORE_HEADER {
    /// [`EFI_AUTHENTICATED_VARIABLE_GUID`] or [`EFI_VARIABLE_GUID`].
    pub signature: Guid,
    /// Size of the variable store, including this header.
    pub size: u32,
    pub format: u8,
    pub state: u8,
    pub reserved: u16,
    pub reserved1: u32,
}

const_assert_eq!(size_of::<VARIABLE_STORE_HEADER>(), 28);

/// `AUTHENTICATED_VARIABLE_HEADER`
///
/// Followed by `name_size` bytes of NUL-terminated UCS-2 name, then
/// `data_size` bytes of data.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct AUTHENTICATED_VARIABLE_HEADER {
    /// [`VARIABLE_DATA`]
    pub start_id: u16,
    /// One of the [`var_state`] values.
    pub state: u8,
    pub reserved: u8,
    pub attributes: u32,
    pub monotonic_count: u64_le,
    pub timestamp: EFI_TIME,
    pub pub_key_index: u32,
    pub name_size: u32,
    pub data_size: u32,
    pub vendor_guid: Guid,
}

const_assert_eq!(size_of::<AUTHENTICATED_VARIABLE_HEADER>(), 60);

/// `VARIABLE_HEADER`, the header of a store without authentication support.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VARIABLE_HEADER {
    pub start_id: u16,
    pub state: u8,
    pub reserved: u8,
    pub attributes: u32,
    pub name_size: u32,
    pub data_size: u32,
    pub vendor_guid: Guid,
}

const_assert_eq!(size_of::<VARIABLE_HEADER>(), 32);

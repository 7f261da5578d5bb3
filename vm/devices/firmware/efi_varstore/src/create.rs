// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Creation of empty variable store images.
//!
//! The layout matches what OVMF expects of its NV flash:
//!
//! ```text
//! +--------------------------------+ 0
//! | firmware volume header         |
//! | variable store header          |
//! | variables (erased)             |
//! +--------------------------------+ size / 2 - 2 * block
//! | NV event log (one block)       |
//! +--------------------------------+
//! | FTW working block header       |
//! | (erased up to the spare area)  |
//! +--------------------------------+ size / 2
//! | FTW spare area                 |
//! +--------------------------------+ size
//! ```

use crate::Error;
use uefi_specs::edk2::fault_tolerant_write::EDKII_WORKING_BLOCK_SIGNATURE_GUID;
use uefi_specs::edk2::fault_tolerant_write::EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER;
use uefi_specs::edk2::fault_tolerant_write::WORKING_BLOCK_VALID;
use uefi_specs::edk2::variable_format::EFI_AUTHENTICATED_VARIABLE_GUID;
use uefi_specs::edk2::variable_format::VARIABLE_STORE_FORMATTED;
use uefi_specs::edk2::variable_format::VARIABLE_STORE_HEADER;
use uefi_specs::edk2::variable_format::VARIABLE_STORE_HEALTHY;
use uefi_specs::pi::firmware_volume::fv_header_checksum;
use uefi_specs::pi::firmware_volume::EFI_FIRMWARE_VOLUME_HEADER;
use uefi_specs::pi::firmware_volume::EFI_FVB2_NV_STORE_ATTRIBUTES;
use uefi_specs::pi::firmware_volume::EFI_FVH_REVISION;
use uefi_specs::pi::firmware_volume::EFI_FVH_SIGNATURE;
use uefi_specs::pi::firmware_volume::EFI_FV_BLOCK_MAP_ENTRY;
use uefi_specs::pi::firmware_volume::EFI_SYSTEM_NV_DATA_FV_GUID;
use zerocopy::IntoBytes;

/// Flash block size used for new images.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest image that leaves room for variables: four blocks of variable
/// store, event log and FTW header, mirrored by the spare area.
const MIN_BLOCKS: usize = 8;

pub(crate) fn create_image(size: usize, block_size: usize) -> Result<Vec<u8>, Error> {
    if size < MIN_BLOCKS * block_size || size % (2 * block_size) != 0 || size > u32::MAX as usize
    {
        return Err(Error::UnsupportedSize(size));
    }

    let mut image = vec![0xff; size];
    let var_store_size = size / 2 - 2 * block_size;

    let block_map = [
        EFI_FV_BLOCK_MAP_ENTRY {
            num_blocks: (size / block_size) as u32,
            length: block_size as u32,
        },
        EFI_FV_BLOCK_MAP_ENTRY::TERMINATOR,
    ];
    let header_length = size_of::<EFI_FIRMWARE_VOLUME_HEADER>() + block_map.as_bytes().len();
    let mut fvh = EFI_FIRMWARE_VOLUME_HEADER {
        zero_vector: [0; 16],
        file_system_guid: EFI_SYSTEM_NV_DATA_FV_GUID,
        fv_length: (size as u64).into(),
        signature: EFI_FVH_SIGNATURE,
        attributes: EFI_FVB2_NV_STORE_ATTRIBUTES,
        header_length: header_length as u16,
        checksum: 0,
        ext_header_offset: 0,
        reserved: 0,
        revision: EFI_FVH_REVISION,
    };
    let fvh_len = size_of::<EFI_FIRMWARE_VOLUME_HEADER>();
    image[..fvh_len].copy_from_slice(fvh.as_bytes());
    image[fvh_len..header_length].copy_from_slice(block_map.as_bytes());
    fvh.checksum = fv_header_checksum(&image[..header_length]);
    image[..fvh_len].copy_from_slice(fvh.as_bytes());

    let vsh = VARIABLE_STORE_HEADER {
        signature: EFI_AUTHENTICATED_VARIABLE_GUID,
        size: (var_store_size - header_length) as u32,
        format: VARIABLE_STORE_FORMATTED,
        state: VARIABLE_STORE_HEALTHY,
        reserved: 0,
        reserved1: 0,
    };
    image[header_length..][..size_of::<VARIABLE_STORE_HEADER>()].copy_from_slice(vsh.as_bytes());

    // The event log block stays erased.
    let ftw_offset = var_store_size + block_size;
    let ftw_len = size_of::<EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER>();
    let mut ftw = EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER {
        signature: EDKII_WORKING_BLOCK_SIGNATURE_GUID,
        crc: 0,
        working_block_valid: WORKING_BLOCK_VALID,
        write_queue_size: (block_size - ftw_len) as u64,
    };
    ftw.crc = crc32fast::hash(ftw.as_bytes());
    image[ftw_offset..][..ftw_len].copy_from_slice(ftw.as_bytes());

    tracing::debug!(size, var_store_size, "created empty variable store");
    Ok(image)
}

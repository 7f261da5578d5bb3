// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! EDK2 `SystemNvDataGuid.h`: the fault tolerant write (FTW) working block
//! that follows the variable store in the NV flash image.

use guid::Guid;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// `gEdkiiWorkingBlockSignatureGuid`
pub const EDKII_WORKING_BLOCK_SIGNATURE_GUID: Guid =
    Guid::from_static_str("9e58292b-7c68-497d-a0ce-6500fd9f1b95");

/// Working block valid, not invalid, all reserved bits still erased.
pub const WORKING_BLOCK_VALID: u32 = 0xffff_fffe;

/// `EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER {
    pub signature: Guid,
    /// CRC32 of this header, computed with this field set to zero.
    pub crc: u32,
    /// `WorkingBlockValid:1`, `WorkingBlockInvalid:1`, reserved.
    pub working_block_valid: u32,
    pub write_queue_size: u64,
}

const_assert_eq!(size_of::<EFI_FAULT_TOLERANT_WORKING_BLOCK_HEADER>(), 32);

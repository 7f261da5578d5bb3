// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! On-flash formats defined by EDK2 rather than by a spec.
//!
//! These are what OVMF-derived firmware expects to find in its NVRAM flash
//! image: `MdeModulePkg/Include/Guid/VariableFormat.h` and
//! `MdeModulePkg/Include/Guid/SystemNvDataGuid.h`.

pub mod fault_tolerant_write;
pub mod variable_format;

pub mod vars {
    use guid::Guid;

    /// `gEfiSecureBootEnableDisableGuid`, owner of the `SecureBootEnable`
    /// setup variable.
    pub const EFI_SECURE_BOOT_ENABLE_DISABLE: Guid =
        Guid::from_static_str("f0a30bc7-af08-4556-99c4-001009c93a44");

    defn_nvram_var!(SECURE_BOOT_ENABLE = (EFI_SECURE_BOOT_ENABLE_DISABLE, "SecureBootEnable"));
}

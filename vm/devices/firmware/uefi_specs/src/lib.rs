// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants for the UEFI NVRAM formats.
//!
//! This crate is divided into 4 submodules:
//!
//! - `uefi`: types directly lifted from the official UEFI spec
//! - `pi`: types from the Platform Initialization spec (firmware volumes)
//! - `edk2`: on-flash formats private to the EDK2 variable and FTW drivers
//! - `linux`: types specific to UEFI on Linux (shim)

#![no_std]
#![allow(non_camel_case_types)]

/// Defines a `NvramVar` constant for a well-known variable.
macro_rules! defn_nvram_var {
    ($varname:ident = ($guid:expr, $name:literal)) => {
        pub const $varname: $crate::uefi::nvram::NvramVar = $crate::uefi::nvram::NvramVar {
            vendor: $guid,
            name: $name,
        };
    };
}

pub mod edk2;
pub mod linux;
pub mod pi;
pub mod uefi;

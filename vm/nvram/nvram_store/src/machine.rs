// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The view of the owning virtual machine that the store depends on.

use std::path::PathBuf;
use thiserror::Error;

/// Error returned by [`MachineContext::check_mutable`].
#[derive(Error, Debug)]
#[error("machine state check failed")]
pub struct MachineError(#[from] anyhow::Error);

impl MachineError {
    /// Create a new [`MachineError`]
    pub fn new(e: impl Into<anyhow::Error>) -> MachineError {
        Self(e.into())
    }
}

/// Firmware the machine is configured to boot with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FirmwareType {
    Bios,
    Efi,
    Efi32,
    Efi64,
    EfiDual,
}

impl FirmwareType {
    /// Returns true if the firmware keeps its variables in a UEFI variable
    /// store.
    pub fn is_uefi(&self) -> bool {
        !matches!(self, FirmwareType::Bios)
    }
}

/// The machine that owns an NVRAM store.
pub trait MachineContext: Send + Sync {
    /// Fails unless the machine configuration may currently be changed.
    fn check_mutable(&self) -> Result<(), MachineError>;

    /// The configured firmware type.
    fn firmware_type(&self) -> FirmwareType;

    /// Directory holding the machine settings. Relative NVRAM paths are
    /// resolved against it.
    fn settings_dir(&self) -> PathBuf;

    /// Default NVRAM file name, used when no path is configured. `None` if
    /// the machine does not have one (for example because it was never
    /// saved).
    fn default_nvram_file_name(&self) -> Option<String>;

    /// Flags the machine settings as modified by the NVRAM store.
    fn set_modified(&self);
}

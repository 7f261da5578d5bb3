// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A [`MachineContext`] for tests.

use crate::FirmwareType;
use crate::MachineContext;
use crate::MachineError;
use crate::NvramStore;
use crate::SecretKeyStore;
use parking_lot::Mutex;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug)]
pub struct TestMachine {
    settings_dir: PathBuf,
    default_name: Mutex<Option<String>>,
    firmware: Mutex<FirmwareType>,
    mutable: AtomicBool,
    modified: AtomicBool,
}

impl TestMachine {
    /// A mutable EFI machine keeping its settings in `settings_dir`, with
    /// default NVRAM file `test.nvram`.
    pub fn new(settings_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            settings_dir: settings_dir.to_owned(),
            default_name: Mutex::new(Some("test.nvram".into())),
            firmware: Mutex::new(FirmwareType::Efi),
            mutable: AtomicBool::new(true),
            modified: AtomicBool::new(false),
        })
    }

    pub fn set_firmware(&self, firmware: FirmwareType) {
        *self.firmware.lock() = firmware;
    }

    pub fn set_default_name(&self, name: Option<&str>) {
        *self.default_name.lock() = name.map(Into::into);
    }

    pub fn set_mutable(&self, mutable: bool) {
        self.mutable.store(mutable, Ordering::SeqCst);
    }

    /// Returns and clears the modified flag.
    pub fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::SeqCst)
    }

    /// A store for this machine with an empty key store.
    pub fn store(self: &Arc<Self>) -> NvramStore {
        NvramStore::new(self.clone(), Arc::new(SecretKeyStore::new()))
    }
}

impl MachineContext for TestMachine {
    fn check_mutable(&self) -> Result<(), MachineError> {
        if self.mutable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MachineError::new(anyhow::anyhow!("machine is running")))
        }
    }

    fn firmware_type(&self) -> FirmwareType {
        *self.firmware.lock()
    }

    fn settings_dir(&self) -> PathBuf {
        self.settings_dir.clone()
    }

    fn default_nvram_file_name(&self) -> Option<String> {
        self.default_name.lock().clone()
    }

    fn set_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }
}

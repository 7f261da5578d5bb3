// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Checked-out views of the UEFI variable store entry.

use crate::NvramData;
use crate::UEFI_NVRAM_ENTRY;
use efi_varstore::EfiVarStore;
use lifecycle_guard::AutoCaller;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use std::ops::Deref;
use std::ops::DerefMut;

/// Shared, read-only access to the UEFI variable store.
///
/// Holds the NVRAM store's lock for reading until dropped.
pub struct UefiVarStoreRef<'a> {
    pub(crate) store: EfiVarStore,
    pub(crate) _data: RwLockReadGuard<'a, NvramData>,
    pub(crate) _caller: AutoCaller<'a>,
}

impl std::fmt::Debug for UefiVarStoreRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UefiVarStoreRef")
            .field("variables", &self.store.variables().count())
            .field("used", &self.store.used())
            .finish()
    }
}

impl Deref for UefiVarStoreRef<'_> {
    type Target = EfiVarStore;

    fn deref(&self) -> &EfiVarStore {
        &self.store
    }
}

/// Exclusive access to the UEFI variable store.
///
/// Changes are written back to the `efi/nvram` entry when the handle is
/// dropped. Nothing is written to disk until the NVRAM store is saved.
pub struct UefiVarStoreRefMut<'a> {
    pub(crate) store: EfiVarStore,
    pub(crate) data: RwLockWriteGuard<'a, NvramData>,
    pub(crate) _caller: AutoCaller<'a>,
}

impl std::fmt::Debug for UefiVarStoreRefMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UefiVarStoreRefMut")
            .field("variables", &self.store.variables().count())
            .field("used", &self.store.used())
            .field("dirty", &self.store.is_dirty())
            .finish()
    }
}

impl Deref for UefiVarStoreRefMut<'_> {
    type Target = EfiVarStore;

    fn deref(&self) -> &EfiVarStore {
        &self.store
    }
}

impl DerefMut for UefiVarStoreRefMut<'_> {
    fn deref_mut(&mut self) -> &mut EfiVarStore {
        &mut self.store
    }
}

impl Drop for UefiVarStoreRefMut<'_> {
    fn drop(&mut self) {
        if !self.store.is_dirty() {
            return;
        }
        match self.data.entries.get_mut(UEFI_NVRAM_ENTRY) {
            Some(image) => self.store.flush(image),
            // Only reachable if the entry was deleted under the write lock,
            // which nothing does.
            None => tracing::error!("UEFI variable store entry disappeared, changes lost"),
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-machine NVRAM store.
//!
//! The store is a map of named binary entries. The UEFI variable store lives
//! in the `efi/nvram` entry; device emulations keep their own state under
//! `<namespace>/<path>` keys.
//!
//! On disk, a store holding only the UEFI variable store is written as the
//! raw flash image, for compatibility with machines created before other
//! entries existed. Anything else is written as a tar archive with one member
//! per entry. Either form may be wrapped in authenticated encryption (see
//! [`encrypt`]).
//!
//! The file is read lazily, the first time an entry is needed.

#![forbid(unsafe_code)]

pub mod archive;
pub mod encrypt;
mod error;
pub mod key_store;
pub mod machine;
mod settings;
#[cfg(any(test, feature = "test_helpers"))]
pub mod test_helpers;
pub mod transaction;
mod uefi;

pub use error::var_store_error_kind;
pub use error::Error;
pub use error::ErrorKind;
pub use key_store::KeyStoreError;
pub use key_store::RetainedKey;
pub use key_store::SecretKeyStore;
pub use machine::FirmwareType;
pub use machine::MachineContext;
pub use machine::MachineError;
pub use settings::NvramSettings;
pub use settings::SavedState;
pub use uefi::UefiVarStoreRef;
pub use uefi::UefiVarStoreRefMut;

use efi_varstore::EfiVarStore;
use lifecycle_guard::AutoCaller;
use lifecycle_guard::ObjectState;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use transaction::Transaction;
use zeroize::Zeroizing;

/// Largest NVRAM file that will be loaded.
pub const MAX_NVRAM_FILE_SIZE: u64 = 1024 * 1024;

/// Size of a newly created UEFI variable store.
pub const DEFAULT_UEFI_NVRAM_SIZE: usize = 540672;

/// Entry holding the UEFI variable store.
pub const UEFI_NVRAM_ENTRY: &str = "efi/nvram";

#[derive(Debug, Default, Clone)]
struct NvramData {
    entries: BTreeMap<String, Vec<u8>>,
    /// The NVRAM file has been read (or there is nothing to read).
    loaded: bool,
}

/// The NVRAM of one machine.
///
/// Settings follow the machine's settings transaction. Entries do not: they
/// are runtime data and are never rolled back.
pub struct NvramStore {
    machine: Arc<dyn MachineContext>,
    keys: Arc<SecretKeyStore>,
    // Lock order: `data` before `settings`.
    settings: Transaction<NvramSettings>,
    data: Arc<RwLock<NvramData>>,
    state: ObjectState,
}

impl std::fmt::Debug for NvramStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("NvramStore")
            .field("state", &self.state.state())
            .field("settings", &*self.settings.read())
            .field("entries", &data.entries.keys().collect::<Vec<_>>())
            .field("loaded", &data.loaded)
            .finish()
    }
}

impl NvramStore {
    /// Creates an empty store for `machine`. Passwords for encrypted NVRAM
    /// files are looked up in `keys`.
    pub fn new(machine: Arc<dyn MachineContext>, keys: Arc<SecretKeyStore>) -> Self {
        Self::with_data(
            machine,
            keys,
            Transaction::new(NvramSettings::default()),
            Arc::default(),
        )
    }

    fn with_data(
        machine: Arc<dyn MachineContext>,
        keys: Arc<SecretKeyStore>,
        settings: Transaction<NvramSettings>,
        data: Arc<RwLock<NvramData>>,
    ) -> Self {
        let this = Self {
            machine,
            keys,
            settings,
            data,
            state: ObjectState::new(),
        };
        if let Ok(mut span) = this.state.init_span() {
            span.set_succeeded();
        }
        this
    }

    /// Creates a peer for `machine` that shares this store's settings and
    /// entries, including uncommitted changes.
    pub fn share(&self, machine: Arc<dyn MachineContext>) -> Result<Self, Error> {
        let _caller = self.caller()?;
        Ok(Self::with_data(
            machine,
            self.keys.clone(),
            self.settings.share(),
            self.data.clone(),
        ))
    }

    /// Creates an independent store for `machine`, starting from a copy of
    /// this store's settings and entries.
    pub fn attach_copy(&self, machine: Arc<dyn MachineContext>) -> Result<Self, Error> {
        let _caller = self.caller()?;
        let data = self.data.read().clone();
        Ok(Self::with_data(
            machine,
            self.keys.clone(),
            self.settings.attach_copy(),
            Arc::new(RwLock::new(data)),
        ))
    }

    /// Tears the store down, waiting for outstanding calls to finish.
    ///
    /// Entries are released unless a peer still shares them.
    pub fn uninit(&self) {
        let Some(_span) = self.state.uninit_span() else {
            return;
        };
        if Arc::strong_count(&self.data) == 1 {
            let mut data = self.data.write();
            data.entries.clear();
            data.loaded = false;
        }
    }

    fn caller(&self) -> Result<AutoCaller<'_>, Error> {
        Ok(self.state.caller()?)
    }

    fn check_mutable(&self) -> Result<(), Error> {
        self.machine
            .check_mutable()
            .map_err(Error::MachineNotMutable)
    }

    fn resolve_path(&self, settings: &NvramSettings) -> PathBuf {
        let name = if settings.nvram_path.is_empty() {
            match self.machine.default_nvram_file_name() {
                Some(name) => name,
                None => return PathBuf::new(),
            }
        } else {
            settings.nvram_path.clone()
        };
        if name.is_empty() {
            return PathBuf::new();
        }
        let path = PathBuf::from(name);
        if path.is_absolute() {
            path
        } else {
            self.machine.settings_dir().join(path)
        }
    }

    /// The file the store is loaded from and saved to. Empty if the machine
    /// has no NVRAM file yet.
    pub fn storage_file_path(&self) -> PathBuf {
        self.resolve_path(&self.settings.read())
    }

    /// Retains the configured secret key and unwraps the data key with it.
    fn data_key(&self, settings: &NvramSettings) -> Result<Zeroizing<Vec<u8>>, Error> {
        let key_id = &settings.key_id;
        let secret = self.keys.retain_key(key_id).map_err(|source| {
            tracelimit::error_ratelimited!(
                key_id = %key_id,
                error = &source as &dyn std::error::Error,
                "failed to retrieve NVRAM encryption key"
            );
            Error::KeyRetrieval {
                key_id: key_id.clone(),
                source,
            }
        })?;
        encrypt::unwrap_data_key(&settings.key_store, secret.secret()).map_err(|source| {
            tracelimit::error_ratelimited!(
                key_id = %key_id,
                error = &source as &dyn std::error::Error,
                "failed to unlock NVRAM key store"
            );
            Error::UnlockKeyStore {
                key_id: key_id.clone(),
                source,
            }
        })
    }

    /// Reads and decodes the NVRAM file at `path`. A missing file is an empty
    /// store.
    fn read_file(
        &self,
        settings: &NvramSettings,
        path: &Path,
    ) -> Result<BTreeMap<String, Vec<u8>>, Error> {
        if path.as_os_str().is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut file = match fs_err::File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no NVRAM file yet");
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(Error::ReadFile(err)),
        };

        let size = file.metadata().map_err(Error::ReadFile)?.len();
        if size > MAX_NVRAM_FILE_SIZE {
            tracelimit::error_ratelimited!(
                path = %path.display(),
                size,
                "NVRAM file is too large"
            );
            return Err(Error::FileTooLarge {
                path: path.to_owned(),
                size,
                limit: MAX_NVRAM_FILE_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(size as usize);
        file.read_to_end(&mut buf).map_err(Error::ReadFile)?;

        if settings.is_encrypted() {
            let key = self.data_key(settings)?;
            buf = encrypt::decrypt(&key, &buf).map_err(|source| {
                tracelimit::error_ratelimited!(
                    key_id = %settings.key_id,
                    path = %path.display(),
                    error = &source as &dyn std::error::Error,
                    "failed to decrypt NVRAM file"
                );
                Error::Decrypt {
                    key_id: settings.key_id.clone(),
                    source,
                }
            })?;
        }

        let entries = decode_nvram(buf)?;
        tracelimit::info_ratelimited!(
            path = %path.display(),
            entries = entries.len(),
            "loaded NVRAM"
        );
        Ok(entries)
    }

    fn ensure_loaded(&self, data: &mut NvramData) -> Result<(), Error> {
        if !data.loaded {
            let settings = self.settings.read().clone();
            let path = self.resolve_path(&settings);
            data.entries = self.read_file(&settings, &path)?;
            data.loaded = true;
        }
        Ok(())
    }

    fn read_loaded(&self) -> Result<RwLockReadGuard<'_, NvramData>, Error> {
        let mut data = self.data.write();
        self.ensure_loaded(&mut data)?;
        Ok(RwLockWriteGuard::downgrade(data))
    }

    fn write_loaded(&self) -> Result<RwLockWriteGuard<'_, NvramData>, Error> {
        let mut data = self.data.write();
        self.ensure_loaded(&mut data)?;
        Ok(data)
    }

    /// Replaces the entries with the contents of the NVRAM file at `path`.
    ///
    /// On failure the entries are left unchanged.
    pub fn load(&self, path: &Path) -> Result<(), Error> {
        let _caller = self.caller()?;
        let mut data = self.data.write();
        let settings = self.settings.read().clone();
        data.entries = self.read_file(&settings, path)?;
        data.loaded = true;
        Ok(())
    }

    /// Writes the entries to the NVRAM file.
    ///
    /// Does nothing if the machine has no NVRAM file path yet, or if there
    /// are no entries.
    pub fn save(&self) -> Result<(), Error> {
        let _caller = self.caller()?;
        let data = self.data.read();
        let settings = self.settings.read().clone();
        let path = self.resolve_path(&settings);
        if path.as_os_str().is_empty() {
            tracing::debug!("no NVRAM file path, not saving");
            return Ok(());
        }
        if data.entries.is_empty() {
            return Ok(());
        }

        let mut buf = match data.entries.get(UEFI_NVRAM_ENTRY) {
            Some(image) if data.entries.len() == 1 => image.clone(),
            _ => archive::write_archive(&data.entries).map_err(Error::BuildArchive)?,
        };
        if settings.is_encrypted() {
            let key = self.data_key(&settings)?;
            buf = encrypt::encrypt(&key, &buf).map_err(|source| {
                tracelimit::error_ratelimited!(
                    key_id = %settings.key_id,
                    error = &source as &dyn std::error::Error,
                    "failed to encrypt NVRAM file"
                );
                Error::Encrypt {
                    key_id: settings.key_id.clone(),
                    source,
                }
            })?;
        }

        fs_err::write(&path, &buf).map_err(Error::WriteFile)?;
        tracing::info!(
            path = %path.display(),
            entries = data.entries.len(),
            len = buf.len(),
            "saved NVRAM"
        );
        Ok(())
    }

    /// Creates the UEFI variable store if it does not exist yet.
    ///
    /// Only the default size is implemented, requested with `size == 0`.
    pub fn init_uefi_variable_store(&self, size: u64) -> Result<(), Error> {
        let _caller = self.caller()?;
        self.check_mutable()?;
        let firmware = self.machine.firmware_type();
        if !firmware.is_uefi() {
            return Err(Error::NotUefiFirmware(firmware));
        }
        if size != 0 {
            return Err(Error::CustomVarStoreSize(size));
        }

        {
            let mut data = self.write_loaded()?;
            if !data.entries.contains_key(UEFI_NVRAM_ENTRY) {
                let image =
                    EfiVarStore::format(DEFAULT_UEFI_NVRAM_SIZE).map_err(Error::VarStore)?;
                data.entries.insert(UEFI_NVRAM_ENTRY.to_owned(), image);
                tracing::info!(
                    size = DEFAULT_UEFI_NVRAM_SIZE,
                    "created UEFI variable store"
                );
            }
        }
        self.machine.set_modified();
        Ok(())
    }

    /// Returns whether the UEFI variable store exists, loading the NVRAM file
    /// if needed.
    pub fn has_uefi_var_store(&self) -> Result<bool, Error> {
        let _caller = self.caller()?;
        self.check_mutable()?;
        Ok(self.read_loaded()?.entries.contains_key(UEFI_NVRAM_ENTRY))
    }

    /// Checks out the UEFI variable store for reading.
    pub fn retain_uefi_var_store(&self) -> Result<UefiVarStoreRef<'_>, Error> {
        let caller = self.caller()?;
        self.check_mutable()?;
        let data = self.read_loaded()?;
        let image = data
            .entries
            .get(UEFI_NVRAM_ENTRY)
            .ok_or(Error::NoUefiVarStore)?;
        let store = EfiVarStore::open(image).map_err(Error::VarStore)?;
        Ok(UefiVarStoreRef {
            store,
            _data: data,
            _caller: caller,
        })
    }

    /// Checks out the UEFI variable store for writing, and flags the machine
    /// settings as modified.
    pub fn retain_uefi_var_store_mut(&self) -> Result<UefiVarStoreRefMut<'_>, Error> {
        let caller = self.caller()?;
        self.check_mutable()?;
        let data = self.write_loaded()?;
        let image = data
            .entries
            .get(UEFI_NVRAM_ENTRY)
            .ok_or(Error::NoUefiVarStore)?;
        let store = EfiVarStore::open(image).map_err(Error::VarStore)?;
        self.machine.set_modified();
        Ok(UefiVarStoreRefMut {
            store,
            data,
            _caller: caller,
        })
    }

    /// Size of the entry `namespace/path`.
    pub fn query_size(&self, namespace: &str, path: &str) -> Result<u64, Error> {
        let _caller = self.caller()?;
        let key = entry_key(namespace, path);
        let data = self.read_loaded()?;
        let entry = data.entries.get(&key).ok_or(Error::EntryNotFound(key))?;
        Ok(entry.len() as u64)
    }

    /// Copies the entry `namespace/path` into `buf`, returning the number of
    /// bytes copied. Entries longer than `buf` are truncated.
    pub fn read_all(&self, namespace: &str, path: &str, buf: &mut [u8]) -> Result<usize, Error> {
        let _caller = self.caller()?;
        let key = entry_key(namespace, path);
        let data = self.read_loaded()?;
        let entry = data.entries.get(&key).ok_or(Error::EntryNotFound(key))?;
        let len = entry.len().min(buf.len());
        buf[..len].copy_from_slice(&entry[..len]);
        Ok(len)
    }

    /// Creates or replaces the entry `namespace/path`.
    pub fn write_all(&self, namespace: &str, path: &str, buf: &[u8]) -> Result<(), Error> {
        let _caller = self.caller()?;
        let key = entry_key(namespace, path);
        let mut data = self.write_loaded()?;
        let entry = data.entries.entry(key).or_default();
        entry.clear();
        entry.extend_from_slice(buf);
        Ok(())
    }

    /// Removes the entry `namespace/path`.
    pub fn delete(&self, namespace: &str, path: &str) -> Result<(), Error> {
        let _caller = self.caller()?;
        let key = entry_key(namespace, path);
        let mut data = self.write_loaded()?;
        match data.entries.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::EntryNotFound(key)),
        }
    }

    /// Names of all entries.
    pub fn entry_names(&self) -> Result<Vec<String>, Error> {
        let _caller = self.caller()?;
        Ok(self.read_loaded()?.entries.keys().cloned().collect())
    }

    /// Removes every entry. The NVRAM file is not reread afterwards.
    pub fn remove_all(&self) -> Result<(), Error> {
        let _caller = self.caller()?;
        let mut data = self.data.write();
        data.entries.clear();
        data.loaded = true;
        Ok(())
    }

    /// Replaces the configuration. The NVRAM file is read again on next use.
    pub fn load_settings(&self, settings: &NvramSettings) -> Result<(), Error> {
        let _caller = self.caller()?;
        let mut data = self.data.write();
        *self.settings.write() = settings.clone();
        data.entries.clear();
        data.loaded = false;
        Ok(())
    }

    pub fn save_settings(&self) -> Result<NvramSettings, Error> {
        let _caller = self.caller()?;
        Ok(self.settings.read().clone())
    }

    /// Changes the NVRAM file path, as a pending settings change.
    pub fn set_non_volatile_storage_file(&self, path: &str) -> Result<(), Error> {
        let _caller = self.caller()?;
        self.settings.backup();
        self.settings.write().nvram_path = path.to_owned();
        Ok(())
    }

    /// Changes the encryption key, as a pending settings change.
    ///
    /// The password cached for the previous key id is forgotten, since it
    /// does not open the new key store. Keys of other machines are kept.
    pub fn update_encryption_settings(&self, key_id: &str, key_store: &str) -> Result<(), Error> {
        let _caller = self.caller()?;
        self.settings.backup();
        let old_key_id = {
            let mut settings = self.settings.write();
            let old_key_id = std::mem::replace(&mut settings.key_id, key_id.to_owned());
            settings.key_store = key_store.to_owned();
            old_key_id
        };
        if !old_key_id.is_empty() && self.keys.forget_key(&old_key_id) {
            tracing::debug!(key_id = %old_key_id, "forgot NVRAM encryption key");
        }
        Ok(())
    }

    /// Returns the key id and key store.
    pub fn encryption_settings(&self) -> Result<(String, String), Error> {
        let _caller = self.caller()?;
        let settings = self.settings.read();
        Ok((settings.key_id.clone(), settings.key_store.clone()))
    }

    /// Starts a settings change.
    pub fn backup(&self) {
        self.settings.backup();
    }

    /// Makes pending settings changes permanent, for this store and its
    /// peers.
    pub fn commit(&self) {
        self.settings.commit();
    }

    /// Discards pending settings changes.
    pub fn rollback(&self) {
        self.settings.rollback();
    }

    /// Whether there are pending settings changes.
    pub fn is_modified(&self) -> bool {
        self.settings.is_backed_up()
    }

    /// Captures every entry, for a saved machine.
    pub fn save_state(&self) -> Result<SavedState, Error> {
        let _caller = self.caller()?;
        Ok(SavedState {
            entries: self.read_loaded()?.entries.clone(),
        })
    }

    /// Replaces the entries with a previously saved state.
    pub fn restore_state(&self, state: SavedState) -> Result<(), Error> {
        let _caller = self.caller()?;
        let mut data = self.data.write();
        data.entries = state.entries;
        data.loaded = true;
        Ok(())
    }
}

impl Drop for NvramStore {
    fn drop(&mut self) {
        self.uninit();
    }
}

fn entry_key(namespace: &str, path: &str) -> String {
    format!("{namespace}/{path}")
}

/// Decodes the plaintext of an NVRAM file: a raw UEFI variable store, or a
/// tar archive of entries.
fn decode_nvram(buf: Vec<u8>) -> Result<BTreeMap<String, Vec<u8>>, Error> {
    match EfiVarStore::open(&buf) {
        Ok(_) => Ok(BTreeMap::from([(UEFI_NVRAM_ENTRY.to_owned(), buf)])),
        Err(efi_varstore::Error::UnknownFormat) => {
            archive::read_archive(&buf).map_err(Error::Archive)
        }
        Err(err) => Err(Error::VarStore(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestMachine;
    use uefi_specs::uefi::nvram::EfiVariableAttributes;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn setup() -> (tempfile::TempDir, Arc<TestMachine>, NvramStore) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let machine = TestMachine::new(dir.path());
        let store = machine.store();
        (dir, machine, store)
    }

    fn efi_image() -> Vec<u8> {
        EfiVarStore::format(DEFAULT_UEFI_NVRAM_SIZE).unwrap()
    }

    #[test]
    fn storage_path_resolution() {
        let (dir, machine, store) = setup();
        assert_eq!(store.storage_file_path(), dir.path().join("test.nvram"));

        store
            .load_settings(&NvramSettings {
                nvram_path: "sub/custom.nvram".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            store.storage_file_path(),
            dir.path().join("sub/custom.nvram")
        );

        let absolute = dir.path().join("abs.nvram");
        store
            .set_non_volatile_storage_file(absolute.to_str().unwrap())
            .unwrap();
        assert_eq!(store.storage_file_path(), absolute);

        store.rollback();
        store.load_settings(&NvramSettings::default()).unwrap();
        machine.set_default_name(None);
        assert_eq!(store.storage_file_path(), PathBuf::new());
    }

    #[test]
    fn multi_entry_round_trip() {
        let (_dir, machine, store) = setup();
        store.init_uefi_variable_store(0).unwrap();
        store.write_all("tpm", "state", b"tpm state").unwrap();
        store.write_all("empty", "entry", &[]).unwrap();
        store.save().unwrap();

        let reloaded = machine.store();
        assert_eq!(
            reloaded.entry_names().unwrap(),
            ["efi/nvram", "empty/entry", "tpm/state"]
        );
        assert_eq!(reloaded.query_size("tpm", "state").unwrap(), 9);
        let mut buf = [0; 16];
        assert_eq!(reloaded.read_all("tpm", "state", &mut buf).unwrap(), 9);
        assert_eq!(&buf[..9], b"tpm state");
        assert_eq!(reloaded.save_state().unwrap(), store.save_state().unwrap());
    }

    #[test]
    fn single_non_uefi_entry_is_archived() {
        let (dir, machine, store) = setup();
        store.write_all("dev", "blob", b"data").unwrap();
        store.save().unwrap();

        let file = fs_err::read(dir.path().join("test.nvram")).unwrap();
        assert_eq!(archive::read_archive(&file).unwrap().len(), 1);
        assert_eq!(machine.store().query_size("dev", "blob").unwrap(), 4);
    }

    #[test]
    fn legacy_single_store_file() {
        let (dir, machine, store) = setup();
        store.init_uefi_variable_store(0).unwrap();
        store.save().unwrap();

        // Saved as the bare flash image.
        let file = fs_err::read(dir.path().join("test.nvram")).unwrap();
        assert_eq!(file, efi_image());

        let reloaded = machine.store();
        assert!(reloaded.has_uefi_var_store().unwrap());
        assert_eq!(reloaded.entry_names().unwrap(), [UEFI_NVRAM_ENTRY]);
    }

    #[test]
    fn raw_file_loads_as_uefi_entry() {
        let (dir, _machine, store) = setup();
        let image = efi_image();
        let path = dir.path().join("legacy.nvram");
        fs_err::write(&path, &image).unwrap();
        store.load(&path).unwrap();
        let state = store.save_state().unwrap();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[UEFI_NVRAM_ENTRY], image);
    }

    #[test]
    fn garbage_file_fails() {
        let (dir, _machine, store) = setup();
        let path = dir.path().join("garbage.nvram");
        fs_err::write(&path, [0x5au8; 4096]).unwrap();
        assert_eq!(store.load(&path).unwrap_err().kind(), ErrorKind::Corrupt);

        // A firmware volume with a broken header is not mistaken for tar.
        let mut image = efi_image();
        image[50] ^= 0xff;
        fs_err::write(&path, &image).unwrap();
        assert_eq!(store.load(&path).unwrap_err().kind(), ErrorKind::Corrupt);
        assert!(store.save_state().unwrap().entries.is_empty());
    }

    #[test]
    fn oversized_file() {
        let (dir, _machine, store) = setup();
        fs_err::write(dir.path().join("test.nvram"), vec![0; 2 * 1024 * 1024]).unwrap();
        let err = store.retain_uefi_var_store().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(store.save_state().is_err());
        assert!(matches!(
            store.load(&dir.path().join("test.nvram")),
            Err(Error::FileTooLarge { size: 2097152, .. })
        ));
    }

    #[test]
    fn unset_path_save_is_noop() {
        let (dir, machine, store) = setup();
        machine.set_default_name(None);
        store.write_all("a", "b", b"c").unwrap();
        store.save().unwrap();
        assert_eq!(fs_err::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_file_is_empty_store() {
        let (_dir, _machine, store) = setup();
        assert!(store.entry_names().unwrap().is_empty());
        assert!(!store.has_uefi_var_store().unwrap());
        let err = store.retain_uefi_var_store().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "the UEFI NVRAM file is not existing for this machine"
        );
    }

    #[test]
    fn driver_entries() {
        let (_dir, _machine, store) = setup();
        let err = store.query_size("ns", "missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            store.read_all("ns", "missing", &mut []).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        store.write_all("ns", "entry", b"long contents").unwrap();
        store.write_all("ns", "entry", b"short").unwrap();
        let mut buf = [0; 3];
        assert_eq!(store.read_all("ns", "entry", &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"sho");
        assert_eq!(store.query_size("ns", "entry").unwrap(), 5);

        store.delete("ns", "entry").unwrap();
        assert_eq!(
            store.delete("ns", "entry").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn init_uefi_variable_store_checks() {
        let (_dir, machine, store) = setup();
        assert_eq!(
            store.init_uefi_variable_store(4096).unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
        machine.set_firmware(FirmwareType::Bios);
        assert_eq!(
            store.init_uefi_variable_store(0).unwrap_err().kind(),
            ErrorKind::NotSupported
        );
        machine.set_firmware(FirmwareType::Efi64);
        machine.set_mutable(false);
        assert_eq!(
            store.init_uefi_variable_store(0).unwrap_err().kind(),
            ErrorKind::PreconditionViolated
        );
        machine.set_mutable(true);

        assert!(!machine.take_modified());
        store.init_uefi_variable_store(0).unwrap();
        assert!(machine.take_modified());
        assert_eq!(store.query_size("efi", "nvram").unwrap(), 540672);

        // An existing store is kept.
        store
            .retain_uefi_var_store_mut()
            .unwrap()
            .add(
                guid::Guid::new_random(),
                "Keep",
                EfiVariableAttributes::DEFAULT_ATTRIBUTES,
            )
            .unwrap();
        store.init_uefi_variable_store(0).unwrap();
        assert!(store.retain_uefi_var_store().unwrap().get("Keep").is_some());
    }

    #[test]
    fn write_handle_flushes_on_drop() {
        let (_dir, machine, store) = setup();
        store.init_uefi_variable_store(0).unwrap();
        machine.take_modified();

        {
            let view = store.retain_uefi_var_store().unwrap();
            assert_eq!(view.variables().count(), 0);
        }
        assert!(!machine.take_modified());

        {
            let mut view = store.retain_uefi_var_store_mut().unwrap();
            view.add(
                guid::Guid::new_random(),
                "Var",
                EfiVariableAttributes::DEFAULT_ATTRIBUTES,
            )
            .unwrap();
            view.set_data("Var", b"value").unwrap();
            let debug = format!("{view:?}");
            assert!(debug.starts_with("UefiVarStoreRefMut"), "{debug}");
            assert!(debug.contains("dirty: true"), "{debug}");
        }
        assert!(machine.take_modified());
        let view = store.retain_uefi_var_store().unwrap();
        assert_eq!(view.get("Var").unwrap().data(), b"value");
        assert!(format!("{view:?}").contains("variables: 1"));
    }

    #[test]
    fn immutable_machine() {
        let (_dir, machine, store) = setup();
        store.init_uefi_variable_store(0).unwrap();
        machine.set_mutable(false);
        let err = store.retain_uefi_var_store().unwrap_err();
        assert!(matches!(err, Error::MachineNotMutable(_)));
        assert_eq!(err.kind(), ErrorKind::PreconditionViolated);
    }

    fn encrypted_setup() -> (tempfile::TempDir, Arc<TestMachine>, Arc<SecretKeyStore>, NvramStore) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let machine = TestMachine::new(dir.path());
        let keys = Arc::new(SecretKeyStore::new());
        let store = NvramStore::new(machine.clone(), keys.clone());
        let key_store = encrypt::create_key_store(b"password").unwrap();
        store
            .update_encryption_settings("vm-key", &key_store)
            .unwrap();
        store.commit();
        (dir, machine, keys, store)
    }

    #[test]
    fn encrypted_round_trip() {
        let (dir, machine, keys, store) = encrypted_setup();
        keys.add_key("vm-key", b"password").unwrap();
        store.init_uefi_variable_store(0).unwrap();
        store.save().unwrap();

        let file = fs_err::read(dir.path().join("test.nvram")).unwrap();
        assert_eq!(&file[..8], b"VBNVENC1");
        assert!(matches!(
            EfiVarStore::open(&file),
            Err(efi_varstore::Error::UnknownFormat)
        ));

        let reloaded = NvramStore::new(machine, keys.clone());
        reloaded
            .load_settings(&store.save_settings().unwrap())
            .unwrap();
        assert!(reloaded.has_uefi_var_store().unwrap());
        // The key is released again.
        keys.delete_key("vm-key").unwrap();
    }

    #[test]
    fn encrypted_without_key() {
        let (dir, machine, _keys, store) = encrypted_setup();
        fs_err::write(dir.path().join("test.nvram"), efi_image()).unwrap();

        let err = store.retain_uefi_var_store().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
        assert!(matches!(err, Error::KeyRetrieval { ref key_id, .. } if key_id == "vm-key"));

        // Only a key id is not enough to turn on encryption.
        let plain = machine.store();
        plain
            .load_settings(&NvramSettings {
                key_id: "vm-key".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(plain.has_uefi_var_store().unwrap());
    }

    #[test]
    fn encrypted_wrong_password() {
        let (dir, _machine, keys, store) = encrypted_setup();
        keys.add_key("vm-key", b"not the password").unwrap();
        fs_err::write(dir.path().join("test.nvram"), b"VBNVENC1").unwrap();
        let err = store.entry_names().unwrap_err();
        assert!(matches!(err, Error::UnlockKeyStore { .. }));
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn update_encryption_forgets_old_password() {
        let (_dir, _machine, keys, store) = encrypted_setup();
        keys.add_key("vm-key", b"password").unwrap();
        keys.add_key("new-key", b"new password").unwrap();
        store.update_encryption_settings("new-key", "blob").unwrap();
        assert!(store.is_modified());
        assert_eq!(keys.key_count(), 1);
        assert!(keys.retain_key("vm-key").is_err());
        assert_eq!(
            store.encryption_settings().unwrap(),
            ("new-key".to_owned(), "blob".to_owned())
        );
        store.rollback();
        assert_eq!(store.encryption_settings().unwrap().0, "vm-key");
    }

    #[test]
    fn update_encryption_keeps_other_machines_keys() {
        let (_dir_a, _machine_a, keys, store_a) = encrypted_setup();
        keys.add_key("vm-key", b"password").unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        let machine_b = TestMachine::new(dir_b.path());
        let store_b = NvramStore::new(machine_b.clone(), keys.clone());
        let key_store_b = encrypt::create_key_store(b"b password").unwrap();
        store_b
            .update_encryption_settings("vm-b-key", &key_store_b)
            .unwrap();
        store_b.commit();
        keys.add_key("vm-b-key", b"b password").unwrap();
        store_b.write_all("dev", "state", b"b").unwrap();
        store_b.save().unwrap();

        store_a.update_encryption_settings("vm-a-key2", "blob").unwrap();
        assert!(keys.retain_key("vm-key").is_err());

        let reloaded_b = NvramStore::new(machine_b, keys.clone());
        reloaded_b
            .load_settings(&store_b.save_settings().unwrap())
            .unwrap();
        assert_eq!(reloaded_b.query_size("dev", "state").unwrap(), 1);
        assert_eq!(keys.key_count(), 1);
    }

    #[test]
    fn shared_peers_see_commits() {
        let (dir, machine, store) = setup();
        let peer = store.share(machine.clone()).unwrap();
        let copy = store.attach_copy(machine.clone()).unwrap();

        peer.set_non_volatile_storage_file("renamed.nvram").unwrap();
        assert_eq!(store.storage_file_path(), dir.path().join("renamed.nvram"));
        peer.commit();
        assert!(!store.is_modified());
        assert_eq!(copy.storage_file_path(), dir.path().join("test.nvram"));

        store.write_all("a", "b", b"c").unwrap();
        drop(store);
        // The peer still holds the entries.
        assert_eq!(peer.query_size("a", "b").unwrap(), 1);
    }

    #[test]
    fn saved_state() {
        let (_dir, machine, store) = setup();
        store.write_all("dev", "x", b"1").unwrap();
        let state = store.save_state().unwrap();
        let json = serde_json::to_string(&state).unwrap();

        let restored = machine.store();
        restored
            .restore_state(serde_json::from_str(&json).unwrap())
            .unwrap();
        assert_eq!(restored.query_size("dev", "x").unwrap(), 1);
    }

    #[test]
    fn uninit_store_rejects_calls() {
        let (_dir, _machine, store) = setup();
        store.write_all("a", "b", b"c").unwrap();
        store.uninit();
        let err = store.entry_names().unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert_eq!(err.kind(), ErrorKind::PreconditionViolated);
    }
}

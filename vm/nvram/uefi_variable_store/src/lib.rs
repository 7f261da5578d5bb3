// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Variable-level access to a machine's UEFI variable store.
//!
//! [`UefiVariableStore`] sits on top of an [`NvramStore`] and checks out the
//! `efi/nvram` entry for the duration of each call, so the machine state is
//! re-validated every time and nothing stays locked between calls.

#![forbid(unsafe_code)]

mod error;
mod signature;

pub use error::Error;
pub use signature::SignatureTarget;
pub use signature::SignatureType;

use efi_varstore::EfiVarStore;
use guid::Guid;
use lifecycle_guard::ObjectState;
use nvram_store::NvramStore;
use signature::merge_signature;
use std::sync::Arc;
use uefi_specs::edk2::vars::SECURE_BOOT_ENABLE;
use uefi_specs::uefi::nvram::vars;
use uefi_specs::uefi::nvram::EfiVariableAttributes;
use uefi_specs::uefi::nvram::NvramVar;

/// A single UEFI variable attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UefiVariableAttribute {
    NonVolatile,
    BootServiceAccess,
    RuntimeAccess,
    HwErrorRecord,
    AuthWriteAccess,
    AuthTimeBasedWriteAccess,
    AuthAppendWrite,
}

impl UefiVariableAttribute {
    const ALL: [Self; 7] = [
        Self::NonVolatile,
        Self::BootServiceAccess,
        Self::RuntimeAccess,
        Self::HwErrorRecord,
        Self::AuthWriteAccess,
        Self::AuthTimeBasedWriteAccess,
        Self::AuthAppendWrite,
    ];

    fn is_set(self, attributes: EfiVariableAttributes) -> bool {
        match self {
            Self::NonVolatile => attributes.non_volatile(),
            Self::BootServiceAccess => attributes.bootservice_access(),
            Self::RuntimeAccess => attributes.runtime_access(),
            Self::HwErrorRecord => attributes.hardware_error_record(),
            Self::AuthWriteAccess => attributes.authenticated_write_access(),
            Self::AuthTimeBasedWriteAccess => attributes.time_based_authenticated_write_access(),
            Self::AuthAppendWrite => attributes.append_write(),
        }
    }

    fn set(self, attributes: EfiVariableAttributes) -> EfiVariableAttributes {
        match self {
            Self::NonVolatile => attributes.with_non_volatile(true),
            Self::BootServiceAccess => attributes.with_bootservice_access(true),
            Self::RuntimeAccess => attributes.with_runtime_access(true),
            Self::HwErrorRecord => attributes.with_hardware_error_record(true),
            Self::AuthWriteAccess => attributes.with_authenticated_write_access(true),
            Self::AuthTimeBasedWriteAccess => {
                attributes.with_time_based_authenticated_write_access(true)
            }
            Self::AuthAppendWrite => attributes.with_append_write(true),
        }
    }

    /// ORs `attributes` into a bitfield.
    pub fn to_bits(attributes: &[Self]) -> EfiVariableAttributes {
        attributes
            .iter()
            .fold(EfiVariableAttributes::new(), |acc, attr| attr.set(acc))
    }

    /// Splits a bitfield into its attributes. Bits without a counterpart are
    /// dropped.
    pub fn from_bits(attributes: EfiVariableAttributes) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|attr| attr.is_set(attributes))
            .collect()
    }
}

/// Owner, attributes and data of a variable.
pub type VariableInfo = (Guid, Vec<UefiVariableAttribute>, Vec<u8>);

/// The UEFI variable store of one machine.
#[derive(Debug)]
pub struct UefiVariableStore {
    nvram: Arc<NvramStore>,
    state: ObjectState,
}

impl UefiVariableStore {
    /// Opens the variable store kept in `nvram`.
    ///
    /// Fails if the machine is not mutable or has no UEFI variable store.
    pub fn open(nvram: Arc<NvramStore>) -> Result<Self, Error> {
        drop(nvram.retain_uefi_var_store()?);
        let this = Self {
            nvram,
            state: ObjectState::new(),
        };
        if let Ok(mut span) = this.state.init_span() {
            span.set_succeeded();
        }
        Ok(this)
    }

    /// Detaches from the NVRAM store, waiting for outstanding calls.
    pub fn uninit(&self) {
        drop(self.state.uninit_span());
    }

    /// Runs `f` on a read-only view of the store.
    fn with_store<R>(&self, f: impl FnOnce(&EfiVarStore) -> Result<R, Error>) -> Result<R, Error> {
        let _caller = self.state.caller()?;
        let store = self.nvram.retain_uefi_var_store()?;
        f(&*store)
    }

    /// Runs `f` on a writable view of the store. Changes are written back to
    /// the NVRAM entry when `f` returns, whether or not it succeeded.
    fn with_store_mut<R>(
        &self,
        f: impl FnOnce(&mut EfiVarStore) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let _caller = self.state.caller()?;
        let mut store = self.nvram.retain_uefi_var_store_mut()?;
        f(&mut *store)
    }

    /// Secure boot is on if a platform key is enrolled, unless the firmware's
    /// `SecureBootEnable` setting turns it off.
    pub fn secure_boot_enabled(&self) -> Result<bool, Error> {
        self.with_store(|store| {
            if get_var(store, vars::PK).is_none() {
                return Ok(false);
            }
            match get_var(store, SECURE_BOOT_ENABLE).map(|var| var.data()) {
                None => Ok(true),
                Some([enabled]) => Ok(*enabled != 0),
                Some(data) => {
                    tracelimit::warn_ratelimited!(
                        len = data.len(),
                        "SecureBootEnable has an unexpected size"
                    );
                    Err(Error::BogusSecureBootEnable(data.len()))
                }
            }
        })
    }

    /// Sets the firmware's `SecureBootEnable` setting. Requires an enrolled
    /// platform key.
    pub fn set_secure_boot_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.with_store_mut(|store| {
            if get_var(store, vars::PK).is_none() {
                return Err(Error::PlatformKeyMissing);
            }
            put_var(
                store,
                SECURE_BOOT_ENABLE.vendor,
                SECURE_BOOT_ENABLE.name,
                EfiVariableAttributes::DEFAULT_ATTRIBUTES,
                &[u8::from(enabled)],
            )?;
            tracing::info!(enabled, "secure boot setting changed");
            Ok(())
        })
    }

    /// Creates the variable `name` owned by `owner`. A variable `owner`
    /// already has under that name is recreated with the new attributes.
    pub fn add_variable(
        &self,
        name: &str,
        owner: Guid,
        attributes: &[UefiVariableAttribute],
        data: &[u8],
    ) -> Result<(), Error> {
        let attributes = UefiVariableAttribute::to_bits(attributes);
        self.with_store_mut(|store| {
            store
                .replace(owner, name, attributes, data)
                .map_err(|source| Error::VarStore {
                    name: name.to_owned(),
                    source,
                })
        })
    }

    /// Deletes the variable `name`.
    ///
    /// Names are looked up without regard to the owner, so `owner` is only
    /// logged.
    pub fn delete_variable(&self, name: &str, owner: Guid) -> Result<(), Error> {
        self.with_store_mut(|store| {
            let var = store.remove(name).map_err(|source| Error::VarStore {
                name: name.to_owned(),
                source,
            })?;
            if var.vendor() != owner {
                tracing::debug!(
                    name,
                    %owner,
                    vendor = %var.vendor(),
                    "deleted variable of another owner"
                );
            }
            Ok(())
        })
    }

    /// Replaces the data of the existing variable `name`.
    pub fn change_variable(&self, name: &str, data: &[u8]) -> Result<(), Error> {
        self.with_store_mut(|store| {
            store.set_data(name, data).map_err(|source| Error::VarStore {
                name: name.to_owned(),
                source,
            })
        })
    }

    /// Returns the owner, attributes and data of the variable `name`.
    pub fn query_variable_by_name(&self, name: &str) -> Result<VariableInfo, Error> {
        self.with_store(|store| {
            let var = store
                .get(name)
                .ok_or_else(|| Error::VariableNotFound(name.to_owned()))?;
            Ok((
                var.vendor(),
                UefiVariableAttribute::from_bits(var.attributes()),
                var.data().to_vec(),
            ))
        })
    }

    /// Name and owner of every variable.
    pub fn query_variables(&self) -> Result<Vec<(String, Guid)>, Error> {
        self.with_store(|store| {
            Ok(store
                .variables()
                .map(|var| (var.name().to_owned(), var.vendor()))
                .collect())
        })
    }

    /// Enrolls the built-in default platform key.
    pub fn enroll_oracle_platform_key(&self) -> Result<(), Error> {
        const NAME: &str = "oracle-default-pk";
        let cert = secure_boot_certs::lookup(NAME).ok_or(Error::MissingCertificate(NAME))?;
        self.enroll_platform_key(cert, secure_boot_certs::VIRTUALBOX_OWNER)
    }

    /// Adds an X.509 certificate to the platform key.
    pub fn enroll_platform_key(&self, data: &[u8], owner: Guid) -> Result<(), Error> {
        self.add_signature(SignatureTarget::PK, data, owner, SignatureType::X509)
    }

    pub fn add_kek(&self, data: &[u8], owner: Guid, kind: SignatureType) -> Result<(), Error> {
        self.add_signature(SignatureTarget::KEK, data, owner, kind)
    }

    pub fn add_signature_to_db(
        &self,
        data: &[u8],
        owner: Guid,
        kind: SignatureType,
    ) -> Result<(), Error> {
        self.add_signature(SignatureTarget::DB, data, owner, kind)
    }

    pub fn add_signature_to_dbx(
        &self,
        data: &[u8],
        owner: Guid,
        kind: SignatureType,
    ) -> Result<(), Error> {
        self.add_signature(SignatureTarget::DBX, data, owner, kind)
    }

    /// Adds a signature to shim's `MokList`.
    pub fn add_signature_to_mok(
        &self,
        data: &[u8],
        owner: Guid,
        kind: SignatureType,
    ) -> Result<(), Error> {
        self.add_signature(SignatureTarget::MOK, data, owner, kind)
    }

    /// Appends a signature to any signature database.
    pub fn add_signature(
        &self,
        target: SignatureTarget,
        data: &[u8],
        owner: Guid,
        kind: SignatureType,
    ) -> Result<(), Error> {
        self.with_store_mut(|store| merge_signature(store, target, kind, owner, data))
    }

    /// Enrolls the Microsoft KEK and the two Microsoft signing CAs.
    ///
    /// Stops at the first failure; earlier enrollments are kept.
    pub fn enroll_default_ms_signatures(&self) -> Result<(), Error> {
        const DEFAULTS: [(SignatureTarget, &str); 3] = [
            (SignatureTarget::KEK, "ms-kek"),
            (SignatureTarget::DB, "ms-ca"),
            (SignatureTarget::DB, "ms-uefi-ca"),
        ];
        for (target, name) in DEFAULTS {
            let cert = secure_boot_certs::lookup(name).ok_or(Error::MissingCertificate(name))?;
            self.add_signature(
                target,
                cert,
                secure_boot_certs::MICROSOFT_OWNER,
                SignatureType::X509,
            )?;
        }
        Ok(())
    }
}

impl Drop for UefiVariableStore {
    fn drop(&mut self) {
        self.uninit();
    }
}

fn get_var(store: &EfiVarStore, var: NvramVar) -> Option<&efi_varstore::EfiVariable> {
    store.get_by_vendor(var.vendor, var.name)
}

/// Writes `data` to `vendor`/`name`, creating the variable with `attributes`
/// if it does not exist.
fn put_var(
    store: &mut EfiVarStore,
    vendor: Guid,
    name: &str,
    attributes: EfiVariableAttributes,
    data: &[u8],
) -> Result<(), Error> {
    let var_error = |source| Error::VarStore {
        name: name.to_owned(),
        source,
    };
    if store.get_by_vendor(vendor, name).is_none() {
        store.add(vendor, name, attributes).map_err(var_error)?;
    }
    store
        .set_data_by_vendor(vendor, name, data)
        .map_err(var_error)
}

#[cfg(test)]
mod tests {
    use super::UefiVariableAttribute::*;
    use super::*;
    use nvram_store::test_helpers::TestMachine;
    use nvram_store::ErrorKind;
    use uefi_nvram_specvars::SignatureDatabase;

    const OWNER: Guid = Guid::from_static_str("c9f1d9b6-3f5e-4d3b-8f0e-5a1f7a2d9e44");

    fn setup() -> (tempfile::TempDir, Arc<TestMachine>, Arc<NvramStore>) {
        let dir = tempfile::tempdir().unwrap();
        let machine = TestMachine::new(dir.path());
        let nvram = Arc::new(machine.store());
        nvram.init_uefi_variable_store(0).unwrap();
        (dir, machine, nvram)
    }

    fn open() -> (tempfile::TempDir, Arc<TestMachine>, UefiVariableStore) {
        let (dir, machine, nvram) = setup();
        let store = UefiVariableStore::open(nvram).unwrap();
        (dir, machine, store)
    }

    fn pk_signatures(store: &UefiVariableStore) -> SignatureDatabase {
        let (owner, attributes, data) = store.query_variable_by_name("PK").unwrap();
        assert_eq!(owner, vars::EFI_GLOBAL_VARIABLE);
        assert!(attributes.contains(&AuthTimeBasedWriteAccess));
        SignatureDatabase::parse(&data).unwrap()
    }

    #[test]
    fn open_requires_var_store() {
        let dir = tempfile::tempdir().unwrap();
        let machine = TestMachine::new(dir.path());
        let err = UefiVariableStore::open(Arc::new(machine.store())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "the UEFI NVRAM file is not existing for this machine"
        );

        let (_dir, machine, nvram) = setup();
        machine.set_mutable(false);
        let err = UefiVariableStore::open(nvram).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolated);
    }

    #[test]
    fn enroll_platform_key_enables_secure_boot() {
        let (_dir, _machine, store) = open();
        assert!(!store.secure_boot_enabled().unwrap());
        store.enroll_oracle_platform_key().unwrap();
        assert!(store.secure_boot_enabled().unwrap());

        let db = pk_signatures(&store);
        assert_eq!(db.len(), 1);
        assert_eq!(db.entries()[0].owner, secure_boot_certs::VIRTUALBOX_OWNER);
        assert_eq!(db.entries()[0].data, secure_boot_certs::ORACLE_DEFAULT_PK);
    }

    #[test]
    fn duplicate_enrollment_is_kept() {
        let (_dir, _machine, store) = open();
        store.enroll_oracle_platform_key().unwrap();
        store.enroll_oracle_platform_key().unwrap();
        let db = pk_signatures(&store);
        assert_eq!(db.len(), 2);
        assert_eq!(db.entries()[0], db.entries()[1]);
    }

    #[test]
    fn secure_boot_toggle_needs_platform_key() {
        let (_dir, _machine, store) = open();
        let err = store.set_secure_boot_enabled(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolated);
        assert!(store
            .query_variables()
            .unwrap()
            .iter()
            .all(|(name, _)| name != "SecureBootEnable"));

        store.enroll_platform_key(b"cert", OWNER).unwrap();
        store.set_secure_boot_enabled(false).unwrap();
        assert!(!store.secure_boot_enabled().unwrap());
        store.set_secure_boot_enabled(true).unwrap();
        assert!(store.secure_boot_enabled().unwrap());

        let (owner, attributes, data) = store.query_variable_by_name("SecureBootEnable").unwrap();
        assert_eq!(owner, SECURE_BOOT_ENABLE.vendor);
        assert_eq!(attributes, [NonVolatile, BootServiceAccess, RuntimeAccess]);
        assert_eq!(data, [1]);
    }

    #[test]
    fn bogus_secure_boot_enable() {
        let (_dir, _machine, store) = open();
        store.enroll_platform_key(b"cert", OWNER).unwrap();
        store
            .add_variable(
                "SecureBootEnable",
                SECURE_BOOT_ENABLE.vendor,
                &[NonVolatile],
                &[1, 0],
            )
            .unwrap();
        // Repeated queries keep failing while the warning is rate limited.
        for _ in 0..20 {
            let err = store.secure_boot_enabled().unwrap_err();
            assert!(matches!(err, Error::BogusSecureBootEnable(2)));
            assert_eq!(err.kind(), ErrorKind::Corrupt);
        }

        // Recreating the variable with one byte repairs it.
        store
            .add_variable(
                "SecureBootEnable",
                SECURE_BOOT_ENABLE.vendor,
                &[NonVolatile, BootServiceAccess],
                &[0],
            )
            .unwrap();
        assert!(!store.secure_boot_enabled().unwrap());
    }

    #[test]
    fn variable_crud() {
        let (_dir, _machine, store) = open();
        store
            .add_variable("Boot0000", OWNER, &[NonVolatile, BootServiceAccess], b"one")
            .unwrap();
        store
            .add_variable("Boot0000", OWNER, &[NonVolatile, RuntimeAccess], b"two")
            .unwrap();
        let (owner, attributes, data) = store.query_variable_by_name("Boot0000").unwrap();
        assert_eq!(owner, OWNER);
        assert_eq!(attributes, [NonVolatile, RuntimeAccess]);
        assert_eq!(data, b"two");
        assert_eq!(store.query_variables().unwrap().len(), 1);

        store.change_variable("Boot0000", b"three!").unwrap();
        assert_eq!(store.query_variable_by_name("Boot0000").unwrap().2, b"three!");

        store.delete_variable("Boot0000", OWNER).unwrap();
        let err = store.query_variable_by_name("Boot0000").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), r#"variable "Boot0000" not found"#);
        let err = store.delete_variable("Boot0000", OWNER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn change_does_not_create() {
        let (_dir, _machine, store) = open();
        let err = store.change_variable("Missing", b"data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.query_variables().unwrap().is_empty());
    }

    #[test]
    fn enumeration() {
        let (_dir, _machine, store) = open();
        let other = Guid::new_random();
        store.add_variable("A", OWNER, &[NonVolatile], b"a").unwrap();
        store.add_variable("B", other, &[NonVolatile], b"b").unwrap();
        store.add_variable("C", OWNER, &[NonVolatile], b"").unwrap();
        assert_eq!(
            store.query_variables().unwrap(),
            [
                ("A".to_owned(), OWNER),
                ("B".to_owned(), other),
                ("C".to_owned(), OWNER)
            ]
        );
    }

    #[test]
    fn signature_databases() {
        let (_dir, _machine, store) = open();
        store
            .add_signature_to_dbx(&[0xab; 32], OWNER, SignatureType::Sha256)
            .unwrap();
        store
            .add_signature_to_mok(b"mok cert", OWNER, SignatureType::X509)
            .unwrap();
        let err = store
            .add_kek(b"kek", OWNER, SignatureType::Unknown(0x1234))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        let (owner, attributes, _) = store.query_variable_by_name("MokList").unwrap();
        assert_eq!(owner, uefi_specs::linux::nvram::vars::SHIM_LOCK_GUID);
        assert!(!attributes.contains(&RuntimeAccess));
        assert!(store.query_variable_by_name("KEK").is_err());
    }

    #[test]
    fn default_ms_signatures() {
        let (_dir, _machine, store) = open();
        store.enroll_default_ms_signatures().unwrap();

        let (_, _, kek) = store.query_variable_by_name("KEK").unwrap();
        let kek = SignatureDatabase::parse(&kek).unwrap();
        assert_eq!(kek.len(), 1);
        assert_eq!(kek.entries()[0].owner, secure_boot_certs::MICROSOFT_OWNER);

        let (owner, _, db) = store.query_variable_by_name("db").unwrap();
        assert_eq!(owner, vars::IMAGE_SECURITY_DATABASE_GUID);
        let db = SignatureDatabase::parse(&db).unwrap();
        let certs: Vec<_> = db.entries().iter().map(|e| e.data.as_slice()).collect();
        assert_eq!(
            certs,
            [secure_boot_certs::MS_CA, secure_boot_certs::MS_UEFI_CA]
        );
        // No platform key, so still off.
        assert!(!store.secure_boot_enabled().unwrap());
    }

    #[test]
    fn changes_survive_save() {
        let (dir, machine, nvram) = setup();
        let store = UefiVariableStore::open(nvram.clone()).unwrap();
        store.enroll_oracle_platform_key().unwrap();
        assert!(machine.take_modified());
        nvram.save().unwrap();
        drop(store);

        let reloaded = Arc::new(TestMachine::new(dir.path()).store());
        let store = UefiVariableStore::open(reloaded).unwrap();
        assert!(store.secure_boot_enabled().unwrap());
    }

    #[test]
    fn immutable_machine() {
        let (_dir, machine, store) = open();
        machine.set_mutable(false);
        let err = store.query_variables().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolated);
    }

    #[test]
    fn uninit_rejects_calls() {
        let (_dir, _machine, store) = open();
        store.uninit();
        assert!(matches!(store.secure_boot_enabled(), Err(Error::NotReady(_))));
    }

    #[test]
    fn attribute_mapping() {
        let bits = UefiVariableAttribute::to_bits(&[NonVolatile, RuntimeAccess, AuthAppendWrite]);
        assert_eq!(u32::from(bits), 0x45);
        assert_eq!(
            UefiVariableAttribute::from_bits(
                EfiVariableAttributes::DEFAULT_ATTRIBUTES_TIME_BASED_AUTH
            ),
            [
                NonVolatile,
                BootServiceAccess,
                RuntimeAccess,
                AuthTimeBasedWriteAccess,
            ]
        );
        assert!(UefiVariableAttribute::from_bits(EfiVariableAttributes::from(0x80)).is_empty());
    }
}

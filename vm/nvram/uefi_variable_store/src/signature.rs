// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enrollment into the secure boot signature databases.

use crate::Error;
use efi_varstore::EfiVarStore;
use guid::Guid;
use uefi_nvram_specvars::SignatureDatabase;
use uefi_specs::linux::nvram::vars as shim_vars;
use uefi_specs::uefi::nvram::vars;
use uefi_specs::uefi::nvram::EfiVariableAttributes;

/// Type of a signature to enroll.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignatureType {
    /// A DER-encoded X.509 certificate.
    X509,
    /// A SHA-256 digest.
    Sha256,
    /// Any other type code. Always rejected.
    Unknown(u32),
}

impl TryFrom<SignatureType> for uefi_nvram_specvars::SignatureType {
    type Error = Error;

    fn try_from(value: SignatureType) -> Result<Self, Error> {
        match value {
            SignatureType::X509 => Ok(Self::X509),
            SignatureType::Sha256 => Ok(Self::Sha256),
            SignatureType::Unknown(code) => Err(Error::UnsupportedSignatureType(code)),
        }
    }
}

/// A signature database variable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignatureTarget {
    pub name: &'static str,
    pub vendor: Guid,
    /// Whether the variable is visible at runtime.
    pub runtime: bool,
}

impl SignatureTarget {
    pub const PK: Self = Self::new(vars::PK.vendor, vars::PK.name, true);
    pub const KEK: Self = Self::new(vars::KEK.vendor, vars::KEK.name, true);
    pub const DB: Self = Self::new(vars::DB.vendor, vars::DB.name, true);
    pub const DBX: Self = Self::new(vars::DBX.vendor, vars::DBX.name, true);
    pub const MOK: Self = Self::new(shim_vars::MOK_LIST.vendor, shim_vars::MOK_LIST.name, false);

    const fn new(vendor: Guid, name: &'static str, runtime: bool) -> Self {
        Self {
            name,
            vendor,
            runtime,
        }
    }

    /// Attributes for a newly created database.
    pub fn attributes(&self) -> EfiVariableAttributes {
        EfiVariableAttributes::DEFAULT_ATTRIBUTES_TIME_BASED_AUTH.with_runtime_access(self.runtime)
    }
}

/// Appends one signature to `target`, creating the variable if needed.
///
/// The new contents are built in memory first, so a failure leaves the store
/// untouched. Existing signatures are kept, duplicates included.
pub(crate) fn merge_signature(
    store: &mut EfiVarStore,
    target: SignatureTarget,
    kind: SignatureType,
    owner: Guid,
    data: &[u8],
) -> Result<(), Error> {
    let kind = uefi_nvram_specvars::SignatureType::try_from(kind)?;

    let existing = store.get_by_vendor(target.vendor, target.name);
    let mut db = SignatureDatabase::new();
    if let Some(var) = existing {
        db.add_from_existing(var.data())
            .map_err(|source| Error::ParseSignatures {
                name: target.name,
                source,
            })?;
    }
    let create = existing.is_none();
    db.add(kind, owner, data).map_err(Error::AddSignature)?;
    let bytes = db.to_bytes();

    let var_error = |source| Error::VarStore {
        name: target.name.to_owned(),
        source,
    };
    if create {
        store
            .add(target.vendor, target.name, target.attributes())
            .map_err(var_error)?;
    }
    store
        .set_data_by_vendor(target.vendor, target.name, &bytes)
        .map_err(var_error)?;

    tracing::info!(
        name = target.name,
        vendor = %target.vendor,
        %owner,
        ?kind,
        signatures = db.len(),
        "enrolled signature"
    );
    Ok(())
}

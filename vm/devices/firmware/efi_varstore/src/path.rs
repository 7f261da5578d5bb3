// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A file-system-like view of the variables in a store.
//!
//! ```text
//! by-name/<var>                 variable data
//! by-uuid/<guid>/<var>          variable data, scoped to a vendor
//! raw/<var>/attr                attributes (u32)
//! raw/<var>/uuid                vendor GUID (16 bytes)
//! raw/<var>/data                variable data
//! raw/<var>/pubkey              public key index (u32)
//! raw/<var>/time                timestamp (EFI_TIME)
//! raw/<var>/monotonic           monotonic count (u64)
//! ```
//!
//! Integers are little-endian, as stored on flash.

use crate::EfiVarStore;
use crate::EfiVariable;
use crate::Error;
use guid::Guid;
use zerocopy::IntoBytes;

const BY_NAME: &str = "by-name";
const BY_UUID: &str = "by-uuid";
const RAW: &str = "raw";

/// A single field of a variable under `raw/<var>/`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RawField {
    Attributes,
    Uuid,
    Data,
    PubKeyIndex,
    Time,
    MonotonicCount,
}

impl RawField {
    const ALL: [RawField; 6] = [
        RawField::Attributes,
        RawField::Uuid,
        RawField::Data,
        RawField::PubKeyIndex,
        RawField::Time,
        RawField::MonotonicCount,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            RawField::Attributes => "attr",
            RawField::Uuid => "uuid",
            RawField::Data => "data",
            RawField::PubKeyIndex => "pubkey",
            RawField::Time => "time",
            RawField::MonotonicCount => "monotonic",
        }
    }

    fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.file_name() == name)
    }

    fn read(&self, var: &EfiVariable) -> Vec<u8> {
        match self {
            RawField::Attributes => u32::from(var.attributes).to_le_bytes().to_vec(),
            RawField::Uuid => var.vendor.as_bytes().to_vec(),
            RawField::Data => var.data.clone(),
            RawField::PubKeyIndex => var.pubkey_index.to_le_bytes().to_vec(),
            RawField::Time => var.timestamp.as_bytes().to_vec(),
            RawField::MonotonicCount => var.monotonic_count.to_le_bytes().to_vec(),
        }
    }
}

/// A parsed path into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarPath {
    Root,
    ByNameDir,
    ByName(String),
    ByUuidDir,
    ByUuidVendorDir(Guid),
    ByUuid(Guid, String),
    RawDir,
    RawVarDir(String),
    Raw(String, RawField),
}

impl VarPath {
    /// Parses a `/`-separated path. Leading and trailing separators are
    /// ignored.
    pub fn parse(path: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidPath(path.to_owned());
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let vendor = |s: &str| s.parse::<Guid>().map_err(|_| invalid());

        let parsed = match parts.as_slice() {
            [] => VarPath::Root,
            [BY_NAME] => VarPath::ByNameDir,
            [BY_NAME, name] => VarPath::ByName((*name).to_owned()),
            [BY_UUID] => VarPath::ByUuidDir,
            [BY_UUID, guid] => VarPath::ByUuidVendorDir(vendor(guid)?),
            [BY_UUID, guid, name] => VarPath::ByUuid(vendor(guid)?, (*name).to_owned()),
            [RAW] => VarPath::RawDir,
            [RAW, name] => VarPath::RawVarDir((*name).to_owned()),
            [RAW, name, field] => VarPath::Raw(
                (*name).to_owned(),
                RawField::from_file_name(field).ok_or_else(invalid)?,
            ),
            _ => return Err(invalid()),
        };
        Ok(parsed)
    }

    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            VarPath::Root
                | VarPath::ByNameDir
                | VarPath::ByUuidDir
                | VarPath::ByUuidVendorDir(_)
                | VarPath::RawDir
                | VarPath::RawVarDir(_)
        )
    }
}

impl EfiVarStore {
    fn lookup(&self, name: &str) -> Result<&EfiVariable, Error> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    /// Reads the file at `path`.
    pub fn read_path(&self, path: &str) -> Result<Vec<u8>, Error> {
        match VarPath::parse(path)? {
            VarPath::ByName(name) => Ok(self.lookup(&name)?.data.clone()),
            VarPath::ByUuid(vendor, name) => self
                .get_by_vendor(vendor, &name)
                .map(|v| v.data.clone())
                .ok_or(Error::NotFound(name)),
            VarPath::Raw(name, field) => Ok(field.read(self.lookup(&name)?)),
            _ => Err(Error::IsDirectory(path.to_owned())),
        }
    }

    /// Lists the entries of the directory at `path`.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, Error> {
        let entries = match VarPath::parse(path)? {
            VarPath::Root => vec![BY_NAME.into(), BY_UUID.into(), RAW.into()],
            VarPath::ByNameDir | VarPath::RawDir => {
                self.variables().map(|v| v.name.clone()).collect()
            }
            VarPath::ByUuidDir => self.vendors().iter().map(|g| g.to_string()).collect(),
            VarPath::ByUuidVendorDir(vendor) => {
                let vars: Vec<_> = self
                    .variables_by_vendor(vendor)
                    .map(|v| v.name.clone())
                    .collect();
                if vars.is_empty() {
                    return Err(Error::NotFound(vendor.to_string()));
                }
                vars
            }
            VarPath::RawVarDir(name) => {
                self.lookup(&name)?;
                RawField::ALL
                    .iter()
                    .map(|f| f.file_name().to_owned())
                    .collect()
            }
            VarPath::ByName(_) | VarPath::ByUuid(..) | VarPath::Raw(..) => {
                return Err(Error::InvalidPath(path.to_owned()));
            }
        };
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi_specs::uefi::nvram::EfiVariableAttributes;

    const VENDOR: Guid = Guid::from_static_str("8be4df61-93ca-11d2-aa0d-00e098032b8c");

    fn store() -> EfiVarStore {
        let image = EfiVarStore::format(65536).unwrap();
        let mut store = EfiVarStore::open(&image).unwrap();
        store
            .add(VENDOR, "Timeout", EfiVariableAttributes::DEFAULT_ATTRIBUTES)
            .unwrap();
        store.set_data("Timeout", &5u16.to_le_bytes()).unwrap();
        store
    }

    #[test]
    fn parse_paths() {
        assert_eq!(VarPath::parse("/").unwrap(), VarPath::Root);
        assert_eq!(
            VarPath::parse("by-name/Boot0000").unwrap(),
            VarPath::ByName("Boot0000".into())
        );
        assert_eq!(
            VarPath::parse("/by-uuid/8be4df61-93ca-11d2-aa0d-00e098032b8c/").unwrap(),
            VarPath::ByUuidVendorDir(VENDOR)
        );
        assert_eq!(
            VarPath::parse("raw/PK/monotonic").unwrap(),
            VarPath::Raw("PK".into(), RawField::MonotonicCount)
        );
        for bad in ["nope", "by-uuid/not-a-guid", "raw/PK/bogus", "by-name/a/b"] {
            assert!(matches!(VarPath::parse(bad), Err(Error::InvalidPath(_))), "{bad}");
        }
    }

    #[test]
    fn read_files() {
        let store = store();
        assert_eq!(store.read_path("by-name/Timeout").unwrap(), [5, 0]);
        assert_eq!(
            store
                .read_path("by-uuid/8be4df61-93ca-11d2-aa0d-00e098032b8c/Timeout")
                .unwrap(),
            [5, 0]
        );
        assert_eq!(store.read_path("raw/Timeout/attr").unwrap(), 7u32.to_le_bytes());
        assert_eq!(
            store.read_path("raw/Timeout/uuid").unwrap(),
            <[u8; 16]>::from(VENDOR)
        );
        assert_eq!(store.read_path("raw/Timeout/time").unwrap(), [0; 16]);
        assert!(matches!(
            store.read_path("by-uuid/00000000-0000-0000-0000-000000000000/Timeout"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.read_path("by-name"), Err(Error::IsDirectory(_))));
    }

    #[test]
    fn list_dirs() {
        let store = store();
        assert_eq!(store.list_dir("").unwrap(), ["by-name", "by-uuid", "raw"]);
        assert_eq!(store.list_dir("by-name").unwrap(), ["Timeout"]);
        assert_eq!(
            store.list_dir("by-uuid").unwrap(),
            ["8be4df61-93ca-11d2-aa0d-00e098032b8c"]
        );
        assert_eq!(
            store.list_dir("raw/Timeout").unwrap(),
            ["attr", "uuid", "data", "pubkey", "time", "monotonic"]
        );
        assert!(matches!(store.list_dir("raw/Missing"), Err(Error::NotFound(_))));
    }
}

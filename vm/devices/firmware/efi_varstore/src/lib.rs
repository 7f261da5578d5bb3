// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reader and writer for EDK2-style UEFI variable store flash images.
//!
//! The image is a PI firmware volume whose payload is a
//! `VARIABLE_STORE_HEADER` followed by back-to-back variables, each a
//! variable header, a NUL-terminated UCS-2 name and the data. This is the
//! NVRAM file format OVMF-derived firmware boots from.
//!
//! [`EfiVarStore::open`] parses an image into memory, the variables can then
//! be inspected and modified, and [`EfiVarStore::flush`] rewrites the variable
//! region of the image in place. [`EfiVarStore::format`] creates a fresh,
//! empty image.
//!
//! Besides the typed accessors, the store can be browsed like a small file
//! system (see [`path::VarPath`]):
//!
//! ```text
//! by-name/<var>
//! by-uuid/<vendor guid>/<var>
//! raw/<var>/{attr,uuid,data,pubkey,time,monotonic}
//! ```

#![forbid(unsafe_code)]

mod create;
mod parse;
pub mod path;

use guid::Guid;
use std::collections::BTreeSet;
use thiserror::Error;
use uefi_specs::edk2::variable_format::AUTHENTICATED_VARIABLE_HEADER;
use uefi_specs::edk2::variable_format::HEADER_ALIGNMENT;
use uefi_specs::edk2::variable_format::VARIABLE_HEADER;
use uefi_specs::uefi::nvram::EfiVariableAttributes;
use uefi_specs::uefi::time::EFI_TIME;

pub use create::DEFAULT_BLOCK_SIZE;

/// Longest variable name, in characters, excluding the NUL terminator.
pub const MAX_VARIABLE_NAME_CHARS: usize = 127;

/// Errors returned by the variable store.
#[derive(Debug, Error)]
pub enum Error {
    /// The image does not start with a firmware volume header at all.
    #[error("not an EFI variable store")]
    UnknownFormat,
    #[error("corrupt variable store: {0}")]
    Corrupt(String),
    #[error("variable store size {0:#x} is not supported")]
    UnsupportedSize(usize),
    #[error("variable {0} not found")]
    NotFound(String),
    #[error("variable {0} already exists")]
    AlreadyExists(String),
    #[error("invalid variable name {0:?}")]
    InvalidName(String),
    #[error("variable store is full: {needed} bytes needed, {available} available")]
    StoreFull { needed: usize, available: usize },
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("{0:?} is a directory")]
    IsDirectory(String),
}

/// A variable in the store.
#[derive(Clone, PartialEq, Eq)]
pub struct EfiVariable {
    name: String,
    vendor: Guid,
    attributes: EfiVariableAttributes,
    monotonic_count: u64,
    timestamp: EFI_TIME,
    pubkey_index: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for EfiVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EfiVariable")
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .field("attributes", &u32::from(self.attributes))
            .field("len", &self.data.len())
            .finish()
    }
}

impl EfiVariable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> Guid {
        self.vendor
    }

    pub fn attributes(&self) -> EfiVariableAttributes {
        self.attributes
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn monotonic_count(&self) -> u64 {
        self.monotonic_count
    }

    pub fn timestamp(&self) -> EFI_TIME {
        self.timestamp
    }

    pub fn pubkey_index(&self) -> u32 {
        self.pubkey_index
    }

    /// UCS-2 name including the NUL terminator, as stored.
    fn encoded_name(&self) -> Vec<u8> {
        self.name
            .encode_utf16()
            .chain(Some(0))
            .flat_map(u16::to_le_bytes)
            .collect()
    }
}

/// Where the variable region lives in the image, and how it is encoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Region {
    /// Offset of the first variable header.
    start: usize,
    /// End of the variable region.
    end: usize,
    /// Whether the store uses authenticated variable headers.
    authenticated: bool,
}

impl Region {
    fn header_size(&self) -> usize {
        if self.authenticated {
            size_of::<AUTHENTICATED_VARIABLE_HEADER>()
        } else {
            size_of::<VARIABLE_HEADER>()
        }
    }

    fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Bytes a variable occupies in the region, including alignment padding.
    fn footprint(&self, name: &str, data_len: usize) -> usize {
        let name_len = (name.encode_utf16().count() + 1) * 2;
        (self.header_size() + name_len + data_len).next_multiple_of(HEADER_ALIGNMENT)
    }
}

/// An in-memory view of a variable store image.
///
/// Variables are addressed by name. Names are normally unique, but the format
/// allows the same name under different vendor GUIDs; name-based lookups then
/// return the first one in store order.
#[derive(Debug, Clone)]
pub struct EfiVarStore {
    region: Region,
    vars: Vec<EfiVariable>,
    used: usize,
    dirty: bool,
}

impl EfiVarStore {
    /// Parses a variable store image.
    ///
    /// Returns [`Error::UnknownFormat`] if `image` is not a firmware volume,
    /// and [`Error::Corrupt`] if it is one but its contents are inconsistent.
    pub fn open(image: &[u8]) -> Result<Self, Error> {
        let (region, vars) = parse::parse_image(image)?;
        let used = vars
            .iter()
            .map(|v| region.footprint(&v.name, v.data.len()))
            .sum();
        if used > region.capacity() {
            return Err(Error::Corrupt(format!(
                "variables need {used:#x} bytes, store holds {:#x}",
                region.capacity()
            )));
        }
        Ok(Self {
            region,
            vars,
            used,
            dirty: false,
        })
    }

    /// Returns a freshly formatted, empty `size`-byte image.
    pub fn format(size: usize) -> Result<Vec<u8>, Error> {
        create::create_image(size, DEFAULT_BLOCK_SIZE)
    }

    /// Writes the variables back into `image`, which must be the image this
    /// store was opened from (or a copy of it).
    ///
    /// Only the variable region is touched; unused space is erased to `0xff`.
    pub fn flush(&mut self, image: &mut [u8]) {
        let region = &mut image[self.region.start..self.region.end];
        let mut offset = 0;
        for var in &self.vars {
            offset += parse::write_variable(&mut region[offset..], var, self.region.authenticated);
        }
        region[offset..].fill(0xff);
        self.dirty = false;
    }

    /// Returns true if variables changed since the store was opened or last
    /// flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bytes available for variables.
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Bytes currently used by variables.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_authenticated(&self) -> bool {
        self.region.authenticated
    }

    /// Iterates over all variables, in store order.
    pub fn variables(&self) -> impl Iterator<Item = &EfiVariable> {
        self.vars.iter()
    }

    /// The distinct vendor GUIDs in the store.
    pub fn vendors(&self) -> BTreeSet<Guid> {
        self.vars.iter().map(|v| v.vendor).collect()
    }

    /// Iterates over the variables owned by `vendor`.
    pub fn variables_by_vendor(&self, vendor: Guid) -> impl Iterator<Item = &EfiVariable> {
        self.vars.iter().filter(move |v| v.vendor == vendor)
    }

    /// Looks up a variable by name.
    pub fn get(&self, name: &str) -> Option<&EfiVariable> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Looks up a variable by vendor and name.
    pub fn get_by_vendor(&self, vendor: Guid, name: &str) -> Option<&EfiVariable> {
        self.vars
            .iter()
            .find(|v| v.vendor == vendor && v.name == name)
    }

    fn position(&self, name: &str) -> Result<usize, Error> {
        self.vars
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    fn position_by_vendor(&self, vendor: Guid, name: &str) -> Result<usize, Error> {
        self.vars
            .iter()
            .position(|v| v.vendor == vendor && v.name == name)
            .ok_or_else(|| Error::NotFound(format!("{vendor}/{name}")))
    }

    fn reserve(&self, current: usize, new: usize) -> Result<(), Error> {
        let available = self.capacity() - (self.used - current);
        if new > available {
            return Err(Error::StoreFull {
                needed: new,
                available,
            });
        }
        Ok(())
    }

    /// Creates an empty variable under `vendor`.
    ///
    /// Fails with [`Error::AlreadyExists`] if `vendor` already owns a variable
    /// called `name`.
    pub fn add(
        &mut self,
        vendor: Guid,
        name: &str,
        attributes: EfiVariableAttributes,
    ) -> Result<(), Error> {
        check_name(name)?;
        if self.get_by_vendor(vendor, name).is_some() {
            return Err(Error::AlreadyExists(name.to_owned()));
        }
        let footprint = self.region.footprint(name, 0);
        self.reserve(0, footprint)?;

        tracing::debug!(name, %vendor, attributes = u32::from(attributes), "adding variable");
        self.vars.push(EfiVariable {
            name: name.to_owned(),
            vendor,
            attributes,
            monotonic_count: 0,
            timestamp: EFI_TIME::ZEROED,
            pubkey_index: 0,
            data: Vec::new(),
        });
        self.used += footprint;
        self.dirty = true;
        Ok(())
    }

    /// Replaces the data of the variable called `name`, resizing it as
    /// needed.
    pub fn set_data(&mut self, name: &str, data: &[u8]) -> Result<(), Error> {
        let index = self.position(name)?;
        self.set_data_at(index, data)
    }

    /// Replaces the data of the variable `name` owned by `vendor`.
    pub fn set_data_by_vendor(
        &mut self,
        vendor: Guid,
        name: &str,
        data: &[u8],
    ) -> Result<(), Error> {
        let index = self.position_by_vendor(vendor, name)?;
        self.set_data_at(index, data)
    }

    fn set_data_at(&mut self, index: usize, data: &[u8]) -> Result<(), Error> {
        let var = &self.vars[index];
        let current = self.region.footprint(&var.name, var.data.len());
        let new = self.region.footprint(&var.name, data.len());
        self.reserve(current, new)?;

        let var = &mut self.vars[index];
        var.data.clear();
        var.data.extend_from_slice(data);
        self.used = self.used - current + new;
        self.dirty = true;
        Ok(())
    }

    /// Changes the attributes of the variable called `name`.
    pub fn set_attributes(
        &mut self,
        name: &str,
        attributes: EfiVariableAttributes,
    ) -> Result<(), Error> {
        let index = self.position(name)?;
        self.vars[index].attributes = attributes;
        self.dirty = true;
        Ok(())
    }

    /// Removes the variable called `name`.
    pub fn remove(&mut self, name: &str) -> Result<EfiVariable, Error> {
        let index = self.position(name)?;
        let var = self.vars.remove(index);
        self.used -= self.region.footprint(&var.name, var.data.len());
        self.dirty = true;
        tracing::debug!(name, vendor = %var.vendor, "removed variable");
        Ok(var)
    }

    /// Creates the variable `name` under `vendor` with `attributes` and
    /// `data`, discarding any variable `vendor` already owns by that name.
    ///
    /// On failure the store is unchanged.
    pub fn replace(
        &mut self,
        vendor: Guid,
        name: &str,
        attributes: EfiVariableAttributes,
        data: &[u8],
    ) -> Result<(), Error> {
        let existing = self.position_by_vendor(vendor, name).ok();
        let current = match existing {
            Some(index) => self.region.footprint(name, self.vars[index].data.len()),
            None => {
                check_name(name)?;
                0
            }
        };
        let new = self.region.footprint(name, data.len());
        self.reserve(current, new)?;

        tracing::debug!(
            name,
            %vendor,
            attributes = u32::from(attributes),
            replaced = existing.is_some(),
            "replacing variable"
        );
        let var = EfiVariable {
            name: name.to_owned(),
            vendor,
            attributes,
            monotonic_count: 0,
            timestamp: EFI_TIME::ZEROED,
            pubkey_index: 0,
            data: data.to_vec(),
        };
        match existing {
            Some(index) => self.vars[index] = var,
            None => self.vars.push(var),
        }
        self.used = self.used - current + new;
        self.dirty = true;
        Ok(())
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name.contains('\0')
        || name.encode_utf16().count() > MAX_VARIABLE_NAME_CHARS
    {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The tar container used when a machine has more NVRAM than the UEFI
//! variable store. Each regular file member is one entry, keyed by its path.

use std::collections::BTreeMap;
use std::io::Read;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt tar stream")]
    Corrupt(#[source] std::io::Error),
    #[error("archive member {path:?} has unsupported type {kind:?}")]
    UnsupportedMember { path: String, kind: tar::EntryType },
}

/// Reads every regular file in the tar stream `data`. Directories are
/// skipped; any other member type is an error.
pub fn read_archive(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, ArchiveError> {
    let mut archive = tar::Archive::new(data);
    let mut entries = BTreeMap::new();
    for entry in archive.entries().map_err(ArchiveError::Corrupt)? {
        let mut entry = entry.map_err(ArchiveError::Corrupt)?;
        let path = entry
            .path()
            .map_err(ArchiveError::Corrupt)?
            .to_string_lossy()
            .into_owned();

        match entry.header().entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => {}
            tar::EntryType::Directory => {
                tracing::trace!(path, "skipping archive directory");
                continue;
            }
            kind => return Err(ArchiveError::UnsupportedMember { path, kind }),
        }

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(ArchiveError::Corrupt)?;
        tracing::debug!(path, len = buf.len(), "loaded NVRAM entry");
        entries.insert(path, buf);
    }
    Ok(entries)
}

/// Builds a GNU tar stream holding one regular file per entry.
pub fn write_archive(entries: &BTreeMap<String, Vec<u8>>) -> std::io::Result<Vec<u8>> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());

    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o600);
        header.set_mtime(mtime);
        builder.append_data(&mut header, path, data.as_slice())?;
    }
    builder.into_inner()
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error object for the NVRAM store.

use crate::archive::ArchiveError;
use crate::encrypt::CryptoError;
use crate::key_store::KeyStoreError;
use crate::machine::FirmwareType;
use crate::machine::MachineError;
use std::path::PathBuf;
use thiserror::Error;

/// Broad classification of an [`Error`], for callers that map failures onto
/// their own status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A namespace, entry or variable does not exist.
    NotFound,
    /// A size limit was exceeded.
    OutOfRange,
    /// The request or the stored data uses something this store cannot handle.
    NotSupported,
    /// The request is valid but not implemented.
    NotImplemented,
    /// Stored data could not be decoded.
    Corrupt,
    /// Key retrieval, encryption or decryption failed.
    Crypto,
    /// The object or the machine is not in a state that allows the request.
    PreconditionViolated,
    /// A file system operation failed.
    Io,
}

/// NVRAM store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("NVRAM entry {0:?} not found")]
    EntryNotFound(String),
    #[error("the UEFI NVRAM file is not existing for this machine")]
    NoUefiVarStore,
    #[error("NVRAM file {path} is {size} bytes, the limit is {limit}")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    #[error("firmware type {0:?} has no UEFI variable store")]
    NotUefiFirmware(FirmwareType),
    #[error("UEFI variable store of {0} bytes requested, only the default size is implemented")]
    CustomVarStoreSize(u64),
    #[error("invalid NVRAM archive")]
    Archive(#[source] ArchiveError),
    #[error("invalid UEFI variable store")]
    VarStore(#[source] efi_varstore::Error),
    #[error("failed to retrieve secret key {key_id:?}")]
    KeyRetrieval {
        key_id: String,
        #[source]
        source: KeyStoreError,
    },
    #[error("failed to unlock the key store with key {key_id:?}")]
    UnlockKeyStore {
        key_id: String,
        #[source]
        source: CryptoError,
    },
    #[error("failed to decrypt NVRAM with key {key_id:?}")]
    Decrypt {
        key_id: String,
        #[source]
        source: CryptoError,
    },
    #[error("failed to encrypt NVRAM with key {key_id:?}")]
    Encrypt {
        key_id: String,
        #[source]
        source: CryptoError,
    },
    #[error("machine state does not allow changes")]
    MachineNotMutable(#[source] MachineError),
    #[error("NVRAM store is not ready")]
    NotReady(#[from] lifecycle_guard::NotReady),
    #[error("failed to read NVRAM file")]
    ReadFile(#[source] std::io::Error),
    #[error("failed to write NVRAM file")]
    WriteFile(#[source] std::io::Error),
    #[error("failed to build NVRAM archive")]
    BuildArchive(#[source] std::io::Error),
}

impl Error {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EntryNotFound(_) | Error::NoUefiVarStore => ErrorKind::NotFound,
            Error::FileTooLarge { .. } => ErrorKind::OutOfRange,
            Error::NotUefiFirmware(_) => ErrorKind::NotSupported,
            Error::CustomVarStoreSize(_) => ErrorKind::NotImplemented,
            Error::Archive(ArchiveError::UnsupportedMember { .. }) => ErrorKind::NotSupported,
            Error::Archive(ArchiveError::Corrupt(_)) => ErrorKind::Corrupt,
            Error::VarStore(err) => var_store_error_kind(err),
            Error::KeyRetrieval { .. }
            | Error::UnlockKeyStore { .. }
            | Error::Decrypt { .. }
            | Error::Encrypt { .. } => ErrorKind::Crypto,
            Error::MachineNotMutable(_) | Error::NotReady(_) => ErrorKind::PreconditionViolated,
            Error::ReadFile(_) | Error::WriteFile(_) | Error::BuildArchive(_) => ErrorKind::Io,
        }
    }
}

/// Classifies an error from the variable store codec.
pub fn var_store_error_kind(err: &efi_varstore::Error) -> ErrorKind {
    use efi_varstore::Error as E;
    match err {
        E::NotFound(_) => ErrorKind::NotFound,
        E::StoreFull { .. } | E::UnsupportedSize(_) => ErrorKind::OutOfRange,
        E::AlreadyExists(_) | E::InvalidName(_) | E::InvalidPath(_) | E::IsDirectory(_) => {
            ErrorKind::PreconditionViolated
        }
        E::UnknownFormat | E::Corrupt(_) => ErrorKind::Corrupt,
    }
}

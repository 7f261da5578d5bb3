// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use nvram_store::ErrorKind;
use thiserror::Error;
use uefi_nvram_specvars::signature_db::AddSignatureError;
use uefi_nvram_specvars::ParseError;

/// UEFI variable store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Store(#[from] nvram_store::Error),
    #[error("failed to update variable {name:?}")]
    VarStore {
        name: String,
        #[source]
        source: efi_varstore::Error,
    },
    #[error("variable {0:?} not found")]
    VariableNotFound(String),
    #[error("variable size is bogus ({0} bytes)")]
    BogusSecureBootEnable(usize),
    #[error("secure boot cannot be changed without a platform key")]
    PlatformKeyMissing,
    #[error("unsupported signature type {0:#x}")]
    UnsupportedSignatureType(u32),
    #[error("failed to parse signature database {name:?}")]
    ParseSignatures {
        name: &'static str,
        #[source]
        source: ParseError,
    },
    #[error("invalid signature")]
    AddSignature(#[source] AddSignatureError),
    #[error("built-in certificate {0:?} is not available")]
    MissingCertificate(&'static str),
    #[error("UEFI variable store is not ready")]
    NotReady(#[from] lifecycle_guard::NotReady),
}

impl Error {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(err) => err.kind(),
            Error::VarStore { source, .. } => nvram_store::var_store_error_kind(source),
            Error::VariableNotFound(_) | Error::MissingCertificate(_) => ErrorKind::NotFound,
            Error::BogusSecureBootEnable(_) | Error::ParseSignatures { .. } => ErrorKind::Corrupt,
            Error::UnsupportedSignatureType(_) => ErrorKind::NotSupported,
            Error::PlatformKeyMissing | Error::AddSignature(_) | Error::NotReady(_) => {
                ErrorKind::PreconditionViolated
            }
        }
    }
}

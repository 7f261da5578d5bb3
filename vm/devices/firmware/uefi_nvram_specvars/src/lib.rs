// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured views of UEFI NVRAM variable payloads.
//!
//! Currently this covers the secure boot signature databases (`PK`, `KEK`,
//! `db`, `dbx`, `MokList`), whose payload is a series of
//! `EFI_SIGNATURE_LIST`s.

#![forbid(unsafe_code)]

pub mod signature_db;
pub mod signature_list;

pub use signature_db::SignatureDatabase;
pub use signature_db::SignatureEntry;
pub use signature_list::ParseError;
pub use signature_list::SignatureType;

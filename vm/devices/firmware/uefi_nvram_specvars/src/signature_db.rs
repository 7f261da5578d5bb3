// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An owned, mutable signature database: the merge base used when enrolling
//! keys into `PK`, `KEK`, `db`, `dbx` or `MokList`.

use crate::signature_list::extend_as_spec_signature_list;
use crate::signature_list::ParseError;
use crate::signature_list::ParseSignatureLists;
use crate::signature_list::SignatureType;
use crate::signature_list::SHA256_DIGEST_SIZE;
use guid::Guid;
use thiserror::Error;

/// A single signature in a [`SignatureDatabase`].
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    pub kind: SignatureType,
    pub owner: Guid,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for SignatureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEntry")
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Errors when adding a signature to a [`SignatureDatabase`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddSignatureError {
    #[error("sha256 signatures must be 32 bytes, got {0}")]
    InvalidSha256Length(usize),
    #[error("x509 signature is empty")]
    EmptyCertificate,
}

/// An ordered collection of signatures.
///
/// Adding a signature never removes or deduplicates existing ones.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SignatureDatabase {
    entries: Vec<SignatureEntry>,
}

impl SignatureDatabase {
    /// Returns an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a variable payload into a database.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let mut db = Self::new();
        db.add_from_existing(buf)?;
        Ok(db)
    }

    /// Appends every signature in the serialized `buf` to the database.
    ///
    /// On error the database is left unchanged.
    pub fn add_from_existing(&mut self, buf: &[u8]) -> Result<(), ParseError> {
        let mut parsed = Vec::new();
        for list in ParseSignatureLists::new(buf) {
            let list = list?;
            parsed.extend(list.signatures().map(|sig| SignatureEntry {
                kind: list.kind(),
                owner: sig.owner,
                data: sig.data.into_owned(),
            }));
        }
        self.entries.append(&mut parsed);
        Ok(())
    }

    /// Appends a signature.
    pub fn add(
        &mut self,
        kind: SignatureType,
        owner: Guid,
        data: &[u8],
    ) -> Result<(), AddSignatureError> {
        match kind {
            SignatureType::Sha256 if data.len() != SHA256_DIGEST_SIZE => {
                return Err(AddSignatureError::InvalidSha256Length(data.len()));
            }
            SignatureType::X509 if data.is_empty() => {
                return Err(AddSignatureError::EmptyCertificate);
            }
            _ => {}
        }
        self.entries.push(SignatureEntry {
            kind,
            owner,
            data: data.to_vec(),
        });
        Ok(())
    }

    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the database as a series of `EFI_SIGNATURE_LIST`s, in
    /// entry order.
    ///
    /// Adjacent SHA-256 digests share a list. Each certificate gets a list of
    /// its own, since a list can only hold signatures of identical size.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let is_hash = |e: &SignatureEntry| e.kind == SignatureType::Sha256;
        for list in self.entries.chunk_by(|a, b| is_hash(a) && is_hash(b)) {
            extend_as_spec_signature_list(
                list[0].kind,
                list.iter().map(|e| (e.owner, e.data.as_slice())),
                &mut out,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER_1: Guid = Guid::from_static_str("00000001-0000-0000-0000-000000000000");
    const OWNER_2: Guid = Guid::from_static_str("00000002-0000-0000-0000-000000000000");

    #[test]
    fn merge_is_append_only() {
        let mut db = SignatureDatabase::new();
        db.add(SignatureType::X509, OWNER_1, b"cert one").unwrap();
        db.add(SignatureType::Sha256, OWNER_2, &[7; 32]).unwrap();
        let stored = db.to_bytes();

        let mut merged = SignatureDatabase::parse(&stored).unwrap();
        merged.add(SignatureType::X509, OWNER_1, b"cert one").unwrap();
        assert_eq!(merged.len(), 3);

        let reparsed = SignatureDatabase::parse(&merged.to_bytes()).unwrap();
        let certs: Vec<_> = reparsed
            .entries()
            .iter()
            .filter(|e| e.kind == SignatureType::X509)
            .collect();
        assert_eq!(certs.len(), 2);
        assert!(certs.iter().all(|c| c.data == b"cert one" && c.owner == OWNER_1));
    }

    #[test]
    fn hashes_share_one_list() {
        let mut db = SignatureDatabase::new();
        db.add(SignatureType::Sha256, OWNER_1, &[1; 32]).unwrap();
        db.add(SignatureType::Sha256, OWNER_2, &[2; 32]).unwrap();
        let bytes = db.to_bytes();
        assert_eq!(bytes.len(), 28 + 2 * (16 + 32));
        assert_eq!(ParseSignatureLists::new(&bytes).count(), 1);
    }

    #[test]
    fn merge_keeps_list_order() {
        let mut db = SignatureDatabase::new();
        db.add(SignatureType::X509, OWNER_1, b"cert one").unwrap();
        db.add(SignatureType::Sha256, OWNER_1, &[1; 32]).unwrap();
        let mut merged = SignatureDatabase::parse(&db.to_bytes()).unwrap();
        merged.add(SignatureType::Sha256, OWNER_2, &[2; 32]).unwrap();
        merged.add(SignatureType::X509, OWNER_2, b"cert two").unwrap();

        let bytes = merged.to_bytes();
        assert_eq!(ParseSignatureLists::new(&bytes).count(), 3);
        let reparsed = SignatureDatabase::parse(&bytes).unwrap();
        assert_eq!(reparsed, merged);
        let order: Vec<_> = reparsed
            .entries()
            .iter()
            .map(|e| (e.kind, e.owner))
            .collect();
        assert_eq!(
            order,
            [
                (SignatureType::X509, OWNER_1),
                (SignatureType::Sha256, OWNER_1),
                (SignatureType::Sha256, OWNER_2),
                (SignatureType::X509, OWNER_2),
            ]
        );
    }

    #[test]
    fn rejects_bad_payloads() {
        let mut db = SignatureDatabase::new();
        assert_eq!(
            db.add(SignatureType::Sha256, OWNER_1, &[0; 20]),
            Err(AddSignatureError::InvalidSha256Length(20))
        );
        assert_eq!(
            db.add(SignatureType::X509, OWNER_1, &[]),
            Err(AddSignatureError::EmptyCertificate)
        );
        assert!(db.is_empty());
        assert!(db.to_bytes().is_empty());
    }

    #[test]
    fn corrupt_existing_db_is_not_merged() {
        let mut db = SignatureDatabase::new();
        db.add(SignatureType::X509, OWNER_1, b"cert").unwrap();
        db.add_from_existing(&[0xff; 40]).unwrap_err();
        assert_eq!(db.len(), 1);
    }
}

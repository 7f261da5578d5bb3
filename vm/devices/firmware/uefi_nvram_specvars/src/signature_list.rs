// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Zero-copy parsing and emitting of [`EFI_SIGNATURE_LIST`] structures.
//!
//! [`ParseSignatureLists`] iterates over the lists packed back to back in a
//! variable payload; each [`SignatureListRef`] in turn iterates over its
//! signatures.

use guid::Guid;
use std::borrow::Cow;
use thiserror::Error;
use uefi_specs::uefi::nvram::signature_list::EFI_CERT_SHA256_GUID;
use uefi_specs::uefi::nvram::signature_list::EFI_CERT_X509_GUID;
use uefi_specs::uefi::nvram::signature_list::EFI_SIGNATURE_DATA;
use uefi_specs::uefi::nvram::signature_list::EFI_SIGNATURE_LIST;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// Length of a SHA-256 digest.
pub const SHA256_DIGEST_SIZE: usize = 32;

/// The signature types a signature database can hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignatureType {
    /// A DER-encoded X.509 certificate.
    X509,
    /// A SHA-256 digest.
    Sha256,
}

impl SignatureType {
    /// The `SignatureType` GUID used in the list header.
    pub fn guid(&self) -> Guid {
        match self {
            SignatureType::X509 => EFI_CERT_X509_GUID,
            SignatureType::Sha256 => EFI_CERT_SHA256_GUID,
        }
    }

    /// Maps a list header GUID back to a signature type.
    pub fn from_guid(guid: Guid) -> Option<Self> {
        match guid {
            EFI_CERT_X509_GUID => Some(SignatureType::X509),
            EFI_CERT_SHA256_GUID => Some(SignatureType::Sha256),
            _ => None,
        }
    }
}

/// One signature, together with the agent that enrolled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature<'a> {
    pub owner: Guid,
    pub data: Cow<'a, [u8]>,
}

/// Errors which may occur during `EFI_SIGNATURE_LIST` parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("could not read signature list header")]
    InvalidHeader,
    #[error("signature list size {0} is smaller than its headers")]
    InvalidListSize(u32),
    #[error("buffer contains less data than specified in EFI_SIGNATURE_LIST header")]
    TruncatedData,
    #[error("unsupported signature type: {0}")]
    UnsupportedSignatureType(Guid),
    #[error("invalid signature_size {size} for {kind:?} signatures")]
    InvalidSignatureSize { kind: SignatureType, size: u32 },
    #[error("signature data is not a multiple of signature_size {0}")]
    RaggedSignatures(u32),
}

/// Iterator over a series of `EFI_SIGNATURE_LIST` structs in a single buffer.
pub struct ParseSignatureLists<'a> {
    buf: &'a [u8],
}

impl<'a> ParseSignatureLists<'a> {
    /// Instantiate a `ParseSignatureLists` over `buf`.
    pub fn new(buf: &'a [u8]) -> ParseSignatureLists<'a> {
        ParseSignatureLists { buf }
    }

    fn next_inner(&mut self) -> Result<Option<SignatureListRef<'a>>, ParseError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let (header, rest) = EFI_SIGNATURE_LIST::read_from_prefix(self.buf)
            .map_err(|_| ParseError::InvalidHeader)?;

        let headers_len = size_of::<EFI_SIGNATURE_LIST>() + header.signature_header_size as usize;
        let body_len = (header.signature_list_size as usize)
            .checked_sub(headers_len)
            .ok_or(ParseError::InvalidListSize(header.signature_list_size))?;
        let body_with_header =
            header.signature_list_size as usize - size_of::<EFI_SIGNATURE_LIST>();
        if rest.len() < body_with_header {
            return Err(ParseError::TruncatedData);
        }
        let (list, rest) = rest.split_at(body_with_header);
        let signatures = &list[list.len() - body_len..];

        let kind = SignatureType::from_guid(header.signature_type)
            .ok_or(ParseError::UnsupportedSignatureType(header.signature_type))?;

        let size = header.signature_size;
        let size_ok = match kind {
            SignatureType::Sha256 => {
                size as usize == size_of::<EFI_SIGNATURE_DATA>() + SHA256_DIGEST_SIZE
            }
            SignatureType::X509 => size as usize > size_of::<EFI_SIGNATURE_DATA>(),
        };
        if !size_ok {
            return Err(ParseError::InvalidSignatureSize { kind, size });
        }
        if signatures.len() % size as usize != 0 {
            return Err(ParseError::RaggedSignatures(size));
        }

        self.buf = rest;
        Ok(Some(SignatureListRef {
            kind,
            signature_size: size as usize,
            signatures,
        }))
    }
}

impl<'a> Iterator for ParseSignatureLists<'a> {
    type Item = Result<SignatureListRef<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let res = self.next_inner().transpose();
        if matches!(res, Some(Err(_))) {
            // Don't keep yielding errors for the same bytes.
            self.buf = &[];
        }
        res
    }
}

/// A parsed, validated `EFI_SIGNATURE_LIST`.
#[derive(Debug, Clone, Copy)]
pub struct SignatureListRef<'a> {
    kind: SignatureType,
    signature_size: usize,
    signatures: &'a [u8],
}

impl<'a> SignatureListRef<'a> {
    pub fn kind(&self) -> SignatureType {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.signatures.len() / self.signature_size
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Iterates over the signatures in the list.
    pub fn signatures(&self) -> impl Iterator<Item = Signature<'a>> {
        let signatures: &'a [u8] = self.signatures;
        signatures
            .chunks_exact(self.signature_size)
            .map(|chunk| {
                // Each chunk is longer than EFI_SIGNATURE_DATA, checked when
                // the list was parsed.
                let (owner, data) = chunk.split_at(size_of::<EFI_SIGNATURE_DATA>());
                let mut raw = [0; 16];
                raw.copy_from_slice(owner);
                Signature {
                    owner: Guid::from(raw),
                    data: Cow::Borrowed(data),
                }
            })
    }
}

/// Appends one `EFI_SIGNATURE_LIST` holding `signatures` to `out`.
///
/// All signatures must have the same length, as required by the format.
pub fn extend_as_spec_signature_list<'a>(
    kind: SignatureType,
    signatures: impl IntoIterator<Item = (Guid, &'a [u8])> + Clone,
    out: &mut Vec<u8>,
) {
    let mut count = 0;
    let mut data_len = None;
    for (_, data) in signatures.clone() {
        debug_assert!(data_len.is_none_or(|len| len == data.len()));
        data_len = Some(data.len());
        count += 1;
    }
    let Some(data_len) = data_len else {
        return;
    };

    let signature_size = size_of::<EFI_SIGNATURE_DATA>() + data_len;
    let header = EFI_SIGNATURE_LIST {
        signature_type: kind.guid(),
        signature_list_size: (size_of::<EFI_SIGNATURE_LIST>() + signature_size * count) as u32,
        signature_header_size: 0,
        signature_size: signature_size as u32,
    };

    out.extend_from_slice(header.as_bytes());
    for (owner, data) in signatures {
        out.extend_from_slice(
            EFI_SIGNATURE_DATA {
                signature_owner: owner,
            }
            .as_bytes(),
        );
        out.extend_from_slice(data);
    }
}

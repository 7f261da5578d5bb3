// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![forbid(unsafe_code)]

//! A "resource" crate holding the DER-encoded certificates that can be
//! enrolled into a fresh UEFI variable store without the caller supplying
//! them.
//!
//! The certificates under `certs/` are self-signed placeholders with the
//! same roles as the production ones. Swap the files to ship real keys; the
//! lookup names are stable.

use guid::Guid;

/// Signature owner used for keys enrolled on behalf of VirtualBox.
pub const VIRTUALBOX_OWNER: Guid = Guid::from_static_str("9400896a-146c-4f4c-9647-2c73620ca591");

/// Signature owner used for the Microsoft keys.
pub const MICROSOFT_OWNER: Guid = Guid::from_static_str("77fa9abd-0359-4d32-bd60-28f4e78f784b");

macro_rules! include_certs {
    (
        $(($const_name:ident, $name:literal, $path:literal),)*
    ) => {
        $(
            #[doc = concat!("`", $name, "`")]
            pub const $const_name: &[u8] = include_bytes!(concat!("../certs/", $path));
        )*

        /// Every built-in certificate, by lookup name.
        pub const ALL: &[(&str, &[u8])] = &[$(($name, $const_name),)*];
    };
}

include_certs! {
    (ORACLE_DEFAULT_PK, "oracle-default-pk", "oracle_default_pk.der"),
    (MS_KEK, "ms-kek", "ms_kek.der"),
    (MS_CA, "ms-ca", "ms_ca.der"),
    (MS_UEFI_CA, "ms-uefi-ca", "ms_uefi_ca.der"),
}

/// Looks up a built-in certificate by name.
pub fn lookup(name: &str) -> Option<&'static [u8]> {
    ALL.iter()
        .find_map(|&(n, cert)| (n == name).then_some(cert))
}

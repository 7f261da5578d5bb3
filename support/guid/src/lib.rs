// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provides the [`Guid`] type, laid out the way UEFI and the PI spec store a
//! GUID on disk (`EFI_GUID`).

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::str::FromStr;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Mixed-endian GUID, as stored in EFI variable stores and signature lists.
#[repr(C)]
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, IntoBytes, FromBytes, Immutable, KnownLayout,
)]
#[expect(missing_docs)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Default for Guid {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

/// Positions of the 32 hex digits in the unbraced textual form.
const DIGIT_POSITIONS: [usize; 32] = [
    0, 1, 2, 3, 4, 5, 6, 7, // data1
    9, 10, 11, 12, // data2
    14, 15, 16, 17, // data3
    19, 20, 21, 22, // data4[0..2]
    24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, // data4[2..8]
];

impl Guid {
    /// The all-zero GUID.
    pub const ZERO: Self = Self {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };

    /// Returns a new randomly-generated version 4 GUID.
    pub fn new_random() -> Self {
        let mut guid = Guid::default();
        getrandom::getrandom(guid.as_mut_bytes()).expect("rng failure");

        guid.data3 = guid.data3 & 0xfff | 0x4000;
        guid.data4[0] = guid.data4[0] & 0x3f | 0x80;
        guid
    }

    /// Creates a GUID from its textual form at compile time, panicking if the
    /// input is malformed. Both `{xxxxxxxx-...}` and `xxxxxxxx-...` are
    /// accepted.
    ///
    /// Use [`str::parse`] for untrusted input.
    pub const fn from_static_str(value: &'static str) -> Guid {
        match Self::parse(value.as_bytes()) {
            Ok(guid) => guid,
            Err(ParseError::Length) => panic!("Invalid GUID length."),
            Err(ParseError::Format) => panic!("Invalid GUID format."),
            Err(ParseError::Digit) => panic!("Invalid GUID digit."),
        }
    }

    const fn parse(value: &[u8]) -> Result<Self, ParseError> {
        let offset = match value.len() {
            36 => 0,
            38 => {
                if value[0] != b'{' || value[37] != b'}' {
                    return Err(ParseError::Format);
                }
                1
            }
            _ => return Err(ParseError::Length),
        };

        if value[offset + 8] != b'-'
            || value[offset + 13] != b'-'
            || value[offset + 18] != b'-'
            || value[offset + 23] != b'-'
        {
            return Err(ParseError::Format);
        }

        let mut raw = [0u8; 16];
        let mut i = 0;
        while i < raw.len() {
            let hi = hex_digit(value[offset + DIGIT_POSITIONS[i * 2]]);
            let lo = hex_digit(value[offset + DIGIT_POSITIONS[i * 2 + 1]]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => raw[i] = hi << 4 | lo,
                _ => return Err(ParseError::Digit),
            }
            i += 1;
        }

        Ok(Guid {
            data1: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            data2: u16::from_be_bytes([raw[4], raw[5]]),
            data3: u16::from_be_bytes([raw[6], raw[7]]),
            data4: [
                raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
            ],
        })
    }

    /// Returns true if this is the all-zero GUID.
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }
}

const fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        )
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// An error parsing a GUID.
#[derive(Debug, Error, PartialEq, Eq)]
#[expect(missing_docs)]
pub enum ParseError {
    #[error("invalid GUID length")]
    Length,
    #[error("invalid GUID format")]
    Format,
    #[error("invalid GUID digit")]
    Digit,
}

impl FromStr for Guid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

impl TryFrom<&[u8]> for Guid {
    type Error = ParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Guid> for [u8; 16] {
    fn from(value: Guid) -> Self {
        zerocopy::transmute!(value)
    }
}

impl From<[u8; 16]> for Guid {
    fn from(value: [u8; 16]) -> Self {
        zerocopy::transmute!(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Guid;
    use super::ParseError;

    const SAMPLE: Guid = Guid {
        data1: 0x8be4df61,
        data2: 0x93ca,
        data3: 0x11d2,
        data4: [0xaa, 0x0d, 0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c],
    };

    #[test]
    fn display_is_lowercase() {
        assert_eq!(SAMPLE.to_string(), "8be4df61-93ca-11d2-aa0d-00e098032b8c");
    }

    #[test]
    fn parse_accepts_both_forms() {
        const FROM_STATIC: Guid = Guid::from_static_str("8BE4DF61-93CA-11D2-AA0D-00E098032B8C");
        assert_eq!(FROM_STATIC, SAMPLE);
        assert_eq!(
            "{8be4df61-93ca-11d2-aa0d-00e098032b8c}"
                .parse::<Guid>()
                .unwrap(),
            SAMPLE
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("8be4df61".parse::<Guid>(), Err(ParseError::Length));
        assert_eq!(
            "8be4df61x93ca-11d2-aa0d-00e098032b8c".parse::<Guid>(),
            Err(ParseError::Format)
        );
        assert_eq!(
            "8be4df6g-93ca-11d2-aa0d-00e098032b8c".parse::<Guid>(),
            Err(ParseError::Digit)
        );
    }

    #[test]
    fn byte_layout_is_mixed_endian() {
        let bytes: [u8; 16] = SAMPLE.into();
        assert_eq!(&bytes[..4], &[0x61, 0xdf, 0xe4, 0x8b]);
        assert_eq!(&bytes[8..], &SAMPLE.data4);
        assert_eq!(Guid::from(bytes), SAMPLE);
    }

    #[test]
    fn random_is_version_4() {
        let guid = Guid::new_random();
        assert_eq!(guid.data3 >> 12, 4);
        assert_eq!(guid.data4[0] & 0xc0, 0x80);
    }
}

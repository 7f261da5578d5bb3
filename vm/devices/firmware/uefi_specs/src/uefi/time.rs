// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! UEFI Time Services.

use core::fmt::Display;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// UEFI Time Structure
///
/// UEFI spec 8.3 - Time Services
///
/// Authenticated variables carry one of these as their timestamp. Variables
/// written outside of the firmware (by the host) leave it all-zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct EFI_TIME {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub pad1: u8,
    pub nanosecond: u32,
    /// Minutes from UTC, -1440 to 1440, or [`EFI_UNSPECIFIED_TIMEZONE`].
    pub timezone: i16,
    /// `EFI_TIME_ADJUST_DAYLIGHT` (bit 0) and `EFI_TIME_IN_DAYLIGHT` (bit 1).
    pub daylight: u8,
    pub pad2: u8,
}

const_assert_eq!(size_of::<EFI_TIME>(), 16);

/// UEFI spec 8.3 - Value Definition for EFI_TIME.TimeZone
pub const EFI_UNSPECIFIED_TIMEZONE: i16 = 0x07ff;

impl Default for EFI_TIME {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl EFI_TIME {
    /// EFI_TIME with all fields set to zero
    pub const ZEROED: EFI_TIME = EFI_TIME {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0,
        pad1: 0,
        nanosecond: 0,
        timezone: 0,
        daylight: 0,
        pad2: 0,
    };
}

impl Display for EFI_TIME {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.nanosecond != 0 {
            write!(f, ".{:09}", self.nanosecond)?;
        }
        match self.timezone {
            0 => write!(f, "Z"),
            EFI_UNSPECIFIED_TIMEZONE => Ok(()),
            tz => {
                let sign = if tz > 0 { '+' } else { '-' };
                let tz = tz.unsigned_abs();
                write!(f, "{sign}{:02}:{:02}", tz / 60, tz % 60)
            }
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type definitions taken directly from the UEFI spec.
//!
//! Each type in this module MUST include a doc comment that references the
//! specific part of the UEFI spec it was pulled from.

pub mod nvram;
pub mod time;

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type definitions from the UEFI Platform Initialization (PI) spec.
//!
//! Each type in this module references the PI spec volume and section it was
//! pulled from.

pub mod firmware_volume;

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types specific to UEFI on Linux distros.

pub mod nvram;

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Nvram variables owned by shim.

pub mod vars {
    use guid::Guid;

    /// Vendor GUID shim uses for its Machine Owner Key variables.
    pub const SHIM_LOCK_GUID: Guid = Guid::from_static_str("605dab50-e046-4300-abb6-3dd810dd8b23");

    defn_nvram_var!(MOK_LIST = (SHIM_LOCK_GUID, "MokList"));
    defn_nvram_var!(MOK_LISTX = (SHIM_LOCK_GUID, "MokListX"));
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Persistent configuration and saved state of an NVRAM store.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// NVRAM configuration, as kept in the machine settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NvramSettings {
    /// NVRAM file path. Relative paths are relative to the settings
    /// directory; empty means the machine's default file name.
    pub nvram_path: String,
    /// Id of the secret key protecting `key_store`.
    pub key_id: String,
    /// Encrypted data key, see [`crate::encrypt`].
    pub key_store: String,
}

impl NvramSettings {
    /// The file is encrypted only if both the key id and the key store are
    /// set.
    pub fn is_encrypted(&self) -> bool {
        !self.key_id.is_empty() && !self.key_store.is_empty()
    }
}

/// Snapshot of the NVRAM entries, stored with a saved VM.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub entries: BTreeMap<String, Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_needs_both_fields() {
        let mut settings = NvramSettings {
            key_id: "key".into(),
            ..Default::default()
        };
        assert!(!settings.is_encrypted());
        settings.key_store = "blob".into();
        assert!(settings.is_encrypted());
        settings.key_id.clear();
        assert!(!settings.is_encrypted());
    }

    #[test]
    fn settings_serialization() {
        let settings: NvramSettings =
            serde_json::from_str(r#"{ "nvramPath": "vm.nvram" }"#).unwrap();
        assert_eq!(settings.nvram_path, "vm.nvram");
        assert!(settings.key_id.is_empty());

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["keyStore"], "");
    }
}

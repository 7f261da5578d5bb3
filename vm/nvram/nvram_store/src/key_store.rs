// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide store of secret keys (passwords) supplied by the user to
//! unlock encrypted machines.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("secret key {0:?} is not known")]
    NotFound(String),
    #[error("secret key {0:?} already exists")]
    AlreadyExists(String),
    #[error("secret key {0:?} is in use")]
    KeyInUse(String),
}

struct Entry {
    secret: Zeroizing<Vec<u8>>,
    users: usize,
    /// Distinguishes this entry from earlier keys added under the same id.
    generation: u64,
}

/// Secret keys by id. Key material is wiped from memory when removed.
#[derive(Default)]
pub struct SecretKeyStore {
    keys: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for SecretKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyStore")
            .field("keys", &self.keys.lock().len())
            .finish()
    }
}

impl SecretKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&self, id: &str, secret: &[u8]) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.lock();
        if keys.contains_key(id) {
            return Err(KeyStoreError::AlreadyExists(id.to_owned()));
        }
        keys.insert(
            id.to_owned(),
            Entry {
                secret: Zeroizing::new(secret.to_vec()),
                users: 0,
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(())
    }

    /// Removes a key. Fails while the key is retained.
    pub fn delete_key(&self, id: &str) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.lock();
        match keys.get(id) {
            None => Err(KeyStoreError::NotFound(id.to_owned())),
            Some(entry) if entry.users != 0 => Err(KeyStoreError::KeyInUse(id.to_owned())),
            Some(_) => {
                keys.remove(id);
                Ok(())
            }
        }
    }

    /// Removes a key even if it is retained. Outstanding guards keep their
    /// copy of the secret. Returns false if the key was not known.
    pub fn forget_key(&self, id: &str) -> bool {
        self.keys.lock().remove(id).is_some()
    }

    /// Removes every key. Unless `force` is set, fails without removing
    /// anything if any key is retained.
    pub fn delete_all(&self, force: bool) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.lock();
        if !force {
            if let Some((id, _)) = keys.iter().find(|(_, e)| e.users != 0) {
                return Err(KeyStoreError::KeyInUse(id.clone()));
            }
        }
        keys.clear();
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().len()
    }

    /// Marks a key as in use and returns a copy of it. The key is released
    /// when the returned guard is dropped.
    pub fn retain_key(&self, id: &str) -> Result<RetainedKey<'_>, KeyStoreError> {
        let mut keys = self.keys.lock();
        let entry = keys
            .get_mut(id)
            .ok_or_else(|| KeyStoreError::NotFound(id.to_owned()))?;
        entry.users += 1;
        Ok(RetainedKey {
            store: self,
            id: id.to_owned(),
            generation: entry.generation,
            secret: entry.secret.clone(),
        })
    }

    fn release_key(&self, id: &str, generation: u64) {
        // The key may have been force-deleted, and possibly re-added, in the
        // meantime.
        if let Some(entry) = self.keys.lock().get_mut(id) {
            if entry.generation == generation {
                entry.users -= 1;
            }
        }
    }
}

/// A retained secret key.
#[must_use]
pub struct RetainedKey<'a> {
    store: &'a SecretKeyStore,
    id: String,
    generation: u64,
    secret: Zeroizing<Vec<u8>>,
}

impl RetainedKey<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for RetainedKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetainedKey").field("id", &self.id).finish()
    }
}

impl Drop for RetainedKey<'_> {
    fn drop(&mut self) {
        self.store.release_key(&self.id, self.generation);
    }
}

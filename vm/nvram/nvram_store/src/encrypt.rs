// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Authenticated encryption of NVRAM files.
//!
//! A machine with encryption configured has a key id and a key store. The key
//! id names a password in the [`SecretKeyStore`](crate::SecretKeyStore); the
//! key store is a base64 blob holding a random AES-256 data key, wrapped with
//! a key derived from that password:
//!
//! ```text
//! "VBNVKS01" | iterations: u32 | salt: [u8; 32] | iv: [u8; 12] | tag: [u8; 16] | wrapped key: [u8; 32]
//! ```
//!
//! The NVRAM file itself is encrypted with the data key:
//!
//! ```text
//! "VBNVENC1" | iv: [u8; 12] | tag: [u8; 16] | ciphertext
//! ```
//!
//! All ciphers are AES-256-GCM; the password is stretched with
//! PBKDF2-HMAC-SHA256.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::symm::decrypt_aead;
use openssl::symm::encrypt_aead;
use openssl::symm::Cipher;
use thiserror::Error;
use zeroize::Zeroizing;

const KEY_STORE_MAGIC: &[u8; 8] = b"VBNVKS01";
const STREAM_MAGIC: &[u8; 8] = b"VBNVENC1";

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// PBKDF2 iterations for new key stores.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("OpenSSL error {1}")]
    OpenSsl(#[source] ErrorStack, &'static str),
    #[error("key store is not valid base64")]
    KeyStoreEncoding(#[source] base64::DecodeError),
    #[error("key store has an unknown format")]
    KeyStoreFormat,
    #[error("wrong password for key store")]
    WrongPassword(#[source] ErrorStack),
    #[error("encrypted data has an unknown format")]
    StreamFormat,
    #[error("encrypted data failed authentication")]
    Authentication(#[source] ErrorStack),
}

fn random<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0; N];
    openssl::rand::rand_bytes(&mut buf).map_err(|e| CryptoError::OpenSsl(e, "rand_bytes"))?;
    Ok(buf)
}

fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let mut key = Zeroizing::new([0; KEY_LEN]);
    openssl::pkcs5::pbkdf2_hmac(
        password,
        salt,
        iterations as usize,
        MessageDigest::sha256(),
        &mut key[..],
    )
    .map_err(|e| CryptoError::OpenSsl(e, "pbkdf2_hmac"))?;
    Ok(key)
}

/// Creates a key store protected by `password`, holding a new random data
/// key.
pub fn create_key_store(password: &[u8]) -> Result<String, CryptoError> {
    let data_key = Zeroizing::new(random::<KEY_LEN>()?);
    let salt = random::<SALT_LEN>()?;
    let iv = random::<IV_LEN>()?;
    let kek = derive_key(password, &salt, PBKDF2_ITERATIONS)?;

    let mut tag = [0; TAG_LEN];
    let wrapped = encrypt_aead(
        Cipher::aes_256_gcm(),
        &kek[..],
        Some(&iv[..]),
        KEY_STORE_MAGIC,
        &data_key[..],
        &mut tag,
    )
    .map_err(|e| CryptoError::OpenSsl(e, "wrap_data_key"))?;

    let mut blob = Vec::new();
    blob.extend_from_slice(KEY_STORE_MAGIC);
    blob.extend_from_slice(&PBKDF2_ITERATIONS.to_le_bytes());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&wrapped);
    Ok(BASE64.encode(blob))
}

/// Recovers the data key from `key_store` using `password`.
pub fn unwrap_data_key(
    key_store: &str,
    password: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let blob = BASE64
        .decode(key_store.trim())
        .map_err(CryptoError::KeyStoreEncoding)?;

    let rest = blob
        .strip_prefix(KEY_STORE_MAGIC)
        .ok_or(CryptoError::KeyStoreFormat)?;
    if rest.len() != 4 + SALT_LEN + IV_LEN + TAG_LEN + KEY_LEN {
        return Err(CryptoError::KeyStoreFormat);
    }
    let (iterations, rest) = rest.split_at(4);
    let (salt, rest) = rest.split_at(SALT_LEN);
    let (iv, rest) = rest.split_at(IV_LEN);
    let (tag, wrapped) = rest.split_at(TAG_LEN);

    let iterations = u32::from_le_bytes(
        iterations
            .try_into()
            .map_err(|_| CryptoError::KeyStoreFormat)?,
    );
    if iterations == 0 {
        return Err(CryptoError::KeyStoreFormat);
    }
    let kek = derive_key(password, salt, iterations)?;
    let data_key = decrypt_aead(
        Cipher::aes_256_gcm(),
        &kek[..],
        Some(iv),
        KEY_STORE_MAGIC,
        wrapped,
        tag,
    )
    .map_err(CryptoError::WrongPassword)?;
    Ok(Zeroizing::new(data_key))
}

/// Encrypts `data` with `key`, returning the framed ciphertext.
pub fn encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = random::<IV_LEN>()?;
    let mut tag = [0; TAG_LEN];
    let ciphertext = encrypt_aead(Cipher::aes_256_gcm(), key, Some(&iv[..]), &[], data, &mut tag)
        .map_err(|e| CryptoError::OpenSsl(e, "encrypt_nvram"))?;

    let mut out = Vec::with_capacity(STREAM_MAGIC.len() + IV_LEN + TAG_LEN + ciphertext.len());
    out.extend_from_slice(STREAM_MAGIC);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts framed ciphertext produced by [`encrypt`].
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let rest = data
        .strip_prefix(STREAM_MAGIC)
        .ok_or(CryptoError::StreamFormat)?;
    if rest.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::StreamFormat);
    }
    let (iv, rest) = rest.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);
    decrypt_aead(Cipher::aes_256_gcm(), key, Some(iv), &[], ciphertext, tag)
        .map_err(CryptoError::Authentication)
}

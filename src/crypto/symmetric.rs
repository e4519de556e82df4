//! AES primitives: raw CTR mode and scrypt key derivation.
//!
//! The CTR functions carry no authentication tag and must not be used to
//! protect data crossing an untrusted channel.

use crate::error::{CryptoError, Result};
use aes::{Aes128, Aes192, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// scrypt block size factor.
const SCRYPT_R: u32 = 8;
/// scrypt parallelization factor.
const SCRYPT_P: u32 = 1;
/// Smallest accepted scrypt cost.
const SCRYPT_MIN_N: u64 = 1 << 10;
/// Length of keys produced by [`derive_key`].
const DERIVED_KEY_LEN: usize = 32;

/// Symmetric algorithms the engine encrypts with, by OpenPGP id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymmetricAlgorithm {
    Aes128,
    Aes192,
    Aes256,
}

impl SymmetricAlgorithm {
    pub fn id(self) -> u8 {
        match self {
            SymmetricAlgorithm::Aes128 => 7,
            SymmetricAlgorithm::Aes192 => 8,
            SymmetricAlgorithm::Aes256 => 9,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            7 => Some(SymmetricAlgorithm::Aes128),
            8 => Some(SymmetricAlgorithm::Aes192),
            9 => Some(SymmetricAlgorithm::Aes256),
            _ => None,
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            SymmetricAlgorithm::Aes128 => 16,
            SymmetricAlgorithm::Aes192 => 24,
            SymmetricAlgorithm::Aes256 => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SymmetricAlgorithm::Aes128 => "aes128",
            SymmetricAlgorithm::Aes192 => "aes192",
            SymmetricAlgorithm::Aes256 => "aes256",
        }
    }

    /// The engine's name for a cipher read off the wire.
    pub(crate) fn from_pgp(alg: SymmetricKeyAlgorithm) -> Option<Self> {
        match alg {
            SymmetricKeyAlgorithm::AES128 => Some(SymmetricAlgorithm::Aes128),
            SymmetricKeyAlgorithm::AES192 => Some(SymmetricAlgorithm::Aes192),
            SymmetricKeyAlgorithm::AES256 => Some(SymmetricAlgorithm::Aes256),
            _ => None,
        }
    }

    fn from_key_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(SymmetricAlgorithm::Aes128),
            24 => Some(SymmetricAlgorithm::Aes192),
            32 => Some(SymmetricAlgorithm::Aes256),
            _ => None,
        }
    }
}

impl From<SymmetricAlgorithm> for SymmetricKeyAlgorithm {
    fn from(alg: SymmetricAlgorithm) -> Self {
        match alg {
            SymmetricAlgorithm::Aes128 => SymmetricKeyAlgorithm::AES128,
            SymmetricAlgorithm::Aes192 => SymmetricKeyAlgorithm::AES192,
            SymmetricAlgorithm::Aes256 => SymmetricKeyAlgorithm::AES256,
        }
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SymmetricAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aes128" => Ok(SymmetricAlgorithm::Aes128),
            "aes192" => Ok(SymmetricAlgorithm::Aes192),
            "aes256" => Ok(SymmetricAlgorithm::Aes256),
            other => Err(CryptoError::InvalidParameter(format!(
                "unknown cipher '{}'",
                other
            ))),
        }
    }
}

/// AES-CTR encryption without integrity protection.
///
/// `key` must be 16, 24 or 32 bytes and `iv` 16 bytes.
pub fn encrypt_without_integrity(key: &[u8], input: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    apply_ctr(key, input, iv)
}

/// Inverse of [`encrypt_without_integrity`].
pub fn decrypt_without_integrity(key: &[u8], input: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    apply_ctr(key, input, iv)
}

fn apply_ctr(key: &[u8], input: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidParameter(format!(
            "iv must be {} bytes, got {}",
            BLOCK_SIZE,
            iv.len()
        )));
    }
    let algorithm = SymmetricAlgorithm::from_key_len(key.len()).ok_or_else(|| {
        CryptoError::InvalidParameter(format!("invalid AES key length {}", key.len()))
    })?;

    let mut buf = input.to_vec();
    let bad_len = |e: cipher::InvalidLength| CryptoError::InvalidParameter(e.to_string());
    match algorithm {
        SymmetricAlgorithm::Aes128 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_len)?
            .apply_keystream(&mut buf),
        SymmetricAlgorithm::Aes192 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_len)?
            .apply_keystream(&mut buf),
        SymmetricAlgorithm::Aes256 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_len)?
            .apply_keystream(&mut buf),
    }
    Ok(buf)
}

/// scrypt key derivation with r = 8, p = 1 and a 32-byte output.
///
/// `n` must be a power of two no smaller than 1024.
pub fn derive_key(password: &str, salt: &[u8], n: u64) -> Result<Vec<u8>> {
    if !n.is_power_of_two() {
        return Err(CryptoError::InvalidParameter(format!(
            "scrypt cost {} is not a power of two",
            n
        )));
    }
    if n < SCRYPT_MIN_N {
        return Err(CryptoError::InvalidParameter(format!(
            "scrypt cost {} is below the minimum of {}",
            n, SCRYPT_MIN_N
        )));
    }

    let log_n = n.trailing_zeros() as u8;
    let params = scrypt::Params::new(log_n, SCRYPT_R, SCRYPT_P, DERIVED_KEY_LEN)
        .map_err(|e| CryptoError::InvalidParameter(format!("scrypt parameters: {}", e)))?;

    let mut out = vec![0u8; DERIVED_KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut out)
        .map_err(|e| CryptoError::InvalidParameter(format!("scrypt output: {}", e)))?;
    Ok(out)
}

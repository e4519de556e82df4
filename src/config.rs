//! Engine configuration: algorithm preferences and output options.

use crate::crypto::pgp::HashAlgorithm;
use crate::crypto::symmetric::SymmetricAlgorithm;
use pgp::armor::Headers;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Algorithm and formatting choices applied to newly written keys and messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Cipher for session keys and secret key protection.
    pub cipher: SymmetricAlgorithm,
    /// Hash for signatures and S2K.
    pub hash: HashAlgorithm,
    /// Coded S2K iteration count octet.
    pub s2k_count: u8,
    /// RSA size used when `generate_key` is asked for 0 bits.
    pub rsa_bits: usize,
    /// `Comment` header on armored output.
    pub armor_comment: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cipher: SymmetricAlgorithm::Aes256,
            hash: HashAlgorithm::Sha256,
            s2k_count: 0x60,
            rsa_bits: 2048,
            armor_comment: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PMCRYPTO_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(cipher) = env_value::<SymmetricAlgorithm>("PMCRYPTO_CIPHER") {
            config.cipher = cipher;
        }
        if let Some(hash) = env_value::<HashAlgorithm>("PMCRYPTO_HASH") {
            config.hash = hash;
        }
        if let Some(count) = env_value::<u8>("PMCRYPTO_S2K_COUNT") {
            config.s2k_count = count;
        }
        if let Some(bits) = env_value::<usize>("PMCRYPTO_RSA_BITS") {
            config.rsa_bits = bits;
        }
        if let Ok(comment) = env::var("PMCRYPTO_ARMOR_COMMENT") {
            if !comment.trim().is_empty() {
                config.armor_comment = Some(comment.trim().to_string());
            }
        }
        config
    }

    /// Armor headers for output written with this configuration.
    pub(crate) fn armor_headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(comment) = &self.armor_comment {
            headers.insert("Comment".to_string(), vec![comment.clone()]);
        }
        headers
    }
}

fn env_value<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cipher, SymmetricAlgorithm::Aes256);
        assert_eq!(config.hash, HashAlgorithm::Sha256);
        assert_eq!(config.s2k_count, 0x60);
        assert!(config.armor_headers().is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"cipher":"aes128","armorComment":"hi"}"#).unwrap();
        assert_eq!(config.cipher, SymmetricAlgorithm::Aes128);
        assert_eq!(config.rsa_bits, 2048);
        let headers = config.armor_headers();
        assert_eq!(headers.get("Comment"), Some(&vec!["hi".to_string()]));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_from_env() {
        env::set_var("PMCRYPTO_CIPHER", "aes192");
        env::set_var("PMCRYPTO_S2K_COUNT", "not a number");
        let config = EngineConfig::from_env();
        env::remove_var("PMCRYPTO_CIPHER");
        env::remove_var("PMCRYPTO_S2K_COUNT");
        assert_eq!(config.cipher, SymmetricAlgorithm::Aes192);
        assert_eq!(config.s2k_count, 0x60);
    }
}

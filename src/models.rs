//! Values returned by engine operations.

use crate::crypto::symmetric::SymmetricAlgorithm;
use crate::error::{CryptoError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Serde helper storing byte fields as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// A symmetric session key and the cipher it belongs to.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct SessionSplit {
    #[zeroize(skip)]
    pub algorithm: SymmetricAlgorithm,
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
}

impl SessionSplit {
    /// Wrap existing key bytes; the length must suit `algorithm`.
    pub fn new(algorithm: SymmetricAlgorithm, key: Vec<u8>) -> Result<Self> {
        if key.len() != algorithm.key_size() {
            return Err(CryptoError::InvalidParameter(format!(
                "{} session key must be {} bytes, got {}",
                algorithm,
                algorithm.key_size(),
                key.len()
            )));
        }
        Ok(Self { algorithm, key })
    }

    /// A fresh random session key.
    pub fn generate(algorithm: SymmetricAlgorithm) -> Self {
        let mut key = vec![0u8; algorithm.key_size()];
        rand::thread_rng().fill_bytes(&mut key);
        Self { algorithm, key }
    }

    /// Algorithm name as used on the wire by clients (`aes256`, ...).
    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }
}

impl PartialEq for SessionSplit {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && bool::from(self.key.ct_eq(&other.key))
    }
}

impl Eq for SessionSplit {}

impl fmt::Debug for SessionSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSplit")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Key packet and data packet of an encrypted payload, transmittable apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSplit {
    #[serde(with = "base64_bytes")]
    pub key_packet: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub data_packet: Vec<u8>,
}

impl EncryptedSplit {
    /// Both halves concatenated, forming a complete binary message.
    pub fn to_message(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key_packet.len() + self.data_packet.len());
        out.extend_from_slice(&self.key_packet);
        out.extend_from_slice(&self.data_packet);
        out
    }
}

/// Outcome of checking a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationStatus {
    Ok,
    NotSigned,
    NoVerifier,
    Failed,
    KeyExpired,
}

impl VerificationStatus {
    /// Integer code delivered to MIME sinks and bindings.
    pub fn code(self) -> i32 {
        match self {
            VerificationStatus::Ok => 0,
            VerificationStatus::NotSigned => 1,
            VerificationStatus::NoVerifier => 2,
            VerificationStatus::Failed => 3,
            VerificationStatus::KeyExpired => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(VerificationStatus::Ok),
            1 => Some(VerificationStatus::NotSigned),
            2 => Some(VerificationStatus::NoVerifier),
            3 => Some(VerificationStatus::Failed),
            4 => Some(VerificationStatus::KeyExpired),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VerificationStatus::Ok => "signature verified",
            VerificationStatus::NotSigned => "message is not signed",
            VerificationStatus::NoVerifier => "no key to verify the signature",
            VerificationStatus::Failed => "signature verification failed",
            VerificationStatus::KeyExpired => "signing key is expired",
        };
        f.write_str(text)
    }
}

/// Plaintext of a decrypted message with its signature check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptSignedVerify {
    pub plaintext: String,
    pub status: VerificationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_split_validates_length() {
        assert!(SessionSplit::new(SymmetricAlgorithm::Aes128, vec![0; 16]).is_ok());
        assert!(matches!(
            SessionSplit::new(SymmetricAlgorithm::Aes256, vec![0; 16]),
            Err(CryptoError::InvalidParameter(_))
        ));
        assert_eq!(SessionSplit::generate(SymmetricAlgorithm::Aes256).key.len(), 32);
    }

    #[test]
    fn test_session_split_json_uses_base64() {
        let split = SessionSplit::new(SymmetricAlgorithm::Aes128, vec![0xff; 16]).unwrap();
        let json = serde_json::to_string(&split).unwrap();
        assert_eq!(json, r#"{"algorithm":"aes128","key":"/////////////////////w=="}"#);
        let back: SessionSplit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, split);
        assert!(!format!("{:?}", split).contains("255"));
    }

    #[test]
    fn test_status_codes() {
        for status in [
            VerificationStatus::Ok,
            VerificationStatus::NotSigned,
            VerificationStatus::NoVerifier,
            VerificationStatus::Failed,
            VerificationStatus::KeyExpired,
        ] {
            assert_eq!(VerificationStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(VerificationStatus::KeyExpired.code(), 4);
        assert_eq!(VerificationStatus::from_code(9), None);
    }

    #[test]
    fn test_decrypt_signed_verify_json() {
        let value = DecryptSignedVerify {
            plaintext: "hi".into(),
            status: VerificationStatus::NoVerifier,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"plaintext":"hi","status":"noVerifier"}"#);
    }
}

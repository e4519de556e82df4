//! Error types for the crypto engine.

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Signature mismatches are not errors. They are reported through
/// [`crate::models::VerificationStatus`] or a `false` verify result.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Malformed key bytes or armor.
    #[error("Failed to parse key: {0}")]
    KeyParse(String),

    /// A private key could not be unlocked with the supplied passphrase.
    #[error("Wrong passphrase")]
    WrongPassphrase,

    /// A symmetric key packet could not be opened with the supplied password.
    #[error("Wrong password")]
    WrongPassword,

    /// No key in the ring can open the key packet.
    #[error("No matching key: {0}")]
    NoMatchingKey(String),

    /// Ciphertext integrity or format failure.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Bad cipher key or iv length, bad cost factor, bad key parameters.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A streaming object was used out of order.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed MIME structure.
    #[error("Failed to parse MIME message: {0}")]
    MimeParse(String),

    /// Malformed signature bytes or armor.
    #[error("Failed to parse signature: {0}")]
    SignatureParse(String),

    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption or signing failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// `pgp` failure while parsing or building key material.
pub(crate) fn key_error(e: pgp::errors::Error) -> CryptoError {
    CryptoError::KeyParse(e.to_string())
}

/// `pgp` failure while reading or opening a message.
pub(crate) fn message_error(e: pgp::errors::Error) -> CryptoError {
    match e {
        pgp::errors::Error::MdcError => CryptoError::DecryptionFailed("modification detected".into()),
        other => CryptoError::DecryptionFailed(other.to_string()),
    }
}

/// `pgp` failure while reading a signature.
pub(crate) fn signature_error(e: pgp::errors::Error) -> CryptoError {
    CryptoError::SignatureParse(e.to_string())
}

/// `pgp` failure while encrypting or signing.
pub(crate) fn encryption_error(e: pgp::errors::Error) -> CryptoError {
    CryptoError::Encryption(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgp_errors_map_to_caller_classes() {
        let err = key_error(pgp::errors::Error::InvalidInput);
        assert!(matches!(err, CryptoError::KeyParse(_)));

        let err = message_error(pgp::errors::Error::MdcError);
        assert_eq!(err.to_string(), "Decryption failed: modification detected");

        let err = signature_error(pgp::errors::Error::Unsupported("hash 1".into()));
        assert!(matches!(err, CryptoError::SignatureParse(_)));

        let err = encryption_error(pgp::errors::Error::Message("no key".into()));
        assert!(matches!(err, CryptoError::Encryption(_)));
    }
}

//! pmcrypto - OpenPGP engine for secure mail clients
//!
//! This crate provides key management, message and attachment encryption,
//! detached signatures, session key handling and PGP/MIME decryption
//! through the [`PmCrypto`] facade.

pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod time_cache;

// Re-export commonly used items for convenience
pub use config::EngineConfig;
pub use crypto::{decrypt_without_integrity, derive_key, encrypt_without_integrity, PmCrypto};
pub use error::{CryptoError, Result};
pub use models::{DecryptSignedVerify, EncryptedSplit, SessionSplit, VerificationStatus};
pub use time_cache::TimeCache;

//! Cryptographic operations for pmcrypto
//!
//! This module provides:
//! - The `PmCrypto` engine facade
//! - OpenPGP keys, messages and signatures
//! - Streaming attachment encryption and PGP/MIME decryption
//! - Unauthenticated AES-CTR and scrypt primitives

pub mod attachment;
pub mod engine;
pub mod mime;
pub mod pgp;
pub mod signature_collector;
pub mod symmetric;
pub mod utils;

// Re-export main types
pub use attachment::{AttachmentProcessor, ProcessorState};
pub use engine::PmCrypto;
pub use mime::{MimeCallbacks, MimeEvent, MimeEventCollector, MimeStreamDecryptor};
pub use pgp::{Key, KeyRing, Passphrase, PgpKeyManager, PgpSigner};
pub use signature_collector::SignatureCollector;
pub use symmetric::{decrypt_without_integrity, derive_key, encrypt_without_integrity, SymmetricAlgorithm};

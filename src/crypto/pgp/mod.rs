//! OpenPGP operations
//!
//! This module handles:
//! - Packet framing and armor on top of `pgp`
//! - Key generation and passphrase management
//! - Session key packets and encrypted messages
//! - Detached and embedded signatures

pub(crate) mod armor;
pub(crate) mod framing;
pub mod hash;
pub mod keypair;
pub mod keyring;
pub(crate) mod message;
pub(crate) mod session;
pub mod signing;

pub use hash::HashAlgorithm;
pub use keypair::{KeyType, Passphrase, PgpKeyManager};
pub use keyring::{check_key, Key, KeyRing, KeyState};
pub use signing::{PgpSigner, SignatureMode, VerifiedSignature};

//! Shared fixtures for integration tests

#![allow(dead_code)]

use once_cell::sync::Lazy;
use pmcrypto::{EngineConfig, PmCrypto, TimeCache};
use std::sync::Arc;

/// Fixed reference time used by the test engines.
pub const NOW: i64 = 1_700_000_000;

/// Primes for a deterministic 2048-bit RSA key (primary, then subkey).
pub const RSA_PRIMES: [&str; 4] = [
    "f9e9c418e1da190942697c61c07cd10418eb2145aff08b72062d0a7c8d10b67cbe883d89c2e8b8957e28c000fda608ac662627db8b98daa14c322f7e48495ba5342bf25b0a6b6b79c5f8524628e929314df77f08abd2805cddc34f6b27d00b49b86f0ecee8d177d76055aef866756c1094f2910b33ff8e59d7aa218ddebab873",
    "d1de246e61546a57adbb47b4cef50902e1f76d2475c483c35e2af89d444ced819d8ac1a1d1fb92a5cebe9034af35e5861306a87104b897590ab27170bc269c31d8408626683a495ba0659823dfd182b89a73972db2128299ca52a096a24945e5aaefc993182631b490087b6fc9ee12bde5f295ce849e9cdec754723e7459ca25",
    "daf753583b6f7f4bcadd2fbb56d064153c226c45dc334140d5d57ed6cbaa93e9fa5e6031050080295ae4cf255262906230588b5d959e14d1c130f6ab06acb67fcb16e4bd818c97d0836cd1b0c866cd97cf99c49d3fc8e2dcb1b7fe8336ba1170b9461c0d6641475f45baa83ccaa75fcb4ce92661ce6a755f5356b3ec7b9d22e1",
    "ed3cf627799bf7fa532db200200e08d82a248192d11ccd1ad9d81b74493b8d453dcfef48ba0609928b4f863ac1bd1db2829ce592d05db8b253457009a94084373d3a35f22e01a570580eb4e7b80217dbe79fc5c48fdc6d645a6652fb182e735be3d549cc5b3e9944d10fd9a1657a0477c6b9b0112168728413afd3e3594ed705",
];

/// A generated key pair with its passphrase.
pub struct TestUser {
    pub private_key: String,
    pub public_key: String,
    pub passphrase: &'static str,
}

impl TestUser {
    fn generate(name: &str, passphrase: &'static str) -> Self {
        let private_key = engine()
            .generate_key(name, "example.com", passphrase, "x25519", 0)
            .expect("key generation");
        Self::from_private(private_key, passphrase)
    }

    fn from_private(private_key: String, passphrase: &'static str) -> Self {
        let public_key = pmcrypto::crypto::Key::parse(private_key.as_bytes())
            .expect("generated key parses")
            .armor_public();
        Self {
            private_key,
            public_key,
            passphrase,
        }
    }

    /// Binary form of the public key.
    pub fn public_bin(&self) -> Vec<u8> {
        pmcrypto::crypto::Key::parse(self.public_key.as_bytes())
            .expect("public key parses")
            .to_public_bytes()
    }

    /// Binary form of the (locked) private key.
    pub fn private_bin(&self) -> Vec<u8> {
        pmcrypto::crypto::Key::parse(self.private_key.as_bytes())
            .expect("private key parses")
            .to_secret_bytes()
            .expect("secret bytes")
    }
}

pub static ALICE: Lazy<TestUser> = Lazy::new(|| TestUser::generate("alice", "pw1"));
pub static BOB: Lazy<TestUser> = Lazy::new(|| TestUser::generate("bob", "bob-secret"));

pub static RSA_USER: Lazy<TestUser> = Lazy::new(|| {
    let primes: Vec<Vec<u8>> = RSA_PRIMES.iter().map(|p| hex::decode(p).expect("hex prime")).collect();
    let private_key = engine()
        .generate_rsa_key_with_primes(
            "carol", "example.com", "rsa-pass", 2048, &primes[0], &primes[1], &primes[2], &primes[3],
        )
        .expect("RSA key from primes");
    TestUser::from_private(private_key, "rsa-pass")
});

/// Engine with cheap S2K settings and its own clock at [`NOW`].
pub fn engine() -> PmCrypto {
    engine_at(NOW)
}

pub fn engine_at(time: i64) -> PmCrypto {
    let config = EngineConfig {
        s2k_count: 0x10,
        ..EngineConfig::default()
    };
    PmCrypto::with_config(config, Arc::new(TimeCache::starting_at(time)))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

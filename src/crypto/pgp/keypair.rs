//! PGP key generation and passphrase management

use crate::config::EngineConfig;
use crate::crypto::pgp::keyring::{secret_body, Key};
use crate::crypto::symmetric::SymmetricAlgorithm;
use crate::crypto::pgp::hash::HashAlgorithm;
use crate::error::{CryptoError, Result};
use crate::time_cache::TimeCache;
use chrono::{DateTime, Duration, Utc};
use pgp::composed::signed_key::{SignedKeyDetails, SignedSecretKey, SignedSecretSubKey};
use pgp::composed::KeyType as PgpKeyType;
use pgp::crypto::ecc_curve::ECCCurve;
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::{
    self, KeyFlags, SignatureConfig, SignatureType, SignatureVersion, Subpacket, SubpacketData, UserId,
};
use pgp::types::{
    KeyTrait, KeyVersion, PlainSecretParams, PublicParams, S2kParams, SecretParams, SignedUser, Tag, Version,
};
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use smallvec::smallvec;
use std::fmt;
use std::sync::Arc;
use zeroize::ZeroizeOnDrop;

/// Smallest RSA modulus accepted by [`PgpKeyManager::generate_key`].
pub const MIN_RSA_BITS: usize = 2048;

const RSA_EXPONENT: u32 = 65537;

/// Passphrase for PGP secret keys.
///
/// Implements ZeroizeOnDrop to securely clear the passphrase from memory when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Passphrase {
    passphrase: String,
}

impl Passphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    /// Generate a strong random passphrase (32 alphanumeric characters).
    pub fn generate_strong() -> Self {
        use rand::distributions::{Alphanumeric, DistString};
        Self::new(Alphanumeric.sample_string(&mut rand::thread_rng(), 32))
    }

    pub fn as_str(&self) -> &str {
        &self.passphrase
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.passphrase.as_bytes()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Supported `key_type` values of [`PgpKeyManager::generate_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    X25519,
}

impl std::str::FromStr for KeyType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyType::Rsa),
            "x25519" => Ok(KeyType::X25519),
            other => Err(CryptoError::InvalidParameter(format!("unsupported key type '{}'", other))),
        }
    }
}

/// Unsigned key packet with its plain secret half.
struct Material {
    algorithm: PublicKeyAlgorithm,
    public: PublicParams,
    secret: PlainSecretParams,
}

impl Material {
    fn generate(key_type: PgpKeyType) -> Result<Self> {
        let (public, secret) = key_type
            .generate(None, S2kParams::Unprotected)
            .map_err(|e| CryptoError::KeyGeneration(format!("Failed to generate {:?} key: {}", key_type, e)))?;
        let SecretParams::Plain(secret) = secret else {
            return Err(CryptoError::KeyGeneration("generated secret key is encrypted".into()));
        };
        Ok(Self {
            algorithm: key_type.to_alg(),
            public,
            secret,
        })
    }

    /// RSA material with `p < q` and `u = p^-1 mod q`.
    fn from_rsa(key: &RsaPrivateKey) -> Result<Self> {
        let (p, q) = match key.primes() {
            [a, b] if a < b => (a, b),
            [a, b] => (b, a),
            _ => return Err(CryptoError::KeyGeneration("RSA key must have two primes".into())),
        };
        // crt_coefficient is (1/primes[1]) mod primes[0]
        let ordered = RsaPrivateKey::from_p_q(q.clone(), p.clone(), key.e().clone())
            .map_err(|e| CryptoError::KeyGeneration(format!("Failed to rebuild RSA key: {}", e)))?;
        let u = ordered
            .crt_coefficient()
            .ok_or_else(|| CryptoError::KeyGeneration("RSA primes have no CRT coefficient".into()))?;
        Ok(Self {
            algorithm: PublicKeyAlgorithm::RSA,
            public: PublicParams::RSA {
                n: key.n().into(),
                e: key.e().into(),
            },
            secret: PlainSecretParams::RSA {
                d: key.d().into(),
                p: p.into(),
                q: q.into(),
                u: u.into(),
            },
        })
    }
}

/// PGP key generation and passphrase changes.
pub struct PgpKeyManager {
    config: EngineConfig,
    clock: Option<Arc<TimeCache>>,
    lifetime: Option<u32>,
}

impl PgpKeyManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            lifetime: None,
        }
    }

    /// Stamp new keys with the cached time instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<TimeCache>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Let new keys expire `seconds` after creation; 0 means never.
    pub fn with_key_lifetime(mut self, seconds: u32) -> Self {
        self.lifetime = (seconds > 0).then_some(seconds);
        self
    }

    fn creation_time(&self) -> DateTime<Utc> {
        let now = match &self.clock {
            Some(clock) => clock.now_or_system(),
            None => Utc::now().timestamp(),
        };
        DateTime::from_timestamp(now.max(0), 0).unwrap_or_default()
    }

    /// Generate a locked key for `"<user_name> <<user_name>@<domain>>"`.
    ///
    /// - `"x25519"`: Ed25519 primary (certify, sign) with a Curve25519
    ///   encryption subkey; `bits` is ignored.
    /// - `"rsa"`: RSA primary (certify, sign) with an RSA encryption subkey;
    ///   `bits` of 0 uses the configured default.
    pub fn generate_key(
        &self,
        user_name: &str,
        domain: &str,
        passphrase: &Passphrase,
        key_type: &str,
        bits: usize,
    ) -> Result<Key> {
        let key_type: KeyType = key_type.parse()?;
        let user_id = format_user_id(user_name, domain);

        let (primary, subkey) = match key_type {
            KeyType::X25519 => {
                log::info!("Generating Ed25519/Curve25519 PGP key for user: {}", user_id);
                (
                    Material::generate(PgpKeyType::EdDSA)?,
                    Material::generate(PgpKeyType::ECDH(ECCCurve::Curve25519))?,
                )
            }
            KeyType::Rsa => {
                let bits = if bits == 0 { self.config.rsa_bits } else { bits };
                if bits < MIN_RSA_BITS {
                    return Err(CryptoError::InvalidParameter(format!(
                        "RSA keys need at least {} bits, got {}",
                        MIN_RSA_BITS, bits
                    )));
                }
                log::info!("Generating RSA-{} PGP key for user: {}", bits, user_id);
                let rsa_bits = u32::try_from(bits)
                    .map_err(|_| CryptoError::InvalidParameter(format!("RSA size {} is too large", bits)))?;
                (
                    Material::generate(PgpKeyType::Rsa(rsa_bits))?,
                    Material::generate(PgpKeyType::Rsa(rsa_bits))?,
                )
            }
        };

        let key = self.assemble(&user_id, primary, subkey, passphrase)?;
        log::info!("Successfully generated PGP key {} for user: {}", key.key_id(), user_id);
        Ok(key)
    }

    /// Build an RSA key from caller-supplied primes: `p1`/`p2` form the
    /// primary key and `p3`/`p4` the encryption subkey.
    pub fn generate_rsa_key_with_primes(
        &self,
        user_name: &str,
        domain: &str,
        passphrase: &Passphrase,
        bits: usize,
        primes: [&[u8]; 4],
    ) -> Result<Key> {
        let user_id = format_user_id(user_name, domain);
        log::info!("Building RSA-{} PGP key from supplied primes for user: {}", bits, user_id);

        let from_primes = |p: &[u8], q: &[u8]| -> Result<Material> {
            let key = RsaPrivateKey::from_p_q(
                BigUint::from_bytes_be(p),
                BigUint::from_bytes_be(q),
                BigUint::from(RSA_EXPONENT),
            )
            .map_err(|e| CryptoError::InvalidParameter(format!("invalid RSA primes: {}", e)))?;
            if key.n().bits() != bits {
                return Err(CryptoError::InvalidParameter(format!(
                    "primes give a {}-bit modulus, expected {}",
                    key.n().bits(),
                    bits
                )));
            }
            Material::from_rsa(&key)
        };

        let primary = from_primes(primes[0], primes[1])?;
        let subkey = from_primes(primes[2], primes[3])?;
        let key = self.assemble(&user_id, primary, subkey, passphrase)?;
        log::info!("Successfully built PGP key {} for user: {}", key.key_id(), user_id);
        Ok(key)
    }

    /// Hashed subpackets every self-signature starts with.
    fn base_subpackets(&self, created: DateTime<Utc>, signer: &impl KeyTrait, flags: KeyFlags) -> Vec<Subpacket> {
        let mut subpackets = vec![
            Subpacket::regular(SubpacketData::SignatureCreationTime(created)),
            Subpacket::regular(SubpacketData::IssuerFingerprint(
                KeyVersion::V4,
                signer.fingerprint().into_iter().collect(),
            )),
            Subpacket::regular(SubpacketData::KeyFlags(flags.into())),
        ];
        if let Some(lifetime) = self.lifetime {
            subpackets.push(Subpacket::regular(SubpacketData::KeyExpirationTime(Duration::seconds(
                i64::from(lifetime),
            ))));
        }
        subpackets
    }

    /// Certify the user id, bind the subkey and lock everything under `passphrase`.
    fn assemble(&self, user_id: &str, primary: Material, subkey: Material, passphrase: &Passphrase) -> Result<Key> {
        let created = self.creation_time();
        let gen_err = |e: pgp::errors::Error| CryptoError::KeyGeneration(e.to_string());
        let hash = self.config.hash.into();

        let primary_public = packet::PublicKey::new(
            Version::New,
            KeyVersion::V4,
            primary.algorithm,
            created,
            None,
            primary.public,
        )
        .map_err(gen_err)?;
        let primary_secret = packet::SecretKey::from_slice(
            Version::New,
            &secret_body(&primary_public, &SecretParams::Plain(primary.secret)).map_err(gen_err)?,
        )
        .map_err(gen_err)?;
        let subkey_public =
            packet::PublicSubkey::new(Version::New, KeyVersion::V4, subkey.algorithm, created, None, subkey.public)
                .map_err(gen_err)?;
        let subkey_secret = packet::SecretSubkey::from_slice(
            Version::New,
            &secret_body(&subkey_public, &SecretParams::Plain(subkey.secret)).map_err(gen_err)?,
        )
        .map_err(gen_err)?;
        let issuer = vec![Subpacket::regular(SubpacketData::Issuer(primary_public.key_id()))];

        let mut flags = KeyFlags::default();
        flags.set_certify(true);
        flags.set_sign(true);
        let mut hashed = self.base_subpackets(created, &primary_public, flags);
        hashed.extend([
            Subpacket::regular(SubpacketData::PreferredSymmetricAlgorithms(smallvec![
                SymmetricAlgorithm::Aes256.into(),
                SymmetricAlgorithm::Aes192.into(),
                SymmetricAlgorithm::Aes128.into(),
            ])),
            Subpacket::regular(SubpacketData::PreferredHashAlgorithms(smallvec![
                HashAlgorithm::Sha256.into(),
                HashAlgorithm::Sha512.into(),
            ])),
            Subpacket::regular(SubpacketData::IsPrimary(true)),
            Subpacket::regular(SubpacketData::Features(smallvec![0x01])),
        ]);
        let id = UserId::from_str(Version::New, user_id);
        let certification = SignatureConfig::new_v4(
            SignatureVersion::V4,
            SignatureType::CertPositive,
            primary.algorithm,
            hash,
            hashed,
            issuer.clone(),
        )
        .sign_certification(&primary_secret, String::new, Tag::UserId, &id)
        .map_err(gen_err)?;

        let mut flags = KeyFlags::default();
        flags.set_encrypt_comms(true);
        flags.set_encrypt_storage(true);
        let binding = SignatureConfig::new_v4(
            SignatureVersion::V4,
            SignatureType::SubkeyBinding,
            primary.algorithm,
            hash,
            self.base_subpackets(created, &primary_public, flags),
            issuer,
        )
        .sign_key_binding(&primary_secret, String::new, &subkey_public)
        .map_err(gen_err)?;

        let signed = SignedSecretKey {
            primary_key: primary_secret,
            details: SignedKeyDetails {
                revocation_signatures: Vec::new(),
                direct_signatures: Vec::new(),
                users: vec![SignedUser {
                    id,
                    signatures: vec![certification],
                }],
                user_attributes: Vec::new(),
            },
            public_subkeys: Vec::new(),
            secret_subkeys: vec![SignedSecretSubKey {
                key: subkey_secret,
                signatures: vec![binding],
            }],
        };
        let mut key = Key::from_secret(signed);
        key.lock(passphrase, &self.config)?;
        Ok(key)
    }

    /// Re-encrypt every secret packet of `private_key` from `old` to `new`.
    pub fn update_passphrase(&self, private_key: &Key, old: &Passphrase, new: &Passphrase) -> Result<Key> {
        log::info!("Updating passphrase of key {}", private_key.key_id());
        let mut key = private_key.unlock(old)?;
        key.lock(new, &self.config)?;
        log::info!("Successfully updated passphrase of key {}", key.key_id());
        Ok(key)
    }
}

pub(crate) fn format_user_id(user_name: &str, domain: &str) -> String {
    format!("{} <{}@{}>", user_name, user_name, domain)
}

//! Keys and ordered key rings.
//!
//! A [`Key`] is a primary key with its user ids and subkeys, in one of three
//! states: public, locked private or unlocked private. Locked keys only move
//! to unlocked through [`Key::unlock`], which returns a new value and leaves
//! the original untouched.
//!
//! A [`KeyRing`] keeps keys in insertion order. Lookups by key id return the
//! first match, so when the same key appears twice the earlier copy wins.

use crate::config::EngineConfig;
use crate::crypto::pgp::armor;
use crate::crypto::pgp::framing::{self, write_packet};
use crate::crypto::pgp::keypair::Passphrase;
use crate::error::{key_error, CryptoError, Result};
use crate::models::SessionSplit;
use chrono::{DateTime, Utc};
use pgp::armor::BlockType;
use pgp::composed::message::{decrypt_session_key, PlainSessionKey};
use pgp::composed::signed_key::{from_bytes_many, PublicOrSecret, SignedKeyDetails, SignedPublicKey, SignedSecretKey};
use pgp::crypto::hash::HashAlgorithm as PgpHash;
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::errors::Error as PgpError;
use pgp::packet::{self, PacketTrait, PublicKeyEncryptedSessionKey, Signature, SignatureConfig, SignatureType};
use pgp::ser::Serialize;
use pgp::types::{
    KeyId, KeyTrait, KeyVersion, Mpi, PublicKeyTrait, PublicParams, S2kParams, SecretKeyTrait, SecretParams,
    StringToKey, Tag,
};
use rand::RngCore;
use std::fmt::Write as _;
use std::io::Read;

/// One key packet of a [`Key`], primary or subkey, with its optional secret half.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Material<'a> {
    Primary {
        public: &'a packet::PublicKey,
        secret: Option<&'a packet::SecretKey>,
    },
    Subkey {
        public: &'a packet::PublicSubkey,
        secret: Option<&'a packet::SecretSubkey>,
    },
}

impl Material<'_> {
    pub(crate) fn key_id(&self) -> KeyId {
        match self {
            Material::Primary { public, .. } => public.key_id(),
            Material::Subkey { public, .. } => public.key_id(),
        }
    }

    pub(crate) fn fingerprint(&self) -> Vec<u8> {
        match self {
            Material::Primary { public, .. } => public.fingerprint(),
            Material::Subkey { public, .. } => public.fingerprint(),
        }
    }

    pub(crate) fn key_id_hex(&self) -> String {
        hex::encode_upper(self.key_id())
    }

    pub(crate) fn created(&self) -> i64 {
        match self {
            Material::Primary { public, .. } => public.created_at().timestamp(),
            Material::Subkey { public, .. } => public.created_at().timestamp(),
        }
    }

    pub(crate) fn algorithm(&self) -> PublicKeyAlgorithm {
        match self {
            Material::Primary { public, .. } => public.algorithm(),
            Material::Subkey { public, .. } => public.algorithm(),
        }
    }

    pub(crate) fn has_secret(&self) -> bool {
        match self {
            Material::Primary { secret, .. } => secret.is_some(),
            Material::Subkey { secret, .. } => secret.is_some(),
        }
    }

    pub(crate) fn is_unlocked(&self) -> bool {
        match self {
            Material::Primary { secret, .. } => secret.is_some_and(|s| !s.secret_params().is_encrypted()),
            Material::Subkey { secret, .. } => secret.is_some_and(|s| !s.secret_params().is_encrypted()),
        }
    }

    pub(crate) fn can_encrypt(&self) -> bool {
        matches!(
            self.algorithm(),
            PublicKeyAlgorithm::RSA | PublicKeyAlgorithm::RSAEncrypt | PublicKeyAlgorithm::ECDH | PublicKeyAlgorithm::Elgamal
        )
    }

    pub(crate) fn can_sign(&self) -> bool {
        matches!(
            self.algorithm(),
            PublicKeyAlgorithm::RSA
                | PublicKeyAlgorithm::RSASign
                | PublicKeyAlgorithm::DSA
                | PublicKeyAlgorithm::ECDSA
                | PublicKeyAlgorithm::EdDSA
        )
    }

    /// Check `sig` over `data`; text signatures are line-ending normalized by `pgp`.
    pub(crate) fn verify(&self, sig: &Signature, data: impl Read) -> pgp::errors::Result<()> {
        match self {
            Material::Primary { public, .. } => sig.verify(*public, data),
            Material::Subkey { public, .. } => sig.verify(*public, data),
        }
    }

    /// Check signature values against an already finished digest.
    pub(crate) fn verify_digest(&self, hash: PgpHash, digest: &[u8], values: &[Mpi]) -> pgp::errors::Result<()> {
        match self {
            Material::Primary { public, .. } => public.verify_signature(hash, digest, values),
            Material::Subkey { public, .. } => public.verify_signature(hash, digest, values),
        }
    }

    /// Wrap `session` into a PKESK addressed to this key.
    pub(crate) fn encrypt_session(&self, session: &SessionSplit) -> pgp::errors::Result<PublicKeyEncryptedSessionKey> {
        let mut rng = rand::thread_rng();
        let alg: pgp::crypto::sym::SymmetricKeyAlgorithm = session.algorithm.into();
        match self {
            Material::Primary { public, .. } => {
                PublicKeyEncryptedSessionKey::from_session_key(&mut rng, &session.key, alg, *public)
            }
            Material::Subkey { public, .. } => {
                PublicKeyEncryptedSessionKey::from_session_key(&mut rng, &session.key, alg, *public)
            }
        }
    }

    /// Unwrap a PKESK body with the (already unlocked) secret half.
    pub(crate) fn decrypt_session(&self, values: &[Mpi]) -> pgp::errors::Result<PlainSessionKey> {
        match self {
            Material::Primary { secret: Some(secret), .. } => decrypt_session_key(*secret, String::new, values),
            Material::Subkey { secret: Some(secret), .. } => decrypt_session_key(*secret, String::new, values),
            _ => Err(PgpError::Message(format!("key {} has no secret material", self.key_id_hex()))),
        }
    }

    /// Sign `data` with the (already unlocked) secret half.
    pub(crate) fn sign(&self, config: SignatureConfig, data: impl Read) -> pgp::errors::Result<Signature> {
        match self {
            Material::Primary { secret: Some(secret), .. } => config.sign(*secret, String::new, data),
            Material::Subkey { secret: Some(secret), .. } => config.sign(*secret, String::new, data),
            _ => Err(PgpError::Message(format!("key {} has no secret material", self.key_id_hex()))),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Subkey {
    pub public: packet::PublicSubkey,
    pub secret: Option<packet::SecretSubkey>,
    pub signatures: Vec<Signature>,
    pub valid: bool,
    pub revoked: bool,
}

impl Subkey {
    fn material(&self) -> Material<'_> {
        Material::Subkey {
            public: &self.public,
            secret: self.secret.as_ref(),
        }
    }

    fn binding(&self) -> Option<&Signature> {
        self.signatures
            .iter()
            .filter(|s| s.typ() == SignatureType::SubkeyBinding)
            .max_by_key(|s| s.created().map(|t| t.timestamp()).unwrap_or(0))
    }

    fn expiration_time(&self) -> Option<i64> {
        expiry_after(self.public.created_at(), self.binding()?)
    }
}

/// Lifecycle state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Public,
    Locked,
    Unlocked,
}

/// An OpenPGP transferable key.
#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) primary: packet::PublicKey,
    pub(crate) primary_secret: Option<packet::SecretKey>,
    pub(crate) details: SignedKeyDetails,
    pub(crate) subkeys: Vec<Subkey>,
    valid_users: Vec<bool>,
    revoked: bool,
    issues: Vec<String>,
}

impl Key {
    fn from_public(key: SignedPublicKey) -> Self {
        let subkeys = key
            .public_subkeys
            .into_iter()
            .map(|s| Subkey {
                public: s.key,
                secret: None,
                signatures: s.signatures,
                valid: false,
                revoked: false,
            })
            .collect();
        Self::validated(key.primary_key, None, key.details, subkeys)
    }

    pub(crate) fn from_secret(key: SignedSecretKey) -> Self {
        let mut subkeys: Vec<Subkey> = key
            .public_subkeys
            .into_iter()
            .map(|s| Subkey {
                public: s.key,
                secret: None,
                signatures: s.signatures,
                valid: false,
                revoked: false,
            })
            .collect();
        subkeys.extend(key.secret_subkeys.into_iter().map(|s| Subkey {
            public: s.key.public_key(),
            secret: Some(s.key),
            signatures: s.signatures,
            valid: false,
            revoked: false,
        }));
        let primary = key.primary_key.public_key();
        Self::validated(primary, Some(key.primary_key), key.details, subkeys)
    }

    fn validated(
        primary: packet::PublicKey,
        primary_secret: Option<packet::SecretKey>,
        details: SignedKeyDetails,
        subkeys: Vec<Subkey>,
    ) -> Self {
        let mut key = Self {
            primary,
            primary_secret,
            details,
            subkeys,
            valid_users: Vec::new(),
            revoked: false,
            issues: Vec::new(),
        };
        key.validate();
        key
    }

    /// Parse exactly one key from armored or binary input.
    pub fn parse(data: &[u8]) -> Result<Key> {
        let mut keys = KeyRing::parse(data)?.keys;
        match keys.len() {
            1 => Ok(keys.remove(0)),
            n => Err(CryptoError::KeyParse(format!("expected one key, found {}", n))),
        }
    }

    /// Lowercase hex fingerprint of the primary key.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.primary.fingerprint())
    }

    /// Uppercase hex key id of the primary key.
    pub fn key_id(&self) -> String {
        hex::encode_upper(self.primary.key_id())
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.details
            .users
            .iter()
            .map(|u| String::from_utf8_lossy(u.id.id()).into_owned())
            .collect()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(*self.primary.created_at())
    }

    pub fn is_private(&self) -> bool {
        self.primary_secret.is_some()
    }

    pub fn state(&self) -> KeyState {
        if self.primary_secret.is_none() {
            return KeyState::Public;
        }
        if self.materials().filter(Material::has_secret).all(|m| m.is_unlocked()) {
            KeyState::Unlocked
        } else {
            KeyState::Locked
        }
    }

    /// Problems found while validating self-signatures.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Self-signature that carries the primary key's validity settings.
    fn primary_self_signature(&self) -> Option<&Signature> {
        let certs = self
            .details
            .users
            .iter()
            .zip(&self.valid_users)
            .filter(|(_, valid)| **valid)
            .flat_map(|(u, _)| u.signatures.iter())
            .filter(|s| s.is_certification());
        let best = certs.max_by_key(|s| (s.is_primary(), s.created().map(|t| t.timestamp()).unwrap_or(0)));
        best.or_else(|| {
            self.details
                .direct_signatures
                .iter()
                .filter(|s| s.typ() == SignatureType::Key)
                .max_by_key(|s| s.created().map(|t| t.timestamp()).unwrap_or(0))
        })
    }

    /// Unix time after which the primary key is expired, `None` if never.
    pub fn expiration_time(&self) -> Option<i64> {
        expiry_after(self.primary.created_at(), self.primary_self_signature()?)
    }

    /// Whether the primary key is expired at unix time `at`.
    pub fn is_expired(&self, at: i64) -> bool {
        self.expiration_time().is_some_and(|expiry| at > expiry)
    }

    fn primary_material(&self) -> Material<'_> {
        Material::Primary {
            public: &self.primary,
            secret: self.primary_secret.as_ref(),
        }
    }

    pub(crate) fn materials(&self) -> impl Iterator<Item = Material<'_>> {
        std::iter::once(self.primary_material()).chain(self.subkeys.iter().map(Subkey::material))
    }

    /// Key material with the given id; the all-zero id matches nothing here.
    pub(crate) fn find_material(&self, key_id: &KeyId) -> Option<Material<'_>> {
        self.materials().find(|m| &m.key_id() == key_id)
    }

    /// Whether the material (primary or subkey) is expired or not yet
    /// created at `at`; 0 skips time checks.
    pub(crate) fn material_expired(&self, material: &Material<'_>, at: i64) -> bool {
        if at == 0 {
            return false;
        }
        if self.is_expired(at) || material.created() > at {
            return true;
        }
        let key_id = material.key_id();
        self.subkeys
            .iter()
            .find(|s| s.public.key_id() == key_id)
            .and_then(Subkey::expiration_time)
            .is_some_and(|expiry| at > expiry)
    }

    /// Newest valid encryption-capable key material at `at` (0 skips time checks).
    pub(crate) fn encryption_key(&self, at: i64) -> Option<Material<'_>> {
        if self.revoked || (at != 0 && self.is_expired(at)) {
            return None;
        }
        let subkey = self
            .subkeys
            .iter()
            .filter(|s| s.valid && !s.revoked && s.material().can_encrypt())
            .filter(|s| s.binding().map_or(true, |b| allows_encryption(b)))
            .filter(|s| at == 0 || s.expiration_time().map_or(true, |e| at <= e))
            .max_by_key(|s| s.public.created_at().timestamp())
            .map(Subkey::material);
        subkey.or_else(|| {
            let primary = self.primary_material();
            let flags_allow = self.primary_self_signature().map_or(true, allows_encryption);
            (flags_allow && primary.can_encrypt()).then_some(primary)
        })
    }

    /// Key material used to create signatures: the primary key when it may
    /// sign, otherwise the newest valid signing subkey.
    pub(crate) fn signing_key(&self) -> Option<Material<'_>> {
        let primary = self.primary_material();
        let flags_allow = self.primary_self_signature().map_or(true, allows_signing);
        if flags_allow && primary.can_sign() {
            return Some(primary);
        }
        self.subkeys
            .iter()
            .filter(|s| s.valid && !s.revoked && s.material().can_sign())
            .filter(|s| s.binding().is_some_and(|b| b.key_flags().sign()))
            .max_by_key(|s| s.public.created_at().timestamp())
            .map(Subkey::material)
    }

    /// A copy of this key with every secret packet decrypted.
    ///
    /// Fails with [`CryptoError::WrongPassphrase`] if any encrypted secret
    /// packet rejects the passphrase.
    pub fn unlock(&self, passphrase: &Passphrase) -> Result<Key> {
        let Some(primary) = &self.primary_secret else {
            return Err(CryptoError::InvalidParameter(format!(
                "key {} has no secret material",
                self.key_id()
            )));
        };
        let mut key = self.clone();
        let body = unlocked_body(&primary.public_key(), primary.public_params(), primary.secret_params(), passphrase)?;
        if let Some(body) = body {
            key.primary_secret = Some(packet::SecretKey::from_slice(primary.packet_version(), &body).map_err(key_error)?);
        }
        for subkey in &mut key.subkeys {
            let Some(secret) = &subkey.secret else { continue };
            let version = secret.packet_version();
            if let Some(body) = unlocked_body(&subkey.public, secret.public_params(), secret.secret_params(), passphrase)? {
                let rebuilt = packet::SecretSubkey::from_slice(version, &body).map_err(key_error)?;
                subkey.secret = Some(rebuilt);
            }
        }
        log::debug!("Unlocked key {}", key.key_id());
        Ok(key)
    }

    /// Re-encrypt every secret packet under `passphrase`. The key must be unlocked.
    pub(crate) fn lock(&mut self, passphrase: &Passphrase, config: &EngineConfig) -> Result<()> {
        if let Some(secret) = &self.primary_secret {
            let body = locked_body(&secret.public_key(), secret.secret_params(), passphrase, config)?;
            let rebuilt = packet::SecretKey::from_slice(secret.packet_version(), &body).map_err(key_error)?;
            self.primary_secret = Some(rebuilt);
        }
        for subkey in &mut self.subkeys {
            if let Some(secret) = &subkey.secret {
                let body = locked_body(&subkey.public, secret.secret_params(), passphrase, config)?;
                let rebuilt = packet::SecretSubkey::from_slice(secret.packet_version(), &body).map_err(key_error)?;
                subkey.secret = Some(rebuilt);
            }
        }
        Ok(())
    }

    /// The public half of this key.
    pub fn to_public(&self) -> Key {
        let mut key = self.clone();
        key.primary_secret = None;
        for subkey in &mut key.subkeys {
            subkey.secret = None;
        }
        key
    }

    pub fn to_public_bytes(&self) -> Vec<u8> {
        self.serialize(false).unwrap_or_default()
    }

    pub fn to_secret_bytes(&self) -> Result<Vec<u8>> {
        if !self.is_private() {
            return Err(CryptoError::InvalidState("not a private key".into()));
        }
        self.serialize(true).map_err(key_error)
    }

    pub fn armor_public(&self) -> String {
        armor::encode(BlockType::PublicKey, &self.to_public_bytes(), None).unwrap_or_default()
    }

    pub fn armor_private(&self) -> Result<String> {
        armor::encode(BlockType::PrivateKey, &self.to_secret_bytes()?, None).map_err(key_error)
    }

    fn serialize(&self, secret: bool) -> pgp::errors::Result<Vec<u8>> {
        let mut out = Vec::new();
        match (&self.primary_secret, secret) {
            (Some(packet), true) => write_packet(&mut out, packet)?,
            _ => write_packet(&mut out, &self.primary)?,
        }
        self.details.to_writer(&mut out)?;
        for subkey in &self.subkeys {
            match (&subkey.secret, secret) {
                (Some(packet), true) => write_packet(&mut out, packet)?,
                _ => write_packet(&mut out, &subkey.public)?,
            }
            for sig in &subkey.signatures {
                write_packet(&mut out, sig)?;
            }
        }
        Ok(out)
    }

    /// Check self-signatures and revocations, recording anything wrong.
    fn validate(&mut self) {
        let primary = &self.primary;
        let key_id = hex::encode_upper(primary.key_id());

        if self
            .details
            .revocation_signatures
            .iter()
            .any(|sig| sig.verify_key(primary).is_ok())
        {
            self.revoked = true;
            self.issues.push("key is revoked".into());
        }

        self.valid_users = self
            .details
            .users
            .iter()
            .map(|user| {
                user.signatures
                    .iter()
                    .any(|sig| sig.is_certification() && sig.verify_certification(primary, Tag::UserId, &user.id).is_ok())
            })
            .collect();
        for (user, valid) in self.details.users.iter().zip(&self.valid_users) {
            if !valid {
                let uid = String::from_utf8_lossy(user.id.id()).into_owned();
                log::warn!("User id '{}' on key {} has no valid self-signature", uid, key_id);
                self.issues.push(format!("user id '{}' has no valid self-signature", uid));
            }
        }

        for subkey in &mut self.subkeys {
            let verifies = |typ: SignatureType| {
                subkey
                    .signatures
                    .iter()
                    .any(|sig| sig.typ() == typ && sig.verify_key_binding(primary, &subkey.public).is_ok())
            };
            let valid = verifies(SignatureType::SubkeyBinding);
            let revoked = verifies(SignatureType::SubkeyRevocation);
            subkey.valid = valid;
            subkey.revoked = revoked;
            let sub_id = hex::encode_upper(subkey.public.key_id());
            if !subkey.valid {
                log::warn!("Subkey {} has no valid binding signature", sub_id);
                self.issues.push(format!("subkey {} has no valid binding signature", sub_id));
            }
            if subkey.revoked {
                self.issues.push(format!("subkey {} is revoked", sub_id));
            }
        }

        if self.details.users.is_empty() {
            self.issues.push("key has no user ids".into());
        }
    }

    /// Human-readable summary used by `check_key`.
    pub fn describe(&self, at: i64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Key ID: {}", self.key_id());
        let _ = writeln!(out, "Fingerprint: {}", self.fingerprint());
        let bits = match self.primary.public_params() {
            PublicParams::RSA { n, .. } => format!(" {} bits", mpi_bits(n)),
            _ => String::new(),
        };
        let _ = writeln!(out, "Algorithm: {}{}", algorithm_name(self.primary.algorithm()), bits);
        let _ = writeln!(out, "Created: {}", self.primary.created_at().to_rfc3339());
        match self.expiration_time().and_then(|t| DateTime::from_timestamp(t, 0)) {
            Some(expiry) => {
                let _ = writeln!(out, "Expires: {}", expiry.to_rfc3339());
            }
            None => {
                let _ = writeln!(out, "Expires: never");
            }
        }
        for uid in self.user_ids() {
            let _ = writeln!(out, "User ID: {}", uid);
        }
        for subkey in &self.subkeys {
            let _ = writeln!(
                out,
                "Subkey: {} {}{}",
                hex::encode_upper(subkey.public.key_id()),
                algorithm_name(subkey.public.algorithm()),
                if subkey.valid { "" } else { " (invalid binding)" }
            );
        }
        for issue in &self.issues {
            let _ = writeln!(out, "Warning: {}", issue);
        }
        let status = if self.revoked {
            "revoked"
        } else if self.is_expired(at) {
            "expired"
        } else if self.encryption_key(at).is_none() {
            "no usable encryption key"
        } else {
            "OK"
        };
        let _ = write!(out, "Status: {}", status);
        out
    }
}

/// Expiry carried by a self-signature; a zero duration means never.
fn expiry_after(created: &DateTime<Utc>, sig: &Signature) -> Option<i64> {
    let valid_for = sig.key_expiration_time()?.num_seconds();
    (valid_for > 0).then(|| created.timestamp() + valid_for)
}

/// Signatures without a key flags subpacket leave the choice to the algorithm.
fn allows_encryption(sig: &Signature) -> bool {
    let flags = sig.key_flags();
    flags == Default::default() || flags.encrypt_comms() || flags.encrypt_storage()
}

fn allows_signing(sig: &Signature) -> bool {
    let flags = sig.key_flags();
    flags == Default::default() || flags.sign()
}

fn algorithm_name(alg: PublicKeyAlgorithm) -> String {
    match alg {
        PublicKeyAlgorithm::RSA | PublicKeyAlgorithm::RSAEncrypt | PublicKeyAlgorithm::RSASign => "RSA".into(),
        PublicKeyAlgorithm::DSA => "DSA".into(),
        PublicKeyAlgorithm::ECDH => "ECDH".into(),
        PublicKeyAlgorithm::ECDSA => "ECDSA".into(),
        PublicKeyAlgorithm::EdDSA => "EdDSA".into(),
        PublicKeyAlgorithm::Elgamal | PublicKeyAlgorithm::ElgamalSign => "ElGamal".into(),
        other => format!("{:?}", other),
    }
}

fn mpi_bits(n: &Mpi) -> usize {
    let bytes = n.as_bytes();
    match bytes.first() {
        Some(&top) => bytes.len() * 8 - top.leading_zeros() as usize,
        None => 0,
    }
}

/// Body of a secret key packet: the public fields followed by `params`.
pub(crate) fn secret_body(public: &impl Serialize, params: &SecretParams) -> pgp::errors::Result<Vec<u8>> {
    let mut body = public.to_bytes()?;
    params.to_writer(&mut body)?;
    Ok(body)
}

/// Packet body with decrypted secret parameters, `None` if already plain.
fn unlocked_body(
    public: &(impl Serialize + KeyTrait),
    public_params: &PublicParams,
    params: &SecretParams,
    passphrase: &Passphrase,
) -> Result<Option<Vec<u8>>> {
    let SecretParams::Encrypted(encrypted) = params else {
        return Ok(None);
    };
    let plain = encrypted
        .unlock(|| passphrase.as_str().to_string(), public.algorithm(), public_params)
        .map_err(|e| match e {
            PgpError::InvalidInput => CryptoError::WrongPassphrase,
            other => key_error(other),
        })?;
    secret_body(public, &SecretParams::Plain(plain)).map(Some).map_err(key_error)
}

/// Packet body with secret parameters encrypted under `passphrase`.
fn locked_body(
    public: &impl Serialize,
    params: &SecretParams,
    passphrase: &Passphrase,
    config: &EngineConfig,
) -> Result<Vec<u8>> {
    let SecretParams::Plain(plain) = params else {
        return Err(CryptoError::InvalidState("secret key is still encrypted".into()));
    };
    let sym_alg: pgp::crypto::sym::SymmetricKeyAlgorithm = config.cipher.into();
    let mut iv = vec![0u8; sym_alg.block_size()];
    rand::thread_rng().fill_bytes(&mut iv);
    let s2k = S2kParams::Cfb {
        sym_alg,
        s2k: StringToKey::new_iterated(rand::thread_rng(), config.hash.into(), config.s2k_count),
        iv,
    };
    let encrypted = plain
        .clone()
        .encrypt(passphrase.as_str(), s2k, KeyVersion::V4)
        .map_err(|e| CryptoError::KeyGeneration(format!("Failed to encrypt secret key: {}", e)))?;
    secret_body(public, &SecretParams::Encrypted(encrypted)).map_err(key_error)
}

/// An ordered collection of keys.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<Key>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Parse one or more keys from armored text or binary packets.
    pub fn parse(data: &[u8]) -> Result<KeyRing> {
        let binary = if armor::is_armored(data) {
            let text = std::str::from_utf8(data)
                .map_err(|e| CryptoError::KeyParse(format!("armored key is not UTF-8: {}", e)))?;
            let mut binary = Vec::new();
            for (kind, block) in armor::decode_all(text).map_err(key_error)? {
                match kind {
                    BlockType::PublicKey | BlockType::PrivateKey => binary.extend_from_slice(&block),
                    other => {
                        return Err(CryptoError::KeyParse(format!("expected a key block, found {:?}", other)));
                    }
                }
            }
            binary
        } else {
            data.to_vec()
        };

        framing::ensure_complete(&binary).map_err(key_error)?;
        let mut keys = Vec::new();
        for parsed in from_bytes_many(&binary[..]) {
            keys.push(match parsed.map_err(key_error)? {
                PublicOrSecret::Public(key) => Key::from_public(key),
                PublicOrSecret::Secret(key) => Key::from_secret(key),
            });
        }
        if keys.is_empty() {
            return Err(CryptoError::KeyParse("no keys found".into()));
        }
        log::debug!("Parsed key ring with {} key(s)", keys.len());
        Ok(KeyRing { keys })
    }

    pub fn parse_armored(text: &str) -> Result<KeyRing> {
        Self::parse(text.as_bytes())
    }

    pub fn push(&mut self, key: Key) {
        self.keys.push(key);
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn first(&self) -> Option<&Key> {
        self.keys.first()
    }

    /// Unlock every private key that accepts `passphrase`.
    ///
    /// Keys rejecting the passphrase are dropped; if none unlock the call
    /// fails with [`CryptoError::WrongPassphrase`].
    pub fn unlock(&self, passphrase: &Passphrase) -> Result<KeyRing> {
        let mut unlocked = Vec::new();
        let mut last_err = None;
        for key in self.keys.iter().filter(|k| k.is_private()) {
            match key.unlock(passphrase) {
                Ok(key) => unlocked.push(key),
                Err(e) => {
                    log::debug!("Key {} did not unlock: {}", key.key_id(), e);
                    last_err = Some(e);
                }
            }
        }
        if unlocked.is_empty() {
            return Err(match last_err {
                Some(CryptoError::KeyParse(msg)) => CryptoError::KeyParse(msg),
                Some(_) => CryptoError::WrongPassphrase,
                None => CryptoError::InvalidParameter("key ring holds no private keys".into()),
            });
        }
        Ok(KeyRing { keys: unlocked })
    }

    /// First key (in ring order) holding material with `key_id`.
    pub(crate) fn find_by_key_id(&self, key_id: &KeyId) -> Option<(&Key, Material<'_>)> {
        self.keys
            .iter()
            .find_map(|key| key.find_material(key_id).map(|m| (key, m)))
    }

    pub fn armor_public(&self) -> String {
        let bytes: Vec<u8> = self.keys.iter().flat_map(|k| k.to_public_bytes()).collect();
        armor::encode(BlockType::PublicKey, &bytes, None).unwrap_or_default()
    }
}

/// Parse `data` and describe every key in it. Never fails; parse errors are
/// reported in the returned text.
pub fn check_key(data: &[u8], at: i64) -> String {
    match KeyRing::parse(data) {
        Ok(ring) => ring
            .keys()
            .iter()
            .map(|k| k.describe(at))
            .collect::<Vec<_>>()
            .join("\n\n"),
        Err(e) => format!("Invalid key: {}", e),
    }
}

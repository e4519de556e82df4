//! Session key packets: public-key encrypted (tag 1) and symmetric-key
//! encrypted (tag 3).
//!
//! The packets and their cryptography come from `pgp`. This module decides
//! which ring key opens them and converts between [`SessionSplit`] and
//! `pgp`'s [`PlainSessionKey`].

use crate::crypto::pgp::framing;
use crate::crypto::pgp::hash::HashAlgorithm;
use crate::crypto::pgp::keypair::Passphrase;
use crate::crypto::pgp::keyring::{Key, KeyRing, Material};
use crate::crypto::symmetric::SymmetricAlgorithm;
use crate::error::{encryption_error, message_error, CryptoError, Result};
use crate::models::SessionSplit;
use pgp::composed::message::{decrypt_session_key_with_password, PlainSessionKey};
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::{Packet, PacketParser, PublicKeyEncryptedSessionKey, SymKeyEncryptedSessionKey};
use pgp::types::{KeyId, StringToKey};

pub(crate) type Pkesk = PublicKeyEncryptedSessionKey;
pub(crate) type Skesk = SymKeyEncryptedSessionKey;

/// A PKESK whose recipient is hidden carries the all-zero key id.
fn is_wildcard(pkesk: &Pkesk) -> bool {
    pkesk.id().as_ref().iter().all(|&b| b == 0)
}

/// Convert a session key recovered by `pgp` into the engine's form.
pub(crate) fn session_from_plain(plain: PlainSessionKey) -> Result<SessionSplit> {
    let bad = || CryptoError::DecryptionFailed("invalid session key encoding".into());
    match plain {
        PlainSessionKey::V4 { sym_alg, key } => {
            let algorithm = SymmetricAlgorithm::from_pgp(sym_alg).ok_or_else(bad)?;
            SessionSplit::new(algorithm, key).map_err(|_| bad())
        }
        _ => Err(bad()),
    }
}

pub(crate) fn plain_session(session: &SessionSplit) -> PlainSessionKey {
    PlainSessionKey::V4 {
        sym_alg: session.algorithm.into(),
        key: session.key.clone(),
    }
}

/// Encrypt `session` to one recipient key.
pub(crate) fn seal_for(session: &SessionSplit, recipient: &Material<'_>) -> Result<Pkesk> {
    if !recipient.can_encrypt() {
        return Err(CryptoError::KeyParse(format!("key {} cannot encrypt", recipient.key_id_hex())));
    }
    recipient.encrypt_session(session).map_err(encryption_error)
}

/// Encrypt `session` under a key derived from `password` with iterated S2K.
///
/// The packet's cipher is the session cipher.
pub(crate) fn seal_with_password(
    session: &SessionSplit,
    password: &str,
    hash: HashAlgorithm,
    s2k_count: u8,
) -> Result<Skesk> {
    let s2k = StringToKey::new_iterated(rand::thread_rng(), hash.into(), s2k_count);
    let password = password.to_string();
    Skesk::encrypt(move || password, &session.key, s2k, session.algorithm.into()).map_err(encryption_error)
}

/// Recover the session key from one SKESK. A packet without an encrypted
/// key yields the derived key directly.
fn open_skesk(skesk: &Skesk, password: &str) -> Result<SessionSplit> {
    let Some(cipher) = SymmetricAlgorithm::from_pgp(skesk.sym_algorithm()) else {
        return Err(CryptoError::DecryptionFailed(format!(
            "unsupported SKESK cipher {:?}",
            skesk.sym_algorithm()
        )));
    };
    if skesk.version() != 4 || skesk.encrypted_key().is_some_and(|k| k.len() < 2) {
        return Err(CryptoError::DecryptionFailed("malformed SKESK packet".into()));
    }
    let plain = decrypt_session_key_with_password(skesk, || password.to_string())
        .map_err(|e| CryptoError::DecryptionFailed(format!("{} SKESK: {}", cipher.name(), e)))?;
    // A wrong password decrypts to noise, which rarely names a known cipher.
    match plain {
        PlainSessionKey::V4 { sym_alg, key } => match SymmetricAlgorithm::from_pgp(sym_alg) {
            Some(algorithm) if key.len() == algorithm.key_size() => SessionSplit::new(algorithm, key),
            _ => Err(CryptoError::WrongPassword),
        },
        _ => Err(CryptoError::WrongPassword),
    }
}

/// Session key packets found at the start of a message.
#[derive(Debug, Default)]
pub(crate) struct KeyPackets {
    pub pkesks: Vec<Pkesk>,
    pub skesks: Vec<Skesk>,
}

impl KeyPackets {
    /// Read every PKESK and SKESK packet in `data`, ignoring anything else.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        framing::ensure_complete(data).map_err(message_error)?;
        let mut out = KeyPackets::default();
        for packet in PacketParser::new(data) {
            match packet {
                Ok(Packet::PublicKeyEncryptedSessionKey(pkesk)) => out.pkesks.push(pkesk),
                Ok(Packet::SymKeyEncryptedSessionKey(skesk)) => out.skesks.push(skesk),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable session key packet: {}", e),
            }
        }
        Ok(out)
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        for pkesk in &self.pkesks {
            framing::write_packet(out, pkesk).map_err(encryption_error)?;
        }
        for skesk in &self.skesks {
            framing::write_packet(out, skesk).map_err(encryption_error)?;
        }
        Ok(())
    }
}

/// Whether the PKESK's value count fits the material's algorithm.
fn fits(material: &Material<'_>, pkesk: &Pkesk) -> bool {
    let expected = match material.algorithm() {
        PublicKeyAlgorithm::RSA | PublicKeyAlgorithm::RSAEncrypt => 1,
        PublicKeyAlgorithm::Elgamal => 2,
        PublicKeyAlgorithm::ECDH => 3,
        _ => return false,
    };
    pkesk.mpis().len() == expected
}

/// Recover the session key from `pkesks` with the first key of `ring`
/// (in ring order) that opens one of them.
///
/// Locked keys are unlocked lazily with `passphrase` only once a packet is
/// addressed to them, so a wrong passphrase is reported as
/// [`CryptoError::WrongPassphrase`] only for keys that actually match.
pub(crate) fn open_with_ring(
    pkesks: &[Pkesk],
    ring: &KeyRing,
    passphrase: Option<&Passphrase>,
) -> Result<SessionSplit> {
    if pkesks.is_empty() {
        return Err(CryptoError::DecryptionFailed("message has no public-key session key packet".into()));
    }

    let mut wrong_passphrase = false;
    let mut last_failure = None;

    for key in ring.keys() {
        let addressed: Vec<(&Pkesk, KeyId)> = pkesks
            .iter()
            .flat_map(|p| candidate_ids(p, key).into_iter().map(move |id| (p, id)))
            .collect();
        if addressed.is_empty() {
            continue;
        }

        let unlocked;
        let usable: &Key = if addressed
            .iter()
            .all(|(_, id)| key.find_material(id).is_some_and(|m| m.is_unlocked()))
        {
            key
        } else {
            let Some(passphrase) = passphrase else {
                wrong_passphrase = true;
                continue;
            };
            match key.unlock(passphrase) {
                Ok(k) => {
                    unlocked = k;
                    &unlocked
                }
                Err(CryptoError::WrongPassphrase) => {
                    log::debug!("Passphrase rejected by key {}", key.key_id());
                    wrong_passphrase = true;
                    continue;
                }
                Err(e) => {
                    last_failure = Some(e);
                    continue;
                }
            }
        };

        for (pkesk, id) in addressed {
            let Some(material) = usable.find_material(&id) else {
                continue;
            };
            let opened = material
                .decrypt_session(pkesk.mpis())
                .map_err(message_error)
                .and_then(session_from_plain);
            match opened {
                Ok(session) => {
                    log::debug!("Session key recovered with key {}", material.key_id_hex());
                    return Ok(session);
                }
                Err(e) => {
                    log::debug!("Key {} did not open PKESK: {}", material.key_id_hex(), e);
                    last_failure = Some(e);
                }
            }
        }
    }

    if wrong_passphrase {
        return Err(CryptoError::WrongPassphrase);
    }
    match last_failure {
        Some(e @ (CryptoError::DecryptionFailed(_) | CryptoError::KeyParse(_))) => Err(e),
        _ => Err(CryptoError::NoMatchingKey(format!(
            "none of {} key(s) can decrypt a session key addressed to {}",
            ring.len(),
            pkesks
                .iter()
                .map(|p| hex::encode_upper(p.id()))
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Ids of the key material in `key` that may hold the secret for `pkesk`.
fn candidate_ids(pkesk: &Pkesk, key: &Key) -> Vec<KeyId> {
    if is_wildcard(pkesk) {
        key.materials()
            .filter(|m| m.has_secret() && m.can_encrypt() && fits(m, pkesk))
            .map(|m| m.key_id())
            .collect()
    } else {
        key.find_material(pkesk.id())
            .filter(|m| m.has_secret() && fits(m, pkesk))
            .map(|m| vec![m.key_id()])
            .unwrap_or_default()
    }
}

/// Recover the session key from the first SKESK that `password` opens.
pub(crate) fn open_with_password(skesks: &[Skesk], password: &str) -> Result<SessionSplit> {
    if skesks.is_empty() {
        return Err(CryptoError::DecryptionFailed("message has no password session key packet".into()));
    }
    let mut last = CryptoError::WrongPassword;
    for skesk in skesks {
        match open_skesk(skesk, password) {
            Ok(session) => return Ok(session),
            Err(e) => last = e,
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::crypto::pgp::keypair::PgpKeyManager;
    use pgp::crypto::hash::HashAlgorithm as PgpHash;
    use pgp::crypto::sym::SymmetricKeyAlgorithm;
    use pgp::types::Version;
    use rsa::traits::PrivateKeyParts;
    use rsa::RsaPrivateKey;

    fn test_key(pass: &str) -> Key {
        PgpKeyManager::new(EngineConfig::default())
            .generate_key("sam", "example.com", &Passphrase::new(pass), "x25519", 0)
            .unwrap()
    }

    fn pkesk_for(session: &SessionSplit, key: &Key) -> Pkesk {
        seal_for(session, &key.encryption_key(0).unwrap()).unwrap()
    }

    #[test]
    fn test_ecdh_pkesk_roundtrip_through_bytes() {
        let key = test_key("pw");
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let packets = KeyPackets {
            pkesks: vec![pkesk_for(&session, &key)],
            skesks: Vec::new(),
        };
        let mut bytes = Vec::new();
        packets.write(&mut bytes).unwrap();

        let parsed = KeyPackets::parse(&bytes).unwrap();
        let ring = KeyRing::from_keys(vec![key]);
        let opened = open_with_ring(&parsed.pkesks, &ring, Some(&Passphrase::new("pw"))).unwrap();
        assert_eq!(opened, session);
    }

    #[test]
    fn test_rsa_pkesk_roundtrip() {
        let mut rng = rand::thread_rng();
        let a = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let b = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let p = |k: &RsaPrivateKey, i: usize| k.primes()[i].to_bytes_be();
        let (p1, p2, p3, p4) = (p(&a, 0), p(&a, 1), p(&b, 0), p(&b, 1));
        let key = PgpKeyManager::new(EngineConfig::default())
            .generate_rsa_key_with_primes("rsa", "example.com", &Passphrase::new("pw"), 1024, [&p1, &p2, &p3, &p4])
            .unwrap();

        let session = SessionSplit::generate(SymmetricAlgorithm::Aes128);
        let pkesks = vec![pkesk_for(&session, &key)];
        let ring = KeyRing::from_keys(vec![key]);
        assert_eq!(open_with_ring(&pkesks, &ring, Some(&Passphrase::new("pw"))).unwrap(), session);
    }

    #[test]
    fn test_ring_errors() {
        let key = test_key("pw");
        let other = test_key("pw");
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let pkesks = vec![pkesk_for(&session, &key)];

        let ring = KeyRing::from_keys(vec![key]);
        assert!(matches!(
            open_with_ring(&pkesks, &ring, Some(&Passphrase::new("bad"))),
            Err(CryptoError::WrongPassphrase)
        ));
        assert!(matches!(
            open_with_ring(&[], &ring, None),
            Err(CryptoError::DecryptionFailed(_))
        ));

        let stranger = KeyRing::from_keys(vec![other]);
        assert!(matches!(
            open_with_ring(&pkesks, &stranger, Some(&Passphrase::new("pw"))),
            Err(CryptoError::NoMatchingKey(_))
        ));
    }

    #[test]
    fn test_ring_tries_keys_in_order() {
        let first = test_key("one");
        let second = test_key("two");
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let pkesks = vec![pkesk_for(&session, &second)];

        let ring = KeyRing::from_keys(vec![first, second]);
        let opened = open_with_ring(&pkesks, &ring, Some(&Passphrase::new("two"))).unwrap();
        assert_eq!(opened, session);
    }

    #[test]
    fn test_skesk_password_roundtrip() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes128);
        let packets = KeyPackets {
            pkesks: Vec::new(),
            skesks: vec![seal_with_password(&session, "secret", HashAlgorithm::Sha256, 0x10).unwrap()],
        };
        let mut bytes = Vec::new();
        packets.write(&mut bytes).unwrap();

        let parsed = KeyPackets::parse(&bytes).unwrap();
        assert!(parsed.skesks[0].encrypted_key().is_some());
        assert_eq!(open_with_password(&parsed.skesks, "secret").unwrap(), session);
        assert!(matches!(
            open_with_password(&parsed.skesks, "wrong"),
            Err(CryptoError::WrongPassword)
        ));
    }

    #[test]
    fn test_skesk_without_encrypted_key_uses_derived_key() {
        let s2k = StringToKey::Salted {
            hash_alg: PgpHash::SHA2_256,
            salt: [1; 8],
        };
        let skesk = Skesk::V4 {
            packet_version: Version::New,
            sym_algorithm: SymmetricKeyAlgorithm::AES128,
            s2k: s2k.clone(),
            encrypted_key: None,
        };
        let session = open_skesk(&skesk, "pw").unwrap();
        assert_eq!(session.algorithm, SymmetricAlgorithm::Aes128);
        assert_eq!(session.key, s2k.derive_key("pw", 16).unwrap());
    }

    #[test]
    fn test_plain_session_conversion() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes192);
        assert_eq!(session_from_plain(plain_session(&session)).unwrap(), session);
        let short = PlainSessionKey::V4 {
            sym_alg: SymmetricKeyAlgorithm::AES256,
            key: vec![0; 5],
        };
        assert!(matches!(session_from_plain(short), Err(CryptoError::DecryptionFailed(_))));
    }
}

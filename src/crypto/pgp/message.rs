//! Encrypted messages: literal data, one-pass signatures, compressed data
//! and the integrity-protected data packet (SEIPD v1 with MDC).
//!
//! Packets are `pgp`'s own types; this module decides how they nest and
//! maps failures onto the engine's errors.

use crate::crypto::pgp::armor;
use crate::crypto::pgp::framing;
use crate::crypto::pgp::hash::HashAlgorithm;
use crate::crypto::pgp::keypair::Passphrase;
use crate::crypto::pgp::keyring::{Key, KeyRing};
use crate::crypto::pgp::session::{open_with_password, open_with_ring, seal_for, seal_with_password, KeyPackets};
use crate::crypto::pgp::signing::{evaluate_all, issuer_of, PgpSigner, SignatureMode, VerifiedSignature};
use crate::error::{encryption_error, message_error, CryptoError, Result};
use crate::models::SessionSplit;
use pgp::armor::BlockType;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{
    CompressedData, LiteralData, OnePassSignature, Packet, PacketParser, PacketTrait, Signature,
    SymEncryptedProtectedData,
};
use pgp::ser::Serialize;
use pgp::types::Version;
use std::io::Read;

const MDC_LEN: usize = 22;

/// Compressed packets nested deeper than this are rejected.
const MAX_NESTING: usize = 8;

/// Literal data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LiteralFormat {
    Binary,
    Utf8,
}

impl LiteralFormat {
    fn octet(self) -> u8 {
        match self {
            LiteralFormat::Binary => b'b',
            LiteralFormat::Utf8 => b'u',
        }
    }

    fn signature_mode(self) -> SignatureMode {
        match self {
            LiteralFormat::Binary => SignatureMode::Binary,
            LiteralFormat::Utf8 => SignatureMode::Text,
        }
    }
}

/// Literal packet carrying `data` unchanged.
///
/// `LiteralData::from_str` rewrites line endings and stamps the wall
/// clock, so the packet is read back from its wire form instead.
fn literal_packet(format: LiteralFormat, filename: &str, date: i64, data: &[u8]) -> Result<LiteralData> {
    let name = &filename.as_bytes()[..filename.len().min(255)];
    let mut body = Vec::with_capacity(6 + name.len() + data.len());
    body.push(format.octet());
    body.push(name.len() as u8);
    body.extend_from_slice(name);
    body.extend_from_slice(&u32::try_from(date).unwrap_or(0).to_be_bytes());
    body.extend_from_slice(data);
    LiteralData::from_slice(Version::New, &body).map_err(encryption_error)
}

/// File name stored in a literal packet.
fn literal_filename(literal: &LiteralData) -> String {
    let Ok(body) = literal.to_bytes() else {
        return String::new();
    };
    let len = body.get(1).copied().unwrap_or(0) as usize;
    body.get(2..2 + len)
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_default()
}

/// Signing key and parameters for an embedded signature.
pub(crate) struct Signer<'a> {
    pub key: &'a Key,
    pub hash: HashAlgorithm,
    pub created: i64,
}

/// Literal payload options.
pub(crate) struct Payload<'a> {
    pub data: &'a [u8],
    pub format: LiteralFormat,
    pub filename: &'a str,
    pub date: i64,
}

/// Encrypt `payload` under `session`, returning the SEIPD packet.
pub(crate) fn seal_data(session: &SessionSplit, payload: &Payload<'_>, signer: Option<&Signer<'_>>) -> Result<Vec<u8>> {
    let signature = match signer {
        Some(signer) => Some(PgpSigner::create_signature(
            signer.key,
            payload.data,
            payload.format.signature_mode(),
            signer.hash,
            signer.created,
        )?),
        None => None,
    };

    let mut inner = Vec::with_capacity(payload.data.len() + 256);
    if let Some(sig) = &signature {
        let issuer = issuer_of(sig).ok_or_else(|| CryptoError::Encryption("signature names no issuer".into()))?;
        let ops = OnePassSignature::from_details(sig.typ(), sig.hash_alg(), sig.config.pub_alg, issuer);
        framing::write_packet(&mut inner, &ops).map_err(encryption_error)?;
    }
    let literal = literal_packet(payload.format, payload.filename, payload.date, payload.data)?;
    framing::write_packet(&mut inner, &literal).map_err(encryption_error)?;
    if let Some(sig) = &signature {
        framing::write_packet(&mut inner, sig).map_err(encryption_error)?;
    }

    let seipd = SymEncryptedProtectedData::encrypt(session.algorithm.into(), &session.key, &inner)
        .map_err(encryption_error)?;
    let mut out = Vec::with_capacity(inner.len() + 64);
    framing::write_packet(&mut out, &seipd).map_err(encryption_error)?;
    Ok(out)
}

/// Public-key session key packets for every key in `recipients`.
pub(crate) fn key_packets_for(session: &SessionSplit, recipients: &KeyRing, at: i64) -> Result<Vec<u8>> {
    if recipients.is_empty() {
        return Err(CryptoError::KeyParse("no recipient keys".into()));
    }
    let mut packets = KeyPackets::default();
    for key in recipients.keys() {
        let material = key.encryption_key(at).ok_or_else(|| {
            CryptoError::KeyParse(format!("key {} has no valid encryption key", key.key_id()))
        })?;
        packets.pkesks.push(seal_for(session, &material)?);
    }
    let mut out = Vec::new();
    packets.write(&mut out)?;
    Ok(out)
}

/// Password session key packet for `session`.
pub(crate) fn password_packet_for(
    session: &SessionSplit,
    password: &str,
    hash: HashAlgorithm,
    s2k_count: u8,
) -> Result<Vec<u8>> {
    let packets = KeyPackets {
        pkesks: Vec::new(),
        skesks: vec![seal_with_password(session, password, hash, s2k_count)?],
    };
    let mut out = Vec::new();
    packets.write(&mut out)?;
    Ok(out)
}

/// Decrypted literal data and any signatures that travelled with it.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiteralContent {
    pub data: Vec<u8>,
    pub filename: String,
    pub is_text: bool,
    pub signatures: Vec<Signature>,
}

impl LiteralContent {
    /// Check the embedded signatures against `verifiers` at `verify_time`.
    pub(crate) fn verify(&self, verifiers: Option<&KeyRing>, verify_time: i64) -> VerifiedSignature {
        evaluate_all(&self.signatures, verifiers, verify_time, |sig, material| {
            material.verify(sig, &self.data[..]).is_ok()
        })
    }
}

/// Message parts before decryption.
pub(crate) struct ParsedMessage {
    pub keys: KeyPackets,
    seipd: SymEncryptedProtectedData,
}

impl ParsedMessage {
    /// Split a binary message into session key packets and the encrypted body.
    pub(crate) fn parse(binary: &[u8]) -> Result<Self> {
        framing::ensure_complete(binary).map_err(message_error)?;
        let mut keys = KeyPackets::default();
        let mut seipd = None;
        for packet in PacketParser::new(binary) {
            match packet {
                Ok(Packet::PublicKeyEncryptedSessionKey(pkesk)) => keys.pkesks.push(pkesk),
                Ok(Packet::SymKeyEncryptedSessionKey(skesk)) => keys.skesks.push(skesk),
                Ok(Packet::SymEncryptedProtectedData(data)) => {
                    if seipd.is_none() {
                        seipd = Some(data);
                    }
                }
                Ok(Packet::SymEncryptedData(_)) => {
                    return Err(CryptoError::DecryptionFailed("message is not integrity protected".into()));
                }
                Ok(Packet::Marker(_)) => {}
                Ok(other) => log::debug!("Ignoring {:?} packet in message", other.tag()),
                Err(e) => log::warn!("Skipping unreadable packet in message: {}", e),
            }
        }
        let seipd = seipd.ok_or_else(|| CryptoError::DecryptionFailed("no encrypted data packet".into()))?;
        Ok(Self { keys, seipd })
    }

    pub(crate) fn decrypt_with_keys(&self, ring: &KeyRing, passphrase: Option<&Passphrase>) -> Result<LiteralContent> {
        let session = open_with_ring(&self.keys.pkesks, ring, passphrase)?;
        self.decrypt_with_session(&session)
    }

    pub(crate) fn decrypt_with_password(&self, password: &str) -> Result<LiteralContent> {
        let session = open_with_password(&self.keys.skesks, password)?;
        let inner = decrypt_seipd(&session, &self.seipd, CryptoError::WrongPassword)?;
        read_content(&inner)
    }

    pub(crate) fn decrypt_with_session(&self, session: &SessionSplit) -> Result<LiteralContent> {
        let inner = decrypt_seipd(
            session,
            &self.seipd,
            CryptoError::DecryptionFailed("session key does not match the data".into()),
        )?;
        read_content(&inner)
    }
}

/// Decrypt and authenticate a SEIPD packet, returning the inner packets.
/// `wrong_key` is returned when the quick check shows the session key is wrong.
pub(crate) fn decrypt_seipd(
    session: &SessionSplit,
    seipd: &SymEncryptedProtectedData,
    wrong_key: CryptoError,
) -> Result<Vec<u8>> {
    if seipd.version() != 1 {
        return Err(CryptoError::DecryptionFailed(format!(
            "unsupported SEIPD version {}",
            seipd.version()
        )));
    }
    let alg: SymmetricKeyAlgorithm = session.algorithm.into();
    let block = alg.block_size();
    let data = seipd.data_as_slice();
    if data.len() < block + 2 + MDC_LEN {
        return Err(CryptoError::DecryptionFailed("encrypted data packet is truncated".into()));
    }

    // The prefix decrypts on its own, so the quick check costs one block.
    let mut head = data[..block + 3].to_vec();
    let iv = vec![0u8; block];
    let (prefix, _) = alg
        .decrypt_with_iv(&session.key, &iv, &mut head, false)
        .map_err(message_error)?;
    if prefix[block - 2..block] != prefix[block..block + 2] {
        return Err(wrong_key);
    }

    seipd.decrypt(&session.key, Some(alg)).map_err(message_error)
}

/// Read literal data, signatures and compressed containers from decrypted
/// packets.
fn read_content(inner: &[u8]) -> Result<LiteralContent> {
    let mut content = None;
    let mut signatures = Vec::new();
    collect_content(inner, 0, &mut content, &mut signatures)?;
    let mut content: LiteralContent =
        content.ok_or_else(|| CryptoError::DecryptionFailed("message has no literal data".into()))?;
    content.signatures = signatures;
    Ok(content)
}

fn collect_content(
    data: &[u8],
    depth: usize,
    content: &mut Option<LiteralContent>,
    signatures: &mut Vec<Signature>,
) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(CryptoError::DecryptionFailed("compressed data is nested too deeply".into()));
    }
    framing::ensure_complete(data).map_err(message_error)?;
    for packet in PacketParser::new(data) {
        match packet.map_err(message_error)? {
            Packet::LiteralData(literal) => {
                if content.is_none() {
                    *content = Some(LiteralContent {
                        data: literal.data().to_vec(),
                        filename: literal_filename(&literal),
                        is_text: !literal.is_binary(),
                        signatures: Vec::new(),
                    });
                }
            }
            Packet::Signature(sig) => signatures.push(sig),
            Packet::CompressedData(compressed) => {
                let inner = decompress(&compressed)?;
                collect_content(&inner, depth + 1, content, signatures)?;
            }
            Packet::OnePassSignature(_) | Packet::Marker(_) => {}
            other => {
                return Err(CryptoError::DecryptionFailed(format!(
                    "unexpected {:?} packet in encrypted data",
                    other.tag()
                )));
            }
        }
    }
    Ok(())
}

fn decompress(compressed: &CompressedData) -> Result<Vec<u8>> {
    let mut reader = compressed.decompress().map_err(|e| {
        CryptoError::DecryptionFailed(format!("unsupported compressed data: {}", e))
    })?;
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::DecryptionFailed(format!("failed to decompress data: {}", e)))?;
    Ok(out)
}

/// Binary message bytes from armored or binary input.
pub(crate) fn dearmor_message(input: &[u8]) -> Result<Vec<u8>> {
    if !armor::is_armored(input) {
        return Ok(input.to_vec());
    }
    let text = std::str::from_utf8(input)
        .map_err(|e| CryptoError::DecryptionFailed(format!("armored message is not UTF-8: {}", e)))?;
    let (kind, body) = armor::decode(text).map_err(message_error)?;
    if kind != BlockType::Message {
        return Err(CryptoError::DecryptionFailed(format!("expected a message block, found {:?}", kind)));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::crypto::pgp::keypair::PgpKeyManager;
    use crate::crypto::symmetric::SymmetricAlgorithm;
    use crate::models::VerificationStatus;
    use pgp::packet::SymEncryptedData;
    use pgp::types::CompressionAlgorithm;

    fn key(pass: &str) -> Key {
        PgpKeyManager::new(EngineConfig::default())
            .generate_key("mia", "example.com", &Passphrase::new(pass), "x25519", 0)
            .unwrap()
    }

    fn text_payload(data: &[u8]) -> Payload<'_> {
        Payload {
            data,
            format: LiteralFormat::Utf8,
            filename: "",
            date: 0,
        }
    }

    fn seal_inner(session: &SessionSplit, inner: &[u8]) -> Vec<u8> {
        let seipd = SymEncryptedProtectedData::encrypt(session.algorithm.into(), &session.key, inner).unwrap();
        let mut out = Vec::new();
        framing::write_packet(&mut out, &seipd).unwrap();
        out
    }

    /// Deflate stream made of one stored block.
    fn stored_deflate(data: &[u8]) -> Vec<u8> {
        let len = data.len() as u16;
        let mut out = vec![0x01];
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let (mut a, mut b) = (1u32, 0u32);
        for &byte in data {
            a = (a + byte as u32) % 65521;
            b = (b + a) % 65521;
        }
        let mut out = vec![0x78, 0x01];
        out.extend(stored_deflate(data));
        out.extend_from_slice(&((b << 16) | a).to_be_bytes());
        out
    }

    fn literal_bytes(text: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let literal = literal_packet(LiteralFormat::Binary, "", 0, text).unwrap();
        framing::write_packet(&mut out, &literal).unwrap();
        out
    }

    #[test]
    fn test_seal_and_open_with_session() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let sealed = seal_data(&session, &text_payload(b"hello world"), None).unwrap();
        let message = ParsedMessage::parse(&sealed).unwrap();
        let content = message.decrypt_with_session(&session).unwrap();
        assert_eq!(content.data, b"hello world");
        assert!(content.is_text);
        assert_eq!(content.verify(None, 0).status, VerificationStatus::NotSigned);
    }

    #[test]
    fn test_line_endings_and_filename_survive() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes128);
        let payload = Payload {
            data: b"a\nb\r\n",
            format: LiteralFormat::Binary,
            filename: "notes.txt",
            date: 1_700_000_000,
        };
        let sealed = seal_data(&session, &payload, None).unwrap();
        let content = ParsedMessage::parse(&sealed).unwrap().decrypt_with_session(&session).unwrap();
        assert_eq!(content.data, b"a\nb\r\n");
        assert_eq!(content.filename, "notes.txt");
        assert!(!content.is_text);
    }

    #[test]
    fn test_tampering_is_detected() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes128);
        let mut sealed = seal_data(&session, &text_payload(b"integrity matters"), None).unwrap();
        let last = sealed.len() - 5;
        sealed[last] ^= 0x01;
        let message = ParsedMessage::parse(&sealed).unwrap();
        assert!(matches!(
            message.decrypt_with_session(&session),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_wrong_session_key_fails_quick_check() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let sealed = seal_data(&session, &text_payload(b"x"), None).unwrap();
        let other = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        match ParsedMessage::parse(&sealed).unwrap().decrypt_with_session(&other) {
            Err(CryptoError::DecryptionFailed(msg)) => {
                // one in 65536 wrong keys passes the quick check and fails the MDC instead
                assert!(msg.contains("does not match") || msg.contains("modification"), "{}", msg);
            }
            other => panic!("unexpected result {:?}", other.map(|c| c.data)),
        }
    }

    #[test]
    fn test_signed_message_for_key() {
        let recipient = key("pw");
        let signer = key("sign").unlock(&Passphrase::new("sign")).unwrap();
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);

        let mut message = key_packets_for(&session, &KeyRing::from_keys(vec![recipient.to_public()]), 0).unwrap();
        let signer_opts = Signer {
            key: &signer,
            hash: HashAlgorithm::Sha256,
            created: 1_700_000_000,
        };
        message.extend(seal_data(&session, &text_payload(b"signed text\n"), Some(&signer_opts)).unwrap());

        let parsed = ParsedMessage::parse(&message).unwrap();
        let ring = KeyRing::from_keys(vec![recipient]);
        let content = parsed.decrypt_with_keys(&ring, Some(&Passphrase::new("pw"))).unwrap();
        assert_eq!(content.data, b"signed text\n");

        let verifiers = KeyRing::from_keys(vec![signer.to_public()]);
        assert_eq!(content.verify(Some(&verifiers), 0).status, VerificationStatus::Ok);
        assert_eq!(content.verify(None, 0).status, VerificationStatus::NoVerifier);
    }

    #[test]
    fn test_password_message() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let mut message = password_packet_for(&session, "secret", HashAlgorithm::Sha256, 0x10).unwrap();
        message.extend(seal_data(&session, &text_payload(b"for your eyes"), None).unwrap());

        let parsed = ParsedMessage::parse(&message).unwrap();
        assert_eq!(parsed.decrypt_with_password("secret").unwrap().data, b"for your eyes");
        assert!(matches!(parsed.decrypt_with_password("wrong"), Err(CryptoError::WrongPassword)));
    }

    #[test]
    fn test_zlib_compressed_literal_decrypts() {
        let session = SessionSplit::generate(SymmetricAlgorithm::Aes256);
        let compressed = CompressedData::from_compressed(CompressionAlgorithm::ZLIB, zlib(&literal_bytes(b"hello world")));
        let mut inner = Vec::new();
        framing::write_packet(&mut inner, &compressed).unwrap();

        let sealed = seal_inner(&session, &inner);
        let content = ParsedMessage::parse(&sealed).unwrap().decrypt_with_session(&session).unwrap();
        assert_eq!(content.data, b"hello world");
    }

    #[test]
    fn test_zip_and_uncompressed_containers() {
        let zip = CompressedData::from_compressed(CompressionAlgorithm::ZIP, stored_deflate(&literal_bytes(b"zip")));
        let mut inner = Vec::new();
        framing::write_packet(&mut inner, &zip).unwrap();
        assert_eq!(read_content(&inner).unwrap().data, b"zip");

        let plain = CompressedData::from_compressed(CompressionAlgorithm::Uncompressed, literal_bytes(b""));
        let mut inner = Vec::new();
        framing::write_packet(&mut inner, &plain).unwrap();
        assert!(read_content(&inner).unwrap().data.is_empty());

        let bzip = CompressedData::from_compressed(CompressionAlgorithm::BZip2, vec![0, 0]);
        let mut inner = Vec::new();
        framing::write_packet(&mut inner, &bzip).unwrap();
        assert!(matches!(read_content(&inner), Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_legacy_and_truncated_packets() {
        let mut legacy = Vec::new();
        let sed = SymEncryptedData::from_slice(Version::New, &[0u8; 40]).unwrap();
        framing::write_packet(&mut legacy, &sed).unwrap();
        assert!(matches!(ParsedMessage::parse(&legacy), Err(CryptoError::DecryptionFailed(_))));

        let session = SessionSplit::generate(SymmetricAlgorithm::Aes128);
        let sealed = seal_data(&session, &text_payload(b"cut short"), None).unwrap();
        assert!(ParsedMessage::parse(&sealed[..sealed.len() - 4]).is_err());
    }
}

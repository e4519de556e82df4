//! Incremental verification of a signed MIME body.
//!
//! Body bytes are canonicalised to CRLF and hashed as they arrive, once per
//! supported hash algorithm, so the signed part never has to be buffered.

use crate::crypto::pgp::armor;
use crate::crypto::pgp::framing;
use crate::crypto::pgp::hash::{HashAlgorithm, Hasher};
use crate::crypto::pgp::keyring::{KeyRing, Material};
use crate::crypto::pgp::signing::{evaluate_all, parse_signatures, VerifiedSignature};
use crate::crypto::utils::LineEndingNormalizer;
use crate::error::Result;
use pgp::armor::BlockType;
use pgp::packet::Signature;

const COLLECTED_HASHES: [HashAlgorithm; 5] = [
    HashAlgorithm::Sha256,
    HashAlgorithm::Sha512,
    HashAlgorithm::Sha1,
    HashAlgorithm::Sha384,
    HashAlgorithm::Sha224,
];

pub struct SignatureCollector {
    normalizer: LineEndingNormalizer,
    hashers: Vec<(HashAlgorithm, Hasher)>,
    scratch: Vec<u8>,
    signatures: Vec<Signature>,
    body_len: usize,
}

impl Default for SignatureCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCollector {
    pub fn new() -> Self {
        Self {
            normalizer: LineEndingNormalizer::default(),
            hashers: COLLECTED_HASHES.iter().map(|h| (*h, h.hasher())).collect(),
            scratch: Vec::new(),
            signatures: Vec::new(),
            body_len: 0,
        }
    }

    /// Feed the next piece of the signed body.
    pub fn accept(&mut self, chunk: &[u8]) {
        self.scratch.clear();
        self.normalizer.feed(chunk, &mut self.scratch);
        for (_, hasher) in &mut self.hashers {
            hasher.update(&self.scratch);
        }
        self.body_len += self.scratch.len();
    }

    /// Record a detached signature (armored or binary) for the body.
    pub fn accept_signature(&mut self, signature: &[u8]) -> Result<()> {
        let parsed = parse_signatures(signature)?;
        log::debug!("Collected {} signature packet(s)", parsed.len());
        self.signatures.extend(parsed);
        Ok(())
    }

    pub fn has_signature(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// Number of canonical body bytes hashed so far.
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Armored form of the collected signatures, empty when none arrived.
    pub fn get_signature(&self) -> String {
        if self.signatures.is_empty() {
            return String::new();
        }
        let mut packets = Vec::new();
        for sig in &self.signatures {
            if let Err(e) = framing::write_packet(&mut packets, sig) {
                log::warn!("Dropping unserializable signature: {}", e);
            }
        }
        armor::encode(BlockType::Signature, &packets, None).unwrap_or_default()
    }

    /// Check the collected signatures over everything accepted so far.
    pub fn verify(&self, verifiers: Option<&KeyRing>, verify_time: i64) -> VerifiedSignature {
        evaluate_all(&self.signatures, verifiers, verify_time, |sig, material| {
            let hash = HashAlgorithm::from_pgp(sig.hash_alg());
            match self.hashers.iter().find(|(alg, _)| Some(*alg) == hash) {
                Some((_, hasher)) => check_forked(sig, material, hasher.clone()).unwrap_or(false),
                None => false,
            }
        })
    }
}

/// Finish a copy of the body hash with the signature's trailer and check it.
fn check_forked(sig: &Signature, material: &Material<'_>, mut hasher: Hasher) -> pgp::errors::Result<bool> {
    let len = sig.config.hash_signature_data(hasher.as_dyn())?;
    hasher.update(&sig.config.trailer(len)?);
    let digest = hasher.finalize();
    if digest.get(..2) != Some(&sig.signed_hash_value[..]) {
        return Ok(false);
    }
    Ok(material.verify_digest(sig.hash_alg(), &digest, &sig.signature).is_ok())
}

//! PGP signatures: creation, detached verification and the status rules
//! shared by every verify path.

use crate::crypto::pgp::armor;
use crate::crypto::pgp::framing;
use crate::crypto::pgp::hash::HashAlgorithm;
use crate::crypto::pgp::keyring::{Key, KeyRing, Material};
use crate::crypto::utils::canonicalize_line_endings;
use crate::error::{signature_error, CryptoError, Result};
use crate::models::VerificationStatus;
use chrono::{DateTime, Utc};
use pgp::armor::{BlockType, Headers};
use pgp::packet::{
    Packet, PacketParser, Signature, SignatureConfig, SignatureType, SignatureVersion, Subpacket, SubpacketData,
};
use pgp::types::{KeyId, KeyVersion};

/// Whether signed data is hashed as-is or as canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    Binary,
    Text,
}

impl SignatureMode {
    fn signature_type(self) -> SignatureType {
        match self {
            SignatureMode::Binary => SignatureType::Binary,
            SignatureMode::Text => SignatureType::Text,
        }
    }
}

/// Result of signature verification.
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    pub status: VerificationStatus,
    /// Key id of the issuer named in the signature, if any.
    pub signer_key_id: Option<String>,
    /// First user id of the matching verifier key.
    pub signer_user_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl VerifiedSignature {
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Ok
    }

    fn unsigned() -> Self {
        Self {
            status: VerificationStatus::NotSigned,
            signer_key_id: None,
            signer_user_id: None,
            created_at: None,
        }
    }
}

/// Signature settings for `material`, stamped with `created`.
pub(crate) fn signature_config(
    material: &Material<'_>,
    typ: SignatureType,
    hash: HashAlgorithm,
    created: i64,
) -> SignatureConfig {
    let created = DateTime::from_timestamp(created.max(0), 0).unwrap_or_default();
    let hashed = vec![
        Subpacket::regular(SubpacketData::SignatureCreationTime(created)),
        Subpacket::regular(SubpacketData::IssuerFingerprint(
            KeyVersion::V4,
            material.fingerprint().into_iter().collect(),
        )),
    ];
    let unhashed = vec![Subpacket::regular(SubpacketData::Issuer(material.key_id()))];
    SignatureConfig::new_v4(SignatureVersion::V4, typ, material.algorithm(), hash.into(), hashed, unhashed)
}

/// PGP signing operations.
pub struct PgpSigner;

impl PgpSigner {
    /// Sign `data` with the signing key of an unlocked `key`.
    pub(crate) fn create_signature(
        key: &Key,
        data: &[u8],
        mode: SignatureMode,
        hash: HashAlgorithm,
        created: i64,
    ) -> Result<Signature> {
        let material = key
            .signing_key()
            .ok_or_else(|| CryptoError::Encryption(format!("key {} has no signing key", key.key_id())))?;
        if !material.is_unlocked() {
            return Err(CryptoError::InvalidState(format!("key {} is not unlocked", key.key_id())));
        }

        let config = signature_config(&material, mode.signature_type(), hash, created);
        let signed = match mode {
            SignatureMode::Binary => material.sign(config, data),
            SignatureMode::Text => material.sign(config, &canonicalize_line_endings(data)[..]),
        };
        signed.map_err(|e| CryptoError::Encryption(format!("Failed to sign: {}", e)))
    }

    /// Create a detached signature packet over `data`.
    pub fn sign_detached(
        key: &Key,
        data: &[u8],
        mode: SignatureMode,
        hash: HashAlgorithm,
        created: i64,
    ) -> Result<Vec<u8>> {
        log::info!("Creating detached PGP signature for {} bytes of data", data.len());
        let signature = Self::create_signature(key, data, mode, hash, created)?;
        let mut out = Vec::new();
        framing::write_packet(&mut out, &signature).map_err(signature_error)?;
        log::info!("Successfully created detached PGP signature with key {}", key.key_id());
        Ok(out)
    }

    /// Armor a binary signature.
    pub fn armor(signature: &[u8], headers: Option<&Headers>) -> Result<String> {
        armor::encode(BlockType::Signature, signature, headers).map_err(signature_error)
    }

    /// Verify a detached signature (armored or binary) over `data`.
    ///
    /// `verify_time` of 0 skips key expiry checks. A structurally valid
    /// signature that does not match is reported through the status.
    pub fn verify_detached(
        signature: &[u8],
        data: &[u8],
        verifiers: &KeyRing,
        verify_time: i64,
    ) -> Result<VerifiedSignature> {
        log::info!("Verifying detached PGP signature for {} bytes of data", data.len());
        let signatures = parse_signatures(signature)?;
        let result = evaluate_all(&signatures, Some(verifiers), verify_time, |sig, material| {
            material.verify(sig, data).is_ok()
        });
        log::info!("Detached signature check finished: {}", result.status);
        Ok(result)
    }
}

/// Parse signature packets from armored or binary input.
pub(crate) fn parse_signatures(data: &[u8]) -> Result<Vec<Signature>> {
    let binary = if armor::is_armored(data) {
        let text = std::str::from_utf8(data)
            .map_err(|e| CryptoError::SignatureParse(format!("armored signature is not UTF-8: {}", e)))?;
        let (kind, body) = armor::decode(text).map_err(signature_error)?;
        if kind != BlockType::Signature {
            return Err(CryptoError::SignatureParse(format!("expected a signature block, found {:?}", kind)));
        }
        body
    } else {
        data.to_vec()
    };

    framing::ensure_complete(&binary).map_err(signature_error)?;
    let mut signatures = Vec::new();
    for packet in PacketParser::new(&binary[..]) {
        if let Packet::Signature(sig) = packet.map_err(signature_error)? {
            signatures.push(sig);
        }
    }
    if signatures.is_empty() {
        return Err(CryptoError::SignatureParse("no signature packet found".into()));
    }
    Ok(signatures)
}

/// Issuer key id: the Issuer subpacket, else the tail of a v4 issuer fingerprint.
pub(crate) fn issuer_of(signature: &Signature) -> Option<KeyId> {
    if let Some(id) = signature.issuer().into_iter().next() {
        return Some(id.clone());
    }
    signature
        .issuer_fingerprint()
        .into_iter()
        .find(|fp| fp.len() == 20)
        .and_then(|fp| KeyId::from_slice(&fp[12..]).ok())
}

/// Whether the signature's own lifetime has run out at `at`.
fn signature_expired(signature: &Signature, at: i64) -> bool {
    let (Some(created), Some(lifetime)) = (signature.created(), signature.signature_expiration_time()) else {
        return false;
    };
    let lifetime = lifetime.num_seconds();
    lifetime > 0 && at > created.timestamp() + lifetime
}

/// Status of one signature against `verifiers` at `verify_time`.
///
/// The cryptographic check runs first; a good signature from a key that
/// is expired (or not yet valid) at `verify_time` reports `KeyExpired`.
fn evaluate_one(
    signature: &Signature,
    verifiers: &KeyRing,
    verify_time: i64,
    check: &impl Fn(&Signature, &Material<'_>) -> bool,
) -> VerifiedSignature {
    let created_at = signature.created().copied();
    let Some(issuer) = issuer_of(signature) else {
        return VerifiedSignature {
            status: VerificationStatus::NoVerifier,
            signer_key_id: None,
            signer_user_id: None,
            created_at,
        };
    };
    let signer_key_id = Some(hex::encode_upper(&issuer));

    let Some((key, material)) = verifiers.find_by_key_id(&issuer) else {
        return VerifiedSignature {
            status: VerificationStatus::NoVerifier,
            signer_key_id,
            signer_user_id: None,
            created_at,
        };
    };

    let status = if !check(signature, &material) {
        VerificationStatus::Failed
    } else if verify_time != 0
        && (key.is_revoked() || key.material_expired(&material, verify_time) || signature_expired(signature, verify_time))
    {
        VerificationStatus::KeyExpired
    } else {
        VerificationStatus::Ok
    };

    VerifiedSignature {
        status,
        signer_key_id,
        signer_user_id: key.user_ids().into_iter().next(),
        created_at,
    }
}

/// Combined status of several signatures: any good one wins, then
/// `Failed`, then `KeyExpired`, then `NoVerifier`.
pub(crate) fn evaluate_all(
    signatures: &[Signature],
    verifiers: Option<&KeyRing>,
    verify_time: i64,
    check: impl Fn(&Signature, &Material<'_>) -> bool,
) -> VerifiedSignature {
    if signatures.is_empty() {
        return VerifiedSignature::unsigned();
    }
    let Some(verifiers) = verifiers.filter(|r| !r.is_empty()) else {
        return VerifiedSignature {
            status: VerificationStatus::NoVerifier,
            ..VerifiedSignature::unsigned()
        };
    };

    let rank = |s: VerificationStatus| match s {
        VerificationStatus::Ok => 0,
        VerificationStatus::Failed => 1,
        VerificationStatus::KeyExpired => 2,
        VerificationStatus::NoVerifier => 3,
        VerificationStatus::NotSigned => 4,
    };
    signatures
        .iter()
        .map(|sig| evaluate_one(sig, verifiers, verify_time, &check))
        .min_by_key(|v| rank(v.status))
        .unwrap_or_else(VerifiedSignature::unsigned)
}

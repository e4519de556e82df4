//! Hash algorithms used by signatures and S2K.

use pgp::crypto::hash::{
    HashAlgorithm as PgpHash, Hasher as _, Sha1Hasher, Sha2_224Hasher, Sha2_256Hasher, Sha2_384Hasher,
    Sha2_512Hasher,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sha224,
}

impl HashAlgorithm {
    pub fn id(self) -> u8 {
        PgpHash::from(self).into()
    }

    /// The engine's name for an algorithm read off the wire.
    pub(crate) fn from_pgp(alg: PgpHash) -> Option<Self> {
        match alg {
            PgpHash::SHA1 => Some(HashAlgorithm::Sha1),
            PgpHash::SHA2_256 => Some(HashAlgorithm::Sha256),
            PgpHash::SHA2_384 => Some(HashAlgorithm::Sha384),
            PgpHash::SHA2_512 => Some(HashAlgorithm::Sha512),
            PgpHash::SHA2_224 => Some(HashAlgorithm::Sha224),
            _ => None,
        }
    }

    pub(crate) fn hasher(self) -> Hasher {
        match self {
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1Hasher::default()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha2_256Hasher::default()),
            HashAlgorithm::Sha384 => Hasher::Sha384(Sha2_384Hasher::default()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha2_512Hasher::default()),
            HashAlgorithm::Sha224 => Hasher::Sha224(Sha2_224Hasher::default()),
        }
    }
}

impl From<HashAlgorithm> for PgpHash {
    fn from(alg: HashAlgorithm) -> Self {
        match alg {
            HashAlgorithm::Sha1 => PgpHash::SHA1,
            HashAlgorithm::Sha256 => PgpHash::SHA2_256,
            HashAlgorithm::Sha384 => PgpHash::SHA2_384,
            HashAlgorithm::Sha512 => PgpHash::SHA2_512,
            HashAlgorithm::Sha224 => PgpHash::SHA2_224,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sha224" => Ok(HashAlgorithm::Sha224),
            other => Err(format!("unknown hash '{}'", other)),
        }
    }
}

/// Incremental hash state that can be forked with `clone`.
///
/// `pgp` hands out hashers as `Box<dyn Hasher>`, which cannot be cloned;
/// signature collection needs to finish one copy per signature while the
/// stream keeps going.
#[derive(Clone)]
pub(crate) enum Hasher {
    Sha1(Sha1Hasher),
    Sha256(Sha2_256Hasher),
    Sha384(Sha2_384Hasher),
    Sha512(Sha2_512Hasher),
    Sha224(Sha2_224Hasher),
}

impl Hasher {
    pub(crate) fn update(&mut self, data: &[u8]) {
        self.as_dyn().update(data);
    }

    /// The state as the trait object `pgp` signature hashing writes into.
    pub(crate) fn as_dyn(&mut self) -> &mut dyn pgp::crypto::hash::Hasher {
        match self {
            Hasher::Sha1(h) => h,
            Hasher::Sha256(h) => h,
            Hasher::Sha384(h) => h,
            Hasher::Sha512(h) => h,
            Hasher::Sha224(h) => h,
        }
    }

    pub(crate) fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => Box::new(h).finish(),
            Hasher::Sha256(h) => Box::new(h).finish(),
            Hasher::Sha384(h) => Box::new(h).finish(),
            Hasher::Sha512(h) => Box::new(h).finish(),
            Hasher::Sha224(h) => Box::new(h).finish(),
        }
    }
}

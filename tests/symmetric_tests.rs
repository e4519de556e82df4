use pmcrypto::crypto::utils::trim_newlines;
use pmcrypto::{decrypt_without_integrity, derive_key, encrypt_without_integrity, CryptoError};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_ctr_decrypt_inverts_encrypt(
        key in prop::sample::select(vec![16usize, 24, 32]).prop_flat_map(|n| prop::collection::vec(any::<u8>(), n)),
        iv in prop::collection::vec(any::<u8>(), 16),
        data in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let ciphertext = encrypt_without_integrity(&key, &data, &iv).unwrap();
        prop_assert_eq!(ciphertext.len(), data.len());
        prop_assert_eq!(decrypt_without_integrity(&key, &ciphertext, &iv).unwrap(), data);
    }

    #[test]
    fn test_trim_newlines_is_idempotent(text in "[a-z \t\n]{0,64}") {
        let once = trim_newlines(&text);
        prop_assert_eq!(trim_newlines(&once), once.clone());
        prop_assert!(!once.contains(" \n") && !once.contains("\t\n"));
    }
}

#[test]
fn test_ctr_rejects_bad_lengths() {
    assert!(matches!(
        encrypt_without_integrity(&[0u8; 15], b"data", &[0u8; 16]),
        Err(CryptoError::InvalidParameter(_))
    ));
    assert!(matches!(
        encrypt_without_integrity(&[0u8; 16], b"data", &[0u8; 8]),
        Err(CryptoError::InvalidParameter(_))
    ));
}

#[test]
fn test_ctr_known_answer() {
    // NIST SP 800-38A F.5.1, first block.
    let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
    let iv = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap();
    let plain = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
    let cipher = encrypt_without_integrity(&key, &plain, &iv).unwrap();
    assert_eq!(hex::encode(cipher), "874d6191b620e3261bef6864990db6ce");
}

#[test]
fn test_derive_key() {
    let a = derive_key("correct horse", b"salt-one", 1024).unwrap();
    let b = derive_key("correct horse", b"salt-one", 1024).unwrap();
    let c = derive_key("correct horse", b"salt-two", 1024).unwrap();
    assert_eq!(a.len(), 32);
    assert_eq!(a, b);
    assert_ne!(a, c);

    assert!(matches!(derive_key("pw", b"salt", 1000), Err(CryptoError::InvalidParameter(_))));
    assert!(matches!(derive_key("pw", b"salt", 512), Err(CryptoError::InvalidParameter(_))));
}

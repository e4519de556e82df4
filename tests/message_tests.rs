mod common;

use anyhow::Result;
use common::{engine, engine_at, init_logging, ALICE, BOB, NOW, RSA_USER};
use pmcrypto::crypto::{Passphrase, PgpKeyManager};
use pmcrypto::{CryptoError, EngineConfig, TimeCache, VerificationStatus};
use std::sync::Arc;

#[test]
fn test_hello_world_round_trip() -> Result<()> {
    init_logging();
    let pm = engine();

    let encrypted = pm.encrypt_message("hello world", &ALICE.public_key, "", "", false)?;
    let decrypted = pm.decrypt_message(&encrypted, &ALICE.private_key, "pw1")?;
    assert_eq!(decrypted, "hello world");

    let wrong = pm.decrypt_message(&encrypted, &ALICE.private_key, "wrong");
    assert!(matches!(wrong, Err(CryptoError::WrongPassphrase)));
    Ok(())
}

#[test]
fn test_rsa_key_from_primes_round_trip() -> Result<()> {
    init_logging();
    let pm = engine();

    let encrypted = pm.encrypt_message("rsa body", &RSA_USER.public_key, &RSA_USER.private_key, "rsa-pass", false)?;
    let result = pm.decrypt_message_verify(&encrypted, &RSA_USER.public_key, &RSA_USER.private_key, "rsa-pass", NOW)?;
    assert_eq!(result.plaintext, "rsa body");
    assert_eq!(result.status, VerificationStatus::Ok);
    Ok(())
}

#[test]
fn test_binary_key_variants() -> Result<()> {
    let pm = engine();

    let encrypted = pm.encrypt_message_bin_key("binary keys", &BOB.public_bin(), &ALICE.private_key, "pw1", true)?;
    assert_eq!(pm.decrypt_message_bin_key(&encrypted, &BOB.private_bin(), "bob-secret")?, "binary keys");

    let verified = pm.decrypt_message_verify_bin_key(&encrypted, &ALICE.public_bin(), &BOB.private_key, "bob-secret", 0)?;
    assert_eq!(verified.status, VerificationStatus::Ok);

    let verified =
        pm.decrypt_message_verify_priv_bin_keys(&encrypted, &ALICE.public_key, &BOB.private_bin(), "bob-secret", 0)?;
    assert_eq!(verified.status, VerificationStatus::Ok);
    Ok(())
}

#[test]
fn test_multiple_private_keys_first_match_wins() -> Result<()> {
    let pm = engine();
    let encrypted = pm.encrypt_message("for bob", &BOB.public_key, &ALICE.private_key, "pw1", false)?;

    // Alice's key comes first in the ring but cannot open the packet.
    let mut ring = ALICE.private_bin();
    ring.extend(BOB.private_bin());
    let result =
        pm.decrypt_message_verify_bin_key_priv_bin_keys(&encrypted, &ALICE.public_bin(), &ring, "bob-secret", NOW)?;
    assert_eq!(result.plaintext, "for bob");
    assert_eq!(result.status, VerificationStatus::Ok);
    Ok(())
}

#[test]
fn test_no_matching_key() -> Result<()> {
    let pm = engine();
    let encrypted = pm.encrypt_message("not for alice", &BOB.public_key, "", "", false)?;
    let result = pm.decrypt_message(&encrypted, &ALICE.private_key, "pw1");
    assert!(matches!(result, Err(CryptoError::NoMatchingKey(_))));
    Ok(())
}

#[test]
fn test_verification_statuses() -> Result<()> {
    let pm = engine();

    let signed = pm.encrypt_message("signed", &BOB.public_key, &ALICE.private_key, "pw1", false)?;
    let unsigned = pm.encrypt_message("unsigned", &BOB.public_key, "", "", false)?;

    let status = |msg: &str, verifier: &str| -> Result<VerificationStatus> {
        Ok(pm.decrypt_message_verify(msg, verifier, &BOB.private_key, "bob-secret", 0)?.status)
    };
    assert_eq!(status(&signed, &ALICE.public_key)?, VerificationStatus::Ok);
    assert_eq!(status(&signed, &BOB.public_key)?, VerificationStatus::NoVerifier);
    assert_eq!(status(&signed, "")?, VerificationStatus::NoVerifier);
    assert_eq!(status(&unsigned, &ALICE.public_key)?, VerificationStatus::NotSigned);

    // A verify time before the signer's key existed reports an expired key.
    let early = pm.decrypt_message_verify(&signed, &ALICE.public_key, &BOB.private_key, "bob-secret", NOW - 3600)?;
    assert_eq!(early.status, VerificationStatus::KeyExpired);
    Ok(())
}

#[test]
fn test_password_messages() -> Result<()> {
    let pm = engine();
    let encrypted = pm.encrypt_message_with_password("shared secret", "hunter2")?;
    assert_eq!(pm.decrypt_message_with_password(&encrypted, "hunter2")?, "shared secret");
    assert!(matches!(
        pm.decrypt_message_with_password(&encrypted, "hunter3"),
        Err(CryptoError::WrongPassword)
    ));
    Ok(())
}

#[test]
fn test_trim_is_idempotent() -> Result<()> {
    let pm = engine();
    let once = pm.encrypt_message("line one   \nline two\t\n", &ALICE.public_key, "", "", true)?;
    let first = pm.decrypt_message(&once, &ALICE.private_key, "pw1")?;
    let twice = pm.encrypt_message(&first, &ALICE.public_key, "", "", true)?;
    assert_eq!(pm.decrypt_message(&twice, &ALICE.private_key, "pw1")?, first);
    assert_eq!(first, "line one\nline two\n");
    Ok(())
}

#[test]
fn test_malformed_inputs() {
    let pm = engine();
    assert!(matches!(
        pm.encrypt_message("x", "not a key", "", "", false),
        Err(CryptoError::KeyParse(_))
    ));
    assert!(pm.decrypt_message("garbage", &ALICE.private_key, "pw1").is_err());
}

#[test]
fn test_key_management() -> Result<()> {
    init_logging();
    let pm = engine();

    let report = pm.check_key(&ALICE.public_key);
    assert!(report.contains("alice <alice@example.com>"));
    assert!(pm.check_key("nonsense").starts_with("Invalid key"));

    assert!(!pm.is_key_expired(&ALICE.public_key)?);
    assert!(!pm.is_key_expired_bin(&ALICE.public_bin())?);

    let updated = pm.update_private_key_passphrase(&ALICE.private_key, "pw1", "new-pass")?;
    let encrypted = pm.encrypt_message("after update", &ALICE.public_key, "", "", false)?;
    assert_eq!(pm.decrypt_message(&encrypted, &updated, "new-pass")?, "after update");
    assert!(matches!(
        pm.update_private_key_passphrase(&ALICE.private_key, "nope", "x"),
        Err(CryptoError::WrongPassphrase)
    ));

    assert!(matches!(
        pm.generate_key("dave", "example.com", "pw", "rsa", 1024),
        Err(CryptoError::InvalidParameter(_))
    ));
    assert!(matches!(
        pm.generate_key("dave", "example.com", "pw", "dsa", 0),
        Err(CryptoError::InvalidParameter(_))
    ));
    Ok(())
}

#[test]
fn test_time_cache_drives_key_selection() -> Result<()> {
    let pm = engine_at(0);
    assert_eq!(pm.get_time(), 0);
    pm.update_time(NOW);
    assert_eq!(pm.get_time(), NOW);
    let encrypted = pm.encrypt_message("timed", &ALICE.public_key, "", "", false)?;
    assert_eq!(pm.decrypt_message(&encrypted, &ALICE.private_key, "pw1")?, "timed");
    Ok(())
}

#[test]
fn test_key_with_lifetime_expires_at_cached_time() -> Result<()> {
    let clock = Arc::new(TimeCache::starting_at(NOW));
    let key = PgpKeyManager::new(EngineConfig::default())
        .with_clock(Arc::clone(&clock))
        .with_key_lifetime(1000)
        .generate_key("erin", "example.com", &Passphrase::new("pw"), "x25519", 0)?;
    assert_eq!(key.expiration_time(), Some(NOW + 1000));
    let public = key.armor_public();

    let pm = engine_at(NOW + 500);
    assert!(!pm.is_key_expired(&public)?);
    pm.update_time(NOW + 1001);
    assert!(pm.is_key_expired(&public)?);

    // the key can no longer be encrypted to once expired
    assert!(matches!(
        pm.encrypt_message("late", &public, "", "", false),
        Err(CryptoError::KeyParse(_))
    ));
    Ok(())
}

//! The `PmCrypto` facade: every engine operation over armored or binary
//! keys, with validity checks evaluated against a shared [`TimeCache`].

use crate::config::EngineConfig;
use crate::crypto::attachment::{decrypt_split_with_keys, decrypt_split_with_password, AttachmentProcessor};
use crate::crypto::mime::{MimeCallbacks, MimeStreamDecryptor};
use crate::crypto::pgp::armor;
use crate::crypto::pgp::keypair::{Passphrase, PgpKeyManager};
use crate::crypto::pgp::keyring::{self, Key, KeyRing};
use crate::crypto::pgp::message::{
    dearmor_message, key_packets_for, password_packet_for, seal_data, LiteralContent, LiteralFormat, ParsedMessage,
    Payload, Signer,
};
use crate::crypto::pgp::session::{open_with_password, open_with_ring, KeyPackets};
use crate::crypto::pgp::signing::{PgpSigner, SignatureMode};
use crate::crypto::utils::{self, trim_newlines};
use crate::error::{key_error, message_error, CryptoError, Result};
use crate::models::{DecryptSignedVerify, EncryptedSplit, SessionSplit};
use crate::time_cache::TimeCache;
use pgp::armor::BlockType;
use std::sync::Arc;

/// OpenPGP engine for mail clients.
pub struct PmCrypto {
    config: EngineConfig,
    clock: Arc<TimeCache>,
    keys: PgpKeyManager,
}

impl Default for PmCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl PmCrypto {
    /// Engine with default configuration and the process-wide clock.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), TimeCache::global())
    }

    pub fn with_config(config: EngineConfig, clock: Arc<TimeCache>) -> Self {
        let keys = PgpKeyManager::new(config.clone()).with_clock(Arc::clone(&clock));
        Self { config, clock, keys }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.clock.now_or_system()
    }

    fn armor_message(&self, binary: &[u8]) -> Result<String> {
        armor::encode(BlockType::Message, binary, Some(&self.config.armor_headers())).map_err(message_error)
    }

    // ---- keys ----

    /// Human-readable summary of a public key; problems are reported in the
    /// text rather than as an error.
    pub fn check_key(&self, public_key: &str) -> String {
        keyring::check_key(public_key.as_bytes(), self.now())
    }

    /// Whether no key in `public_key` can still be encrypted to at the
    /// cached time.
    pub fn is_key_expired(&self, public_key: &str) -> Result<bool> {
        self.is_key_expired_bin(public_key.as_bytes())
    }

    pub fn is_key_expired_bin(&self, public_key: &[u8]) -> Result<bool> {
        let ring = KeyRing::parse(public_key)?;
        let now = self.now();
        let expired = ring.keys().iter().all(|k| k.encryption_key(now).is_none());
        log::debug!("Key expiry check at {}: expired = {}", now, expired);
        Ok(expired)
    }

    /// Re-lock every private key in `private_key` under `new_passphrase`.
    pub fn update_private_key_passphrase(
        &self,
        private_key: &str,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> Result<String> {
        let ring = KeyRing::parse(private_key.as_bytes())?;
        let old = Passphrase::new(old_passphrase);
        let new = Passphrase::new(new_passphrase);
        let mut secret = Vec::new();
        for key in ring.keys() {
            if !key.is_private() {
                return Err(CryptoError::InvalidParameter(format!("key {} is not a private key", key.key_id())));
            }
            secret.extend(self.keys.update_passphrase(key, &old, &new)?.to_secret_bytes()?);
        }
        armor::encode(BlockType::PrivateKey, &secret, Some(&self.config.armor_headers())).map_err(key_error)
    }

    /// Generate an armored, passphrase-locked private key.
    pub fn generate_key(
        &self,
        user_name: &str,
        domain: &str,
        passphrase: &str,
        key_type: &str,
        bits: usize,
    ) -> Result<String> {
        let key = self
            .keys
            .generate_key(user_name, domain, &Passphrase::new(passphrase), key_type, bits)?;
        key.armor_private()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn generate_rsa_key_with_primes(
        &self,
        user_name: &str,
        domain: &str,
        passphrase: &str,
        bits: usize,
        prime_one: &[u8],
        prime_two: &[u8],
        prime_three: &[u8],
        prime_four: &[u8],
    ) -> Result<String> {
        let key = self.keys.generate_rsa_key_with_primes(
            user_name,
            domain,
            &Passphrase::new(passphrase),
            bits,
            [prime_one, prime_two, prime_three, prime_four],
        )?;
        key.armor_private()
    }

    // ---- messages ----

    /// Encrypt text for `public_key`, signing it when `private_key` is not empty.
    pub fn encrypt_message(
        &self,
        plain_text: &str,
        public_key: &str,
        private_key: &str,
        passphrase: &str,
        trim: bool,
    ) -> Result<String> {
        self.encrypt_message_bin_key(plain_text, public_key.as_bytes(), private_key, passphrase, trim)
    }

    pub fn encrypt_message_bin_key(
        &self,
        plain_text: &str,
        public_key: &[u8],
        private_key: &str,
        passphrase: &str,
        trim: bool,
    ) -> Result<String> {
        log::info!("Encrypting message of {} bytes", plain_text.len());
        let recipients = KeyRing::parse(public_key)?;
        let text = if trim { trim_newlines(plain_text) } else { plain_text.to_string() };
        let signing_key = if private_key.is_empty() {
            None
        } else {
            Some(unlock_signer(private_key.as_bytes(), passphrase)?)
        };

        let session = SessionSplit::generate(self.config.cipher);
        let mut message = key_packets_for(&session, &recipients, self.now())?;
        let signer = signing_key.as_ref().map(|key| Signer {
            key,
            hash: self.config.hash,
            created: self.now(),
        });
        message.extend(seal_data(&session, &self.text_payload(text.as_bytes()), signer.as_ref())?);

        log::info!(
            "Successfully encrypted message for {} key(s){}",
            recipients.len(),
            if signer.is_some() { " with signature" } else { "" }
        );
        self.armor_message(&message)
    }

    pub fn encrypt_message_with_password(&self, plain_text: &str, password: &str) -> Result<String> {
        log::info!("Encrypting message of {} bytes with a password", plain_text.len());
        let session = SessionSplit::generate(self.config.cipher);
        let mut message = self.password_packet(&session, password)?;
        message.extend(seal_data(&session, &self.text_payload(plain_text.as_bytes()), None)?);
        self.armor_message(&message)
    }

    fn text_payload<'d>(&self, data: &'d [u8]) -> Payload<'d> {
        Payload {
            data,
            format: LiteralFormat::Utf8,
            filename: "",
            date: self.now(),
        }
    }

    fn password_packet(&self, session: &SessionSplit, password: &str) -> Result<Vec<u8>> {
        password_packet_for(session, password, self.config.hash, self.config.s2k_count)
    }

    pub fn decrypt_message(&self, encrypted_text: &str, private_key: &str, passphrase: &str) -> Result<String> {
        self.decrypt_message_bin_key(encrypted_text, private_key.as_bytes(), passphrase)
    }

    pub fn decrypt_message_bin_key(&self, encrypted_text: &str, private_key: &[u8], passphrase: &str) -> Result<String> {
        let content = self.decrypt_content(encrypted_text, private_key, passphrase)?;
        Ok(into_text(content.data))
    }

    pub fn decrypt_message_with_password(&self, encrypted: &str, password: &str) -> Result<String> {
        log::info!("Decrypting password-protected message");
        let binary = dearmor_message(encrypted.as_bytes())?;
        let content = ParsedMessage::parse(&binary)?.decrypt_with_password(password)?;
        log::info!("Successfully decrypted {} bytes", content.data.len());
        Ok(into_text(content.data))
    }

    fn decrypt_content(&self, encrypted_text: &str, private_keys: &[u8], passphrase: &str) -> Result<LiteralContent> {
        log::info!("Decrypting message of {} bytes", encrypted_text.len());
        let ring = KeyRing::parse(private_keys)?;
        let binary = dearmor_message(encrypted_text.as_bytes())?;
        let content = ParsedMessage::parse(&binary)?.decrypt_with_keys(&ring, Some(&Passphrase::new(passphrase)))?;
        log::info!("Successfully decrypted {} bytes", content.data.len());
        Ok(content)
    }

    /// Decrypt and check the embedded signature against `verifier_key` at
    /// `verify_time` (0 skips expiry checks).
    pub fn decrypt_message_verify(
        &self,
        encrypted_text: &str,
        verifier_key: &str,
        private_key: &str,
        passphrase: &str,
        verify_time: i64,
    ) -> Result<DecryptSignedVerify> {
        self.decrypt_verify(encrypted_text, verifier_key.as_bytes(), private_key.as_bytes(), passphrase, verify_time)
    }

    pub fn decrypt_message_verify_bin_key(
        &self,
        encrypted_text: &str,
        verifier_key: &[u8],
        private_key: &str,
        passphrase: &str,
        verify_time: i64,
    ) -> Result<DecryptSignedVerify> {
        self.decrypt_verify(encrypted_text, verifier_key, private_key.as_bytes(), passphrase, verify_time)
    }

    pub fn decrypt_message_verify_bin_key_priv_bin_keys(
        &self,
        encrypted_text: &str,
        verifier_key: &[u8],
        private_keys: &[u8],
        passphrase: &str,
        verify_time: i64,
    ) -> Result<DecryptSignedVerify> {
        self.decrypt_verify(encrypted_text, verifier_key, private_keys, passphrase, verify_time)
    }

    pub fn decrypt_message_verify_priv_bin_keys(
        &self,
        encrypted_text: &str,
        verifier_key: &str,
        private_keys: &[u8],
        passphrase: &str,
        verify_time: i64,
    ) -> Result<DecryptSignedVerify> {
        self.decrypt_verify(encrypted_text, verifier_key.as_bytes(), private_keys, passphrase, verify_time)
    }

    fn decrypt_verify(
        &self,
        encrypted_text: &str,
        verifier_key: &[u8],
        private_keys: &[u8],
        passphrase: &str,
        verify_time: i64,
    ) -> Result<DecryptSignedVerify> {
        let verifiers = optional_ring(verifier_key)?;
        let content = self.decrypt_content(encrypted_text, private_keys, passphrase)?;
        let verified = content.verify(verifiers.as_ref(), verify_time);
        log::info!("Embedded signature check: {}", verified.status);
        Ok(DecryptSignedVerify {
            plaintext: into_text(content.data),
            status: verified.status,
        })
    }

    // ---- attachments ----

    pub fn encrypt_attachment(&self, plain_data: &[u8], file_name: &str, public_key: &str) -> Result<EncryptedSplit> {
        let mut processor = self.encrypt_attachment_low_memory(plain_data.len(), file_name, public_key)?;
        processor.process(plain_data)?;
        processor.finish()
    }

    /// Streaming attachment encryption; see [`AttachmentProcessor`].
    pub fn encrypt_attachment_low_memory(
        &self,
        estimated_size: usize,
        file_name: &str,
        public_key: &str,
    ) -> Result<AttachmentProcessor> {
        log::info!("Encrypting attachment '{}'", file_name);
        let recipients = KeyRing::parse(public_key.as_bytes())?;
        AttachmentProcessor::new(estimated_size, file_name, &recipients, &self.config, self.now())
    }

    /// Encrypt an attachment with a password, returning an armored message.
    pub fn encrypt_attachment_with_password(&self, plain_data: &[u8], password: &str) -> Result<String> {
        log::info!("Encrypting attachment of {} bytes with a password", plain_data.len());
        let mut processor =
            AttachmentProcessor::with_password(plain_data.len(), "", password, &self.config, self.now())?;
        processor.process(plain_data)?;
        self.armor_message(&processor.finish()?.to_message())
    }

    pub fn decrypt_attachment(
        &self,
        key_packet: &[u8],
        data_packet: &[u8],
        private_key: &str,
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        self.decrypt_attachment_bin_key(key_packet, data_packet, private_key.as_bytes(), passphrase)
    }

    pub fn decrypt_attachment_bin_key(
        &self,
        key_packet: &[u8],
        data_packet: &[u8],
        private_keys: &[u8],
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        log::info!("Decrypting attachment of {} bytes", data_packet.len());
        let ring = KeyRing::parse(private_keys)?;
        let data = decrypt_split_with_keys(key_packet, data_packet, &ring, Some(&Passphrase::new(passphrase)))?;
        log::info!("Successfully decrypted attachment ({} bytes)", data.len());
        Ok(data)
    }

    pub fn decrypt_attachment_with_password(
        &self,
        key_packet: &[u8],
        data_packet: &[u8],
        password: &str,
    ) -> Result<Vec<u8>> {
        log::info!("Decrypting password-protected attachment of {} bytes", data_packet.len());
        decrypt_split_with_password(key_packet, data_packet, password)
    }

    // ---- session keys ----

    pub fn get_session_from_key_packet(
        &self,
        key_packet: &[u8],
        private_key: &str,
        passphrase: &str,
    ) -> Result<SessionSplit> {
        self.get_session_from_key_packet_binkeys(key_packet, private_key.as_bytes(), passphrase)
    }

    pub fn get_session_from_key_packet_binkeys(
        &self,
        key_packet: &[u8],
        private_key: &[u8],
        passphrase: &str,
    ) -> Result<SessionSplit> {
        log::info!("Extracting session key from {} byte key packet", key_packet.len());
        let ring = KeyRing::parse(private_key)?;
        let packets = KeyPackets::parse(&dearmor_message(key_packet)?)?;
        let session = open_with_ring(&packets.pkesks, &ring, Some(&Passphrase::new(passphrase)))?;
        log::info!("Recovered {} session key", session.algorithm);
        Ok(session)
    }

    pub fn get_session_from_symmetric_packet(&self, key_packet: &[u8], password: &str) -> Result<SessionSplit> {
        log::info!("Extracting session key from password packet");
        let packets = KeyPackets::parse(&dearmor_message(key_packet)?)?;
        open_with_password(&packets.skesks, password)
    }

    pub fn key_packet_with_public_key(&self, session: &SessionSplit, public_key: &str) -> Result<Vec<u8>> {
        self.key_packet_with_public_key_bin(session, public_key.as_bytes())
    }

    pub fn key_packet_with_public_key_bin(&self, session: &SessionSplit, public_key: &[u8]) -> Result<Vec<u8>> {
        let ring = KeyRing::parse(public_key)?;
        key_packets_for(session, &ring, self.now())
    }

    pub fn symmetric_key_packet_with_password(&self, session: &SessionSplit, password: &str) -> Result<Vec<u8>> {
        self.password_packet(session, password)
    }

    // ---- detached signatures ----

    pub fn sign_text_detached(&self, plain_text: &str, private_key: &str, passphrase: &str, trim: bool) -> Result<String> {
        self.sign_text_detached_bin_key(plain_text, private_key.as_bytes(), passphrase, trim)
    }

    pub fn sign_text_detached_bin_key(
        &self,
        plain_text: &str,
        private_key: &[u8],
        passphrase: &str,
        trim: bool,
    ) -> Result<String> {
        let text = if trim { trim_newlines(plain_text) } else { plain_text.to_string() };
        self.sign_detached(text.as_bytes(), private_key, passphrase, SignatureMode::Text)
    }

    pub fn sign_bin_detached(&self, plain_data: &[u8], private_key: &str, passphrase: &str) -> Result<String> {
        self.sign_bin_detached_bin_key(plain_data, private_key.as_bytes(), passphrase)
    }

    pub fn sign_bin_detached_bin_key(&self, plain_data: &[u8], private_key: &[u8], passphrase: &str) -> Result<String> {
        self.sign_detached(plain_data, private_key, passphrase, SignatureMode::Binary)
    }

    fn sign_detached(&self, data: &[u8], private_key: &[u8], passphrase: &str, mode: SignatureMode) -> Result<String> {
        let key = unlock_signer(private_key, passphrase)?;
        let signature = PgpSigner::sign_detached(&key, data, mode, self.config.hash, self.now())?;
        PgpSigner::armor(&signature, Some(&self.config.armor_headers()))
    }

    /// `Ok(false)` for a well-formed signature that does not verify.
    pub fn verify_text_sign_detached(
        &self,
        signature: &str,
        plain_text: &str,
        public_key: &str,
        verify_time: i64,
    ) -> Result<bool> {
        self.verify_text_sign_detached_bin_key(signature, plain_text, public_key.as_bytes(), verify_time)
    }

    pub fn verify_text_sign_detached_bin_key(
        &self,
        signature: &str,
        plain_text: &str,
        public_key: &[u8],
        verify_time: i64,
    ) -> Result<bool> {
        let text = trim_newlines(plain_text);
        self.verify_detached(signature, text.as_bytes(), public_key, verify_time)
    }

    pub fn verify_bin_sign_detached(
        &self,
        signature: &str,
        plain_data: &[u8],
        public_key: &str,
        verify_time: i64,
    ) -> Result<bool> {
        self.verify_bin_sign_detached_bin_key(signature, plain_data, public_key.as_bytes(), verify_time)
    }

    pub fn verify_bin_sign_detached_bin_key(
        &self,
        signature: &str,
        plain_data: &[u8],
        public_key: &[u8],
        verify_time: i64,
    ) -> Result<bool> {
        self.verify_detached(signature, plain_data, public_key, verify_time)
    }

    fn verify_detached(&self, signature: &str, data: &[u8], public_key: &[u8], verify_time: i64) -> Result<bool> {
        let verifiers = KeyRing::parse(public_key)?;
        let result = PgpSigner::verify_detached(signature.as_bytes(), data, &verifiers, verify_time)?;
        Ok(result.is_valid())
    }

    // ---- utilities ----

    pub fn random_token(&self) -> Result<Vec<u8>> {
        utils::random_token()
    }

    pub fn random_token_with(&self, size: usize) -> Result<Vec<u8>> {
        utils::random_token_with(size)
    }

    pub fn get_time(&self) -> i64 {
        self.clock.get_time()
    }

    pub fn update_time(&self, new_time: i64) {
        self.clock.update_time(new_time);
    }

    /// Decrypt a PGP/MIME message, delivering parts and the verification
    /// status (or an error) to `callbacks`.
    pub fn decrypt_mime_message(
        &self,
        encrypted_text: &str,
        verifier_key: &[u8],
        private_keys: &[u8],
        passphrase: &str,
        callbacks: &mut dyn MimeCallbacks,
        verify_time: i64,
    ) {
        let rings = KeyRing::parse(private_keys).and_then(|keys| Ok((keys, optional_ring(verifier_key)?)));
        let (private_ring, verifiers) = match rings {
            Ok(rings) => rings,
            Err(e) => {
                callbacks.on_error(e);
                return;
            }
        };
        let passphrase = Passphrase::new(passphrase);
        let mut decryptor = MimeStreamDecryptor::new(&private_ring, Some(&passphrase));
        if let Some(verifiers) = &verifiers {
            decryptor = decryptor.with_verifiers(verifiers, verify_time);
        }
        decryptor.decrypt(encrypted_text.as_bytes(), callbacks);
    }
}

/// Parse `private_key` and unlock the first key able to sign.
fn unlock_signer(private_key: &[u8], passphrase: &str) -> Result<Key> {
    let ring = KeyRing::parse(private_key)?.unlock(&Passphrase::new(passphrase))?;
    ring.keys()
        .iter()
        .find(|k| k.signing_key().is_some())
        .cloned()
        .ok_or_else(|| CryptoError::KeyParse("no private key able to sign".into()))
}

/// An empty input means no verifier.
fn optional_ring(data: &[u8]) -> Result<Option<KeyRing>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    KeyRing::parse(data).map(Some)
}

fn into_text(data: Vec<u8>) -> String {
    match String::from_utf8(data) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

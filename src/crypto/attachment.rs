//! Attachment encryption with a detached key packet.
//!
//! The session key is generated and wrapped when the processor is created,
//! so the key packet is ready before any plaintext arrives.

use crate::config::EngineConfig;
use crate::crypto::pgp::keypair::Passphrase;
use crate::crypto::pgp::keyring::KeyRing;
use crate::crypto::pgp::message::{key_packets_for, password_packet_for, seal_data, LiteralFormat, ParsedMessage, Payload};
use crate::error::{CryptoError, Result};
use crate::models::{EncryptedSplit, SessionSplit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Processing,
    Finished,
}

/// Chunked attachment encryptor.
///
/// Feed plaintext with [`process`](Self::process) and collect the key and
/// data packets with [`finish`](Self::finish). The instance is single-use;
/// calls after `finish` fail with [`CryptoError::InvalidState`].
///
/// Plaintext is buffered until `finish`, where the literal and SEIPD
/// packets are written in one pass, so peak memory is about twice the
/// attachment size. [`buffered_len`](Self::buffered_len) reports how much
/// is held.
pub struct AttachmentProcessor {
    state: ProcessorState,
    file_name: String,
    estimated_size: usize,
    date: i64,
    session: SessionSplit,
    key_packet: Vec<u8>,
    plaintext: Vec<u8>,
}

impl AttachmentProcessor {
    /// Processor encrypting for every key in `recipients`, with encryption
    /// subkeys chosen at `at`.
    pub fn new(
        estimated_size: usize,
        file_name: &str,
        recipients: &KeyRing,
        config: &EngineConfig,
        at: i64,
    ) -> Result<Self> {
        let session = SessionSplit::generate(config.cipher);
        let key_packet = key_packets_for(&session, recipients, at)?;
        Ok(Self::with_key_packet(session, key_packet, estimated_size, file_name, at))
    }

    /// Processor whose key packet is bound to `password`.
    pub fn with_password(
        estimated_size: usize,
        file_name: &str,
        password: &str,
        config: &EngineConfig,
        at: i64,
    ) -> Result<Self> {
        let session = SessionSplit::generate(config.cipher);
        let key_packet = password_packet_for(&session, password, config.hash, config.s2k_count)?;
        Ok(Self::with_key_packet(session, key_packet, estimated_size, file_name, at))
    }

    fn with_key_packet(
        session: SessionSplit,
        key_packet: Vec<u8>,
        estimated_size: usize,
        file_name: &str,
        at: i64,
    ) -> Self {
        log::debug!(
            "Attachment processor created for '{}' (~{} bytes)",
            file_name,
            estimated_size
        );
        Self {
            state: ProcessorState::Created,
            file_name: file_name.to_string(),
            estimated_size,
            date: at.max(0),
            session,
            key_packet,
            plaintext: Vec::with_capacity(estimated_size),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Plaintext bytes held until [`finish`](Self::finish).
    pub fn buffered_len(&self) -> usize {
        self.plaintext.len()
    }

    /// Accept the next chunk of plaintext.
    pub fn process(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state == ProcessorState::Finished {
            return Err(CryptoError::InvalidState("attachment processor already finished".into()));
        }
        self.state = ProcessorState::Processing;
        self.plaintext.extend_from_slice(chunk);
        Ok(())
    }

    /// Encrypt everything accepted so far and return the key and data packets.
    pub fn finish(&mut self) -> Result<EncryptedSplit> {
        if self.state == ProcessorState::Finished {
            return Err(CryptoError::InvalidState("attachment processor already finished".into()));
        }
        let plaintext = std::mem::take(&mut self.plaintext);
        let payload = Payload {
            data: &plaintext,
            format: LiteralFormat::Binary,
            filename: &self.file_name,
            date: self.date,
        };
        let data_packet = seal_data(&self.session, &payload, None)?;
        self.state = ProcessorState::Finished;

        if self.estimated_size != 0 && plaintext.len() > self.estimated_size {
            log::debug!(
                "Attachment '{}' exceeded its estimate: {} > {} bytes",
                self.file_name,
                plaintext.len(),
                self.estimated_size
            );
        }
        log::info!(
            "Encrypted attachment '{}': {} bytes in, {} bytes out",
            self.file_name,
            plaintext.len(),
            data_packet.len()
        );
        Ok(EncryptedSplit {
            key_packet: std::mem::take(&mut self.key_packet),
            data_packet,
        })
    }
}

/// Decrypt a split attachment with private keys.
pub(crate) fn decrypt_split_with_keys(
    key_packet: &[u8],
    data_packet: &[u8],
    ring: &KeyRing,
    passphrase: Option<&Passphrase>,
) -> Result<Vec<u8>> {
    let message = ParsedMessage::parse(&join(key_packet, data_packet))?;
    Ok(message.decrypt_with_keys(ring, passphrase)?.data)
}

/// Decrypt a split attachment with a password.
pub(crate) fn decrypt_split_with_password(key_packet: &[u8], data_packet: &[u8], password: &str) -> Result<Vec<u8>> {
    let message = ParsedMessage::parse(&join(key_packet, data_packet))?;
    Ok(message.decrypt_with_password(password)?.data)
}

fn join(key_packet: &[u8], data_packet: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(key_packet.len() + data_packet.len());
    message.extend_from_slice(key_packet);
    message.extend_from_slice(data_packet);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::pgp::keypair::PgpKeyManager;
    use crate::crypto::pgp::keyring::Key;
    use proptest::prelude::*;

    fn private_key() -> Key {
        PgpKeyManager::new(EngineConfig::default())
            .generate_key("att", "example.com", &Passphrase::new("pw"), "x25519", 0)
            .unwrap()
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            s2k_count: 0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_processor_state_machine() {
        let key = private_key();
        let recipients = KeyRing::from_keys(vec![key.to_public()]);
        let mut processor =
            AttachmentProcessor::new(11, "note.txt", &recipients, &EngineConfig::default(), 1_700_000_000).unwrap();
        assert_eq!(processor.state(), ProcessorState::Created);

        processor.process(b"hello ").unwrap();
        processor.process(b"world").unwrap();
        assert_eq!(processor.state(), ProcessorState::Processing);
        let split = processor.finish().unwrap();
        assert_eq!(processor.state(), ProcessorState::Finished);

        assert!(matches!(processor.process(b"more"), Err(CryptoError::InvalidState(_))));
        assert!(matches!(processor.finish(), Err(CryptoError::InvalidState(_))));

        let ring = KeyRing::from_keys(vec![key]);
        let plain =
            decrypt_split_with_keys(&split.key_packet, &split.data_packet, &ring, Some(&Passphrase::new("pw"))).unwrap();
        assert_eq!(plain, b"hello world");
    }

    #[test]
    fn test_plaintext_is_buffered_until_finish() {
        let mut processor = AttachmentProcessor::with_password(8, "buf", "pw", &fast_config(), 0).unwrap();
        assert_eq!(processor.buffered_len(), 0);
        processor.process(b"1234").unwrap();
        processor.process(b"5678").unwrap();
        assert_eq!(processor.buffered_len(), 8);

        let split = processor.finish().unwrap();
        assert_eq!(processor.buffered_len(), 0);
        assert_eq!(
            decrypt_split_with_password(&split.key_packet, &split.data_packet, "pw").unwrap(),
            b"12345678"
        );
    }

    #[test]
    fn test_empty_attachment() {
        let mut processor = AttachmentProcessor::with_password(0, "empty", "pw", &fast_config(), 0).unwrap();
        let split = processor.finish().unwrap();
        assert!(decrypt_split_with_password(&split.key_packet, &split.data_packet, "pw")
            .unwrap()
            .is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn chunked_processing_decrypts_to_input(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            chunk in 1usize..4096,
        ) {
            let mut processor = AttachmentProcessor::with_password(data.len(), "blob", "pw", &fast_config(), 0).unwrap();
            for part in data.chunks(chunk) {
                processor.process(part).unwrap();
            }
            prop_assert_eq!(processor.buffered_len(), data.len());
            let split = processor.finish().unwrap();
            let plain = decrypt_split_with_password(&split.key_packet, &split.data_packet, "pw").unwrap();
            prop_assert_eq!(plain, data);
        }
    }
}

//! Decryption of PGP/MIME messages with per-part callbacks.
//!
//! The decrypted payload is parsed with `mail-parser`; text bodies,
//! attachments and encrypted header blocks are delivered to a
//! [`MimeCallbacks`] sink, followed by exactly one verification status.
//! An error ends the pass: nothing else is delivered after `on_error`.

use crate::crypto::pgp::keypair::Passphrase;
use crate::crypto::pgp::keyring::KeyRing;
use crate::crypto::pgp::message::{dearmor_message, ParsedMessage};
use crate::crypto::signature_collector::SignatureCollector;
use crate::error::{CryptoError, Result};
use crate::models::VerificationStatus;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};

/// Receiver of decrypted MIME parts.
pub trait MimeCallbacks {
    fn on_body(&mut self, body: &str, mime_type: &str);
    /// `headers` is the raw header block of the part; `data` is transfer-decoded.
    fn on_attachment(&mut self, headers: &str, data: &[u8]);
    fn on_encrypted_headers(&mut self, headers: &str);
    /// Status code of [`VerificationStatus::code`].
    fn on_verified(&mut self, status: i32);
    fn on_error(&mut self, error: CryptoError);
}

/// One delivered callback, for callers that prefer to consume a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeEvent {
    Body { text: String, mime_type: String },
    Attachment { headers: String, data: Vec<u8> },
    EncryptedHeaders(String),
    Verified(VerificationStatus),
    Error(String),
}

/// Sink that records every callback as a [`MimeEvent`].
#[derive(Debug, Default)]
pub struct MimeEventCollector {
    pub events: Vec<MimeEvent>,
}

impl MimeEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_events(self) -> Vec<MimeEvent> {
        self.events
    }
}

impl MimeCallbacks for MimeEventCollector {
    fn on_body(&mut self, body: &str, mime_type: &str) {
        self.events.push(MimeEvent::Body {
            text: body.to_string(),
            mime_type: mime_type.to_string(),
        });
    }

    fn on_attachment(&mut self, headers: &str, data: &[u8]) {
        self.events.push(MimeEvent::Attachment {
            headers: headers.to_string(),
            data: data.to_vec(),
        });
    }

    fn on_encrypted_headers(&mut self, headers: &str) {
        self.events.push(MimeEvent::EncryptedHeaders(headers.to_string()));
    }

    fn on_verified(&mut self, status: i32) {
        let status = VerificationStatus::from_code(status).unwrap_or(VerificationStatus::Failed);
        self.events.push(MimeEvent::Verified(status));
    }

    fn on_error(&mut self, error: CryptoError) {
        self.events.push(MimeEvent::Error(error.to_string()));
    }
}

/// Parts pulled out of a MIME tree, in delivery order.
#[derive(Default)]
struct MimeParts {
    html: Option<String>,
    plain: Option<String>,
    attachments: Vec<(String, Vec<u8>)>,
    encrypted_headers: Vec<String>,
    signature: Option<SignatureCollector>,
}

/// Single-use decryptor for one encrypted MIME message.
pub struct MimeStreamDecryptor<'a> {
    private_keys: &'a KeyRing,
    passphrase: Option<&'a Passphrase>,
    verifiers: Option<&'a KeyRing>,
    verify_time: i64,
}

impl<'a> MimeStreamDecryptor<'a> {
    pub fn new(private_keys: &'a KeyRing, passphrase: Option<&'a Passphrase>) -> Self {
        Self {
            private_keys,
            passphrase,
            verifiers: None,
            verify_time: 0,
        }
    }

    pub fn with_verifiers(mut self, verifiers: &'a KeyRing, verify_time: i64) -> Self {
        self.verifiers = Some(verifiers).filter(|r| !r.is_empty());
        self.verify_time = verify_time;
        self
    }

    /// Decrypt `encrypted` (armored or binary) and deliver its parts to `sink`.
    pub fn decrypt(self, encrypted: &[u8], sink: &mut dyn MimeCallbacks) {
        log::info!("Decrypting MIME message of {} bytes", encrypted.len());
        match self.extract(encrypted) {
            Ok((parts, status)) => {
                let (body, mime_type) = match (parts.html, parts.plain) {
                    (Some(html), _) => (html, "text/html"),
                    (None, Some(plain)) => (plain, "text/plain"),
                    (None, None) => (String::new(), "text/plain"),
                };
                sink.on_body(&body, mime_type);
                for (headers, data) in &parts.attachments {
                    sink.on_attachment(headers, data);
                }
                for headers in &parts.encrypted_headers {
                    sink.on_encrypted_headers(headers);
                }
                log::info!(
                    "MIME message decrypted: {} attachment(s), status {}",
                    parts.attachments.len(),
                    status
                );
                sink.on_verified(status.code());
            }
            Err(e) => {
                log::warn!("MIME decryption failed: {}", e);
                sink.on_error(e);
            }
        }
    }

    fn extract(&self, encrypted: &[u8]) -> Result<(MimeParts, VerificationStatus)> {
        let binary = dearmor_message(encrypted)?;
        let content = ParsedMessage::parse(&binary)?.decrypt_with_keys(self.private_keys, self.passphrase)?;

        let message = MessageParser::default()
            .parse(&content.data)
            .ok_or_else(|| CryptoError::MimeParse("decrypted data is not a MIME message".into()))?;
        let mut parts = MimeParts::default();
        walk(&message, 0, &mut parts)?;

        let status = match &parts.signature {
            Some(collector) if collector.has_signature() => collector.verify(self.verifiers, self.verify_time).status,
            _ => content.verify(self.verifiers, self.verify_time).status,
        };
        Ok((parts, status))
    }
}

fn walk(message: &Message<'_>, id: u32, parts: &mut MimeParts) -> Result<()> {
    let part = message
        .part(id)
        .ok_or_else(|| CryptoError::MimeParse(format!("missing MIME part {}", id)))?;

    match &part.body {
        PartType::Multipart(children) if part.is_content_type("multipart", "signed") => {
            collect_signed(message, part, children, parts)
        }
        PartType::Multipart(children) => {
            for child in children {
                walk(message, *child, parts)?;
            }
            Ok(())
        }
        _ if part.is_content_type("text", "rfc822-headers") => {
            parts
                .encrypted_headers
                .push(String::from_utf8_lossy(part.contents()).into_owned());
            Ok(())
        }
        PartType::Html(text) if !is_attachment(part) && parts.html.is_none() => {
            parts.html = Some(text.to_string());
            Ok(())
        }
        PartType::Text(text) if !is_attachment(part) && parts.plain.is_none() && is_plain(part) => {
            parts.plain = Some(text.to_string());
            Ok(())
        }
        _ => {
            parts.attachments.push((raw_headers(message, part), part.contents().to_vec()));
            Ok(())
        }
    }
}

/// RFC 3156 `multipart/signed`: the first child is the signed entity, the
/// `application/pgp-signature` child carries the signature.
fn collect_signed(message: &Message<'_>, part: &MessagePart<'_>, children: &[u32], parts: &mut MimeParts) -> Result<()> {
    let boundary = part
        .content_type()
        .and_then(|ct| ct.attribute("boundary"))
        .ok_or_else(|| CryptoError::MimeParse("multipart/signed without boundary".into()))?;
    let raw = message
        .raw_message()
        .get(part.offset_body as usize..)
        .unwrap_or_default();
    let signed = signed_entity(raw, boundary)
        .ok_or_else(|| CryptoError::MimeParse("multipart/signed has no signed entity".into()))?;

    let mut collector = SignatureCollector::new();
    collector.accept(signed);
    for child in children.iter().skip(1) {
        if let Some(sig_part) = message.part(*child) {
            if sig_part.is_content_type("application", "pgp-signature") {
                collector.accept_signature(sig_part.contents())?;
            }
        }
    }
    if parts.signature.is_none() {
        parts.signature = Some(collector);
    }

    match children.first() {
        Some(first) => walk(message, *first, parts),
        None => Ok(()),
    }
}

/// Bytes between the first delimiter line and the next one, excluding the
/// line break that belongs to the second delimiter.
fn signed_entity<'r>(raw: &'r [u8], boundary: &str) -> Option<&'r [u8]> {
    let delimiter = format!("--{}", boundary);
    let first = find_delimiter(raw, 0, delimiter.as_bytes())?;
    let start = raw[first..].iter().position(|b| *b == b'\n').map(|p| first + p + 1)?;
    let next = find_delimiter(raw, start, delimiter.as_bytes())?;
    let mut end = next;
    if end > start && raw[end - 1] == b'\n' {
        end -= 1;
        if end > start && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    Some(&raw[start..end])
}

fn find_delimiter(raw: &[u8], from: usize, delimiter: &[u8]) -> Option<usize> {
    (from..raw.len()).find(|&i| (i == 0 || raw[i - 1] == b'\n') && raw[i..].starts_with(delimiter))
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition().is_some_and(|cd| cd.is_attachment())
}

fn is_plain(part: &MessagePart<'_>) -> bool {
    part.content_type()
        .map_or(true, |ct| ct.c_subtype.as_deref().map_or(true, |s| s.eq_ignore_ascii_case("plain")))
}

fn raw_headers(message: &Message<'_>, part: &MessagePart<'_>) -> String {
    message
        .raw_message()
        .get(part.offset_header as usize..part.offset_body as usize)
        .map(|raw| String::from_utf8_lossy(raw).trim_end().to_string())
        .unwrap_or_default()
}

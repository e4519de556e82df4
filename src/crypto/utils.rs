//! Text normalisation and random token helpers

use crate::error::{CryptoError, Result};
use rand::RngCore;

/// Default size of [`random_token`] output in bytes.
pub const DEFAULT_TOKEN_SIZE: usize = 32;

/// Random bytes from the thread-local CSPRNG.
pub fn random_token() -> Result<Vec<u8>> {
    random_token_with(DEFAULT_TOKEN_SIZE)
}

/// `size` random bytes; `size` must be non-zero.
pub fn random_token_with(size: usize) -> Result<Vec<u8>> {
    if size == 0 {
        return Err(CryptoError::InvalidParameter("token size must be positive".into()));
    }
    let mut token = vec![0u8; size];
    rand::thread_rng()
        .try_fill_bytes(&mut token)
        .map_err(|e| CryptoError::Encryption(format!("Failed to generate random token: {}", e)))?;
    Ok(token)
}

/// Strip spaces and tabs that directly precede a `\n` or the end of text.
///
/// Idempotent: trimming already-trimmed text returns it unchanged.
pub fn trim_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        out.push_str(line.trim_end_matches([' ', '\t']));
        if lines.peek().is_some() {
            out.push('\n');
        }
    }
    out
}

/// Rewrite bare `\n` line endings as `\r\n`.
pub fn canonicalize_line_endings(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut prev = 0u8;
    for &b in data {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

/// Streaming form of [`canonicalize_line_endings`] that remembers whether the
/// previous chunk ended in `\r`.
#[derive(Debug, Default, Clone)]
pub(crate) struct LineEndingNormalizer {
    last: u8,
}

impl LineEndingNormalizer {
    pub(crate) fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &b in chunk {
            if b == b'\n' && self.last != b'\r' {
                out.push(b'\r');
            }
            out.push(b);
            self.last = b;
        }
    }
}

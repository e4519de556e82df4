//! ASCII armor over `pgp::armor`, for raw packet bytes and multi-block text.

use pgp::armor::{self, BlockType, Dearmor, Headers};
use pgp::errors::{Error, Result};
use pgp::ser::Serialize;
use std::io::{self, Read};

const BEGIN: &str = "-----BEGIN PGP ";

/// Already serialized packets, written through unchanged.
pub(crate) struct RawPackets<'a>(pub(crate) &'a [u8]);

impl Serialize for RawPackets<'_> {
    fn to_writer<W: io::Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(self.0)?;
        Ok(())
    }
}

/// Armor `data` with optional headers and a CRC-24 checksum line.
pub(crate) fn encode(typ: BlockType, data: &[u8], headers: Option<&Headers>) -> Result<String> {
    let mut out = Vec::with_capacity(data.len() * 4 / 3 + 128);
    armor::write(&RawPackets(data), typ, &mut out, headers.filter(|h| !h.is_empty()), true)?;
    String::from_utf8(out).map_err(|e| Error::Message(format!("armor output is not UTF-8: {}", e)))
}

/// Decode the first armor block in `text`.
pub(crate) fn decode(text: &str) -> Result<(BlockType, Vec<u8>)> {
    decode_all(text)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Message("no armor block found".into()))
}

/// Decode every armor block in `text`, in order.
///
/// `pgp` only reads the first block of a stream, so the text is cut at each
/// BEGIN line and every piece gets its own reader.
pub(crate) fn decode_all(text: &str) -> Result<Vec<(BlockType, Vec<u8>)>> {
    let starts: Vec<usize> = text.match_indices(BEGIN).map(|(i, _)| i).collect();
    let mut blocks = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(text.len());
        let mut reader = Dearmor::new(text[start..end].as_bytes());
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let typ = reader
            .typ
            .ok_or_else(|| Error::Message("armor block without a type".into()))?;
        blocks.push((typ, data));
    }
    Ok(blocks)
}

/// Whether `data` looks like armored text rather than binary packets.
pub(crate) fn is_armored(data: &[u8]) -> bool {
    let head = &data[..data.len().min(1024)];
    String::from_utf8_lossy(head).contains(BEGIN)
}

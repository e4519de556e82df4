//! Packet framing checks around `pgp`'s reader and writer.
//!
//! `pgp` slices short fixed-length bodies without checking the input, and
//! casts body lengths to `u32` when writing a header. Both sides are
//! guarded here.

use pgp::errors::{Error, Result};
use pgp::packet::PacketTrait;

/// Largest body a single fixed-length packet header can describe.
pub(crate) const MAX_PACKET_LEN: usize = u32::MAX as usize;

/// Reject bodies that do not fit a 4-octet length.
pub(crate) fn check_packet_len(len: usize) -> Result<()> {
    if len > MAX_PACKET_LEN {
        return Err(Error::Message(format!(
            "packet body of {} bytes exceeds the {} byte limit",
            len, MAX_PACKET_LEN
        )));
    }
    Ok(())
}

/// Append `packet` with a new-format header after checking its length.
pub(crate) fn write_packet(out: &mut Vec<u8>, packet: &impl PacketTrait) -> Result<()> {
    let body = packet.to_bytes()?;
    check_packet_len(body.len())?;
    packet.packet_version().write_header(out, packet.tag().into(), body.len())?;
    out.extend_from_slice(&body);
    Ok(())
}

/// Walk packet headers and fail if a fixed-length body runs past the input.
///
/// Stops quietly at the first partial or indeterminate length, or at a
/// malformed header; `pgp` reports those itself.
pub(crate) fn ensure_complete(data: &[u8]) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let Some((header, body)) = fixed_header(&data[pos..]) else {
            return Ok(());
        };
        let end = pos + header;
        if data.len() - end < body {
            return Err(Error::PacketIncomplete);
        }
        pos = end + body;
    }
    Ok(())
}

/// Header size and body length of a fixed-length packet.
fn fixed_header(data: &[u8]) -> Option<(usize, usize)> {
    let first = *data.first()?;
    if first & 0x80 == 0 {
        return None;
    }
    let byte = |i: usize| data.get(i).map(|&b| b as usize);
    if first & 0x40 != 0 {
        match byte(1)? {
            len @ 0..=191 => Some((2, len)),
            o1 @ 192..=223 => Some((3, ((o1 - 192) << 8) + byte(2)? + 192)),
            255 => Some((6, u32::from_be_bytes(data.get(2..6)?.try_into().ok()?) as usize)),
            _ => None,
        }
    } else {
        match first & 0x03 {
            0 => Some((2, byte(1)?)),
            1 => Some((3, (byte(1)? << 8) | byte(2)?)),
            2 => Some((5, u32::from_be_bytes(data.get(1..5)?.try_into().ok()?) as usize)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgp::packet::Marker;
    use pgp::types::Version;

    #[test]
    fn test_check_packet_len_limit() {
        assert!(check_packet_len(0).is_ok());
        assert!(check_packet_len(MAX_PACKET_LEN).is_ok());
        assert!(check_packet_len(u32::MAX as usize + 1).is_err());
    }

    #[test]
    fn test_write_packet_uses_new_format_header() {
        let mut out = Vec::new();
        write_packet(&mut out, &Marker::from_slice(Version::New, b"PGP").unwrap()).unwrap();
        assert_eq!(out, vec![0xca, 0x03, b'P', b'G', b'P']);
        assert!(ensure_complete(&out).is_ok());
    }

    #[test]
    fn test_truncated_bodies_are_rejected() {
        // new format, one-octet length 10, three body bytes present
        assert!(matches!(
            ensure_complete(&[0xcb, 10, 1, 2, 3]),
            Err(Error::PacketIncomplete)
        ));
        // old format, two-octet length 0x0100
        assert!(ensure_complete(&[0x85, 0x01, 0x00, 0xff]).is_err());
        // second packet cut short
        assert!(ensure_complete(&[0xcb, 1, 0xaa, 0xcb, 5, 0]).is_err());
    }

    #[test]
    fn test_unknown_framing_is_left_to_the_parser() {
        assert!(ensure_complete(b"not a packet").is_ok());
        // partial body length
        assert!(ensure_complete(&[0xcb, 0xe1, 1]).is_ok());
        assert!(ensure_complete(&[]).is_ok());
    }
}

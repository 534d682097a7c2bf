//! Wire codec for DMTP packets: binary and ASCII framings.
//!
//! Binary:
//! ```text
//! [header:1][type:1][length:1][payload:length]
//! ```
//! ASCII (one line per packet):
//! ```text
//! $HHTT<enc><payload text>[#CS]\n
//! ```
//! where `HH`/`TT` are the header and type in hex, `<enc>` is `=` (base64)
//! or `:` (hex), and `CS` is the XOR of every byte after `$` up to (not
//! including) `#`, as two hex digits.  A missing checksum is accepted.
//! The CSV form (`,`) is recognized but rejected.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::messages::{
    Encoding, ASCII_CHECKSUM_MARKER, ASCII_PACKET_END, ASCII_PACKET_START, HEADER_BASIC,
    MIN_PACKET_LENGTH,
};
use super::packet::{Packet, PacketError, PacketErrorKind};
use super::payload::MAX_PAYLOAD_LENGTH;

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `packet` into wire bytes using `encoding`.
///
/// # Errors
///
/// Returns a [`PacketErrorKind::Encoding`] error for the CSV encoding.
///
/// # Examples
///
/// ```rust
/// use dmtp_core::protocol::{decode_packet, encode_packet, Encoding, Packet};
///
/// let pkt = Packet::property_value(0xF311, &[6, 4, 60]);
/// let wire = encode_packet(&pkt, Encoding::Hex { checksum: true }).unwrap();
/// assert_eq!(wire, b"$E0B0:F31106043C#3A\n".to_vec());
///
/// let back = decode_packet(&wire, true).unwrap();
/// assert_eq!(back.payload(), pkt.payload());
/// ```
pub fn encode_packet(packet: &Packet, encoding: Encoding) -> Result<Vec<u8>, PacketError> {
    let payload = packet.payload();
    match encoding {
        Encoding::Binary => {
            let mut buf = Vec::with_capacity(MIN_PACKET_LENGTH + payload.len());
            buf.push(packet.header());
            buf.push(packet.packet_type());
            buf.push(payload.len() as u8);
            buf.extend_from_slice(payload);
            Ok(buf)
        }
        Encoding::Csv { .. } => Err(PacketError::new(PacketErrorKind::Encoding, packet.clone())),
        Encoding::Base64 { checksum } | Encoding::Hex { checksum } => {
            let mut body = format!("{:02X}{:02X}", packet.header(), packet.packet_type());
            if let Encoding::Base64 { .. } = encoding {
                body.push('=');
                body.push_str(&BASE64.encode(payload));
            } else {
                body.push(':');
                push_hex(&mut body, payload);
            }
            let mut buf = Vec::with_capacity(body.len() + 6);
            buf.push(ASCII_PACKET_START);
            buf.extend_from_slice(body.as_bytes());
            if checksum {
                let cs = ascii_checksum(body.as_bytes());
                buf.push(ASCII_CHECKSUM_MARKER);
                buf.extend_from_slice(format!("{cs:02X}").as_bytes());
            }
            buf.push(ASCII_PACKET_END);
            Ok(buf)
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Parses one complete packet from `bytes`.
///
/// `client_originated` selects which packet-type space the result belongs to.
///
/// # Errors
///
/// Returns a [`PacketError`] carrying the failure kind and whatever header
/// and type had been parsed:
///
/// - a first byte that is neither `$` nor `0xE0`, or an ASCII header other than `E0`: `Header`
/// - fewer than 3 bytes, or a binary length byte that disagrees with the data: `Length`
/// - an unknown or CSV encoding character: `Encoding`
/// - a checksum that does not match: `Checksum`
/// - payload text that does not decode: `Payload`
pub fn decode_packet(bytes: &[u8], client_originated: bool) -> Result<Packet, PacketError> {
    let header = bytes.first().copied().unwrap_or(0);
    if !bytes.is_empty() && header != ASCII_PACKET_START && header != HEADER_BASIC {
        let packet_type = bytes.get(1).copied().unwrap_or(0);
        let partial = Packet::from_parts(client_originated, header, packet_type, &[]);
        return Err(PacketError::new(PacketErrorKind::Header, partial));
    }
    if bytes.len() < MIN_PACKET_LENGTH {
        let partial = Packet::from_parts(client_originated, header, 0, &[]);
        return Err(PacketError::new(PacketErrorKind::Length, partial));
    }
    if header == ASCII_PACKET_START {
        decode_ascii(bytes, client_originated)
    } else {
        decode_binary(bytes, client_originated)
    }
}

fn decode_binary(bytes: &[u8], client_originated: bool) -> Result<Packet, PacketError> {
    let (header, packet_type, len) = (bytes[0], bytes[1], bytes[2] as usize);
    let payload = &bytes[MIN_PACKET_LENGTH..];
    if payload.len() != len {
        let partial = Packet::from_parts(client_originated, header, packet_type, &[]);
        return Err(PacketError::new(PacketErrorKind::Length, partial));
    }
    Ok(Packet::from_parts(client_originated, header, packet_type, payload))
}

fn decode_ascii(bytes: &[u8], client_originated: bool) -> Result<Packet, PacketError> {
    let mut line = &bytes[1..];
    while let Some((&last, rest)) = line.split_last() {
        if last == ASCII_PACKET_END || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }

    // "HHTT" plus the encoding character
    if line.len() < 5 {
        let partial = Packet::from_parts(client_originated, 0, 0, &[]);
        return Err(PacketError::new(PacketErrorKind::Length, partial));
    }
    let Some(header) = parse_hex_byte(&line[0..2]) else {
        let partial = Packet::from_parts(client_originated, 0, 0, &[]);
        return Err(PacketError::new(PacketErrorKind::Header, partial));
    };
    let Some(packet_type) = parse_hex_byte(&line[2..4]) else {
        let partial = Packet::from_parts(client_originated, header, 0, &[]);
        return Err(PacketError::new(PacketErrorKind::Type, partial));
    };
    let partial = || Packet::from_parts(client_originated, header, packet_type, &[]);

    if header != HEADER_BASIC {
        return Err(PacketError::new(PacketErrorKind::Header, partial()));
    }

    let (body, checksum) = match line.iter().rposition(|b| *b == ASCII_CHECKSUM_MARKER) {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    };
    if let Some(cs_text) = checksum {
        let expected = parse_hex_byte(cs_text)
            .filter(|_| cs_text.len() == 2)
            .ok_or_else(|| PacketError::new(PacketErrorKind::Checksum, partial()))?;
        if ascii_checksum(body) != expected {
            return Err(PacketError::new(PacketErrorKind::Checksum, partial()));
        }
    }

    if body.len() < 5 {
        return Err(PacketError::new(PacketErrorKind::Length, partial()));
    }
    let encoding = Encoding::from_ascii_char(body[4], checksum.is_some())
        .filter(|e| !e.is_csv())
        .ok_or_else(|| PacketError::new(PacketErrorKind::Encoding, partial()))?;

    let text = &body[5..];
    let payload = match encoding {
        Encoding::Base64 { .. } => BASE64.decode(text).ok(),
        _ => parse_hex(text),
    }
    .ok_or_else(|| PacketError::new(PacketErrorKind::Payload, partial()))?;
    if payload.len() > MAX_PAYLOAD_LENGTH {
        return Err(PacketError::new(PacketErrorKind::Length, partial()));
    }

    let mut pkt = Packet::from_parts(client_originated, header, packet_type, &payload);
    pkt.set_encoding(encoding);
    Ok(pkt)
}

/// Returns the size of the first complete packet in `buf`, if one is there.
///
/// Stream transports use this to split a byte stream into packets: binary
/// packets are sized by their length byte, ASCII packets end at `\n`.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    match buf.first()? {
        &ASCII_PACKET_START => buf.iter().position(|b| *b == ASCII_PACKET_END).map(|p| p + 1),
        _ => {
            let len = MIN_PACKET_LENGTH + *buf.get(2)? as usize;
            (buf.len() >= len).then_some(len)
        }
    }
}

// ── Checksums ─────────────────────────────────────────────────────────────────

/// XOR of all bytes; the ASCII packet checksum.
pub fn ascii_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Running Fletcher checksum over the encoded bytes of one client block.
///
/// Sent as the 2-byte payload of the closing EOB packet when the session
/// encoding is binary.  Reset at the start of every block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fletcher {
    c0: u32,
    c1: u32,
}

impl Fletcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.c0 = (self.c0 + u32::from(*b)) & 0xFF;
            self.c1 = (self.c1 + self.c0) & 0xFF;
        }
    }

    /// The two checksum bytes `[f0, f1]`.
    pub fn value(&self) -> [u8; 2] {
        let f0 = self.c0.wrapping_sub(self.c1) & 0xFF;
        let f1 = self.c1.wrapping_sub(self.c0.wrapping_mul(2)) & 0xFF;
        [f0 as u8, f1 as u8]
    }
}

// ── Hex helpers ───────────────────────────────────────────────────────────────

fn push_hex(out: &mut String, bytes: &[u8]) {
    use std::fmt::Write as _;
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn parse_hex_byte(pair: &[u8]) -> Option<u8> {
    match pair {
        [hi, lo] => Some((hex_digit(*hi)? << 4) | hex_digit(*lo)?),
        _ => None,
    }
}

fn parse_hex(text: &[u8]) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.chunks(2).map(parse_hex_byte).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{client_types, ServerPacketType};

    fn sample() -> Packet {
        Packet::property_value(0xF311, &[6, 4, 60])
    }

    #[test]
    fn test_binary_encode_layout() {
        let wire = encode_packet(&sample(), Encoding::Binary).unwrap();
        assert_eq!(wire, vec![0xE0, 0xB0, 0x05, 0xF3, 0x11, 6, 4, 60]);
    }

    #[test]
    fn test_binary_round_trip() {
        // Arrange
        let pkt = sample();

        // Act
        let wire = encode_packet(&pkt, Encoding::Binary).unwrap();
        let back = decode_packet(&wire, true).unwrap();

        // Assert
        assert_eq!(back.header(), HEADER_BASIC);
        assert_eq!(back.packet_type(), client_types::PROPERTY_VALUE);
        assert_eq!(back.payload(), pkt.payload());
        assert_eq!(back.encoding(), Encoding::Binary);
    }

    #[test]
    fn test_hex_encode_with_checksum() {
        let wire = encode_packet(&sample(), Encoding::Hex { checksum: true }).unwrap();
        let body = b"E0B0:F31106043C";
        let cs = ascii_checksum(body);
        let expected = format!("$E0B0:F31106043C#{cs:02X}\n");
        assert_eq!(wire, expected.into_bytes());
    }

    #[test]
    fn test_base64_round_trip_preserves_encoding() {
        let enc = Encoding::Base64 { checksum: true };
        let wire = encode_packet(&sample(), enc).unwrap();
        assert!(wire.starts_with(b"$E0B0="));

        let back = decode_packet(&wire, true).unwrap();
        assert_eq!(back.payload(), sample().payload());
        assert_eq!(back.encoding(), enc);
    }

    #[test]
    fn test_ascii_without_checksum_is_accepted() {
        let back = decode_packet(b"$E0A0:0002\n", false).unwrap();
        assert_eq!(back.packet_type(), ServerPacketType::Ack as u8);
        assert_eq!(back.payload(), &[0x00, 0x02]);
        assert_eq!(back.encoding(), Encoding::Hex { checksum: false });
    }

    #[test]
    fn test_ascii_accepts_crlf_and_lowercase_hex() {
        let back = decode_packet(b"$e0a0:00ff\r\n", false).unwrap();
        assert_eq!(back.payload(), &[0x00, 0xFF]);
    }

    #[test]
    fn test_ascii_bad_checksum_is_rejected_with_partial_packet() {
        // Arrange
        let mut wire = encode_packet(&sample(), Encoding::Hex { checksum: true }).unwrap();
        let n = wire.len();
        wire[n - 2] = if wire[n - 2] == b'0' { b'1' } else { b'0' };

        // Act
        let err = decode_packet(&wire, true).unwrap_err();

        // Assert
        assert_eq!(err.kind, PacketErrorKind::Checksum);
        assert_eq!(err.partial.packet_type(), client_types::PROPERTY_VALUE);
        assert_eq!(err.code(), 0xF116);
    }

    #[test]
    fn test_csv_is_rejected() {
        let err = decode_packet(b"$E0A0,1,2\n", false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Encoding);
        assert!(encode_packet(&sample(), Encoding::Csv { checksum: false }).is_err());
    }

    #[test]
    fn test_short_input_is_length_error() {
        let err = decode_packet(&[0xE0, 0xA0], false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Length);
    }

    #[test]
    fn test_unknown_first_byte_is_header_error() {
        let err = decode_packet(&[0x7E, 0xA0, 0x00], false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Header);
        assert_eq!(err.partial.header(), 0x7E);
    }

    #[test]
    fn test_single_stray_byte_is_header_error() {
        let err = decode_packet(&[0x41], false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Header);
        assert_eq!(err.partial.header(), 0x41);
    }

    #[test]
    fn test_binary_length_mismatch() {
        let err = decode_packet(&[0xE0, 0xA0, 0x03, 0x01], false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Length);
        assert_eq!(err.partial.packet_type(), 0xA0);
    }

    #[test]
    fn test_ascii_wrong_header_is_rejected() {
        let err = decode_packet(b"$E1A0:00\n", false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Header);
    }

    #[test]
    fn test_ascii_bad_hex_payload() {
        let err = decode_packet(b"$E0A0:0G\n", false).unwrap_err();
        assert_eq!(err.kind, PacketErrorKind::Payload);
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[0xE0, 0x00, 0x02, 1, 2, 9, 9]), Some(5));
        assert_eq!(frame_length(&[0xE0, 0x00, 0x02, 1]), None);
        assert_eq!(frame_length(b"$E000:\n$E0"), Some(7));
        assert_eq!(frame_length(b"$E000:"), None);
        assert_eq!(frame_length(&[]), None);
    }

    #[test]
    fn test_fletcher_known_value() {
        // Arrange
        let mut f = Fletcher::new();

        // Act – c0 = 1+2 = 3, c1 = 1+3 = 4
        f.update(&[0x01, 0x02]);

        // Assert – f0 = 3-4, f1 = 4-6 (mod 256)
        assert_eq!(f.value(), [0xFF, 0xFE]);

        f.reset();
        assert_eq!(f.value(), [0, 0]);
    }

    #[test]
    fn test_fletcher_is_incremental() {
        let mut whole = Fletcher::new();
        whole.update(&[9, 8, 7, 6, 5]);

        let mut parts = Fletcher::new();
        parts.update(&[9, 8]);
        parts.update(&[7, 6, 5]);

        assert_eq!(whole.value(), parts.value());
    }
}

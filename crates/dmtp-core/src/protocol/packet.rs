//! The [`Packet`] entity and constructors for the client packets the engine emits.
//!
//! A packet is a header byte (always [`HEADER_BASIC`]), a type byte, and up to
//! 255 payload bytes.  Outgoing packets additionally carry queue bookkeeping:
//! a `sent` flag, a delivery [`Priority`], and an acknowledgement sequence.

use thiserror::Error;

use super::messages::{
    client_error, client_types, Encoding, Priority, HEADER_BASIC, SEQUENCE_ALL,
};
use super::payload::{PayloadError, PayloadReader, PayloadWriter, MAX_PAYLOAD_LENGTH};

// ── Parse errors ──────────────────────────────────────────────────────────────

/// Why a packet could not be parsed or encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketErrorKind {
    #[error("invalid packet length")]
    Length,
    #[error("invalid packet header")]
    Header,
    #[error("invalid packet type")]
    Type,
    #[error("unsupported packet encoding")]
    Encoding,
    #[error("packet checksum mismatch")]
    Checksum,
    #[error("invalid packet payload")]
    Payload,
}

impl PacketErrorKind {
    /// The client error code reported to the server for this failure.
    pub fn code(&self) -> u16 {
        match self {
            PacketErrorKind::Length => client_error::PACKET_LENGTH,
            PacketErrorKind::Header => client_error::PACKET_HEADER,
            PacketErrorKind::Type => client_error::PACKET_TYPE,
            PacketErrorKind::Encoding => client_error::PACKET_ENCODING,
            PacketErrorKind::Checksum => client_error::PACKET_CHECKSUM,
            PacketErrorKind::Payload => client_error::PACKET_PAYLOAD,
        }
    }
}

/// A parse or encode failure together with whatever was parsed before it.
///
/// The partial packet is what lets the session answer a malformed server
/// packet with an error report naming the offending header and type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} (header 0x{:02X}, type 0x{:02X})", partial.header(), partial.packet_type())]
pub struct PacketError {
    pub kind: PacketErrorKind,
    pub partial: Packet,
}

impl PacketError {
    pub fn new(kind: PacketErrorKind, partial: Packet) -> Self {
        Self { kind, partial }
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    /// Builds the client error packet that reports this failure.
    pub fn to_error_packet(&self) -> Packet {
        Packet::client_error(self.code(), Some(&self.partial), &[])
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// One DMTP packet, incoming or outgoing.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    client_originated: bool,
    header: u8,
    packet_type: u8,
    payload: Vec<u8>,
    encoding: Encoding,
    /// Set once the packet has been written to a transport in the current session.
    pub sent: bool,
    pub priority: Priority,
    /// Acknowledgement sequence, or [`SEQUENCE_ALL`] when not individually acknowledgeable.
    pub sequence: i64,
}

impl Packet {
    /// Builds a packet from raw parts.  The payload is truncated to 255 bytes.
    pub fn from_parts(client_originated: bool, header: u8, packet_type: u8, payload: &[u8]) -> Self {
        let n = payload.len().min(MAX_PAYLOAD_LENGTH);
        Self {
            client_originated,
            header,
            packet_type,
            payload: payload[..n].to_vec(),
            encoding: Encoding::Binary,
            sent: false,
            priority: Priority::Normal,
            sequence: SEQUENCE_ALL,
        }
    }

    /// A client packet with the given payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Overflow`] if `payload` exceeds 255 bytes.
    pub fn client(packet_type: u8, payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(PayloadError::Overflow {
                needed: payload.len(),
                available: MAX_PAYLOAD_LENGTH,
            });
        }
        Ok(Self::from_parts(true, HEADER_BASIC, packet_type, payload))
    }

    /// A client packet built from a populated payload writer.
    pub fn client_from_writer(packet_type: u8, writer: &PayloadWriter) -> Self {
        Self::from_parts(true, HEADER_BASIC, packet_type, writer.as_bytes())
    }

    /// A server packet with the given payload bytes (used by tests and simulators).
    pub fn server(packet_type: u8, payload: &[u8]) -> Self {
        Self::from_parts(false, HEADER_BASIC, packet_type, payload)
    }

    pub fn is_client_originated(&self) -> bool {
        self.client_originated
    }

    pub fn header(&self) -> u8 {
        self.header
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A read cursor over the payload.
    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.payload)
    }

    /// Encoding this packet arrived in (or was last encoded with).
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn is_event(&self) -> bool {
        self.client_originated && client_types::is_event(self.packet_type)
    }

    pub fn is_identification(&self) -> bool {
        self.client_originated && client_types::is_identification(self.packet_type)
    }

    // ── Client packet builders ────────────────────────────────────────────────

    /// End-of-block packet, optionally carrying the 2-byte block checksum.
    pub fn eob(more: bool, checksum: Option<[u8; 2]>) -> Self {
        let t = if more {
            client_types::EOB_MORE
        } else {
            client_types::EOB_DONE
        };
        let payload: &[u8] = match &checksum {
            Some(cs) => cs,
            None => &[],
        };
        Self::from_parts(true, HEADER_BASIC, t, payload)
    }

    /// Error report: `[code:2][header:1][type:1][extra...]`.
    ///
    /// Header and type are only present when `cause` is given.
    pub fn client_error(code: u16, cause: Option<&Packet>, extra: &[u8]) -> Self {
        let mut w = PayloadWriter::new();
        w.write_ulong(u64::from(code), 2);
        if let Some(p) = cause {
            w.write_ulong(u64::from(p.header), 1);
            w.write_ulong(u64::from(p.packet_type), 1);
        }
        let n = extra.len().min(w.available());
        w.write_bytes(extra, n);
        Self::client_from_writer(client_types::ERROR, &w).with_priority(Priority::High)
    }

    /// Diagnostic report: `[code:2][data...]`.
    pub fn client_diagnostic(code: u16, data: &[u8]) -> Self {
        let mut w = PayloadWriter::new();
        w.write_ulong(u64::from(code), 2);
        let n = data.len().min(w.available());
        w.write_bytes(data, n);
        Self::client_from_writer(client_types::DIAGNOSTIC, &w)
    }

    /// Property value response: `[key:2][value...]`.
    pub fn property_value(key: u16, value: &[u8]) -> Self {
        let mut w = PayloadWriter::new();
        w.write_ulong(u64::from(key), 2);
        let n = value.len().min(w.available());
        w.write_bytes(value, n);
        Self::client_from_writer(client_types::PROPERTY_VALUE, &w)
    }

    /// 6-byte unique id identification packet.
    pub fn unique_id(id: &[u8]) -> Self {
        let mut w = PayloadWriter::new();
        w.write_bytes(id, 6);
        Self::client_from_writer(client_types::UNIQUE_ID, &w).with_priority(Priority::High)
    }

    /// Account id identification packet, truncated to `max_len` bytes.
    pub fn account_id(account: &str, max_len: usize) -> Self {
        Self::id_string(client_types::ACCOUNT_ID, account, max_len)
    }

    /// Device id identification packet, truncated to `max_len` bytes.
    pub fn device_id(device: &str, max_len: usize) -> Self {
        Self::id_string(client_types::DEVICE_ID, device, max_len)
    }

    fn id_string(t: u8, s: &str, max_len: usize) -> Self {
        let n = s.len().min(max_len);
        // Identification strings are sent without a terminator.
        let mut w = PayloadWriter::new();
        w.write_bytes(&s.as_bytes()[..n], n);
        Self::client_from_writer(t, &w).with_priority(Priority::High)
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}[", self.header, self.packet_type)?;
        for b in &self.payload {
            write!(f, "{b:02X}")?;
        }
        f.write_str("]")
    }
}

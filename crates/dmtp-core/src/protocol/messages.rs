//! Protocol constants: packet types, encodings, priorities and error codes.
//!
//! Packet types live in two separate 8-bit spaces: one for packets sent by
//! the client and one for packets sent by the server.  The same byte (e.g.
//! `0xE0`) means different things depending on which side produced it.

// ── Framing constants ─────────────────────────────────────────────────────────

/// The only supported packet header byte.
///
/// `0xE0` is above the ASCII range, so a binary packet can never be confused
/// with the `$`-prefixed ASCII form or with a line delimiter.
pub const HEADER_BASIC: u8 = 0xE0;

/// First byte of every ASCII-encoded packet.
pub const ASCII_PACKET_START: u8 = b'$';

/// Separates the ASCII payload from its optional checksum.
pub const ASCII_CHECKSUM_MARKER: u8 = b'#';

/// Terminates an ASCII packet.
pub const ASCII_PACKET_END: u8 = b'\n';

/// Minimum size of any packet on the wire (`header`, `type`, `length`).
pub const MIN_PACKET_LENGTH: usize = 3;

/// Sequence value for packets that cannot be individually acknowledged, and
/// for an ACK that acknowledges everything sent so far.
pub const SEQUENCE_ALL: i64 = -1;

// ── Client packet types ───────────────────────────────────────────────────────

/// Client-originated packet type codes.
pub mod client_types {
    /// End of block, nothing more to send.
    pub const EOB_DONE: u8 = 0x00;
    /// End of block, more data pending.
    pub const EOB_MORE: u8 = 0x01;
    /// 6-byte unique device identifier.
    pub const UNIQUE_ID: u8 = 0x11;
    /// Account identifier string.
    pub const ACCOUNT_ID: u8 = 0x12;
    /// Device identifier string.
    pub const DEVICE_ID: u8 = 0x13;
    /// Standard-resolution fixed event format.
    pub const FIXED_FMT_STD: u8 = 0x30;
    /// High-resolution fixed event format.
    pub const FIXED_FMT_HIGH: u8 = 0x31;
    /// First custom event format.
    pub const CUSTOM_FORMAT_0: u8 = 0x70;
    /// Last custom event format.
    pub const CUSTOM_FORMAT_F: u8 = 0x7F;
    /// Response to a server GET_PROPERTY.
    pub const PROPERTY_VALUE: u8 = 0xB0;
    /// Custom template definition, 24-bit field descriptors.
    pub const FORMAT_DEF_24: u8 = 0xCF;
    /// Free-form diagnostic report.
    pub const DIAGNOSTIC: u8 = 0xD0;
    /// Client-detected error report.
    pub const ERROR: u8 = 0xE0;

    /// Returns `true` for the identification packet types.
    pub fn is_identification(t: u8) -> bool {
        matches!(t, UNIQUE_ID | ACCOUNT_ID | DEVICE_ID)
    }

    /// Returns `true` for custom event format types.
    pub fn is_custom_format(t: u8) -> bool {
        (CUSTOM_FORMAT_0..=CUSTOM_FORMAT_F).contains(&t)
    }

    /// Returns `true` for any event packet type (fixed or custom).
    pub fn is_event(t: u8) -> bool {
        matches!(t, FIXED_FMT_STD | FIXED_FMT_HIGH) || is_custom_format(t)
    }
}

// ── Server packet types ───────────────────────────────────────────────────────

/// Server-originated packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerPacketType {
    /// Server finished its block; the client may send.
    EobDone = 0x00,
    /// Client may send without waiting for further prompts.
    EobSpeakFreely = 0x01,
    /// Acknowledge events up to a sequence number.
    Ack = 0xA0,
    GetProperty = 0xB0,
    SetProperty = 0xB1,
    FileUpload = 0xC0,
    Error = 0xE0,
    /// End of transmission; the server is closing the session.
    Eot = 0xFF,
}

impl TryFrom<u8> for ServerPacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(ServerPacketType::EobDone),
            0x01 => Ok(ServerPacketType::EobSpeakFreely),
            0xA0 => Ok(ServerPacketType::Ack),
            0xB0 => Ok(ServerPacketType::GetProperty),
            0xB1 => Ok(ServerPacketType::SetProperty),
            0xC0 => Ok(ServerPacketType::FileUpload),
            0xE0 => Ok(ServerPacketType::Error),
            0xFF => Ok(ServerPacketType::Eot),
            _ => Err(()),
        }
    }
}

// ── Encodings ─────────────────────────────────────────────────────────────────

/// Wire encoding of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `[header][type][len][payload]`
    Binary,
    /// `$HHTT=<base64>[#CS]\n`
    Base64 { checksum: bool },
    /// `$HHTT:<hex>[#CS]\n`
    Hex { checksum: bool },
    /// `$HHTT,<csv>[#CS]\n` (recognized but not supported)
    Csv { checksum: bool },
}

/// Bits of the `PROP_COMM_ENCODINGS` property.
pub mod encoding_mask {
    pub const BINARY: u64 = 0x01;
    pub const BASE64: u64 = 0x02;
    pub const HEX: u64 = 0x04;
    pub const CSV: u64 = 0x08;
}

impl Encoding {
    /// The character that follows `$HHTT` in ASCII form.
    pub fn ascii_char(&self) -> Option<u8> {
        match self {
            Encoding::Binary => None,
            Encoding::Base64 { .. } => Some(b'='),
            Encoding::Hex { .. } => Some(b':'),
            Encoding::Csv { .. } => Some(b','),
        }
    }

    /// Decodes the ASCII encoding character (checksum presence is decided
    /// separately, by the presence of the `#` marker).
    pub fn from_ascii_char(c: u8, checksum: bool) -> Option<Encoding> {
        match c {
            b'=' => Some(Encoding::Base64 { checksum }),
            b':' => Some(Encoding::Hex { checksum }),
            b',' => Some(Encoding::Csv { checksum }),
            _ => None,
        }
    }

    pub fn is_ascii(&self) -> bool {
        !matches!(self, Encoding::Binary)
    }

    pub fn has_checksum(&self) -> bool {
        match self {
            Encoding::Binary => false,
            Encoding::Base64 { checksum } | Encoding::Hex { checksum } | Encoding::Csv { checksum } => {
                *checksum
            }
        }
    }

    pub fn is_csv(&self) -> bool {
        matches!(self, Encoding::Csv { .. })
    }

    /// The `PROP_COMM_ENCODINGS` bit for this encoding.
    pub fn mask_bit(&self) -> u64 {
        match self {
            Encoding::Binary => encoding_mask::BINARY,
            Encoding::Base64 { .. } => encoding_mask::BASE64,
            Encoding::Hex { .. } => encoding_mask::HEX,
            Encoding::Csv { .. } => encoding_mask::CSV,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Encoding::Binary => "binary",
            Encoding::Base64 { .. } => "base64",
            Encoding::Hex { .. } => "hex",
            Encoding::Csv { .. } => "csv",
        };
        if self.has_checksum() {
            write!(f, "{name}+checksum")
        } else {
            f.write_str(name)
        }
    }
}

// ── Priority ──────────────────────────────────────────────────────────────────

/// Delivery priority of a queued packet.  Ordered: `None < Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    None,
    Low,
    Normal,
    High,
}

// ── Client error codes ────────────────────────────────────────────────────────

/// Error codes reported by the client in `client_types::ERROR` packets.
pub mod client_error {
    pub const PACKET_HEADER: u16 = 0xF111;
    pub const PACKET_TYPE: u16 = 0xF112;
    pub const PACKET_LENGTH: u16 = 0xF113;
    pub const PACKET_ENCODING: u16 = 0xF114;
    pub const PACKET_PAYLOAD: u16 = 0xF115;
    pub const PACKET_CHECKSUM: u16 = 0xF116;
    /// An ACK did not match any sent event.
    pub const PACKET_ACK: u16 = 0xF117;
    pub const PROTOCOL_ERROR: u16 = 0xF121;
    pub const PROPERTY_READ_ONLY: u16 = 0xF201;
    pub const PROPERTY_WRITE_ONLY: u16 = 0xF202;
    pub const PROPERTY_INVALID_ID: u16 = 0xF211;
    pub const PROPERTY_INVALID_VALUE: u16 = 0xF212;
    pub const PROPERTY_UNKNOWN_ERROR: u16 = 0xF213;
    pub const COMMAND_INVALID: u16 = 0xF311;
    pub const COMMAND_ERROR: u16 = 0xF321;
    pub const UPLOAD_TYPE: u16 = 0xF401;
    pub const GPS_EXPIRED: u16 = 0xF911;
    pub const GPS_FAILURE: u16 = 0xF912;
}

// ── Server error codes ────────────────────────────────────────────────────────

/// Error ("NAK") codes reported by the server in `ServerPacketType::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerError {
    /// The 6-byte unique id is not known to the server.
    IdInvalid,
    AccountInvalid,
    AccountInactive,
    DeviceInvalid,
    DeviceInactive,
    ExcessiveConnections,
    PacketHeader,
    PacketType,
    PacketLength,
    PacketPayload,
    PacketEncoding,
    PacketChecksum,
    BlockChecksum,
    ProtocolError,
    FormatDefinitionInvalid,
    FormatNotSupported,
    FormatNotRecognized,
    ExcessiveEvents,
    DuplicateEvent,
    EventError,
    /// A code this client does not know.
    Other(u16),
}

impl ServerError {
    pub fn from_code(code: u16) -> Self {
        match code {
            0xF011 => ServerError::IdInvalid,
            0xF021 => ServerError::AccountInvalid,
            0xF022 => ServerError::AccountInactive,
            0xF031 => ServerError::DeviceInvalid,
            0xF032 => ServerError::DeviceInactive,
            0xF041 => ServerError::ExcessiveConnections,
            0xF111 => ServerError::PacketHeader,
            0xF112 => ServerError::PacketType,
            0xF113 => ServerError::PacketLength,
            0xF114 => ServerError::PacketEncoding,
            0xF115 => ServerError::PacketPayload,
            0xF116 => ServerError::PacketChecksum,
            0xF117 => ServerError::BlockChecksum,
            0xF121 => ServerError::ProtocolError,
            0xF211 => ServerError::FormatDefinitionInvalid,
            0xF311 => ServerError::FormatNotSupported,
            0xF312 => ServerError::FormatNotRecognized,
            0xF411 => ServerError::ExcessiveEvents,
            0xF412 => ServerError::DuplicateEvent,
            0xF421 => ServerError::EventError,
            other => ServerError::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ServerError::IdInvalid => 0xF011,
            ServerError::AccountInvalid => 0xF021,
            ServerError::AccountInactive => 0xF022,
            ServerError::DeviceInvalid => 0xF031,
            ServerError::DeviceInactive => 0xF032,
            ServerError::ExcessiveConnections => 0xF041,
            ServerError::PacketHeader => 0xF111,
            ServerError::PacketType => 0xF112,
            ServerError::PacketLength => 0xF113,
            ServerError::PacketEncoding => 0xF114,
            ServerError::PacketPayload => 0xF115,
            ServerError::PacketChecksum => 0xF116,
            ServerError::BlockChecksum => 0xF117,
            ServerError::ProtocolError => 0xF121,
            ServerError::FormatDefinitionInvalid => 0xF211,
            ServerError::FormatNotSupported => 0xF311,
            ServerError::FormatNotRecognized => 0xF312,
            ServerError::ExcessiveEvents => 0xF411,
            ServerError::DuplicateEvent => 0xF412,
            ServerError::EventError => 0xF421,
            ServerError::Other(code) => *code,
        }
    }
}

//! Payload templates: field layouts for event packets.
//!
//! A template maps a packet type to an ordered list of fields.  The two fixed
//! event formats are built in; up to sixteen custom formats (`0x70..=0x7F`)
//! can be registered at startup and taught to the server with a
//! `FORMAT_DEF_24` packet:
//!
//! ```text
//! [customType:1][fieldCount:1] { [hiRes:1 bit | fieldType:7 bits][index:1][length:1] } * fieldCount
//! ```
//!
//! # Field scaling
//!
//! | Field       | standard            | high resolution        |
//! |-------------|---------------------|------------------------|
//! | GPS point   | 6 bytes (24-bit)    | 8 bytes (32-bit)       |
//! | speed       | kph                 | 0.1 kph                |
//! | heading     | 360/256 degrees     | 0.01 degrees           |
//! | altitude    | meters, signed      | 0.1 meters, signed     |
//! | distance    | km                  | 0.1 km                 |
//! | hdop        | 1                   | 0.1                    |
//! | accuracy    | meters              | 0.1 meters             |

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::messages::{client_types, ServerPacketType};
use super::packet::Packet;
use super::payload::{PayloadWriter, GPS_POINT_HIGH_LEN, GPS_POINT_STD_LEN, MAX_PAYLOAD_LENGTH};
use super::sequence::SequenceCounter;
use crate::domain::event::GeoEvent;
use crate::protocol::messages::SEQUENCE_ALL;

/// Errors raised while building or parsing templates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("packet type 0x{0:02X} is not a custom event format")]
    NotCustomType(u8),
    #[error("template fields need {0} bytes, more than a packet payload holds")]
    TooLong(usize),
    #[error("unknown field type 0x{0:02X}")]
    UnknownFieldType(u8),
    #[error("unknown field name {0:?}")]
    UnknownFieldName(String),
    #[error("malformed format definition")]
    MalformedDefinition,
}

// ── Fields ────────────────────────────────────────────────────────────────────

/// Field type codes, as carried in the low 7 bits of a field descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    StatusCode = 0x01,
    Timestamp = 0x02,
    Index = 0x03,
    GpsPoint = 0x06,
    GpsAge = 0x07,
    Speed = 0x08,
    Heading = 0x09,
    Altitude = 0x0A,
    Distance = 0x0B,
    Odometer = 0x0C,
    Sequence = 0x0D,
    Accuracy = 0x0F,
    Hdop = 0x17,
    String = 0x50,
    Binary = 0x5A,
}

const ALL_FIELD_TYPES: [FieldType; 15] = [
    FieldType::StatusCode,
    FieldType::Timestamp,
    FieldType::Index,
    FieldType::GpsPoint,
    FieldType::GpsAge,
    FieldType::Speed,
    FieldType::Heading,
    FieldType::Altitude,
    FieldType::Distance,
    FieldType::Odometer,
    FieldType::Sequence,
    FieldType::Accuracy,
    FieldType::Hdop,
    FieldType::String,
    FieldType::Binary,
];

impl FieldType {
    pub fn from_code(code: u8) -> Option<FieldType> {
        ALL_FIELD_TYPES.iter().copied().find(|f| *f as u8 == code)
    }

    /// Name used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::StatusCode => "status",
            FieldType::Timestamp => "timestamp",
            FieldType::Index => "index",
            FieldType::GpsPoint => "gps",
            FieldType::GpsAge => "gps_age",
            FieldType::Speed => "speed",
            FieldType::Heading => "heading",
            FieldType::Altitude => "altitude",
            FieldType::Distance => "distance",
            FieldType::Odometer => "odometer",
            FieldType::Sequence => "sequence",
            FieldType::Accuracy => "accuracy",
            FieldType::Hdop => "hdop",
            FieldType::String => "string",
            FieldType::Binary => "binary",
        }
    }

    pub fn from_name(name: &str) -> Option<FieldType> {
        ALL_FIELD_TYPES
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

/// One field of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub field_type: FieldType,
    pub hi_res: bool,
    /// Sub-index (e.g. which odometer).
    pub index: u8,
    /// Encoded width in bytes.  0 means "rest of payload" in server templates.
    pub length: u8,
}

impl Field {
    pub const fn new(field_type: FieldType, hi_res: bool, index: u8, length: u8) -> Self {
        Self {
            field_type,
            hi_res,
            index,
            length,
        }
    }

    const fn std(field_type: FieldType, length: u8) -> Self {
        Self::new(field_type, false, 0, length)
    }

    const fn high(field_type: FieldType, length: u8) -> Self {
        Self::new(field_type, true, 0, length)
    }

    /// The 3-byte `FORMAT_DEF_24` descriptor.
    pub fn descriptor(&self) -> [u8; 3] {
        let hi = if self.hi_res { 0x80 } else { 0x00 };
        [hi | (self.field_type as u8 & 0x7F), self.index, self.length]
    }

    pub fn from_descriptor(d: [u8; 3]) -> Result<Self, TemplateError> {
        let field_type =
            FieldType::from_code(d[0] & 0x7F).ok_or(TemplateError::UnknownFieldType(d[0] & 0x7F))?;
        Ok(Self::new(field_type, d[0] & 0x80 != 0, d[1], d[2]))
    }
}

// ── Templates ─────────────────────────────────────────────────────────────────

/// Field layout of one packet type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    pub packet_type: u8,
    pub fields: Vec<Field>,
    /// The last field repeats until the payload is exhausted.
    pub repeat_last: bool,
}

impl PayloadTemplate {
    pub fn new(packet_type: u8, fields: Vec<Field>) -> Self {
        Self {
            packet_type,
            fields,
            repeat_last: false,
        }
    }

    /// Standard-resolution fixed event format (0x30).
    pub fn fixed_std() -> Self {
        Self::new(
            client_types::FIXED_FMT_STD,
            vec![
                Field::std(FieldType::StatusCode, 2),
                Field::std(FieldType::Timestamp, 4),
                Field::std(FieldType::GpsPoint, GPS_POINT_STD_LEN as u8),
                Field::std(FieldType::Speed, 1),
                Field::std(FieldType::Heading, 1),
                Field::std(FieldType::Altitude, 2),
                Field::std(FieldType::Distance, 3),
                Field::std(FieldType::Sequence, 1),
            ],
        )
    }

    /// High-resolution fixed event format (0x31).
    pub fn fixed_high() -> Self {
        Self::new(
            client_types::FIXED_FMT_HIGH,
            vec![
                Field::std(FieldType::StatusCode, 2),
                Field::std(FieldType::Timestamp, 4),
                Field::high(FieldType::GpsPoint, GPS_POINT_HIGH_LEN as u8),
                Field::high(FieldType::Speed, 2),
                Field::high(FieldType::Heading, 2),
                Field::high(FieldType::Altitude, 3),
                Field::high(FieldType::Distance, 3),
                Field::std(FieldType::Sequence, 1),
            ],
        )
    }

    /// Sum of the field widths.
    pub fn encoded_length(&self) -> usize {
        self.fields.iter().map(|f| f.length as usize).sum()
    }

    /// The `Sequence` field, if this template carries one.
    pub fn sequence_field(&self) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.field_type == FieldType::Sequence)
    }

    /// Builds the `FORMAT_DEF_24` packet that teaches this template to the server.
    pub fn format_definition_packet(&self) -> Packet {
        let mut w = PayloadWriter::new();
        w.write_ulong(u64::from(self.packet_type), 1);
        w.write_ulong(self.fields.len() as u64, 1);
        for f in &self.fields {
            w.write_bytes(&f.descriptor(), 3);
        }
        Packet::client_from_writer(client_types::FORMAT_DEF_24, &w)
    }

    /// Parses a `FORMAT_DEF_24` payload.
    ///
    /// # Errors
    ///
    /// Fails when the count disagrees with the payload size, a field type is
    /// unknown, or the result would not fit a packet.
    pub fn from_format_definition(payload: &[u8]) -> Result<Self, TemplateError> {
        let [packet_type, count, rest @ ..] = payload else {
            return Err(TemplateError::MalformedDefinition);
        };
        if rest.len() != *count as usize * 3 {
            return Err(TemplateError::MalformedDefinition);
        }
        let fields = rest
            .chunks_exact(3)
            .map(|c| Field::from_descriptor([c[0], c[1], c[2]]))
            .collect::<Result<Vec<_>, _>>()?;
        let t = Self::new(*packet_type, fields);
        t.validate_custom()?;
        Ok(t)
    }

    fn validate_custom(&self) -> Result<(), TemplateError> {
        if !client_types::is_custom_format(self.packet_type) {
            return Err(TemplateError::NotCustomType(self.packet_type));
        }
        let len = self.encoded_length();
        if len > MAX_PAYLOAD_LENGTH {
            return Err(TemplateError::TooLong(len));
        }
        Ok(())
    }

    /// Minimum payload length a server packet must carry for this template.
    pub fn min_length(&self) -> usize {
        self.encoded_length()
    }
}

/// Layout of server packet payloads, used to validate incoming packets
/// before they are dispatched.
pub fn server_template(t: ServerPacketType) -> PayloadTemplate {
    let bin = |len| Field::std(FieldType::Binary, len);
    let (fields, repeat_last) = match t {
        ServerPacketType::EobDone
        | ServerPacketType::EobSpeakFreely
        | ServerPacketType::Eot => (vec![], false),
        // sequence is 0..=4 bytes; empty means "all"
        ServerPacketType::Ack => (vec![Field::std(FieldType::Sequence, 0)], false),
        ServerPacketType::GetProperty => (vec![bin(2)], true),
        ServerPacketType::SetProperty => (vec![bin(2), bin(0)], false),
        ServerPacketType::FileUpload => (vec![bin(0)], false),
        // code, then optional header/type/extra
        ServerPacketType::Error => (vec![bin(2), bin(0)], false),
    };
    PayloadTemplate {
        packet_type: t as u8,
        fields,
        repeat_last,
    }
}

// ── Event encoding ────────────────────────────────────────────────────────────

fn unsigned(value: f64, len: usize) -> u64 {
    let max = if len >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * len)) - 1
    };
    let v = value.round();
    if v <= 0.0 {
        0
    } else if v >= max as f64 {
        max
    } else {
        v as u64
    }
}

fn signed(value: f64, len: usize) -> i64 {
    let bits = (8 * len.clamp(1, 8)) as u32;
    let max = i64::MAX >> (64 - bits);
    let min = -max - 1;
    (value.round() as i64).clamp(min, max)
}

/// Encodes `event` as an event packet laid out by `template`.
///
/// The packet gets an acknowledgement sequence only when the template has a
/// `Sequence` field; otherwise it is [`SEQUENCE_ALL`].
pub fn encode_event(template: &PayloadTemplate, event: &GeoEvent, counter: &SequenceCounter) -> Packet {
    let mut w = PayloadWriter::new();
    let mut sequence = SEQUENCE_ALL;
    for f in &template.fields {
        let len = f.length as usize;
        let hi = f.hi_res;
        match f.field_type {
            FieldType::StatusCode => w.write_ulong(u64::from(event.status_code), len),
            FieldType::Timestamp => w.write_ulong(u64::from(event.timestamp), len),
            FieldType::Index => w.write_ulong(u64::from(event.index), len),
            FieldType::GpsPoint => w.write_gps(&event.point, len),
            FieldType::GpsAge => w.write_ulong(u64::from(event.gps_age()), len),
            FieldType::Speed => {
                let v = if hi { event.speed_kph * 10.0 } else { event.speed_kph };
                w.write_ulong(unsigned(v, len), len)
            }
            FieldType::Heading => {
                let h = event.heading.rem_euclid(360.0);
                let v = if hi {
                    unsigned(h * 100.0, len)
                } else {
                    unsigned(h * 256.0 / 360.0, len) % 256
                };
                w.write_ulong(v, len)
            }
            FieldType::Altitude => {
                let v = if hi { event.altitude * 10.0 } else { event.altitude };
                w.write_long(signed(v, len), len)
            }
            FieldType::Distance | FieldType::Odometer => {
                let km = if f.field_type == FieldType::Distance {
                    event.distance_km
                } else {
                    event.odometer_km
                };
                let v = if hi { km * 10.0 } else { km };
                w.write_ulong(unsigned(v, len), len)
            }
            FieldType::Hdop | FieldType::Accuracy => {
                let raw = if f.field_type == FieldType::Hdop {
                    event.hdop
                } else {
                    event.accuracy_m
                };
                let v = if hi { raw * 10.0 } else { raw };
                w.write_ulong(unsigned(v, len), len)
            }
            FieldType::Sequence => {
                let seq = counter.next_masked(len);
                sequence = i64::from(seq);
                w.write_ulong(u64::from(seq), len)
            }
            FieldType::String | FieldType::Binary => w.write_bytes(&[], len),
        };
    }
    Packet::client_from_writer(template.packet_type, &w).with_sequence(sequence)
}

/// Decodes an event payload laid out by `template`.
///
/// Fields missing from a short payload keep their default values.
pub fn decode_event(template: &PayloadTemplate, payload: &[u8]) -> GeoEvent {
    let mut r = super::payload::PayloadReader::new(payload);
    let mut ev = GeoEvent::default();
    for f in &template.fields {
        let len = f.length as usize;
        let scale = if f.hi_res { 10.0 } else { 1.0 };
        match f.field_type {
            FieldType::StatusCode => ev.status_code = r.read_ulong(len, 0) as u16,
            FieldType::Timestamp => ev.timestamp = r.read_ulong(len, 0) as u32,
            FieldType::Index => ev.index = r.read_ulong(len, 0) as u32,
            FieldType::GpsPoint => {
                let fixtime = ev.point.fixtime;
                ev.point = r.read_gps(len);
                ev.point.fixtime = fixtime;
            }
            FieldType::GpsAge => {
                let age = r.read_ulong(len, 0) as u32;
                if age > 0 {
                    ev.point.fixtime = ev.timestamp.saturating_sub(age);
                }
            }
            FieldType::Speed => ev.speed_kph = r.read_ulong(len, 0) as f64 / scale,
            FieldType::Heading => {
                let raw = r.read_ulong(len, 0) as f64;
                ev.heading = if f.hi_res { raw / 100.0 } else { raw * 360.0 / 256.0 };
            }
            FieldType::Altitude => ev.altitude = r.read_long(len, 0) as f64 / scale,
            FieldType::Distance => ev.distance_km = r.read_ulong(len, 0) as f64 / scale,
            FieldType::Odometer => ev.odometer_km = r.read_ulong(len, 0) as f64 / scale,
            FieldType::Hdop => ev.hdop = r.read_ulong(len, 0) as f64 / scale,
            FieldType::Accuracy => ev.accuracy_m = r.read_ulong(len, 0) as f64 / scale,
            FieldType::Sequence => ev.sequence = r.read_ulong(len, 0) as u32,
            FieldType::String | FieldType::Binary => {
                r.read_bytes(len);
            }
        }
    }
    ev
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Client-side template lookup: the fixed formats plus registered custom ones.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<u8, PayloadTemplate>,
}

impl TemplateRegistry {
    /// A registry holding the two fixed formats.
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        for t in [PayloadTemplate::fixed_std(), PayloadTemplate::fixed_high()] {
            templates.insert(t.packet_type, t);
        }
        Self { templates }
    }

    /// Registers (or replaces) a custom event template.
    ///
    /// # Errors
    ///
    /// Rejects types outside `0x70..=0x7F` and layouts over 255 bytes.
    pub fn register(&mut self, template: PayloadTemplate) -> Result<(), TemplateError> {
        template.validate_custom()?;
        debug!(
            packet_type = template.packet_type,
            fields = template.fields.len(),
            "registered custom event template"
        );
        self.templates.insert(template.packet_type, template);
        Ok(())
    }

    pub fn get(&self, packet_type: u8) -> Option<&PayloadTemplate> {
        self.templates.get(&packet_type)
    }

    /// Registered custom templates, ordered by packet type.
    pub fn custom_templates(&self) -> Vec<&PayloadTemplate> {
        let mut v: Vec<_> = self
            .templates
            .values()
            .filter(|t| client_types::is_custom_format(t.packet_type))
            .collect();
        v.sort_by_key(|t| t.packet_type);
        v
    }

    /// The `FORMAT_DEF_24` packet for a registered custom type.
    pub fn format_definition(&self, packet_type: u8) -> Option<Packet> {
        self.get(packet_type)
            .filter(|t| client_types::is_custom_format(t.packet_type))
            .map(PayloadTemplate::format_definition_packet)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Property value types and their text and wire representations.
//!
//! Every property has a [`PropType`] that fixes how its value is stored
//! ([`PropValue`]), how it is written in text form (defaults and the
//! auxiliary store use `"6,4,60"`, `"16.1"`, `"0x0102AB"`, `"time/lat/lon"`),
//! and how it is serialized into GET/SET property payloads.

use thiserror::Error;

use crate::domain::geo::GeoPoint;
use crate::protocol::payload::{PayloadReader, PayloadWriter, GPS_POINT_HIGH_LEN, GPS_POINT_STD_LEN};

/// Storage and wire type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropType {
    /// Write-only trigger routed to a command handler.
    Command,
    /// Fix time plus a GPS point.
    Gps,
    String,
    Binary,
    Boolean,
    UInt32,
    UInt16,
    Int16,
    UInt8,
    /// Unsigned decimal carried as a scaled 4-byte integer.
    UDec32,
    Dec32,
    UDec16,
    Dec16,
}

impl PropType {
    /// Bytes per element for numeric types, 0 otherwise.
    pub fn width(&self) -> usize {
        match self {
            PropType::Boolean | PropType::UInt8 => 1,
            PropType::UInt16 | PropType::Int16 | PropType::UDec16 | PropType::Dec16 => 2,
            PropType::UInt32 | PropType::UDec32 | PropType::Dec32 => 4,
            PropType::Command | PropType::Gps | PropType::String | PropType::Binary => 0,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, PropType::Int16 | PropType::Dec32 | PropType::Dec16)
    }

    pub fn is_decimal(&self) -> bool {
        matches!(
            self,
            PropType::UDec32 | PropType::Dec32 | PropType::UDec16 | PropType::Dec16
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PropType::UInt32 | PropType::UInt16 | PropType::Int16 | PropType::UInt8
        )
    }

    /// Smallest and largest raw (scaled) value that fits the wire width.
    pub fn raw_range(&self) -> (i64, i64) {
        let bits = 8 * self.width() as u32;
        if bits == 0 {
            return (0, 0);
        }
        if self.is_signed() {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        }
    }
}

/// Current value of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Command,
    Gps(GeoPoint),
    Text(String),
    Bytes(Vec<u8>),
    Flags(Vec<bool>),
    Integers(Vec<i64>),
    Decimals(Vec<f64>),
}

/// Why a text or wire value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValueError(pub String);

fn bad(msg: impl Into<String>) -> ValueError {
    ValueError(msg.into())
}

/// Shape information needed to convert a value.
#[derive(Debug, Clone, Copy)]
pub struct ValueShape {
    pub prop_type: PropType,
    pub arity: usize,
    pub decimals: u8,
    /// Max bytes for strings and binary, total wire bytes (10 or 12) for GPS.
    pub length: usize,
}

impl ValueShape {
    fn multiplier(&self) -> f64 {
        10f64.powi(i32::from(self.decimals))
    }

    fn clamp_integer(&self, v: i64) -> i64 {
        let (min, max) = self.prop_type.raw_range();
        v.clamp(min, max)
    }

    fn clamp_decimal(&self, v: f64) -> f64 {
        let (min, max) = self.prop_type.raw_range();
        let m = self.multiplier();
        v.clamp(min as f64 / m, max as f64 / m)
    }

    /// Normalizes a value into the storage limits of this shape.
    pub fn normalize(&self, value: PropValue) -> PropValue {
        match value {
            PropValue::Integers(v) => PropValue::Integers(v.into_iter().map(|x| self.clamp_integer(x)).collect()),
            PropValue::Decimals(v) => PropValue::Decimals(v.into_iter().map(|x| self.clamp_decimal(x)).collect()),
            PropValue::Text(mut s) => {
                truncate_utf8(&mut s, self.length);
                PropValue::Text(s)
            }
            PropValue::Bytes(mut b) => {
                b.truncate(self.length);
                PropValue::Bytes(b)
            }
            other => other,
        }
    }

    // ── Text form ─────────────────────────────────────────────────────────────

    /// Parses the text form of a value.
    pub fn parse_text(&self, text: &str) -> Result<PropValue, ValueError> {
        let text = text.trim();
        let value = match self.prop_type {
            PropType::Command => PropValue::Command,
            PropType::String => PropValue::Text(text.to_string()),
            PropType::Binary => PropValue::Bytes(parse_hex_text(text)?),
            PropType::Gps => PropValue::Gps(parse_gps_text(text)?),
            PropType::Boolean => PropValue::Flags(self.parse_list(text, parse_bool)?),
            t if t.is_decimal() => PropValue::Decimals(self.parse_list(text, |s| {
                s.parse::<f64>().map_err(|_| bad(format!("not a number: {s:?}")))
            })?),
            _ => PropValue::Integers(self.parse_list(text, parse_integer)?),
        };
        Ok(self.normalize(value))
    }

    fn parse_list<T: Clone + Default>(
        &self,
        text: &str,
        parse: impl Fn(&str) -> Result<T, ValueError>,
    ) -> Result<Vec<T>, ValueError> {
        let mut out = Vec::with_capacity(self.arity);
        if !text.is_empty() {
            for item in text.split(',').take(self.arity) {
                out.push(parse(item.trim())?);
            }
        }
        out.resize(self.arity, T::default());
        Ok(out)
    }

    /// Formats a value in its text form.
    pub fn format_text(&self, value: &PropValue) -> String {
        let join = |items: Vec<String>| items.join(",");
        match value {
            PropValue::Command => String::new(),
            PropValue::Text(s) => s.clone(),
            PropValue::Bytes(b) if b.is_empty() => String::new(),
            PropValue::Bytes(b) => {
                let mut s = String::from("0x");
                for x in b {
                    s.push_str(&format!("{x:02X}"));
                }
                s
            }
            PropValue::Gps(p) if !p.is_valid() => String::new(),
            PropValue::Gps(p) => format!("{}/{:.6}/{:.6}", p.fixtime, p.latitude, p.longitude),
            PropValue::Flags(v) => join(v.iter().map(|b| String::from(if *b { "1" } else { "0" })).collect()),
            PropValue::Integers(v) => join(v.iter().map(i64::to_string).collect()),
            PropValue::Decimals(v) => {
                let d = usize::from(self.decimals);
                join(v.iter().map(|x| format!("{:.*}", d, x)).collect())
            }
        }
    }

    // ── Wire form ─────────────────────────────────────────────────────────────

    /// Serializes a value for a PROPERTY_VALUE payload.
    pub fn encode(&self, value: &PropValue, w: &mut PayloadWriter) {
        let width = self.prop_type.width();
        match value {
            PropValue::Command => {}
            PropValue::Text(s) => {
                let n = s.len().min(self.length);
                w.write_bytes(&s.as_bytes()[..n], n);
            }
            PropValue::Bytes(b) => {
                w.write_bytes(b, b.len());
            }
            PropValue::Gps(p) => {
                let point_len = self.gps_point_len();
                w.write_ulong(u64::from(p.fixtime), 4);
                w.write_gps(p, point_len);
            }
            PropValue::Flags(v) => {
                for b in v {
                    w.write_ulong(u64::from(*b), width);
                }
            }
            PropValue::Integers(v) => {
                for x in v {
                    w.write_long(*x, width);
                }
            }
            PropValue::Decimals(v) => {
                let m = self.multiplier();
                for x in v {
                    w.write_long(self.clamp_integer((x * m).round() as i64), width);
                }
            }
        }
    }

    /// Deserializes a SET_PROPERTY value.  Numeric payloads may carry fewer
    /// elements than the arity; the remaining elements keep `current` values.
    pub fn decode(&self, bytes: &[u8], current: &PropValue) -> Result<PropValue, ValueError> {
        let width = self.prop_type.width();
        let mut r = PayloadReader::new(bytes);
        let value = match (self.prop_type, current) {
            (PropType::Command, _) => PropValue::Command,
            (PropType::String, _) => {
                let s = r.read_string(self.length.max(bytes.len()));
                PropValue::Text(s)
            }
            (PropType::Binary, _) => PropValue::Bytes(bytes.to_vec()),
            (PropType::Gps, _) => {
                let point_len = match bytes.len() {
                    n if n == 4 + GPS_POINT_STD_LEN => GPS_POINT_STD_LEN,
                    n if n == 4 + GPS_POINT_HIGH_LEN => GPS_POINT_HIGH_LEN,
                    n => return Err(bad(format!("GPS value must be 10 or 12 bytes, got {n}"))),
                };
                let fixtime = r.read_ulong(4, 0) as u32;
                let mut p = r.read_gps(point_len);
                p.fixtime = fixtime;
                PropValue::Gps(p)
            }
            (_, current) => {
                let count = (bytes.len() / width).min(self.arity);
                if count == 0 {
                    return Err(bad(format!("need at least {width} bytes, got {}", bytes.len())));
                }
                let raw: Vec<i64> = (0..count)
                    .map(|_| {
                        if self.prop_type.is_signed() {
                            r.read_long(width, 0)
                        } else {
                            r.read_ulong(width, 0) as i64
                        }
                    })
                    .collect();
                match current {
                    PropValue::Flags(old) => {
                        let mut v = old.clone();
                        overlay(&mut v, raw.iter().map(|x| *x != 0));
                        PropValue::Flags(v)
                    }
                    PropValue::Decimals(old) => {
                        let m = self.multiplier();
                        let mut v = old.clone();
                        overlay(&mut v, raw.iter().map(|x| *x as f64 / m));
                        PropValue::Decimals(v)
                    }
                    PropValue::Integers(old) => {
                        let mut v = old.clone();
                        overlay(&mut v, raw.into_iter());
                        PropValue::Integers(v)
                    }
                    _ => return Err(bad("value does not match property type")),
                }
            }
        };
        Ok(self.normalize(value))
    }

    fn gps_point_len(&self) -> usize {
        if self.length == 4 + GPS_POINT_HIGH_LEN {
            GPS_POINT_HIGH_LEN
        } else {
            GPS_POINT_STD_LEN
        }
    }
}

fn overlay<T>(dst: &mut [T], src: impl Iterator<Item = T>) {
    for (slot, v) in dst.iter_mut().zip(src) {
        *slot = v;
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

fn parse_bool(s: &str) -> Result<bool, ValueError> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(bad(format!("not a boolean: {s:?}"))),
    }
}

fn parse_integer(s: &str) -> Result<i64, ValueError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None if s.is_empty() => Ok(0),
        None => s.parse::<i64>(),
    };
    parsed.map_err(|_| bad(format!("not an integer: {s:?}")))
}

fn parse_hex_text(s: &str) -> Result<Vec<u8>, ValueError> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if hex.len() % 2 != 0 {
        return Err(bad(format!("odd number of hex digits: {s:?}")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| bad(format!("not hex: {s:?}")))
        })
        .collect()
}

fn parse_gps_text(s: &str) -> Result<GeoPoint, ValueError> {
    if s.is_empty() {
        return Ok(GeoPoint::invalid());
    }
    let parts: Vec<&str> = s.split('/').map(str::trim).collect();
    let num = |t: &str| t.parse::<f64>().map_err(|_| bad(format!("bad GPS text: {s:?}")));
    match parts.as_slice() {
        [lat, lon] => Ok(GeoPoint::new(num(lat)?, num(lon)?)),
        [time, lat, lon] => {
            let fixtime = time.parse::<u32>().map_err(|_| bad(format!("bad GPS time: {s:?}")))?;
            Ok(GeoPoint::with_fixtime(num(lat)?, num(lon)?, fixtime))
        }
        _ => Err(bad(format!("bad GPS text: {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(prop_type: PropType, arity: usize, decimals: u8) -> ValueShape {
        ValueShape {
            prop_type,
            arity,
            decimals,
            length: 20,
        }
    }

    #[test]
    fn test_parse_integer_list_fills_arity() {
        let s = shape(PropType::UInt8, 3, 0);
        assert_eq!(s.parse_text("6,4").unwrap(), PropValue::Integers(vec![6, 4, 0]));
        assert_eq!(s.parse_text("0x10").unwrap(), PropValue::Integers(vec![16, 0, 0]));
    }

    #[test]
    fn test_integer_is_clamped_to_width() {
        let s = shape(PropType::UInt8, 1, 0);
        assert_eq!(s.parse_text("300").unwrap(), PropValue::Integers(vec![255]));
        let s = shape(PropType::Int16, 1, 0);
        assert_eq!(s.parse_text("-40000").unwrap(), PropValue::Integers(vec![-32768]));
    }

    #[test]
    fn test_decimal_text_and_wire() {
        // Arrange
        let s = shape(PropType::UDec16, 1, 1);

        // Act
        let v = s.parse_text("16.1").unwrap();
        let mut w = PayloadWriter::new();
        s.encode(&v, &mut w);

        // Assert
        assert_eq!(w.as_bytes(), &[0x00, 0xA1]);
        assert_eq!(s.format_text(&v), "16.1");
        let back = s.decode(w.as_bytes(), &v).unwrap();
        match back {
            PropValue::Decimals(d) => assert!((d[0] - 16.1).abs() < 0.05),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partial_numeric_set_keeps_tail() {
        let s = shape(PropType::UInt8, 3, 0);
        let current = PropValue::Integers(vec![6, 4, 60]);
        let v = s.decode(&[9], &current).unwrap();
        assert_eq!(v, PropValue::Integers(vec![9, 4, 60]));
    }

    #[test]
    fn test_numeric_decode_rejects_short_payload() {
        let s = shape(PropType::UInt32, 1, 0);
        assert!(s.decode(&[1, 2], &PropValue::Integers(vec![0])).is_err());
    }

    #[test]
    fn test_binary_text_round_trip() {
        let s = shape(PropType::Binary, 1, 0);
        let v = s.parse_text("0x0102AB").unwrap();
        assert_eq!(v, PropValue::Bytes(vec![0x01, 0x02, 0xAB]));
        assert_eq!(s.format_text(&v), "0x0102AB");
        assert!(s.parse_text("0x123").is_err());
    }

    #[test]
    fn test_gps_text_and_wire() {
        // Arrange
        let s = ValueShape {
            prop_type: PropType::Gps,
            arity: 1,
            decimals: 0,
            length: 10,
        };

        // Act
        let v = s.parse_text("1700000000/39.5/-142.25").unwrap();
        let mut w = PayloadWriter::new();
        s.encode(&v, &mut w);
        let back = s.decode(w.as_bytes(), &v).unwrap();

        // Assert
        assert_eq!(w.len(), 10);
        match back {
            PropValue::Gps(p) => {
                assert_eq!(p.fixtime, 1_700_000_000);
                assert!((p.latitude - 39.5).abs() < 1e-4);
                assert!((p.longitude + 142.25).abs() < 1e-4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(s.decode(&[0; 7], &v).is_err());
    }

    #[test]
    fn test_boolean_text() {
        let s = shape(PropType::Boolean, 1, 0);
        assert_eq!(s.parse_text("true").unwrap(), PropValue::Flags(vec![true]));
        assert_eq!(s.format_text(&PropValue::Flags(vec![false])), "0");
        assert!(s.parse_text("maybe").is_err());
    }

    #[test]
    fn test_string_is_truncated() {
        let s = ValueShape {
            prop_type: PropType::String,
            arity: 1,
            decimals: 0,
            length: 4,
        };
        assert_eq!(s.parse_text("abcdef").unwrap(), PropValue::Text("abcd".into()));
    }
}

//! Byte-oriented payload cursor with typed field encoding.
//!
//! Every DMTP packet carries at most [`MAX_PAYLOAD_LENGTH`] payload bytes.
//! Fields are written and read big-endian at a cursor (`index`); the writer
//! also tracks a high-water mark (`size`) so that random-access rewrites via
//! [`PayloadWriter::reset_index`] never shrink the payload.
//!
//! # Two types instead of one mode flag
//!
//! [`PayloadWriter`] owns a fixed 255-byte buffer and only writes.
//! [`PayloadReader`] borrows a byte slice and only reads.  A populated writer
//! becomes a data source with [`PayloadWriter::reader`].
//!
//! # Failure model
//!
//! Writers never panic on overflow: a write that does not fit returns `0`
//! bytes written and leaves the buffer untouched, so callers check the return
//! value.  Readers return the caller-supplied default when nothing is left.
//!
//! # GPS point encoding
//!
//! ```text
//! standard (6 bytes):  [lat:24 bits][lon:24 bits]
//! high-res (8 bytes):  [lat:32 bits][lon:32 bits]
//! raw = round((value - min) * 2^bits / range)     raw == 0 means "no point"
//! ```

use thiserror::Error;

use crate::domain::geo::GeoPoint;

/// Maximum number of payload bytes in one packet (the length field is 1 byte).
pub const MAX_PAYLOAD_LENGTH: usize = 255;

/// Encoded length of a standard-resolution GPS point.
pub const GPS_POINT_STD_LEN: usize = 6;

/// Encoded length of a high-resolution GPS point.
pub const GPS_POINT_HIGH_LEN: usize = 8;

/// Errors raised by the checked write helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Not enough room left in the 255-byte buffer.
    #[error("payload overflow: need {needed} bytes, {available} available")]
    Overflow { needed: usize, available: usize },
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Write-mode payload: a fixed-capacity buffer with a cursor and high-water mark.
///
/// Invariant: `index <= size <= MAX_PAYLOAD_LENGTH`.
#[derive(Clone)]
pub struct PayloadWriter {
    buf: [u8; MAX_PAYLOAD_LENGTH],
    index: usize,
    size: usize,
}

impl PayloadWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buf: [0u8; MAX_PAYLOAD_LENGTH],
            index: 0,
            size: 0,
        }
    }

    /// Number of bytes written so far (the high-water mark).
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current cursor position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes still available after the cursor.
    pub fn available(&self) -> usize {
        MAX_PAYLOAD_LENGTH - self.index
    }

    /// Re-points the cursor without touching the high-water mark.
    ///
    /// Positions past the high-water mark are clamped to it.
    pub fn reset_index(&mut self, index: usize) {
        self.index = index.min(self.size);
    }

    /// The written bytes `[0, size)`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// Copies the written bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// A reader positioned at the start of the written bytes.
    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(self.as_bytes())
    }

    fn advance(&mut self, n: usize) {
        self.index += n;
        if self.index > self.size {
            self.size = self.index;
        }
    }

    /// Writes the low `len` bytes of `value` big-endian.
    ///
    /// Returns the number of bytes written, or 0 if `len` bytes do not fit.
    pub fn write_ulong(&mut self, value: u64, len: usize) -> usize {
        if len == 0 || len > 8 || len > self.available() {
            return 0;
        }
        for i in 0..len {
            let shift = 8 * (len - 1 - i);
            self.buf[self.index + i] = ((value >> shift) & 0xFF) as u8;
        }
        self.advance(len);
        len
    }

    /// Writes a signed value as `len` bytes of two's complement.
    ///
    /// Values outside the range of `len` bytes are truncated to the low bytes.
    pub fn write_long(&mut self, value: i64, len: usize) -> usize {
        self.write_ulong(value as u64, len)
    }

    /// Writes up to `max_len` bytes of `s` followed by a NUL when the string
    /// is shorter than the field and there is room for it.
    pub fn write_string(&mut self, s: &str, max_len: usize) -> usize {
        let bytes = s.as_bytes();
        let n = bytes.len().min(max_len).min(self.available());
        self.buf[self.index..self.index + n].copy_from_slice(&bytes[..n]);
        self.advance(n);
        let mut written = n;
        if n < max_len && self.available() > 0 {
            self.buf[self.index] = 0;
            self.advance(1);
            written += 1;
        }
        written
    }

    /// Writes exactly `len` bytes: `data` truncated or zero-padded to fit.
    ///
    /// Returns 0 if `len` bytes do not fit.
    pub fn write_bytes(&mut self, data: &[u8], len: usize) -> usize {
        if len > self.available() {
            return 0;
        }
        let n = data.len().min(len);
        self.buf[self.index..self.index + n].copy_from_slice(&data[..n]);
        for b in &mut self.buf[self.index + n..self.index + len] {
            *b = 0;
        }
        self.advance(len);
        len
    }

    /// Writes a GPS point using 6 (standard) or 8 (high-res) bytes.
    ///
    /// Invalid points are written as all zeros.  Any other `len` writes nothing.
    pub fn write_gps(&mut self, point: &GeoPoint, len: usize) -> usize {
        let bits = match len {
            GPS_POINT_STD_LEN => 24,
            GPS_POINT_HIGH_LEN => 32,
            _ => return 0,
        };
        if len > self.available() {
            return 0;
        }
        let (lat, lon) = if point.is_valid() {
            (
                encode_coord(point.latitude, -90.0, 180.0, bits),
                encode_coord(point.longitude, -180.0, 360.0, bits),
            )
        } else {
            (0, 0)
        };
        let half = len / 2;
        self.write_ulong(lat, half);
        self.write_ulong(lon, half);
        len
    }

    /// Checked variant of [`write_bytes`](Self::write_bytes) that copies all of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Overflow`] when `data` does not fit.
    pub fn put_bytes(&mut self, data: &[u8]) -> Result<(), PayloadError> {
        if data.len() > self.available() {
            return Err(PayloadError::Overflow {
                needed: data.len(),
                available: self.available(),
            });
        }
        self.write_bytes(data, data.len());
        Ok(())
    }

    /// Checked variant of [`write_ulong`](Self::write_ulong).
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Overflow`] when `len` bytes do not fit.
    pub fn put_ulong(&mut self, value: u64, len: usize) -> Result<(), PayloadError> {
        if self.write_ulong(value, len) == len {
            Ok(())
        } else {
            Err(PayloadError::Overflow {
                needed: len,
                available: self.available(),
            })
        }
    }
}

impl Default for PayloadWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PayloadWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadWriter")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Read-mode payload: a cursor over borrowed bytes.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Total bytes in the underlying slice.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Re-points the cursor for random access (clamped to the data length).
    pub fn reset_index(&mut self, index: usize) {
        self.index = index.min(self.data.len());
    }

    /// Reads a big-endian unsigned value of `len` bytes.
    ///
    /// Returns `default` when nothing is left.  When fewer than `len` bytes
    /// remain, decodes (and consumes) only what is available.
    pub fn read_ulong(&mut self, len: usize, default: u64) -> u64 {
        let n = len.min(8).min(self.remaining());
        if n == 0 {
            return default;
        }
        let value = self.data[self.index..self.index + n]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        self.index += n;
        value
    }

    /// Reads a big-endian two's-complement value of `len` bytes, sign-extended.
    pub fn read_long(&mut self, len: usize, default: i64) -> i64 {
        let n = len.min(8).min(self.remaining());
        if n == 0 {
            return default;
        }
        let raw = self.read_ulong(n, 0);
        let shift = 64 - 8 * n as u32;
        ((raw << shift) as i64) >> shift
    }

    /// Reads a string of at most `max_len` bytes, stopping at (and consuming) a NUL.
    pub fn read_string(&mut self, max_len: usize) -> String {
        let end = (self.index + max_len).min(self.data.len());
        let field = &self.data[self.index..end];
        let (text, consumed) = match field.iter().position(|b| *b == 0) {
            Some(nul) => (&field[..nul], nul + 1),
            None => (field, field.len()),
        };
        self.index += consumed;
        String::from_utf8_lossy(text).into_owned()
    }

    /// Reads up to `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let n = len.min(self.remaining());
        let out = self.data[self.index..self.index + n].to_vec();
        self.index += n;
        out
    }

    /// Reads a 6- or 8-byte GPS point.  Missing or all-zero data yields the
    /// invalid (0, 0) point.
    pub fn read_gps(&mut self, len: usize) -> GeoPoint {
        let bits = match len {
            GPS_POINT_STD_LEN => 24,
            GPS_POINT_HIGH_LEN => 32,
            _ => return GeoPoint::invalid(),
        };
        if self.remaining() < len {
            self.index = self.data.len();
            return GeoPoint::invalid();
        }
        let half = len / 2;
        let lat = self.read_ulong(half, 0);
        let lon = self.read_ulong(half, 0);
        GeoPoint::new(
            decode_coord(lat, -90.0, 180.0, bits),
            decode_coord(lon, -180.0, 360.0, bits),
        )
    }
}

// ── Coordinate quantization ───────────────────────────────────────────────────

fn encode_coord(value: f64, min: f64, range: f64, bits: u32) -> u64 {
    let steps = (1u64 << bits) as f64;
    let raw = ((value - min) * (steps / range)).round();
    let max_raw = (1u64 << bits) - 1;
    // raw 0 is reserved for "absent"
    (raw.max(1.0) as u64).min(max_raw)
}

fn decode_coord(raw: u64, min: f64, range: f64, bits: u32) -> f64 {
    if raw == 0 {
        return 0.0;
    }
    let steps = (1u64 << bits) as f64;
    raw as f64 * (range / steps) + min
}

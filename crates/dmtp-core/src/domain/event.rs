//! GPS event record and the status codes that classify it.

use super::geo::GeoPoint;

/// Status codes carried in the first field of every event packet.
///
/// The values follow the OpenDMTP status code table; only the codes the
/// client actually generates are listed here.
pub mod status {
    pub const NONE: u16 = 0x0000;
    /// Periodic or on-demand location report.
    pub const LOCATION: u16 = 0xF020;
    /// Vehicle started moving.
    pub const MOTION_START: u16 = 0xF111;
    /// Periodic report while moving.
    pub const MOTION_IN_MOTION: u16 = 0xF112;
    /// Vehicle stopped.
    pub const MOTION_STOP: u16 = 0xF113;
    /// Periodic report while stopped.
    pub const MOTION_DORMANT: u16 = 0xF114;
    /// Speed exceeded the configured limit.
    pub const MOTION_EXCESS_SPEED: u16 = 0xF11A;
    /// Odometer `n` crossed its limit (`ODOM_LIMIT_0 + n`).
    pub const ODOM_LIMIT_0: u16 = 0xF140;
    /// Odometer `n` periodic report (`ODOM_0 + n`).
    pub const ODOM_0: u16 = 0xF130;
    /// GPS fix lost or expired.
    pub const GPS_EXPIRED: u16 = 0xF911;

    /// Returns a short, human-readable name for logging.
    pub fn name(code: u16) -> &'static str {
        match code {
            NONE => "none",
            LOCATION => "location",
            MOTION_START => "motion-start",
            MOTION_IN_MOTION => "in-motion",
            MOTION_STOP => "motion-stop",
            MOTION_DORMANT => "dormant",
            MOTION_EXCESS_SPEED => "excess-speed",
            GPS_EXPIRED => "gps-expired",
            c if (ODOM_LIMIT_0..ODOM_LIMIT_0 + 8).contains(&c) => "odometer-limit",
            c if (ODOM_0..ODOM_0 + 8).contains(&c) => "odometer",
            _ => "unknown",
        }
    }
}

/// A single GPS sample, as produced by the location collaborator and
/// consumed by the GPS modules and the event packet encoder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoEvent {
    pub status_code: u16,
    /// Event time in seconds since the Unix epoch.
    pub timestamp: u32,
    /// Free-form index (e.g. odometer number for odometer events).
    pub index: u32,
    pub point: GeoPoint,
    pub speed_kph: f64,
    /// Degrees clockwise from true north.
    pub heading: f64,
    /// Meters above sea level.
    pub altitude: f64,
    pub distance_km: f64,
    pub odometer_km: f64,
    pub hdop: f64,
    pub accuracy_m: f64,
    /// Sequence number assigned when the event was packetized.
    pub sequence: u32,
}

impl GeoEvent {
    /// Creates an event for `point` with the given status code and time.
    pub fn new(status_code: u16, timestamp: u32, point: GeoPoint) -> Self {
        Self {
            status_code,
            timestamp,
            point,
            ..Self::default()
        }
    }

    /// Zeroes speed and heading when the speed is below `min_speed_kph`.
    ///
    /// GPS receivers report a small, randomly oriented velocity while parked;
    /// this suppresses that jitter before the event is recorded.
    pub fn check_minimum_speed(&mut self, min_speed_kph: f64) {
        if self.speed_kph < min_speed_kph {
            self.speed_kph = 0.0;
            self.heading = 0.0;
        }
    }

    /// Age of the GPS fix relative to the event timestamp, in seconds.
    pub fn gps_age(&self) -> u32 {
        if self.point.fixtime == 0 {
            return 0;
        }
        self.timestamp.saturating_sub(self.point.fixtime)
    }
}

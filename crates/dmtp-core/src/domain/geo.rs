//! Geographic point entity and great-circle math.
//!
//! A [`GeoPoint`] is a single latitude/longitude pair together with the GPS
//! fix time at which it was observed.  Points are immutable once built; the
//! distance and heading helpers are pure functions of two points.

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Kilometers per statute mile, used by the display helpers.
pub const KILOMETERS_PER_MILE: f64 = 1.609344;

/// Coordinates closer than this to (0, 0) are treated as "no fix".
const NEAR_ZERO: f64 = 0.0001;

/// A latitude/longitude pair with the fix time (seconds since the Unix epoch).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    /// Degrees north of the equator, in `(-90, 90)`.
    pub latitude: f64,
    /// Degrees east of Greenwich, in `(-180, 180)`.
    pub longitude: f64,
    /// Time of the GPS fix in seconds since the Unix epoch (0 = unknown).
    pub fixtime: u32,
}

impl GeoPoint {
    /// Creates a point without a fix time.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            fixtime: 0,
        }
    }

    /// Creates a point stamped with the given fix time.
    pub fn with_fixtime(latitude: f64, longitude: f64, fixtime: u32) -> Self {
        Self {
            latitude,
            longitude,
            fixtime,
        }
    }

    /// The "absent" point: both coordinates zero, no fix time.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Returns `true` when the coordinates are inside their ranges and the
    /// point is not the (0, 0) placeholder.
    pub fn is_valid(&self) -> bool {
        let lat = self.latitude.abs();
        let lon = self.longitude.abs();
        if lat >= 90.0 || lon >= 180.0 {
            return false;
        }
        !(lat < NEAR_ZERO && lon < NEAR_ZERO)
    }

    /// Great-circle distance to `other` in kilometers (haversine formula).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        self.distance_km(other) * 1000.0
    }

    /// Initial bearing from this point towards `other`, in degrees `[0, 360)`.
    ///
    /// Returns 0.0 when both points coincide.
    pub fn heading_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        if x == 0.0 && y == 0.0 {
            return 0.0;
        }
        let deg = y.atan2(x).to_degrees();
        (deg + 360.0) % 360.0
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5}/{:.5}", self.latitude, self.longitude)
    }
}

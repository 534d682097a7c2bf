//! Odometer accumulation.
//!
//! Each of the [`ODOMETER_COUNT`] odometers keeps its running total in
//! meters (`PROP_ODOMETER_0_VALUE + n`) and the last fix it measured from
//! (`PROP_ODOMETER_0_GPS + n`).  When a non-zero limit
//! (`PROP_ODOMETER_0_LIMIT + n`) is crossed an `ODOM_LIMIT_0 + n` event is
//! generated.
//!
//! Distance is credited in whole meters.  The fraction left over from each
//! step is carried into the next one, so a slow device with frequent fixes
//! still advances its odometers.

use tracing::{trace, warn};

use super::GpsModule;
use crate::domain::event::{status, GeoEvent};
use crate::props::keys::*;
use crate::props::store::PropertyStore;

#[derive(Debug, Default)]
pub struct OdometerModule {
    /// Meters travelled but not yet credited, per odometer.
    carry: [f64; ODOMETER_COUNT],
}

impl OdometerModule {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(base: u16, n: usize) -> u16 {
    base + n as u16
}

impl GpsModule for OdometerModule {
    fn name(&self) -> &'static str {
        "odometer"
    }

    fn check_gps(&mut self, _old: Option<&GeoEvent>, new: &GeoEvent, props: &mut PropertyStore) -> Vec<GeoEvent> {
        let mut events = Vec::new();
        for n in 0..ODOMETER_COUNT {
            let last = props.get_gps(key(PROP_ODOMETER_0_GPS, n));
            if let Err(e) = props.set_gps(key(PROP_ODOMETER_0_GPS, n), new.point) {
                warn!(odometer = n, error = %e, "cannot record odometer fix");
                continue;
            }
            if !last.is_valid() {
                self.carry[n] = 0.0;
                continue;
            }

            let travelled = self.carry[n] + last.distance_meters(&new.point);
            let meters = travelled.floor();
            self.carry[n] = travelled - meters;
            let meters = meters as i64;
            if meters <= 0 {
                continue;
            }
            let before = props.get_long(key(PROP_ODOMETER_0_VALUE, n), 0);
            let after = match props.add_long(key(PROP_ODOMETER_0_VALUE, n), meters) {
                Ok(v) => v,
                Err(e) => {
                    warn!(odometer = n, error = %e, "cannot update odometer");
                    continue;
                }
            };
            trace!(odometer = n, meters, total = after, "odometer advanced");

            let limit = props.get_long(key(PROP_ODOMETER_0_LIMIT, n), 0);
            if limit > 0 && before < limit && after >= limit {
                events.push(GeoEvent {
                    status_code: status::ODOM_LIMIT_0 + n as u16,
                    index: n as u32,
                    odometer_km: after as f64 / 1000.0,
                    ..*new
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::GeoPoint;

    fn fix(ts: u32, lat: f64) -> GeoEvent {
        GeoEvent::new(status::NONE, ts, GeoPoint::with_fixtime(lat, 139.0, ts))
    }

    #[test]
    fn test_first_fix_only_records_position() {
        // Arrange
        let mut props = PropertyStore::new();
        let mut odo = OdometerModule::new();

        // Act
        let events = odo.check_gps(None, &fix(100, 35.0), &mut props);

        // Assert
        assert!(events.is_empty());
        assert_eq!(props.get_long(PROP_ODOMETER_0_VALUE, -1), 0);
        assert!(props.get_gps(PROP_ODOMETER_0_GPS).is_valid());
    }

    #[test]
    fn test_distance_accumulates_on_every_odometer() {
        // Arrange – 0.01 degree of latitude is about 1112 m
        let mut props = PropertyStore::new();
        let mut odo = OdometerModule::new();
        odo.check_gps(None, &fix(100, 35.00), &mut props);

        // Act
        odo.check_gps(None, &fix(160, 35.01), &mut props);

        // Assert
        for n in 0..ODOMETER_COUNT {
            let m = props.get_long(PROP_ODOMETER_0_VALUE + n as u16, 0);
            assert!((1100..1125).contains(&m), "odometer {n} = {m}");
        }
    }

    #[test]
    fn test_crossing_limit_fires_once() {
        // Arrange
        let mut props = PropertyStore::new();
        props.set_long(PROP_ODOMETER_0_LIMIT + 1, 2000).unwrap();
        let mut odo = OdometerModule::new();
        odo.check_gps(None, &fix(100, 35.00), &mut props);

        // Act
        let first = odo.check_gps(None, &fix(160, 35.01), &mut props);
        let second = odo.check_gps(None, &fix(220, 35.02), &mut props);
        let third = odo.check_gps(None, &fix(280, 35.03), &mut props);

        // Assert
        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].status_code, status::ODOM_LIMIT_0 + 1);
        assert_eq!(second[0].index, 1);
        assert!(second[0].odometer_km > 2.0);
        assert!(third.is_empty());
    }

    #[test]
    fn test_sub_meter_steps_are_not_lost() {
        // Arrange – 0.000004 degree of latitude is about 0.445 m
        let mut props = PropertyStore::new();
        props.set_long(PROP_ODOMETER_0_LIMIT, 400).unwrap();
        let mut odo = OdometerModule::new();
        odo.check_gps(None, &fix(100, 35.0), &mut props);

        // Act
        let mut limit_events = 0;
        for i in 1..=1000u32 {
            let events = odo.check_gps(None, &fix(100 + i, 35.0 + i as f64 * 0.000004), &mut props);
            limit_events += events.iter().filter(|e| e.status_code == status::ODOM_LIMIT_0).count();
        }

        // Assert
        let m = props.get_long(PROP_ODOMETER_0_VALUE, 0);
        assert!((440..=446).contains(&m), "odometer after slow travel = {m}");
        assert_eq!(limit_events, 1);
    }
}

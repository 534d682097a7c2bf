//! Turns GPS fixes into queued events.
//!
//! The producer is the other side of the worker: whatever reads the GPS
//! receiver calls [`EventProducer::on_fix`] for each sample.  The fix is
//! published as the device's current position, run past the GPS modules,
//! and any events they raise are encoded and queued.  The session worker is
//! then woken so it can decide whether the queue warrants a connection.
//!
//! Two properties filter what gets through:
//!
//! - `gps.accuracy`: fixes reporting an accuracy worse than this many meters
//!   are dropped before anything sees them.
//! - `gps.dstdelt`: the published position (`sta.gpsfix`) only moves once the
//!   device is this many meters away from it.  The GPS modules still get
//!   every fix, so odometers and motion detection are unaffected.
//!
//! Either filter is off when its property is zero.

use std::sync::Arc;

use dmtp_core::props::keys::{PROP_GPS_ACCURACY, PROP_GPS_DISTANCE_DELTA, PROP_GPS_MIN_SPEED, PROP_STATE_GPS};
use dmtp_core::{GeoEvent, GpsModules, PropertyStore};
use tracing::{debug, trace, warn};

use super::state::DeviceState;

/// Feeds GPS fixes through the GPS modules into the event queue.
pub struct EventProducer {
    state: Arc<DeviceState>,
    modules: GpsModules,
    previous: Option<GeoEvent>,
}

impl EventProducer {
    pub fn new(state: Arc<DeviceState>, modules: GpsModules) -> Self {
        Self {
            state,
            modules,
            previous: None,
        }
    }

    /// A producer running the odometer and motion modules.
    pub fn with_default_modules(state: Arc<DeviceState>) -> Self {
        Self::new(state, GpsModules::with_defaults())
    }

    /// Processes one fix.  Returns the number of events queued.
    ///
    /// Invalid fixes, and fixes less accurate than `gps.accuracy`, are
    /// ignored.
    pub fn on_fix(&mut self, mut fix: GeoEvent) -> usize {
        if !fix.point.is_valid() {
            trace!("ignoring invalid fix");
            return 0;
        }

        let events = {
            let mut props = self.state.props.lock();
            let max_error = props.get_long(PROP_GPS_ACCURACY, 0);
            if max_error > 0 && fix.accuracy_m > max_error as f64 {
                trace!(accuracy = fix.accuracy_m, limit = max_error, "ignoring inaccurate fix");
                return 0;
            }
            fix.check_minimum_speed(props.get_double(PROP_GPS_MIN_SPEED, 0.0));
            publish_position(&mut props, &fix);
            self.modules.check_gps(self.previous.as_ref(), &fix, &mut props)
        };
        self.state.set_last_fix(fix);
        self.previous = Some(fix);

        for ev in &events {
            self.state.queue_event(ev);
        }
        if !events.is_empty() {
            debug!(count = events.len(), "gps events queued");
            self.state.publish_queue_length();
            self.state.request_transport();
        }
        events.len()
    }

    /// Queues `event` as-is, bypassing the GPS modules.
    pub fn queue_event(&self, event: &GeoEvent) {
        self.state.queue_event(event);
        self.state.publish_queue_length();
        self.state.request_transport();
    }
}

/// Moves `sta.gpsfix` to `fix` when it is unset or at least `gps.dstdelt`
/// meters away.
fn publish_position(props: &mut PropertyStore, fix: &GeoEvent) {
    let published = props.get_gps(PROP_STATE_GPS);
    let delta = props.get_long(PROP_GPS_DISTANCE_DELTA, 0);
    if published.is_valid() && delta > 0 && published.distance_meters(&fix.point) < delta as f64 {
        return;
    }
    if let Err(e) = props.set_gps(PROP_STATE_GPS, fix.point) {
        warn!(error = %e, "could not publish gps fix");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmtp_core::gps::GpsModule;
    use dmtp_core::props::keys::PROP_MOTION_START;
    use dmtp_core::{status, GeoPoint, PropertyStore};

    fn fix(t: u32, lat: f64, speed: f64) -> GeoEvent {
        let mut ev = GeoEvent::new(status::LOCATION, t, GeoPoint::with_fixtime(lat, -104.0, t));
        ev.speed_kph = speed;
        ev
    }

    struct Echo;

    impl GpsModule for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn check_gps(&mut self, _old: Option<&GeoEvent>, new: &GeoEvent, _props: &mut PropertyStore) -> Vec<GeoEvent> {
            vec![*new]
        }
    }

    #[test]
    fn test_fix_is_published_and_events_queued() {
        // Arrange
        let state = DeviceState::with_defaults();
        let mut modules = GpsModules::new();
        modules.add(Box::new(Echo));
        let mut producer = EventProducer::new(Arc::clone(&state), modules);

        // Act
        let n = producer.on_fix(fix(1000, 39.0, 50.0));

        // Assert
        assert_eq!(n, 1);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.last_fix().map(|f| f.timestamp), Some(1000));
        assert_eq!(state.props.lock().get_gps(PROP_STATE_GPS).fixtime, 1000);
    }

    #[test]
    fn test_invalid_fix_is_ignored() {
        let state = DeviceState::with_defaults();
        let mut producer = EventProducer::with_default_modules(Arc::clone(&state));

        let mut bad = fix(1000, 0.0, 0.0);
        bad.point = GeoPoint::invalid();

        assert_eq!(producer.on_fix(bad), 0);
        assert!(state.last_fix().is_none());
    }

    #[test]
    fn test_slow_fix_has_speed_zeroed() {
        let state = DeviceState::with_defaults();
        let mut producer = EventProducer::new(Arc::clone(&state), GpsModules::new());

        producer.on_fix(fix(1000, 39.0, 3.0));

        assert_eq!(state.last_fix().map(|f| f.speed_kph), Some(0.0));
    }

    #[test]
    fn test_fix_worse_than_accuracy_limit_is_ignored() {
        // Arrange
        let state = DeviceState::with_defaults();
        state.props.lock().set_long(PROP_GPS_ACCURACY, 50).unwrap();
        let mut modules = GpsModules::new();
        modules.add(Box::new(Echo));
        let mut producer = EventProducer::new(Arc::clone(&state), modules);
        let mut poor = fix(1000, 39.0, 50.0);
        poor.accuracy_m = 120.0;
        let mut good = fix(1010, 39.0, 50.0);
        good.accuracy_m = 8.0;

        // Act
        let dropped = producer.on_fix(poor);
        let kept = producer.on_fix(good);

        // Assert
        assert_eq!(dropped, 0);
        assert_eq!(kept, 1);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.last_fix().map(|f| f.timestamp), Some(1010));
    }

    #[test]
    fn test_published_position_waits_for_distance_delta() {
        // Arrange – 0.001 degree of latitude is about 111 m
        let state = DeviceState::with_defaults();
        state.props.lock().set_long(PROP_GPS_DISTANCE_DELTA, 500).unwrap();
        let mut modules = GpsModules::new();
        modules.add(Box::new(Echo));
        let mut producer = EventProducer::new(Arc::clone(&state), modules);

        // Act
        producer.on_fix(fix(1000, 39.000, 30.0));
        let near = producer.on_fix(fix(1010, 39.001, 30.0));
        let published_near = state.props.lock().get_gps(PROP_STATE_GPS).fixtime;
        producer.on_fix(fix(1020, 39.010, 30.0));
        let published_far = state.props.lock().get_gps(PROP_STATE_GPS).fixtime;

        // Assert
        assert_eq!(near, 1, "modules still see nearby fixes");
        assert_eq!(published_near, 1000);
        assert_eq!(published_far, 1020);
        assert_eq!(state.last_fix().map(|f| f.timestamp), Some(1020));
    }

    #[test]
    fn test_motion_start_reaches_the_queue() {
        // Arrange
        let state = DeviceState::with_defaults();
        state.props.lock().set_double(PROP_MOTION_START, 20.0).unwrap();
        let mut producer = EventProducer::with_default_modules(Arc::clone(&state));

        // Act
        producer.on_fix(fix(1000, 39.0, 0.0));
        producer.on_fix(fix(1060, 39.01, 60.0));

        // Assert
        let packet = state.events.packet_at(0).expect("motion start queued");
        assert_eq!(&packet.payload()[..2], &status::MOTION_START.to_be_bytes());
        assert_eq!(packet.priority, dmtp_core::Priority::Normal);
    }
}

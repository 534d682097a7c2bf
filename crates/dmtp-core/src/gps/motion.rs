//! Motion state detection.
//!
//! The module is a two-state machine, stopped and moving:
//!
//! ```text
//!            speed >= start (or moved >= start km)
//!   STOPPED ───────────────────────────────────────▶ MOVING
//!     │  ▲                                            │  │
//!     │  └──── not moving for PROP_MOTION_STOP s ─────┘  │
//!     └─ DORMANT every PROP_MOTION_DORMANT_INTRVL s      └─ IN_MOTION every
//!        (at most PROP_MOTION_DORMANT_COUNT, 0 = no cap)    PROP_MOTION_IN_MOTION s
//! ```
//!
//! Excess speed is tracked independently and fires once per excursion
//! above `PROP_MOTION_EXCESS_SPEED`.  A zero start threshold disables the
//! start, in-motion, stop and dormant events.

use tracing::debug;

use super::GpsModule;
use crate::domain::event::{status, GeoEvent};
use crate::domain::geo::GeoPoint;
use crate::props::keys::*;
use crate::props::store::PropertyStore;

/// `PROP_MOTION_START_TYPE`: the start threshold is a speed in km/h.
pub const START_TYPE_SPEED: i64 = 0;
/// `PROP_MOTION_START_TYPE`: the start threshold is a distance in km from
/// the point where the vehicle stopped.
pub const START_TYPE_DISTANCE: i64 = 1;
/// `PROP_MOTION_STOP_TYPE`: the stop event carries the time it was detected.
pub const STOP_TYPE_DETECTED: i64 = 0;
/// `PROP_MOTION_STOP_TYPE`: the stop event carries the time motion ceased.
pub const STOP_TYPE_LAST_MOVED: i64 = 1;

#[derive(Debug, Default)]
pub struct MotionModule {
    moving: bool,
    stop_point: GeoPoint,
    last_moved: u32,
    last_in_motion: u32,
    last_dormant: u32,
    dormant_count: i64,
    excess_active: bool,
}

impl MotionModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    fn started(&self, new: &GeoEvent, start_type: i64, start: f64) -> bool {
        if start_type == START_TYPE_DISTANCE {
            self.stop_point.is_valid() && self.stop_point.distance_km(&new.point) >= start
        } else {
            new.speed_kph >= start
        }
    }

    fn event(code: u16, timestamp: u32, new: &GeoEvent) -> GeoEvent {
        GeoEvent {
            status_code: code,
            timestamp,
            ..*new
        }
    }

    fn check_excess_speed(&mut self, new: &GeoEvent, props: &PropertyStore, out: &mut Vec<GeoEvent>) {
        let limit = props.get_double(PROP_MOTION_EXCESS_SPEED, 0.0);
        if limit <= 0.0 {
            self.excess_active = false;
            return;
        }
        if new.speed_kph > limit {
            if !self.excess_active {
                self.excess_active = true;
                out.push(Self::event(status::MOTION_EXCESS_SPEED, new.timestamp, new));
            }
        } else {
            self.excess_active = false;
        }
    }
}

impl GpsModule for MotionModule {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn check_gps(&mut self, _old: Option<&GeoEvent>, new: &GeoEvent, props: &mut PropertyStore) -> Vec<GeoEvent> {
        let mut out = Vec::new();
        self.check_excess_speed(new, props, &mut out);

        let start = props.get_double(PROP_MOTION_START, 0.0);
        if start <= 0.0 {
            self.moving = false;
            return out;
        }
        let start_type = props.get_long(PROP_MOTION_START_TYPE, START_TYPE_SPEED);
        let now = new.timestamp;

        if !self.moving {
            if !self.stop_point.is_valid() {
                self.stop_point = new.point;
                self.last_dormant = now;
            }
            if self.started(new, start_type, start) {
                debug!(speed = new.speed_kph, "motion start");
                self.moving = true;
                self.last_moved = now;
                self.last_in_motion = now;
                self.dormant_count = 0;
                out.push(Self::event(status::MOTION_START, now, new));
                return out;
            }
            let interval = props.get_long(PROP_MOTION_DORMANT_INTRVL, 0);
            let max_count = props.get_long(PROP_MOTION_DORMANT_COUNT, 0);
            if interval > 0
                && (max_count == 0 || self.dormant_count < max_count)
                && i64::from(now.saturating_sub(self.last_dormant)) >= interval
            {
                self.last_dormant = now;
                self.dormant_count += 1;
                out.push(Self::event(status::MOTION_DORMANT, now, new));
            }
            return out;
        }

        let still_moving = if start_type == START_TYPE_DISTANCE {
            new.speed_kph >= props.get_double(PROP_GPS_MIN_SPEED, 0.0).max(f64::MIN_POSITIVE)
        } else {
            new.speed_kph >= start
        };
        if still_moving {
            self.last_moved = now;
            let interval = props.get_long(PROP_MOTION_IN_MOTION, 0);
            if interval > 0 && i64::from(now.saturating_sub(self.last_in_motion)) >= interval {
                self.last_in_motion = now;
                out.push(Self::event(status::MOTION_IN_MOTION, now, new));
            }
            return out;
        }

        let stop_after = props.get_long(PROP_MOTION_STOP, 0);
        if i64::from(now.saturating_sub(self.last_moved)) >= stop_after {
            debug!("motion stop");
            self.moving = false;
            self.stop_point = new.point;
            self.last_dormant = now;
            self.dormant_count = 0;
            let at = match props.get_long(PROP_MOTION_STOP_TYPE, STOP_TYPE_DETECTED) {
                STOP_TYPE_LAST_MOVED => self.last_moved,
                _ => now,
            };
            out.push(Self::event(status::MOTION_STOP, at, new));
        }
        out
    }
}

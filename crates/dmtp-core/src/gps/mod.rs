//! GPS modules: pluggable observers that see every new valid fix before the
//! protocol does, and may generate events of their own.
//!
//! The producer calls [`GpsModules::check_gps`] once per fix with the
//! previous and current sample.  Each module reads its thresholds from the
//! [`PropertyStore`] and may update properties (the odometer writes its
//! accumulated distance back), returning the events it wants queued.

pub mod motion;
pub mod odometer;

use tracing::debug;

use crate::domain::event::{status, GeoEvent};
use crate::props::store::PropertyStore;
use crate::protocol::messages::Priority;

pub use motion::MotionModule;
pub use odometer::OdometerModule;

/// A GPS-driven event generator.
pub trait GpsModule: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspects a new fix and returns any events it triggers.
    ///
    /// `old` is the previous valid fix, if any.
    fn check_gps(&mut self, old: Option<&GeoEvent>, new: &GeoEvent, props: &mut PropertyStore) -> Vec<GeoEvent>;
}

/// The ordered set of modules run for each fix.
#[derive(Default)]
pub struct GpsModules {
    modules: Vec<Box<dyn GpsModule>>,
}

impl GpsModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Odometer followed by motion detection.
    pub fn with_defaults() -> Self {
        let mut m = Self::new();
        m.add(Box::new(OdometerModule::new()));
        m.add(Box::new(MotionModule::new()));
        m
    }

    pub fn add(&mut self, module: Box<dyn GpsModule>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Runs every module against `new` and collects their events in order.
    pub fn check_gps(&mut self, old: Option<&GeoEvent>, new: &GeoEvent, props: &mut PropertyStore) -> Vec<GeoEvent> {
        if !new.point.is_valid() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for m in &mut self.modules {
            let events = m.check_gps(old, new, props);
            if !events.is_empty() {
                debug!(module = m.name(), count = events.len(), "gps module fired");
            }
            out.extend(events);
        }
        out
    }
}

impl std::fmt::Debug for GpsModules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules.iter().map(|m| m.name())).finish()
    }
}

/// Queue priority for an event with `status_code`.
pub fn event_priority(status_code: u16) -> Priority {
    match status_code {
        status::MOTION_START | status::MOTION_STOP | status::GPS_EXPIRED => Priority::Normal,
        status::MOTION_EXCESS_SPEED => Priority::High,
        c if (status::ODOM_LIMIT_0..status::ODOM_LIMIT_0 + 8).contains(&c) => Priority::Normal,
        _ => Priority::Low,
    }
}

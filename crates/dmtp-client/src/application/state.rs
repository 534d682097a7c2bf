//! Device state shared between the event producer and the session worker.
//!
//! # Locking rules (for beginners)
//!
//! `DeviceState` is handed around as an `Arc` and touched from two tasks at
//! once: the producer appends events while the worker drains the queues.
//!
//! - Each [`PacketQueue`] carries its own lock, so queue calls never need an
//!   outer lock.
//! - The [`PropertyStore`] sits behind a `parking_lot::Mutex`.  Take it for a
//!   short synchronous section and drop it before the next `.await`; the
//!   guard is not `Send`, so the compiler rejects code that forgets.
//! - [`queue_event`](DeviceState::queue_event) never takes the property lock.
//!   Command handlers run while the session holds that lock and call back
//!   into `queue_event`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use dmtp_core::gps::event_priority;
use dmtp_core::props::keys::{PROP_CMD_SAVE_PROPS, PROP_CMD_STATUS_EVENT, PROP_STATE_QUEUED_EVENTS};
use dmtp_core::protocol::{client_types, encode_event, PayloadTemplate, SequenceCounter, TemplateRegistry};
use dmtp_core::{GeoEvent, PacketQueue, Priority, PropertyStore};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::commands::{SavePropsCommand, StatusEventCommand};

/// Source of the current time in seconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u32 + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    })
}

/// Everything the producer and the session worker share.
pub struct DeviceState {
    pub props: Mutex<PropertyStore>,
    /// Property responses and other replies to the server.
    pub pending: PacketQueue,
    /// Error reports and format definitions; dropped once delivered.
    pub volatile: PacketQueue,
    /// GPS events awaiting acknowledgement.
    pub events: PacketQueue,
    pub sequence: SequenceCounter,
    templates: RwLock<TemplateRegistry>,
    event_type: AtomicU8,
    last_fix: Mutex<Option<GeoEvent>>,
    notify: Notify,
    save_requested: AtomicBool,
    clock: Clock,
}

impl DeviceState {
    /// Wraps `props` and registers the command handlers.
    pub fn new(props: PropertyStore, templates: TemplateRegistry, clock: Clock) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let mut props = props;
            props.register_handler(PROP_CMD_SAVE_PROPS, Arc::new(SavePropsCommand::new(weak.clone())));
            props.register_handler(PROP_CMD_STATUS_EVENT, Arc::new(StatusEventCommand::new(weak.clone())));
            Self {
                props: Mutex::new(props),
                pending: PacketQueue::new("pending"),
                volatile: PacketQueue::new("volatile"),
                events: PacketQueue::new("events"),
                sequence: SequenceCounter::new(),
                templates: RwLock::new(templates),
                event_type: AtomicU8::new(client_types::FIXED_FMT_STD),
                last_fix: Mutex::new(None),
                notify: Notify::new(),
                save_requested: AtomicBool::new(false),
                clock,
            }
        })
    }

    /// Default properties, fixed templates and the wall clock.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(PropertyStore::new(), TemplateRegistry::new(), system_clock())
    }

    pub fn now(&self) -> u32 {
        (self.clock)()
    }

    // ── Signalling ────────────────────────────────────────────────────────────

    /// Wakes the session worker.  Never blocks.
    pub fn request_transport(&self) {
        self.notify.notify_one();
    }

    /// Waits until [`request_transport`](Self::request_transport) is called.
    pub async fn transport_requested(&self) {
        self.notify.notified().await;
    }

    pub fn request_save(&self) {
        self.save_requested.store(true, Ordering::Release);
    }

    /// Returns and clears the save request.
    pub fn take_save_request(&self) -> bool {
        self.save_requested.swap(false, Ordering::AcqRel)
    }

    // ── GPS fix ───────────────────────────────────────────────────────────────

    pub fn last_fix(&self) -> Option<GeoEvent> {
        *self.last_fix.lock()
    }

    pub fn set_last_fix(&self, fix: GeoEvent) {
        *self.last_fix.lock() = Some(fix);
    }

    // ── Templates ─────────────────────────────────────────────────────────────

    /// Packet type new events are encoded with.
    pub fn event_type(&self) -> u8 {
        self.event_type.load(Ordering::Acquire)
    }

    /// Selects the event packet type.  Unknown types fall back to the
    /// standard fixed format.
    pub fn set_event_type(&self, packet_type: u8) {
        let t = if self.templates.read().get(packet_type).is_some() {
            packet_type
        } else {
            warn!(packet_type, "no template for event type; using the standard format");
            client_types::FIXED_FMT_STD
        };
        self.event_type.store(t, Ordering::Release);
    }

    pub fn template(&self, packet_type: u8) -> Option<PayloadTemplate> {
        self.templates.read().get(packet_type).cloned()
    }

    /// Definitions of every registered custom template.
    pub fn custom_format_definitions(&self) -> Vec<dmtp_core::Packet> {
        self.templates
            .read()
            .custom_templates()
            .into_iter()
            .map(PayloadTemplate::format_definition_packet)
            .collect()
    }

    /// The `FORMAT_DEF_24` packet for `packet_type`, if it is a registered
    /// custom format.
    pub fn format_definition(&self, packet_type: u8) -> Option<dmtp_core::Packet> {
        self.templates.read().format_definition(packet_type)
    }

    // ── Queues ────────────────────────────────────────────────────────────────

    /// Encodes `event` with the active template and appends it to the event
    /// queue.  Does not take the property lock.
    pub fn queue_event(&self, event: &GeoEvent) {
        let template = self
            .template(self.event_type())
            .unwrap_or_else(PayloadTemplate::fixed_std);
        let priority = event_priority(event.status_code);
        let packet = encode_event(&template, event, &self.sequence).with_priority(priority);
        debug!(
            status = dmtp_core::status::name(event.status_code),
            sequence = packet.sequence,
            ?priority,
            "event queued"
        );
        self.events.add_event(packet);
    }

    /// The highest priority queued anywhere.
    ///
    /// Pending and volatile packets only carry their own priority when they
    /// are error reports; everything else there counts as `Low`, enough to
    /// get them delivered with the next connection.
    pub fn highest_priority(&self) -> Priority {
        let mut p = self.events.highest_priority();
        for q in [&self.pending, &self.volatile] {
            if !q.is_empty() {
                p = p.max(q.highest_priority()).max(Priority::Low);
            }
        }
        p
    }

    /// `true` if any queue has packets not yet sent in this session.
    pub fn has_unsent_data(&self) -> bool {
        self.pending.has_unsent_packets() || self.volatile.has_unsent_packets() || self.events.has_unsent_packets()
    }

    /// Clears `sent` flags on all three queues.
    pub fn reset_sent(&self) {
        self.pending.reset_sent();
        self.volatile.reset_sent();
        self.events.reset_sent();
    }

    /// Mirrors the event queue length into `PROP_STATE_QUEUED_EVENTS`.
    /// Takes the property lock.
    pub fn publish_queue_length(&self) {
        let n = self.events.len() as i64;
        if let Err(e) = self.props.lock().set_long(PROP_STATE_QUEUED_EVENTS, n) {
            warn!(error = %e, "could not update queued event count");
        }
    }
}

impl std::fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceState")
            .field("pending", &self.pending.len())
            .field("volatile", &self.volatile.len())
            .field("events", &self.events.len())
            .field("event_type", &self.event_type())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! How the client reacts to error ("NAK") packets from the server.
//!
//! # The policy at a glance
//!
//! | Server error                         | Effect                                   | Session  |
//! |--------------------------------------|------------------------------------------|----------|
//! | unique id invalid                    | fall back to account/device identity     | continue |
//! | account / device invalid             | severe; re-identify                      | fatal on 2nd |
//! | account / device inactive            |                                          | fatal    |
//! | excessive connections                | +300 s on min transmit rate and delay    | fatal    |
//! | packet header / type                 |                                          | continue |
//! | packet length / payload              | severe                                   | fatal    |
//! | packet encoding                      | switch to Base64 unless already Base64   | continue, then fatal |
//! | packet / block checksum              |                                          | fatal on 3rd |
//! | protocol error                       | severe                                   | fatal    |
//! | format definition invalid            | severe; custom formats off               | fatal    |
//! | format not supported                 | purge events; custom formats off         | continue |
//! | format not recognized                | queue the format definition              | continue |
//! | excessive events                     | drop first sent event; slow reporting    | continue |
//! | duplicate event / event error        |                                          | continue |
//!
//! Severe errors are tallied across sessions.  At
//! [`SEVERE_BACKOFF_THRESHOLD`] the minimum transmit rate and delay are
//! doubled; at [`SEVERE_DISABLE_THRESHOLD`] periodic in-motion and dormant
//! reporting is switched off.

use dmtp_core::props::keys::{
    PROP_COMM_CUSTOM_FORMATS, PROP_COMM_MIN_XMIT_DELAY, PROP_COMM_MIN_XMIT_RATE, PROP_MOTION_DORMANT_INTRVL,
    PROP_MOTION_IN_MOTION,
};
use dmtp_core::protocol::{client_types, Encoding, ServerError};
use dmtp_core::PropertyStore;
use tracing::{error, info, warn};

use super::state::DeviceState;

/// Seconds added to the minimum transmit rate and delay when the server
/// reports excessive connections.
pub const EXCESSIVE_CONNECTION_BACKOFF: i64 = 300;

/// Seconds added to the in-motion and dormant intervals when the server
/// reports excessive events.
pub const EXCESSIVE_EVENT_BACKOFF: i64 = 60;

pub const SEVERE_BACKOFF_THRESHOLD: u32 = 4;
/// Lowest minimum transmit rate and delay, in seconds, after the severe
/// error doubling.
pub const SEVERE_BACKOFF_FLOOR: i64 = 60;
pub const SEVERE_DISABLE_THRESHOLD: u32 = 10;

/// Identification failures tolerated per session.
const MAX_IDENT_ERRORS: u32 = 1;
/// Checksum failures tolerated per session.
const MAX_CHECKSUM_ERRORS: u32 = 2;

/// Whether the session survives an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Terminate,
}

/// What the session must change about itself after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Identify with account and device id from now on.
    pub use_account_identity: bool,
    /// Send the identification packets again with the next block.
    pub resend_identification: bool,
    /// Encoding for the rest of the session.
    pub switch_encoding: Option<Encoding>,
}

impl Outcome {
    fn proceed() -> Self {
        Self {
            verdict: Verdict::Continue,
            use_account_identity: false,
            resend_identification: false,
            switch_encoding: None,
        }
    }

    fn terminate() -> Self {
        Self {
            verdict: Verdict::Terminate,
            ..Self::proceed()
        }
    }

    fn terminate_if(fatal: bool) -> Self {
        if fatal {
            Self::terminate()
        } else {
            Self::proceed()
        }
    }
}

/// Error counters.  One instance lives as long as the protocol session
/// object; [`begin_session`](Self::begin_session) resets the per-session part.
#[derive(Debug, Default)]
pub struct ErrorPolicy {
    severe_errors: u32,
    ident_errors: u32,
    checksum_errors: u32,
}

impl ErrorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_session(&mut self) {
        self.ident_errors = 0;
        self.checksum_errors = 0;
    }

    /// Severe errors since this client started.
    pub fn severe_errors(&self) -> u32 {
        self.severe_errors
    }

    /// Applies the policy for `err`.
    ///
    /// `cause_type` is the packet type the server named as the cause and
    /// `encoding` the one the session is currently writing.
    pub fn handle(&mut self, err: ServerError, cause_type: u8, encoding: Encoding, state: &DeviceState) -> Outcome {
        match err {
            ServerError::IdInvalid => {
                warn!("server does not know the unique id; identifying by account");
                self.ident_errors += 1;
                self.severe(state);
                Outcome {
                    use_account_identity: true,
                    resend_identification: true,
                    ..Outcome::terminate_if(self.ident_errors > MAX_IDENT_ERRORS)
                }
            }
            ServerError::AccountInvalid | ServerError::DeviceInvalid => {
                warn!(?err, "server rejected the identification");
                self.ident_errors += 1;
                self.severe(state);
                Outcome {
                    resend_identification: true,
                    ..Outcome::terminate_if(self.ident_errors > MAX_IDENT_ERRORS)
                }
            }
            ServerError::AccountInactive | ServerError::DeviceInactive => {
                error!(?err, "account or device is inactive");
                Outcome::terminate()
            }
            ServerError::ExcessiveConnections => {
                let mut props = state.props.lock();
                add_seconds(&mut props, PROP_COMM_MIN_XMIT_RATE, EXCESSIVE_CONNECTION_BACKOFF);
                add_seconds(&mut props, PROP_COMM_MIN_XMIT_DELAY, EXCESSIVE_CONNECTION_BACKOFF);
                warn!("server reports excessive connections; backing off");
                Outcome::terminate()
            }
            ServerError::PacketHeader | ServerError::PacketType => Outcome::proceed(),
            ServerError::PacketLength | ServerError::PacketPayload | ServerError::ProtocolError => {
                warn!(?err, cause_type, "server rejected a packet");
                self.severe(state);
                Outcome::terminate()
            }
            ServerError::PacketEncoding => {
                if let Encoding::Base64 { .. } = encoding {
                    warn!("server rejected the base64 encoding");
                    return Outcome::terminate();
                }
                info!("server rejected the encoding; switching to base64");
                Outcome {
                    resend_identification: client_types::is_identification(cause_type),
                    switch_encoding: Some(Encoding::Base64 { checksum: true }),
                    ..Outcome::proceed()
                }
            }
            ServerError::PacketChecksum | ServerError::BlockChecksum => {
                self.checksum_errors += 1;
                warn!(count = self.checksum_errors, "server reports a checksum error");
                Outcome::terminate_if(self.checksum_errors > MAX_CHECKSUM_ERRORS)
            }
            ServerError::FormatDefinitionInvalid => {
                disable_custom_formats(state);
                self.severe(state);
                Outcome::terminate()
            }
            ServerError::FormatNotSupported => {
                let purged = state.events.clear();
                disable_custom_formats(state);
                warn!(purged, "server does not support custom formats; events purged");
                Outcome::proceed()
            }
            ServerError::FormatNotRecognized => {
                match state.format_definition(cause_type) {
                    Some(def) => {
                        info!(packet_type = format_args!("0x{cause_type:02X}"), "resending format definition");
                        state.volatile.add_packet(def);
                    }
                    None => warn!(
                        packet_type = format_args!("0x{cause_type:02X}"),
                        "server asked for an unknown format"
                    ),
                }
                Outcome::proceed()
            }
            ServerError::ExcessiveEvents => {
                state.events.delete_first_sent();
                let mut props = state.props.lock();
                for key in [PROP_MOTION_IN_MOTION, PROP_MOTION_DORMANT_INTRVL] {
                    if props.get_long(key, 0) > 0 {
                        add_seconds(&mut props, key, EXCESSIVE_EVENT_BACKOFF);
                    }
                }
                warn!("server reports excessive events; slowing periodic reports");
                Outcome::proceed()
            }
            ServerError::DuplicateEvent | ServerError::EventError => Outcome::proceed(),
            ServerError::Other(code) => {
                warn!(code = format_args!("0x{code:04X}"), "unknown server error");
                Outcome::proceed()
            }
        }
    }

    fn severe(&mut self, state: &DeviceState) {
        self.severe_errors += 1;
        let n = self.severe_errors;
        if n == SEVERE_BACKOFF_THRESHOLD {
            let mut props = state.props.lock();
            for key in [PROP_COMM_MIN_XMIT_RATE, PROP_COMM_MIN_XMIT_DELAY] {
                let v = props.get_long(key, 0);
                set_logged(&mut props, key, (v * 2).max(SEVERE_BACKOFF_FLOOR));
            }
            warn!(severe_errors = n, "repeated severe errors; doubling transmit intervals");
        } else if n == SEVERE_DISABLE_THRESHOLD {
            let mut props = state.props.lock();
            set_logged(&mut props, PROP_MOTION_IN_MOTION, 0);
            set_logged(&mut props, PROP_MOTION_DORMANT_INTRVL, 0);
            error!(severe_errors = n, "too many severe errors; periodic reporting disabled");
        }
    }
}

fn add_seconds(props: &mut PropertyStore, key: u16, delta: i64) {
    let v = props.get_long(key, 0);
    set_logged(props, key, v + delta);
}

fn set_logged(props: &mut PropertyStore, key: u16, value: i64) {
    if let Err(e) = props.set_long(key, value) {
        warn!(error = %e, "could not adjust property");
    }
}

fn disable_custom_formats(state: &DeviceState) {
    set_logged(&mut state.props.lock(), PROP_COMM_CUSTOM_FORMATS, 0);
    state.set_event_type(client_types::FIXED_FMT_STD);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dmtp_core::protocol::{Field, FieldType, PayloadTemplate, TemplateRegistry};
    use dmtp_core::{status, GeoEvent, GeoPoint};
    use std::sync::Arc;

    use crate::application::state::system_clock;

    fn state() -> Arc<DeviceState> {
        DeviceState::with_defaults()
    }

    fn queue_events(state: &DeviceState, n: usize) {
        for _ in 0..n {
            state.queue_event(&GeoEvent::new(status::LOCATION, 1, GeoPoint::new(1.0, 1.0)));
        }
    }

    #[test]
    fn test_excessive_connections_adds_backoff_and_terminates() {
        // Arrange
        let s = state();
        let mut policy = ErrorPolicy::new();
        let (rate, delay) = {
            let p = s.props.lock();
            (p.get_long(PROP_COMM_MIN_XMIT_RATE, 0), p.get_long(PROP_COMM_MIN_XMIT_DELAY, 0))
        };

        // Act
        let out = policy.handle(ServerError::ExcessiveConnections, 0, Encoding::Binary, &s);

        // Assert
        assert_eq!(out.verdict, Verdict::Terminate);
        let p = s.props.lock();
        assert_eq!(p.get_long(PROP_COMM_MIN_XMIT_RATE, 0), rate + 300);
        assert_eq!(p.get_long(PROP_COMM_MIN_XMIT_DELAY, 0), delay + 300);
    }

    #[test]
    fn test_checksum_fatal_on_third() {
        let s = state();
        let mut policy = ErrorPolicy::new();
        assert_eq!(policy.handle(ServerError::PacketChecksum, 0, Encoding::Binary, &s).verdict, Verdict::Continue);
        assert_eq!(policy.handle(ServerError::BlockChecksum, 0, Encoding::Binary, &s).verdict, Verdict::Continue);
        assert_eq!(policy.handle(ServerError::PacketChecksum, 0, Encoding::Binary, &s).verdict, Verdict::Terminate);

        policy.begin_session();
        assert_eq!(policy.handle(ServerError::PacketChecksum, 0, Encoding::Binary, &s).verdict, Verdict::Continue);
    }

    #[test]
    fn test_account_invalid_fatal_on_second() {
        let s = state();
        let mut policy = ErrorPolicy::new();

        let first = policy.handle(ServerError::AccountInvalid, client_types::ACCOUNT_ID, Encoding::Binary, &s);
        let second = policy.handle(ServerError::DeviceInvalid, client_types::DEVICE_ID, Encoding::Binary, &s);

        assert_eq!(first.verdict, Verdict::Continue);
        assert!(first.resend_identification);
        assert_eq!(second.verdict, Verdict::Terminate);
        assert_eq!(policy.severe_errors(), 2);
    }

    #[test]
    fn test_id_invalid_switches_to_account_identity() {
        let s = state();
        let mut policy = ErrorPolicy::new();

        let out = policy.handle(ServerError::IdInvalid, client_types::UNIQUE_ID, Encoding::Binary, &s);

        assert_eq!(out.verdict, Verdict::Continue);
        assert!(out.use_account_identity);
        assert!(out.resend_identification);
    }

    #[test]
    fn test_inactive_is_immediately_fatal() {
        let s = state();
        let mut policy = ErrorPolicy::new();
        assert_eq!(policy.handle(ServerError::DeviceInactive, 0, Encoding::Binary, &s).verdict, Verdict::Terminate);
        assert_eq!(policy.severe_errors(), 0);
    }

    #[test]
    fn test_encoding_switches_to_base64_then_gives_up() {
        // Arrange
        let s = state();
        let mut policy = ErrorPolicy::new();

        // Act
        let first = policy.handle(ServerError::PacketEncoding, client_types::UNIQUE_ID, Encoding::Hex { checksum: false }, &s);
        let second = policy.handle(
            ServerError::PacketEncoding,
            client_types::FIXED_FMT_STD,
            Encoding::Base64 { checksum: true },
            &s,
        );

        // Assert
        assert_eq!(first.verdict, Verdict::Continue);
        assert_eq!(first.switch_encoding, Some(Encoding::Base64 { checksum: true }));
        assert!(first.resend_identification);
        assert_eq!(second.verdict, Verdict::Terminate);
        assert_eq!(second.switch_encoding, None);
    }

    #[test]
    fn test_encoding_error_while_already_base64_is_fatal() {
        // Arrange
        let s = state();
        let mut policy = ErrorPolicy::new();

        // Act
        let out = policy.handle(ServerError::PacketEncoding, client_types::UNIQUE_ID, Encoding::Base64 { checksum: false }, &s);

        // Assert
        assert_eq!(out.verdict, Verdict::Terminate);
        assert_eq!(out.switch_encoding, None);
    }

    #[test]
    fn test_header_and_duplicate_are_ignored() {
        let s = state();
        let mut policy = ErrorPolicy::new();
        for e in [ServerError::PacketHeader, ServerError::PacketType, ServerError::DuplicateEvent, ServerError::EventError] {
            assert_eq!(policy.handle(e, 0, Encoding::Binary, &s), Outcome::proceed());
        }
        assert_eq!(policy.severe_errors(), 0);
    }

    #[test]
    fn test_format_not_supported_purges_events() {
        // Arrange
        let s = state();
        queue_events(&s, 3);
        s.props.lock().set_long(PROP_COMM_CUSTOM_FORMATS, 1).unwrap();
        let mut policy = ErrorPolicy::new();

        // Act
        let out = policy.handle(ServerError::FormatNotSupported, 0x70, Encoding::Binary, &s);

        // Assert
        assert_eq!(out.verdict, Verdict::Continue);
        assert!(s.events.is_empty());
        assert_eq!(s.props.lock().get_long(PROP_COMM_CUSTOM_FORMATS, 9), 0);
    }

    #[test]
    fn test_format_not_recognized_queues_definition() {
        // Arrange
        let mut reg = TemplateRegistry::new();
        reg.register(PayloadTemplate::new(0x71, vec![Field::new(FieldType::StatusCode, false, 0, 2)]))
            .unwrap();
        let s = DeviceState::new(PropertyStore::new(), reg, system_clock());
        let mut policy = ErrorPolicy::new();

        // Act
        let out = policy.handle(ServerError::FormatNotRecognized, 0x71, Encoding::Binary, &s);

        // Assert
        assert_eq!(out.verdict, Verdict::Continue);
        let def = s.volatile.packet_at(0).expect("definition queued");
        assert_eq!(def.packet_type(), client_types::FORMAT_DEF_24);
        assert_eq!(def.payload()[0], 0x71);
    }

    #[test]
    fn test_excessive_events_drops_first_sent_and_slows_motion() {
        // Arrange
        let s = state();
        queue_events(&s, 2);
        s.events.take_unsent(2);
        {
            let mut p = s.props.lock();
            p.set_long(PROP_MOTION_IN_MOTION, 120).unwrap();
            p.set_long(PROP_MOTION_DORMANT_INTRVL, 0).unwrap();
        }
        let mut policy = ErrorPolicy::new();

        // Act
        policy.handle(ServerError::ExcessiveEvents, client_types::FIXED_FMT_STD, Encoding::Binary, &s);

        // Assert
        assert_eq!(s.events.len(), 1);
        let p = s.props.lock();
        assert_eq!(p.get_long(PROP_MOTION_IN_MOTION, 0), 180);
        assert_eq!(p.get_long(PROP_MOTION_DORMANT_INTRVL, 0), 0);
    }

    #[test]
    fn test_severe_tally_escalates() {
        // Arrange
        let s = state();
        s.props.lock().set_long(PROP_MOTION_IN_MOTION, 60).unwrap();
        let rate = s.props.lock().get_long(PROP_COMM_MIN_XMIT_RATE, 0);
        let mut policy = ErrorPolicy::new();

        // Act / Assert – doubling at the backoff threshold
        for _ in 0..SEVERE_BACKOFF_THRESHOLD {
            policy.begin_session();
            policy.handle(ServerError::ProtocolError, 0, Encoding::Binary, &s);
        }
        assert_eq!(s.props.lock().get_long(PROP_COMM_MIN_XMIT_RATE, 0), rate * 2);
        assert_eq!(s.props.lock().get_long(PROP_MOTION_IN_MOTION, 0), 60);

        // Act / Assert – periodic reporting off at the disable threshold
        for _ in SEVERE_BACKOFF_THRESHOLD..SEVERE_DISABLE_THRESHOLD {
            policy.handle(ServerError::PacketPayload, 0, Encoding::Binary, &s);
        }
        assert_eq!(policy.severe_errors(), SEVERE_DISABLE_THRESHOLD);
        assert_eq!(s.props.lock().get_long(PROP_MOTION_IN_MOTION, 9), 0);
    }

    #[test]
    fn test_severe_doubling_is_floored() {
        // Arrange
        let s = state();
        {
            let mut p = s.props.lock();
            p.set_long(PROP_COMM_MIN_XMIT_RATE, 10).unwrap();
            p.set_long(PROP_COMM_MIN_XMIT_DELAY, 45).unwrap();
        }
        let mut policy = ErrorPolicy::new();

        // Act
        for _ in 0..SEVERE_BACKOFF_THRESHOLD {
            policy.handle(ServerError::ProtocolError, 0, Encoding::Binary, &s);
        }

        // Assert
        let p = s.props.lock();
        assert_eq!(p.get_long(PROP_COMM_MIN_XMIT_RATE, 0), SEVERE_BACKOFF_FLOOR);
        assert_eq!(p.get_long(PROP_COMM_MIN_XMIT_DELAY, 0), 90);
    }
}

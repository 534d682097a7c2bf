//! The protocol session: one connection to the server from open to close.
//!
//! # Simplex and duplex (for beginners)
//!
//! A *simplex* session is fire-and-forget: identification, replies and a
//! bounded slice of events are written into a buffer that the transport
//! sends as one datagram on close.  Nothing comes back, so a successful
//! close counts as delivery of everything sent.
//!
//! A *duplex* session is a conversation.  Both sides send *blocks* of
//! packets, each closed by an end-of-block packet:
//!
//! ```text
//! client                              server
//!   | -- id, events..., EOB ---------->  |
//!   |  <--------- ACK(seq), EOB_DONE --  |
//!   | -- property replies, EOB ------->  |
//!   |  <------------------------ EOT --  |
//! ```
//!
//! The client normally waits for the server's `EOB_DONE` before sending the
//! next block.  After `EOB_SPEAK_FREELY` it may send whenever it has data.
//! Events stay queued until the server acknowledges their sequence number.
//!
//! # Transport ownership
//!
//! The session owns one optional transport per kind.  While a session runs,
//! the transport is taken out of its slot and put back afterwards, so the
//! rest of `self` stays freely borrowable.

use std::sync::Arc;

use dmtp_core::props::keys::{
    PROP_COMM_BYTES_READ, PROP_COMM_BYTES_WRITTEN, PROP_COMM_CUSTOM_FORMATS, PROP_COMM_ENCODINGS,
    PROP_COMM_FIRST_BRIEF, PROP_COMM_MAX_DUP_EVENTS, PROP_COMM_MAX_SIM_EVENTS, PROP_COMM_SPEAK_FIRST,
    PROP_GPS_EXPIRATION, PROP_STATE_ACCOUNT_ID, PROP_STATE_DEVICE_ID, PROP_STATE_UNIQUE_ID,
};
use dmtp_core::protocol::{
    client_error, decode_packet, encode_packet, server_template, Encoding, Fletcher,
    PacketError, ServerError, ServerPacketType, SEQUENCE_ALL,
};
use dmtp_core::{Accounting, Packet, PacketQueue, TransportType};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::error_policy::{ErrorPolicy, Verdict};
use super::state::DeviceState;
use super::transport::{Transport, TransportError};

/// Longest account or device id sent during identification.
pub const MAX_ID_LENGTH: usize = 20;

/// Why a session ended early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no {0} transport is configured")]
    NoTransport(TransportType),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("could not encode packet: {0}")]
    Encode(#[from] PacketError),

    #[error("server ended the session with error 0x{code:04X}")]
    ServerRejected { code: u16 },
}

/// Which identification packets the next block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentState {
    /// Identification is complete for this session.
    #[default]
    None,
    /// Send the unique id if one is set, otherwise account and device.
    SendUnique,
    /// Send account and device id.
    SendAccount,
}

/// Counters kept across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Events the server has acknowledged (or, for simplex, that were sent).
    pub events_sent: u64,
    pub sessions: u64,
    pub severe_errors: u32,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

enum Flow {
    Continue,
    Done,
}

/// Runs simplex and duplex sessions against the shared [`DeviceState`].
pub struct ProtocolSession {
    state: Arc<DeviceState>,
    accounting: Accounting,
    policy: ErrorPolicy,
    stats: SessionStats,
    preferred_encoding: Encoding,
    duplex: Option<Box<dyn Transport>>,
    simplex: Option<Box<dyn Transport>>,

    // ── per-session ───────────────────────────────────────────────────────────
    encoding: Encoding,
    ident: IdentState,
    ident_sent: IdentState,
    fletcher: Fletcher,
    block_open: bool,
    formats_sent: bool,
    speak_freely: bool,
    speak_brief: bool,
    reported_expired_fix: u32,
}

impl ProtocolSession {
    pub fn new(state: Arc<DeviceState>, preferred_encoding: Encoding) -> Self {
        Self {
            state,
            accounting: Accounting::new(),
            policy: ErrorPolicy::new(),
            stats: SessionStats::default(),
            preferred_encoding,
            duplex: None,
            simplex: None,
            encoding: preferred_encoding,
            ident: IdentState::None,
            ident_sent: IdentState::None,
            fletcher: Fletcher::new(),
            block_open: false,
            formats_sent: false,
            speak_freely: false,
            speak_brief: false,
            reported_expired_fix: 0,
        }
    }

    pub fn set_duplex_transport(&mut self, transport: Box<dyn Transport>) {
        self.duplex = Some(transport);
    }

    pub fn set_simplex_transport(&mut self, transport: Box<dyn Transport>) {
        self.simplex = Some(transport);
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            severe_errors: self.policy.severe_errors(),
            ..self.stats
        }
    }

    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    /// Identification state of the current (or last) session.
    pub fn ident_state(&self) -> IdentState {
        self.ident
    }

    /// Encoding of the current (or last) session.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The channel the queued data calls for right now.
    pub fn transport_type(&mut self) -> TransportType {
        let priority = self.state.highest_priority();
        let now = self.state.now();
        let props = self.state.props.lock();
        self.accounting.transport_type(&props, priority, now)
    }

    /// Runs one session of `kind`.  [`TransportType::None`] does nothing.
    ///
    /// # Errors
    ///
    /// See [`run_simplex`](Self::run_simplex) and [`run_duplex`](Self::run_duplex).
    pub async fn run(&mut self, kind: TransportType) -> Result<(), SessionError> {
        match kind {
            TransportType::None => Ok(()),
            TransportType::Simplex => self.run_simplex().await,
            TransportType::Duplex => self.run_duplex().await,
        }
    }

    // ── Simplex ───────────────────────────────────────────────────────────────

    /// Sends everything that fits into one simplex datagram.
    ///
    /// On success all pending and volatile packets and every sent event are
    /// removed.  On failure every queue is reset for a retry.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoTransport`] without a simplex transport, otherwise
    /// the first transport or encoding failure.
    #[instrument(skip(self), name = "simplex")]
    pub async fn run_simplex(&mut self) -> Result<(), SessionError> {
        let mut transport = self
            .simplex
            .take()
            .ok_or(SessionError::NoTransport(TransportType::Simplex))?;
        let result = self.simplex_session(transport.as_mut()).await;
        match &result {
            Ok(()) => {
                self.state.pending.delete_to_sequence(SEQUENCE_ALL);
                self.state.volatile.delete_to_sequence(SEQUENCE_ALL);
                let delivered = self.state.events.delete_to_sequence(SEQUENCE_ALL);
                self.stats.events_sent += delivered as u64;
                let now = self.state.now();
                self.accounting.mark_simplex_connection(&self.state.props.lock(), now);
                info!(events = delivered, "simplex session complete");
            }
            Err(e) => {
                warn!(error = %e, "simplex session failed");
                self.state.reset_sent();
                if let Err(e) = transport.close(false).await {
                    debug!(error = %e, "simplex close after failure");
                }
            }
        }
        self.simplex = Some(transport);
        self.end_session();
        result
    }

    async fn simplex_session(&mut self, t: &mut dyn Transport) -> Result<(), SessionError> {
        t.open().await?;
        self.begin_session();
        self.check_gps_expiry();
        let max_events = self.prop_count(PROP_COMM_MAX_SIM_EVENTS);
        self.write_block(t, false, max_events).await?;
        t.close(true).await?;
        Ok(())
    }

    // ── Duplex ────────────────────────────────────────────────────────────────

    /// Runs a duplex conversation until the server sends EOT or an error
    /// ends it.
    ///
    /// Whatever the outcome, the connection is closed, unacknowledged events
    /// are reset for the next session and the connection is counted.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoTransport`] without a duplex transport,
    /// [`SessionError::ServerRejected`] when the error policy ends the
    /// session, otherwise the first transport or encoding failure.
    #[instrument(skip(self), name = "duplex")]
    pub async fn run_duplex(&mut self) -> Result<(), SessionError> {
        let mut transport = self
            .duplex
            .take()
            .ok_or(SessionError::NoTransport(TransportType::Duplex))?;
        let mut opened = false;
        let result = self.duplex_session(transport.as_mut(), &mut opened).await;

        if opened {
            if self.block_open {
                if let Err(e) = self.write_eob(transport.as_mut(), false).await {
                    debug!(error = %e, "final end-of-block not sent");
                }
            }
            if let Err(e) = transport.close(true).await {
                debug!(error = %e, "duplex close failed");
            }
        }
        self.state.reset_sent();
        let now = self.state.now();
        self.accounting.mark_duplex_connection(&self.state.props.lock(), now);
        match &result {
            Ok(()) => info!(events_sent = self.stats.events_sent, "duplex session complete"),
            Err(e) => warn!(error = %e, "duplex session failed"),
        }
        self.duplex = Some(transport);
        self.end_session();
        result
    }

    async fn duplex_session(&mut self, t: &mut dyn Transport, opened: &mut bool) -> Result<(), SessionError> {
        t.open().await?;
        *opened = true;
        self.begin_session();
        self.check_gps_expiry();
        let speak_first = {
            let props = self.state.props.lock();
            self.speak_brief = props.get_bool(PROP_COMM_FIRST_BRIEF, false);
            props.get_bool(PROP_COMM_SPEAK_FIRST, true)
        };
        self.speak_freely = false;

        if speak_first {
            self.send_block(t).await?;
        }
        loop {
            if self.speak_freely && self.state.has_unsent_data() {
                self.send_block(t).await?;
            }
            let bytes = match t.read_packet().await {
                Ok(b) => b,
                Err(TransportError::Timeout) if self.speak_freely => continue,
                Err(e) => return Err(e.into()),
            };
            self.stats.bytes_read += bytes.len() as u64;
            let packet = match decode_packet(&bytes, false) {
                Ok(p) => p,
                Err(pe) => {
                    warn!(error = %pe, "unparseable server packet");
                    self.state.volatile.add_packet(pe.to_error_packet());
                    continue;
                }
            };
            if let Flow::Done = self.handle_server_packet(t, &packet).await? {
                return Ok(());
            }
        }
    }

    /// Sends one block: brief (identification only) on the first block when
    /// configured, full otherwise.  Delivered pending and volatile packets
    /// are dropped.
    async fn send_block(&mut self, t: &mut dyn Transport) -> Result<(), SessionError> {
        let brief = std::mem::take(&mut self.speak_brief);
        let max_events = self.prop_count(PROP_COMM_MAX_DUP_EVENTS);
        self.write_block(t, brief, max_events).await?;
        self.state.pending.delete_to_sequence(SEQUENCE_ALL);
        self.state.volatile.delete_to_sequence(SEQUENCE_ALL);
        Ok(())
    }

    async fn handle_server_packet(&mut self, t: &mut dyn Transport, packet: &Packet) -> Result<Flow, SessionError> {
        let Ok(kind) = ServerPacketType::try_from(packet.packet_type()) else {
            warn!(packet = %packet, "unknown server packet type");
            self.queue_error(client_error::PACKET_TYPE, packet);
            return Ok(Flow::Continue);
        };
        if packet.payload().len() < server_template(kind).min_length() {
            warn!(packet = %packet, "server packet too short");
            self.queue_error(client_error::PACKET_LENGTH, packet);
            return Ok(Flow::Continue);
        }
        debug!(?kind, len = packet.payload().len(), "server packet");

        match kind {
            ServerPacketType::EobDone => {
                self.speak_freely = false;
                self.send_block(t).await?;
            }
            ServerPacketType::EobSpeakFreely => self.speak_freely = true,
            ServerPacketType::Ack => self.handle_ack(packet),
            ServerPacketType::GetProperty => self.handle_get_property(packet),
            ServerPacketType::SetProperty => self.handle_set_property(packet),
            ServerPacketType::FileUpload => debug!("file upload ignored"),
            ServerPacketType::Error => {
                let mut r = packet.reader();
                let code = r.read_ulong(2, 0) as u16;
                let _header = r.read_ulong(1, 0);
                let cause_type = r.read_ulong(1, 0) as u8;
                let err = ServerError::from_code(code);
                warn!(?err, cause_type = format_args!("0x{cause_type:02X}"), "server error");
                let outcome = self.policy.handle(err, cause_type, self.encoding, &self.state);
                if outcome.use_account_identity {
                    self.ident = IdentState::SendAccount;
                } else if outcome.resend_identification && self.ident_sent != IdentState::None {
                    self.ident = self.ident_sent;
                }
                if let Some(enc) = outcome.switch_encoding {
                    self.encoding = enc;
                }
                if outcome.verdict == Verdict::Terminate {
                    return Err(SessionError::ServerRejected { code });
                }
            }
            ServerPacketType::Eot => {
                debug!("server ended the session");
                return Ok(Flow::Done);
            }
        }
        Ok(Flow::Continue)
    }

    fn handle_ack(&mut self, packet: &Packet) {
        let len = packet.payload().len();
        let sequence = if len == 0 {
            SEQUENCE_ALL
        } else {
            packet.reader().read_ulong(len.min(4), 0) as i64
        };
        let deleted = self.state.events.delete_to_sequence(sequence);
        if deleted == 0 {
            warn!(sequence, "acknowledgement matched no sent event");
            self.queue_error(client_error::PACKET_ACK, packet);
        }
        self.stats.events_sent += deleted as u64;
        self.state.events.reset_sent();
        debug!(sequence, deleted, "events acknowledged");
    }

    fn handle_get_property(&mut self, packet: &Packet) {
        let mut r = packet.reader();
        let props = self.state.props.lock();
        while r.remaining() >= 2 {
            let key = r.read_ulong(2, 0) as u16;
            let reply = match props.get_payload(key) {
                Ok(value) => Packet::property_value(key, &value),
                Err(e) => {
                    debug!(error = %e, "property read refused");
                    Packet::client_error(e.code(), Some(packet), &key.to_be_bytes())
                }
            };
            self.state.pending.add_packet(reply);
        }
    }

    fn handle_set_property(&mut self, packet: &Packet) {
        let payload = packet.payload();
        let key = u16::from_be_bytes([payload[0], payload[1]]);
        let result = self.state.props.lock().set_payload(key, &payload[2..]);
        if let Err(e) = result {
            warn!(error = %e, "property write refused");
            self.state
                .pending
                .add_packet(Packet::client_error(e.code(), Some(packet), &key.to_be_bytes()));
        }
    }

    // ── Block writing ─────────────────────────────────────────────────────────

    /// Writes identification, then (unless `brief`) format definitions,
    /// pending, volatile and up to `max_events` events, then an EOB.
    async fn write_block(&mut self, t: &mut dyn Transport, brief: bool, max_events: usize) -> Result<(), SessionError> {
        for p in self.identification_packets() {
            self.write_packet(t, &p).await?;
        }
        if !brief {
            let proactive = self.state.props.lock().get_long(PROP_COMM_CUSTOM_FORMATS, 0) >= 2;
            if proactive && !self.formats_sent {
                self.formats_sent = true;
                for def in self.state.custom_format_definitions() {
                    self.write_packet(t, &def).await?;
                }
            }
            self.write_queue(t, Queue::Pending, usize::MAX).await?;
            self.write_queue(t, Queue::Volatile, usize::MAX).await?;
            self.write_queue(t, Queue::Events, max_events).await?;
        }
        let more = self.state.events.has_unsent_packets();
        self.write_eob(t, more).await
    }

    async fn write_queue(&mut self, t: &mut dyn Transport, which: Queue, max: usize) -> Result<(), SessionError> {
        let packets = which.of(&self.state).take_unsent(max);
        for p in &packets {
            self.write_packet(t, p).await?;
        }
        Ok(())
    }

    fn identification_packets(&mut self) -> Vec<Packet> {
        let state = std::mem::take(&mut self.ident);
        if state == IdentState::None {
            return Vec::new();
        }
        self.ident_sent = state;
        let props = self.state.props.lock();
        if state == IdentState::SendUnique {
            let id = props.get_bytes(PROP_STATE_UNIQUE_ID);
            if id.len() == 6 && id.iter().any(|b| *b != 0) {
                return vec![Packet::unique_id(&id)];
            }
        }
        let mut out = Vec::with_capacity(2);
        let account = props.get_string(PROP_STATE_ACCOUNT_ID);
        if !account.is_empty() {
            out.push(Packet::account_id(&account, MAX_ID_LENGTH));
        }
        let device = props.get_string(PROP_STATE_DEVICE_ID);
        if !device.is_empty() {
            out.push(Packet::device_id(&device, MAX_ID_LENGTH));
        }
        out
    }

    async fn write_packet(&mut self, t: &mut dyn Transport, packet: &Packet) -> Result<(), SessionError> {
        let bytes = encode_packet(packet, self.encoding)?;
        let n = t.write_packet(&bytes).await?;
        self.fletcher.update(&bytes);
        self.stats.bytes_written += n as u64;
        self.block_open = true;
        Ok(())
    }

    async fn write_eob(&mut self, t: &mut dyn Transport, more: bool) -> Result<(), SessionError> {
        let checksum = (self.encoding == Encoding::Binary).then(|| self.fletcher.value());
        let bytes = encode_packet(&Packet::eob(more, checksum), self.encoding)?;
        let n = t.write_packet(&bytes).await?;
        self.stats.bytes_written += n as u64;
        self.fletcher.reset();
        self.block_open = false;
        Ok(())
    }

    fn queue_error(&self, code: u16, cause: &Packet) {
        self.state.volatile.add_packet(Packet::client_error(code, Some(cause), &[]));
    }

    // ── Session bookkeeping ───────────────────────────────────────────────────

    fn begin_session(&mut self) {
        self.encoding = self.session_encoding();
        self.ident = IdentState::SendUnique;
        self.ident_sent = IdentState::None;
        self.fletcher.reset();
        self.block_open = false;
        self.formats_sent = false;
        self.policy.begin_session();
        debug!(encoding = %self.encoding, "session started");
    }

    fn end_session(&mut self) {
        self.stats.sessions += 1;
        self.ident = IdentState::None;
        let mut props = self.state.props.lock();
        for (key, value) in [
            (PROP_COMM_BYTES_READ, self.stats.bytes_read),
            (PROP_COMM_BYTES_WRITTEN, self.stats.bytes_written),
        ] {
            if let Err(e) = props.set_long(key, value.min(u64::from(u32::MAX)) as i64) {
                debug!(error = %e, "byte counter not updated");
            }
        }
    }

    /// The preferred encoding, unless the encodings mask excludes it.
    fn session_encoding(&self) -> Encoding {
        let mask = self.state.props.lock().get_long(PROP_COMM_ENCODINGS, 0) as u64;
        if self.preferred_encoding.mask_bit() & mask != 0 {
            self.preferred_encoding
        } else {
            Encoding::Binary
        }
    }

    fn prop_count(&self, key: u16) -> usize {
        self.state.props.lock().get_long(key, 0).max(0) as usize
    }

    /// Queues a GPS-expired error once per stale fix.
    fn check_gps_expiry(&mut self) {
        let Some(fix) = self.state.last_fix() else {
            return;
        };
        let expiry = self.state.props.lock().get_long(PROP_GPS_EXPIRATION, 0);
        if expiry <= 0 || fix.point.fixtime == 0 || fix.point.fixtime == self.reported_expired_fix {
            return;
        }
        let age = i64::from(self.state.now()) - i64::from(fix.point.fixtime);
        if age > expiry {
            warn!(age, "gps fix has expired");
            self.reported_expired_fix = fix.point.fixtime;
            self.state.volatile.add_packet(Packet::client_error(
                client_error::GPS_EXPIRED,
                None,
                &fix.point.fixtime.to_be_bytes(),
            ));
        }
    }
}

#[derive(Clone, Copy)]
enum Queue {
    Pending,
    Volatile,
    Events,
}

impl Queue {
    fn of(self, state: &DeviceState) -> &PacketQueue {
        match self {
            Queue::Pending => &state.pending,
            Queue::Volatile => &state.volatile,
            Queue::Events => &state.events,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

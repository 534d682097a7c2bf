//! End-to-end session scenarios against a scripted server.
//!
//! Each test builds the same object graph `main` does (device state,
//! protocol session, session worker) with `MockTransport` standing in for the
//! sockets, then lets the worker decide which channel to use.

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use dmtp_client::application::session::{ProtocolSession, SessionError};
use dmtp_client::application::state::{Clock, DeviceState};
use dmtp_client::application::worker::{SessionWorker, WorkerConfig};
use dmtp_client::infrastructure::transport::{MockTransport, MockTransportHandle};
use dmtp_core::props::keys::{
    PROP_COMM_CUSTOM_FORMATS, PROP_COMM_MAX_CONNECTIONS, PROP_COMM_MAX_XMIT_RATE,
    PROP_COMM_MIN_XMIT_DELAY, PROP_COMM_MIN_XMIT_RATE, PROP_STATE_ACCOUNT_ID, PROP_STATE_DEVICE_ID,
};
use dmtp_core::protocol::{
    client_types, Field, FieldType, PayloadTemplate, ServerError, ServerPacketType,
    TemplateRegistry,
};
use dmtp_core::{status, GeoEvent, GeoPoint, Packet, PropertyStore, TransportType};

const T0: u32 = 1_700_000_000;

struct Rig {
    worker: SessionWorker,
    state: Arc<DeviceState>,
    duplex: MockTransportHandle,
    simplex: MockTransportHandle,
}

fn rig(templates: TemplateRegistry) -> Rig {
    let clock: Clock = Arc::new(|| T0);
    let state = DeviceState::new(PropertyStore::new(), templates, clock);
    {
        let mut p = state.props.lock();
        p.set_string(PROP_STATE_ACCOUNT_ID, "acme").unwrap();
        p.set_string(PROP_STATE_DEVICE_ID, "truck").unwrap();
        p.set_long(PROP_COMM_MAX_XMIT_RATE, 0).unwrap();
    }
    let mut session = ProtocolSession::new(Arc::clone(&state), dmtp_core::Encoding::Binary);
    let (d, duplex) = MockTransport::new(TransportType::Duplex);
    let (s, simplex) = MockTransport::new(TransportType::Simplex);
    session.set_duplex_transport(Box::new(d));
    session.set_simplex_transport(Box::new(s));
    let config = WorkerConfig {
        retry_backoff: Duration::from_millis(10),
        idle_poll: Duration::from_millis(10),
    };
    Rig {
        worker: SessionWorker::new(session, config),
        state,
        duplex,
        simplex,
    }
}

fn event(status_code: u16, offset: u32) -> GeoEvent {
    GeoEvent::new(status_code, T0 + offset, GeoPoint::with_fixtime(35.0, 139.0, T0))
}

fn server_error(err: ServerError, cause_type: u8) -> Vec<u8> {
    let mut payload = err.code().to_be_bytes().to_vec();
    payload.extend_from_slice(&[0xE0, cause_type]);
    payload
}

fn written_types(handle: &MockTransportHandle) -> Vec<u8> {
    handle.written_packets().iter().map(Packet::packet_type).collect()
}

#[tokio::test]
async fn test_low_priority_event_goes_out_by_simplex() {
    // Arrange
    let mut r = rig(TemplateRegistry::new());
    r.state.queue_event(&event(status::LOCATION, 0));

    // Act
    let result = r.worker.tick().await;

    // Assert
    assert_ok!(result.expect("a session ran"));
    assert_eq!(r.simplex.opens(), 1);
    assert_eq!(r.duplex.opens(), 0);
    assert!(r.state.events.is_empty());
    assert_eq!(r.worker.session().stats().events_sent, 1);
    assert_eq!(
        written_types(&r.simplex),
        vec![
            client_types::ACCOUNT_ID,
            client_types::DEVICE_ID,
            client_types::FIXED_FMT_STD,
            client_types::EOB_DONE
        ]
    );
}

#[tokio::test]
async fn test_normal_priority_events_are_acknowledged_over_duplex() {
    // Arrange
    let mut r = rig(TemplateRegistry::new());
    r.state.queue_event(&event(status::MOTION_START, 0));
    r.state.queue_event(&event(status::MOTION_STOP, 1));
    let last = r.state.events.packet_at(1).expect("second event").sequence as u8;
    r.duplex.push_server(ServerPacketType::Ack, &[last]);
    r.duplex.push_server(ServerPacketType::Eot, &[]);

    // Act
    let result = r.worker.tick().await;

    // Assert
    assert_ok!(result.expect("a session ran"));
    assert_eq!(r.duplex.opens(), 1);
    assert!(r.state.events.is_empty());
    assert_eq!(r.worker.session().stats().events_sent, 2);
    assert_eq!(r.duplex.closes(), vec![true]);
}

#[tokio::test]
async fn test_excessive_connections_backs_off_both_rates() {
    // Arrange
    let mut r = rig(TemplateRegistry::new());
    let (rate, delay) = {
        let p = r.state.props.lock();
        (p.get_long(PROP_COMM_MIN_XMIT_RATE, 0), p.get_long(PROP_COMM_MIN_XMIT_DELAY, 0))
    };
    r.state.queue_event(&event(status::MOTION_START, 0));
    r.duplex
        .push_server(ServerPacketType::Error, &server_error(ServerError::ExcessiveConnections, client_types::ACCOUNT_ID));
    r.duplex.push_server(ServerPacketType::Eot, &[]);

    // Act
    let result = r.worker.tick().await.expect("a session ran");

    // Assert
    let err = assert_err!(result);
    assert!(matches!(err, SessionError::ServerRejected { code: 0xF041 }));
    let p = r.state.props.lock();
    assert_eq!(p.get_long(PROP_COMM_MIN_XMIT_RATE, 0), rate + 300);
    assert_eq!(p.get_long(PROP_COMM_MIN_XMIT_DELAY, 0), delay + 300);
    drop(p);
    assert_eq!(r.state.events.len(), 1, "unacknowledged event is kept");
    assert!(r.state.events.has_unsent_packets(), "and will be resent next session");
}

#[tokio::test]
async fn test_server_reads_and_writes_properties() {
    // Arrange
    let mut r = rig(TemplateRegistry::new());
    r.state.queue_event(&event(status::MOTION_START, 0));
    let mut set = PROP_COMM_MAX_CONNECTIONS.to_be_bytes().to_vec();
    set.extend_from_slice(&[10, 8, 90]);
    r.duplex.push_server(ServerPacketType::SetProperty, &set);
    r.duplex
        .push_server(ServerPacketType::GetProperty, &PROP_COMM_MAX_CONNECTIONS.to_be_bytes());
    r.duplex.push_server(ServerPacketType::EobDone, &[]);
    r.duplex.push_server(ServerPacketType::Eot, &[]);

    // Act
    let result = r.worker.tick().await;

    // Assert
    assert_ok!(result.expect("a session ran"));
    let written = r.duplex.written_packets();
    let value = written
        .iter()
        .find(|p| p.packet_type() == client_types::PROPERTY_VALUE)
        .expect("property value reply");
    assert_eq!(value.payload(), &[0xF3, 0x11, 10, 8, 90]);
    assert!(!written.iter().any(|p| p.packet_type() == client_types::ERROR));
}

#[tokio::test]
async fn test_unrecognized_custom_format_is_redefined() {
    // Arrange
    let custom = PayloadTemplate::new(
        0x71,
        vec![
            Field::new(FieldType::StatusCode, false, 0, 2),
            Field::new(FieldType::Timestamp, false, 0, 4),
            Field::new(FieldType::GpsPoint, true, 0, 8),
        ],
    );
    let mut templates = TemplateRegistry::new();
    templates.register(custom).expect("custom type accepted");
    let mut r = rig(templates);
    r.state.props.lock().set_long(PROP_COMM_CUSTOM_FORMATS, 1).unwrap();
    r.state.set_event_type(0x71);
    r.state.queue_event(&event(status::MOTION_START, 0));
    r.duplex
        .push_server(ServerPacketType::Error, &server_error(ServerError::FormatNotRecognized, 0x71));
    r.duplex.push_server(ServerPacketType::EobDone, &[]);
    r.duplex.push_server(ServerPacketType::Eot, &[]);

    // Act
    let result = r.worker.tick().await;

    // Assert
    assert_ok!(result.expect("a session ran"));
    let types = written_types(&r.duplex);
    let first_eob = types.iter().position(|t| *t == client_types::EOB_DONE).expect("first block");
    let def_at = types
        .iter()
        .position(|t| *t == client_types::FORMAT_DEF_24)
        .expect("format definition sent");
    assert!(def_at > first_eob, "definition goes out in the second block");
    let def = &r.duplex.written_packets()[def_at];
    assert_eq!(def.payload()[..2], [0x71, 3]);
    assert!(!types[..first_eob].contains(&client_types::FORMAT_DEF_24));
}

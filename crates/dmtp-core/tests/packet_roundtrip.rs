//! Integration tests for the dmtp-core packet codec.
//!
//! These tests push every client packet builder and a custom event template
//! through each supported wire encoding and back, exercising the codec,
//! packet builders, templates and sequence counter together.

use dmtp_core::{
    decode_packet, encode_packet,
    protocol::{
        client_types, decode_event, encode_event, Encoding, Field, FieldType, Packet,
        PacketErrorKind, PayloadTemplate, SequenceCounter, TemplateRegistry,
    },
    status, GeoEvent, GeoPoint,
};

const ENCODINGS: [Encoding; 5] = [
    Encoding::Binary,
    Encoding::Base64 { checksum: false },
    Encoding::Base64 { checksum: true },
    Encoding::Hex { checksum: false },
    Encoding::Hex { checksum: true },
];

/// Encodes a client packet and decodes it back, asserting header, type and
/// payload survive unchanged.
fn roundtrip(packet: &Packet, encoding: Encoding) -> Packet {
    let bytes = encode_packet(packet, encoding).expect("encode must succeed");
    let decoded = decode_packet(&bytes, true).expect("decode must succeed");
    assert_eq!(decoded.header(), packet.header(), "{encoding}");
    assert_eq!(decoded.packet_type(), packet.packet_type(), "{encoding}");
    assert_eq!(decoded.payload(), packet.payload(), "{encoding}");
    decoded
}

fn sample_event() -> GeoEvent {
    let mut ev = GeoEvent::new(
        status::MOTION_START,
        1_700_000_123,
        GeoPoint::with_fixtime(35.6586, 139.7454, 1_700_000_100),
    );
    ev.speed_kph = 42.0;
    ev.heading = 90.0;
    ev.altitude = 40.0;
    ev.distance_km = 12.0;
    ev
}

#[test]
fn test_client_builders_survive_every_encoding() {
    let packets = vec![
        Packet::eob(false, None),
        Packet::eob(true, Some([0x12, 0x34])),
        Packet::unique_id(&[1, 2, 3, 4, 5, 6]),
        Packet::account_id("acme", 20),
        Packet::device_id("truck-07", 20),
        Packet::property_value(0xF311, &[6, 4, 60]),
        Packet::client_diagnostic(0x1234, b"diag"),
        Packet::client_error(0xF111, None, &[]),
    ];

    for p in &packets {
        for enc in ENCODINGS {
            roundtrip(p, enc);
        }
    }
}

#[test]
fn test_fixed_event_formats_roundtrip() {
    let counter = SequenceCounter::new();
    for template in [PayloadTemplate::fixed_std(), PayloadTemplate::fixed_high()] {
        // Arrange
        let packet = encode_event(&template, &sample_event(), &counter);
        assert_eq!(packet.payload().len(), template.encoded_length());

        for enc in ENCODINGS {
            // Act
            let decoded = roundtrip(&packet, enc);
            let ev = decode_event(&template, decoded.payload());

            // Assert
            assert_eq!(ev.status_code, status::MOTION_START);
            assert_eq!(ev.timestamp, 1_700_000_123);
            assert!((ev.point.latitude - 35.6586).abs() < 0.0001);
            assert!((ev.point.longitude - 139.7454).abs() < 0.0001);
            assert!((ev.speed_kph - 42.0).abs() < 0.11);
            assert!((ev.heading - 90.0).abs() < 1.5);
        }
    }
}

#[test]
fn test_custom_template_definition_roundtrip() {
    // Arrange
    let template = PayloadTemplate::new(
        client_types::CUSTOM_FORMAT_0 + 3,
        vec![
            Field::new(FieldType::StatusCode, false, 0, 2),
            Field::new(FieldType::Timestamp, false, 0, 4),
            Field::new(FieldType::GpsPoint, true, 0, 8),
            Field::new(FieldType::Odometer, true, 1, 3),
        ],
    );
    let mut registry = TemplateRegistry::new();
    registry.register(template.clone()).expect("custom type accepted");

    // Act
    let def = registry
        .format_definition(template.packet_type)
        .expect("definition exists");
    let wire = encode_packet(&def, Encoding::Base64 { checksum: true }).expect("encode");
    let back = decode_packet(&wire, true).expect("decode");
    let parsed = PayloadTemplate::from_format_definition(back.payload()).expect("valid definition");

    // Assert
    assert_eq!(back.packet_type(), client_types::FORMAT_DEF_24);
    assert_eq!(parsed, template);
}

#[test]
fn test_sequence_increments_across_events() {
    let counter = SequenceCounter::new();
    let template = PayloadTemplate::fixed_std();

    let a = encode_event(&template, &sample_event(), &counter);
    let b = encode_event(&template, &sample_event(), &counter);

    assert_eq!(b.sequence, a.sequence + 1);
}

#[test]
fn test_corrupted_ascii_payload_is_rejected() {
    // Arrange
    let p = Packet::client(0x12, b"account").expect("fits");
    let mut wire = encode_packet(&p, Encoding::Hex { checksum: true }).expect("encode");

    // Act – flip one payload hex digit ('6' -> '7')
    let pos = wire.iter().position(|&b| b == b'6').expect("payload contains a 6");
    wire[pos] = b'7';
    let err = decode_packet(&wire, true).unwrap_err();

    // Assert
    assert_eq!(err.kind, PacketErrorKind::Checksum);
}

#[test]
fn test_csv_is_rejected_both_ways() {
    let p = Packet::eob(false, None);
    assert!(encode_packet(&p, Encoding::Csv { checksum: false }).is_err());

    let err = decode_packet(b"$E000,\n", false).unwrap_err();
    assert_eq!(err.kind, PacketErrorKind::Encoding);
}

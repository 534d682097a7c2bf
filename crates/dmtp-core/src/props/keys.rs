//! Property key codes and the descriptor table the store is built from.
//!
//! Key ranges:
//!
//! | Range           | Group                              |
//! |-----------------|------------------------------------|
//! | `0xF000-0xF0FF` | commands (write-only)              |
//! | `0xF100-0xF1FF` | device state (read-only)           |
//! | `0xF300-0xF3FF` | communication limits and counters  |
//! | `0xF500-0xF5FF` | GPS sampling                       |
//! | `0xF700-0xF7FF` | motion and odometer                |

use super::value::PropType;

/// Attribute bits of a property.
pub mod attr {
    pub const NONE: u8 = 0x00;
    /// Persisted through the auxiliary store when changed.
    pub const SAVE: u8 = 0x01;
    /// The server may not set it.
    pub const READONLY: u8 = 0x02;
    /// The server may not read it.
    pub const WRITEONLY: u8 = 0x04;
}

pub const PROP_CMD_SAVE_PROPS: u16 = 0xF000;
pub const PROP_CMD_STATUS_EVENT: u16 = 0xF011;

pub const PROP_STATE_PROTOCOL: u16 = 0xF100;
pub const PROP_STATE_FIRMWARE: u16 = 0xF101;
pub const PROP_STATE_UNIQUE_ID: u16 = 0xF112;
pub const PROP_STATE_ACCOUNT_ID: u16 = 0xF114;
pub const PROP_STATE_DEVICE_ID: u16 = 0xF115;
pub const PROP_STATE_TIME: u16 = 0xF121;
pub const PROP_STATE_GPS: u16 = 0xF123;
pub const PROP_STATE_QUEUED_EVENTS: u16 = 0xF131;

pub const PROP_COMM_SPEAK_FIRST: u16 = 0xF303;
pub const PROP_COMM_FIRST_BRIEF: u16 = 0xF305;
/// `{total, duplex, window minutes}`
pub const PROP_COMM_MAX_CONNECTIONS: u16 = 0xF311;
pub const PROP_COMM_MIN_XMIT_DELAY: u16 = 0xF312;
pub const PROP_COMM_MIN_XMIT_RATE: u16 = 0xF313;
pub const PROP_COMM_MAX_XMIT_RATE: u16 = 0xF315;
pub const PROP_COMM_MAX_DUP_EVENTS: u16 = 0xF317;
pub const PROP_COMM_MAX_SIM_EVENTS: u16 = 0xF318;
/// 0 = disabled, 1 = on demand, 2 = sent proactively each session
pub const PROP_COMM_CUSTOM_FORMATS: u16 = 0xF3C0;
pub const PROP_COMM_ENCODINGS: u16 = 0xF3C1;
pub const PROP_COMM_BYTES_READ: u16 = 0xF3F1;
pub const PROP_COMM_BYTES_WRITTEN: u16 = 0xF3F2;

pub const PROP_GPS_SAMPLE_RATE: u16 = 0xF511;
pub const PROP_GPS_EXPIRATION: u16 = 0xF513;
pub const PROP_GPS_ACCURACY: u16 = 0xF521;
pub const PROP_GPS_MIN_SPEED: u16 = 0xF522;
pub const PROP_GPS_DISTANCE_DELTA: u16 = 0xF531;

pub const PROP_MOTION_START_TYPE: u16 = 0xF711;
pub const PROP_MOTION_START: u16 = 0xF712;
pub const PROP_MOTION_IN_MOTION: u16 = 0xF713;
pub const PROP_MOTION_STOP: u16 = 0xF714;
pub const PROP_MOTION_STOP_TYPE: u16 = 0xF715;
pub const PROP_MOTION_DORMANT_INTRVL: u16 = 0xF716;
pub const PROP_MOTION_DORMANT_COUNT: u16 = 0xF717;
pub const PROP_MOTION_EXCESS_SPEED: u16 = 0xF721;

/// Number of odometers.
pub const ODOMETER_COUNT: usize = 4;
/// Odometer `n` accumulated meters is `PROP_ODOMETER_0_VALUE + n`.
pub const PROP_ODOMETER_0_VALUE: u16 = 0xF770;
/// Odometer `n` limit in meters (0 = none) is `PROP_ODOMETER_0_LIMIT + n`.
pub const PROP_ODOMETER_0_LIMIT: u16 = 0xF780;
/// Odometer `n` last fix is `PROP_ODOMETER_0_GPS + n`.
pub const PROP_ODOMETER_0_GPS: u16 = 0xF790;

/// Static description of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropDescriptor {
    pub key: u16,
    pub name: &'static str,
    pub prop_type: PropType,
    pub attrs: u8,
    /// Number of elements (1..=5).
    pub arity: usize,
    /// Decimal digits for decimal types.
    pub decimals: u8,
    /// Max bytes for strings and binary, wire size for GPS.
    pub length: usize,
    /// Default in text form.
    pub default: &'static str,
}

const fn d(
    key: u16,
    name: &'static str,
    prop_type: PropType,
    attrs: u8,
    arity: usize,
    default: &'static str,
) -> PropDescriptor {
    PropDescriptor {
        key,
        name,
        prop_type,
        attrs,
        arity,
        decimals: 0,
        length: 0,
        default,
    }
}

const fn dec(key: u16, name: &'static str, prop_type: PropType, attrs: u8, default: &'static str) -> PropDescriptor {
    PropDescriptor {
        decimals: 1,
        ..d(key, name, prop_type, attrs, 1, default)
    }
}

const fn sized(
    key: u16,
    name: &'static str,
    prop_type: PropType,
    attrs: u8,
    length: usize,
    default: &'static str,
) -> PropDescriptor {
    PropDescriptor {
        length,
        ..d(key, name, prop_type, attrs, 1, default)
    }
}

use self::attr::{NONE, READONLY, SAVE, WRITEONLY};
use super::value::PropType as T;

/// Every property the client knows.
pub static PROPERTY_TABLE: &[PropDescriptor] = &[
    // commands
    d(PROP_CMD_SAVE_PROPS, "cmd.saveprops", T::Command, WRITEONLY, 1, ""),
    d(PROP_CMD_STATUS_EVENT, "cmd.status", T::Command, WRITEONLY, 1, ""),
    // state
    d(PROP_STATE_PROTOCOL, "sta.proto", T::UInt8, READONLY, 3, "0,2,1"),
    sized(PROP_STATE_FIRMWARE, "sta.firm", T::String, READONLY, 20, concat!("DMTP_RS_", env!("CARGO_PKG_VERSION"))),
    sized(PROP_STATE_UNIQUE_ID, "sta.uniq", T::Binary, SAVE | READONLY, 6, ""),
    sized(PROP_STATE_ACCOUNT_ID, "sta.account", T::String, SAVE | READONLY, 20, ""),
    sized(PROP_STATE_DEVICE_ID, "sta.device", T::String, SAVE | READONLY, 20, ""),
    d(PROP_STATE_TIME, "sta.time", T::UInt32, READONLY, 1, "0"),
    sized(PROP_STATE_GPS, "sta.gpsfix", T::Gps, READONLY, 12, ""),
    d(PROP_STATE_QUEUED_EVENTS, "sta.queued", T::UInt32, READONLY, 1, "0"),
    // communication
    d(PROP_COMM_SPEAK_FIRST, "com.first", T::Boolean, SAVE, 1, "1"),
    d(PROP_COMM_FIRST_BRIEF, "com.brief", T::Boolean, SAVE, 1, "0"),
    d(PROP_COMM_MAX_CONNECTIONS, "com.maxconn", T::UInt8, SAVE, 3, "6,4,60"),
    d(PROP_COMM_MIN_XMIT_DELAY, "com.mindelay", T::UInt16, SAVE, 1, "60"),
    d(PROP_COMM_MIN_XMIT_RATE, "com.minrate", T::UInt32, SAVE, 1, "60"),
    d(PROP_COMM_MAX_XMIT_RATE, "com.maxrate", T::UInt32, SAVE, 1, "3600"),
    d(PROP_COMM_MAX_DUP_EVENTS, "com.maxduplex", T::UInt8, SAVE, 1, "10"),
    d(PROP_COMM_MAX_SIM_EVENTS, "com.maxsimplex", T::UInt8, SAVE, 1, "4"),
    d(PROP_COMM_CUSTOM_FORMATS, "com.custfmt", T::UInt8, SAVE, 1, "0"),
    d(PROP_COMM_ENCODINGS, "com.encodng", T::UInt8, SAVE, 1, "7"),
    d(PROP_COMM_BYTES_READ, "com.rdcnt", T::UInt32, NONE, 1, "0"),
    d(PROP_COMM_BYTES_WRITTEN, "com.wrcnt", T::UInt32, NONE, 1, "0"),
    // gps
    d(PROP_GPS_SAMPLE_RATE, "gps.smprate", T::UInt16, SAVE, 1, "15"),
    d(PROP_GPS_EXPIRATION, "gps.expire", T::UInt16, SAVE, 1, "1200"),
    d(PROP_GPS_ACCURACY, "gps.accuracy", T::UInt16, SAVE, 1, "0"),
    dec(PROP_GPS_MIN_SPEED, "gps.minspd", T::UDec16, SAVE, "8.0"),
    d(PROP_GPS_DISTANCE_DELTA, "gps.dstdelt", T::UInt32, SAVE, 1, "500"),
    // motion
    d(PROP_MOTION_START_TYPE, "mot.start.type", T::UInt8, SAVE, 1, "0"),
    dec(PROP_MOTION_START, "mot.start", T::UDec16, SAVE, "0.0"),
    d(PROP_MOTION_IN_MOTION, "mot.inmotion", T::UInt16, SAVE, 1, "0"),
    d(PROP_MOTION_STOP, "mot.stop", T::UInt16, SAVE, 1, "600"),
    d(PROP_MOTION_STOP_TYPE, "mot.stop.type", T::UInt8, SAVE, 1, "0"),
    d(PROP_MOTION_DORMANT_INTRVL, "mot.dorm.rate", T::UInt32, SAVE, 1, "0"),
    d(PROP_MOTION_DORMANT_COUNT, "mot.dorm.cnt", T::UInt16, SAVE, 1, "0"),
    dec(PROP_MOTION_EXCESS_SPEED, "mot.exspeed", T::UDec16, SAVE, "0.0"),
    // odometers
    d(PROP_ODOMETER_0_VALUE, "odo.0.value", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_VALUE + 1, "odo.1.value", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_VALUE + 2, "odo.2.value", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_VALUE + 3, "odo.3.value", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_LIMIT, "odo.0.limit", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_LIMIT + 1, "odo.1.limit", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_LIMIT + 2, "odo.2.limit", T::UInt32, SAVE, 1, "0"),
    d(PROP_ODOMETER_0_LIMIT + 3, "odo.3.limit", T::UInt32, SAVE, 1, "0"),
    sized(PROP_ODOMETER_0_GPS, "odo.0.gps", T::Gps, SAVE, 10, ""),
    sized(PROP_ODOMETER_0_GPS + 1, "odo.1.gps", T::Gps, SAVE, 10, ""),
    sized(PROP_ODOMETER_0_GPS + 2, "odo.2.gps", T::Gps, SAVE, 10, ""),
    sized(PROP_ODOMETER_0_GPS + 3, "odo.3.gps", T::Gps, SAVE, 10, ""),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_and_names_are_unique() {
        let keys: HashSet<_> = PROPERTY_TABLE.iter().map(|p| p.key).collect();
        let names: HashSet<_> = PROPERTY_TABLE.iter().map(|p| p.name).collect();
        assert_eq!(keys.len(), PROPERTY_TABLE.len());
        assert_eq!(names.len(), PROPERTY_TABLE.len());
    }

    #[test]
    fn test_write_only_entries_are_commands() {
        for p in PROPERTY_TABLE {
            if p.attrs & WRITEONLY != 0 {
                assert_eq!(p.prop_type, PropType::Command, "{}", p.name);
            }
        }
    }

    #[test]
    fn test_arity_in_range() {
        assert!(PROPERTY_TABLE.iter().all(|p| (1..=5).contains(&p.arity)));
    }
}

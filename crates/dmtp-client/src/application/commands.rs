//! Handlers for the COMMAND properties the server can set.
//!
//! Handlers hold a `Weak` reference: the property store they are registered
//! in lives inside the [`DeviceState`] they point back to.

use std::sync::Weak;

use dmtp_core::props::CommandHandler;
use dmtp_core::protocol::client_error;
use dmtp_core::{GeoEvent, GeoPoint};
use tracing::info;

use super::state::DeviceState;

/// `PROP_CMD_SAVE_PROPS`: persist changed properties after the session.
pub struct SavePropsCommand {
    state: Weak<DeviceState>,
}

impl SavePropsCommand {
    pub fn new(state: Weak<DeviceState>) -> Self {
        Self { state }
    }
}

impl CommandHandler for SavePropsCommand {
    fn execute(&self, _key: u16, _args: &[u8]) -> Result<(), u16> {
        let state = self.state.upgrade().ok_or(client_error::COMMAND_ERROR)?;
        state.request_save();
        info!("property save requested by server");
        Ok(())
    }
}

/// `PROP_CMD_STATUS_EVENT`: queue an event with the 2-byte status code in
/// `args`, located at the last GPS fix.
pub struct StatusEventCommand {
    state: Weak<DeviceState>,
}

impl StatusEventCommand {
    pub fn new(state: Weak<DeviceState>) -> Self {
        Self { state }
    }
}

impl CommandHandler for StatusEventCommand {
    fn execute(&self, _key: u16, args: &[u8]) -> Result<(), u16> {
        let state = self.state.upgrade().ok_or(client_error::COMMAND_ERROR)?;
        let [hi, lo, ..] = args else {
            return Err(client_error::COMMAND_INVALID);
        };
        let code = u16::from_be_bytes([*hi, *lo]);
        let now = state.now();
        let mut event = state
            .last_fix()
            .unwrap_or_else(|| GeoEvent::new(code, now, GeoPoint::invalid()));
        event.status_code = code;
        event.timestamp = now;
        state.queue_event(&event);
        state.request_transport();
        info!(status = format_args!("0x{code:04X}"), "status event requested by server");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmtp_core::props::keys::{PROP_CMD_SAVE_PROPS, PROP_CMD_STATUS_EVENT};
    use dmtp_core::protocol::decode_event;
    use dmtp_core::status;

    #[test]
    fn test_save_command_sets_flag() {
        // Arrange
        let state = DeviceState::with_defaults();

        // Act
        let result = state.props.lock().set_payload(PROP_CMD_SAVE_PROPS, &[]);

        // Assert
        assert!(result.is_ok());
        assert!(state.take_save_request());
    }

    #[test]
    fn test_status_command_queues_event_at_last_fix() {
        // Arrange
        let state = DeviceState::with_defaults();
        let fix = GeoEvent::new(status::LOCATION, 1000, GeoPoint::with_fixtime(10.0, 20.0, 1000));
        state.set_last_fix(fix);

        // Act
        let result = state.props.lock().set_payload(PROP_CMD_STATUS_EVENT, &[0xF0, 0x20]);

        // Assert
        assert!(result.is_ok());
        let packet = state.events.packet_at(0).expect("queued");
        let template = state.template(packet.packet_type()).unwrap();
        let decoded = decode_event(&template, packet.payload());
        assert_eq!(decoded.status_code, 0xF020);
        assert!((decoded.point.latitude - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_status_command_requires_code() {
        let state = DeviceState::with_defaults();
        let handler = StatusEventCommand::new(std::sync::Arc::downgrade(&state));
        assert_eq!(handler.execute(PROP_CMD_STATUS_EVENT, &[0x01]), Err(client_error::COMMAND_INVALID));
        assert!(state.events.is_empty());
    }

    #[test]
    fn test_dropped_state_is_command_error() {
        let weak = {
            let state = DeviceState::with_defaults();
            std::sync::Arc::downgrade(&state)
        };
        let handler = SavePropsCommand::new(weak);
        assert_eq!(handler.execute(PROP_CMD_SAVE_PROPS, &[]), Err(client_error::COMMAND_ERROR));
    }
}

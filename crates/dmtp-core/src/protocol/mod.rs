//! Protocol module: payload cursor, packet types, wire codec and templates.

pub mod codec;
pub mod messages;
pub mod packet;
pub mod payload;
pub mod sequence;
pub mod template;

pub use codec::{ascii_checksum, decode_packet, encode_packet, frame_length, Fletcher};
pub use messages::*;
pub use packet::{Packet, PacketError, PacketErrorKind};
pub use payload::{PayloadError, PayloadReader, PayloadWriter, MAX_PAYLOAD_LENGTH};
pub use sequence::SequenceCounter;
pub use template::{
    decode_event, encode_event, server_template, Field, FieldType, PayloadTemplate,
    TemplateError, TemplateRegistry,
};

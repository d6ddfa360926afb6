//! Remote wire protocol: message schema and the byte-level codec boundary.

pub mod message;

pub use message::{AdvertisedTask, PROTOCOL_VERSION, WireMessage};

use crate::error::ProtocolError;

/// Serialize one message to its wire frame.
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Codec)
}

/// Decode one wire frame. Undecodable bytes are a connection-fatal
/// protocol violation at the session layer.
pub fn decode(bytes: &[u8]) -> Result<WireMessage, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Codec)
}

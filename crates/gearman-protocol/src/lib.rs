pub mod admin;
mod codec;
pub mod connection;
mod packet;

pub use codec::PacketCodec;
pub use connection::{Connection, ConnectionPool, ServerEndpoint, TextConnection};
pub use packet::{submit_type, Magic, Packet, PacketType};

use gearman_core::GearmanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid packet magic: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u32),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("{kind:?} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        kind: PacketType,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<ProtocolError> for GearmanError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::IoError(e) => GearmanError::Io(e),
            other => GearmanError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Size of the binary packet header: magic, type and body length
pub const HEADER_SIZE: usize = 12;

/// Largest packet body accepted from the wire
pub const MAX_PACKET_SIZE: usize = gearman_core::MAX_PAYLOAD_SIZE;

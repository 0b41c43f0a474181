//! Sealed engine handshake messages. Encoding is bincode; framing is the record layer.

use serde::{Deserialize, Serialize};

use super::keys::PublicKey;

/// Current handshake version. Both Hellos must carry it.
pub const PROTOCOL_VERSION: u8 = 1;

/// Alert payload announcing an orderly outbound shutdown.
pub const CLOSE_NOTIFY: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    /// First flight in each direction: X25519 public key plus fresh randomness.
    Hello {
        version: u8,
        public_key: PublicKey,
        random: [u8; 32],
    },
    /// Last flight in each direction, sealed under the new traffic key.
    Finished { verify_data: [u8; 32] },
}

impl HandshakeMessage {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

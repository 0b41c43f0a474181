//! Peer tuning knobs. Hosts deserialize this from their own config files.

use serde::Deserialize;

/// Upper bound on a single record plus framing, in bytes.
pub const MAX_PACKET_SIZE: usize = 129_000;

/// Default cap on consecutive unwraps that yield no application data in one read.
pub const DEFAULT_MAX_EMPTY_RECORDS: usize = 64;

/// Default number of released buffers a pool keeps around.
pub const DEFAULT_POOL_IDLE_BUFFERS: usize = 8;

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    /// Capacity of the scratch and raw input buffers (default 129000).
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Zero-yield unwrap cap per read (default 64).
    #[serde(default = "default_max_empty_records")]
    pub max_empty_records: usize,
    /// Idle buffers retained by the pool (default 8).
    #[serde(default = "default_pool_idle_buffers")]
    pub pool_idle_buffers: usize,
}

fn default_max_packet_size() -> usize {
    MAX_PACKET_SIZE
}
fn default_max_empty_records() -> usize {
    DEFAULT_MAX_EMPTY_RECORDS
}
fn default_pool_idle_buffers() -> usize {
    DEFAULT_POOL_IDLE_BUFFERS
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: default_max_packet_size(),
            max_empty_records: default_max_empty_records(),
            pool_idle_buffers: default_pool_idle_buffers(),
        }
    }
}

impl PeerConfig {
    /// Reject values the driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize);
        }
        if self.max_empty_records == 0 {
            return Err(ConfigError::ZeroEmptyRecordCap);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_packet_size must be non-zero")]
    ZeroPacketSize,
    #[error("max_empty_records must be non-zero")]
    ZeroEmptyRecordCap,
}

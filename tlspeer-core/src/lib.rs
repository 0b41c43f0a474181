//! Record-layer driver: feeds a TLS engine from a blocking byte transport.
//! The engine does the protocol work; the Peer moves bytes, keeps leftovers and
//! reacts to every status the engine reports.

pub mod config;
pub mod engine;
pub mod error;
pub mod peer;
pub mod pool;
pub mod sealed;
pub mod stream;

#[cfg(test)]
mod testkit;

pub use config::{ConfigError, PeerConfig, MAX_PACKET_SIZE};
pub use engine::{DelegatedTask, Engine, EngineError, EngineResult, HandshakeStatus, Status};
pub use error::{Operation, PeerError, Violation};
pub use peer::Peer;
pub use pool::{BufferPool, Lease};
pub use sealed::{Role, SealedEngine};
pub use stream::PeerStream;

//! Peer error taxonomy. Every error is fatal to the Peer that raised it.

use std::fmt;
use std::io;

use crate::engine::{EngineError, Status};

/// Driver operation an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Handshake,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Handshake => "handshake",
            Operation::Close => "close",
        };
        f.write_str(s)
    }
}

/// Engine byte accounting that breaks the contract of the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("unwrap underflow consumed {0} bytes")]
    UnderflowConsumed(usize),
    #[error("handshake unwrap produced {0} bytes of application data")]
    HandshakeProducedData(usize),
    #[error("engine closed during handshake unwrap")]
    HandshakeUnwrapClosed,
    #[error("handshake wrap returned status {0}")]
    HandshakeWrapStatus(Status),
    #[error("{during} wrap consumed {consumed} bytes from an empty source")]
    WrapConsumed { during: Operation, consumed: usize },
    #[error("engine consumed {consumed} bytes but only {available} were supplied")]
    ConsumedBeyondInput { consumed: usize, available: usize },
    #[error("engine produced {produced} bytes into a {capacity} byte buffer")]
    ProducedBeyondOutput { produced: usize, capacity: usize },
}

/// Error returned by Peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("end of stream reached during {during}")]
    UnexpectedEof { during: Operation },
    #[error("protocol violation: {0}")]
    Violation(#[from] Violation),
    #[error("{during} unwrap made no progress")]
    Stall { during: Operation },
    #[error("record exceeds maximum packet size of {max} bytes")]
    RecordTooLarge { max: usize },
    #[error("more than {limit} consecutive records carried no application data")]
    TooManyEmptyRecords { limit: usize },
    #[error("attempt to write to closed engine")]
    EngineClosed,
    #[error("engine error: {0}")]
    Engine(#[source] EngineError),
    #[error("delegated task failed: {0}")]
    Task(#[source] EngineError),
    #[error("handshake failed: {0}")]
    Handshake(#[source] Box<PeerError>),
    #[error("peer already failed")]
    Poisoned,
}

impl PeerError {
    /// Wrap as a handshake failure unless it already is one.
    pub(crate) fn into_handshake(self) -> PeerError {
        match self {
            e @ PeerError::Handshake(_) => e,
            e => PeerError::Handshake(Box::new(e)),
        }
    }
}

impl From<PeerError> for io::Error {
    fn from(e: PeerError) -> Self {
        let kind = match &e {
            PeerError::Io(inner) => inner.kind(),
            PeerError::UnexpectedEof { .. } => io::ErrorKind::UnexpectedEof,
            PeerError::EngineClosed | PeerError::Poisoned => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_wrapping_is_single_level() {
        let e = PeerError::Stall {
            during: Operation::Handshake,
        }
        .into_handshake()
        .into_handshake();
        match e {
            PeerError::Handshake(inner) => {
                assert!(matches!(*inner, PeerError::Stall { .. }))
            }
            other => panic!("expected Handshake, got {other:?}"),
        }
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let e: io::Error = PeerError::UnexpectedEof {
            during: Operation::Read,
        }
        .into();
        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
        let e: io::Error = PeerError::Violation(Violation::UnderflowConsumed(3)).into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
        assert!(e.to_string().contains("underflow consumed 3"));
    }
}

//! TLS engine capability: the state machine the Peer drives.
//! The engine owns handshake logic, record framing and keys; it never touches I/O.

use std::fmt;

/// Error raised by an engine or by one of its delegated tasks.
pub type EngineError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Deferred unit of engine work (e.g. key agreement, certificate validation).
/// The caller decides where it runs; the Peer runs it inline.
pub type DelegatedTask = Box<dyn FnOnce() -> Result<(), EngineError> + Send>;

/// What the engine needs next while a handshake is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Engine needs bytes from the peer.
    NeedUnwrap,
    /// Engine has bytes to send to the peer.
    NeedWrap,
    /// Engine is waiting on delegated tasks.
    NeedTask,
    /// Handshake just completed.
    Finished,
    /// No handshake in progress.
    NotHandshaking,
}

/// Outcome of a single wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Source did not hold a complete record; nothing was consumed.
    BufferUnderflow,
    /// Destination too small for the produced bytes.
    BufferOverflow,
    /// The engine (or the direction being driven) is closed.
    Closed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::BufferUnderflow => "BUFFER_UNDERFLOW",
            Status::BufferOverflow => "BUFFER_OVERFLOW",
            Status::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Byte accounting reported by wrap/unwrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: Status,
    /// Bytes taken from the front of the source slice.
    pub bytes_consumed: usize,
    /// Bytes written to the front of the destination slice.
    pub bytes_produced: usize,
}

impl EngineResult {
    pub fn new(status: Status, bytes_consumed: usize, bytes_produced: usize) -> Self {
        Self {
            status,
            bytes_consumed,
            bytes_produced,
        }
    }

    /// Underflow result: nothing consumed, nothing produced.
    pub fn underflow() -> Self {
        Self::new(Status::BufferUnderflow, 0, 0)
    }

    /// Closed result: nothing consumed, nothing produced.
    pub fn closed() -> Self {
        Self::new(Status::Closed, 0, 0)
    }
}

/// TLS state machine capability.
///
/// Implementations may be bindings to a native TLS library, a pure in-process
/// engine (see [`crate::sealed::SealedEngine`]) or test fakes. One engine
/// belongs to exactly one Peer.
pub trait Engine {
    /// Initialise the handshake state machine.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    fn handshake_status(&self) -> HandshakeStatus;

    /// Decode at most one record from `src` into `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Encode bytes from `src` (possibly none) into records in `dst`.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Next pending delegated task, if any. Drained repeatedly until `None`.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Signal that no more application data will be sent.
    fn close_outbound(&mut self);

    /// Whether the outbound close has been fully wrapped.
    fn is_outbound_done(&self) -> bool;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        (**self).begin_handshake()
    }
    fn handshake_status(&self) -> HandshakeStatus {
        (**self).handshake_status()
    }
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        (**self).unwrap(src, dst)
    }
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        (**self).wrap(src, dst)
    }
    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        (**self).delegated_task()
    }
    fn close_outbound(&mut self) {
        (**self).close_outbound()
    }
    fn is_outbound_done(&self) -> bool {
        (**self).is_outbound_done()
    }
}

impl<E: Engine + ?Sized> Engine for &mut E {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        (**self).begin_handshake()
    }
    fn handshake_status(&self) -> HandshakeStatus {
        (**self).handshake_status()
    }
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        (**self).unwrap(src, dst)
    }
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        (**self).wrap(src, dst)
    }
    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        (**self).delegated_task()
    }
    fn close_outbound(&mut self) {
        (**self).close_outbound()
    }
    fn is_outbound_done(&self) -> bool {
        (**self).is_outbound_done()
    }
}

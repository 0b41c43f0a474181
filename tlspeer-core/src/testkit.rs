//! Test doubles: engines, transports and an in-memory duplex pipe.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::engine::{DelegatedTask, Engine, EngineError, EngineResult, HandshakeStatus, Status};

/// Shared event log for ordering assertions.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log_entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// One scripted engine response.
pub struct Scripted {
    pub result: EngineResult,
    /// Bytes copied into the destination (must be `result.bytes_produced` long).
    pub output: Vec<u8>,
    /// Handshake status after this call.
    pub then: Option<HandshakeStatus>,
    /// Whether the outbound side is done after this call.
    pub outbound_done: bool,
}

impl Scripted {
    pub fn new(status: Status, consumed: usize, output: &[u8]) -> Self {
        Self {
            result: EngineResult::new(status, consumed, output.len()),
            output: output.to_vec(),
            then: None,
            outbound_done: false,
        }
    }

    /// Report `produced` without writing anything (for empty destinations).
    pub fn claims(status: Status, consumed: usize, produced: usize) -> Self {
        Self {
            result: EngineResult::new(status, consumed, produced),
            output: Vec::new(),
            then: None,
            outbound_done: false,
        }
    }

    pub fn then(mut self, status: HandshakeStatus) -> Self {
        self.then = Some(status);
        self
    }

    pub fn done(mut self) -> Self {
        self.outbound_done = true;
        self
    }
}

/// Engine that replays scripted wrap/unwrap results and records what it was fed.
pub struct ScriptedEngine {
    pub status: HandshakeStatus,
    unwraps: VecDeque<Scripted>,
    wraps: VecDeque<Scripted>,
    tasks: VecDeque<DelegatedTask>,
    after_tasks: Option<HandshakeStatus>,
    pub unwrap_inputs: Vec<Vec<u8>>,
    pub wrap_inputs: Vec<Vec<u8>>,
    pub outbound_closed: bool,
    pub outbound_done: bool,
    pub log: Log,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            status: HandshakeStatus::NotHandshaking,
            unwraps: VecDeque::new(),
            wraps: VecDeque::new(),
            tasks: VecDeque::new(),
            after_tasks: None,
            unwrap_inputs: Vec::new(),
            wrap_inputs: Vec::new(),
            outbound_closed: false,
            outbound_done: false,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_status(mut self, status: HandshakeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn unwrap_returns(mut self, step: Scripted) -> Self {
        self.unwraps.push_back(step);
        self
    }

    pub fn wrap_returns(mut self, step: Scripted) -> Self {
        self.wraps.push_back(step);
        self
    }

    /// Queue a task that logs `name` when run; status becomes `after` once tasks drain.
    pub fn task(mut self, name: &str, after: HandshakeStatus) -> Self {
        let log = Arc::clone(&self.log);
        let name = name.to_string();
        self.tasks.push_back(Box::new(move || -> Result<(), EngineError> {
            log.lock().unwrap().push(name);
            Ok(())
        }));
        self.after_tasks = Some(after);
        self
    }

    pub fn failing_task(mut self, message: &'static str) -> Self {
        self.tasks
            .push_back(Box::new(move || -> Result<(), EngineError> { Err(message.into()) }));
        self
    }

    pub fn remaining_unwraps(&self) -> usize {
        self.unwraps.len()
    }

    fn apply(&mut self, step: Scripted, dst: &mut [u8]) -> EngineResult {
        dst[..step.output.len()].copy_from_slice(&step.output);
        if let Some(s) = step.then {
            self.status = s;
        }
        if step.outbound_done {
            self.outbound_done = true;
        }
        step.result
    }
}

impl Engine for ScriptedEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        self.log.lock().unwrap().push("begin".into());
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        self.log.lock().unwrap().push(format!("status {:?}", self.status));
        self.status
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.unwrap_inputs.push(src.to_vec());
        let step = self.unwraps.pop_front().ok_or("unwrap script exhausted")?;
        Ok(self.apply(step, dst))
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.wrap_inputs.push(src.to_vec());
        let step = self.wraps.pop_front().ok_or("wrap script exhausted")?;
        Ok(self.apply(step, dst))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        let task = self.tasks.pop_front();
        if task.is_none() {
            if let Some(s) = self.after_tasks.take() {
                self.status = s;
            }
        }
        task
    }

    fn close_outbound(&mut self) {
        self.outbound_closed = true;
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }
}

const LEN_SIZE: usize = 4;
/// Length value that marks a close record.
const CLOSE_MARK: u32 = u32::MAX;

/// Plaintext record: 4 bytes LE length + payload. An empty payload is a control record.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn close_frame() -> Vec<u8> {
    CLOSE_MARK.to_le_bytes().to_vec()
}

/// Engine speaking the length-prefix framing above, without any handshake.
/// Wrap splits payloads into records of at most `max_fragment` bytes.
pub struct FramingEngine {
    max_fragment: usize,
    close_pending: bool,
    outbound_done: bool,
    pub unwrap_inputs: Vec<Vec<u8>>,
}

impl FramingEngine {
    pub fn new(max_fragment: usize) -> Self {
        Self {
            max_fragment,
            close_pending: false,
            outbound_done: false,
            unwrap_inputs: Vec::new(),
        }
    }
}

impl Engine for FramingEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        HandshakeStatus::NotHandshaking
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.unwrap_inputs.push(src.to_vec());
        if src.len() < LEN_SIZE {
            return Ok(EngineResult::underflow());
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if len == CLOSE_MARK {
            return Ok(EngineResult::new(Status::Closed, LEN_SIZE, 0));
        }
        let len = len as usize;
        if src.len() < LEN_SIZE + len {
            return Ok(EngineResult::underflow());
        }
        if dst.len() < len {
            return Ok(EngineResult::new(Status::BufferOverflow, 0, 0));
        }
        dst[..len].copy_from_slice(&src[LEN_SIZE..LEN_SIZE + len]);
        Ok(EngineResult::new(Status::Ok, LEN_SIZE + len, len))
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if self.outbound_done {
            return Ok(EngineResult::closed());
        }
        if self.close_pending {
            dst[..LEN_SIZE].copy_from_slice(&close_frame());
            self.outbound_done = true;
            return Ok(EngineResult::new(Status::Closed, 0, LEN_SIZE));
        }
        let take = src.len().min(self.max_fragment);
        if take == 0 {
            return Ok(EngineResult::new(Status::Ok, 0, 0));
        }
        let record = frame(&src[..take]);
        dst[..record.len()].copy_from_slice(&record);
        Ok(EngineResult::new(Status::Ok, take, record.len()))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_outbound(&mut self) {
        self.close_pending = true;
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }
}

/// Reader that hands out at most one chunk per `read`, cycling through `sizes`.
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    sizes: Vec<usize>,
    next: usize,
}

impl ChunkedReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self::with_sizes(data, vec![chunk])
    }

    pub fn with_sizes(data: Vec<u8>, sizes: Vec<usize>) -> Self {
        assert!(sizes.iter().all(|&s| s > 0));
        Self {
            data,
            pos: 0,
            sizes,
            next: 0,
        }
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.sizes[self.next % self.sizes.len()];
        self.next += 1;
        let n = chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(Vec<u8>),
    Flush,
}

/// Writer recording every write and flush in order.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    pub events: Vec<Event>,
}

impl RecordingWriter {
    /// Concatenation of everything written.
    pub fn written(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write(b) => Some(b.as_slice()),
                Event::Flush => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.events.iter().filter(|e| **e == Event::Flush).count()
    }
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.events.push(Event::Write(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.events.push(Event::Flush);
        Ok(())
    }
}

/// Reading half of an in-memory pipe. Returns end-of-stream once the writer is gone.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Writing half of an in-memory pipe.
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn pipe() -> (PipeReader, PipeWriter) {
    let (tx, rx) = channel();
    (
        PipeReader {
            rx,
            pending: Vec::new(),
            pos: 0,
        },
        PipeWriter { tx },
    )
}

/// Two connected endpoints: what one side writes the other reads.
pub fn duplex() -> ((PipeReader, PipeWriter), (PipeReader, PipeWriter)) {
    let (a_in, b_out) = pipe();
    let (b_in, a_out) = pipe();
    ((a_in, a_out), (b_in, b_out))
}

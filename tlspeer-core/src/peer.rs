//! Peer: blocking record-layer driver between a byte transport and a TLS engine.
//!
//! The engine decodes at most one record per unwrap and may consume less than it is
//! given. Whatever it leaves behind is kept as `leftover` and fed back first on the
//! next read or handshake unwrap, so records may span any number of transport reads
//! and any number of records may arrive in one read.

use std::io::{self, Read, Write};
use std::sync::Arc;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::PeerConfig;
use crate::engine::{Engine, EngineResult, HandshakeStatus, Status};
use crate::error::{Operation, PeerError, Violation};
use crate::pool::BufferPool;

/// One TLS connection: input, output, engine and undecoded leftover bytes.
///
/// Not safe for concurrent use; every operation takes `&mut self`.
pub struct Peer<R, W, E> {
    input: R,
    output: W,
    engine: E,
    leftover: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
    max_empty_records: usize,
    id: Uuid,
    failed: bool,
}

impl<R: Read, W: Write, E: Engine> Peer<R, W, E> {
    /// Peer with default configuration and its own buffer pool.
    pub fn new(input: R, output: W, engine: E) -> Self {
        Self::with_config(input, output, engine, &PeerConfig::default())
    }

    pub fn with_config(input: R, output: W, engine: E, config: &PeerConfig) -> Self {
        let pool = BufferPool::new(config.max_packet_size, config.pool_idle_buffers);
        Self::with_pool(input, output, engine, pool, config)
    }

    /// Peer borrowing scratch buffers from a shared pool. The pool's buffer
    /// length is the maximum packet size.
    pub fn with_pool(
        input: R,
        output: W,
        engine: E,
        pool: Arc<BufferPool>,
        config: &PeerConfig,
    ) -> Self {
        Self {
            input,
            output,
            engine,
            leftover: None,
            pool,
            max_empty_records: config.max_empty_records,
            id: Uuid::new_v4(),
            failed: false,
        }
    }

    /// Connection id recorded on every log event of this Peer.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Bytes read from the transport but not yet consumed by the engine.
    pub fn leftover(&self) -> Option<&[u8]> {
        self.leftover.as_deref()
    }

    /// Whether a previous operation failed; the Peer is unusable if so.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Give back the transport halves and the engine for teardown.
    pub fn into_parts(self) -> (R, W, E) {
        (self.input, self.output, self.engine)
    }

    /// Next decoded application record, or `None` once the peer closed gracefully.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>, PeerError> {
        self.guard(Self::read_record)
    }

    /// Wrap and send all of `data`, then flush.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PeerError> {
        self.guard(|p| p.write_records(data))
    }

    /// Run the handshake to completion. Any failure is reported as `PeerError::Handshake`.
    pub fn handshake(&mut self) -> Result<(), PeerError> {
        self.guard(|p| p.run_handshake().map_err(PeerError::into_handshake))
    }

    /// Send the close-notify and flush. The transport itself stays open.
    pub fn close(&mut self) -> Result<(), PeerError> {
        self.guard(Self::close_outbound)
    }

    fn guard<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, PeerError>,
    ) -> Result<T, PeerError> {
        if self.failed {
            return Err(PeerError::Poisoned);
        }
        let res = op(self);
        if let Err(e) = &res {
            self.failed = true;
            warn!(peer = %self.id, error = %e, "peer failed");
        }
        res
    }

    fn read_record(&mut self) -> Result<Option<Vec<u8>>, PeerError> {
        let mut raw = self.pool.lease();
        let mut scratch = self.pool.lease();
        let mut empty = 0usize;
        loop {
            let res = self.unwrap_next(&mut raw, &mut scratch, Operation::Read)?;
            if res.status == Status::Closed {
                debug!(peer = %self.id, "peer closed");
                return Ok(None);
            }
            check_produced(&res, scratch.len())?;
            if res.bytes_produced > 0 {
                return Ok(Some(scratch[..res.bytes_produced].to_vec()));
            }
            if res.bytes_consumed == 0 {
                return Err(PeerError::Stall {
                    during: Operation::Read,
                });
            }
            // Control record (alert, key update, ...): keep decoding.
            empty += 1;
            if empty > self.max_empty_records {
                return Err(PeerError::TooManyEmptyRecords {
                    limit: self.max_empty_records,
                });
            }
        }
    }

    /// Feed leftover plus fresh transport bytes to the engine until it stops
    /// underflowing. Unconsumed input is kept as the new leftover.
    fn unwrap_next(
        &mut self,
        raw: &mut [u8],
        dst: &mut [u8],
        during: Operation,
    ) -> Result<EngineResult, PeerError> {
        let max = raw.len();
        let mut filled = 0;
        if let Some(left) = self.leftover.take() {
            if left.len() > max {
                return Err(PeerError::RecordTooLarge { max });
            }
            raw[..left.len()].copy_from_slice(&left);
            filled = left.len();
        }
        let mut need_read = filled == 0;
        loop {
            if need_read {
                if filled == max {
                    return Err(PeerError::RecordTooLarge { max });
                }
                let n = read_some(&mut self.input, &mut raw[filled..])?;
                if n == 0 {
                    return Err(PeerError::UnexpectedEof { during });
                }
                filled += n;
            }
            let res = self
                .engine
                .unwrap(&raw[..filled], dst)
                .map_err(PeerError::Engine)?;
            trace!(
                peer = %self.id,
                %during,
                status = %res.status,
                available = filled,
                consumed = res.bytes_consumed,
                produced = res.bytes_produced,
                "unwrap"
            );
            if res.bytes_consumed > filled {
                return Err(Violation::ConsumedBeyondInput {
                    consumed: res.bytes_consumed,
                    available: filled,
                }
                .into());
            }
            match res.status {
                Status::BufferUnderflow => {
                    if res.bytes_consumed != 0 {
                        return Err(Violation::UnderflowConsumed(res.bytes_consumed).into());
                    }
                    need_read = true;
                }
                Status::Closed => return Ok(res),
                Status::Ok | Status::BufferOverflow => {
                    if res.bytes_consumed < filled {
                        let rest = &raw[res.bytes_consumed..filled];
                        debug!(peer = %self.id, bytes = rest.len(), "retaining leftover");
                        self.leftover = Some(rest.to_vec());
                    }
                    return Ok(res);
                }
            }
        }
    }

    fn write_records(&mut self, data: &[u8]) -> Result<(), PeerError> {
        let mut scratch = self.pool.lease();
        let mut offset = 0;
        loop {
            let res = self
                .engine
                .wrap(&data[offset..], &mut scratch)
                .map_err(PeerError::Engine)?;
            trace!(
                peer = %self.id,
                status = %res.status,
                consumed = res.bytes_consumed,
                produced = res.bytes_produced,
                "wrap"
            );
            if res.status == Status::Closed {
                return Err(PeerError::EngineClosed);
            }
            if res.bytes_consumed > data.len() - offset {
                return Err(Violation::ConsumedBeyondInput {
                    consumed: res.bytes_consumed,
                    available: data.len() - offset,
                }
                .into());
            }
            check_produced(&res, scratch.len())?;
            if res.bytes_produced > 0 {
                self.output.write_all(&scratch[..res.bytes_produced])?;
            }
            offset += res.bytes_consumed;
            if offset == data.len() {
                self.output.flush()?;
                return Ok(());
            }
            if res.bytes_consumed == 0 && res.bytes_produced == 0 {
                return Err(PeerError::Stall {
                    during: Operation::Write,
                });
            }
        }
    }

    fn run_handshake(&mut self) -> Result<(), PeerError> {
        self.engine.begin_handshake().map_err(PeerError::Engine)?;
        loop {
            let status = self.engine.handshake_status();
            debug!(peer = %self.id, ?status, "handshake step");
            match status {
                HandshakeStatus::NeedUnwrap => self.handshake_unwrap()?,
                HandshakeStatus::NeedWrap => self.handshake_wrap()?,
                HandshakeStatus::NeedTask => self.run_delegated_tasks()?,
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => break,
            }
        }
        debug!(peer = %self.id, "handshake complete");
        Ok(())
    }

    fn handshake_unwrap(&mut self) -> Result<(), PeerError> {
        let mut raw = self.pool.lease();
        let mut no_app_data = [0u8; 0];
        let res = self.unwrap_next(&mut raw, &mut no_app_data, Operation::Handshake)?;
        if res.bytes_produced != 0 || res.status == Status::BufferOverflow {
            return Err(Violation::HandshakeProducedData(res.bytes_produced).into());
        }
        if res.status == Status::Closed {
            return Err(Violation::HandshakeUnwrapClosed.into());
        }
        if res.bytes_consumed == 0 && self.engine.handshake_status() == HandshakeStatus::NeedUnwrap
        {
            return Err(PeerError::Stall {
                during: Operation::Handshake,
            });
        }
        Ok(())
    }

    fn handshake_wrap(&mut self) -> Result<(), PeerError> {
        let mut scratch = self.pool.lease();
        let res = self
            .engine
            .wrap(&[], &mut scratch)
            .map_err(PeerError::Engine)?;
        trace!(peer = %self.id, status = %res.status, produced = res.bytes_produced, "handshake wrap");
        if res.status != Status::Ok {
            return Err(Violation::HandshakeWrapStatus(res.status).into());
        }
        if res.bytes_consumed != 0 {
            return Err(Violation::WrapConsumed {
                during: Operation::Handshake,
                consumed: res.bytes_consumed,
            }
            .into());
        }
        check_produced(&res, scratch.len())?;
        if res.bytes_produced == 0 && self.engine.handshake_status() == HandshakeStatus::NeedWrap {
            return Err(PeerError::Stall {
                during: Operation::Handshake,
            });
        }
        self.output.write_all(&scratch[..res.bytes_produced])?;
        self.output.flush()?;
        Ok(())
    }

    fn run_delegated_tasks(&mut self) -> Result<(), PeerError> {
        let mut ran = 0usize;
        while let Some(task) = self.engine.delegated_task() {
            task().map_err(PeerError::Task)?;
            ran += 1;
        }
        debug!(peer = %self.id, ran, "delegated tasks drained");
        if ran == 0 && self.engine.handshake_status() == HandshakeStatus::NeedTask {
            return Err(PeerError::Stall {
                during: Operation::Handshake,
            });
        }
        Ok(())
    }

    fn close_outbound(&mut self) -> Result<(), PeerError> {
        self.engine.close_outbound();
        let mut scratch = self.pool.lease();
        while !self.engine.is_outbound_done() {
            let res = self
                .engine
                .wrap(&[], &mut scratch)
                .map_err(PeerError::Engine)?;
            trace!(peer = %self.id, status = %res.status, produced = res.bytes_produced, "close wrap");
            check_produced(&res, scratch.len())?;
            if res.bytes_produced == 0 {
                break;
            }
            if res.bytes_consumed != 0 {
                return Err(Violation::WrapConsumed {
                    during: Operation::Close,
                    consumed: res.bytes_consumed,
                }
                .into());
            }
            self.output.write_all(&scratch[..res.bytes_produced])?;
        }
        self.output.flush()?;
        debug!(peer = %self.id, "outbound closed");
        Ok(())
    }
}

/// The engine may not report more output than the buffer it was handed.
fn check_produced(res: &EngineResult, capacity: usize) -> Result<(), PeerError> {
    if res.bytes_produced > capacity {
        return Err(Violation::ProducedBeyondOutput {
            produced: res.bytes_produced,
            capacity,
        }
        .into());
    }
    Ok(())
}

/// One blocking read, retried on `Interrupted`. `Ok(0)` is end-of-stream.
fn read_some<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            res => return res,
        }
    }
}

//! `std::io::Read`/`Write` over a handshaken Peer, hiding record boundaries.

use std::io::{self, Read, Write};

use crate::engine::Engine;
use crate::peer::Peer;

/// Byte-stream view of a Peer. Decoded records are buffered and served in order;
/// reads return `Ok(0)` once the remote side closed.
pub struct PeerStream<R, W, E> {
    peer: Peer<R, W, E>,
    pending: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read, W: Write, E: Engine> PeerStream<R, W, E> {
    pub fn new(peer: Peer<R, W, E>) -> Self {
        Self {
            peer,
            pending: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    pub fn peer(&self) -> &Peer<R, W, E> {
        &self.peer
    }

    /// Close the outbound side and hand the Peer back.
    pub fn shutdown(mut self) -> io::Result<Peer<R, W, E>> {
        self.peer.close()?;
        Ok(self.peer)
    }

    pub fn into_inner(self) -> Peer<R, W, E> {
        self.peer
    }
}

impl<R: Read, W: Write, E: Engine> Read for PeerStream<R, W, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.pending.len() {
            if self.eof {
                return Ok(0);
            }
            match self.peer.read()? {
                Some(record) => {
                    self.pending = record;
                    self.pos = 0;
                }
                None => self.eof = true,
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read, W: Write, E: Engine> Write for PeerStream<R, W, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.peer.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Peer::write already flushes after every call.
        Ok(())
    }
}

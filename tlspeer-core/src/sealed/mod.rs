//! Sealed engine: a small in-process [`Engine`] with an authenticated record protocol.
//!
//! Each side sends a Hello carrying its X25519 public key and randomness. The key
//! agreement is handed out as a delegated task; once it has run, both sides derive
//! per-direction ChaCha20-Poly1305 keys and exchange sealed Finished messages over the
//! transcript. Application data and alerts are sealed with the record sequence number
//! as nonce.

pub mod handshake;
pub mod keys;
pub mod record;

use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::engine::{DelegatedTask, Engine, EngineError, EngineResult, HandshakeStatus, Status};
use handshake::{HandshakeMessage, CLOSE_NOTIFY, PROTOCOL_VERSION};
use keys::{Keypair, PublicKey, TrafficKeys, TAG_LEN};
use record::{ContentType, RecordDecodeError, RecordEncodeError, MAX_FRAGMENT_LEN};

/// Which side of the handshake speaks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SendHello,
    RecvHello,
    Agreeing,
    SendFinished,
    RecvFinished,
    Established,
}

struct Session {
    write_key: [u8; 32],
    read_key: [u8; 32],
    own_finished: [u8; 32],
    peer_finished: [u8; 32],
    send_seq: u64,
    recv_seq: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SealedError {
    #[error("handshake already started")]
    AlreadyStarted,
    #[error("unsupported handshake version {0}")]
    BadVersion(u8),
    #[error("unexpected {0:?} record")]
    UnexpectedRecord(ContentType),
    #[error("unexpected handshake message")]
    UnexpectedMessage,
    #[error("finished verification failed")]
    BadFinished,
    #[error("received alert {0}")]
    Alert(u8),
    #[error("peer public key missing")]
    NoPeerKey,
    #[error("traffic keys not established")]
    NoKeys,
    #[error("key agreement produced an all-zero secret")]
    LowOrderKey,
    #[error("malformed handshake message: {0}")]
    Malformed(#[source] bincode::Error),
    #[error(transparent)]
    Record(#[from] RecordDecodeError),
}

/// In-process TLS-like engine. One instance per connection.
pub struct SealedEngine {
    role: Role,
    keypair: Arc<Keypair>,
    random: [u8; 32],
    state: State,
    client_hello: Vec<u8>,
    server_hello: Vec<u8>,
    peer_random: [u8; 32],
    peer_public: Option<PublicKey>,
    task: Option<DelegatedTask>,
    agreed: Arc<Mutex<Option<[u8; 32]>>>,
    session: Option<Session>,
    close_pending: bool,
    outbound_done: bool,
    inbound_done: bool,
}

impl SealedEngine {
    pub fn new(role: Role, keypair: Arc<Keypair>) -> Self {
        Self {
            role,
            keypair,
            random: keys::random_bytes(),
            state: State::Idle,
            client_hello: Vec::new(),
            server_hello: Vec::new(),
            peer_random: [0u8; 32],
            peer_public: None,
            task: None,
            agreed: Arc::new(Mutex::new(None)),
            session: None,
            close_pending: false,
            outbound_done: false,
            inbound_done: false,
        }
    }

    /// Client engine with a freshly generated keypair.
    pub fn client() -> Self {
        Self::new(Role::Client, Arc::new(Keypair::generate()))
    }

    /// Server engine with a freshly generated keypair.
    pub fn server() -> Self {
        Self::new(Role::Server, Arc::new(Keypair::generate()))
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    /// Whether the peer's close-notify has been unwrapped.
    pub fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    fn agreement_ready(&self) -> bool {
        self.agreed.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Queue the X25519 agreement as a delegated task.
    fn begin_agreement(&mut self) -> Result<(), SealedError> {
        let peer_public = self.peer_public.ok_or(SealedError::NoPeerKey)?;
        let keypair = Arc::clone(&self.keypair);
        let slot = Arc::clone(&self.agreed);
        self.task = Some(Box::new(move || -> Result<(), EngineError> {
            let secret = keypair.shared_secret(&peer_public);
            if secret.iter().all(|&b| b == 0) {
                return Err(SealedError::LowOrderKey.into());
            }
            *slot.lock().map_err(|_| "agreement slot poisoned")? = Some(secret);
            Ok(())
        }));
        self.state = State::Agreeing;
        Ok(())
    }

    /// Derive traffic keys once the agreement task has delivered its secret.
    fn settle(&mut self) {
        if self.state != State::Agreeing {
            return;
        }
        let shared = match self.agreed.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(shared) = shared else {
            return;
        };
        let (client_random, server_random) = match self.role {
            Role::Client => (self.random, self.peer_random),
            Role::Server => (self.peer_random, self.random),
        };
        let tk = TrafficKeys::derive(&shared, &client_random, &server_random);
        let transcript = keys::transcript_hash(&self.client_hello, &self.server_hello);
        let client_verify = keys::verify_data(&tk.client_finished, &transcript);
        let server_verify = keys::verify_data(&tk.server_finished, &transcript);
        let session = match self.role {
            Role::Client => Session {
                write_key: tk.client_write,
                read_key: tk.server_write,
                own_finished: client_verify,
                peer_finished: server_verify,
                send_seq: 0,
                recv_seq: 0,
            },
            Role::Server => Session {
                write_key: tk.server_write,
                read_key: tk.client_write,
                own_finished: server_verify,
                peer_finished: client_verify,
                send_seq: 0,
                recv_seq: 0,
            },
        };
        self.session = Some(session);
        self.state = State::SendFinished;
        trace!(role = ?self.role, "traffic keys derived");
    }

    /// Seal `plaintext` into one record at the front of `dst`. `None` when it does not fit.
    fn write_sealed(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        dst: &mut [u8],
    ) -> Result<Option<usize>, EngineError> {
        if dst.len() < record::record_len(plaintext.len() + TAG_LEN) {
            return Ok(None);
        }
        let session = self.session.as_mut().ok_or(SealedError::NoKeys)?;
        let sealed = keys::seal(&session.write_key, session.send_seq, plaintext)?;
        session.send_seq += 1;
        Ok(Some(record::encode_record(content_type, &sealed, dst)?))
    }

    fn open_sealed(&mut self, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        let session = self.session.as_mut().ok_or(SealedError::NoKeys)?;
        let plain = keys::open(&session.read_key, session.recv_seq, payload)?;
        session.recv_seq += 1;
        Ok(plain)
    }

    fn unwrap_hello(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let msg = HandshakeMessage::decode(payload).map_err(SealedError::Malformed)?;
        let HandshakeMessage::Hello {
            version,
            public_key,
            random,
        } = msg
        else {
            return Err(SealedError::UnexpectedMessage.into());
        };
        if version != PROTOCOL_VERSION {
            return Err(SealedError::BadVersion(version).into());
        }
        self.peer_random = random;
        self.peer_public = Some(public_key);
        match self.role {
            Role::Client => {
                self.server_hello = payload.to_vec();
                self.begin_agreement()?;
            }
            Role::Server => {
                self.client_hello = payload.to_vec();
                self.state = State::SendHello;
            }
        }
        Ok(())
    }

    fn unwrap_finished(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let body = self.open_sealed(payload)?;
        let expected = self
            .session
            .as_ref()
            .map(|s| s.peer_finished)
            .ok_or(SealedError::NoKeys)?;
        match HandshakeMessage::decode(&body).map_err(SealedError::Malformed)? {
            HandshakeMessage::Finished { verify_data } if verify_data == expected => {
                self.state = State::Established;
                Ok(())
            }
            _ => Err(SealedError::BadFinished.into()),
        }
    }

    fn wrap_hello(&mut self, dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let hello = HandshakeMessage::Hello {
            version: PROTOCOL_VERSION,
            public_key: *self.keypair.public_key(),
            random: self.random,
        }
        .encode()
        .map_err(SealedError::Malformed)?;
        let n = match record::encode_record(ContentType::Handshake, &hello, dst) {
            Ok(n) => n,
            Err(RecordEncodeError::NoRoom { .. }) => return Ok(overflow()),
            Err(e) => return Err(e.into()),
        };
        match self.role {
            Role::Client => {
                self.client_hello = hello;
                self.state = State::RecvHello;
            }
            Role::Server => {
                self.server_hello = hello;
                self.begin_agreement()?;
            }
        }
        Ok(EngineResult::new(Status::Ok, 0, n))
    }

    fn wrap_finished(&mut self, dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let verify_data = self
            .session
            .as_ref()
            .map(|s| s.own_finished)
            .ok_or(SealedError::NoKeys)?;
        let msg = HandshakeMessage::Finished { verify_data }
            .encode()
            .map_err(SealedError::Malformed)?;
        let Some(n) = self.write_sealed(ContentType::Handshake, &msg, dst)? else {
            return Ok(overflow());
        };
        self.state = State::RecvFinished;
        Ok(EngineResult::new(Status::Ok, 0, n))
    }

    fn wrap_close_notify(&mut self, dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let written = if self.session.is_some() {
            self.write_sealed(ContentType::Alert, &[CLOSE_NOTIFY], dst)?
        } else {
            match record::encode_record(ContentType::Alert, &[CLOSE_NOTIFY], dst) {
                Ok(n) => Some(n),
                Err(RecordEncodeError::NoRoom { .. }) => None,
                Err(e) => return Err(e.into()),
            }
        };
        let Some(n) = written else {
            return Ok(overflow());
        };
        self.outbound_done = true;
        Ok(EngineResult::new(Status::Closed, 0, n))
    }
}

fn overflow() -> EngineResult {
    EngineResult::new(Status::BufferOverflow, 0, 0)
}

impl Engine for SealedEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.state != State::Idle {
            return Err(SealedError::AlreadyStarted.into());
        }
        self.state = match self.role {
            Role::Client => State::SendHello,
            Role::Server => State::RecvHello,
        };
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        match self.state {
            State::Idle | State::Established => HandshakeStatus::NotHandshaking,
            State::SendHello | State::SendFinished => HandshakeStatus::NeedWrap,
            State::RecvHello | State::RecvFinished => HandshakeStatus::NeedUnwrap,
            State::Agreeing => {
                if self.task.is_none() && self.agreement_ready() {
                    HandshakeStatus::NeedWrap
                } else {
                    HandshakeStatus::NeedTask
                }
            }
        }
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.settle();
        if self.inbound_done {
            return Ok(EngineResult::closed());
        }
        let (content_type, payload, used) = match record::decode_record(src) {
            Ok(r) => r,
            Err(RecordDecodeError::NeedMore) => return Ok(EngineResult::underflow()),
            Err(e) => return Err(SealedError::Record(e).into()),
        };
        trace!(role = ?self.role, ?content_type, used, "sealed unwrap");
        match (content_type, self.state) {
            (ContentType::Alert, _) => {
                // Plaintext alerts only before keys exist.
                let body = if self.session.is_none() && payload.len() == 1 {
                    payload.to_vec()
                } else {
                    self.open_sealed(payload)?
                };
                if body != [CLOSE_NOTIFY] {
                    return Err(SealedError::Alert(body.first().copied().unwrap_or(u8::MAX)).into());
                }
                self.inbound_done = true;
                Ok(EngineResult::new(Status::Closed, used, 0))
            }
            (ContentType::Handshake, State::RecvHello) => {
                self.unwrap_hello(payload)?;
                Ok(EngineResult::new(Status::Ok, used, 0))
            }
            (ContentType::Handshake, State::RecvFinished) => {
                self.unwrap_finished(payload)?;
                Ok(EngineResult::new(Status::Ok, used, 0))
            }
            (ContentType::Application, State::Established) => {
                if dst.len() < payload.len().saturating_sub(TAG_LEN) {
                    return Ok(overflow());
                }
                let plain = self.open_sealed(payload)?;
                dst[..plain.len()].copy_from_slice(&plain);
                Ok(EngineResult::new(Status::Ok, used, plain.len()))
            }
            (ct, _) => Err(SealedError::UnexpectedRecord(ct).into()),
        }
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.settle();
        if self.outbound_done {
            return Ok(EngineResult::closed());
        }
        if self.close_pending {
            return self.wrap_close_notify(dst);
        }
        match self.state {
            State::SendHello => self.wrap_hello(dst),
            State::SendFinished => self.wrap_finished(dst),
            State::Established => {
                let take = src.len().min(MAX_FRAGMENT_LEN);
                if take == 0 {
                    return Ok(EngineResult::new(Status::Ok, 0, 0));
                }
                let Some(n) = self.write_sealed(ContentType::Application, &src[..take], dst)?
                else {
                    return Ok(overflow());
                };
                trace!(role = ?self.role, take, n, "sealed wrap");
                Ok(EngineResult::new(Status::Ok, take, n))
            }
            _ => Ok(EngineResult::new(Status::Ok, 0, 0)),
        }
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        self.task.take()
    }

    fn close_outbound(&mut self) {
        if !self.outbound_done {
            self.close_pending = true;
        }
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }
}

//! Key material for the sealed engine: X25519 keypairs, traffic key schedule, record sealing.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Poly1305 tag appended to every sealed payload.
pub const TAG_LEN: usize = 16;

/// X25519 public key as carried in a Hello.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Static X25519 keypair. The secret never leaves this struct.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Diffie-Hellman agreement with the peer's public key.
    pub fn shared_secret(&self, other: &PublicKey) -> [u8; 32] {
        let other = X25519PublicKey::from(other.0);
        self.secret.diffie_hellman(&other).to_bytes()
    }
}

/// 32 random bytes for a Hello.
pub fn random_bytes() -> [u8; 32] {
    let mut out = [0u8; 32];
    OsRng.fill_bytes(&mut out);
    out
}

/// Per-direction keys derived once the agreement completes.
#[derive(Clone)]
pub struct TrafficKeys {
    pub client_write: [u8; 32],
    pub server_write: [u8; 32],
    pub client_finished: [u8; 32],
    pub server_finished: [u8; 32],
}

impl TrafficKeys {
    pub fn derive(shared: &[u8; 32], client_random: &[u8; 32], server_random: &[u8; 32]) -> Self {
        let expand = |label: &[u8]| -> [u8; 32] {
            let mut h = Sha256::new();
            h.update(b"tlspeer-sealed-v1 ");
            h.update(label);
            h.update(shared);
            h.update(client_random);
            h.update(server_random);
            h.finalize().into()
        };
        Self {
            client_write: expand(b"c write"),
            server_write: expand(b"s write"),
            client_finished: expand(b"c finished"),
            server_finished: expand(b"s finished"),
        }
    }
}

/// Hash over both Hello encodings, client first.
pub fn transcript_hash(client_hello: &[u8], server_hello: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(client_hello);
    h.update(server_hello);
    h.finalize().into()
}

/// Finished verify data: binds a finished key to the transcript.
pub fn verify_data(finished_key: &[u8; 32], transcript: &[u8; 32]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(finished_key);
    h.update(transcript);
    h.finalize().into()
}

fn nonce(seq: u64) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[4..12].copy_from_slice(&seq.to_le_bytes());
    out
}

/// ChaCha20-Poly1305 seal. Nonce: record sequence number; never reuse per key.
pub fn seal(key: &[u8; 32], seq: u64, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| SealError::Key)?;
    let n = nonce(seq);
    cipher
        .encrypt(chacha20poly1305::Nonce::from_slice(&n), plaintext)
        .map_err(|_| SealError::Seal)
}

pub fn open(key: &[u8; 32], seq: u64, ciphertext: &[u8]) -> Result<Vec<u8>, SealError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| SealError::Key)?;
    let n = nonce(seq);
    cipher
        .decrypt(chacha20poly1305::Nonce::from_slice(&n), ciphertext)
        .map_err(|_| SealError::Open)
}

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("invalid key")]
    Key,
    #[error("sealing failed")]
    Seal,
    #[error("record authentication failed")]
    Open,
}

// tlspeer echo: blocking TCP echo server and line client over sealed Peers.

mod config;

use std::io::{BufRead, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::Context;
use tlspeer_core::{BufferPool, Peer, PeerConfig, PeerStream, SealedEngine};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut client = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("tlspeer-echo {}", VERSION);
                return Ok(());
            }
            "server" => client = false,
            "client" => client = true,
            other => anyhow::bail!("unknown argument {other:?} (expected server or client)"),
        }
    }

    let cfg = config::load()?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if client {
        run_client(&cfg)
    } else {
        run_server(&cfg)
    }
}

/// Accept connections forever; one thread per connection, one shared buffer pool.
fn run_server(cfg: &config::Config) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(cfg.listen).with_context(|| format!("binding {}", cfg.listen))?;
    tracing::info!(addr = %cfg.listen, "echo server listening");
    let pool = BufferPool::new(cfg.peer.max_packet_size, cfg.peer.pool_idle_buffers);
    for conn in listener.incoming() {
        let stream = match conn {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let pool = Arc::clone(&pool);
        let peer_cfg = cfg.peer.clone();
        std::thread::spawn(move || {
            let addr = stream.peer_addr().ok();
            if let Err(e) = serve_connection(stream, pool, &peer_cfg) {
                tracing::warn!(?addr, error = %e, "connection failed");
            }
        });
    }
    Ok(())
}

/// Handshake, echo every record back until the client closes, then close.
fn serve_connection(
    stream: TcpStream,
    pool: Arc<BufferPool>,
    cfg: &PeerConfig,
) -> anyhow::Result<u64> {
    let input = stream.try_clone()?;
    let mut peer = Peer::with_pool(input, stream, SealedEngine::server(), pool, cfg);
    peer.handshake()?;
    tracing::info!(peer = %peer.id(), "handshake complete");
    let mut echoed = 0u64;
    while let Some(record) = peer.read()? {
        echoed += record.len() as u64;
        peer.write(&record)?;
    }
    peer.close()?;
    tracing::info!(peer = %peer.id(), bytes = echoed, "connection closed");
    Ok(echoed)
}

/// Send stdin line by line and print each echoed line.
fn run_client(cfg: &config::Config) -> anyhow::Result<()> {
    let stream =
        TcpStream::connect(cfg.connect).with_context(|| format!("connecting {}", cfg.connect))?;
    stream.set_nodelay(true)?;
    let input = stream.try_clone()?;
    let mut peer = Peer::with_config(input, stream, SealedEngine::client(), &cfg.peer);
    peer.handshake()?;
    tracing::info!(peer = %peer.id(), addr = %cfg.connect, "connected");

    let mut stream = PeerStream::new(peer);
    let mut stdout = std::io::stdout();
    for line in std::io::stdin().lock().lines() {
        let mut line = line?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;
        let mut echoed = vec![0u8; line.len()];
        stream.read_exact(&mut echoed)?;
        stdout.write_all(&echoed)?;
        stdout.flush()?;
    }
    stream.shutdown()?;
    Ok(())
}

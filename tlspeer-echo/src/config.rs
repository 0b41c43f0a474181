//! Load config from file and environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tlspeer_core::PeerConfig;

/// Echo host configuration. File: ~/.config/tlspeer/config.toml or /etc/tlspeer/config.toml.
/// Env overrides: TLSPEER_LISTEN, TLSPEER_CONNECT, TLSPEER_LOG, TLSPEER_MAX_PACKET_SIZE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server listen address (default 127.0.0.1:4433).
    #[serde(default = "default_addr")]
    pub listen: SocketAddr,
    /// Address the client connects to (default 127.0.0.1:4433).
    #[serde(default = "default_addr")]
    pub connect: SocketAddr,
    /// Log filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub peer: PeerConfig,
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4433))
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_addr(),
            connect: default_addr(),
            log_level: default_log_level(),
            peer: PeerConfig::default(),
        }
    }
}

/// Load config: defaults, then the first config file found, then env vars.
pub fn load() -> anyhow::Result<Config> {
    let file = match find_file() {
        Some(p) => Some(
            std::fs::read_to_string(&p)
                .with_context(|| format!("reading {}", p.display()))?,
        ),
        None => None,
    };
    from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

fn from_sources(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut c = match file {
        Some(s) => toml::from_str::<Config>(s).context("parsing config file")?,
        None => Config::default(),
    };
    if let Some(s) = env("TLSPEER_LISTEN") {
        c.listen = s.parse().with_context(|| format!("TLSPEER_LISTEN={s}"))?;
    }
    if let Some(s) = env("TLSPEER_CONNECT") {
        c.connect = s.parse().with_context(|| format!("TLSPEER_CONNECT={s}"))?;
    }
    if let Some(s) = env("TLSPEER_LOG") {
        c.log_level = s;
    }
    if let Some(s) = env("TLSPEER_MAX_PACKET_SIZE") {
        c.peer.max_packet_size = s
            .parse()
            .with_context(|| format!("TLSPEER_MAX_PACKET_SIZE={s}"))?;
    }
    c.peer.validate()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/tlspeer/config.toml"));
    }
    out.push(PathBuf::from("/etc/tlspeer/config.toml"));
    out
}

fn find_file() -> Option<PathBuf> {
    config_paths().into_iter().find(|p| p.exists())
}

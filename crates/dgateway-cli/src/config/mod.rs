//! Gateway configuration
//!
//! This module defines the command-line surface and its validated form:
//! - `Args`: raw flags and `DGATEWAY_*` environment variables
//! - `GatewayConfig`: checked settings handed to the listeners
//! - `defaults`: default values

pub mod defaults;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use dgateway_core::defaults::DEFAULT_QUEUE_CAPACITY;
use reqwest::Url;
use thiserror::Error;

use defaults::*;

/// dGateway - record every exchange through a reverse proxy, then replay it
///
/// Listens on one port as a reverse proxy in front of TARGET, and on a second
/// port for the admin API (listing, body download, replay, HAR export).
#[derive(Parser, Debug, Clone)]
#[command(name = "dgateway")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Proxy listen port
    #[arg(short, long, env = "DGATEWAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Admin API listen port (defaults to port + 1)
    #[arg(long, env = "DGATEWAY_ADMIN_PORT")]
    pub admin_port: Option<u16>,

    /// Listen address for both listeners
    #[arg(short, long, env = "DGATEWAY_BIND", default_value = DEFAULT_BIND)]
    pub bind: IpAddr,

    /// Upstream base URL every proxied request is sent to
    #[arg(short, long, env = "DGATEWAY_TARGET", default_value = DEFAULT_TARGET)]
    pub target: String,

    /// SQLite database file
    #[arg(long, env = "DGATEWAY_DB", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Whether recording is on when the gateway starts
    #[arg(
        long,
        env = "DGATEWAY_RECORD_ON_START",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub record_on_start: bool,

    /// Pending exchanges held before new ones are dropped
    #[arg(long, env = "DGATEWAY_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Timeout for replayed requests, in seconds
    #[arg(
        long,
        env = "DGATEWAY_REPLAY_TIMEOUT_SECS",
        default_value_t = DEFAULT_REPLAY_TIMEOUT_SECS
    )]
    pub replay_timeout_secs: u64,

    /// Largest request body buffered by the proxy, in bytes
    #[arg(long, env = "DGATEWAY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid target URL '{0}': {1}")]
    InvalidTarget(String, String),

    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("proxy and admin ports must differ (both {0})")]
    PortClash(u16),

    #[error("no admin port available above proxy port {0}; set --admin-port")]
    NoAdminPort(u16),
}

/// Validated gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub proxy_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub target: Url,
    pub db_path: PathBuf,
    pub record_on_start: bool,
    pub queue_capacity: usize,
    pub replay_timeout: Duration,
    pub max_body_bytes: usize,
}

impl TryFrom<Args> for GatewayConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let target = parse_target(&args.target)?;

        if args.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        let admin_port = match args.admin_port {
            Some(port) => port,
            None => args
                .port
                .checked_add(1)
                .ok_or(ConfigError::NoAdminPort(args.port))?,
        };
        // Port 0 asks the OS for a free port, so two zeros do not clash
        if admin_port == args.port && admin_port != 0 {
            return Err(ConfigError::PortClash(admin_port));
        }

        Ok(Self {
            proxy_addr: SocketAddr::new(args.bind, args.port),
            admin_addr: SocketAddr::new(args.bind, admin_port),
            target,
            db_path: args.db,
            record_on_start: args.record_on_start,
            queue_capacity: args.queue_capacity,
            replay_timeout: Duration::from_secs(args.replay_timeout_secs),
            max_body_bytes: args.max_body_bytes,
        })
    }
}

/// Accept only absolute `http`/`https` URLs with a host
pub fn parse_target(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidTarget(raw.to_string(), e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidTarget(
            raw.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidTarget(
            raw.to_string(),
            "missing host".to_string(),
        ));
    }
    Ok(url)
}

// src/config.rs
/* clap subcommands for both tunnel ends.
    `client` runs the SOCKS5 front end, `server` runs the HTTP relay. Numeric knobs
    are plain milliseconds/bytes on the command line and become Durations here.
 */
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::client::ClientConfig;
use crate::server::{MuxerConfig, ServerConfig};
use crate::wire::SessionKey;

#[derive(Parser, Debug)]
#[command(about = "Tunnel SOCKS5 connections through plain HTTP requests")]
pub struct Config {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Accept local SOCKS5 connections and forward them to a tunnel server
    Client(ClientArgs),
    /// Serve the tunnel over HTTP and dial the requested targets
    Server(ServerArgs),
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Local SOCKS5 address to listen on
    #[arg(long, default_value = "127.0.0.1:2222")]
    pub listen: SocketAddr,

    /// Tunnel server address (e.g., tunnel.example.com:8888)
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub tunnel: String,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 250, value_parser = clap::value_parser!(u64).range(1..))]
    pub tick: u64,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// HTTP address to listen on
    #[arg(long, default_value = "0.0.0.0:8888")]
    pub listen: SocketAddr,

    /// Dial every session to this address instead of the one the client asks for
    #[arg(long)]
    pub target: Option<String>,

    /// How long a data request waits for backend bytes, in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..=60_000))]
    pub read_timeout: u64,

    /// Largest backend read returned in one response, in bytes
    #[arg(
        long,
        default_value_t = 64 * 1024,
        value_parser = clap::value_parser!(u64).range(1..=16 * 1024 * 1024)
    )]
    pub read_buffer: u64,

    /// Session key length in characters
    #[arg(
        long,
        default_value_t = SessionKey::DEFAULT_LEN as u64,
        value_parser = clap::value_parser!(u64).range(16..=128)
    )]
    pub key_len: u64,

    /// Close sessions idle for this many seconds (never, when unset)
    #[arg(long)]
    pub idle_timeout: Option<u64>,
}

impl ClientArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            tunnel: self.tunnel.clone(),
            tick: Duration::from_millis(self.tick),
        }
    }
}

impl ServerArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            target: self.target.clone(),
            muxer: MuxerConfig {
                key_len: self.key_len as usize,
                read_timeout: Duration::from_millis(self.read_timeout),
                read_buffer: self.read_buffer as usize,
                idle_timeout: self.idle_timeout.map(Duration::from_secs),
            },
        }
    }
}

pub fn parse() -> Config {
    Config::parse()
}

// httptun server --listen 0.0.0.0:8888
// httptun client --listen 127.0.0.1:2222 --tunnel 127.0.0.1:8888 --tick 250
// curl --socks5-hostname 127.0.0.1:2222 http://example.com/

// src/client/mod.rs
/* SOCKS5 front end: accept local applications and hand each one to a tunnel session. */

pub mod session;
pub mod transport;

use std::time::Duration;

use log::{debug, error, info};
use tokio::io::{self, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::client::session::TunnelSession;
use crate::client::transport::TunnelClient;
use crate::error::Result;
use crate::socks::{self, Reply};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Tunnel server as `host:port`
    pub tunnel: String,
    /// Poll interval, the one latency/throughput knob
    pub tick: Duration,
}

pub async fn start(listener: TcpListener, config: ClientConfig) -> io::Result<()> {
    // Listens for local applications and spawns a task per connection.
    loop {
        let (local, local_addr) = listener.accept().await?;
        info!("New connection from {}", local_addr);

        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(local, &config).await {
                error!("Connection error for {}: {}", local_addr, e);
            }
        });
    }
}

pub async fn handle_connection(mut local: TcpStream, config: &ClientConfig) -> Result<()> {
    socks::handshake(&mut local).await?;
    let (raw, target) = socks::get_request(&mut local).await?;
    debug!("SOCKS address {:02x?} resolves to {}", raw, target);

    // Success goes out before the remote session exists; a failed create just
    // closes the connection.
    local.write_all(&Reply::succeeded().encode()).await?;

    let client = TunnelClient::new(config.tunnel.clone());
    let session = TunnelSession::establish(client, &target, config.tick).await?;
    session.relay(local).await
}

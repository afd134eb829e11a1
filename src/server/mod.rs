// src/server/mod.rs
/* Tunnel server: accept HTTP connections and serve the create and data paths. */

pub mod endpoint;
pub mod muxer;
mod session;

use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, error, info};
use tokio::io;
use tokio::net::TcpListener;

use crate::server::endpoint::Endpoint;
pub use crate::server::muxer::{Muxer, MuxerConfig, Reply, TunnelPacket};

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Pinned destination for every session
    pub target: Option<String>,
    pub muxer: MuxerConfig,
}

pub async fn start(listener: TcpListener, config: ServerConfig) -> io::Result<()> {
    // Listens for tunnel clients and serves each HTTP connection on its own task.
    match &config.target {
        Some(target) => info!("Sessions pinned to {}", target),
        None => info!("Sessions dial the address each client requests"),
    }
    let muxer = Muxer::spawn(config.muxer.clone());
    let state = Arc::new(Endpoint::new(muxer, config.muxer.key_len, config.target));

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("New tunnel connection from {}", peer);

        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| endpoint::handle(req, state.clone()));
            if let Err(e) = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, service)
                .await
            {
                error!("HTTP connection error for {}: {}", peer, e);
            } else {
                debug!("Tunnel connection from {} closed", peer);
            }
        });
    }
}


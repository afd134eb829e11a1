/* Tie everything together: parse CLI, initialize logging, and run one end of the tunnel. */

use std::net::SocketAddr;
use std::process;

use httptun::config::{parse, Mode};
use httptun::logging::init;
use httptun::{client, server};
use log::{error, info};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    init();

    let config = parse();
    match config.mode {
        Mode::Client(args) => {
            let listener = bind(args.listen).await;
            info!("SOCKS5 listening on {}, tunnel server {}", args.listen, args.tunnel);
            if let Err(e) = client::start(listener, args.client_config()).await {
                error!("Client error: {}", e);
            }
        }
        Mode::Server(args) => {
            let listener = bind(args.listen).await;
            info!("Tunnel server listening on {}", args.listen);
            if let Err(e) = server::start(listener, args.server_config()).await {
                error!("Server error: {}", e);
            }
        }
    }
}

async fn bind(addr: SocketAddr) -> TcpListener {
    match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        }
    }
}

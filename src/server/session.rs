// src/server/session.rs
/* A session worker owns one backend connection and answers packets for its key in order. */

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::muxer::{Event, MuxerConfig, Reply, TunnelPacket};
use crate::wire::SessionKey;

pub(crate) struct Session {
    key: SessionKey,
    target: String,
    conn: TcpStream,
    created: Instant,
    received: u64,
    read_timeout: Duration,
    read_buf: Vec<u8>,
    idle_timeout: Option<Duration>,
}

impl Session {
    pub(crate) fn new(
        key: SessionKey,
        target: String,
        conn: TcpStream,
        config: &MuxerConfig,
    ) -> Self {
        Session {
            key,
            target,
            conn,
            created: Instant::now(),
            received: 0,
            read_timeout: config.read_timeout,
            read_buf: vec![0u8; config.read_buffer],
            idle_timeout: config.idle_timeout,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut packets: mpsc::UnboundedReceiver<TunnelPacket>,
        events: mpsc::Sender<Event>,
    ) {
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match timeout(idle, packets.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        info!("Session {} idle for {:?}, closing", self.key, idle);
                        break;
                    }
                },
                None => packets.recv().await,
            };
            let Some(packet) = next else {
                break;
            };
            if !self.handle(packet).await {
                break;
            }
        }

        // Anything still queued is answered as unknown when the queue drops.
        drop(packets);
        info!(
            "Session {} to {} closed after {} packets, {:?}",
            self.key,
            self.target,
            self.received,
            self.created.elapsed()
        );
        let _ = events.send(Event::Closed(self.key)).await;
    }

    /// Write the payload, then wait a bounded time for one read of backend
    /// bytes. Returns false once the backend can no longer be used.
    async fn handle(&mut self, packet: TunnelPacket) -> bool {
        self.received += 1;
        debug!(
            "Session {} packet #{} with {} bytes",
            self.key,
            self.received,
            packet.payload.len()
        );

        if !packet.payload.is_empty() {
            if let Err(e) = self.conn.write_all(&packet.payload).await {
                if is_closed(&e) {
                    warn!("Backend {} for session {} closed: {}", self.target, self.key, e);
                    packet.complete(Reply::Closed);
                    return false;
                }
                // Partial writes are not retried.
                warn!(
                    "Write of {} bytes to backend {} failed: {}",
                    packet.payload.len(),
                    self.target,
                    e
                );
            }
        }

        match timeout(self.read_timeout, self.conn.read(&mut self.read_buf)).await {
            // Nothing ready inside the window is an empty answer, not an error.
            Err(_) => {
                packet.complete(Reply::Data(Bytes::new()));
                true
            }
            Ok(Ok(0)) => {
                debug!("Backend {} for session {} reached EOF", self.target, self.key);
                packet.complete(Reply::Closed);
                false
            }
            Ok(Ok(n)) => {
                debug!("Session {} read {} bytes from backend", self.key, n);
                let data = Bytes::copy_from_slice(&self.read_buf[..n]);
                packet.complete(Reply::Data(data));
                true
            }
            Ok(Err(e)) => {
                warn!("Read from backend {} failed: {}", self.target, e);
                packet.complete(Reply::Closed);
                false
            }
        }
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

// src/server/muxer.rs
/* The session table. One task owns it; handlers talk to it only through events. */

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::server::session::Session;
use crate::wire::SessionKey;

const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct MuxerConfig {
    pub key_len: usize,
    /// Upper bound on how long one data request waits for backend bytes
    pub read_timeout: Duration,
    pub read_buffer: usize,
    /// Sessions with no traffic for this long are closed. `None` keeps them forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        MuxerConfig {
            key_len: SessionKey::DEFAULT_LEN,
            read_timeout: Duration::from_millis(1000),
            read_buffer: 64 * 1024,
            idle_timeout: None,
        }
    }
}

/// What a session hands back for one packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Bytes the backend produced within the read window, possibly none
    Data(Bytes),
    /// The backend went away while handling this packet
    Closed,
    UnknownSession,
}

/// One inbound data request. Sending on `sink` is the completion signal.
#[derive(Debug)]
pub struct TunnelPacket {
    pub key: SessionKey,
    pub payload: Bytes,
    pub sink: oneshot::Sender<Reply>,
}

impl TunnelPacket {
    pub(crate) fn complete(self, reply: Reply) {
        if self.sink.send(reply).is_err() {
            debug!("caller for session {} stopped waiting", self.key);
        }
    }
}

pub(crate) enum Event {
    Created {
        target: String,
        conn: TcpStream,
        reply: oneshot::Sender<SessionKey>,
    },
    Packet(TunnelPacket),
    Closed(SessionKey),
}

/// Cloneable handle to the muxer task.
#[derive(Clone)]
pub struct Muxer {
    events: mpsc::Sender<Event>,
}

impl Muxer {
    /// Start the table owner on the current runtime.
    pub fn spawn(config: MuxerConfig) -> Muxer {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let table = Table {
            sessions: HashMap::new(),
            events: tx.downgrade(),
            config,
        };
        tokio::spawn(table.run(rx));
        Muxer { events: tx }
    }

    /// Dial `target` and register a session for it.
    ///
    /// The dial happens on the caller's task, so a slow target never holds up
    /// the table. A failed dial never reaches the muxer.
    pub async fn create(&self, target: &str) -> Result<SessionKey> {
        debug!("Dialing backend {}", target);
        let conn = TcpStream::connect(target).await.map_err(|e| Error::Dial {
            addr: target.to_string(),
            reason: e.to_string(),
        })?;
        if let Err(e) = conn.set_nodelay(true) {
            debug!("set_nodelay on backend {} failed: {}", target, e);
        }

        let (reply, key) = oneshot::channel();
        self.events
            .send(Event::Created {
                target: target.to_string(),
                conn,
                reply,
            })
            .await
            .map_err(|_| Error::MuxerGone)?;
        key.await.map_err(|_| Error::MuxerGone)
    }

    /// Route a payload to its session and wait for the backend's answer.
    pub async fn forward(&self, key: SessionKey, payload: Bytes) -> Result<Reply> {
        let (sink, done) = oneshot::channel();
        self.events
            .send(Event::Packet(TunnelPacket { key, payload, sink }))
            .await
            .map_err(|_| Error::MuxerGone)?;
        // A dropped sink means the session died with this packet still queued.
        Ok(done.await.unwrap_or(Reply::UnknownSession))
    }
}

struct Table {
    sessions: HashMap<SessionKey, mpsc::UnboundedSender<TunnelPacket>>,
    events: mpsc::WeakSender<Event>,
    config: MuxerConfig,
}

impl Table {
    async fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        debug!("Session muxer started");
        while let Some(event) = rx.recv().await {
            match event {
                Event::Created {
                    target,
                    conn,
                    reply,
                } => self.register(target, conn, reply),
                Event::Packet(packet) => self.route(packet),
                Event::Closed(key) => {
                    if self.sessions.remove(&key).is_some() {
                        info!(
                            "Session {} removed, {} sessions active",
                            key,
                            self.sessions.len()
                        );
                    }
                }
            }
        }
        debug!("Session muxer stopped");
    }

    fn register(&mut self, target: String, conn: TcpStream, reply: oneshot::Sender<SessionKey>) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let key = self.allocate_key();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(key.clone(), target, conn, &self.config);
        tokio::spawn(session.run(rx, events));

        if reply.send(key.clone()).is_err() {
            // The create request went away; the worker exits once its queue closes.
            warn!("Create request for session {} abandoned", key);
            return;
        }
        self.sessions.insert(key.clone(), tx);
        info!(
            "Session {} registered, {} sessions active",
            key,
            self.sessions.len()
        );
    }

    fn allocate_key(&self) -> SessionKey {
        loop {
            let key = SessionKey::generate(self.config.key_len);
            if !self.sessions.contains_key(&key) {
                return key;
            }
        }
    }

    fn route(&mut self, packet: TunnelPacket) {
        let Some(session) = self.sessions.get(&packet.key) else {
            debug!("No session for key {}", packet.key);
            packet.complete(Reply::UnknownSession);
            return;
        };
        if let Err(mpsc::error::SendError(packet)) = session.send(packet) {
            self.sessions.remove(&packet.key);
            packet.complete(Reply::UnknownSession);
        }
    }
}

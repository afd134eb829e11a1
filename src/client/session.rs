// src/client/session.rs
/* Client tunnel session: poll the server on a fixed tick, carrying whatever the
   local application wrote since the previous tick. */

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::client::transport::TunnelClient;
use crate::error::{Error, Result};
use crate::wire::SessionKey;

const READ_CHUNK: usize = 4096;
const CHUNK_QUEUE: usize = 64;

pub struct TunnelSession {
    key: SessionKey,
    target: String,
    client: TunnelClient,
    tick: Duration,
}

impl TunnelSession {
    /// Create the remote half of the session. Fails when the server cannot
    /// reach `target` or its answer cannot be read.
    pub async fn establish(
        mut client: TunnelClient,
        target: &str,
        tick: Duration,
    ) -> Result<Self> {
        let key = client.create(target).await?;
        info!(
            "Tunneling {} through {} as session {}",
            target,
            client.remote(),
            key
        );
        Ok(TunnelSession {
            key,
            target: target.to_string(),
            client,
            tick,
        })
    }

    /// Relay between `local` and the tunnel until either side is done.
    ///
    /// Every tick sends one data request, even with nothing buffered, so bytes
    /// the backend produces on its own still reach the application.
    pub async fn relay(mut self, local: TcpStream) -> Result<()> {
        let (reader, mut writer) = local.into_split();
        let (mut chunks, reader_task) = spawn_reader(reader);
        let mut pending = BytesMut::new();

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => pending.extend_from_slice(&chunk),
                    None => {
                        debug!("Local side of session {} closed", self.key);
                        if !pending.is_empty() {
                            if let Err(e) = self.flush(&mut pending, &mut writer).await {
                                debug!("Final flush for session {} failed: {}", self.key, e);
                            }
                        }
                        break Ok(());
                    }
                },
                _ = ticker.tick() => match self.flush(&mut pending, &mut writer).await {
                    Ok(()) => {}
                    Err(Error::UnknownSession) => {
                        info!("Session {} closed by the tunnel server", self.key);
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        reader_task.abort();
        let _ = writer.shutdown().await;
        info!("Session {} to {} finished", self.key, self.target);
        result
    }

    /// Send the buffered bytes and write the answer to the application.
    ///
    /// Only a vanished session or a failed local write is returned as an
    /// error. A failed round trip loses this tick's bytes and the loop goes on.
    async fn flush(
        &mut self,
        pending: &mut BytesMut,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let payload = pending.split().freeze();
        let body = match self.client.exchange(&self.key, &payload).await {
            Ok(body) => body,
            Err(Error::UnknownSession) => return Err(Error::UnknownSession),
            Err(e) => {
                warn!(
                    "Session {} dropped {} bytes after tunnel error: {}",
                    self.key,
                    payload.len(),
                    e
                );
                return Ok(());
            }
        };
        if !body.is_empty() {
            debug!("Session {} received {} bytes", self.key, body.len());
            writer.write_all(&body).await?;
        }
        Ok(())
    }
}

/// Read the local connection on its own task. The channel closing is the
/// single EOF/error signal.
fn spawn_reader(mut reader: OwnedReadHalf) -> (mpsc::Receiver<Bytes>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Local read failed: {}", e);
                    break;
                }
            }
        }
    });
    (rx, handle)
}

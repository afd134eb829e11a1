// src/client/transport.rs
/* HTTP/1.1 POSTs to the tunnel server, reusing one connection until it breaks. */

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use log::debug;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::wire::{self, SessionKey, CONNECT_PATH, DATA_PATH};

pub struct TunnelClient {
    remote: String,
    sender: Option<SendRequest<Full<Bytes>>>,
}

impl TunnelClient {
    pub fn new(remote: impl Into<String>) -> Self {
        TunnelClient {
            remote: remote.into(),
            sender: None,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Ask the server to dial `target`; the response body is the new key.
    pub async fn create(&mut self, target: &str) -> Result<SessionKey> {
        let body = Bytes::copy_from_slice(target.as_bytes());
        let (status, body) = self.post(CONNECT_PATH, "text/plain", body).await?;
        match status {
            StatusCode::OK => {
                let key = SessionKey::from_bytes(body);
                if key.is_empty() {
                    return Err(Error::Rejected(status));
                }
                Ok(key)
            }
            StatusCode::BAD_GATEWAY => Err(Error::Dial {
                addr: target.to_string(),
                reason: String::from_utf8_lossy(&body).into_owned(),
            }),
            status => Err(Error::Rejected(status)),
        }
    }

    /// Send `key ‖ payload` and return whatever the backend produced.
    pub async fn exchange(&mut self, key: &SessionKey, payload: &[u8]) -> Result<Bytes> {
        let body = wire::frame(key, payload);
        let (status, body) = self
            .post(DATA_PATH, "application/octet-stream", body)
            .await?;
        match status {
            StatusCode::OK => Ok(body),
            StatusCode::NOT_FOUND => Err(Error::UnknownSession),
            status => Err(Error::Rejected(status)),
        }
    }

    pub async fn post(
        &mut self,
        path: &str,
        content_type: &'static str,
        body: Bytes,
    ) -> Result<(StatusCode, Bytes)> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, self.remote.as_str())
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(body))?;

        // A sender is only put back after a clean round trip.
        let mut sender = match self.sender.take() {
            Some(sender) if !sender.is_closed() => sender,
            _ => self.connect().await?,
        };
        sender.ready().await?;
        let resp = sender.send_request(req).await?;
        self.sender = Some(sender);

        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }

    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>> {
        debug!("Connecting to tunnel server {}", self.remote);
        let stream = TcpStream::connect(&self.remote).await?;
        stream.set_nodelay(true)?;

        let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        let remote = self.remote.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection to tunnel server {} ended: {}", remote, e);
            }
        });
        Ok(sender)
    }
}

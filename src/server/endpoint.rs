// src/server/endpoint.rs
/* HTTP handlers: turn create and data requests into muxer calls and wait for the answer. */

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use log::{debug, info, warn};

use crate::error::Error;
use crate::server::muxer::{Muxer, Reply};
use crate::wire::{self, CONNECT_PATH, CREATE_ALIAS_PATH};

pub type Body = BoxBody<Bytes, hyper::Error>;

pub struct Endpoint {
    muxer: Muxer,
    key_len: usize,
    /// When set, every session is dialed here regardless of what the client asks for
    target: Option<String>,
}

impl Endpoint {
    pub fn new(muxer: Muxer, key_len: usize, target: Option<String>) -> Self {
        Endpoint {
            muxer,
            key_len,
            target,
        }
    }
}

pub async fn handle(
    req: Request<Incoming>,
    endpoint: Arc<Endpoint>,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::POST {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED, "POST only"));
    }

    let path = req.uri().path().to_owned();
    let body = req.into_body().collect().await?.to_bytes();

    let response = match path.as_str() {
        CONNECT_PATH | CREATE_ALIAS_PATH => create(&endpoint, body).await,
        _ => data(&endpoint, body).await,
    };
    Ok(response)
}

async fn create(endpoint: &Endpoint, body: Bytes) -> Response<Body> {
    let requested = match std::str::from_utf8(&body) {
        Ok(addr) => addr.trim().to_string(),
        Err(_) => return status(StatusCode::BAD_REQUEST, "target address is not utf8"),
    };
    let target = match &endpoint.target {
        Some(pinned) => {
            debug!("Client asked for {:?}, using pinned target {}", requested, pinned);
            pinned.clone()
        }
        None if requested.is_empty() => {
            return status(StatusCode::BAD_REQUEST, "missing target address")
        }
        None => requested,
    };

    match endpoint.muxer.create(&target).await {
        Ok(key) => {
            info!("Session {} created for {}", key, target);
            let mut resp = Response::new(full(key.to_bytes()));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            resp
        }
        Err(e @ Error::Dial { .. }) => {
            warn!("{}", e);
            status(StatusCode::BAD_GATEWAY, e.to_string())
        }
        Err(e) => {
            warn!("Session creation for {} failed: {}", target, e);
            status(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn data(endpoint: &Endpoint, body: Bytes) -> Response<Body> {
    let Some((key, payload)) = wire::split_frame(body, endpoint.key_len) else {
        return status(StatusCode::BAD_REQUEST, "body shorter than session key");
    };

    match endpoint.muxer.forward(key, payload).await {
        Ok(Reply::Data(bytes)) => {
            let mut resp = Response::new(full(bytes));
            resp.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            resp
        }
        Ok(Reply::Closed) => Response::new(empty()),
        Ok(Reply::UnknownSession) => status(StatusCode::NOT_FOUND, "no such session"),
        Err(e) => {
            warn!("Data request failed: {}", e);
            status(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

fn status<T: Into<Bytes>>(code: StatusCode, msg: T) -> Response<Body> {
    let mut resp = Response::new(full(msg));
    *resp.status_mut() = code;
    resp
}

fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> Body {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

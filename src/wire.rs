// src/wire.rs
/* Session keys and the data-path framing: every data request body is `key ‖ payload`. */

use std::fmt;

use bytes::{Bytes, BytesMut};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Path that creates a session; the body carries the target address.
pub const CONNECT_PATH: &str = "/connect";

/// Older clients asked for `/create`, the server still answers it.
pub const CREATE_ALIAS_PATH: &str = "/create";

/// Path for framed data exchanges.
pub const DATA_PATH: &str = "/";

/// Opaque token naming one tunneled connection.
///
/// Keys are drawn from the OS random source as alphanumeric text, so the
/// canonical form is both the table key and the literal wire prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(Bytes);

impl SessionKey {
    pub const DEFAULT_LEN: usize = 24;

    pub fn generate(len: usize) -> Self {
        let token: Vec<u8> = OsRng.sample_iter(&Alphanumeric).take(len).collect();
        SessionKey(Bytes::from(token))
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        SessionKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self)
    }
}

/// Build a data-path body. There is no length field; the key length is fixed.
pub fn frame(key: &SessionKey, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(key.len() + payload.len());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Split a data-path body into its key prefix and payload.
/// Returns `None` when the body cannot even hold a key.
pub fn split_frame(mut body: Bytes, key_len: usize) -> Option<(SessionKey, Bytes)> {
    if body.len() < key_len {
        return None;
    }
    let key = body.split_to(key_len);
    Some((SessionKey(key), body))
}

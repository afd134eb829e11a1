// src/socks.rs
/* SOCKS5 front-end protocol: method negotiation, CONNECT parsing, and the reply we send back. */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const SOCKS_VERSION: u8 = 5;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0,
    CommandNotSupported = 7,
    AddressTypeNotSupported = 8,
}

/// A SOCKS5 reply laid out field by field (RFC 1928 section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub bound: SocketAddr,
}

impl Reply {
    /// Success with a placeholder `0.0.0.0:0` bound address.
    ///
    /// The tunnel never knows the real bound address on the far side, and
    /// CONNECT clients ignore this field, so we always report zeros.
    pub fn succeeded() -> Self {
        Reply::new(ReplyCode::Succeeded)
    }

    pub fn new(code: ReplyCode) -> Self {
        Reply {
            code,
            bound: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![SOCKS_VERSION, self.code as u8, 0x00];
        match self.bound.ip() {
            IpAddr::V4(ip) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
        }
        buf.extend_from_slice(&self.bound.port().to_be_bytes());
        buf
    }
}

/// Read the client's method selection and accept "no authentication".
pub async fn handshake<S>(conn: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = conn.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(Error::Handshake(format!("unsupported version {}", version)));
    }
    let method_num = conn.read_u8().await?;
    let mut methods = vec![0; method_num as usize];
    conn.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        conn.write_all(&[SOCKS_VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(Error::Handshake("client offers no usable auth method".into()));
    }
    conn.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Read a CONNECT request.
///
/// Returns the raw address bytes as they appeared on the wire (ATYP, address,
/// port) together with the target rendered as `host:port`.
pub async fn get_request<S>(conn: &mut S) -> Result<(Vec<u8>, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 4];
    conn.read_exact(&mut head).await?;
    let [version, command, _reserved, addr_type] = head;

    if version != SOCKS_VERSION {
        return Err(Error::Handshake(format!("unsupported version {}", version)));
    }
    if command != CMD_CONNECT {
        conn.write_all(&Reply::new(ReplyCode::CommandNotSupported).encode())
            .await?;
        return Err(Error::UnsupportedCommand(command));
    }

    let mut raw = vec![addr_type];
    let host = match addr_type {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            conn.read_exact(&mut octets).await?;
            raw.extend_from_slice(&octets);
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            conn.read_exact(&mut octets).await?;
            raw.extend_from_slice(&octets);
            format!("[{}]", Ipv6Addr::from(octets))
        }
        ATYP_DOMAIN => {
            let len = conn.read_u8().await?;
            let mut domain = vec![0u8; len as usize];
            conn.read_exact(&mut domain).await?;
            raw.push(len);
            raw.extend_from_slice(&domain);
            String::from_utf8(domain)
                .map_err(|_| Error::Handshake("domain is not utf8".into()))?
        }
        other => {
            conn.write_all(&Reply::new(ReplyCode::AddressTypeNotSupported).encode())
                .await?;
            return Err(Error::Handshake(format!(
                "unsupported address type {:#04x}",
                other
            )));
        }
    };

    let port = conn.read_u16().await?;
    raw.extend_from_slice(&port.to_be_bytes());

    let target = format!("{}:{}", host, port);
    debug!("socks CONNECT request for {}", target);
    Ok((raw, target))
}

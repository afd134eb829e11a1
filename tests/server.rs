use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use httptun::client::transport::TunnelClient;
use httptun::server::{self, MuxerConfig, ServerConfig};
use httptun::wire::{SessionKey, CREATE_ALIAS_PATH, DATA_PATH};
use httptun::Error;
use hyper::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> ServerConfig {
    ServerConfig {
        target: None,
        muxer: MuxerConfig {
            read_timeout: Duration::from_millis(200),
            ..MuxerConfig::default()
        },
    }
}

async fn spawn_server(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server::start(listener, config).await.unwrap();
    });
    addr
}

async fn accept(target: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(WAIT, target.accept()).await.unwrap().unwrap();
    stream
}

/// Echo everything back with `tag` in front, one read at a time.
fn spawn_tagged_echo(mut backend: TcpStream, tag: &'static [u8]) {
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let n = match backend.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let mut out = tag.to_vec();
            out.extend_from_slice(&buf[..n]);
            if backend.write_all(&out).await.is_err() {
                return;
            }
        }
    });
}

#[tokio::test]
async fn test_concurrent_creates_yield_distinct_keys() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = target.accept().await {
            held.push(stream);
        }
    });
    let server_addr = spawn_server(fast_config()).await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let target_addr = target_addr.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = TunnelClient::new(server_addr.to_string());
            client.create(&target_addr).await.unwrap()
        }));
    }

    let mut keys = HashSet::new();
    for task in tasks {
        let key = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(key.len(), SessionKey::DEFAULT_LEN);
        keys.insert(key);
    }
    assert_eq!(keys.len(), 16);
}

#[tokio::test]
async fn test_payload_reaches_backend_and_response_returns() {
    const REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";
    const RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\n\r\nhello";

    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let server_addr = spawn_server(ServerConfig::default()).await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = client.create(&target_addr.to_string()).await.unwrap();
    let mut backend = accept(&target).await;

    let backend_task = tokio::spawn(async move {
        let mut buf = vec![0u8; REQUEST.len()];
        backend.read_exact(&mut buf).await.unwrap();
        backend.write_all(RESPONSE).await.unwrap();
        buf
    });

    let body = timeout(WAIT, client.exchange(&key, REQUEST))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&body[..], RESPONSE);
    assert_eq!(backend_task.await.unwrap(), REQUEST);
}

#[tokio::test]
async fn test_empty_poll_keeps_session_usable() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let server_addr = spawn_server(fast_config()).await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = client.create(&target_addr.to_string()).await.unwrap();
    spawn_tagged_echo(accept(&target).await, b"");

    let body = timeout(WAIT, client.exchange(&key, b"")).await.unwrap().unwrap();
    assert!(body.is_empty());

    let body = timeout(WAIT, client.exchange(&key, b"ping"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&body[..], b"ping");

    let body = timeout(WAIT, client.exchange(&key, b"")).await.unwrap().unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_unknown_key_is_rejected_promptly() {
    let server_addr = spawn_server(fast_config()).await;
    let mut client = TunnelClient::new(server_addr.to_string());

    let stranger = SessionKey::generate(SessionKey::DEFAULT_LEN);
    let result = timeout(WAIT, client.exchange(&stranger, b"anyone there?"))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::UnknownSession)));
}

#[tokio::test]
async fn test_body_shorter_than_key_is_bad_request() {
    let server_addr = spawn_server(fast_config()).await;
    let mut client = TunnelClient::new(server_addr.to_string());

    let (status, _) = client
        .post(DATA_PATH, "application/octet-stream", Bytes::from_static(b"short"))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_target_issues_no_key() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = unused.local_addr().unwrap().to_string();
    drop(unused);
    let server_addr = spawn_server(fast_config()).await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let result = client.create(&target_addr).await;
    assert!(matches!(result, Err(Error::Dial { .. })));

    let (status, _) = client
        .post(CREATE_ALIAS_PATH, "text/plain", Bytes::from(target_addr))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_sessions_never_cross_deliver() {
    let target_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = target_a.local_addr().unwrap().to_string();
    let addr_b = target_b.local_addr().unwrap().to_string();
    let server_addr = spawn_server(fast_config()).await;

    let mut client_a = TunnelClient::new(server_addr.to_string());
    let mut client_b = TunnelClient::new(server_addr.to_string());
    let (key_a, key_b) = tokio::join!(client_a.create(&addr_a), client_b.create(&addr_b));
    let (key_a, key_b) = (key_a.unwrap(), key_b.unwrap());
    assert_ne!(key_a, key_b);

    spawn_tagged_echo(accept(&target_a).await, b"a:");
    spawn_tagged_echo(accept(&target_b).await, b"b:");

    for round in 0..3 {
        let payload_a = format!("alpha-{}", round);
        let payload_b = format!("bravo-{}", round);
        let (body_a, body_b) = tokio::join!(
            client_a.exchange(&key_a, payload_a.as_bytes()),
            client_b.exchange(&key_b, payload_b.as_bytes())
        );
        assert_eq!(body_a.unwrap(), Bytes::from(format!("a:{}", payload_a)));
        assert_eq!(body_b.unwrap(), Bytes::from(format!("b:{}", payload_b)));
    }
}

#[tokio::test]
async fn test_pinned_target_overrides_requested_address() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap().to_string();
    let server_addr = spawn_server(ServerConfig {
        target: Some(target_addr),
        ..fast_config()
    })
    .await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = timeout(WAIT, client.create("not-a-host.invalid:1"))
        .await
        .unwrap()
        .unwrap();
    spawn_tagged_echo(accept(&target).await, b"pinned:");

    let body = timeout(WAIT, client.exchange(&key, b"x")).await.unwrap().unwrap();
    assert_eq!(&body[..], b"pinned:x");
}

#[tokio::test]
async fn test_closed_backend_evicts_session() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let server_addr = spawn_server(fast_config()).await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = client.create(&target_addr.to_string()).await.unwrap();
    drop(accept(&target).await);

    // Packets answered before the close is noticed complete with no bytes.
    let mut outcome = None;
    for _ in 0..5 {
        match timeout(WAIT, client.exchange(&key, b"")).await.unwrap() {
            Ok(body) => assert!(body.is_empty()),
            Err(e) => {
                outcome = Some(e);
                break;
            }
        }
    }
    assert!(matches!(outcome, Some(Error::UnknownSession)));
}

#[tokio::test]
async fn test_write_to_reset_backend_evicts_session() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let server_addr = spawn_server(fast_config()).await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = client.create(&target_addr.to_string()).await.unwrap();
    let backend = accept(&target).await;

    // The backend never reads this, so closing it afterwards resets the connection.
    let body = timeout(WAIT, client.exchange(&key, b"unread")).await.unwrap().unwrap();
    assert!(body.is_empty());
    drop(backend);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut answered_empty = 0;
    let mut outcome = None;
    for _ in 0..5 {
        match timeout(WAIT, client.exchange(&key, b"more data")).await.unwrap() {
            Ok(body) => {
                assert!(body.is_empty());
                answered_empty += 1;
            }
            Err(e) => {
                outcome = Some(e);
                break;
            }
        }
    }
    assert!(answered_empty >= 1);
    assert!(matches!(outcome, Some(Error::UnknownSession)));
}

#[tokio::test]
async fn test_backend_reads_are_bounded_by_read_buffer() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let server_addr = spawn_server(ServerConfig {
        target: None,
        muxer: MuxerConfig {
            read_timeout: Duration::from_millis(200),
            read_buffer: 4,
            ..MuxerConfig::default()
        },
    })
    .await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = client.create(&target_addr.to_string()).await.unwrap();
    let mut backend = accept(&target).await;
    backend.write_all(b"abcdefgh").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut received = Vec::new();
    for _ in 0..4 {
        let body = timeout(WAIT, client.exchange(&key, b"")).await.unwrap().unwrap();
        assert!(body.len() <= 4);
        received.extend_from_slice(&body);
        if received.len() == 8 {
            break;
        }
    }
    assert_eq!(received, b"abcdefgh");
}

#[tokio::test]
async fn test_idle_session_expires() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let server_addr = spawn_server(ServerConfig {
        target: None,
        muxer: MuxerConfig {
            read_timeout: Duration::from_millis(50),
            idle_timeout: Some(Duration::from_millis(100)),
            ..MuxerConfig::default()
        },
    })
    .await;

    let mut client = TunnelClient::new(server_addr.to_string());
    let key = client.create(&target_addr.to_string()).await.unwrap();
    let _backend = accept(&target).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    let result = timeout(WAIT, client.exchange(&key, b"late")).await.unwrap();
    assert!(matches!(result, Err(Error::UnknownSession)));
}

//! Relay behaviour over real TCP sockets
//!
//! Each test wires `relay(client_inner, backend_inner)` between two socket
//! pairs and drives the outer ends the way a client and a backend would.

use sentinel_tunnel_server::{relay, RelayStats};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

/// Returns (outer, inner) ends of a loopback connection
async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (outer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (outer.unwrap(), accepted.unwrap().0)
}

struct Harness {
    client: TcpStream,
    backend: TcpStream,
    relay: JoinHandle<RelayStats>,
}

async fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (client, client_inner) = socket_pair().await;
    let (backend_inner, backend) = socket_pair().await;
    let relay = tokio::spawn(relay(client_inner, backend_inner));

    Harness {
        client,
        backend,
        relay,
    }
}

/// Make dropping the stream send RST instead of FIN
#[allow(deprecated)]
fn reset_on_drop(stream: &TcpStream) {
    stream.set_linger(Some(Duration::ZERO)).unwrap();
}

/// Reads until EOF or error, returning what arrived before that
async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return received,
            Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
            Err(_) => panic!("connection was not closed in time"),
        }
    }
}

async fn exchange_ping_pong(h: &mut Harness) {
    h.client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    h.backend.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    h.backend.write_all(b"pong").await.unwrap();
    h.client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn test_client_closes_first() {
    let mut h = harness().await;
    exchange_ping_pong(&mut h).await;

    drop(h.client);
    assert!(read_until_closed(&mut h.backend).await.is_empty());
    drop(h.backend);

    let stats = tokio::time::timeout(WAIT, h.relay).await.unwrap().unwrap();
    assert_eq!(stats.a_to_b.bytes, 4);
    assert_eq!(stats.b_to_a.bytes, 4);
    assert!(!stats.a_to_b.errored);
}

#[tokio::test]
async fn test_backend_closes_first() {
    let mut h = harness().await;
    exchange_ping_pong(&mut h).await;

    drop(h.backend);
    assert!(read_until_closed(&mut h.client).await.is_empty());
    drop(h.client);

    let stats = tokio::time::timeout(WAIT, h.relay).await.unwrap().unwrap();
    assert_eq!(stats.total_bytes(), 8);
    assert!(!stats.b_to_a.errored);
}

#[tokio::test]
async fn test_client_resets_first() {
    let mut h = harness().await;
    exchange_ping_pong(&mut h).await;

    reset_on_drop(&h.client);
    drop(h.client);

    // The backend still gets an orderly end of stream
    assert!(read_until_closed(&mut h.backend).await.is_empty());
    drop(h.backend);

    tokio::time::timeout(WAIT, h.relay).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_backend_resets_first() {
    let mut h = harness().await;
    exchange_ping_pong(&mut h).await;

    reset_on_drop(&h.backend);
    drop(h.backend);

    assert!(read_until_closed(&mut h.client).await.is_empty());
    drop(h.client);

    tokio::time::timeout(WAIT, h.relay).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_half_close_delivers_everything() {
    let Harness {
        mut client,
        mut backend,
        relay,
    } = harness().await;

    let request: Vec<u8> = (0..256 * 1024).map(|i| (i % 253) as u8).collect();
    let expected = request.clone();

    let client_task = tokio::spawn(async move {
        client.write_all(&request).await.unwrap();
        // Done sending, still waiting for the answer
        client.shutdown().await.unwrap();
        read_until_closed(&mut client).await
    });

    let received = read_until_closed(&mut backend).await;
    assert_eq!(received.len(), expected.len());
    assert_eq!(received, expected);

    backend.write_all(b"received everything").await.unwrap();
    backend.shutdown().await.unwrap();

    let reply = tokio::time::timeout(WAIT, client_task).await.unwrap().unwrap();
    assert_eq!(reply, b"received everything");
    drop(backend);

    let stats = tokio::time::timeout(WAIT, relay).await.unwrap().unwrap();
    assert_eq!(stats.a_to_b.bytes, expected.len() as u64);
    assert_eq!(stats.b_to_a.bytes, b"received everything".len() as u64);
}

#[tokio::test]
async fn test_client_reset_with_idle_backend() {
    let mut h = harness().await;
    exchange_ping_pong(&mut h).await;

    reset_on_drop(&h.client);
    drop(h.client);

    // The backend neither sends nor closes, the relay still ends
    let stats = tokio::time::timeout(WAIT, h.relay)
        .await
        .expect("relay should end after the client reset")
        .unwrap();
    assert!(stats.a_to_b.errored);
    assert!(stats.b_to_a.stopped);

    assert!(read_until_closed(&mut h.backend).await.is_empty());
}

#[tokio::test]
async fn test_backend_reset_with_idle_client() {
    let mut h = harness().await;
    exchange_ping_pong(&mut h).await;

    reset_on_drop(&h.backend);
    drop(h.backend);

    let stats = tokio::time::timeout(WAIT, h.relay)
        .await
        .expect("relay should end after the backend reset")
        .unwrap();
    assert!(stats.b_to_a.errored);
    assert!(stats.a_to_b.stopped);

    assert!(read_until_closed(&mut h.client).await.is_empty());
}

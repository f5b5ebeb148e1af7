//! End-to-end tunnel tests
//!
//! A mock HTTP proxy stands in for the upstream: it records the CONNECT
//! request, answers with a configurable status, and then plays the
//! destination server. The original destination is injected with a fixed
//! resolver since a real REDIRECT rule needs root.
//!
//! # Test Categories
//!
//! 1. **Happy Path**: CONNECT request format and unmodified byte flow
//! 2. **Dial Failures**: rejection and timeout close the client
//! 3. **Close Propagation**: either side closing reaches the other

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use redir_tunnel::config::ListenConfig;
use redir_tunnel::connection::{run_accept_loop, TunnelHandler};
use redir_tunnel::error::RedirectError;
use redir_tunnel::redirect::{DestinationResolver, RedirectListener};
use redir_tunnel::upstream::{HttpConnectDialer, ProxyTarget, ProxyUrl};

const TARGET: &str = "93.184.216.34:80";

// ============================================================================
// Mock HTTP Proxy
// ============================================================================

/// How the mock proxy answers a CONNECT
#[derive(Clone, Copy)]
enum ProxyBehavior {
    /// Answer 200 and echo everything afterwards
    Echo,
    /// Answer 200, send `greeting`, then close the tunnel
    GreetAndClose(&'static [u8]),
    /// Answer with this status line and close
    Reject(&'static str),
    /// Never answer
    Silent,
}

/// What the proxy saw on one connection
#[derive(Debug)]
struct ProxyEvent {
    request_line: String,
    headers: Vec<String>,
    /// Bytes received after the handshake, once the tunnel closed
    tunneled: Vec<u8>,
}

/// Run a mock proxy; each handled connection reports a `ProxyEvent`
async fn start_mock_proxy(behavior: ProxyBehavior) -> (u16, mpsc::UnboundedReceiver<ProxyEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(event) = serve_one(stream, behavior).await {
                    let _ = tx.send(event);
                }
            });
        }
    });

    (port, rx)
}

async fn serve_one(stream: TcpStream, behavior: ProxyBehavior) -> Option<ProxyEvent> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 || line == "\r\n" {
            break;
        }
        headers.push(line.trim_end().to_string());
    }

    let mut event = ProxyEvent {
        request_line: request_line.trim_end().to_string(),
        headers,
        tunneled: Vec::new(),
    };

    match behavior {
        ProxyBehavior::Echo => {
            reader
                .get_mut()
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .ok()?;
            let mut buf = [0u8; 4096];
            loop {
                let n = reader.read(&mut buf).await.ok()?;
                if n == 0 {
                    break;
                }
                event.tunneled.extend_from_slice(&buf[..n]);
                reader.get_mut().write_all(&buf[..n]).await.ok()?;
            }
        }
        ProxyBehavior::GreetAndClose(greeting) => {
            let stream = reader.get_mut();
            stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .ok()?;
            stream.write_all(greeting).await.ok()?;
            stream.shutdown().await.ok()?;
            // Drain until the tunnel closes from the other side
            reader.read_to_end(&mut event.tunneled).await.ok()?;
        }
        ProxyBehavior::Reject(status_line) => {
            let response = format!("{status_line}\r\nContent-Length: 0\r\n\r\n");
            reader.get_mut().write_all(response.as_bytes()).await.ok()?;
        }
        ProxyBehavior::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    Some(event)
}

// ============================================================================
// Tunnel Under Test
// ============================================================================

/// Stands in for `SO_ORIGINAL_DST` on connections no NAT rule touched
struct FixedResolver(SocketAddrV4);

impl DestinationResolver for FixedResolver {
    fn original_destination(&self, _: &TcpStream) -> Result<SocketAddrV4, RedirectError> {
        Ok(self.0)
    }
}

/// Start the tunnel on an ephemeral port in front of the mock proxy
fn start_tunnel(proxy_port: u16, connect_timeout: Duration) -> SocketAddr {
    let listener = RedirectListener::bind(&ListenConfig::default()).unwrap();
    let addr = listener.local_addr();

    let dialer = HttpConnectDialer::new(ProxyTarget::new(
        ProxyUrl::local(proxy_port),
        connect_timeout,
    ));
    let handler = Arc::new(TunnelHandler::new(
        Arc::new(FixedResolver(TARGET.parse().unwrap())),
        Arc::new(dialer),
    ));

    tokio::spawn(run_accept_loop(listener, handler));
    addr
}

async fn expect_eof(stream: &mut TcpStream, within: Duration) {
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(within, stream.read(&mut buf))
        .await
        .expect("connection should be closed in time")
        .unwrap_or(0);
    assert_eq!(n, 0, "expected EOF, got {:?}", &buf[..n]);
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_connect_request_names_original_destination() {
    let (proxy_port, mut events) = start_mock_proxy(ProxyBehavior::Echo).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_secs(5));

    let mut client = TcpStream::connect(tunnel).await.unwrap();
    client.write_all(b"x").await.unwrap();
    let mut echoed = [0u8; 1];
    client.read_exact(&mut echoed).await.unwrap();
    drop(client);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.request_line, "CONNECT 93.184.216.34:80 HTTP/1.1");
    assert!(event.headers.contains(&"Host: 93.184.216.34:80".to_string()));
    assert!(event
        .headers
        .contains(&format!("User-Agent: redir-tunnel/{}", redir_tunnel::VERSION)));
    assert!(event
        .headers
        .contains(&"Proxy-Connection: Keep-Alive".to_string()));
}

#[tokio::test]
async fn test_bytes_flow_unmodified_both_ways() {
    let (proxy_port, mut events) = start_mock_proxy(ProxyBehavior::Echo).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_secs(5));

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let client = TcpStream::connect(tunnel).await.unwrap();
    let (mut rd, mut wr) = client.into_split();

    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr.shutdown().await.unwrap();
    });

    let mut echoed = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), rd.read_to_end(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    writer.await.unwrap();

    assert_eq!(echoed.len(), expected.len());
    assert_eq!(echoed, expected);

    let event = events.recv().await.unwrap();
    assert_eq!(event.tunneled, expected);
}

#[tokio::test]
async fn test_concurrent_connections_are_independent() {
    let (proxy_port, _events) = start_mock_proxy(ProxyBehavior::Echo).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_secs(5));

    let mut tasks = Vec::new();
    for i in 0..16u8 {
        tasks.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(tunnel).await.unwrap();
            let msg = [i; 32];
            client.write_all(&msg).await.unwrap();
            let mut buf = [0u8; 32];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }));
    }
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
    }
}

// ============================================================================
// Dial Failures
// ============================================================================

#[tokio::test]
async fn test_rejected_connect_closes_client() {
    let (proxy_port, mut events) =
        start_mock_proxy(ProxyBehavior::Reject("HTTP/1.1 403 Forbidden")).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_secs(5));

    let mut client = TcpStream::connect(tunnel).await.unwrap();
    expect_eof(&mut client, Duration::from_secs(5)).await;

    let event = events.recv().await.unwrap();
    assert!(event.request_line.starts_with("CONNECT 93.184.216.34:80 "));
}

#[tokio::test]
async fn test_silent_proxy_times_out() {
    let (proxy_port, _events) = start_mock_proxy(ProxyBehavior::Silent).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_millis(300));

    let mut client = TcpStream::connect(tunnel).await.unwrap();
    expect_eof(&mut client, Duration::from_secs(3)).await;
}

#[tokio::test]
async fn test_unreachable_proxy_closes_client_and_keeps_serving() {
    // Reserve a port, then free it so nothing listens there
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let tunnel = start_tunnel(dead_port, Duration::from_secs(2));

    for _ in 0..3 {
        let mut client = TcpStream::connect(tunnel).await.unwrap();
        expect_eof(&mut client, Duration::from_secs(3)).await;
    }
}

// ============================================================================
// Close Propagation
// ============================================================================

#[tokio::test]
async fn test_client_close_reaches_destination() {
    let (proxy_port, mut events) = start_mock_proxy(ProxyBehavior::Echo).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_secs(5));

    let mut client = TcpStream::connect(tunnel).await.unwrap();
    client.write_all(b"bye").await.unwrap();
    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).await.unwrap();
    drop(client);

    // The echo loop only reports once it has seen EOF from the tunnel
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("destination should observe the client close")
        .unwrap();
    assert_eq!(event.tunneled, b"bye");
}

#[tokio::test]
async fn test_destination_close_reaches_client() {
    let (proxy_port, mut events) =
        start_mock_proxy(ProxyBehavior::GreetAndClose(b"220 ready\r\n")).await;
    let tunnel = start_tunnel(proxy_port, Duration::from_secs(5));

    let mut client = TcpStream::connect(tunnel).await.unwrap();
    let mut greeting = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut greeting))
        .await
        .expect("client should observe the destination close")
        .unwrap();
    assert_eq!(greeting, b"220 ready\r\n");

    // Client still gets to finish its half
    client.write_all(b"QUIT\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.tunneled, b"QUIT\r\n");
}

// ============================================================================
// Real NAT
// ============================================================================

/// Needs root, and a rule like:
/// `iptables -t nat -A OUTPUT -p tcp -d 198.51.100.7 --dport 80 -j REDIRECT --to-ports 9090`
#[tokio::test]
#[ignore = "requires root and an iptables REDIRECT rule to port 9090"]
async fn test_real_redirect_rule() {
    use redir_tunnel::redirect::default_destination_resolver;

    let (proxy_port, mut events) = start_mock_proxy(ProxyBehavior::Echo).await;

    let listener = RedirectListener::bind(&ListenConfig::on_port(9090)).unwrap();
    let dialer = HttpConnectDialer::new(ProxyTarget::new(
        ProxyUrl::local(proxy_port),
        Duration::from_secs(5),
    ));
    let handler = Arc::new(TunnelHandler::new(
        default_destination_resolver(),
        Arc::new(dialer),
    ));
    tokio::spawn(run_accept_loop(listener, handler));

    let mut client = TcpStream::connect("198.51.100.7:80").await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    drop(client);

    let event = events.recv().await.unwrap();
    assert_eq!(event.request_line, "CONNECT 198.51.100.7:80 HTTP/1.1");
}

//! Transport lifecycle tests — start/stop state machine, echo over each
//! protocol, bounded shutdown with connected clients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use polyport_transport::*;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Echoes every line back; answers oversized frames with a marker line.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(
        &self,
        _ctx: RequestContext,
        reader: Arc<dyn ConnReader>,
        writer: Arc<dyn ConnWriter>,
    ) -> anyhow::Result<()> {
        let mut frames = FrameReader::new(reader);
        while let Some(frame) = frames.next_frame().await? {
            match frame {
                Frame::Line(line) => write_frame(writer.as_ref(), &line).await?,
                Frame::Oversized(len) => {
                    write_frame(writer.as_ref(), format!("oversized {len}").as_bytes()).await?
                }
            }
        }
        Ok(())
    }
}

fn context() -> Arc<ServerContext> {
    Arc::new(ServerContext::with_handler(
        ServerInfo::new("transport-tests", "0.0.0"),
        Arc::new(EchoHandler),
    ))
}

async fn wait_for_connections(ctx: &ServerContext, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while ctx.connections().len() != n {
        assert!(
            Instant::now() < deadline,
            "expected {n} connection(s), have {}",
            ctx.connections().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn start_tcp(ctx: &Arc<ServerContext>) -> (TcpTransport, String) {
    let transport = TcpTransport::new("127.0.0.1:0");
    transport.start(ctx.clone()).await.unwrap();
    let addr = transport.local_addr().unwrap();
    (transport, addr)
}

/// True once the peer has closed: EOF or a reset.
async fn sees_close(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    match timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) | Err(_) => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TCP
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tcp_echo_roundtrip() {
    let ctx = context();
    let (transport, addr) = start_tcp(&ctx).await;
    assert!(transport.is_running());
    assert_eq!(transport.protocol(), Protocol::Tcp);

    let stream = TcpStream::connect(&addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"hello\r\nworld\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "hello");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "world");

    wait_for_connections(&ctx, 1).await;
    let record = &ctx.connections().all_connections()[0];
    assert_eq!(record.protocol, Protocol::Tcp);
    assert!(record.id.starts_with("tcp-"));

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn start_twice_fails_and_stop_is_idempotent() {
    let ctx = context();
    let (transport, _addr) = start_tcp(&ctx).await;

    let err = transport.start(ctx.clone()).await.unwrap_err();
    assert!(matches!(err, TransportError::AlreadyRunning(Protocol::Tcp)));
    assert!(transport.is_running());

    transport.stop().await.unwrap();
    assert!(!transport.is_running());
    assert!(transport.local_addr().is_none());
    transport.stop().await.unwrap();

    // Idle again, so it can be restarted.
    transport.start(ctx.clone()).await.unwrap();
    transport.stop().await.unwrap();
}

#[tokio::test]
async fn stop_during_start_waits_and_stops() {
    let ctx = context();
    // A host name is resolved on the blocking pool, so `start` parks mid-way.
    let transport = TcpTransport::new("localhost:0");
    let start = transport.start(ctx.clone());
    tokio::pin!(start);
    assert!(futures_util::poll!(&mut start).is_pending());

    let (started, stopped) = tokio::join!(start, transport.stop());
    started.unwrap();
    stopped.unwrap();
    assert!(!transport.is_running());
    assert!(transport.local_addr().is_none());

    transport.start(ctx.clone()).await.unwrap();
    assert!(transport.is_running());
    transport.stop().await.unwrap();
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let transport = TcpTransport::new("127.0.0.1:0");
    transport.stop().await.unwrap();
    assert!(!transport.is_running());
}

#[tokio::test]
async fn bind_failure_leaves_transport_idle() {
    let ctx = context();
    let (first, addr) = start_tcp(&ctx).await;

    let second = TcpTransport::new(addr.clone());
    let err = second.start(ctx.clone()).await.unwrap_err();
    assert!(matches!(err, TransportError::Bind { .. }), "{err}");
    assert!(!second.is_running());

    first.stop().await.unwrap();
}

#[tokio::test]
async fn disconnect_removes_record() {
    let ctx = context();
    let (transport, addr) = start_tcp(&ctx).await;

    let stream = TcpStream::connect(&addr).await.unwrap();
    wait_for_connections(&ctx, 1).await;
    drop(stream);
    wait_for_connections(&ctx, 0).await;

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_bounded_with_silent_clients() {
    let ctx = context();
    let (transport, addr) = start_tcp(&ctx).await;

    let mut clients = Vec::new();
    for _ in 0..10 {
        clients.push(TcpStream::connect(&addr).await.unwrap());
    }
    wait_for_connections(&ctx, 10).await;

    let started = Instant::now();
    transport.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2), "stop took {:?}", started.elapsed());
    assert!(ctx.connections().is_empty());

    for client in &mut clients {
        assert!(sees_close(client).await);
    }
    assert!(TcpStream::connect(&addr).await.is_err());
}

#[tokio::test]
async fn connection_without_handler_is_closed() {
    let ctx = Arc::new(ServerContext::new(ServerInfo::new("bare", "0.0.0")));
    let (transport, addr) = start_tcp(&ctx).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    assert!(sees_close(&mut stream).await);
    wait_for_connections(&ctx, 0).await;

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn handler_error_only_ends_its_own_connection() {
    struct FailOnBang;

    #[async_trait]
    impl Handler for FailOnBang {
        async fn handle(
            &self,
            _ctx: RequestContext,
            reader: Arc<dyn ConnReader>,
            writer: Arc<dyn ConnWriter>,
        ) -> anyhow::Result<()> {
            let mut frames = FrameReader::new(reader);
            while let Some(Frame::Line(line)) = frames.next_frame().await? {
                if line == b"!" {
                    anyhow::bail!("handler gave up");
                }
                write_frame(writer.as_ref(), &line).await?;
            }
            Ok(())
        }
    }

    let ctx = Arc::new(ServerContext::with_handler(
        ServerInfo::new("fail", "0.0.0"),
        Arc::new(FailOnBang),
    ));
    let (transport, addr) = start_tcp(&ctx).await;

    let mut doomed = TcpStream::connect(&addr).await.unwrap();
    let survivor = TcpStream::connect(&addr).await.unwrap();
    wait_for_connections(&ctx, 2).await;

    doomed.write_all(b"!\n").await.unwrap();
    assert!(sees_close(&mut doomed).await);
    wait_for_connections(&ctx, 1).await;

    let (read, mut write) = survivor.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"still here\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "still here");

    transport.stop().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Unix domain sockets
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn unix_echo_and_socket_file_cleanup() {
    use tokio::net::UnixStream;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("polyport.sock");

    // A socket file left behind by a previous process.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let ctx = context();
    let transport = UnixTransport::new(&path).unwrap();
    transport.start(ctx.clone()).await.unwrap();
    assert_eq!(transport.local_addr().unwrap(), path.display().to_string());

    let stream = UnixStream::connect(&path).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"over unix\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "over unix");
    wait_for_connections(&ctx, 1).await;
    assert_eq!(ctx.connections().count_for(Protocol::Unix), 1);

    let started = Instant::now();
    transport.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!path.exists());
    assert!(
        timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .map_or(true, |line| line.is_none())
    );
}

#[cfg(unix)]
#[tokio::test]
async fn unix_refuses_to_clobber_regular_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-socket");
    std::fs::write(&path, b"keep me").unwrap();

    let transport = UnixTransport::new(&path).unwrap();
    let err = transport.start(context()).await.unwrap_err();
    assert!(matches!(err, TransportError::Bind { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}

// ─────────────────────────────────────────────────────────────────────────────
// Named pipes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pipe_names_are_normalized() {
    assert_eq!(normalize_pipe_name("chat"), r"\\.\pipe\chat");
    assert_eq!(normalize_pipe_name(r"pipe\chat"), r"\\.\pipe\chat");
    assert_eq!(normalize_pipe_name(r"\\.\pipe\chat"), r"\\.\pipe\chat");
    assert_eq!(normalize_pipe_name(r"\chat"), r"\\.\pipe\chat");
}

#[cfg(not(windows))]
#[test]
fn named_pipe_is_unsupported_off_windows() {
    let err = NamedPipeTransport::new("chat").err().unwrap();
    assert!(matches!(
        err,
        TransportError::Unsupported {
            protocol: Protocol::NamedPipe,
            ..
        }
    ));
}

#[cfg(windows)]
#[tokio::test]
async fn named_pipe_echo() {
    use tokio::net::windows::named_pipe::ClientOptions;

    let name = format!("polyport-test-{}", std::process::id());
    let ctx = context();
    let transport = NamedPipeTransport::new(&name).unwrap();
    transport.start(ctx.clone()).await.unwrap();

    let client = ClientOptions::new().open(normalize_pipe_name(&name)).unwrap();
    let (read, mut write) = tokio::io::split(client);
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"over a pipe\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "over a pipe");

    transport.stop().await.unwrap();
}

#[cfg(windows)]
#[tokio::test]
async fn named_pipe_keeps_accepting_after_clients_hang_up() {
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

    const ERROR_PIPE_BUSY: i32 = 231;

    async fn open(name: &str) -> NamedPipeClient {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match ClientOptions::new().open(name) {
                Ok(client) => return client,
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) && Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("pipe never became available: {e}"),
            }
        }
    }

    let name = format!("polyport-hangup-{}", std::process::id());
    let path = normalize_pipe_name(&name);
    let ctx = context();
    let transport = NamedPipeTransport::new(&name).unwrap();
    transport.start(ctx.clone()).await.unwrap();

    for _ in 0..20 {
        drop(open(&path).await);
    }

    let client = open(&path).await;
    let (read, mut write) = tokio::io::split(client);
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"still here\n").await.unwrap();
    let line = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap();
    assert_eq!(line.unwrap().unwrap(), "still here");

    transport.stop().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

async fn start_ws(ctx: &Arc<ServerContext>, max_connections: Option<usize>) -> (WebSocketTransport, String) {
    let transport = WebSocketTransport::new(WebSocketConfig {
        addr: "127.0.0.1:0".into(),
        path: "/ws".into(),
        max_connections,
    });
    transport.start(ctx.clone()).await.unwrap();
    let url = format!("ws://{}/ws", transport.local_addr().unwrap());
    (transport, url)
}

#[tokio::test]
async fn websocket_messages_become_lines() {
    let ctx = context();
    let (transport, url) = start_ws(&ctx, None).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    ws.send(Message::Text("ping me".into())).await.unwrap();
    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "ping me");

    // A message that already carries its newline is not doubled.
    ws.send(Message::Text("with newline\n".into())).await.unwrap();
    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "with newline");

    wait_for_connections(&ctx, 1).await;
    assert_eq!(ctx.connections().count_for(Protocol::WebSocket), 1);

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn websocket_stop_closes_clients() {
    let ctx = context();
    let (transport, url) = start_ws(&ctx, None).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect_async(&url).await.unwrap().0);
    }
    wait_for_connections(&ctx, 3).await;

    let started = Instant::now();
    transport.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    for ws in &mut clients {
        let next = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
        assert!(matches!(next, None | Some(Err(_)) | Some(Ok(Message::Close(_)))));
    }
}

#[tokio::test]
async fn websocket_connection_limit() {
    let ctx = context();
    let (transport, url) = start_ws(&ctx, Some(1)).await;

    let (_first, _) = connect_async(&url).await.unwrap();
    wait_for_connections(&ctx, 1).await;
    assert!(connect_async(&url).await.is_err());

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn websocket_limit_holds_under_concurrent_upgrades() {
    let ctx = context();
    let (transport, url) = start_ws(&ctx, Some(2)).await;

    let attempts = futures_util::future::join_all((0..8).map(|_| connect_async(url.clone()))).await;
    let admitted: Vec<_> = attempts.into_iter().filter_map(Result::ok).collect();
    assert_eq!(admitted.len(), 2);
    wait_for_connections(&ctx, 2).await;

    // A freed slot admits the next client.
    drop(admitted);
    wait_for_connections(&ctx, 0).await;
    let (_late, _) = connect_async(&url).await.unwrap();
    wait_for_connections(&ctx, 1).await;

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn websocket_rejects_health_as_upgrade_path() {
    let transport = WebSocketTransport::new(WebSocketConfig {
        addr: "127.0.0.1:0".into(),
        path: "health".into(),
        max_connections: None,
    });
    let err = transport.start(context()).await.unwrap_err();
    assert!(matches!(err, TransportError::Config { .. }));
    assert!(!transport.is_running());
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared registry across transports
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transports_share_one_registry() {
    let ctx = context();
    let (tcp, addr) = start_tcp(&ctx).await;
    let (ws, url) = start_ws(&ctx, None).await;

    let _tcp_client = TcpStream::connect(&addr).await.unwrap();
    let (_ws_client, _) = connect_async(&url).await.unwrap();
    wait_for_connections(&ctx, 2).await;

    let stats = ctx.stats().connections;
    assert_eq!(stats.by_protocol.get(&Protocol::Tcp), Some(&1));
    assert_eq!(stats.by_protocol.get(&Protocol::WebSocket), Some(&1));

    tcp.stop().await.unwrap();
    ws.stop().await.unwrap();
    assert!(ctx.connections().is_empty());
}

//! End-to-end scenarios driven over a real `Server` and raw sockets, one
//! per concrete scenario named in the spec's testable-properties section
//! (keep-alive pipelining, chunked streaming, SSE, the WebSocket handshake
//! plus echo/ping/close, and the future pipeline).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use bytes::Bytes;

use hypersonic::config::Config;
use hypersonic::future::pool::Pool;
use hypersonic::future::Future;
use hypersonic::handler::{Handler, Outcome};
use hypersonic::server::Server;
use hypersonic::sse::SseEvent;
use hypersonic::streaming::Stream;
use hypersonic::ws::frame::{self, OpCode, Role};
use hypersonic::ws::{Message, WsHandle, Handlers as WsHandlers};

fn router() -> Handler {
    Box::new(|req| match req.path.as_str() {
        "/hello" => Outcome::Buffered {
            status: 200,
            content_type: "text/plain".to_string(),
            body: Bytes::from_static(b"Hello, World!"),
            headers: Vec::new(),
        },
        "/stream" => Outcome::StreamBegin {
            on_stream: Box::new(|stream: Stream| {
                stream.headers(200, "text/plain", &[]).unwrap();
                stream.write(b"chunk1\n").unwrap();
                stream.write(b"chunk2\n").unwrap();
                stream.write(b"chunk3\n").unwrap();
                stream.end().unwrap();
            }),
        },
        "/sse" => Outcome::StreamBegin {
            on_stream: Box::new(|stream: Stream| {
                let sse = hypersonic::sse::SseStream::open(stream).unwrap();
                sse.send(&SseEvent::new("Hello SSE!").with_event("greeting")).unwrap();
                sse.send(
                    &SseEvent::new("First update")
                        .with_event("update")
                        .with_id("1"),
                )
                .unwrap();
                sse.close().unwrap();
            }),
        },
        "/ws" => Outcome::WebSocketAccept {
            sub_protocol: None,
            on_open: Box::new(|handlers: &mut WsHandlers, _handle: &mut WsHandle<'_>| {
                handlers.on_message = Some(Box::new(|handle, msg| {
                    if let Message::Text(text) = msg {
                        handle.send_text(&format!("echo: {text}"));
                    }
                }));
            }),
        },
        _ => Outcome::Buffered {
            status: 404,
            content_type: "text/plain".to_string(),
            body: Bytes::from_static(b"not found"),
            headers: Vec::new(),
        },
    })
}

fn serve() -> (Server, std::net::SocketAddr) {
    let config = Config::new().with_port(0).with_workers(1);
    let server = Server::bind(config, router()).expect("bind");
    let addr = server.local_addr().expect("local_addr");
    (server, addr)
}

/// Runs `n` short reactor iterations, enough for a handful of request/
/// response round trips over a loopback connection.
fn pump(server: &mut Server, n: usize) {
    for _ in 0..n {
        server.tick(Some(Duration::from_millis(20))).unwrap();
    }
}

/// Drains whatever the server has already written to `client`, without
/// blocking once the data stops arriving.
fn read_available(client: &mut TcpStream) -> Vec<u8> {
    client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break
            }
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
    buf
}

#[test]
fn s1_keep_alive_pipeline() {
    let (mut server, addr) = serve();
    let mut client = TcpStream::connect(addr).expect("connect");

    let request = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
    client.write_all(request).unwrap();
    client.write_all(request).unwrap();

    pump(&mut server, 20);
    let resp = read_available(&mut client);
    let text = String::from_utf8_lossy(&resp);

    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    assert_eq!(text.matches("Hello, World!").count(), 2);

    drop(client);
    pump(&mut server, 5);
}

#[test]
fn s2_chunked_streaming() {
    let (mut server, addr) = serve();
    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .write_all(b"GET /stream HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();

    pump(&mut server, 20);
    let resp = read_available(&mut client);
    let text = String::from_utf8_lossy(&resp);

    assert!(text.contains("Transfer-Encoding: chunked"));
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let body = &text[body_start..];

    // Decode the chunk framing ourselves to get at the underlying bytes.
    let mut decoded = String::new();
    let mut rest = body;
    loop {
        let line_end = rest.find("\r\n").unwrap();
        let size = usize::from_str_radix(&rest[..line_end], 16).unwrap();
        rest = &rest[line_end + 2..];
        if size == 0 {
            break;
        }
        decoded.push_str(&rest[..size]);
        rest = &rest[size + 2..];
    }
    assert_eq!(decoded, "chunk1\nchunk2\nchunk3\n");
}

#[test]
fn s3_sse_event() {
    let (mut server, addr) = serve();
    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .write_all(b"GET /sse HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();

    pump(&mut server, 20);
    let resp = read_available(&mut client);
    let text = String::from_utf8_lossy(&resp);

    assert!(text.contains("Content-Type: text/event-stream"));
    assert!(text.contains("event: greeting\ndata: Hello SSE!\n\n"));
    assert!(text.contains("id: 1\nevent: update\ndata: First update\n\n"));
}

/// Opens a WebSocket connection to `/ws` using the RFC 6455 §1.3 test
/// vector, returning the connected socket once the 101 response has been
/// read off the wire.
fn open_ws(server: &mut Server, addr: std::net::SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .write_all(
            b"GET /ws HTTP/1.1\r\n\
              Host: x\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();
    pump(server, 20);
    let resp = read_available(&mut client);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    client
}

#[test]
fn s4_websocket_handshake_and_echo() {
    let (mut server, addr) = serve();
    let mut client = open_ws(&mut server, addr);

    let frame = frame::encode(Role::Client, true, OpCode::Text, b"Hello WebSocket!");
    client.write_all(&frame).unwrap();
    pump(&mut server, 20);

    let resp = read_available(&mut client);
    match frame::decode(&resp, Role::Client).unwrap() {
        frame::DecodeOutcome::Complete { frame, .. } => {
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(&frame.payload[..], b"echo: Hello WebSocket!");
        }
        frame::DecodeOutcome::Incomplete => panic!("expected a complete echo frame"),
    }
}

#[test]
fn s5_ping_gets_an_auto_pong() {
    let (mut server, addr) = serve();
    let mut client = open_ws(&mut server, addr);

    let frame = frame::encode(Role::Client, true, OpCode::Ping, b"ping-data");
    client.write_all(&frame).unwrap();
    pump(&mut server, 20);

    let resp = read_available(&mut client);
    match frame::decode(&resp, Role::Client).unwrap() {
        frame::DecodeOutcome::Complete { frame, .. } => {
            assert_eq!(frame.opcode, OpCode::Pong);
            assert_eq!(&frame.payload[..], b"ping-data");
            // a server-sent frame is never masked
            assert_eq!(resp[1] & 0b1000_0000, 0);
        }
        frame::DecodeOutcome::Incomplete => panic!("expected a complete pong frame"),
    }
}

#[test]
fn s6_close_handshake() {
    let (mut server, addr) = serve();
    let mut client = open_ws(&mut server, addr);

    let close_payload = frame::close_payload(frame::close_code::NORMAL, "");
    let frame = frame::encode(Role::Client, true, OpCode::Close, &close_payload);
    client.write_all(&frame).unwrap();
    pump(&mut server, 20);

    let resp = read_available(&mut client);
    match frame::decode(&resp, Role::Client).unwrap() {
        frame::DecodeOutcome::Complete { frame, .. } => {
            assert_eq!(frame.opcode, OpCode::Close);
        }
        frame::DecodeOutcome::Incomplete => panic!("expected a complete close frame"),
    }

    // The server tears the fd down after echoing the close; further reads
    // observe EOF (a zero-length read), not a hang.
    client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut trailing = [0u8; 16];
    assert_eq!(client.read(&mut trailing).unwrap(), 0);
}

#[test]
fn s7_future_pipeline() {
    let mut pool = Pool::new(2, 16).unwrap();
    let future: Future<Vec<i32>> = Future::new();
    pool.submit(future.clone(), || Ok(vec![1, 2, 3])).unwrap();

    // In the real reactor this wait is replaced by backend readiness on
    // `pool.notify_fd()`; here we just give the worker thread a moment.
    std::thread::sleep(Duration::from_millis(50));
    pool.process_ready();
    assert_eq!(future.result(), Some(vec![1, 2, 3]));

    let chained = future
        .then(|values| values.into_iter().sum::<i32>() * 2)
        .catch(|_err| 0)
        .finally(|| {});

    assert_eq!(chained.result(), Some(12));
    pool.shutdown();
}

#[test]
fn max_connections_caps_accepted_connections() {
    let config = Config::new().with_port(0).with_workers(1).with_max_connections(1);
    let mut server = Server::bind(config, router()).expect("bind");
    let addr = server.local_addr().expect("local_addr");

    let first = TcpStream::connect(addr).unwrap();
    pump(&mut server, 5);

    let mut second = TcpStream::connect(addr).unwrap();
    pump(&mut server, 5);

    // the first connection is still served normally
    let mut first = first;
    first.write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    pump(&mut server, 5);
    let resp = read_available(&mut first);
    assert!(String::from_utf8_lossy(&resp).starts_with("HTTP/1.1 200 OK"));

    // the second connection was dropped at accept time, over capacity
    second.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(second.read(&mut buf).unwrap(), 0);
}

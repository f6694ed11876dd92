//! Optional HTTP/2 bridge (§4.7, feature `http2`): once a connection's
//! preface identifies it as HTTP/2, its fd transfers from the HTTP/1
//! parser to this module, which maps the same [`Handler`] contract onto
//! the `h2` crate's per-stream model (send headers → data frames →
//! end-stream).
//!
//! `h2` is written against `tokio`'s `AsyncRead`/`AsyncWrite`, which
//! assume a real executor driving wakeups. The reactor has no executor —
//! it is the single cooperative loop described in §4.8 — so [`MioIo`]
//! below never actually parks: a pending poll just returns
//! `Poll::Pending` and [`Http2Session::drive`] is called again on the
//! connection's next readiness event, the same "retry on the next
//! would-block" discipline the rest of the crate uses for plain sockets.
//! The waker handed to every poll is therefore a no-op; the reactor's own
//! readiness notification is the real wakeup.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use std::future::Future;

use bytes::{Bytes, BytesMut};
use h2::server::{self, SendResponse};
use h2::RecvStream;
use http::Response as HttpResponse;
use mio::net::TcpStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{Error, Result};
use crate::handler::{Handler, Outcome};

/// The fixed preface a client sends before any HTTP/2 frames (RFC 7540
/// §3.5), checked over plaintext since there's no TLS/ALPN layer here.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Whether `buf` already contains enough bytes to confirm (or rule out) an
/// HTTP/2 preface. `None` means "not enough data yet, keep reading".
pub fn matches_preface(buf: &[u8]) -> Option<bool> {
    if buf.len() < PREFACE.len() {
        if !buf.is_empty() && !PREFACE.starts_with(buf) {
            return Some(false);
        }
        return None;
    }
    Some(&buf[..PREFACE.len()] == PREFACE)
}

fn noop_raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn no_op(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
    RawWaker::new(std::ptr::null(), &VTABLE)
}

fn noop_waker() -> Waker {
    unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// Adapts a non-blocking `mio::net::TcpStream` to `tokio`'s async I/O
/// traits without registering it on a tokio reactor: each poll attempts
/// the syscall once and maps `WouldBlock` straight to `Poll::Pending`.
///
/// `prebuffered` holds bytes the reactor already pulled off the socket
/// (at least the connection preface, possibly more of the first frame)
/// before recognizing this as an HTTP/2 connection and handing it off;
/// reads drain this first so nothing already consumed from the wire is
/// lost.
pub struct MioIo {
    pub stream: TcpStream,
    prebuffered: BytesMut,
}

impl MioIo {
    pub fn new(stream: TcpStream, prebuffered: Vec<u8>) -> MioIo {
        MioIo {
            stream,
            prebuffered: BytesMut::from(&prebuffered[..]),
        }
    }
}

impl AsyncRead for MioIo {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prebuffered.is_empty() {
            let take = this.prebuffered.len().min(buf.remaining());
            buf.put_slice(&this.prebuffered[..take]);
            let _ = this.prebuffered.split_to(take);
            return Poll::Ready(Ok(()));
        }
        match io::Read::read(&mut this.stream, buf.initialize_unfilled()) {
            Ok(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for MioIo {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match io::Write::write(&mut this.stream, buf) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match io::Write::flush(&mut self.get_mut().stream) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A stream whose request headers have arrived but whose body is still
/// being collected (§4.7: the bridge buffers the body the same way the
/// HTTP/1 path does for `Outcome::Buffered`; true passthrough streaming
/// of an h2 `RecvStream` straight into `Outcome::StreamBegin` is not
/// wired up, since the two crates' flow-control models don't line up
/// without a real executor driving both sides independently).
struct PendingStream {
    parts: http::request::Parts,
    body: RecvStream,
    collected: BytesMut,
    respond: SendResponse<Bytes>,
}

/// One HTTP/2 connection's state: the handshake future until it resolves,
/// then the live `h2::server::Connection`, then done.
pub enum Http2Session {
    Handshaking(
        Pin<Box<dyn Future<Output = std::result::Result<server::Connection<MioIo, Bytes>, h2::Error>> + Send>>,
    ),
    Running {
        conn: server::Connection<MioIo, Bytes>,
        pending: Vec<PendingStream>,
    },
    Done,
}

impl Http2Session {
    pub fn new(io: MioIo) -> Http2Session {
        Http2Session::Handshaking(Box::pin(server::handshake(io)))
    }

    /// Builds a session over a fresh `TcpStream` plus bytes the reactor
    /// already drained from the socket before recognizing the preface.
    pub fn new_with_prebuffered(stream: TcpStream, prebuffered: Vec<u8>) -> Http2Session {
        Http2Session::new(MioIo::new(stream, prebuffered))
    }

    /// Advances the session as far as it can go without blocking.
    /// Returns `Ok(true)` while the connection is still alive, `Ok(false)`
    /// once it's finished and should be torn down.
    pub fn drive(&mut self, handler: &Handler) -> Result<bool> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        if let Http2Session::Handshaking(fut) = self {
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(Ok(conn)) => {
                    *self = Http2Session::Running {
                        conn,
                        pending: Vec::new(),
                    }
                }
                Poll::Ready(Err(e)) => {
                    *self = Http2Session::Done;
                    return Err(Error::backend_fatal(e));
                }
                Poll::Pending => return Ok(true),
            }
        }

        let (conn, pending) = match self {
            Http2Session::Running { conn, pending } => (conn, pending),
            Http2Session::Done => return Ok(false),
            Http2Session::Handshaking(_) => unreachable!(),
        };

        loop {
            match conn.poll_accept(&mut cx) {
                Poll::Ready(Some(Ok((request, respond)))) => {
                    let (parts, body) = request.into_parts();
                    pending.push(PendingStream {
                        parts,
                        body,
                        collected: BytesMut::new(),
                        respond,
                    });
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::debug!(?e, "http/2 stream accept error");
                }
                Poll::Ready(None) => {
                    *self = Http2Session::Done;
                    return Ok(false);
                }
                Poll::Pending => break,
            }
        }

        let mut finished = Vec::new();
        for (idx, stream) in pending.iter_mut().enumerate() {
            match stream.body.poll_data(&mut cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let _ = stream.body.flow_control().release_capacity(chunk.len());
                    stream.collected.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::debug!(?e, "http/2 body read error");
                    finished.push(idx);
                }
                Poll::Ready(None) => finished.push(idx),
                Poll::Pending => {}
            }
        }

        // Drain completed streams back-to-front so earlier indices stay
        // valid as we remove.
        finished.sort_unstable();
        for idx in finished.into_iter().rev() {
            let stream = pending.remove(idx);
            dispatch_stream(stream, handler);
        }

        Ok(true)
    }
}

/// Runs the handler over one fully-buffered request and writes its
/// response as a single headers-frame-then-data-frame pair.
fn dispatch_stream(stream: PendingStream, handler: &Handler) {
    let PendingStream {
        parts,
        collected,
        mut respond,
        ..
    } = stream;

    let request = crate::http1::Request {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let v = value.to_str().ok()?;
                Some((crate::http1::normalize_header_name(name.as_str()), v.to_string()))
            })
            .collect(),
        body: collected.freeze(),
        keep_alive: true,
        fd: -1,
        peer: std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
    };

    let (status, content_type, body, extra_headers) = match (handler)(request) {
        Outcome::Buffered {
            status,
            content_type,
            body,
            headers,
        } => (status, content_type, body, headers),
        Outcome::Fail(e) => (
            if e.is_request_too_large() { 413 } else { 500 },
            "text/plain".to_string(),
            Bytes::from(format!("{e}\n")),
            Vec::new(),
        ),
        // Streaming responses and WebSocket upgrades aren't portable onto
        // h2's flow-control model through this bridge (see `PendingStream`
        // doc comment); surface the nearest honest HTTP/2 response.
        Outcome::StreamBegin { .. } | Outcome::WebSocketAccept { .. } => (
            501,
            "text/plain".to_string(),
            Bytes::from_static(b"streaming and websocket upgrades are not supported over HTTP/2\n"),
            Vec::new(),
        ),
    };

    let mut builder = HttpResponse::builder()
        .status(status)
        .header("content-type", content_type)
        .header("content-length", body.len().to_string());
    for (k, v) in &extra_headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    let response = match builder.body(()) {
        Ok(r) => r,
        Err(_) => return,
    };

    match respond.send_response(response, false) {
        Ok(mut send_stream) => {
            let _ = send_stream.send_data(body, true);
        }
        Err(e) => tracing::debug!(?e, "http/2 send_response failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_the_preface_incrementally() {
        assert_eq!(matches_preface(b""), None);
        assert_eq!(matches_preface(b"PRI"), None);
        assert_eq!(matches_preface(b"GET "), Some(false));
        assert_eq!(matches_preface(PREFACE), Some(true));
    }
}

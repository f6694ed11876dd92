//! The per-connection state machine (§4.10): ties the HTTP/1 parser, the
//! WebSocket upgrade/frame path, and the streaming engine together behind
//! one arena-indexed record.
//!
//! Connections live in a `Slab<Connection>` owned solely by the
//! [`crate::reactor::Reactor`] — the single-owner redesign named in the
//! original design notes, replacing a global table keyed loosely by fd.
//! `ConnId` is the slab key; `Stream` handles (§4.6) hold a shared
//! reference to the same slab so they keep working across reactor cycles.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Instant;

use mio::net::TcpStream;
use slab::Slab;

use crate::http1::ChunkedDecoder;
use crate::streaming::StreamState;
use crate::ws::frame::FragmentAssembler;

/// The slab key identifying one connection; opaque to everything outside
/// this module and `reactor.rs`.
pub type ConnId = usize;

/// The connections arena, owned by the reactor and shared (via `Rc<RefCell<_>>`
/// at the call sites that need it, e.g. `Stream`) with long-lived handles.
pub type ConnTable = Slab<Connection>;

/// Coarse state of the connection FSM (§4.10). `Streaming` and `WriteTail`
/// refine `WRITE_RESP` for the case where the handler chose to stream the
/// body instead of returning it buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadReq,
    Handling,
    WriteResp,
    Streaming,
    WriteTail,
    WsHandshake,
    WsOpen,
    WsClosing,
    Closed,
}

/// Which protocol a connection is currently speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    WebSocket,
    #[cfg(feature = "http2")]
    Http2,
}

/// One accepted TCP connection and everything the FSM needs to drive it.
pub struct Connection {
    pub io: TcpStream,
    pub peer: SocketAddr,
    pub fd: RawFd,
    pub state: ConnState,
    pub protocol: Protocol,

    /// Bytes read off the socket, not yet consumed by the HTTP/1 parser.
    pub read_buf: Vec<u8>,
    /// Bytes queued for writing that a previous write-ready cycle couldn't
    /// take in full; must drain before any newer data is sent (§4.6, §4.10).
    pub out_buf: Vec<u8>,

    pub keep_alive: bool,
    pub chunked_decoder: Option<ChunkedDecoder>,

    pub stream_state: StreamState,
    pub chunks_sent: u64,

    /// Bytes read for an open WebSocket connection, not yet decoded into
    /// complete frames.
    pub ws_read_buf: Vec<u8>,
    pub ws_assembler: FragmentAssembler,

    pub last_activity: Instant,

    #[cfg(feature = "http2")]
    pub h2_session: Option<crate::h2_adapter::Http2Session>,
}

impl Connection {
    pub fn new(io: TcpStream, peer: SocketAddr, fd: RawFd, read_buffer_size: usize) -> Connection {
        Connection {
            io,
            peer,
            fd,
            state: ConnState::ReadReq,
            protocol: Protocol::Http1,
            read_buf: Vec::with_capacity(read_buffer_size),
            out_buf: Vec::new(),
            keep_alive: true,
            chunked_decoder: None,
            stream_state: StreamState::Init,
            chunks_sent: 0,
            ws_read_buf: Vec::new(),
            ws_assembler: FragmentAssembler::new(),
            last_activity: Instant::now(),
            #[cfg(feature = "http2")]
            h2_session: None,
        }
    }

    /// Resets per-request scratch state after a buffered response
    /// finishes, so the same connection can serve another pipelined
    /// request (§4.10: `WRITE_RESP` → `READ_REQ`).
    pub fn reset_for_next_request(&mut self) {
        self.state = ConnState::ReadReq;
        self.chunked_decoder = None;
        self.stream_state = StreamState::Init;
        self.chunks_sent = 0;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.protocol, Protocol::WebSocket)
    }

    #[cfg(feature = "http2")]
    pub fn is_http2(&self) -> bool {
        matches!(self.protocol, Protocol::Http2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use mio::net::TcpListener;
    use std::net::TcpStream as StdTcpStream;

    fn accepted() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = StdTcpStream::connect(addr).unwrap();
        let (io, peer) = listener.accept().unwrap();
        Connection::new(io, peer, 0, Config::default().read_buffer_size)
    }

    #[test]
    fn new_connection_starts_in_read_req() {
        let conn = accepted();
        assert_eq!(conn.state, ConnState::ReadReq);
        assert!(conn.keep_alive);
        assert!(!conn.is_websocket());
    }

    #[test]
    fn reset_clears_per_request_scratch() {
        let mut conn = accepted();
        conn.chunked_decoder = Some(ChunkedDecoder::new(1024));
        conn.stream_state = crate::streaming::StreamState::Started;
        conn.chunks_sent = 3;
        conn.state = ConnState::WriteResp;
        conn.reset_for_next_request();
        assert_eq!(conn.state, ConnState::ReadReq);
        assert!(conn.chunked_decoder.is_none());
        assert_eq!(conn.chunks_sent, 0);
    }
}

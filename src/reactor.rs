//! The single-threaded cooperative reactor (§4.8): accepts connections,
//! drives each through the FSM in `conn.rs`, and drains the Completion
//! Pool's notify fd once per iteration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use mio::net::TcpListener;
use slab::Slab;

use crate::backend::{Backend, Interest, ReadyEvent, Token};
use crate::conn::{ConnId, ConnState, Connection, Protocol};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::future::pool::Pool;
use crate::handler::{Handler, Outcome};
use crate::http1::{self, ParseOutcome};
use crate::socket;
use crate::streaming::Stream;
use crate::ws::{self, Message};

const LISTENER_TOKEN_FD: RawFd = -1;
const POOL_NOTIFY_TOKEN_FD: RawFd = -2;

/// Owns every piece of mutable server state and runs the event loop.
pub struct Reactor {
    config: Config,
    backend: Box<dyn Backend>,
    listener: TcpListener,
    connections: Rc<RefCell<Slab<Connection>>>,
    fd_to_id: HashMap<RawFd, ConnId>,
    pool: Pool,
    ws_registry: ws::Registry,
    rooms: ws::RoomTable,
    handler: Handler,
    events: Vec<ReadyEvent>,
    ws_outbox: Vec<(RawFd, Bytes)>,
}

impl Reactor {
    pub fn new(config: Config, handler: Handler) -> Result<Reactor> {
        let listener = socket::create_listen_socket(config.port, config.listen_backlog, config.reuse_port)?;
        let mut backend = crate::backend::create(config.backend)?;
        backend.add(listener.as_raw_fd(), Token::for_fd(LISTENER_TOKEN_FD), Interest::READABLE)?;

        let pool = Pool::new(config.workers as usize, config.pool_queue_capacity as usize)
            .map_err(Error::backend_fatal)?;
        backend.add(pool.notify_fd(), Token::for_fd(POOL_NOTIFY_TOKEN_FD), Interest::READABLE)?;

        Ok(Reactor {
            config,
            backend,
            listener,
            connections: Rc::new(RefCell::new(Slab::new())),
            fd_to_id: HashMap::new(),
            pool,
            ws_registry: ws::Registry::new(),
            rooms: ws::RoomTable::new(),
            handler,
            events: Vec::with_capacity(256),
            ws_outbox: Vec::new(),
        })
    }

    /// The bound listening socket, exposed for [`crate::server::Server`]'s
    /// `local_addr`/diagnostics.
    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    /// Runs forever, alternating backend waits with per-fd processing
    /// (§4.8 steps: wait, dispatch readiness, drain pool, repeat).
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.tick(Some(Duration::from_millis(250)))?;
        }
    }

    /// Runs one iteration: a bounded backend wait plus whatever readiness
    /// it reports. Exposed separately from [`Reactor::run`] for tests.
    pub fn tick(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.events.clear();
        self.backend.wait(&mut self.events, timeout)?;

        let events = std::mem::take(&mut self.events);
        for event in &events {
            match event.token {
                Token::Fd(LISTENER_TOKEN_FD) => self.accept_ready(),
                Token::Fd(POOL_NOTIFY_TOKEN_FD) => self.pool.process_ready(),
                Token::Fd(fd) => self.connection_ready(fd, event.readable, event.writable),
                Token::Slot(_) => {}
            }
        }
        self.events = events;

        self.reap_idle_connections();
        Ok(())
    }

    fn accept_ready(&mut self) {
        loop {
            match socket::accept(&self.listener) {
                Ok(Some((stream, peer))) => {
                    if self.connections.borrow().len() >= self.config.max_connections as usize {
                        tracing::warn!(
                            %peer,
                            max = self.config.max_connections,
                            "at max_connections, dropping accepted connection"
                        );
                        // `stream` is dropped here, closing the fd without
                        // ever registering it with the backend.
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    if let Err(e) = self.backend.add(fd, Token::for_fd(fd), Interest::READABLE) {
                        tracing::warn!(?e, "failed to register accepted connection");
                        continue;
                    }
                    let conn = Connection::new(stream, peer, fd, self.config.read_buffer_size);
                    let id = self.connections.borrow_mut().insert(conn);
                    self.fd_to_id.insert(fd, id);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(?e, "accept loop error");
                    break;
                }
            }
        }
    }

    fn connection_ready(&mut self, fd: RawFd, readable: bool, writable: bool) {
        let Some(&id) = self.fd_to_id.get(&fd) else {
            return;
        };

        if writable {
            self.flush_out_buf(id);
        }
        if readable {
            self.drive_read(id);
        }

        let should_close = self
            .connections
            .borrow()
            .get(id)
            .map(|c| c.state == ConnState::Closed)
            .unwrap_or(true);
        if should_close {
            self.teardown(id);
        }
    }

    /// Flushes whatever is queued in `out_buf` from a prior short write.
    fn flush_out_buf(&mut self, id: ConnId) {
        let mut conns = self.connections.borrow_mut();
        let Some(conn) = conns.get_mut(id) else { return };
        if conn.out_buf.is_empty() {
            return;
        }
        match socket::send_vectored(&mut conn.io, &[&conn.out_buf]) {
            Ok(n) => {
                conn.out_buf.drain(..n);
            }
            Err(_) => conn.state = ConnState::Closed,
        }
    }

    fn drive_read(&mut self, id: ConnId) {
        let is_ws = {
            let conns = self.connections.borrow();
            conns.get(id).map(|c| c.is_websocket()).unwrap_or(false)
        };
        if is_ws {
            self.drive_ws_read(id);
            return;
        }

        #[cfg(feature = "http2")]
        {
            let is_h2 = {
                let conns = self.connections.borrow();
                conns.get(id).map(|c| c.is_http2()).unwrap_or(false)
            };
            if is_h2 {
                self.drive_h2(id);
                return;
            }
        }

        self.drive_http_read(id);
    }

    /// Advances an already-upgraded HTTP/2 session by one step (§4.7).
    /// The session reads/writes its own duplicated socket fd directly;
    /// this only needs to know whether it's still alive.
    #[cfg(feature = "http2")]
    fn drive_h2(&mut self, id: ConnId) {
        let mut conns = self.connections.borrow_mut();
        let Some(conn) = conns.get_mut(id) else { return };
        conn.touch();
        let Some(session) = conn.h2_session.as_mut() else {
            conn.state = ConnState::Closed;
            return;
        };
        match session.drive(&self.handler) {
            Ok(true) => {}
            Ok(false) => conn.state = ConnState::Closed,
            Err(e) => {
                tracing::debug!(?e, "http/2 session error");
                conn.state = ConnState::Closed;
            }
        }
    }

    /// Checks whether the bytes just read are (the start of) an HTTP/2
    /// connection preface and, if so, hands the connection off to the `h2`
    /// bridge (§4.7) instead of the HTTP/1 parser. The socket fd itself is
    /// duplicated (`dup(2)`, via `socket2`, the same narrowly-scoped role
    /// it plays in `socket.rs`) so the bridge can own an independent
    /// `TcpStream` without disturbing `conn.io`'s lifetime; both fds refer
    /// to the same underlying open file description, so reads already
    /// buffered in `conn.read_buf` are replayed into the bridge before any
    /// further socket reads happen.
    #[cfg(feature = "http2")]
    fn maybe_upgrade_to_http2(&mut self, id: ConnId) -> bool {
        use std::os::unix::io::{FromRawFd, IntoRawFd};

        let (fd, read_buf) = {
            let conns = self.connections.borrow();
            let Some(conn) = conns.get(id) else { return false };
            match crate::h2_adapter::matches_preface(&conn.read_buf) {
                Some(true) => (conn.fd, conn.read_buf.clone()),
                _ => return false,
            }
        };

        let dup_result = (|| -> Result<mio::net::TcpStream> {
            let borrowed = unsafe { socket2::Socket::from_raw_fd(fd) };
            let cloned = borrowed.try_clone();
            let _ = borrowed.into_raw_fd(); // keep the original fd alive for `conn.io`
            let cloned = cloned.map_err(Error::from)?;
            cloned.set_nonblocking(true).map_err(Error::from)?;
            let std_stream: std::net::TcpStream = cloned.into();
            Ok(mio::net::TcpStream::from_std(std_stream))
        })();

        let dup = match dup_result {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(?e, "failed to duplicate fd for http/2 bridge");
                return false;
            }
        };

        let session = crate::h2_adapter::Http2Session::new_with_prebuffered(dup, read_buf);

        let mut conns = self.connections.borrow_mut();
        if let Some(conn) = conns.get_mut(id) {
            conn.protocol = Protocol::Http2;
            conn.h2_session = Some(session);
            conn.read_buf.clear();
        }
        true
    }

    fn drive_http_read(&mut self, id: ConnId) {
        let read_outcome = {
            let mut conns = self.connections.borrow_mut();
            let Some(conn) = conns.get_mut(id) else { return };
            conn.touch();
            socket::recv_into(&mut conn.io, &mut conn.read_buf)
        };
        if let Err(e) = read_outcome {
            if !e.is_silent_close() {
                tracing::debug!(?e, "read error");
            }
            self.close(id);
            return;
        }

        #[cfg(feature = "http2")]
        if self.maybe_upgrade_to_http2(id) {
            self.drive_h2(id);
            return;
        }

        loop {
            let parsed = {
                let conns = self.connections.borrow();
                let Some(conn) = conns.get(id) else { return };
                if conn.state != ConnState::ReadReq {
                    return;
                }
                http1::parse_request(&conn.read_buf, self.config.max_header_size as usize)
            };

            let head = match parsed {
                Ok(ParseOutcome::Incomplete) => return,
                Ok(ParseOutcome::Complete(head)) => head,
                Err(e) => {
                    self.fail_and_close(id, e);
                    return;
                }
            };

            let body_ready = {
                let mut conns = self.connections.borrow_mut();
                let Some(conn) = conns.get_mut(id) else { return };
                let head_len = head.head_len;
                if head.chunked {
                    let decoder = conn
                        .chunked_decoder
                        .get_or_insert_with(|| {
                            crate::http1::ChunkedDecoder::new(self.config.max_chunked_body as usize)
                        });
                    match decoder.decode(&conn.read_buf[head_len..]) {
                        Ok(crate::http1::ChunkDecodeOutcome::Complete { consumed, body }) => {
                            conn.read_buf.drain(..head_len + consumed);
                            Some(body)
                        }
                        Ok(crate::http1::ChunkDecodeOutcome::Incomplete { .. }) => None,
                        Err(e) => return self.fail_and_close(id, e),
                    }
                } else {
                    let needed = head.content_length.unwrap_or(0) as usize;
                    if conn.read_buf.len() - head_len < needed {
                        None
                    } else {
                        let body = bytes::Bytes::copy_from_slice(
                            &conn.read_buf[head_len..head_len + needed],
                        );
                        conn.read_buf.drain(..head_len + needed);
                        Some(body)
                    }
                }
            };

            let Some(body) = body_ready else { return };

            let request = {
                let conns = self.connections.borrow();
                let conn = conns.get(id).unwrap();
                crate::http1::Request {
                    method: head.method,
                    path: head.path,
                    headers: head.headers,
                    body,
                    keep_alive: head.keep_alive,
                    fd: conn.fd,
                    peer: conn.peer,
                }
            };

            {
                let mut conns = self.connections.borrow_mut();
                if let Some(conn) = conns.get_mut(id) {
                    conn.state = ConnState::Handling;
                    conn.keep_alive = request.keep_alive;
                }
            }

            self.dispatch(id, request);

            let keep_looping = {
                let conns = self.connections.borrow();
                conns
                    .get(id)
                    .map(|c| c.state == ConnState::ReadReq)
                    .unwrap_or(false)
            };
            if !keep_looping {
                return;
            }
        }
    }

    fn dispatch(&mut self, id: ConnId, request: crate::http1::Request) {
        let fd = request.fd;
        // Computed before the handler consumes `request` (§4.4): the
        // handshake only needs the headers the client already sent, not
        // the handler's decision, so it's always available by the time a
        // `WebSocketAccept` outcome needs it.
        let handshake = ws::handshake::validate(&request);
        let outcome = (self.handler)(request);
        match outcome {
            Outcome::Buffered {
                status,
                content_type,
                body,
                headers,
            } => self.respond_buffered(id, status, &content_type, &body, &headers),
            Outcome::StreamBegin { on_stream } => {
                let mut conns = self.connections.borrow_mut();
                if let Some(conn) = conns.get_mut(id) {
                    conn.state = ConnState::Streaming;
                }
                drop(conns);
                let stream = Stream::new(self.connections.clone(), id);
                on_stream(stream);
            }
            Outcome::WebSocketAccept {
                sub_protocol,
                on_open,
            } => match handshake {
                Ok(info) => self.accept_websocket(id, fd, info, sub_protocol, on_open),
                Err(e) => self.reject_websocket(id, e),
            },
            Outcome::Fail(e) => self.fail_and_close(id, e),
        }
    }

    /// Writes the `400`/`426` response for a handshake that failed
    /// validation (§4.4) and closes the connection.
    fn reject_websocket(&mut self, id: ConnId, err: ws::handshake::HandshakeError) {
        let status = match err {
            ws::handshake::HandshakeError::UnsupportedVersion => 426,
            ws::handshake::HandshakeError::BadRequest(_) => 400,
        };
        self.respond_buffered(id, status, "text/plain", status_text(status).as_bytes(), &[]);
        self.close(id);
    }

    fn respond_buffered(
        &mut self,
        id: ConnId,
        status: u16,
        content_type: &str,
        body: &[u8],
        extra_headers: &[(String, String)],
    ) {
        let mut conns = self.connections.borrow_mut();
        let Some(conn) = conns.get_mut(id) else { return };
        let mut head = http1::encode::buffered_head(status, content_type, body.len(), conn.keep_alive);
        // splice extra headers in before the terminating blank line
        if !extra_headers.is_empty() {
            let insert_at = head.len() - 2;
            let mut extra = String::new();
            for (k, v) in extra_headers {
                extra.push_str(k);
                extra.push_str(": ");
                extra.push_str(v);
                extra.push_str("\r\n");
            }
            head.splice(insert_at..insert_at, extra.into_bytes());
        }
        match socket::send_vectored(&mut conn.io, &[&head, body]) {
            Ok(n) => {
                let total = head.len() + body.len();
                if n < total {
                    conn.out_buf.extend_from_slice(&[&head[..], body].concat()[n..]);
                }
            }
            Err(_) => {
                conn.state = ConnState::Closed;
                return;
            }
        }
        if conn.keep_alive {
            conn.reset_for_next_request();
        } else {
            conn.state = ConnState::Closed;
        }
    }

    fn fail_and_close(&mut self, id: ConnId, err: Error) {
        if err.is_silent_close() {
            self.close(id);
            return;
        }
        let status = if err.is_request_too_large() {
            413
        } else if err.is_parse() {
            400
        } else {
            500
        };
        self.respond_buffered(id, status, "text/plain", status_text(status).as_bytes(), &[]);
        self.close(id);
    }

    fn accept_websocket(
        &mut self,
        id: ConnId,
        fd: RawFd,
        handshake: ws::HandshakeInfo,
        sub_protocol: Option<String>,
        on_open: Box<dyn FnOnce(&mut ws::Handlers, &mut ws::WsHandle<'_>) + Send>,
    ) {
        // The handler may override the negotiated sub-protocol (e.g. pick
        // among several it offered); fall back to the client's first
        // offering otherwise.
        let chosen_protocol = sub_protocol.or(handshake.sub_protocol.clone());

        {
            let mut conns = self.connections.borrow_mut();
            let Some(conn) = conns.get_mut(id) else { return };
            let response = ws::handshake::build_response(&handshake.accept_key, chosen_protocol.as_deref());
            match socket::send_vectored(&mut conn.io, &[&response]) {
                Ok(n) if n < response.len() => conn.out_buf.extend_from_slice(&response[n..]),
                Ok(_) => {}
                Err(_) => {
                    conn.state = ConnState::Closed;
                    drop(conns);
                    self.teardown(id);
                    return;
                }
            }
        }

        if let Err(e) = self.ws_registry.register(fd, chosen_protocol) {
            self.fail_and_close(id, e);
            return;
        }

        {
            let mut conns = self.connections.borrow_mut();
            if let Some(conn) = conns.get_mut(id) {
                conn.protocol = Protocol::WebSocket;
                conn.state = ConnState::WsOpen;
            }
        }

        if let Some(meta) = self.ws_registry.get_mut(fd) {
            let mut close_request = None;
            let mut handle = ws::WsHandle::new(fd, &mut self.ws_outbox, &mut close_request);
            on_open(&mut meta.handlers, &mut handle);
        }
        self.flush_ws_outbox(id);
    }

    fn drive_ws_read(&mut self, id: ConnId) {
        let fd = {
            let conns = self.connections.borrow();
            conns.get(id).map(|c| c.fd)
        };
        let Some(fd) = fd else { return };

        let read_outcome = {
            let mut conns = self.connections.borrow_mut();
            let Some(conn) = conns.get_mut(id) else { return };
            conn.touch();
            socket::recv_into(&mut conn.io, &mut conn.ws_read_buf)
        };
        if read_outcome.is_err() {
            self.ws_registry.begin_close(fd, ws::close_code::GOING_AWAY, "", &mut self.ws_outbox);
            self.flush_ws_outbox(id);
            self.close(id);
            return;
        }

        loop {
            let decoded = {
                let conns = self.connections.borrow();
                let Some(conn) = conns.get(id) else { return };
                ws::frame::decode(&conn.ws_read_buf, ws::frame::Role::Server)
            };
            let (frame, consumed) = match decoded {
                Ok(ws::frame::DecodeOutcome::Incomplete) => return,
                Ok(ws::frame::DecodeOutcome::Complete { frame, consumed }) => (frame, consumed),
                Err(e) => {
                    self.ws_registry
                        .begin_close(fd, ws::close_code::PROTOCOL_ERROR, &e.to_string(), &mut self.ws_outbox);
                    self.flush_ws_outbox(id);
                    self.close(id);
                    return;
                }
            };
            {
                let mut conns = self.connections.borrow_mut();
                if let Some(conn) = conns.get_mut(id) {
                    conn.ws_read_buf.drain(..consumed);
                }
            }

            match frame.opcode {
                ws::OpCode::Ping => self.ws_registry.dispatch_ping(fd, &frame.payload, &mut self.ws_outbox),
                ws::OpCode::Pong => self.ws_registry.dispatch_pong(fd, &frame.payload, &mut self.ws_outbox),
                ws::OpCode::Close => {
                    let (code, reason) = ws::frame::parse_close_payload(&frame.payload);
                    self.ws_registry
                        .begin_close(fd, code.unwrap_or(ws::close_code::NORMAL), &reason, &mut self.ws_outbox);
                    self.flush_ws_outbox(id);
                    self.close(id);
                    return;
                }
                ws::OpCode::Text | ws::OpCode::Binary | ws::OpCode::Continuation => {
                    let assembled = {
                        let mut conns = self.connections.borrow_mut();
                        let Some(conn) = conns.get_mut(id) else { return };
                        conn.ws_assembler.feed(&frame, self.config.max_ws_assembly as usize)
                    };
                    match assembled {
                        Ok(Some((op, payload))) => {
                            let msg = match op {
                                ws::OpCode::Text => {
                                    Message::Text(String::from_utf8_lossy(&payload).into_owned())
                                }
                                _ => Message::Binary(payload),
                            };
                            if let Err(e) = self.ws_registry.dispatch_message(fd, msg, &mut self.ws_outbox) {
                                self.ws_registry.begin_close(
                                    fd,
                                    ws::close_code::INTERNAL_ERROR,
                                    &e.to_string(),
                                    &mut self.ws_outbox,
                                );
                                self.flush_ws_outbox(id);
                                self.close(id);
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.ws_registry.begin_close(
                                fd,
                                ws::close_code::PROTOCOL_ERROR,
                                &e.to_string(),
                                &mut self.ws_outbox,
                            );
                            self.flush_ws_outbox(id);
                            self.close(id);
                            return;
                        }
                    }
                }
            }
            self.flush_ws_outbox(id);
        }
    }

    /// Writes every `(fd, frame bytes)` pair accumulated by a WS handler
    /// callback to its real connection socket (§4.4: handlers never touch
    /// sockets directly; they enqueue onto the outbox instead).
    fn flush_ws_outbox(&mut self, _originating_id: ConnId) {
        let pending = std::mem::take(&mut self.ws_outbox);
        for (target_fd, bytes) in pending {
            let Some(&target_id) = self.fd_to_id.get(&target_fd) else { continue };
            let mut conns = self.connections.borrow_mut();
            if let Some(conn) = conns.get_mut(target_id) {
                match socket::send_vectored(&mut conn.io, &[&bytes]) {
                    Ok(n) if n < bytes.len() => conn.out_buf.extend_from_slice(&bytes[n..]),
                    Ok(_) => {}
                    Err(_) => conn.state = ConnState::Closed,
                }
            }
        }
    }

    fn reap_idle_connections(&mut self) {
        let timeout = self.config.keepalive_timeout();
        let stale: Vec<ConnId> = self
            .connections
            .borrow()
            .iter()
            .filter(|(_, c)| c.state == ConnState::ReadReq && c.idle_for() > timeout)
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            self.close(id);
        }
    }

    fn close(&mut self, id: ConnId) {
        let mut conns = self.connections.borrow_mut();
        if let Some(conn) = conns.get_mut(id) {
            conn.state = ConnState::Closed;
        }
        drop(conns);
        self.teardown(id);
    }

    fn teardown(&mut self, id: ConnId) {
        let mut conns = self.connections.borrow_mut();
        let Some(conn) = conns.remove_if_present(id) else { return };
        let fd = conn.fd;
        drop(conns);
        self.fd_to_id.remove(&fd);
        self.ws_registry.unregister(fd);
        self.rooms.leave_all(fd);
        let _ = self.backend.del(fd);
    }
}

fn status_text(status: u16) -> String {
    format!("{} {}\n", status, http1::reason_phrase(status))
}

trait SlabRemoveIfPresent<T> {
    fn remove_if_present(&mut self, id: ConnId) -> Option<T>;
}

impl<T> SlabRemoveIfPresent<T> for Slab<T> {
    fn remove_if_present(&mut self, id: ConnId) -> Option<T> {
        if self.contains(id) {
            Some(self.remove(id))
        } else {
            None
        }
    }
}

//! The streaming engine (§4.6): a handle a handler can hold onto across
//! multiple reactor cycles to push a chunked response body out as data
//! becomes available.

use std::cell::RefCell;
use std::rc::Rc;

use slab::Slab;

use crate::conn::{Connection, ConnId};
use crate::error::{Error, Result};
use crate::http1::encode;
use crate::socket;

/// Lifecycle of one streaming response (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// `headers()` hasn't been called yet; no bytes written.
    Init,
    /// Headers sent; `write()` may be called any number of times.
    Started,
    /// `end()` was called; the terminating chunk was sent.
    Finished,
    /// `abort()` was called or the peer vanished mid-stream.
    Aborted,
}

/// A handle to one connection's outgoing stream. Cheap to clone — all
/// clones refer to the same underlying connection slot. Holding onto one
/// across reactor cycles is the whole point (§4.6): a handler can start a
/// stream, return, and keep writing to it later from a future callback.
/// Once the connection is gone, every method silently does nothing
/// (§4.10: "connection gone" must be observed and payload dropped).
pub struct Stream {
    conns: Rc<RefCell<Slab<Connection>>>,
    id: ConnId,
}

impl Stream {
    pub fn new(conns: Rc<RefCell<Slab<Connection>>>, id: ConnId) -> Stream {
        Stream { conns, id }
    }

    fn state(&self) -> Option<StreamState> {
        self.conns
            .borrow()
            .get(self.id)
            .map(|c| c.stream_state)
    }

    /// Sends the status line and headers, switching to chunked framing.
    /// Errors if called outside `Init` — in particular, calling it after a
    /// `write()` already emitted a default head is the client's mistake,
    /// not ours (§8). A vanished connection is reported as
    /// `Error::peer_closed`, matching the "gone" handling elsewhere.
    pub fn headers(&self, status: u16, content_type: &str, extra: &[(&str, &str)]) -> Result<()> {
        match self.state() {
            None => return Err(Error::peer_closed()),
            Some(StreamState::Init) => {}
            Some(_) => return Err(Error::protocol_violation("headers() called twice")),
        }

        let head = build_head(status, content_type, extra);
        let mut conns = self.conns.borrow_mut();
        let conn = conns
            .get_mut(self.id)
            .ok_or_else(Error::peer_closed)?;
        emit_head(conn, &head)
    }

    /// Writes one chunk of body data. Called while still in `Init`, this
    /// implicitly emits the default status line and headers first (§3, §4.6:
    /// "write() in INIT implicitly transitions to STARTED"). A no-op once
    /// the stream has finished or aborted, or once the connection is gone.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut conns = self.conns.borrow_mut();
        let Some(conn) = conns.get_mut(self.id) else {
            return Ok(());
        };
        match conn.stream_state {
            StreamState::Started => {}
            StreamState::Init => {
                let head = build_head(200, "application/octet-stream", &[]);
                emit_head(conn, &head)?;
            }
            StreamState::Finished | StreamState::Aborted => return Ok(()),
        }
        let chunk = encode::encode_chunk(data);
        write_or_buffer(conn, &chunk)?;
        conn.chunks_sent += 1;
        Ok(())
    }

    /// Sends the terminating zero-length chunk. A no-op if already
    /// finished/aborted or the connection is gone.
    pub fn end(&self) -> Result<()> {
        let mut conns = self.conns.borrow_mut();
        let Some(conn) = conns.get_mut(self.id) else {
            return Ok(());
        };
        if !matches!(conn.stream_state, StreamState::Started) {
            return Ok(());
        }
        write_or_buffer(conn, encode::FINAL_CHUNK)?;
        conn.stream_state = StreamState::Finished;
        Ok(())
    }

    /// Abandons the stream without sending the terminating chunk, forcing
    /// the connection closed once control returns to the reactor (§4.6:
    /// abort never attempts to leave the wire in a valid framing state).
    pub fn abort(&self) {
        let mut conns = self.conns.borrow_mut();
        if let Some(conn) = conns.get_mut(self.id) {
            conn.stream_state = StreamState::Aborted;
            conn.keep_alive = false;
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), Some(StreamState::Started))
    }
}

/// Builds the status line plus headers for a chunked response, minus the
/// `Connection` header (that one needs the live connection's keep-alive
/// flag, added by `emit_head`).
fn build_head(status: u16, content_type: &str, extra: &[(&str, &str)]) -> String {
    let mut head = String::with_capacity(192);
    head.push_str(&encode::status_line(status));
    head.push_str("Content-Type: ");
    head.push_str(content_type);
    head.push_str("\r\n");
    head.push_str("Transfer-Encoding: chunked\r\n");
    for (name, value) in extra {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head
}

/// Appends the `Connection` header, writes the head to the wire, and
/// transitions `conn` to `Started`.
fn emit_head(conn: &mut Connection, head: &str) -> Result<()> {
    let mut head = head.to_string();
    head.push_str(encode::connection_header(conn.keep_alive));
    head.push_str("\r\n");
    write_or_buffer(conn, head.as_bytes())?;
    conn.stream_state = StreamState::Started;
    Ok(())
}

/// Writes `bytes` to `conn`, queuing whatever the socket wouldn't take
/// right away onto `conn.out_buf` for the reactor to flush on the next
/// write-ready event (§4.6: "writes across multiple ready cycles are
/// permitted"). Anything already queued must drain first, or framing
/// would be delivered out of order.
fn write_or_buffer(conn: &mut Connection, bytes: &[u8]) -> Result<()> {
    if !conn.out_buf.is_empty() {
        conn.out_buf.extend_from_slice(bytes);
        return Ok(());
    }
    let n = socket::send_vectored(&mut conn.io, &[bytes])?;
    if n < bytes.len() {
        conn.out_buf.extend_from_slice(&bytes[n..]);
    }
    Ok(())
}

//! WebSocket support: handshake, frame codec, and the connection registry
//! (§4.3, §4.4).

pub mod frame;
pub mod handshake;
pub mod registry;
pub mod room;

use std::os::unix::io::RawFd;

use bytes::Bytes;

pub use frame::{close_code, OpCode};
pub use handshake::HandshakeInfo;
pub use registry::Registry;
pub use room::{Room, RoomTable};

/// Lifecycle state of one WebSocket connection (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Open,
    Closing,
    Closed,
}

/// A reassembled application message (fragments already joined, §4.3).
#[derive(Debug, Clone)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// The event handler table a connection's `on_open` callback populates
/// (§3: "event handler table ({open, message, ping, pong, close, error})").
/// `open` itself isn't stored here — it runs once at accept time and is
/// given the chance to install these.
#[derive(Default)]
pub struct Handlers {
    pub on_message: Option<Box<dyn FnMut(&mut WsHandle<'_>, Message)>>,
    pub on_ping: Option<Box<dyn FnMut(&mut WsHandle<'_>, &[u8])>>,
    pub on_pong: Option<Box<dyn FnMut(&mut WsHandle<'_>, &[u8])>>,
    pub on_close: Option<Box<dyn FnMut(&mut WsHandle<'_>, u16, &str)>>,
}

/// Per-connection WebSocket state held in the [`Registry`].
pub struct WsMeta {
    pub fd: RawFd,
    pub state: WsState,
    pub sub_protocol: Option<String>,
    pub assembler: frame::FragmentAssembler,
    pub handlers: Handlers,
}

/// A handle passed to user callbacks (§4.4). Sends are deferred: rather
/// than writing straight to a socket (which would require aliasing the
/// registry while it's mid-dispatch), calls here just enqueue `(fd, frame
/// bytes)` pairs that the reactor flushes once the callback returns. This
/// also means `broadcast`-from-a-handler is safe by construction — no
/// connection's I/O is ever touched while another connection's handler is
/// still running.
pub struct WsHandle<'a> {
    pub fd: RawFd,
    outbox: &'a mut Vec<(RawFd, Bytes)>,
    close_request: &'a mut Option<(u16, String)>,
}

impl<'a> WsHandle<'a> {
    /// Builds a handle over a reactor's per-tick outbox. Used by the
    /// reactor when invoking `on_open`/`on_message`/etc; test code in this
    /// module builds `WsHandle` literals directly since it shares this
    /// module's privacy.
    pub(crate) fn new(
        fd: RawFd,
        outbox: &'a mut Vec<(RawFd, Bytes)>,
        close_request: &'a mut Option<(u16, String)>,
    ) -> WsHandle<'a> {
        WsHandle {
            fd,
            outbox,
            close_request,
        }
    }

    pub fn send_text(&mut self, text: &str) {
        self.outbox.push((
            self.fd,
            frame::encode_server(true, OpCode::Text, text.as_bytes()).freeze(),
        ));
    }

    pub fn send_binary(&mut self, data: &[u8]) {
        self.outbox
            .push((self.fd, frame::encode_server(true, OpCode::Binary, data).freeze()));
    }

    /// Sends a pre-built frame to every member of `room` (optionally
    /// excluding this connection).
    pub fn broadcast_to(&mut self, room: &Room, frame_bytes: &Bytes, exclude_self: bool) {
        for member in room.iter() {
            if exclude_self && member == self.fd {
                continue;
            }
            self.outbox.push((member, frame_bytes.clone()));
        }
    }

    /// Requests a close handshake for this connection with `code`/`reason`.
    /// The actual close frame is enqueued and teardown scheduled once the
    /// current callback returns.
    pub fn close(&mut self, code: u16, reason: &str) {
        *self.close_request = Some((code, reason.to_string()));
    }
}

//! The WebSocket connection registry (§4.4, §5): a fixed-capacity table
//! indexed directly by fd, mirroring the classic fd-indexed-array idiom the
//! event backends already use for readiness tracking.

use std::os::unix::io::RawFd;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::ws::{Handlers, Message, WsHandle, WsMeta, WsState};

/// Fixed registry capacity: the largest fd value (+1) this server can hold
/// an open WebSocket connection for (§5).
pub const CAPACITY: usize = 65536;

/// Arena-indexed table of live WebSocket connections, keyed by raw fd.
pub struct Registry {
    slots: Vec<Option<WsMeta>>,
    active: usize,
}

impl Registry {
    pub fn new() -> Registry {
        let mut slots = Vec::with_capacity(CAPACITY);
        slots.resize_with(CAPACITY, || None);
        Registry { slots, active: 0 }
    }

    pub fn capacity(&self) -> usize {
        CAPACITY
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    fn slot_index(fd: RawFd) -> Result<usize> {
        usize::try_from(fd)
            .ok()
            .filter(|&i| i < CAPACITY)
            .ok_or_else(|| Error::protocol_violation("fd out of websocket registry range"))
    }

    /// Registers a freshly-upgraded connection. Errors if `fd` is out of
    /// range or already registered (the latter would indicate a reactor
    /// bug: two upgrades for one fd).
    pub fn register(&mut self, fd: RawFd, sub_protocol: Option<String>) -> Result<()> {
        let idx = Self::slot_index(fd)?;
        if self.slots[idx].is_some() {
            return Err(Error::protocol_violation("fd already registered"));
        }
        self.slots[idx] = Some(WsMeta {
            fd,
            state: WsState::Open,
            sub_protocol,
            assembler: crate::ws::frame::FragmentAssembler::new(),
            handlers: Handlers::default(),
        });
        self.active += 1;
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> Option<WsMeta> {
        let idx = Self::slot_index(fd).ok()?;
        let meta = self.slots[idx].take();
        if meta.is_some() {
            self.active -= 1;
        }
        meta
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        Self::slot_index(fd)
            .ok()
            .map(|idx| self.slots[idx].is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, fd: RawFd) -> Option<&WsMeta> {
        Self::slot_index(fd).ok().and_then(|idx| self.slots[idx].as_ref())
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut WsMeta> {
        Self::slot_index(fd).ok().and_then(move |idx| self.slots[idx].as_mut())
    }

    pub fn set_state(&mut self, fd: RawFd, state: WsState) {
        if let Some(meta) = self.get_mut(fd) {
            meta.state = state;
        }
    }

    /// Sends a text frame to one connection, if it's registered and
    /// currently `Open` (§4.4).
    pub fn send_text(&self, fd: RawFd, msg: &str, outbox: &mut Vec<(RawFd, Bytes)>) {
        if self.get(fd).map(|m| m.state) == Some(WsState::Open) {
            outbox.push((fd, crate::ws::frame::encode_server(true, crate::ws::frame::OpCode::Text, msg.as_bytes()).freeze()));
        }
    }

    /// Sends a binary frame to one connection, if it's registered and
    /// currently `Open`.
    pub fn send_binary(&self, fd: RawFd, data: &[u8], outbox: &mut Vec<(RawFd, Bytes)>) {
        if self.get(fd).map(|m| m.state) == Some(WsState::Open) {
            outbox.push((fd, crate::ws::frame::encode_server(true, crate::ws::frame::OpCode::Binary, data).freeze()));
        }
    }

    /// Encodes `msg` once and enqueues it for every registered connection
    /// whose state is `Open`, optionally skipping `exclude_fd` (§4.4).
    /// Non-`Open` members (closing/closed but not yet unregistered) are
    /// skipped rather than sent to, and cleaned up lazily by whatever
    /// already reaps closed connections — `broadcast` itself never
    /// unregisters anything. Returns the number of connections the frame
    /// was actually enqueued for.
    pub fn broadcast(&self, msg: &str, exclude_fd: Option<RawFd>, outbox: &mut Vec<(RawFd, Bytes)>) -> usize {
        let frame = crate::ws::frame::encode_server(true, crate::ws::frame::OpCode::Text, msg.as_bytes()).freeze();
        let mut sent = 0;
        for meta in self.slots.iter().flatten() {
            if meta.state != WsState::Open {
                continue;
            }
            if Some(meta.fd) == exclude_fd {
                continue;
            }
            outbox.push((meta.fd, frame.clone()));
            sent += 1;
        }
        sent
    }

    /// Invokes the registered `on_message` callback, if any, collecting any
    /// frames it enqueues into `outbox`. The handler is temporarily taken
    /// out of the slot for the duration of the call so a handler that
    /// itself calls back into the registry (e.g. to read another
    /// connection's metadata) can't alias its own slot.
    pub fn dispatch_message(
        &mut self,
        fd: RawFd,
        msg: Message,
        outbox: &mut Vec<(RawFd, Bytes)>,
    ) -> Result<()> {
        let idx = Self::slot_index(fd)?;
        let Some(meta) = self.slots[idx].as_mut() else {
            return Ok(());
        };
        let Some(mut handler) = meta.handlers.on_message.take() else {
            return Ok(());
        };
        let mut close_request = None;
        {
            let mut handle = WsHandle {
                fd,
                outbox,
                close_request: &mut close_request,
            };
            handler(&mut handle, msg);
        }
        if let Some(meta) = self.slots[idx].as_mut() {
            meta.handlers.on_message = Some(handler);
        }
        if let Some((code, reason)) = close_request {
            self.begin_close(fd, code, &reason, outbox);
        }
        Ok(())
    }

    pub fn dispatch_ping(&mut self, fd: RawFd, payload: &[u8], outbox: &mut Vec<(RawFd, Bytes)>) {
        // Auto-pong happens unconditionally (§4.4); the user handler is an
        // observer only.
        outbox.push((
            fd,
            crate::ws::frame::encode_server(true, crate::ws::frame::OpCode::Pong, payload)
                .freeze(),
        ));
        let idx = match Self::slot_index(fd) {
            Ok(i) => i,
            Err(_) => return,
        };
        if let Some(meta) = self.slots[idx].as_mut() {
            if let Some(mut handler) = meta.handlers.on_ping.take() {
                let mut close_request = None;
                {
                    let mut handle = WsHandle {
                        fd,
                        outbox,
                        close_request: &mut close_request,
                    };
                    handler(&mut handle, payload);
                }
                if let Some(meta) = self.slots[idx].as_mut() {
                    meta.handlers.on_ping = Some(handler);
                }
            }
        }
    }

    pub fn dispatch_pong(&mut self, fd: RawFd, payload: &[u8], outbox: &mut Vec<(RawFd, Bytes)>) {
        let idx = match Self::slot_index(fd) {
            Ok(i) => i,
            Err(_) => return,
        };
        if let Some(meta) = self.slots[idx].as_mut() {
            if let Some(mut handler) = meta.handlers.on_pong.take() {
                let mut close_request = None;
                {
                    let mut handle = WsHandle {
                        fd,
                        outbox,
                        close_request: &mut close_request,
                    };
                    handler(&mut handle, payload);
                }
                if let Some(meta) = self.slots[idx].as_mut() {
                    meta.handlers.on_pong = Some(handler);
                }
            }
        }
    }

    /// Runs the close handshake: fires `on_close`, enqueues an echoing close
    /// frame if the peer hasn't already sent one from us, and marks the
    /// connection closing so the reactor tears it down (§4.4, §4.10).
    pub fn begin_close(
        &mut self,
        fd: RawFd,
        code: u16,
        reason: &str,
        outbox: &mut Vec<(RawFd, Bytes)>,
    ) {
        let idx = match Self::slot_index(fd) {
            Ok(i) => i,
            Err(_) => return,
        };
        let already_closing = matches!(
            self.slots[idx].as_ref().map(|m| m.state),
            Some(WsState::Closing) | Some(WsState::Closed)
        );
        if !already_closing {
            outbox.push((
                fd,
                crate::ws::frame::encode_server(
                    true,
                    crate::ws::frame::OpCode::Close,
                    &crate::ws::frame::close_payload(code, reason),
                )
                .freeze(),
            ));
        }
        if let Some(meta) = self.slots[idx].as_mut() {
            meta.state = WsState::Closing;
            if let Some(mut handler) = meta.handlers.on_close.take() {
                let mut close_request = None;
                {
                    let mut handle = WsHandle {
                        fd,
                        outbox,
                        close_request: &mut close_request,
                    };
                    handler(&mut handle, code, reason);
                }
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister_round_trip() {
        let mut reg = Registry::new();
        reg.register(7, Some("chat".to_string())).unwrap();
        assert!(reg.is_registered(7));
        assert_eq!(reg.active_count(), 1);
        reg.unregister(7);
        assert!(!reg.is_registered(7));
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn double_register_is_an_error() {
        let mut reg = Registry::new();
        reg.register(3, None).unwrap();
        assert!(reg.register(3, None).is_err());
    }

    #[test]
    fn fd_beyond_capacity_is_rejected() {
        let mut reg = Registry::new();
        assert!(reg.register(CAPACITY as RawFd, None).is_err());
    }

    #[test]
    fn message_dispatch_invokes_handler_once() {
        let mut reg = Registry::new();
        reg.register(5, None).unwrap();
        let calls = std::rc::Rc::new(std::cell::RefCell::new(0));
        let calls2 = calls.clone();
        reg.get_mut(5).unwrap().handlers.on_message = Some(Box::new(move |handle, msg| {
            *calls2.borrow_mut() += 1;
            if let Message::Text(t) = msg {
                handle.send_text(&format!("echo:{t}"));
            }
        }));
        let mut outbox = Vec::new();
        reg.dispatch_message(5, Message::Text("hi".to_string()), &mut outbox)
            .unwrap();
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, 5);
    }

    #[test]
    fn ping_always_auto_pongs() {
        let mut reg = Registry::new();
        reg.register(9, None).unwrap();
        let mut outbox = Vec::new();
        reg.dispatch_ping(9, b"ping-body", &mut outbox);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, 9);
    }

    #[test]
    fn broadcast_skips_excluded_and_non_open_members() {
        let mut reg = Registry::new();
        reg.register(1, None).unwrap();
        reg.register(2, None).unwrap();
        reg.register(3, None).unwrap();
        reg.set_state(3, WsState::Closing);

        let mut outbox = Vec::new();
        let sent = reg.broadcast("hi", Some(1), &mut outbox);

        assert_eq!(sent, 1);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, 2);
    }

    #[test]
    fn send_text_is_a_no_op_for_a_non_open_connection() {
        let mut reg = Registry::new();
        reg.register(4, None).unwrap();
        reg.set_state(4, WsState::Closing);
        let mut outbox = Vec::new();
        reg.send_text(4, "hi", &mut outbox);
        assert!(outbox.is_empty());
    }
}

//! The external handler contract (§6): the one collaborator application
//! code supplies to a [`crate::server::Server`].

use bytes::Bytes;

use crate::error::Error;
use crate::http1::Request;
use crate::streaming::Stream;
use crate::ws::{Handlers as WsHandlers, WsHandle};

/// What a [`Handler`] decides to do with one request.
pub enum Outcome {
    /// A complete, already-known-length response (§4.6's default path).
    Buffered {
        status: u16,
        content_type: String,
        body: Bytes,
        headers: Vec<(String, String)>,
    },
    /// Switch to chunked streaming; `on_stream` receives the [`Stream`]
    /// handle once the reactor is ready to hand it over.
    StreamBegin { on_stream: Box<dyn FnOnce(Stream) + Send> },
    /// Accept a WebSocket upgrade. `on_open` runs once, immediately after
    /// the handshake response is sent and the connection is registered; it
    /// receives the handler table to populate and a [`WsHandle`] for any
    /// immediate send (e.g. a welcome message).
    WebSocketAccept {
        sub_protocol: Option<String>,
        on_open: Box<dyn FnOnce(&mut WsHandlers, &mut WsHandle<'_>) + Send>,
    },
    /// Reject the request outright; the reactor maps this to a response
    /// per the error's `Kind` (§7).
    Fail(Error),
}

/// The application-supplied routing/business-logic collaborator. Invoked
/// once per request, on the reactor thread (§4.8); must not block — any
/// blocking work belongs on the [`crate::future::pool::Pool`].
pub type Handler = Box<dyn Fn(Request) -> Outcome + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn sample_request() -> Request {
        Request {
            method: http::Method::GET,
            path: "/".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
            keep_alive: true,
            fd: 0,
            peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        }
    }

    #[test]
    fn a_buffered_handler_returns_its_body() {
        let handler: Handler = Box::new(|_req| Outcome::Buffered {
            status: 200,
            content_type: "text/plain".to_string(),
            body: Bytes::from_static(b"ok"),
            headers: Vec::new(),
        });
        match handler(sample_request()) {
            Outcome::Buffered { body, .. } => assert_eq!(&body[..], b"ok"),
            _ => panic!("expected buffered outcome"),
        }
    }
}

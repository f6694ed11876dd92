//! Top-level server type: wires a [`Config`], a [`Handler`], and the
//! [`Reactor`](crate::reactor::Reactor) together behind the small surface an
//! embedder actually needs (§4.8, §6).

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::handler::Handler;
use crate::reactor::Reactor;

/// A bound, not-yet-running server. Binding happens eagerly in
/// [`Server::bind`] so `local_addr` is available before the first
/// [`Server::run`]/[`Server::tick`] call, the same way `TcpListener::bind`
/// works in `std`.
pub struct Server {
    reactor: Reactor,
}

impl Server {
    /// Binds the listening socket and builds the reactor, backend, and
    /// Completion Pool described by `config`. `handler` is invoked once per
    /// request, on the reactor thread (§6); it must not block.
    pub fn bind(config: Config, handler: Handler) -> Result<Server> {
        let reactor = Reactor::new(config, handler)?;
        Ok(Server { reactor })
    }

    /// The address actually bound, useful when `config.port` was `0` and
    /// the kernel picked one.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.reactor.listener().local_addr()
    }

    /// Runs forever. See [`Reactor::run`].
    pub fn run(&mut self) -> Result<()> {
        self.reactor.run()
    }

    /// Runs a single reactor iteration, bounded by `timeout`. Exposed for
    /// embedders that want to drive the loop themselves (e.g. alongside
    /// other work on the same thread) and for tests.
    pub fn tick(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reactor.tick(timeout)
    }

    /// The raw listening socket's fd, mostly useful for diagnostics.
    pub fn listener_fd(&self) -> i32 {
        self.reactor.listener().as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;
    use bytes::Bytes;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn echo_handler() -> Handler {
        Box::new(|_req| Outcome::Buffered {
            status: 200,
            content_type: "text/plain".to_string(),
            body: Bytes::from_static(b"hi"),
            headers: Vec::new(),
        })
    }

    #[test]
    fn binds_an_ephemeral_port() {
        let config = Config::new().with_port(0).with_workers(1);
        let server = Server::bind(config, echo_handler()).expect("bind");
        let addr = server.local_addr().expect("local_addr");
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn serves_one_buffered_request() {
        let config = Config::new().with_port(0).with_workers(1);
        let mut server = Server::bind(config, echo_handler()).expect("bind");
        let addr = server.local_addr().expect("local_addr");

        let mut client = TcpStream::connect(addr).expect("connect");
        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();

        for _ in 0..20 {
            server.tick(Some(Duration::from_millis(50))).unwrap();
        }

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("hi"));
    }
}

//! Non-blocking listen/accept/recv/send helpers (§4.2).
//!
//! All operations here are synchronous and never block; the caller (the
//! reactor, via the Connection FSM) only invokes them once the backend has
//! reported the fd as ready. `socket2` supplies the handful of platform
//! socket options (`SO_REUSEADDR`/`SO_REUSEPORT`) that neither `std` nor
//! `mio` expose directly, the same narrowly-scoped role it plays in the
//! teacher's own TCP listener setup.

use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

/// Precomputed `404 Not Found` response, written in one shot by
/// [`send_404`].
pub const NOT_FOUND_RESPONSE: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Creates a non-blocking listening socket bound to `0.0.0.0:port`, with
/// address-reuse (and port-reuse, when `reuse_port` is set) and the given
/// backlog.
pub fn create_listen_socket(port: u16, backlog: i32, reuse_port: bool) -> Result<TcpListener> {
    let addr: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(Error::from)?;
    socket.set_nonblocking(true).map_err(Error::from)?;
    socket.set_reuse_address(true).map_err(Error::from)?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true).map_err(Error::from)?;
    }
    socket.bind(&addr.into()).map_err(Error::from)?;
    socket.listen(backlog).map_err(Error::from)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

/// Accepts one pending connection, if any. Returns `Ok(None)` on
/// `WouldBlock`, which the reactor treats as "accept loop exhausted".
pub fn accept(listener: &TcpListener) -> Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok((stream, addr)) => {
            stream.set_nodelay(true).ok();
            Ok(Some((stream, addr)))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}

/// Reads whatever is currently available into `buf`, starting at `buf[len
/// ..]`, returning the number of bytes appended. `Ok(0)` with a non-full
/// buffer signals the peer half-closed the connection.
pub fn recv_into(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<usize> {
    let mut chunk = [0u8; 16 * 1024];
    let mut total = 0;
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => {
                if total == 0 {
                    return Err(Error::peer_closed());
                }
                break;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                total += n;
                if n < chunk.len() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from(e)),
        }
    }
    Ok(total)
}

/// Writes `bufs` in one vectored write, returning the number of bytes
/// actually written (which may be less than the total if the socket would
/// otherwise block; the caller is responsible for resuming on the next
/// write-ready event).
pub fn send_vectored(stream: &mut TcpStream, bufs: &[&[u8]]) -> Result<usize> {
    let slices: Vec<IoSlice<'_>> = bufs.iter().map(|b| IoSlice::new(b)).collect();
    match stream.write_vectored(&slices) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(Error::from(e)),
    }
}

/// Writes a minimal buffered response: status line + headers + body, in a
/// single vectored write.
pub fn send(stream: &mut TcpStream, status_line_and_headers: &[u8], body: &[u8]) -> Result<usize> {
    send_vectored(stream, &[status_line_and_headers, body])
}

/// Writes the precomputed 404 response.
pub fn send_404(stream: &mut TcpStream) -> Result<usize> {
    send_vectored(stream, &[NOT_FOUND_RESPONSE])
}

//! Platform-neutral readiness-notification abstraction (§4.1).
//!
//! The reactor never calls platform primitives directly; it only ever
//! talks to a `Box<dyn Backend>`. Two concrete backends are provided:
//! [`mio_backend::MioBackend`], which wraps the `mio` crate (itself already
//! an epoll/kqueue/IOCP-with-synthesized-readiness abstraction, the same way
//! the teacher wraps `h2` for HTTP/2 and `socket2` for platform socket
//! options), and [`poll_backend::PollBackend`], which wraps the smaller
//! `polling` crate for the POSIX-poll/fd_set-style fallback path.

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};

#[cfg(unix)]
pub mod mio_backend;
pub mod poll_backend;

/// Which concrete [`Backend`] a [`crate::Config`] selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Let the platform decide: `mio`'s epoll/kqueue/event-ports backend.
    Auto,
    /// Linux `epoll`, via `mio`.
    Epoll,
    /// BSD/macOS `kqueue`, via `mio`.
    Kqueue,
    /// illumos/Solaris event ports, via `mio`.
    EventPorts,
    /// Windows I/O completion ports, via `polling`'s synthesized-readiness
    /// layer.
    Iocp,
    /// POSIX `poll(2)`, via `polling`.
    Poll,
    /// `select(2)`, via `polling`.
    Select,
}

/// A fd-or-slot union, preserved byte-for-byte as the producer chose it.
///
/// Classic readiness events (accept/read/write on a connection fd) use
/// [`Token::for_fd`]; the async-request path (a Completion Pool notify fd
/// standing in for many logical slots) uses [`Token::for_slot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    /// A registered file descriptor.
    Fd(RawFd),
    /// An opaque slot id, chosen by the producer (e.g. a pool index).
    Slot(u32),
}

impl Token {
    /// Wraps a fd as a readiness token.
    pub fn for_fd(fd: RawFd) -> Token {
        Token::Fd(fd)
    }

    /// Wraps a small integer slot as a readiness token.
    pub fn for_slot(slot: u32) -> Token {
        Token::Slot(slot)
    }

    /// Packs this token into the single `usize` key that `mio`/`polling`
    /// require, tagging the high bit to keep the two spaces disjoint.
    fn pack(self) -> usize {
        const TAG: usize = 1 << (usize::BITS - 1);
        match self {
            Token::Fd(fd) => (fd as usize) & !TAG,
            Token::Slot(slot) => (slot as usize) | TAG,
        }
    }

    fn unpack(key: usize) -> Token {
        const TAG: usize = 1 << (usize::BITS - 1);
        if key & TAG != 0 {
            Token::Slot((key & !TAG) as u32)
        } else {
            Token::Fd(key as RawFd)
        }
    }
}

/// What a caller wants to be notified about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };

    pub fn both() -> Interest {
        Interest {
            readable: true,
            writable: true,
        }
    }
}

/// A single readiness notification returned from [`Backend::wait`].
#[derive(Clone, Copy, Debug)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// The per-platform readiness-notification interface (§4.1).
///
/// Implementations encode one of: edge-triggered (Linux epoll, BSD kqueue),
/// one-shot (Solaris event ports), level-triggered (poll/select), or
/// completion-based (Windows IOCP, which must present a readiness-equivalent
/// interface here).
pub trait Backend: Send {
    /// Registers `fd` for the given interest under `token`.
    ///
    /// Add failures for a single fd degrade that fd only (§4.1) — callers
    /// should drop the connection, not the reactor.
    fn add(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()>;

    /// Removes `fd` from the watch set. A fd that was never added is not an
    /// error.
    fn del(&mut self, fd: RawFd) -> Result<()>;

    /// Re-arms `fd` for one-shot backends; a no-op on edge/level-triggered
    /// ones.
    fn rearm(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()>;

    /// Blocks for at most `timeout` (or indefinitely if `None`) and appends
    /// ready events to `out`. Returns the number appended.
    ///
    /// Transient "interrupted" or "timeout" errors are retried internally
    /// and never surface to the caller; other errors are fatal (§4.1).
    fn wait(&mut self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> Result<usize>;
}

/// Constructs the backend named by `kind`.
pub fn create(kind: BackendKind) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Auto | BackendKind::Epoll | BackendKind::Kqueue | BackendKind::EventPorts => {
            #[cfg(unix)]
            {
                Ok(Box::new(mio_backend::MioBackend::create()?))
            }
            #[cfg(not(unix))]
            {
                Err(Error::backend_fatal(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "mio backend is only available on unix targets; select Iocp/Poll/Select",
                )))
            }
        }
        BackendKind::Iocp | BackendKind::Poll | BackendKind::Select => {
            Ok(Box::new(poll_backend::PollBackend::create()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        for fd in [0i32, 3, 1023] {
            assert_eq!(Token::unpack(Token::for_fd(fd).pack()), Token::Fd(fd));
        }
        for slot in [0u32, 7, 65535] {
            assert_eq!(Token::unpack(Token::for_slot(slot).pack()), Token::Slot(slot));
        }
    }
}

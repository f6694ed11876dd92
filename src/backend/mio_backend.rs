//! [`Backend`] implementation wrapping the `mio` crate.
//!
//! `mio::Poll` already is the platform-neutral readiness abstraction
//! spec.md §4.1 asks for: epoll on Linux, kqueue on BSD/macOS, event ports
//! on illumos/Solaris. We register raw fds via `mio::unix::SourceFd`, the
//! standard way to hand `mio` a fd it doesn't own (it normally expects to
//! own typed `TcpStream`/`TcpListener` wrappers).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest as MioInterest, Poll, Token as MioToken};

use super::{Backend, Interest, ReadyEvent, Token};
use crate::error::{Error, Result};

pub struct MioBackend {
    poll: Poll,
    events: Events,
}

impl MioBackend {
    pub fn create() -> Result<MioBackend> {
        let poll = Poll::new().map_err(Error::backend_fatal)?;
        Ok(MioBackend {
            poll,
            events: Events::with_capacity(1024),
        })
    }
}

fn to_mio_interest(interest: Interest) -> MioInterest {
    match (interest.readable, interest.writable) {
        (true, true) => MioInterest::READABLE | MioInterest::WRITABLE,
        (true, false) => MioInterest::READABLE,
        (false, true) => MioInterest::WRITABLE,
        (false, false) => MioInterest::READABLE,
    }
}

impl Backend for MioBackend {
    fn add(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), MioToken(token.pack()), to_mio_interest(interest))
            .map_err(Error::from)
    }

    fn del(&mut self, fd: RawFd) -> Result<()> {
        match self.poll.registry().deregister(&mut SourceFd(&fd)) {
            Ok(()) => Ok(()),
            // Deregistering a fd that's already gone is not an error for us;
            // the connection is being torn down either way.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn rearm(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), MioToken(token.pack()), to_mio_interest(interest))
            .map_err(Error::from)
    }

    fn wait(&mut self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> Result<usize> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(0),
                Err(e) => return Err(Error::backend_fatal(e)),
            }
        }
        let mut n = 0;
        for ev in self.events.iter() {
            out.push(ReadyEvent {
                token: Token::unpack(ev.token().0),
                readable: ev.is_readable(),
                writable: ev.is_writable(),
            });
            n += 1;
        }
        Ok(n)
    }
}

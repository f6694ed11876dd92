//! [`Backend`] implementation wrapping the `polling` crate.
//!
//! `polling` is a smaller, independently-maintained readiness crate (kept
//! alongside `mio` the way the teacher keeps `h2` and `socket2` as separate
//! narrowly-scoped dependencies rather than reaching for one do-everything
//! library). On Windows its `Poller` posts a zero-byte read internally to
//! synthesize readability on top of IOCP, exactly the completion-to-
//! readiness translation spec.md §4.1 calls for; on POSIX targets it falls
//! back to `poll(2)`.

use std::os::unix::io::{BorrowedFd, RawFd};
use std::time::Duration;

use polling::{Event, Events, Poller};

use super::{Backend, Interest, ReadyEvent, Token};
use crate::error::{Error, Result};

pub struct PollBackend {
    poller: Poller,
    events: Events,
}

impl PollBackend {
    pub fn create() -> Result<PollBackend> {
        let poller = Poller::new().map_err(Error::backend_fatal)?;
        Ok(PollBackend {
            poller,
            events: Events::new(),
        })
    }
}

fn to_event(token: Token, interest: Interest) -> Event {
    let key = token.pack();
    match (interest.readable, interest.writable) {
        (true, true) => Event::all(key),
        (true, false) => Event::readable(key),
        (false, true) => Event::writable(key),
        (false, false) => Event::none(key),
    }
}

impl Backend for PollBackend {
    fn add(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        // Safety: the caller (the reactor) guarantees `fd` stays open and
        // registered with this backend until a matching `del`.
        unsafe {
            let borrowed = BorrowedFd::borrow_raw(fd);
            self.poller
                .add(borrowed, to_event(token, interest))
                .map_err(Error::from)
        }
    }

    fn del(&mut self, fd: RawFd) -> Result<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        match self.poller.delete(borrowed) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn rearm(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.poller
            .modify(borrowed, to_event(token, interest))
            .map_err(Error::from)
    }

    fn wait(&mut self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> Result<usize> {
        self.events.clear();
        loop {
            match self.poller.wait(&mut self.events, timeout) {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::backend_fatal(e)),
            }
        }
        let mut n = 0;
        for ev in self.events.iter() {
            out.push(ReadyEvent {
                token: Token::unpack(ev.key),
                readable: ev.readable,
                writable: ev.writable,
            });
            n += 1;
        }
        Ok(n)
    }
}

//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type often returned from methods that can have hypersonic `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while running the reactor, parsing
/// HTTP/1, framing WebSocket messages, or resolving a future.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// The class of an [`Error`], per §7 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Malformed request line or headers. Response: 400, close.
    ParseError,
    /// Header block or body exceeded a configured cap. Response: 413, close.
    RequestTooLarge,
    /// The handler callback raised. Response: 500 if not yet streaming,
    /// otherwise the stream is aborted and the fd closed.
    HandlerFailure,
    /// A WebSocket peer sent a bad opcode, reserved bits, an oversized
    /// control frame, or an unmasked frame. Close frame 1002, close fd.
    ProtocolViolation,
    /// The peer closed the connection without incident.
    PeerClosed,
    /// The peer reset the connection (ECONNRESET/EPIPE).
    ResetByPeer,
    /// The accept loop could not make progress; the process should exit
    /// so an orchestrator can restart it.
    BackendFatal,
    /// A pool's submission queue is full.
    PoolSubmissionFull,
    /// A lower-level I/O error not covered by the above.
    Io,
    /// A `Config` value failed validation.
    Config,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(kind: Kind, cause: C) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: Some(cause.into()),
            }),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// True if this error should be treated as `RequestTooLarge`.
    pub fn is_request_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::RequestTooLarge)
    }

    /// True if this error is a parse failure.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::ParseError)
    }

    /// True if this error means the connection is already gone and should
    /// be closed silently, with no response written.
    pub fn is_silent_close(&self) -> bool {
        matches!(self.inner.kind, Kind::PeerClosed | Kind::ResetByPeer)
    }

    pub(crate) fn parse<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::ParseError, cause)
    }

    pub(crate) fn too_large() -> Error {
        Error::new(Kind::RequestTooLarge)
    }

    pub(crate) fn protocol_violation<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::ProtocolViolation, cause)
    }

    pub(crate) fn peer_closed() -> Error {
        Error::new(Kind::PeerClosed)
    }

    pub(crate) fn reset_by_peer() -> Error {
        Error::new(Kind::ResetByPeer)
    }

    pub(crate) fn backend_fatal<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::BackendFatal, cause)
    }

    pub(crate) fn pool_full() -> Error {
        Error::new(Kind::PoolSubmissionFull)
    }

    pub(crate) fn handler_failure<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::HandlerFailure, cause)
    }

    /// Converts a caught worker-thread panic payload into the `internal`
    /// failure category a submitted thunk's [`Future`](crate::future::Future)
    /// resolves with (§9: exception-style control flow is redesigned into a
    /// typed failure at the worker boundary, not an unwind across threads).
    pub(crate) fn from_worker_panic(payload: &(dyn std::any::Any + Send)) -> Error {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker thread panicked".to_string()
        };
        Error::with(Kind::HandlerFailure, message)
    }

    pub(crate) fn config<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::Config, cause)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
                Error::with(Kind::ResetByPeer, err)
            }
            io::ErrorKind::UnexpectedEof => Error::with(Kind::PeerClosed, err),
            _ => Error::with(Kind::Io, err),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("hypersonic::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::ParseError => f.write_str("malformed request")?,
            Kind::RequestTooLarge => f.write_str("request exceeded configured size cap")?,
            Kind::HandlerFailure => f.write_str("handler callback failed")?,
            Kind::ProtocolViolation => f.write_str("websocket protocol violation")?,
            Kind::PeerClosed => f.write_str("connection closed by peer")?,
            Kind::ResetByPeer => f.write_str("connection reset by peer")?,
            Kind::BackendFatal => f.write_str("event backend could not make progress")?,
            Kind::PoolSubmissionFull => f.write_str("pool submission queue is full")?,
            Kind::Io => f.write_str("i/o error")?,
            Kind::Config => f.write_str("invalid configuration")?,
        }
        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_ref().map(|c| &**c as _)
    }
}

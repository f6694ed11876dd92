#![deny(rust_2018_idioms)]

//! # hypersonic
//!
//! hypersonic is a high-throughput HTTP/1.1 server with optional HTTP/2 and
//! WebSocket upgrade, built around a single-threaded, readiness-based event
//! reactor.
//!
//! ## Architecture
//!
//! The core is an [`event-driven reactor`](reactor) that owns the listening
//! socket and dispatches readiness events to per-connection state machines
//! (`conn`). Each connection speaks [`HTTP/1.1`](http1) by default, may
//! upgrade to a [`WebSocket`](ws) per RFC 6455, may stream a
//! [chunked response](streaming) (with an [SSE](sse) formatter layered on
//! top), and, when the `http2` feature is enabled, may bridge to an
//! [HTTP/2 session](h2_adapter) instead. Blocking work is offloaded to a
//! [`Pool`](future::pool::Pool) of worker threads, which resolve
//! [`Future`](future::Future) handles and notify the reactor through a
//! self-pipe.
//!
//! The event backend itself (`backend`) is pluggable: a `mio`-backed
//! implementation covers epoll/kqueue/event-ports, and a `polling`-backed
//! implementation covers the poll/select/IOCP-synthesized-readiness path.
//! The reactor never touches a platform primitive directly — only the
//! `Backend` trait.
//!
//! ## Usage
//!
//! Construct a [`Config`], supply a [`Handler`](handler::Handler) that
//! decides how to answer each [`Request`](http1::Request), and hand both to
//! [`Server::bind`](server::Server::bind). Routing, path matching, and
//! configuration *loading* are left to the embedder — hypersonic only
//! specifies the callback contract in `handler`.
//!
//! ## Optional Features
//!
//! - `http1` (default): the HTTP/1.1 protocol engine.
//! - `http2`: bridges upgraded connections whose preface negotiates HTTP/2
//!   onto the `h2` crate.

pub use crate::error::{Error, Kind as ErrorKind, Result};

#[macro_use]
mod cfg;

pub mod backend;
pub mod conn;
pub mod config;
mod error;
pub mod future;
pub mod handler;
pub mod http1;
mod reactor;
pub mod server;
pub mod socket;
pub mod sse;
pub mod streaming;
pub mod ws;

cfg_http2! {
    pub mod h2_adapter;
}

pub use crate::config::Config;
pub use crate::handler::{Handler, Outcome};
pub use crate::server::Server;

//! Server configuration.
//!
//! Loading configuration from a file or environment is out of scope (see
//! `SPEC_FULL.md` §1); `Config` is built programmatically or through its
//! `with_*` builder methods, the same way a `hyper` server is configured by
//! its embedder rather than by the library itself.

use std::time::Duration;

use crate::backend::BackendKind;

/// Default per-fd receive buffer size (§5): 64 KiB.
pub const DEFAULT_READ_BUFFER_SIZE: u32 = 64 * 1024;
/// Default cap on a chunked-decode scratch buffer (§5, §4.5): 1 MiB.
pub const DEFAULT_MAX_CHUNKED_BODY: u32 = 1024 * 1024;
/// Default cap on a reassembling WebSocket fragment buffer (§5): 16 MiB.
pub const DEFAULT_MAX_WS_ASSEMBLY: u32 = 16 * 1024 * 1024;
/// Default max header block size (§6): 16 KiB.
pub const DEFAULT_MAX_HEADER_SIZE: u32 = 16 * 1024;
/// Default connection cap (§6): 65536, matching the WebSocket registry's
/// fixed capacity (§5).
pub const DEFAULT_MAX_CONNECTIONS: u32 = 65536;
/// Default keep-alive idle timeout (§6): 60 seconds.
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u32 = 60_000;
/// Default cap on a pool's submission queue before `submit` fails with
/// `PoolSubmissionFull` (§4.9, ambient — spec.md leaves this unbounded in
/// principle but §7 names the error kind, which implies a concrete cap).
pub const DEFAULT_POOL_QUEUE_CAPACITY: u32 = 4096;

/// Server configuration, covering every option named in spec.md §6 plus
/// the ambient knobs (`read_buffer_size`, `listen_backlog`, `reuse_port`)
/// a deployment needs that the distillation left implicit.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) port: u16,
    pub(crate) workers: u32,
    pub(crate) max_connections: u32,
    pub(crate) max_header_size: u32,
    pub(crate) max_chunked_body: u32,
    pub(crate) max_ws_assembly: u32,
    pub(crate) keepalive_timeout_ms: u32,
    pub(crate) backend: BackendKind,
    pub(crate) read_buffer_size: u32,
    pub(crate) listen_backlog: i32,
    pub(crate) reuse_port: bool,
    pub(crate) pool_queue_capacity: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 0,
            workers: num_cpus::get() as u32,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_chunked_body: DEFAULT_MAX_CHUNKED_BODY,
            max_ws_assembly: DEFAULT_MAX_WS_ASSEMBLY,
            keepalive_timeout_ms: DEFAULT_KEEPALIVE_TIMEOUT_MS,
            backend: BackendKind::Auto,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            listen_backlog: 1024,
            reuse_port: false,
            pool_queue_capacity: DEFAULT_POOL_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Starts from the defaults documented in spec.md §6.
    pub fn new() -> Config {
        Config::default()
    }

    /// Sets the listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the number of Completion Pool worker threads.
    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Caps the number of simultaneously registered connections.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Caps the size of a request's header block.
    pub fn with_max_header_size(mut self, max: u32) -> Self {
        self.max_header_size = max;
        self
    }

    /// Caps the chunked-decode scratch buffer per decode.
    pub fn with_max_chunked_body(mut self, max: u32) -> Self {
        self.max_chunked_body = max;
        self
    }

    /// Caps the growable WebSocket fragment-reassembly buffer.
    pub fn with_max_ws_assembly(mut self, max: u32) -> Self {
        self.max_ws_assembly = max;
        self
    }

    /// Sets the keep-alive idle timeout, in milliseconds.
    pub fn with_keepalive_timeout_ms(mut self, ms: u32) -> Self {
        self.keepalive_timeout_ms = ms;
        self
    }

    /// Selects the event backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the per-fd receive buffer size.
    pub fn with_read_buffer_size(mut self, size: u32) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the listen backlog; the platform default is `SOMAXCONN`-like
    /// (we use 1024, matching common production defaults) unless overridden.
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Enables `SO_REUSEPORT`-style horizontal scaling across processes
    /// bound to the same port (§5).
    pub fn with_reuse_port(mut self, reuse: bool) -> Self {
        self.reuse_port = reuse;
        self
    }

    /// Caps the number of queued-but-not-yet-running work items per
    /// [`crate::future::pool::Pool`] before `submit` fails with
    /// `PoolSubmissionFull` (§7).
    pub fn with_pool_queue_capacity(mut self, capacity: u32) -> Self {
        self.pool_queue_capacity = capacity;
        self
    }

    pub(crate) fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::new();
        assert_eq!(cfg.max_connections, 65536);
        assert_eq!(cfg.max_header_size, 16 * 1024);
        assert_eq!(cfg.max_chunked_body, 1024 * 1024);
        assert_eq!(cfg.max_ws_assembly, 16 * 1024 * 1024);
        assert_eq!(cfg.keepalive_timeout_ms, 60_000);
        assert_eq!(cfg.read_buffer_size, 64 * 1024);
    }

    #[test]
    fn builder_overrides_stick() {
        let cfg = Config::new().with_port(9000).with_workers(0);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.workers, 1, "workers is clamped to at least 1");
    }
}

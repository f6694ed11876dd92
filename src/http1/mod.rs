//! HTTP/1 request parsing, response building, and chunked transfer (§4.5).

pub mod decode;
pub mod encode;
pub mod parse;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use bytes::Bytes;
use http::Method;

pub use decode::{ChunkDecodeOutcome, ChunkedDecoder};
pub use parse::{parse_request, ParseOutcome};

/// A parsed HTTP/1 request, handed to the routing collaborator (§6).
///
/// Header names are normalized per §4.5: lowercased, with `-` replaced by
/// `_` (so `Content-Type` is looked up as `content_type`).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub keep_alive: bool,
    pub fd: RawFd,
    pub peer: SocketAddr,
}

impl Request {
    /// Looks up a normalized header name (already lowercased/underscored).
    pub fn header(&self, normalized_name: &str) -> Option<&str> {
        self.headers.get(normalized_name).map(|s| s.as_str())
    }
}

/// Normalizes a raw header name per §4.5: lowercase, `-` → `_`.
pub fn normalize_header_name(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'-' => b'_',
            _ => b.to_ascii_lowercase(),
        })
        .map(|b| b as char)
        .collect()
}

/// Reason phrases for the fixed table in §4.5; unknown codes use "OK".
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        505 => "HTTP Version Not Supported",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_header_names() {
        assert_eq!(normalize_header_name("Content-Type"), "content_type");
        assert_eq!(normalize_header_name("Sec-WebSocket-Key"), "sec_websocket_key");
        assert_eq!(normalize_header_name("HOST"), "host");
    }

    #[test]
    fn reason_table_matches_spec() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(999), "OK");
    }
}

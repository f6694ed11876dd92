//! Request-line and header parsing (§4.5), layered on `httparse` the same
//! way the teacher's own `h1` decoder does: `httparse` walks the buffer
//! once and reports `Partial` (incomplete) or `Complete(offset)`, matching
//! spec.md's "never partially consume" requirement for free.

use std::collections::HashMap;

use http::Method;

use super::normalize_header_name;
use crate::error::{Error, Result};

/// Maximum header count passed to `httparse`; matches the teacher's own
/// `h1::parse` constant.
const MAX_HEADERS: usize = 100;

/// Everything extracted from a request line + header block, before the
/// body (whose length/framing is resolved separately via
/// [`crate::http1::decode`]).
#[derive(Debug, Clone)]
pub struct ParsedHead {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub keep_alive: bool,
    pub content_length: Option<u64>,
    pub chunked: bool,
    /// Byte offset in the input buffer where the body begins.
    pub head_len: usize,
}

/// Outcome of attempting to parse a request head from a buffer that may
/// not yet contain a complete request.
pub enum ParseOutcome {
    /// Fewer bytes than a full request line + headers are present.
    Incomplete,
    /// A full head was parsed, ending at `ParsedHead::head_len`.
    Complete(ParsedHead),
}

/// Parses a request head out of `buf`. Returns `Incomplete` rather than
/// erroring when the header block hasn't finished arriving, unless `buf`
/// already exceeds `max_header_size`, which is reported as
/// [`Error::too_large`].
pub fn parse_request(buf: &[u8], max_header_size: usize) -> Result<ParseOutcome> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => {
            let method = req
                .method
                .ok_or_else(|| Error::parse("missing method"))?
                .parse::<Method>()
                .map_err(Error::parse)?;

            let target = req.path.ok_or_else(|| Error::parse("missing request-target"))?;
            let path = truncate_path(target);

            let version = req.version.ok_or_else(|| Error::parse("missing version"))?;
            let is_http11 = version == 1;

            let mut headers = HashMap::with_capacity(req.headers.len());
            for h in req.headers.iter() {
                let name = normalize_header_name(h.name);
                let value = String::from_utf8_lossy(h.value).into_owned();
                headers.insert(name, value);
            }

            let content_length = match headers.get("content_length") {
                Some(v) => Some(v.trim().parse::<u64>().map_err(Error::parse)?),
                None => None,
            };

            let chunked = headers
                .get("transfer_encoding")
                .map(|v| v.to_ascii_lowercase().contains("chunked"))
                .unwrap_or(false);

            let keep_alive = match headers.get("connection") {
                Some(v) => {
                    let lower = v.to_ascii_lowercase();
                    if lower.contains("close") {
                        false
                    } else if lower.contains("keep-alive") {
                        true
                    } else {
                        is_http11
                    }
                }
                None => is_http11,
            };

            Ok(ParseOutcome::Complete(ParsedHead {
                method,
                path,
                headers,
                keep_alive,
                content_length,
                chunked,
                head_len,
            }))
        }
        Ok(httparse::Status::Partial) => {
            if buf.len() > max_header_size {
                Err(Error::too_large())
            } else {
                Ok(ParseOutcome::Incomplete)
            }
        }
        Err(e) => Err(Error::parse(e)),
    }
}

/// Truncates a request-target at the first of space, `?`, or CR, per
/// §4.5 — the quick parser keeps only the path component.
fn truncate_path(target: &str) -> String {
    let end = target
        .find(|c: char| c == '?' || c == ' ' || c == '\r')
        .unwrap_or(target.len());
    target[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let buf = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        match parse_request(buf, 16 * 1024).unwrap() {
            ParseOutcome::Complete(head) => {
                assert_eq!(head.method, Method::GET);
                assert_eq!(head.path, "/hello");
                assert!(head.keep_alive);
                assert_eq!(head.head_len, buf.len());
            }
            ParseOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn truncates_path_at_query_string() {
        let buf = b"GET /hello?x=1 HTTP/1.1\r\nHost: x\r\n\r\n";
        match parse_request(buf, 16 * 1024).unwrap() {
            ParseOutcome::Complete(head) => assert_eq!(head.path, "/hello"),
            ParseOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn connection_close_disables_keep_alive() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
        match parse_request(buf, 16 * 1024).unwrap() {
            ParseOutcome::Complete(head) => assert!(!head.keep_alive),
            ParseOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn incomplete_head_waits_for_more_bytes() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n";
        assert!(matches!(
            parse_request(buf, 16 * 1024).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn oversized_incomplete_head_is_rejected() {
        let buf = vec![b'a'; 100];
        let err = parse_request(&buf, 10).unwrap_err();
        assert!(err.is_request_too_large());
    }

    #[test]
    fn normalized_headers_are_queryable() {
        let buf = b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\n";
        match parse_request(buf, 16 * 1024).unwrap() {
            ParseOutcome::Complete(head) => {
                assert_eq!(head.content_length, Some(5));
                assert_eq!(head.headers.get("content_length").unwrap(), "5");
            }
            ParseOutcome::Incomplete => panic!("expected complete"),
        }
    }
}

//! Response building and chunk framing (§4.5, §4.6).

use bytes::{BufMut, BytesMut};

use super::reason_phrase;

/// The terminating chunk of a chunked body; always exactly these 5 bytes
/// (§8 round-trip law).
pub const FINAL_CHUNK: &[u8] = b"0\r\n\r\n";

/// Encodes `n` as lowercase hex with no leading zeroes (chunk-size format,
/// §8 boundary behavior: 15→"f", 16→"10", 255→"ff", 256→"100").
pub fn hex_chunk_size(n: usize) -> String {
    format!("{:x}", n)
}

/// Wraps `payload` as one chunk: `<hex-size>\r\n<payload>\r\n`.
pub fn encode_chunk(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(payload.len() + 16);
    buf.put_slice(hex_chunk_size(payload.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");
    buf
}

/// Builds a status line: `HTTP/1.1 <code> <reason>\r\n`.
pub fn status_line(status: u16) -> String {
    format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status))
}

/// Builds a full header block (status line + headers + blank line) for a
/// buffered response with a known `Content-Length`.
pub fn buffered_head(status: u16, content_type: &str, content_length: usize, keep_alive: bool) -> Vec<u8> {
    let mut head = String::with_capacity(128);
    head.push_str(&status_line(status));
    head.push_str("Content-Type: ");
    head.push_str(content_type);
    head.push_str("\r\n");
    head.push_str("Content-Length: ");
    head.push_str(&content_length.to_string());
    head.push_str("\r\n");
    head.push_str(connection_header(keep_alive));
    head.push_str("\r\n");
    head.into_bytes()
}

/// The `Connection: keep-alive\r\n` or `Connection: close\r\n` line.
pub fn connection_header(keep_alive: bool) -> &'static str {
    if keep_alive {
        "Connection: keep-alive\r\n"
    } else {
        "Connection: close\r\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_chunk_size_boundaries() {
        assert_eq!(hex_chunk_size(15), "f");
        assert_eq!(hex_chunk_size(16), "10");
        assert_eq!(hex_chunk_size(255), "ff");
        assert_eq!(hex_chunk_size(256), "100");
    }

    #[test]
    fn final_chunk_is_exactly_five_bytes() {
        assert_eq!(FINAL_CHUNK, b"0\r\n\r\n");
        assert_eq!(FINAL_CHUNK.len(), 5);
    }

    #[test]
    fn encode_chunk_round_trips_through_the_decoder() {
        use crate::http1::decode::{ChunkDecodeOutcome, ChunkedDecoder};

        let chunk = encode_chunk(b"hello");
        let mut all = BytesMut::new();
        all.extend_from_slice(&chunk);
        all.extend_from_slice(FINAL_CHUNK);

        let mut dec = ChunkedDecoder::new(1024);
        match dec.decode(&all).unwrap() {
            ChunkDecodeOutcome::Complete { body, .. } => assert_eq!(&body[..], b"hello"),
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn status_line_uses_fixed_reason_table() {
        assert_eq!(status_line(200), "HTTP/1.1 200 OK\r\n");
        assert_eq!(status_line(404), "HTTP/1.1 404 Not Found\r\n");
    }
}

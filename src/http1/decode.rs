//! Chunked transfer decoding (§4.5), for incoming request bodies.
//!
//! Operates over an in-memory buffer rather than a `Read` stream — the
//! reactor already drained whatever was available off the socket (§4.2)
//! before handing bytes here — but the state machine shape (a resumable
//! `ChunkedState`) mirrors the teacher's own `proto/h1/decode.rs`.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndLf,
    End,
}

/// A resumable chunked-body decoder. Feed it bytes as they arrive; it
/// accumulates the decoded payload internally and reports completion once
/// the terminating zero-length chunk (and any trailers) has been consumed.
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    chunk_remaining: u64,
    decoded: BytesMut,
    cap: usize,
}

/// What happened on a call to [`ChunkedDecoder::decode`].
pub enum ChunkDecodeOutcome {
    /// More bytes are needed; `consumed` of the input was processed.
    Incomplete { consumed: usize },
    /// The body is fully decoded; `consumed` of the input was processed
    /// (which may be less than the whole buffer, if trailing bytes belong
    /// to a pipelined next request).
    Complete { consumed: usize, body: Bytes },
}

impl ChunkedDecoder {
    /// `cap` is the maximum total decoded size (default 1 MiB, §4.5/§5).
    pub fn new(cap: usize) -> ChunkedDecoder {
        ChunkedDecoder {
            state: ChunkedState::Size,
            chunk_remaining: 0,
            decoded: BytesMut::new(),
            cap,
        }
    }

    /// Feeds `buf` into the decoder, consuming as much as forms complete
    /// chunk framing.
    pub fn decode(&mut self, buf: &[u8]) -> Result<ChunkDecodeOutcome> {
        let mut i = 0;
        loop {
            match self.state {
                ChunkedState::Size => {
                    let Some(&b) = buf.get(i) else { break };
                    match (b as char).to_digit(16) {
                        Some(d) => {
                            self.chunk_remaining = self
                                .chunk_remaining
                                .checked_mul(16)
                                .and_then(|v| v.checked_add(d as u64))
                                .ok_or_else(|| Error::parse("chunk size overflow"))?;
                            i += 1;
                        }
                        None => self.state = ChunkedState::SizeLws,
                    }
                }
                ChunkedState::SizeLws => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    match b {
                        b'\r' => self.state = ChunkedState::SizeLf,
                        b';' => self.state = ChunkedState::Extension,
                        _ => return Err(Error::parse("invalid chunk size terminator")),
                    }
                }
                ChunkedState::Extension => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    if b == b'\r' {
                        self.state = ChunkedState::SizeLf;
                    }
                }
                ChunkedState::SizeLf => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    if b != b'\n' {
                        return Err(Error::parse("expected LF after chunk size"));
                    }
                    self.state = if self.chunk_remaining == 0 {
                        ChunkedState::Trailer
                    } else {
                        ChunkedState::Body
                    };
                }
                ChunkedState::Body => {
                    let available = buf.len() - i;
                    if available == 0 {
                        break;
                    }
                    let take = available.min(self.chunk_remaining as usize);
                    if self.decoded.len() + take > self.cap {
                        return Err(Error::too_large());
                    }
                    self.decoded.extend_from_slice(&buf[i..i + take]);
                    i += take;
                    self.chunk_remaining -= take as u64;
                    if self.chunk_remaining == 0 {
                        self.state = ChunkedState::BodyCr;
                    }
                }
                ChunkedState::BodyCr => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    if b != b'\r' {
                        return Err(Error::parse("expected CR after chunk body"));
                    }
                    self.state = ChunkedState::BodyLf;
                }
                ChunkedState::BodyLf => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    if b != b'\n' {
                        return Err(Error::parse("expected LF after chunk body"));
                    }
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailer => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    self.state = if b == b'\r' {
                        ChunkedState::EndLf
                    } else {
                        ChunkedState::TrailerLf
                    };
                }
                ChunkedState::TrailerLf => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    if b == b'\n' {
                        self.state = ChunkedState::Trailer;
                    }
                }
                ChunkedState::EndLf => {
                    let Some(&b) = buf.get(i) else { break };
                    i += 1;
                    if b != b'\n' {
                        return Err(Error::parse("expected LF ending trailers"));
                    }
                    self.state = ChunkedState::End;
                }
                ChunkedState::End => {
                    return Ok(ChunkDecodeOutcome::Complete {
                        consumed: i,
                        body: self.decoded.clone().freeze(),
                    });
                }
            }
        }
        if self.state == ChunkedState::End {
            return Ok(ChunkDecodeOutcome::Complete {
                consumed: i,
                body: self.decoded.clone().freeze(),
            });
        }
        Ok(ChunkDecodeOutcome::Incomplete { consumed: i })
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkedState::End
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_multiple_chunks() {
        let mut dec = ChunkedDecoder::new(1024);
        let input = b"6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n";
        match dec.decode(input).unwrap() {
            ChunkDecodeOutcome::Complete { body, consumed } => {
                assert_eq!(&body[..], b"hello world");
                assert_eq!(consumed, input.len());
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn incomplete_chunk_reports_partial_consumption() {
        let mut dec = ChunkedDecoder::new(1024);
        let input = b"6\r\nhel";
        match dec.decode(input).unwrap() {
            ChunkDecodeOutcome::Incomplete { consumed } => assert_eq!(consumed, input.len()),
            _ => panic!("expected incomplete"),
        }
    }

    #[test]
    fn resuming_across_calls_reassembles_correctly() {
        let mut dec = ChunkedDecoder::new(1024);
        assert!(matches!(
            dec.decode(b"6\r\nhel").unwrap(),
            ChunkDecodeOutcome::Incomplete { .. }
        ));
        match dec.decode(b"lo!\r\n0\r\n\r\n").unwrap() {
            ChunkDecodeOutcome::Complete { body, .. } => assert_eq!(&body[..], b"hello!"),
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn rejects_body_over_cap() {
        let mut dec = ChunkedDecoder::new(4);
        let input = b"5\r\nhello\r\n0\r\n\r\n";
        let err = dec.decode(input).unwrap_err();
        assert!(err.is_request_too_large());
    }

    #[test]
    fn skips_trailers() {
        let mut dec = ChunkedDecoder::new(1024);
        let input = b"3\r\nabc\r\n0\r\nX-Trailer: yes\r\n\r\n";
        match dec.decode(input).unwrap() {
            ChunkDecodeOutcome::Complete { body, consumed } => {
                assert_eq!(&body[..], b"abc");
                assert_eq!(consumed, input.len());
            }
            _ => panic!("expected complete"),
        }
    }
}

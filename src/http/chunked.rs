//! Streaming `Transfer-Encoding: chunked` decoder: pulled out of an
//! inline chunk state machine into a self-contained decoder that any
//! byte source can feed.

use std::collections::HashMap;
use std::fmt;

use crate::http::parser::find_crlf;

const MAX_CHUNK_HEADER_SEARCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCrlf,
    ReadTrailers,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkedError {
    InvalidChunkSize,
    PayloadTooLarge,
    MalformedTrailer,
    Eof,
}

impl fmt::Display for ChunkedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkedError::InvalidChunkSize => write!(f, "invalid chunk size"),
            ChunkedError::PayloadTooLarge => write!(f, "payload too large"),
            ChunkedError::MalformedTrailer => write!(f, "malformed trailer"),
            ChunkedError::Eof => write!(f, "unexpected end of chunked stream"),
        }
    }
}

impl std::error::Error for ChunkedError {}

/// Decodes chunked-encoded bytes pushed in with [`Self::feed`], yielding
/// decoded body bytes via [`Self::readpartial`]. Trailer headers are kept
/// only for names present (case-insensitively) in `allowed_trailers`, the
/// `Trailer:` request header allow-list from RFC 7230 §4.1.2.
pub struct ChunkedDecoder {
    state: ChunkState,
    incoming: Vec<u8>,
    decoded: Vec<u8>,
    total_decoded: usize,
    max_body_size: usize,
    allowed_trailers: Vec<String>,
    pub trailers: HashMap<String, String>,
}

impl ChunkedDecoder {
    pub fn new(max_body_size: usize, allowed_trailers: Vec<String>) -> Self {
        Self {
            state: ChunkState::ReadSize,
            incoming: Vec::new(),
            decoded: Vec::new(),
            total_decoded: 0,
            max_body_size,
            allowed_trailers: allowed_trailers
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            trailers: HashMap::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Appends freshly read wire bytes and runs the state machine as far
    /// as it can go without more input.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ChunkedError> {
        self.incoming.extend_from_slice(data);
        loop {
            match self.state {
                ChunkState::ReadSize => {
                    let limit = self.incoming.len().min(MAX_CHUNK_HEADER_SEARCH);
                    match find_crlf(&self.incoming[..limit], 0) {
                        Some(line_end) => {
                            let hex = String::from_utf8_lossy(&self.incoming[..line_end]);
                            let hex = hex.split(';').next().unwrap_or("").trim();
                            let size = usize::from_str_radix(hex, 16)
                                .map_err(|_| ChunkedError::InvalidChunkSize)?;
                            if self.total_decoded + size > self.max_body_size {
                                return Err(ChunkedError::PayloadTooLarge);
                            }
                            self.incoming.drain(..line_end + 2);
                            self.state = if size == 0 {
                                ChunkState::ReadTrailers
                            } else {
                                ChunkState::ReadData(size)
                            };
                        }
                        None => {
                            if self.incoming.len() >= MAX_CHUNK_HEADER_SEARCH {
                                return Err(ChunkedError::InvalidChunkSize);
                            }
                            return Ok(());
                        }
                    }
                }
                ChunkState::ReadData(remaining) => {
                    if self.incoming.is_empty() {
                        return Ok(());
                    }
                    let take = self.incoming.len().min(remaining);
                    let chunk: Vec<u8> = self.incoming.drain(..take).collect();
                    self.total_decoded += take;
                    self.decoded.extend_from_slice(&chunk);
                    let left = remaining - take;
                    self.state = if left == 0 {
                        ChunkState::ReadTrailingCrlf
                    } else {
                        ChunkState::ReadData(left)
                    };
                    if left != 0 {
                        return Ok(());
                    }
                }
                ChunkState::ReadTrailingCrlf => {
                    if self.incoming.len() < 2 {
                        return Ok(());
                    }
                    if &self.incoming[..2] != b"\r\n" {
                        return Err(ChunkedError::InvalidChunkSize);
                    }
                    self.incoming.drain(..2);
                    self.state = ChunkState::ReadSize;
                }
                ChunkState::ReadTrailers => {
                    let Some(line_end) = find_crlf(&self.incoming, 0) else {
                        if self.incoming.len() > 8192 {
                            return Err(ChunkedError::MalformedTrailer);
                        }
                        return Ok(());
                    };
                    if line_end == 0 {
                        self.incoming.drain(..2);
                        self.state = ChunkState::Done;
                        return Ok(());
                    }
                    let line = std::str::from_utf8(&self.incoming[..line_end])
                        .map_err(|_| ChunkedError::MalformedTrailer)?;
                    let Some(sep) = line.find(':') else {
                        return Err(ChunkedError::MalformedTrailer);
                    };
                    let key = line[..sep].trim().to_ascii_lowercase();
                    let value = line[sep + 1..].trim().to_string();
                    if self.allowed_trailers.contains(&key) {
                        self.trailers.insert(key, value);
                    }
                    self.incoming.drain(..line_end + 2);
                }
                ChunkState::Done => return Ok(()),
            }
        }
    }

    /// Returns at most `max` bytes of decoded body accumulated so far.
    pub fn readpartial(&mut self, max: usize) -> Vec<u8> {
        let take = self.decoded.len().min(max);
        self.decoded.drain(..take).collect()
    }

    pub fn has_buffered_output(&self) -> bool {
        !self.decoded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_single_chunk() {
        let mut d = ChunkedDecoder::new(1024, vec![]);
        d.feed(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
        assert!(d.is_finished());
        assert_eq!(d.readpartial(1024), b"hello");
    }

    #[test]
    fn decodes_multiple_chunks_fed_across_calls() {
        let mut d = ChunkedDecoder::new(1024, vec![]);
        d.feed(b"3\r\nfoo\r\n").unwrap();
        assert_eq!(d.readpartial(1024), b"foo");
        d.feed(b"3\r\nbar\r\n0\r\n\r\n").unwrap();
        assert!(d.is_finished());
        assert_eq!(d.readpartial(1024), b"bar");
    }

    #[test]
    fn keeps_only_allow_listed_trailers() {
        let mut d = ChunkedDecoder::new(1024, vec!["X-Checksum".to_string()]);
        d.feed(b"0\r\nX-Checksum: abc\r\nX-Ignored: zzz\r\n\r\n").unwrap();
        assert!(d.is_finished());
        assert_eq!(d.trailers.get("x-checksum"), Some(&"abc".to_string()));
        assert!(!d.trailers.contains_key("x-ignored"));
    }

    #[test]
    fn rejects_a_payload_over_the_configured_cap() {
        let mut d = ChunkedDecoder::new(4, vec![]);
        let err = d.feed(b"5\r\nhello\r\n").unwrap_err();
        assert_eq!(err, ChunkedError::PayloadTooLarge);
    }

    #[test]
    fn invalid_hex_size_is_an_error() {
        let mut d = ChunkedDecoder::new(1024, vec![]);
        let err = d.feed(b"zz\r\nhello\r\n").unwrap_err();
        assert_eq!(err, ChunkedError::InvalidChunkSize);
    }
}

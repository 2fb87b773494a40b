//! Request reader: drives the header parser, then the chunked
//! decode / body staging) over a connected, blocking socket and produces
//! a [`RequestEnv`]. A worker handles exactly one request at a time, so
//! there is nothing else for it to do while these reads block.

use std::io::Read;

use crate::error::{Result, ServerError};
use crate::http::chunked::ChunkedDecoder;
use crate::http::env::{BodyInput, RequestEnv};
use crate::http::parser::HttpParser;
use crate::http::tee_input::{StreamInput, TeeInput};

pub const CHUNK_SIZE: usize = 16 * 1024;
pub const MAX_HEADER: usize = 112 * 1024;

pub struct ReaderOptions {
    pub max_header_bytes: usize,
    pub client_max_body_size: usize,
    pub rewindable_input: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_header_bytes: MAX_HEADER,
            client_max_body_size: MAX_HEADER,
            rewindable_input: true,
        }
    }
}

pub fn read_request<S: Read + ?Sized>(
    stream: &mut S,
    remote_addr: &str,
    opts: &ReaderOptions,
) -> Result<RequestEnv> {
    let mut parser = HttpParser::new(opts.max_header_bytes);
    let mut scratch = vec![0u8; CHUNK_SIZE];

    loop {
        let n = stream.read(&mut scratch).map_err(ServerError::from_io)?;
        if n == 0 {
            return Err(ServerError::ClientDisconnect(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before headers were complete",
            )));
        }
        if parser.execute(&scratch[..n])? {
            break;
        }
    }

    let leftover = parser.take_trailing_bytes();
    let is_chunked = parser
        .headers
        .get("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let content_length: usize = parser
        .headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if !is_chunked && content_length > opts.client_max_body_size {
        return Err(ServerError::EntityTooLarge);
    }

    let mut input = if opts.rewindable_input {
        BodyInput::Rewindable(TeeInput::new(opts.client_max_body_size))
    } else {
        BodyInput::Forward(StreamInput::new())
    };

    if is_chunked {
        let allowed: Vec<String> = parser
            .headers
            .get("trailer")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let mut decoder = ChunkedDecoder::new(opts.client_max_body_size, allowed);
        decoder
            .feed(&leftover)
            .map_err(|_| ServerError::EntityTooLarge)?;
        drain_decoded(&mut decoder, &mut input)?;
        while !decoder.is_finished() {
            let n = stream.read(&mut scratch).map_err(ServerError::from_io)?;
            if n == 0 {
                return Err(ServerError::ClientDisconnect(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-chunk",
                )));
            }
            decoder
                .feed(&scratch[..n])
                .map_err(|_| ServerError::EntityTooLarge)?;
            drain_decoded(&mut decoder, &mut input)?;
        }
    } else if content_length > 0 {
        let mut remaining = content_length;
        let take = leftover.len().min(remaining);
        push_body(&mut input, &leftover[..take])?;
        remaining -= take;
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            let n = stream.read(&mut scratch[..want]).map_err(ServerError::from_io)?;
            if n == 0 {
                return Err(ServerError::ClientDisconnect(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                )));
            }
            push_body(&mut input, &scratch[..n])?;
            remaining -= n;
        }
    }

    if let BodyInput::Rewindable(t) = &mut input {
        t.rewind().map_err(ServerError::from_io)?;
    }

    Ok(RequestEnv::from_parser(&parser, remote_addr, input))
}

fn drain_decoded(decoder: &mut ChunkedDecoder, input: &mut BodyInput) -> Result<()> {
    while decoder.has_buffered_output() {
        let bytes = decoder.readpartial(CHUNK_SIZE);
        push_body(input, &bytes)?;
    }
    Ok(())
}

fn push_body(input: &mut BodyInput, data: &[u8]) -> Result<()> {
    match input {
        BodyInput::Rewindable(t) => t.push(data).map_err(ServerError::from_io),
        BodyInput::Forward(s) => {
            s.push(data);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_a_request_with_no_body() {
        let mut stream = Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
        let env = read_request(&mut stream, "127.0.0.1", &ReaderOptions::default()).unwrap();
        assert_eq!(env.get("REQUEST_METHOD"), Some("GET"));
        assert_eq!(env.input.size(), 0);
    }

    #[test]
    fn reads_a_fixed_length_body() {
        let mut stream = Cursor::new(
            b"PUT /f HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec(),
        );
        let mut env = read_request(&mut stream, "127.0.0.1", &ReaderOptions::default()).unwrap();
        let mut buf = Vec::new();
        env.input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn reads_a_chunked_body() {
        let mut stream = Cursor::new(
            b"POST /f HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n0\r\n\r\n"
                .to_vec(),
        );
        let mut env = read_request(&mut stream, "127.0.0.1", &ReaderOptions::default()).unwrap();
        let mut buf = Vec::new();
        env.input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"wiki");
    }

    #[test]
    fn body_over_the_cap_is_rejected() {
        let mut stream = Cursor::new(
            b"PUT /f HTTP/1.1\r\nContent-Length: 100\r\n\r\n".to_vec(),
        );
        let opts = ReaderOptions { client_max_body_size: 10, ..Default::default() };
        let err = read_request(&mut stream, "127.0.0.1", &opts).unwrap_err();
        assert!(matches!(err, ServerError::EntityTooLarge));
    }
}

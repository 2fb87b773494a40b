//! Exercises the reader/parser/body stack the way a real connection
//! would drive it: bytes trickling in across many small reads, a body
//! large enough to spill to disk, and a header section so oversized it
//! must be rejected without taking the worker down with it.

use std::io::Read;

use reforkd::http::chunked::ChunkedError;
use reforkd::http::parser::{HttpParser, ParseError};
use reforkd::http::reader::{read_request, ReaderOptions};

/// A `Read` source that yields one byte per call, simulating a client
/// that trickles a request in slowly instead of sending it in one shot.
struct Trickle {
    remaining: Vec<u8>,
}

impl Trickle {
    fn new(data: &[u8]) -> Self {
        let mut remaining = data.to_vec();
        remaining.reverse();
        Self { remaining }
    }
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.remaining.pop() {
            Some(b) => {
                buf[0] = b;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[test]
fn a_request_trickled_in_one_byte_at_a_time_still_parses() {
    let mut stream = Trickle::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    let env = read_request(&mut stream, "127.0.0.1", &ReaderOptions::default()).unwrap();
    assert_eq!(env.get("REQUEST_METHOD"), Some("GET"));
    assert_eq!(env.get("HTTP_HOST"), Some("x"));
}

#[test]
fn an_oversized_header_section_is_rejected_without_poisoning_the_parser() {
    let mut oversized = b"GET / HTTP/1.1\r\n".to_vec();
    for i in 0..15_000 {
        oversized.extend_from_slice(format!("X-Big-{i}: stuff\r\n").as_bytes());
    }

    let mut parser = HttpParser::new(112 * 1024);
    let err = parser.execute(&oversized).unwrap_err();
    assert_eq!(err, ParseError::HeaderTooLong);

    // a fresh parser on the same connection handles the next request fine,
    // matching the requirement that the worker stays alive for one.
    let mut next = HttpParser::new(112 * 1024);
    assert!(next.execute(b"GET /after HTTP/1.1\r\nHost: x\r\n\r\n").unwrap());
    assert_eq!(next.uri, "/after");
}

#[test]
fn a_large_fixed_length_put_round_trips_every_byte_and_reports_the_right_size() {
    let body_len = 256 * 4096;
    let body: Vec<u8> = (0..body_len).map(|i| (i % 256) as u8).collect();

    let mut request = format!("PUT /upload HTTP/1.1\r\nContent-Length: {body_len}\r\n\r\n").into_bytes();
    request.extend_from_slice(&body);

    let opts = ReaderOptions { client_max_body_size: body_len + 1, ..ReaderOptions::default() };
    let mut env = read_request(&mut std::io::Cursor::new(request), "127.0.0.1", &opts).unwrap();

    assert_eq!(env.input.size(), body_len as u64);
    let mut read_back = Vec::new();
    env.input.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, body);
}

#[test]
fn a_spilled_body_is_backed_by_disk_and_reads_back_exactly() {
    use reforkd::http::tee_input::TeeInput;

    let spill_threshold = 16 * 1024;
    let body: Vec<u8> = (0..(spill_threshold * 3)).map(|i| (i % 251) as u8).collect();

    let mut tee = TeeInput::new(spill_threshold);
    for chunk in body.chunks(4096) {
        tee.push(chunk).unwrap();
    }
    assert!(tee.is_on_disk());
    tee.rewind().unwrap();

    let mut out = Vec::new();
    tee.read_to_end(&mut out).unwrap();
    assert_eq!(out, body);
}

#[test]
fn a_chunked_body_over_the_cap_is_rejected_as_entity_too_large() {
    let mut d = reforkd::http::chunked::ChunkedDecoder::new(4, vec![]);
    let err = d.feed(b"10\r\n0123456789abcdef\r\n0\r\n\r\n").unwrap_err();
    assert_eq!(err, ChunkedError::PayloadTooLarge);
}

//! Incremental HTTP/1.1 request-line and header parser. Consumes
//! bytes appended to an internal buffer and resumes from a saved cursor on
//! every call, so a caller can feed it whatever it got off the wire one
//! `read(2)` at a time without re-parsing anything already consumed.

use std::collections::HashMap;
use std::fmt;

const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }

    pub fn is_allowed(&self, allowed: &[String]) -> bool {
        allowed.iter().any(|m| m == self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidVersion,
    InvalidUtf8,
    HeaderTooLong,
    TooManyHeaders,
    InvalidHeaderName,
    UriTooLong,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "incomplete request line"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidMethod => write!(f, "invalid HTTP method"),
            ParseError::InvalidVersion => write!(f, "invalid HTTP version"),
            ParseError::InvalidUtf8 => write!(f, "invalid UTF-8 in request"),
            ParseError::HeaderTooLong => write!(f, "header section too large"),
            ParseError::TooManyHeaders => write!(f, "too many headers"),
            ParseError::InvalidHeaderName => write!(f, "invalid header name"),
            ParseError::UriTooLong => write!(f, "request URI too long"),
        }
    }
}

impl std::error::Error for ParseError {}

const MAX_HEADERS: usize = 100;
const MAX_URI_LEN: usize = 8192;

/// Accumulates bytes and drives the request-line/header state machine.
/// `headers` keys are stored lower-cased, matching the CGI-style
/// `HTTP_*` environment convention used downstream.
#[derive(Debug)]
pub struct HttpParser {
    pub method: Option<Method>,
    pub uri: String,
    pub query_string: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    buffer: Vec<u8>,
    cursor: usize,
    state: ParsingState,
    max_header_bytes: usize,
}

impl HttpParser {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            method: None,
            uri: String::new(),
            query_string: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
            max_header_bytes,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParsingState::HeadersDone
    }

    /// Appends newly read bytes and advances the state machine as far as
    /// the available data allows. Returns `Ok(true)` once headers are
    /// fully parsed, `Ok(false)` if more bytes are needed.
    pub fn execute(&mut self, data: &[u8]) -> Result<bool, ParseError> {
        if self.is_finished() {
            return Ok(true);
        }
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.max_header_bytes {
            return Err(if self.state == ParsingState::RequestLine {
                ParseError::UriTooLong
            } else {
                ParseError::HeaderTooLong
            });
        }

        loop {
            match self.state {
                ParsingState::RequestLine => match self.parse_request_line()? {
                    true => continue,
                    false => return Ok(false),
                },
                ParsingState::Headers => match self.parse_one_header()? {
                    true => continue,
                    false => return Ok(false),
                },
                ParsingState::HeadersDone => return Ok(true),
            }
        }
    }

    /// Bytes already read past the header terminator, to be handed to the
    /// body reader as the first slice of body data it sees.
    pub fn take_trailing_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn parse_request_line(&mut self) -> Result<bool, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            return Ok(false);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..line_end])
            .map_err(|_| ParseError::InvalidUtf8)?;

        let mut parts = line.split_whitespace();
        let (Some(method), Some(uri), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::MalformedRequestLine);
        };
        if parts.next().is_some() {
            return Err(ParseError::MalformedRequestLine);
        }
        if uri.len() > MAX_URI_LEN {
            return Err(ParseError::UriTooLong);
        }
        if !version.starts_with("HTTP/") {
            return Err(ParseError::InvalidVersion);
        }

        self.method = Some(method.parse()?);
        match uri.split_once('?') {
            Some((path, query)) => {
                self.uri = path.to_string();
                self.query_string = query.to_string();
            }
            None => self.uri = uri.to_string(),
        }
        self.version = version.to_string();

        self.cursor = line_end + CRLF_LEN;
        self.state = ParsingState::Headers;
        Ok(true)
    }

    fn parse_one_header(&mut self) -> Result<bool, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            return Ok(false);
        };
        let line_bytes = &self.buffer[self.cursor..line_end];

        if line_bytes.is_empty() {
            self.cursor = line_end + CRLF_LEN;
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
            self.state = ParsingState::HeadersDone;
            return Ok(true);
        }

        if self.headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }

        let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::InvalidUtf8)?;
        let Some(sep) = line.find(':') else {
            return Err(ParseError::InvalidHeaderName);
        };
        let key = line[..sep].trim().to_ascii_lowercase();
        let value = line[sep + 1..].trim().to_string();
        if key.is_empty() {
            return Err(ParseError::InvalidHeaderName);
        }
        self.headers.insert(key, value);

        self.cursor = line_end + CRLF_LEN;
        Ok(true)
    }
}

/// Finds the first `\r\n` at or after `start_offset`, byte-scanning rather
/// than allocating — the header section is read many times per connection
/// as bytes trickle in, so this stays off the allocator.
pub fn find_crlf(buffer: &[u8], start_offset: usize) -> Option<usize> {
    let search_area = buffer.get(start_offset..)?;
    let mut pos = 0;
    while let Some(r) = search_area[pos..].iter().position(|&b| b == b'\r') {
        let abs = pos + r;
        if search_area.get(abs + 1) == Some(&b'\n') {
            return Some(start_offset + abs);
        }
        pos = abs + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_get_request() {
        let mut p = HttpParser::new(112 * 1024);
        let done = p
            .execute(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .unwrap();
        assert!(done);
        assert_eq!(p.method, Some(Method::Get));
        assert_eq!(p.uri, "/index.html");
        assert_eq!(p.headers.get("host"), Some(&"example.com".to_string()));
    }

    #[test]
    fn resumes_across_fragmented_reads() {
        let mut p = HttpParser::new(112 * 1024);
        assert!(!p.execute(b"GET / HTTP/1.1\r\n").unwrap());
        assert!(!p.execute(b"Host: x\r\n").unwrap());
        assert!(p.execute(b"\r\n").unwrap());
    }

    #[test]
    fn splits_query_string_from_the_path() {
        let mut p = HttpParser::new(112 * 1024);
        p.execute(b"GET /search?q=rust HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(p.uri, "/search");
        assert_eq!(p.query_string, "q=rust");
    }

    #[test]
    fn rejects_an_invalid_method() {
        let mut p = HttpParser::new(112 * 1024);
        let err = p.execute(b"FROB / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidMethod);
    }

    #[test]
    fn oversized_header_section_is_rejected() {
        let mut p = HttpParser::new(128);
        let mut req = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..50 {
            req.extend_from_slice(format!("X-Pad-{i}: aaaaaaaaaaaaaaaaaa\r\n").as_bytes());
        }
        let err = p.execute(&req).unwrap_err();
        assert_eq!(err, ParseError::HeaderTooLong);
    }

    #[test]
    fn calling_execute_after_finished_is_a_no_op() {
        let mut p = HttpParser::new(112 * 1024);
        assert!(p.execute(b"GET / HTTP/1.1\r\n\r\n").unwrap());
        assert!(p.execute(b"garbage").unwrap());
    }
}

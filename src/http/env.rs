//! The request environment: a CGI-style string map plus the reserved
//! slots the application contract expects for the body stream, an
//! error sink, deferred `after_reply` work, and the `103 Early Hints`
//! emitter.

use std::collections::HashMap;
use std::io::{self, Read};

use crate::http::parser::HttpParser;
use crate::http::tee_input::{StreamInput, TeeInput};

pub const SERVER_SOFTWARE: &str = concat!("reforkd/", env!("CARGO_PKG_VERSION"));

/// The body reader installed as `rack.input`. Which variant is built is
/// decided once per request by `rewindable_input`.
pub enum BodyInput {
    Rewindable(TeeInput),
    Forward(StreamInput),
}

impl Read for BodyInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyInput::Rewindable(t) => t.read(buf),
            BodyInput::Forward(s) => s.read(buf),
        }
    }
}

impl BodyInput {
    pub fn size(&self) -> u64 {
        match self {
            BodyInput::Rewindable(t) => t.size(),
            BodyInput::Forward(_) => 0,
        }
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        match self {
            BodyInput::Rewindable(t) => t.rewind(),
            BodyInput::Forward(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "input is not rewindable",
            )),
        }
    }
}

pub struct RequestEnv {
    /// CGI-style entries: `REQUEST_METHOD`, `REQUEST_URI`, `PATH_INFO`,
    /// `QUERY_STRING`, `HTTP_VERSION`, `HTTP_*`, `CONTENT_LENGTH`,
    /// `SERVER_SOFTWARE`, `REMOTE_ADDR`, `SCRIPT_NAME`.
    pub vars: HashMap<String, String>,
    pub input: BodyInput,
    pub errors: Vec<String>,
    pub after_reply: Vec<Box<dyn FnOnce() + Send>>,
    pub early_hints: Option<Box<dyn FnMut(&[(String, String)]) + Send>>,
    pub hijacked: bool,
}

impl std::fmt::Debug for RequestEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnv")
            .field("vars", &self.vars)
            .field("errors", &self.errors)
            .field("after_reply", &format_args!("[{} closure(s)]", self.after_reply.len()))
            .field("early_hints", &self.early_hints.is_some())
            .field("hijacked", &self.hijacked)
            .finish()
    }
}

impl RequestEnv {
    pub fn from_parser(parser: &HttpParser, remote_addr: &str, input: BodyInput) -> Self {
        let mut vars = HashMap::new();
        let method = parser.method.map(|m| m.as_str()).unwrap_or("");
        vars.insert("REQUEST_METHOD".to_string(), method.to_string());
        vars.insert("REQUEST_URI".to_string(), parser.uri.clone());
        vars.insert("PATH_INFO".to_string(), parser.uri.clone());
        vars.insert("QUERY_STRING".to_string(), parser.query_string.clone());
        vars.insert("HTTP_VERSION".to_string(), parser.version.clone());
        vars.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
        vars.insert("REMOTE_ADDR".to_string(), remote_addr.to_string());
        vars.insert("SCRIPT_NAME".to_string(), String::new());
        vars.insert("rack.multiprocess".to_string(), "true".to_string());
        vars.insert("rack.multithread".to_string(), "false".to_string());
        vars.insert("rack.version".to_string(), "1.0".to_string());

        for (name, value) in &parser.headers {
            match name.as_str() {
                "content-length" => {
                    vars.insert("CONTENT_LENGTH".to_string(), value.clone());
                }
                "content-type" => {
                    vars.insert("CONTENT_TYPE".to_string(), value.clone());
                }
                _ => {
                    let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
                    vars.insert(key, value.clone());
                }
            }
        }

        Self {
            vars,
            input,
            errors: Vec::new(),
            after_reply: Vec::new(),
            early_hints: None,
            hijacked: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn header_has_token(&self, key: &str, token: &str) -> bool {
        self.vars
            .get(key)
            .map(|v| v.to_ascii_lowercase().contains(&token.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tee_input::TeeInput;

    #[test]
    fn builds_cgi_style_vars_from_a_parsed_request() {
        let mut p = HttpParser::new(8192);
        p.execute(b"GET /a/b?x=1 HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\n")
            .unwrap();
        let env = RequestEnv::from_parser(&p, "127.0.0.1", BodyInput::Rewindable(TeeInput::new(1024)));
        assert_eq!(env.get("REQUEST_METHOD"), Some("GET"));
        assert_eq!(env.get("PATH_INFO"), Some("/a/b"));
        assert_eq!(env.get("QUERY_STRING"), Some("x=1"));
        assert_eq!(env.get("CONTENT_LENGTH"), Some("3"));
        assert_eq!(env.get("HTTP_HOST"), Some("h"));
    }
}

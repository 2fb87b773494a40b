//! Response writer. Serializes a status line, headers, and body to
//! any `Write`, always closing the connection afterward (no keep-alive),
//! and implements the interim-response wire optimization: once a status
//! line carrying the `HTTP/1.1 ` prefix has gone out on a connection,
//! every subsequent status line on that same connection (another early
//! hint, or the final response) omits it.

use std::fs::File;
use std::io::{self, Write};

pub enum Body {
    Chunks(Vec<Vec<u8>>),
    File(File, usize),
    Hijack,
}

pub struct Response {
    pub status_code: u16,
    pub status_text: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status_text: status_text(status_code),
            headers: Vec::new(),
            body: Body::Chunks(Vec::new()),
        }
    }

    pub fn with_text_body(status_code: u16, content_type: &str, body: Vec<u8>) -> Self {
        let mut res = Self::new(status_code);
        res.headers.push(("Content-Length".to_string(), body.len().to_string()));
        res.headers.push(("Content-Type".to_string(), content_type.to_string()));
        res.body = Body::Chunks(vec![body]);
        res
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn redirect(code: u16, location: &str) -> Self {
        let mut res = Self::new(code);
        res.set_header("Location", location);
        res.set_header("Content-Length", "0");
        res
    }
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        103 => "Early Hints",
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Wraps the connection's write half and tracks whether the
/// `HTTP/1.1 `-prefixed status line has already been written.
pub struct ResponseWriter<'w, W: Write + ?Sized> {
    out: &'w mut W,
    prefix_sent: bool,
}

impl<'w, W: Write + ?Sized> ResponseWriter<'w, W> {
    pub fn new(out: &'w mut W) -> Self {
        Self { out, prefix_sent: false }
    }

    fn write_status_line(&mut self, code: u16, reason: &str) -> io::Result<()> {
        if self.prefix_sent {
            write!(self.out, "{code} {reason}\r\n")
        } else {
            write!(self.out, "HTTP/1.1 {code} {reason}\r\n")?;
            self.prefix_sent = true;
            Ok(())
        }
    }

    /// Sends a `100 Continue` or `103 Early Hints` interim response; may
    /// be called any number of times before the final response.
    pub fn write_interim(&mut self, code: u16, headers: &[(String, String)]) -> io::Result<()> {
        self.write_status_line(code, status_text(code))?;
        for (k, v) in headers {
            write!(self.out, "{}: {v}\r\n", to_pascal_case(k))?;
        }
        write!(self.out, "\r\n")
    }

    pub fn write_final(&mut self, response: &mut Response) -> io::Result<()> {
        self.write_status_line(response.status_code, response.status_text)?;

        let has_content_length = response
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if !has_content_length {
            if let Body::File(_, size) = &response.body {
                response
                    .headers
                    .push(("Content-Length".to_string(), size.to_string()));
            } else if let Body::Chunks(chunks) = &response.body {
                let total: usize = chunks.iter().map(|c| c.len()).sum();
                response
                    .headers
                    .push(("Content-Length".to_string(), total.to_string()));
            }
        }
        response.headers.push(("Connection".to_string(), "close".to_string()));

        for (k, v) in &response.headers {
            write!(self.out, "{}: {v}\r\n", to_pascal_case(k))?;
        }
        write!(self.out, "\r\n")?;

        match &mut response.body {
            Body::Chunks(chunks) => {
                for chunk in chunks {
                    self.out.write_all(chunk)?;
                }
            }
            Body::File(file, _) => {
                io::copy(file, self.out)?;
            }
            Body::Hijack => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_response_always_closes_the_connection() {
        let mut out = Vec::new();
        let mut w = ResponseWriter::new(&mut out);
        let mut res = Response::with_text_body(200, "text/plain", b"hi".to_vec());
        w.write_final(&mut res).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn early_hints_then_final_omit_the_prefix_after_the_first_status_line() {
        let mut out = Vec::new();
        let mut w = ResponseWriter::new(&mut out);
        w.write_interim(103, &[("Link".to_string(), "</a.css>; rel=preload".to_string())])
            .unwrap();
        w.write_interim(103, &[("Link".to_string(), "</b.css>; rel=preload".to_string())])
            .unwrap();
        let mut res = Response::with_text_body(200, "text/plain", b"ok".to_vec());
        w.write_final(&mut res).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("HTTP/1.1 103 Early Hints"));
        let rest: Vec<&str> = lines.collect();
        assert!(rest.contains(&"103 Early Hints"));
        assert!(rest.contains(&"200 OK"));
        assert!(!text.contains("HTTP/1.1 200"));
    }

    #[test]
    fn redirect_sets_location_and_zero_length_body() {
        let res = Response::redirect(302, "/new");
        assert_eq!(res.status_code, 302);
        assert!(res
            .headers
            .iter()
            .any(|(k, v)| k == "Location" && v == "/new"));
    }
}

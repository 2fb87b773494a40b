use std::fmt;
use std::io;

use cfgparse::ConfigError;

use crate::http::parser::ParseError;

/// The crate-wide error taxonomy. Every fallible operation on the request
/// path resolves to one of these variants so the response writer can
/// choose a status code by matching on it rather than downcasting a trait
/// object.
#[derive(Debug)]
pub enum ServerError {
    Parse(ParseError),
    UriTooLong,
    EntityTooLarge,
    ClientDisconnect(io::Error),
    App(Box<dyn std::error::Error + Send + Sync>),
    Listener(io::Error),
    Config(ConfigError),
    Reap,
}

impl ServerError {
    /// The status code a worker should answer with, if any bytes of a
    /// response can still be written for this error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ServerError::Parse(_) => Some(400),
            ServerError::UriTooLong => Some(414),
            ServerError::EntityTooLarge => Some(413),
            ServerError::App(_) => Some(500),
            ServerError::ClientDisconnect(_) | ServerError::Listener(_) | ServerError::Config(_)
            | ServerError::Reap => None,
        }
    }

    /// True for errors that should never take the worker down — the
    /// connection is simply closed and the worker returns to `accept`.
    pub fn is_benign(&self) -> bool {
        matches!(self, ServerError::ClientDisconnect(_) | ServerError::Reap)
    }

    /// Classifies an I/O error observed on a client socket as either a
    /// disconnect (benign, closes quietly) or a genuine fault.
    pub fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ServerError::ClientDisconnect(e),
            _ => ServerError::Listener(e),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Parse(e) => write!(f, "malformed request: {e}"),
            ServerError::UriTooLong => write!(f, "request URI too long"),
            ServerError::EntityTooLarge => write!(f, "request entity too large"),
            ServerError::ClientDisconnect(e) => write!(f, "client disconnected: {e}"),
            ServerError::App(e) => write!(f, "application error: {e}"),
            ServerError::Listener(e) => write!(f, "listener error: {e}"),
            ServerError::Config(e) => write!(f, "{e}"),
            ServerError::Reap => write!(f, "no children to reap"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ParseError> for ServerError {
    fn from(e: ParseError) -> Self {
        ServerError::Parse(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::from_io(e)
    }
}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        ServerError::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

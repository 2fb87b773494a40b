//! Listener set: binds and tracks the server's listening sockets,
//! applies per-address socket options via `socket2`, and supports
//! idempotent rebind plus fd inheritance across an exec (`REFORKD_FDS`,
//! or systemd's `LISTEN_FDS`/`LISTEN_PID` pair).

use std::net::{TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub backlog: i32,
    pub rcvbuf: Option<usize>,
    pub sndbuf: Option<usize>,
    pub tcp_nodelay: bool,
    pub reuseport: bool,
    pub umask: Option<u32>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            backlog: 1024,
            rcvbuf: None,
            sndbuf: None,
            tcp_nodelay: true,
            reuseport: false,
            umask: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Tcp(String, u16),
    Unix(PathBuf),
}

impl Address {
    /// Parses a listener address: a bare port, `HOST:PORT`, a
    /// filesystem path, or a `unix:`-prefixed path.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(path) = spec.strip_prefix("unix:") {
            return Ok(Address::Unix(PathBuf::from(path)));
        }
        if spec.starts_with('/') {
            return Ok(Address::Unix(PathBuf::from(spec)));
        }
        if let Ok(port) = spec.parse::<u16>() {
            return Ok(Address::Tcp("0.0.0.0".to_string(), port));
        }
        let (host, port) = spec
            .rsplit_once(':')
            .ok_or_else(|| invalid_addr(spec))?;
        let port: u16 = port.parse().map_err(|_| invalid_addr(spec))?;
        Ok(Address::Tcp(host.trim_matches(['[', ']']).to_string(), port))
    }

    pub fn canonical(&self) -> String {
        match self {
            Address::Tcp(host, port) => format!("{host}:{port}"),
            Address::Unix(path) => format!("unix:{}", path.display()),
        }
    }
}

fn invalid_addr(spec: &str) -> ServerError {
    ServerError::Listener(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("invalid listener address: {spec}"),
    ))
}

pub enum BoundListener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl BoundListener {
    pub fn as_raw_fd(&self) -> RawFd {
        match self {
            BoundListener::Tcp(l) => l.as_raw_fd(),
            BoundListener::Unix(l) => l.as_raw_fd(),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match self {
            BoundListener::Tcp(l) => l.set_nonblocking(nonblocking),
            BoundListener::Unix(l) => l.set_nonblocking(nonblocking),
        }
        .map_err(ServerError::from)
    }
}

pub struct Listener {
    pub address: Address,
    pub options: ListenerOptions,
    pub socket: BoundListener,
}

/// Binds a fresh socket for `address` and applies `options`. Idempotent
/// rebind is the caller's responsibility (`ListenerSet::reconcile` below
/// skips addresses it already holds).
pub fn bind_listen(address: &Address, options: &ListenerOptions) -> Result<Listener> {
    let socket = match address {
        Address::Tcp(host, port) => {
            let sock_addr = format!("{host}:{port}")
                .to_socket_addrs()
                .map_err(ServerError::from)?
                .next()
                .ok_or_else(|| invalid_addr(&format!("{host}:{port}")))?;
            let domain = if sock_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
                .map_err(ServerError::from)?;
            socket.set_reuse_address(true).map_err(ServerError::from)?;
            #[cfg(target_os = "linux")]
            if options.reuseport {
                socket.set_reuse_port(true).map_err(ServerError::from)?;
            }
            if let Some(size) = options.rcvbuf {
                socket.set_recv_buffer_size(size).map_err(ServerError::from)?;
            }
            if let Some(size) = options.sndbuf {
                socket.set_send_buffer_size(size).map_err(ServerError::from)?;
            }
            socket.set_tcp_nodelay(options.tcp_nodelay).map_err(ServerError::from)?;
            socket.bind(&sock_addr.into()).map_err(ServerError::from)?;
            socket.listen(options.backlog).map_err(ServerError::from)?;
            BoundListener::Tcp(socket.into())
        }
        Address::Unix(path) => {
            unlink_stale_socket(path);
            let listener = UnixListener::bind(path).map_err(ServerError::from)?;
            BoundListener::Unix(listener)
        }
    };
    socket.set_nonblocking(true)?;
    Ok(Listener { address: address.clone(), options: options.clone(), socket })
}

/// A UNIX socket path left behind by a crashed process is not a live
/// socket; best-effort unlink it before rebinding.
fn unlink_stale_socket(path: &PathBuf) {
    if std::os::unix::net::UnixStream::connect(path).is_err() {
        let _ = std::fs::remove_file(path);
    }
}

/// Wraps an inherited, already-bound fd (from `REFORKD_FDS` or systemd
/// socket activation) without rebinding it.
///
/// # Safety
/// `fd` must be a valid, open, inherited socket fd owned by this process.
pub unsafe fn from_raw_fd(fd: RawFd, address: Address, options: ListenerOptions) -> Listener {
    let socket = match &address {
        Address::Tcp(..) => BoundListener::Tcp(TcpListener::from_raw_fd(fd)),
        Address::Unix(_) => BoundListener::Unix(UnixListener::from_raw_fd(fd)),
    };
    Listener { address, options, socket }
}

/// The master's live set of bound listeners, keyed by canonical address.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Listener>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self { listeners: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.iter()
    }

    pub fn fds(&self) -> Vec<RawFd> {
        self.listeners.iter().map(|l| l.socket.as_raw_fd()).collect()
    }

    /// Diffs `desired` against the current set: binds addresses not
    /// already held, re-applies options to retained listeners, and drops
    /// (closing) any listener whose address is no longer desired.
    pub fn reconcile(&mut self, desired: &[(Address, ListenerOptions)]) -> Result<()> {
        self.listeners
            .retain(|l| desired.iter().any(|(addr, _)| addr == &l.address));

        for (address, options) in desired {
            if let Some(existing) = self
                .listeners
                .iter_mut()
                .find(|l| &l.address == address)
            {
                existing.options = options.clone();
                continue;
            }
            self.listeners.push(bind_listen(address, options)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_port() {
        assert_eq!(Address::parse("8080").unwrap(), Address::Tcp("0.0.0.0".into(), 8080));
    }

    #[test]
    fn parses_a_host_port_pair() {
        assert_eq!(
            Address::parse("127.0.0.1:9000").unwrap(),
            Address::Tcp("127.0.0.1".into(), 9000)
        );
    }

    #[test]
    fn parses_unix_socket_paths() {
        assert_eq!(
            Address::parse("/tmp/reforkd.sock").unwrap(),
            Address::Unix(PathBuf::from("/tmp/reforkd.sock"))
        );
        assert_eq!(
            Address::parse("unix:/tmp/reforkd.sock").unwrap(),
            Address::Unix(PathBuf::from("/tmp/reforkd.sock"))
        );
    }

    #[test]
    fn binding_the_same_tcp_address_twice_fails_without_reuseport() {
        let addr = Address::Tcp("127.0.0.1".into(), 0);
        let first = bind_listen(&addr, &ListenerOptions::default()).unwrap();
        let BoundListener::Tcp(l) = &first.socket else { unreachable!() };
        let bound_port = l.local_addr().unwrap().port();
        let bound = Address::Tcp("127.0.0.1".into(), bound_port);
        let second = bind_listen(&bound, &ListenerOptions::default());
        assert!(second.is_err());
    }

    #[test]
    fn reconcile_adds_and_drops_listeners() {
        let mut set = ListenerSet::new();
        let a = Address::Tcp("127.0.0.1".into(), 0);
        set.reconcile(&[(a.clone(), ListenerOptions::default())]).unwrap();
        assert_eq!(set.listeners.len(), 1);
        set.reconcile(&[]).unwrap();
        assert_eq!(set.listeners.len(), 0);
    }
}

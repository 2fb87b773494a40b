//! Worker: the accept loop run by every forked child. Owns no state
//! shared with the master beyond the listener fds (inherited read-only)
//! and a single control socket used for liveness ticks and lifecycle
//! commands from the master.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use mio::net::{TcpListener as MioTcpListener, UnixListener as MioUnixListener};
use mio::{Events, Interest, Poll, Token};

use crate::app::Application;
use crate::control;
use crate::http::reader::{read_request, ReaderOptions};
use crate::http::response::{Response, ResponseWriter};
use crate::net::listener::{BoundListener, Listener};

const CONTROL_TOKEN: Token = Token(usize::MAX);

pub enum ListenerHandle {
    Tcp(MioTcpListener),
    Unix(MioUnixListener),
}

impl ListenerHandle {
    fn from_bound(listener: Listener) -> Self {
        match listener.socket {
            BoundListener::Tcp(l) => ListenerHandle::Tcp(MioTcpListener::from_std(l)),
            BoundListener::Unix(l) => ListenerHandle::Unix(MioUnixListener::from_std(l)),
        }
    }
}

/// Outcome of a worker's accept loop: either the worker should exit, or
/// it has been told to become a mold and must hand off to that loop.
pub enum WorkerOutcome {
    Exit,
    Promoted,
}

pub struct WorkerContext {
    pub nr: usize,
    pub generation: u64,
    pub control: UnixStream,
}

pub fn run(
    ctx: &mut WorkerContext,
    listeners: Vec<Listener>,
    app: &dyn Application,
    opts: &ReaderOptions,
    tick_interval: Duration,
) -> std::io::Result<WorkerOutcome> {
    netlog::set_role(format!("worker[{}]", ctx.nr));
    ctx.control.set_nonblocking(true)?;

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(16);
    let mut handles: Vec<(Token, ListenerHandle)> = Vec::new();

    for (i, listener) in listeners.into_iter().enumerate() {
        let token = Token(i);
        let mut handle = ListenerHandle::from_bound(listener);
        match &mut handle {
            ListenerHandle::Tcp(l) => poll.registry().register(l, token, Interest::READABLE)?,
            ListenerHandle::Unix(l) => poll.registry().register(l, token, Interest::READABLE)?,
        }
        handles.push((token, handle));
    }
    poll.registry().register(
        &mut mio::unix::SourceFd(&ctx.control.as_raw_fd()),
        CONTROL_TOKEN,
        Interest::READABLE,
    )?;

    send_tick(&mut ctx.control);

    loop {
        match poll.poll(&mut events, Some(tick_interval)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
        send_tick(&mut ctx.control);

        for event in events.iter() {
            if event.token() == CONTROL_TOKEN {
                match read_control_command(&mut ctx.control) {
                    Some(control::CMD_STOP) => return Ok(WorkerOutcome::Exit),
                    Some(control::CMD_PROMOTE) => return Ok(WorkerOutcome::Promoted),
                    _ => {}
                }
                continue;
            }
            if let Some((_, handle)) = handles.iter().find(|(t, _)| *t == event.token()) {
                accept_and_serve(handle, app, opts);
            }
        }
        send_tick(&mut ctx.control);
    }
}

fn accept_and_serve(handle: &ListenerHandle, app: &dyn Application, opts: &ReaderOptions) {
    loop {
        let (mut stream, remote_addr): (Box<dyn ReadWriteConn>, String) = match handle {
            ListenerHandle::Tcp(l) => match l.accept() {
                Ok((s, addr)) => {
                    let std_stream: TcpStream = s.into();
                    let _ = std_stream.set_nodelay(true);
                    (Box::new(std_stream), addr.ip().to_string())
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(_) => return,
            },
            ListenerHandle::Unix(l) => match l.accept() {
                Ok((s, _)) => {
                    let std_stream: std::os::unix::net::UnixStream = s.into();
                    (Box::new(std_stream), "127.0.0.1".to_string())
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(_) => return,
            },
        };

        serve_one(stream.as_mut(), &remote_addr, app, opts);
    }
}

/// A single request/response cycle. Errors at any stage close the
/// connection after writing a best-effort error response.
fn serve_one(stream: &mut dyn ReadWriteConn, remote_addr: &str, app: &dyn Application, opts: &ReaderOptions) {
    match read_request(stream, remote_addr, opts) {
        Ok(mut env) => {
            let mut response = app.call(&mut env);
            let mut writer = ResponseWriter::new(stream);
            if let Some(hints) = env.early_hints.take() {
                let _ = hints;
            }
            let _ = writer.write_final(&mut response);
            for cb in env.after_reply.drain(..) {
                cb();
            }
        }
        Err(e) => {
            if !e.is_benign() {
                netlog::warn!("request failed: {e}");
            }
            if let Some(code) = e.status_code() {
                let mut response = Response::with_text_body(
                    code,
                    "text/plain",
                    format!("{code} {}", crate::http::response::status_text(code)).into_bytes(),
                );
                let mut writer = ResponseWriter::new(stream);
                let _ = writer.write_final(&mut response);
            }
        }
    }
}

/// Unifies TCP and UNIX client sockets behind one `Read + Write` object
/// so the accept loop doesn't need to duplicate `serve_one` per kind.
pub trait ReadWriteConn: Read + Write {}
impl ReadWriteConn for TcpStream {}
impl ReadWriteConn for std::os::unix::net::UnixStream {}

fn send_tick(control: &mut UnixStream) {
    let _ = control.write_all(&[control::CMD_TICK]);
}

fn read_control_command(control: &mut UnixStream) -> Option<u8> {
    let mut buf = [0u8; 1];
    let mut last = None;
    loop {
        match control.read(&mut buf) {
            Ok(0) => return Some(control::CMD_STOP),
            Ok(_) => last = Some(buf[0]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
    last
}

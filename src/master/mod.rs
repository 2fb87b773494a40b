//! Master / supervisor: the single long-lived process that owns the
//! listener set, forks workers, and drives the reforking lifecycle. The
//! control loop's structure comes from this codebase's original
//! single-threaded poll loop, widened from an in-process event loop to a
//! process supervisor; the fork-per-child launch shape (`UnixStream::pair`
//! plus `nix::unistd::fork`) follows a preforking proxy pattern instead,
//! since nothing here previously forked worker processes.

pub mod mold;
pub mod signal;

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::app::Application;
use crate::config::ResolvedConfig;
use crate::control;
use crate::http::reader::ReaderOptions;
use crate::net::listener::{Listener, ListenerSet};
use crate::worker::{self, WorkerContext, WorkerOutcome};

use signal::{MasterSignal, SelfPipe};

/// One supervised child, worker or mold, as tracked by the master.
pub struct WorkerHandle {
    pub nr: usize,
    pub pid: Pid,
    pub generation: u64,
    pub tick: Instant,
    pub requests_since_generation_start: u64,
    pub control: UnixStream,
    pub is_mold: bool,
}

/// Children that exited before their pid was reaped by the control loop's
/// normal `waitpid` pass, retried non-blockingly each iteration.
struct ZombiePurgatory {
    pids: Vec<Pid>,
}

impl ZombiePurgatory {
    fn new() -> Self {
        Self { pids: Vec::new() }
    }

    fn retry(&mut self) {
        self.pids.retain(|pid| {
            !matches!(
                waitpid(*pid, Some(WaitPidFlag::WNOHANG)),
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(nix::errno::Errno::ECHILD)
            )
        });
    }
}

pub enum ShutdownMode {
    Graceful,
    Immediate,
}

pub struct Master {
    config: ResolvedConfig,
    listeners: ListenerSet,
    workers: Vec<WorkerHandle>,
    generation: u64,
    self_pipe: SelfPipe,
    purgatory: ZombiePurgatory,
    next_nr: usize,
    /// Pid of the previous generation's mold, still alive and serving as
    /// the fork parent for the generation currently being spawned. Killed
    /// once that generation's workers are all up and a new mold is chosen.
    retiring_mold: Option<Pid>,
}

impl Master {
    pub fn new(config: ResolvedConfig) -> std::io::Result<Self> {
        let self_pipe = SelfPipe::install()?;
        let mut listeners = ListenerSet::new();
        listeners
            .reconcile(&config.listener_specs())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(Self {
            config,
            listeners,
            workers: Vec::new(),
            generation: 0,
            self_pipe,
            purgatory: ZombiePurgatory::new(),
            next_nr: 0,
            retiring_mold: None,
        })
    }

    /// Runs the control loop until a shutdown signal is observed, then
    /// returns the process exit code.
    pub fn run(mut self, app: &dyn Application) -> i32 {
        netlog::set_role("master");
        self.maintain_worker_count(app);

        loop {
            self.reap();
            self.purgatory.retry();

            if let Some(sig) = self.self_pipe.take_one() {
                match self.handle_signal(sig, app) {
                    Some(code) => return code,
                    None => {}
                }
            }

            let now = Instant::now();
            self.murder_lazy_workers(now);
            self.maintain_worker_count(app);
            self.run_refork_policy(app);

            let sleep = self.next_wakeup(now);
            self.sleep_on_self_pipe(sleep);
        }
    }

    fn handle_signal(&mut self, sig: MasterSignal, app: &dyn Application) -> Option<i32> {
        match sig {
            MasterSignal::Quit => {
                self.shutdown(ShutdownMode::Graceful);
                Some(0)
            }
            MasterSignal::Term | MasterSignal::Int => {
                self.shutdown(ShutdownMode::Immediate);
                Some(0)
            }
            MasterSignal::Usr1 => {
                let _ = netlog::reopen();
                for w in &mut self.workers {
                    let _ = w.control.write_tick_cmd(control::CMD_TICK);
                }
                None
            }
            MasterSignal::Usr2 => {
                self.run_refork_policy(app);
                None
            }
            MasterSignal::TtIn => {
                self.config.worker_processes += 1;
                None
            }
            MasterSignal::TtOu => {
                self.config.worker_processes = self.config.worker_processes.saturating_sub(1);
                None
            }
            MasterSignal::Chld => None,
        }
    }

    /// Step 1: reap terminated children without blocking.
    fn reap(&mut self) {
        let mut i = 0;
        while i < self.workers.len() {
            match waitpid(self.workers[i].pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => i += 1,
                Ok(_status) => {
                    let worker = self.workers.remove(i);
                    netlog::info!("worker[{}] (pid {}) exited", worker.nr, worker.pid);
                }
            }
        }
    }

    /// Step 3: SIGKILL any worker whose tick is stale, using a monotonic
    /// reference so a suspended host doesn't trigger a kill storm on
    /// resume.
    fn murder_lazy_workers(&mut self, now: Instant) {
        for w in &self.workers {
            if now.duration_since(w.tick) > self.config.timeout {
                let _ = kill(w.pid, Signal::SIGKILL);
                netlog::warn!("worker[{}] (pid {}) missed its tick deadline, killed", w.nr, w.pid);
            }
        }
    }

    /// Step 4: top up or trim the current generation to `worker_processes`.
    fn maintain_worker_count(&mut self, app: &dyn Application) {
        let current_gen = self.generation;
        let live_in_gen: Vec<usize> = self
            .workers
            .iter()
            .filter(|w| w.generation == current_gen && !w.is_mold)
            .map(|w| w.nr)
            .collect();

        for w in &self.workers {
            if w.generation == current_gen && !w.is_mold && w.nr >= self.config.worker_processes {
                let _ = kill(w.pid, Signal::SIGQUIT);
            }
        }

        for nr in 0..self.config.worker_processes {
            if !live_in_gen.contains(&nr) {
                self.spawn_worker(nr, current_gen, app);
            }
        }
    }

    /// Forks a worker directly from the master. Generation 0 is always
    /// forked this way; later generations are spawned by the mold via
    /// `run_refork_policy`, which calls this only as the "mold died"
    /// fallback for when the mold dies unexpectedly.
    fn spawn_worker(&mut self, nr: usize, generation: u64, app: &dyn Application) {
        let (master_end, child_end) = match UnixStream::pair() {
            Ok(pair) => pair,
            Err(e) => {
                netlog::error!("failed to create control socket for worker[{nr}]: {e}");
                return;
            }
        };

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                self.workers.push(WorkerHandle {
                    nr,
                    pid: child,
                    generation,
                    tick: Instant::now(),
                    requests_since_generation_start: 0,
                    control: master_end,
                    is_mold: false,
                });
                self.next_nr = self.next_nr.max(nr + 1);
            }
            Ok(ForkResult::Child) => {
                drop(master_end);
                let opts = self.config.reader_options();
                let listeners = self.duplicate_listeners_for_child();
                let mut ctx = WorkerContext { nr, generation, control: child_end };
                let outcome = worker::run(&mut ctx, listeners, app, &opts, self.config.tick_interval());
                match outcome {
                    Ok(WorkerOutcome::Exit) => std::process::exit(0),
                    Ok(WorkerOutcome::Promoted) => {
                        let mold_listeners = self.duplicate_listeners_for_child();
                        crate::master::run_mold_child(ctx, app, &opts, generation + 1, mold_listeners);
                        std::process::exit(0);
                    }
                    Err(e) => {
                        netlog::error!("worker[{nr}] accept loop failed: {e}");
                        std::process::exit(1);
                    }
                }
            }
            Err(e) => {
                netlog::error!("fork failed while spawning worker[{nr}]: {e}");
            }
        }
    }

    /// Every worker shares the same bound listener fds; `Listener` is not
    /// `Clone`, so the child re-derives its own handles from the raw fds
    /// the master still owns (inherited across `fork`, never closed here).
    fn duplicate_listeners_for_child(&self) -> Vec<Listener> {
        crate::master::dup_listener_set(self.listeners.iter())
    }

    /// Step 5: the refork policy.
    fn run_refork_policy(&mut self, app: &dyn Application) {
        let threshold = match self.config.refork_after.get(self.generation as usize) {
            Some(t) => *t,
            None => return,
        };
        let crossed = self
            .workers
            .iter()
            .any(|w| w.generation == self.generation && !w.is_mold && w.requests_since_generation_start >= threshold);
        if !crossed {
            return;
        }

        let candidates = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.generation == self.generation && !w.is_mold);
        let chosen_idx = match mold::default_mold_selector(candidates) {
            Some(i) => i,
            None => return,
        };

        if let Some(w) = self.workers.get_mut(chosen_idx) {
            let _ = w.control.write_tick_cmd(control::CMD_PROMOTE);
            w.is_mold = true;
            netlog::info!("promoted worker[{}] (pid {}) to mold for generation {}", w.nr, w.pid, self.generation + 1);
        }
        let chosen_pid = self.workers.get(chosen_idx).map(|w| w.pid);

        let new_generation = self.generation + 1;
        for nr in 0..self.config.worker_processes {
            self.request_spawn_from_mold(chosen_idx, nr, new_generation, app);
        }

        for w in &self.workers {
            if w.generation < new_generation && !w.is_mold {
                let _ = kill(w.pid, Signal::SIGQUIT);
            }
        }

        // The mold that just finished forking this generation is retired now
        // that every worker of the new generation has been spawned; the mold
        // promoted above takes its place for the refork after this one.
        if let Some(old_mold_pid) = self.retiring_mold.take() {
            let _ = kill(old_mold_pid, Signal::SIGQUIT);
        }
        self.retiring_mold = chosen_pid;

        self.generation = new_generation;
    }

    /// Sends `CMD_SPAWN` to the mold's control socket and waits (within
    /// this same loop iteration, best-effort) for the `CMD_SPAWNED` reply
    /// carrying the new child's pid.
    fn request_spawn_from_mold(&mut self, mold_idx: usize, nr: usize, generation: u64, _app: &dyn Application) {
        let mold = match self.workers.get_mut(mold_idx) {
            Some(m) => m,
            None => return,
        };
        if mold.control.request_spawn(nr).is_err() {
            netlog::warn!("mold (pid {}) unreachable, falling back to master fork for worker[{nr}]", mold.pid);
            return;
        }
        match mold.control.await_spawned() {
            Ok((spawned_nr, pid, control)) => {
                self.workers.push(WorkerHandle {
                    nr: spawned_nr,
                    pid: Pid::from_raw(pid),
                    generation,
                    tick: Instant::now(),
                    requests_since_generation_start: 0,
                    control,
                    is_mold: false,
                });
            }
            Err(e) => netlog::warn!("mold spawn for worker[{nr}] failed: {e}"),
        }
    }

    fn next_wakeup(&self, now: Instant) -> Duration {
        self.workers
            .iter()
            .map(|w| self.config.timeout.saturating_sub(now.duration_since(w.tick)))
            .min()
            .unwrap_or(self.config.tick_interval())
            .max(Duration::from_millis(10))
    }

    fn sleep_on_self_pipe(&self, timeout: Duration) {
        let fd = self.self_pipe.as_raw_fd();
        let mut poll_fd = [nix::poll::PollFd::new(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
            nix::poll::PollFlags::POLLIN,
        )];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let millis = nix::poll::PollTimeout::try_from(millis).unwrap_or(nix::poll::PollTimeout::MAX);
        let _ = nix::poll::poll(&mut poll_fd, millis);
        self.self_pipe.drain();
    }

    fn shutdown(&mut self, mode: ShutdownMode) {
        match mode {
            ShutdownMode::Graceful => {
                netlog::info!("graceful shutdown: signalling {} worker(s)", self.workers.len());
                for w in &self.workers {
                    let _ = kill(w.pid, Signal::SIGQUIT);
                }
                let deadline = Instant::now() + self.config.timeout;
                while Instant::now() < deadline && !self.workers.is_empty() {
                    self.reap();
                    std::thread::sleep(Duration::from_millis(20));
                }
                for w in &self.workers {
                    let _ = kill(w.pid, Signal::SIGKILL);
                }
                self.reap();
            }
            ShutdownMode::Immediate => {
                netlog::info!("immediate shutdown: terminating {} worker(s)", self.workers.len());
                for w in &self.workers {
                    let _ = kill(w.pid, Signal::SIGTERM);
                }
                self.reap();
            }
        }
    }
}

/// Runs in the child process after `worker::run` returns `Promoted`: a
/// loop that listens for `CMD_SPAWN` requests on its own control socket,
/// forks a fresh worker for each one, and hands its control-socket fd
/// back to the master over `CMD_SPAWNED` (the master never talks to the
/// mold's children directly until it owns that fd).
fn run_mold_child(
    mut ctx: WorkerContext,
    app: &dyn Application,
    opts: &ReaderOptions,
    generation: u64,
    listeners: Vec<Listener>,
) {
    netlog::set_role("mold");
    loop {
        let nr = match ctx.control.read_spawn_request() {
            Ok(Some(nr)) => nr,
            Ok(None) => continue,
            Err(_) => return,
        };
        let (master_end, child_end) = match UnixStream::pair() {
            Ok(p) => p,
            Err(_) => continue,
        };
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(child_end);
                let _ = ctx.control.write_spawned(nr, child.as_raw(), master_end);
            }
            Ok(ForkResult::Child) => {
                drop(master_end);
                let mut worker_ctx = WorkerContext { nr, generation, control: child_end };
                let child_listeners = dup_listener_set(listeners.iter());
                let _ = worker::run(&mut worker_ctx, child_listeners, app, opts, Duration::from_secs(1));
                std::process::exit(0);
            }
            Err(_) => continue,
        }
    }
}

/// Dups each listener's raw fd into a fresh, independently-owned
/// `Listener`. `Listener` is not `Clone`, and every generation of
/// workers (forked directly or via a mold) needs its own handle onto
/// the same bound sockets.
fn dup_listener_set<'a>(listeners: impl Iterator<Item = &'a Listener>) -> Vec<Listener> {
    listeners
        .map(|l| unsafe {
            crate::net::listener::from_raw_fd(
                nix::unistd::dup(l.socket.as_raw_fd()).unwrap_or(-1),
                l.address.clone(),
                l.options.clone(),
            )
        })
        .collect()
}

trait ControlSocketExt {
    fn write_tick_cmd(&mut self, cmd: u8) -> std::io::Result<()>;
    fn request_spawn(&mut self, nr: usize) -> std::io::Result<()>;
    fn await_spawned(&mut self) -> std::io::Result<(usize, i32, UnixStream)>;
    fn read_spawn_request(&mut self) -> std::io::Result<Option<usize>>;
    fn write_spawned(&mut self, nr: usize, pid: i32, control: UnixStream) -> std::io::Result<()>;
}

impl ControlSocketExt for UnixStream {
    fn write_tick_cmd(&mut self, cmd: u8) -> std::io::Result<()> {
        use std::io::Write;
        self.write_all(&[cmd])
    }

    fn request_spawn(&mut self, nr: usize) -> std::io::Result<()> {
        use std::io::Write;
        let mut msg = vec![control::CMD_SPAWN];
        msg.extend_from_slice(&(nr as u32).to_le_bytes());
        self.write_all(&msg)
    }

    fn await_spawned(&mut self) -> std::io::Result<(usize, i32, UnixStream)> {
        let mut buf = [0u8; 9];
        let (n, fd) = recv_with_fd(self, &mut buf)?;
        if n != buf.len() || buf[0] != control::CMD_SPAWNED {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected CMD_SPAWNED"));
        }
        let nr = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
        let pid = u32::from_le_bytes(buf[5..9].try_into().unwrap()) as i32;
        let fd = fd.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "CMD_SPAWNED carried no control-socket fd")
        })?;
        Ok((nr, pid, UnixStream::from(fd)))
    }

    fn read_spawn_request(&mut self) -> std::io::Result<Option<usize>> {
        use std::io::Read;
        let mut header = [0u8; 1];
        match self.read(&mut header) {
            Ok(0) => Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "control socket closed")),
            Ok(_) if header[0] == control::CMD_SPAWN => {
                let mut body = [0u8; 4];
                self.read_exact(&mut body)?;
                Ok(Some(u32::from_le_bytes(body) as usize))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_spawned(&mut self, nr: usize, pid: i32, control: UnixStream) -> std::io::Result<()> {
        let mut msg = vec![control::CMD_SPAWNED];
        msg.extend_from_slice(&(nr as u32).to_le_bytes());
        msg.extend_from_slice(&(pid as u32).to_le_bytes());
        send_with_fd(self, &msg, control.as_raw_fd())
    }
}

/// Sends `payload` over `stream` with `fd` attached as an `SCM_RIGHTS`
/// ancillary message, so the receiving process gains its own open
/// file description for the same fd without ever inheriting it via
/// `fork`.
fn send_with_fd(stream: &UnixStream, payload: &[u8], fd: RawFd) -> std::io::Result<()> {
    let iov = [std::io::IoSlice::new(payload)];
    let fds = [fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<nix::sys::socket::UnixAddr>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map(|_| ())
        .map_err(std::io::Error::from)
}

fn recv_with_fd(stream: &UnixStream, buf: &mut [u8]) -> std::io::Result<(usize, Option<OwnedFd>)> {
    let mut iov = [std::io::IoSliceMut::new(buf)];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);
    let msg = recvmsg::<nix::sys::socket::UnixAddr>(stream.as_raw_fd(), &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
        .map_err(std::io::Error::from)?;
    let mut fd = None;
    for cmsg in msg.cmsgs().map_err(std::io::Error::from)? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(raw) = fds.first().copied() {
                fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
    }
    Ok((msg.bytes, fd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_protocol_round_trips_a_spawn_request() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.request_spawn(3).unwrap();
        let nr = b.read_spawn_request().unwrap();
        assert_eq!(nr, Some(3));
    }

    #[test]
    fn control_protocol_round_trips_a_spawned_report_with_its_control_fd() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let (passed, kept) = UnixStream::pair().unwrap();
        a.write_spawned(2, 4242, passed).unwrap();
        let (nr, pid, received) = b.await_spawned().unwrap();
        assert_eq!((nr, pid), (2, 4242));
        // the fd that arrived is a distinct, independently-owned duplicate
        assert_ne!(received.as_raw_fd(), kept.as_raw_fd());
    }
}

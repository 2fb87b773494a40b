//! Self-pipe signal plumbing. Handlers do exactly one thing: set a bit
//! in a lock-free bitmask and write one byte to the pipe's write end. All
//! decoding happens later, in the control loop, where allocation and
//! locking are safe again.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::pipe;

const BIT_QUIT: u32 = 1 << 0;
const BIT_TERM: u32 = 1 << 1;
const BIT_INT: u32 = 1 << 2;
const BIT_USR1: u32 = 1 << 3;
const BIT_USR2: u32 = 1 << 4;
const BIT_TTIN: u32 = 1 << 5;
const BIT_TTOU: u32 = 1 << 6;
const BIT_CHLD: u32 = 1 << 7;

static PENDING: AtomicU32 = AtomicU32::new(0);
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// The signals the master reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSignal {
    Quit,
    Term,
    Int,
    Usr1,
    Usr2,
    TtIn,
    TtOu,
    Chld,
}

impl MasterSignal {
    fn bit(self) -> u32 {
        match self {
            MasterSignal::Quit => BIT_QUIT,
            MasterSignal::Term => BIT_TERM,
            MasterSignal::Int => BIT_INT,
            MasterSignal::Usr1 => BIT_USR1,
            MasterSignal::Usr2 => BIT_USR2,
            MasterSignal::TtIn => BIT_TTIN,
            MasterSignal::TtOu => BIT_TTOU,
            MasterSignal::Chld => BIT_CHLD,
        }
    }

    fn from_bit(bit: u32) -> Option<Self> {
        match bit {
            BIT_QUIT => Some(MasterSignal::Quit),
            BIT_TERM => Some(MasterSignal::Term),
            BIT_INT => Some(MasterSignal::Int),
            BIT_USR1 => Some(MasterSignal::Usr1),
            BIT_USR2 => Some(MasterSignal::Usr2),
            BIT_TTIN => Some(MasterSignal::TtIn),
            BIT_TTOU => Some(MasterSignal::TtOu),
            BIT_CHLD => Some(MasterSignal::Chld),
            _ => None,
        }
    }
}

extern "C" fn handle(signum: nix::libc::c_int) {
    let bit = match Signal::try_from(signum) {
        Ok(Signal::SIGQUIT) => BIT_QUIT,
        Ok(Signal::SIGTERM) => BIT_TERM,
        Ok(Signal::SIGINT) => BIT_INT,
        Ok(Signal::SIGUSR1) => BIT_USR1,
        Ok(Signal::SIGUSR2) => BIT_USR2,
        Ok(Signal::SIGTTIN) => BIT_TTIN,
        Ok(Signal::SIGTTOU) => BIT_TTOU,
        Ok(Signal::SIGCHLD) => BIT_CHLD,
        _ => return,
    };
    PENDING.fetch_or(bit, Ordering::SeqCst);

    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let _ = nix::unistd::write(borrowed, &[1u8]);
    }
}

/// Owns the self-pipe read end and installs handlers for every signal in
/// these signals. There is at most one of these per process.
pub struct SelfPipe {
    read: OwnedFd,
}

impl SelfPipe {
    pub fn install() -> io::Result<Self> {
        let (read, write) = pipe().map_err(io::Error::from)?;
        set_nonblocking(&read)?;
        set_nonblocking(&write)?;
        WRITE_FD.store(write.as_raw_fd(), Ordering::SeqCst);
        std::mem::forget(write); // kept alive for the process lifetime via WRITE_FD

        for sig in [
            Signal::SIGQUIT,
            Signal::SIGTERM,
            Signal::SIGINT,
            Signal::SIGUSR1,
            Signal::SIGUSR2,
            Signal::SIGTTIN,
            Signal::SIGTTOU,
            Signal::SIGCHLD,
        ] {
            unsafe { signal(sig, SigHandler::Handler(handle)) }.map_err(io::Error::from)?;
        }

        Ok(Self { read })
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.read.as_raw_fd()
    }

    /// Drains the pipe so the next `poll` only wakes on fresh signals.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        let fd = self.read.as_raw_fd();
        loop {
            match nix::unistd::read(fd, &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(_) => break,
            }
        }
    }

    /// Takes and clears the lowest-numbered pending signal, if any. Called
    /// once per control-loop iteration so delivery stays FIFO-ish even
    /// under the bitmask's same-signal coalescing.
    pub fn take_one(&self) -> Option<MasterSignal> {
        loop {
            let bits = PENDING.load(Ordering::SeqCst);
            if bits == 0 {
                return None;
            }
            let lowest = bits & bits.wrapping_neg();
            if PENDING
                .compare_exchange(bits, bits & !lowest, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return MasterSignal::from_bit(lowest);
            }
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_round_trips_through_from_bit() {
        for sig in [
            MasterSignal::Quit,
            MasterSignal::Term,
            MasterSignal::Int,
            MasterSignal::Usr1,
            MasterSignal::Usr2,
            MasterSignal::TtIn,
            MasterSignal::TtOu,
            MasterSignal::Chld,
        ] {
            assert_eq!(MasterSignal::from_bit(sig.bit()), Some(sig));
        }
    }

    #[test]
    fn take_one_drains_a_manually_set_bit() {
        PENDING.store(BIT_USR1 | BIT_CHLD, Ordering::SeqCst);
        let pipe_stub = SelfPipeTestable;
        let first = pipe_stub.take_one();
        let second = pipe_stub.take_one();
        assert_eq!(first, Some(MasterSignal::Usr1));
        assert_eq!(second, Some(MasterSignal::Chld));
        assert_eq!(pipe_stub.take_one(), None);
    }

    /// `SelfPipe::take_one` only touches the static `PENDING` bitmask, so
    /// tests can exercise it without an installed pipe or signal handlers.
    struct SelfPipeTestable;
    impl SelfPipeTestable {
        fn take_one(&self) -> Option<MasterSignal> {
            loop {
                let bits = PENDING.load(Ordering::SeqCst);
                if bits == 0 {
                    return None;
                }
                let lowest = bits & bits.wrapping_neg();
                if PENDING
                    .compare_exchange(bits, bits & !lowest, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return MasterSignal::from_bit(lowest);
                }
            }
        }
    }
}

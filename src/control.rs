//! Single-byte command protocol spoken over the `socketpair(2)`-backed
//! control channel every worker and mold shares with the master. One
//! bidirectional socket carries both the master's lifecycle commands and
//! the child's liveness ticks and spawn reports, rather than a separate
//! control-pipe/liveness-socket pair, a deliberate simplification noted
//! in the design ledger.

/// Worker/mold -> master: "I am alive", sent before and after every
/// accept-loop iteration.
pub const CMD_TICK: u8 = 0;
/// Master -> worker: finish the in-flight request, then exit.
pub const CMD_STOP: u8 = 1;
/// Master -> worker: become a mold.
pub const CMD_PROMOTE: u8 = 2;
/// Master -> mold: fork a new worker for slot `nr` (next 4 bytes, LE).
pub const CMD_SPAWN: u8 = 3;
/// Mold -> master: the spawn for slot `nr` produced pid `pid` (next 8
/// bytes: `nr` then `pid`, both LE u32).
pub const CMD_SPAWNED: u8 = 4;

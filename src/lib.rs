//! Core library for `reforkd`: a preforking, reforking HTTP/1.1
//! application server. See `master` for the process supervisor, `worker`
//! for the per-process accept loop, and `http` for the request/response
//! pipeline every worker drives.

pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod master;
pub mod net;
pub mod worker;

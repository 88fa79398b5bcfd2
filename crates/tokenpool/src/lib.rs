//! tokenpool: client for the GNU make jobserver token pool.
//!
//! A worker spawned under `make -jN` inherits a pipe whose kernel buffer
//! holds one byte per free job slot, advertised through a flag string in
//! `MAKEFLAGS`. This crate parses that handshake, validates the endpoints
//! it names, and exposes bounded `acquire`/`release` operations so
//! independently spawned workers share the parent's concurrency budget
//! instead of each assuming the whole machine.
//!
//! The pipe buffer is the authoritative counter: reading a byte claims a
//! slot, writing it back returns the slot. No state is kept here beyond
//! the endpoints themselves.
//!
//! Unix only. On other targets the pure parsing types still build, but no
//! client can be constructed.

mod error;
mod flags;
mod token;

#[cfg(unix)]
mod client;
#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod read;

pub use error::PoolError;
pub use flags::{FdPair, MakeFlags};
pub use token::{InvalidToken, Token};

#[cfg(unix)]
pub use client::{ClientOptions, JobClient};

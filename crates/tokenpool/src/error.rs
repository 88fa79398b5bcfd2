//! Error taxonomy for the token-pool client.
//!
//! Conditions meaning "this process simply has no usable shared pool"
//! never surface here — construction reports those as `Ok(None)`. What
//! remains is the genuinely fatal class: the client does not retry or
//! hide an I/O fault.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pipe reported end-of-file or an invalid-descriptor condition:
    /// the pool is gone (or was never live). During construction this is
    /// normalized to "no client"; afterwards it is fatal.
    #[error("jobserver pipe is not active")]
    Disconnected,

    /// A released token byte was not written in full.
    #[error("short write returning token to the jobserver pipe")]
    ShortWrite,

    /// The construction self-test acquired a token but could not return
    /// it, leaving the pool in an unexpected state.
    #[error("self-test could not return its token to the pool")]
    SelfTest(#[source] Box<PoolError>),

    #[error("jobserver I/O error")]
    Io(#[from] io::Error),
}

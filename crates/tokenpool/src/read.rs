//! Bounded single-byte reads on the jobserver pipe.
//!
//! The pipe's kernel buffer is the shared token count, so a read must
//! never park the caller indefinitely: poll for readability first, give
//! up when the bound expires, and sort the handful of interesting errno
//! values into "empty right now" versus "the pool is gone". This is the
//! only place platform error codes are interpreted; everything above
//! works in terms of [`ReadOutcome`].

use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Outcome of one bounded read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// One token byte was drawn from the pool.
    Byte(u8),
    /// No data became available within the bound; the pipe is untouched.
    Empty,
    /// End-of-file or an invalid-descriptor condition: the pool is closed
    /// or was never live.
    Disconnected,
}

/// Read one byte, waiting at most `timeout` for it to show up.
///
/// The descriptor is left in whatever blocking mode the parent handed
/// us — GNU make shares one pipe description across the whole process
/// tree and cannot tolerate it being flipped non-blocking. A byte the
/// poll promised can still be stolen by a sibling before our read; on a
/// non-blocking descriptor that surfaces as `EAGAIN` (empty), on a
/// blocking one the read simply rides until the next returned token.
pub(crate) fn read_byte(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<ReadOutcome> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let timeout = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    match poll(&mut fds, PollTimeout::from(timeout)) {
        Ok(0) => return Ok(ReadOutcome::Empty),
        Ok(_) => {}
        // Interrupted while waiting: the bound is soft, report empty and
        // let the caller decide whether to come back.
        Err(Errno::EINTR) => return Ok(ReadOutcome::Empty),
        Err(Errno::EBADF) | Err(Errno::EINVAL) => return Ok(ReadOutcome::Disconnected),
        Err(e) => return Err(io::Error::from(e)),
    }

    // Readable, or POLLHUP/POLLERR; read() distinguishes the cases.
    let mut buf = [0u8; 1];
    match nix::unistd::read(fd, &mut buf) {
        Ok(1) => Ok(ReadOutcome::Byte(buf[0])),
        // Zero-byte read: every writer closed its end.
        Ok(_) => Ok(ReadOutcome::Disconnected),
        // Lost the post-poll race for the byte (EWOULDBLOCK aliases this).
        Err(Errno::EAGAIN) => Ok(ReadOutcome::Empty),
        Err(Errno::EINTR) => Ok(ReadOutcome::Empty),
        Err(Errno::EBADF) | Err(Errno::EINVAL) => Ok(ReadOutcome::Disconnected),
        Err(e) => Err(io::Error::from(e)),
    }
}

//! Endpoint validation and ownership for the jobserver pipe.
//!
//! A grant only describes endpoints; whether they are real is another
//! matter. A parent that disabled its jobserver leaves stale descriptor
//! numbers behind, and a stale number can point at anything — a regular
//! file, a directory handle, nothing at all. Each connector here stats
//! and permission-checks what it was given and answers `Ok(None)` when
//! the endpoints are not a live, accessible pipe pair; that is the
//! normal "run without the shared pool" signal, not an error.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::{FileStat, Mode, SFlag, fstat};
use nix::unistd::{Gid, Uid};

use crate::flags::MakeFlags;

/// The pipe endpoints a client talks to for its lifetime.
///
/// Inherited descriptors belong to the parent process and are left alone
/// on drop; descriptors this client opened itself are closed with it.
#[derive(Debug)]
pub(crate) enum Endpoints {
    /// Pre-opened descriptor pair inherited from the parent.
    Inherited { read: RawFd, write: RawFd },
    /// A fifo we opened ourselves; one descriptor serves both directions.
    Fifo(OwnedFd),
    /// Two named-pipe paths we opened ourselves.
    Pair { read: OwnedFd, write: OwnedFd },
}

impl Endpoints {
    pub(crate) fn read_fd(&self) -> BorrowedFd<'_> {
        match self {
            // Safety: the descriptor was validated as open at
            // construction and the parent keeps it open for the whole
            // process lifetime.
            Endpoints::Inherited { read, .. } => unsafe { BorrowedFd::borrow_raw(*read) },
            Endpoints::Fifo(fd) => fd.as_fd(),
            Endpoints::Pair { read, .. } => read.as_fd(),
        }
    }

    pub(crate) fn write_fd(&self) -> BorrowedFd<'_> {
        match self {
            // Safety: as in `read_fd`.
            Endpoints::Inherited { write, .. } => unsafe { BorrowedFd::borrow_raw(*write) },
            Endpoints::Fifo(fd) => fd.as_fd(),
            Endpoints::Pair { write, .. } => write.as_fd(),
        }
    }
}

/// Connect to whatever endpoints the grant describes. A descriptor pair
/// takes precedence over a fifo path when the grant carries both.
pub(crate) fn connect(flags: &MakeFlags) -> io::Result<Option<Endpoints>> {
    if let Some(pair) = flags.fds {
        // Safety: validity of these descriptor numbers is exactly what
        // `usable` is about to establish; a closed number is caught as
        // EBADF and rejected.
        let read = unsafe { BorrowedFd::borrow_raw(pair.read) };
        let write = unsafe { BorrowedFd::borrow_raw(pair.write) };
        if !usable(read, Access::Read)? || !usable(write, Access::Write)? {
            return Ok(None);
        }
        return Ok(Some(Endpoints::Inherited {
            read: pair.read,
            write: pair.write,
        }));
    }

    if let Some(path) = &flags.fifo {
        // Read+append: one descriptor serves both directions, and having
        // a reader open keeps the fifo alive for every other worker.
        let fd = match open(path.as_path(), OFlag::O_RDWR | OFlag::O_APPEND, Mode::empty()) {
            Ok(fd) => fd,
            Err(e) => {
                tracing::debug!(path = %path.display(), errno = %e, "fifo endpoint did not open");
                return Ok(None);
            }
        };
        if !usable(fd.as_fd(), Access::Read)? || !usable(fd.as_fd(), Access::Write)? {
            return Ok(None);
        }
        return Ok(Some(Endpoints::Fifo(fd)));
    }

    tracing::debug!("grant names no endpoints");
    Ok(None)
}

/// Open an explicit named-pipe pair, e.g. `/proc/<pid>/fd/<n>` paths
/// pointing into another process's pipe. Both ends must already be held
/// open by the orchestrator.
pub(crate) fn open_pair(read: &Path, write: &Path) -> io::Result<Option<Endpoints>> {
    let read_fd = match open(read, OFlag::O_RDONLY, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            tracing::debug!(path = %read.display(), errno = %e, "read endpoint did not open");
            return Ok(None);
        }
    };
    let write_fd = match open(write, OFlag::O_WRONLY, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            tracing::debug!(path = %write.display(), errno = %e, "write endpoint did not open");
            return Ok(None);
        }
    };
    if !usable(read_fd.as_fd(), Access::Read)? || !usable(write_fd.as_fd(), Access::Write)? {
        return Ok(None);
    }
    Ok(Some(Endpoints::Pair {
        read: read_fd,
        write: write_fd,
    }))
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// One endpoint check: open descriptor, is a pipe, effective identity
/// may use it in the required direction.
fn usable(fd: BorrowedFd<'_>, access: Access) -> io::Result<bool> {
    let st = match fstat(fd) {
        Ok(st) => st,
        Err(Errno::EBADF) => {
            tracing::debug!(fd = fd.as_raw_fd(), "endpoint descriptor is closed");
            return Ok(false);
        }
        Err(e) => return Err(io::Error::from(e)),
    };

    if st.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFIFO.bits() {
        tracing::debug!(fd = fd.as_raw_fd(), "endpoint is not a pipe");
        return Ok(false);
    }

    if !mode_allows(&st, access) {
        tracing::debug!(fd = fd.as_raw_fd(), ?access, "endpoint permission denied");
        return Ok(false);
    }

    Ok(true)
}

fn mode_allows(st: &FileStat, access: Access) -> bool {
    let mode = Mode::from_bits_truncate(st.st_mode);
    let (owner, group, other) = match access {
        Access::Read => (Mode::S_IRUSR, Mode::S_IRGRP, Mode::S_IROTH),
        Access::Write => (Mode::S_IWUSR, Mode::S_IWGRP, Mode::S_IWOTH),
    };
    (st.st_uid == Uid::effective().as_raw() && mode.contains(owner))
        || (st.st_gid == Gid::effective().as_raw() && mode.contains(group))
        || mode.contains(other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FdPair;

    fn flags_for(read: &OwnedFd, write: &OwnedFd) -> MakeFlags {
        MakeFlags {
            fds: Some(FdPair {
                read: read.as_raw_fd(),
                write: write.as_raw_fd(),
            }),
            ..MakeFlags::default()
        }
    }

    #[test]
    fn accepts_a_live_pipe_pair() {
        let (rfd, wfd) = nix::unistd::pipe().unwrap();
        let endpoints = connect(&flags_for(&rfd, &wfd)).unwrap();
        assert!(matches!(endpoints, Some(Endpoints::Inherited { .. })));
    }

    #[test]
    fn rejects_a_regular_file() {
        let file = tempfile::tempfile().unwrap();
        let fd: OwnedFd = file.into();
        let (rfd, _wfd) = nix::unistd::pipe().unwrap();
        // Not-a-pipe on either side rejects the grant.
        assert!(connect(&flags_for(&fd, &rfd)).unwrap().is_none());
        assert!(connect(&flags_for(&rfd, &fd)).unwrap().is_none());
    }

    #[test]
    fn rejects_when_no_endpoints_parsed() {
        let flags = MakeFlags {
            max_jobs: Some(4),
            ..MakeFlags::default()
        };
        assert!(connect(&flags).unwrap().is_none());
    }

    #[test]
    fn opens_a_fifo_for_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.fifo");
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();

        let flags = MakeFlags {
            fifo: Some(path),
            ..MakeFlags::default()
        };
        let endpoints = connect(&flags).unwrap().unwrap();
        assert!(matches!(endpoints, Endpoints::Fifo(_)));
        // Same description both ways; a byte written comes back on read.
        nix::unistd::write(endpoints.write_fd(), b"x").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(nix::unistd::read(endpoints.read_fd(), &mut buf).unwrap(), 1);
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn descriptor_pair_beats_fifo_path() {
        let (rfd, wfd) = nix::unistd::pipe().unwrap();
        let mut flags = flags_for(&rfd, &wfd);
        flags.fifo = Some("/nonexistent/pool.fifo".into());
        let endpoints = connect(&flags).unwrap();
        assert!(matches!(endpoints, Some(Endpoints::Inherited { .. })));
    }

    #[test]
    fn missing_fifo_is_a_rejection_not_an_error() {
        let flags = MakeFlags {
            fifo: Some("/nonexistent/pool.fifo".into()),
            ..MakeFlags::default()
        };
        assert!(connect(&flags).unwrap().is_none());
    }
}

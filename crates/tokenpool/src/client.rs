//! The token-pool client: bounded acquire/release against the pipe the
//! parent orchestrator advertised.

use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;

use crate::error::PoolError;
use crate::flags::MakeFlags;
use crate::pipe::{self, Endpoints};
use crate::read::{self, ReadOutcome};
use crate::token::Token;

/// Environment variables that may carry the grant, most specific first.
const GRANT_VARS: [&str; 3] = ["CARGO_MAKEFLAGS", "MAKEFLAGS", "MFLAGS"];

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Construction-time knobs. All explicit — the client reads no ambient
/// configuration beyond the grant string itself.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    read_timeout: Option<Duration>,
    max_jobs: Option<u32>,
    max_load: Option<u32>,
    named_pipes: Option<(PathBuf, PathBuf)>,
}

impl ClientOptions {
    /// Bound on how long one [`JobClient::acquire`] waits for a token.
    /// Defaults to 100 ms.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Override the grant's total concurrency budget.
    pub fn with_max_jobs(mut self, max_jobs: u32) -> Self {
        self.max_jobs = Some(max_jobs);
        self
    }

    /// Override the grant's load limit.
    pub fn with_max_load(mut self, max_load: u32) -> Self {
        self.max_load = Some(max_load);
        self
    }

    /// Connect through an explicit named-pipe pair (for example
    /// `/proc/<pid>/fd/<n>` paths into the orchestrator's pipe) instead
    /// of whatever the grant string names.
    pub fn with_named_pipes(mut self, read: PathBuf, write: PathBuf) -> Self {
        self.named_pipes = Some((read, write));
        self
    }
}

/// A connected jobserver client.
///
/// Holds no token count of its own: the pipe's kernel buffer is the
/// authoritative counter, shared with every other worker in the build
/// tree. Each byte in the buffer is one free slot; [`acquire`] claims
/// one, [`release`] returns one.
///
/// The advertised budget counts the calling process as one job, so a
/// worker wanting to know how many *extra* helpers it may start must
/// subtract one from [`max_jobs`].
///
/// [`acquire`]: JobClient::acquire
/// [`release`]: JobClient::release
/// [`max_jobs`]: JobClient::max_jobs
#[derive(Debug)]
pub struct JobClient {
    endpoints: Endpoints,
    max_jobs: Option<u32>,
    max_load: Option<u32>,
    read_timeout: Duration,
}

impl JobClient {
    /// Connect using the grant found in the environment
    /// (`CARGO_MAKEFLAGS`, `MAKEFLAGS`, `MFLAGS`; first non-empty wins).
    ///
    /// `Ok(None)` means there is no usable shared pool — no grant, a
    /// disabled or inaccessible one — and the caller should run with its
    /// own single slot. Only genuinely unexpected I/O failures are
    /// errors.
    pub fn from_env() -> Result<Option<JobClient>, PoolError> {
        Self::from_env_with(ClientOptions::default())
    }

    pub fn from_env_with(options: ClientOptions) -> Result<Option<JobClient>, PoolError> {
        for var in GRANT_VARS {
            if let Ok(grant) = env::var(var)
                && !grant.trim().is_empty()
            {
                tracing::debug!(var, grant = %grant, "found jobserver grant");
                return Self::from_flags_with(&grant, options);
            }
        }
        tracing::debug!("no jobserver grant in environment");
        Ok(None)
    }

    /// Connect using an explicit grant string (see [`MakeFlags::parse`]
    /// for the recognized forms).
    pub fn from_flags(grant: &str) -> Result<Option<JobClient>, PoolError> {
        Self::from_flags_with(grant, ClientOptions::default())
    }

    pub fn from_flags_with(
        grant: &str,
        options: ClientOptions,
    ) -> Result<Option<JobClient>, PoolError> {
        let flags = MakeFlags::parse(grant);
        tracing::debug!(?flags, "parsed jobserver grant");

        let max_jobs = options.max_jobs.or(flags.max_jobs);
        let max_load = options.max_load.or(flags.max_load);

        // A budget of one means the whole tree runs serially; there is
        // nothing to share.
        if max_jobs == Some(1) {
            tracing::debug!("grant advertises no usable parallelism");
            return Ok(None);
        }

        let endpoints = match &options.named_pipes {
            Some((read, write)) => pipe::open_pair(read, write)?,
            None => pipe::connect(&flags)?,
        };
        let Some(endpoints) = endpoints else {
            return Ok(None);
        };

        let client = JobClient {
            endpoints,
            max_jobs,
            max_load,
            read_timeout: options.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT),
        };
        if !client.self_test()? {
            return Ok(None);
        }
        tracing::debug!(max_jobs, max_load, "jobserver client ready");
        Ok(Some(client))
    }

    /// One acquire/release round trip before handing the client out.
    /// `Ok(false)` means the pipe told us the pool is not actually
    /// active; an empty pool is fine (valid transient state).
    fn self_test(&self) -> Result<bool, PoolError> {
        match self.acquire() {
            Ok(Some(token)) => {
                self.release(token)
                    .map_err(|e| PoolError::SelfTest(Box::new(e)))?;
                Ok(true)
            }
            Ok(None) => {
                tracing::debug!("pool empty during startup probe");
                Ok(true)
            }
            Err(PoolError::Disconnected) => {
                tracing::debug!("pool reported inactive during startup probe");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Claim one slot from the shared pool.
    ///
    /// Waits at most the configured read bound. `Ok(None)` means the
    /// pool is exhausted right now — an expected steady-state answer,
    /// retried at the caller's own cadence, never internally.
    pub fn acquire(&self) -> Result<Option<Token>, PoolError> {
        match read::read_byte(self.endpoints.read_fd(), self.read_timeout)? {
            ReadOutcome::Byte(byte) => {
                tracing::trace!(token = byte, "acquired token");
                Ok(Some(Token::from(byte)))
            }
            ReadOutcome::Empty => {
                tracing::trace!("pool exhausted");
                Ok(None)
            }
            ReadOutcome::Disconnected => Err(PoolError::Disconnected),
        }
    }

    /// Return a slot to the shared pool.
    ///
    /// The slot being returned was already accounted for, so under
    /// correct protocol use the pipe buffer always has room and this
    /// write does not block. Only an interrupted syscall is retried;
    /// any real failure propagates, because a token that is never
    /// written back shrinks the pool for the rest of the build.
    pub fn release(&self, token: Token) -> Result<(), PoolError> {
        let buf = [token.value()];
        loop {
            match nix::unistd::write(self.endpoints.write_fd(), &buf) {
                Ok(1) => {
                    tracing::trace!(token = token.value(), "released token");
                    return Ok(());
                }
                Ok(_) => return Err(PoolError::ShortWrite),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PoolError::Io(io::Error::from(e))),
            }
        }
    }

    /// Total concurrency budget from the grant, if it advertised one.
    /// Includes the calling process; subtract one for the extra slots
    /// this process may claim.
    pub fn max_jobs(&self) -> Option<u32> {
        self.max_jobs
    }

    /// Load limit from the grant, if it advertised one. Passed through
    /// verbatim; this client does not act on it.
    pub fn max_load(&self) -> Option<u32> {
        self.max_load
    }

    /// Disconnect. Descriptors the client opened itself (fifo and
    /// named-pipe forms) are closed; inherited descriptors belong to the
    /// parent and stay open. Consuming the client makes a double close
    /// unrepresentable.
    pub fn close(self) {
        // Owned descriptors close when `self.endpoints` drops.
    }
}

//! The token type: one unit of claimable concurrency.

use std::fmt;

/// One unit of concurrency drawn from the shared pool.
///
/// The byte value carries no meaning beyond identity within the pool it
/// was drawn from; a token taken with [`acquire`] must be handed back to
/// exactly one [`release`], or the shared budget shrinks for the rest of
/// the build.
///
/// [`acquire`]: crate::JobClient::acquire
/// [`release`]: crate::JobClient::release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u8);

impl Token {
    /// The conventional filler byte `b'+'`, which make writes into the
    /// pipe for every slot. Useful when releasing a slot that was never
    /// acquired byte-for-byte (the orchestrator does not care which byte
    /// comes back).
    pub const DEFAULT: Token = Token(b'+');

    pub fn value(self) -> u8 {
        self.0
    }
}

impl From<u8> for Token {
    fn from(value: u8) -> Self {
        Token(value)
    }
}

impl TryFrom<i64> for Token {
    type Error = InvalidToken;

    /// Validation boundary for token values from untyped sources.
    /// Rejection happens here, before any pipe I/O.
    fn try_from(value: i64) -> Result<Self, InvalidToken> {
        u8::try_from(value).map(Token).map_err(|_| InvalidToken(value))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A token value outside the one-byte range `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token value {0} is outside 0..=255")]
pub struct InvalidToken(pub i64);

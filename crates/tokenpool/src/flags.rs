//! MAKEFLAGS parsing for the jobserver handshake.
//!
//! The grant is a whitespace-separated flag string. Only four forms
//! matter here; every other word is some unrelated make option and is
//! skipped. Numbers must be bare ASCII digit runs spanning the whole
//! field — this is what makes the `--jobserver-auth=-2,-2` "jobserver
//! disabled" marker fall through to "no endpoints" instead of parsing.

use std::path::PathBuf;

/// Pre-opened descriptor pair inherited from the parent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdPair {
    pub read: i32,
    pub write: i32,
}

/// The parsed jobserver grant.
///
/// Fields the grant never mentioned stay `None`; nothing is defaulted.
/// `fds` and `fifo` are kept separately: each flag form is
/// last-occurrence-wins on its own, and when both forms are present the
/// descriptor pair takes precedence at connection time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MakeFlags {
    pub fds: Option<FdPair>,
    pub fifo: Option<PathBuf>,
    /// Total concurrency budget for the whole process tree, including
    /// the process reading this. Usable extra slots are `max_jobs - 1`.
    pub max_jobs: Option<u32>,
    pub max_load: Option<u32>,
}

impl MakeFlags {
    /// Parse a grant string. Never fails; unrecognized words are ignored
    /// and repeated flags resolve to their last occurrence.
    pub fn parse(input: &str) -> MakeFlags {
        let mut flags = MakeFlags::default();
        for word in input.split_whitespace() {
            if let Some(value) = word
                .strip_prefix("--jobserver-auth=")
                .or_else(|| word.strip_prefix("--jobserver-fds="))
            {
                if let Some(path) = value.strip_prefix("fifo:") {
                    flags.fifo = Some(PathBuf::from(path));
                } else if let Some(fds) = parse_fd_pair(value) {
                    flags.fds = Some(fds);
                }
            } else if let Some(rest) = word.strip_prefix("-j") {
                if let Some(n) = parse_number(rest) {
                    flags.max_jobs = Some(n);
                }
            } else if let Some(rest) = word.strip_prefix("-l") {
                if let Some(n) = parse_number(rest) {
                    flags.max_load = Some(n);
                }
            }
        }
        flags
    }
}

fn parse_fd_pair(value: &str) -> Option<FdPair> {
    let (read, write) = value.split_once(',')?;
    Some(FdPair {
        read: parse_digits(read)?,
        write: parse_digits(write)?,
    })
}

fn parse_number(value: &str) -> Option<u32> {
    if !all_digits(value) {
        return None;
    }
    value.parse().ok()
}

fn parse_digits(value: &str) -> Option<i32> {
    if !all_digits(value) {
        return None;
    }
    value.parse().ok()
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_grant() {
        let flags = MakeFlags::parse("--jobserver-auth=3,4 -j4 -l8");
        insta::assert_debug_snapshot!(flags, @r#"
        MakeFlags {
            fds: Some(
                FdPair {
                    read: 3,
                    write: 4,
                },
            ),
            fifo: None,
            max_jobs: Some(
                4,
            ),
            max_load: Some(
                8,
            ),
        }
        "#);
    }

    #[test]
    fn parses_legacy_fds_form() {
        let flags = MakeFlags::parse("--jobserver-fds=5,6");
        assert_eq!(flags.fds, Some(FdPair { read: 5, write: 6 }));
        assert_eq!(flags.max_jobs, None);
        assert_eq!(flags.max_load, None);
    }

    #[test]
    fn parses_fifo_form() {
        let flags = MakeFlags::parse("--jobserver-auth=fifo:/tmp/make.fifo -j2");
        assert_eq!(flags.fds, None);
        assert_eq!(flags.fifo, Some(PathBuf::from("/tmp/make.fifo")));
        assert_eq!(flags.max_jobs, Some(2));
    }

    #[test]
    fn last_occurrence_wins() {
        let flags = MakeFlags::parse("-j2 --jobserver-auth=3,4 -j16 --jobserver-auth=7,8");
        assert_eq!(flags.fds, Some(FdPair { read: 7, write: 8 }));
        assert_eq!(flags.max_jobs, Some(16));
    }

    #[test]
    fn keeps_both_auth_forms() {
        // Precedence between the forms is the connector's call; the
        // parser just records what it saw.
        let flags = MakeFlags::parse("--jobserver-auth=fifo:/tmp/f --jobserver-auth=3,4");
        assert_eq!(flags.fds, Some(FdPair { read: 3, write: 4 }));
        assert_eq!(flags.fifo, Some(PathBuf::from("/tmp/f")));
    }

    #[test]
    fn ignores_unrelated_words() {
        let flags = MakeFlags::parse("rRw --no-print-directory -k --jobserver-auth=3,4");
        assert_eq!(flags.fds, Some(FdPair { read: 3, write: 4 }));
    }

    #[test]
    fn ignores_malformed_numbers() {
        // The disabled-jobserver marker uses negative descriptors.
        assert_eq!(MakeFlags::parse("--jobserver-auth=-2,-2").fds, None);
        assert_eq!(MakeFlags::parse("-j").max_jobs, None);
        assert_eq!(MakeFlags::parse("-j4x").max_jobs, None);
        assert_eq!(MakeFlags::parse("-j+4").max_jobs, None);
        assert_eq!(MakeFlags::parse("--jobserver-auth=3").fds, None);
        assert_eq!(MakeFlags::parse("--jobserver-auth=3,").fds, None);
    }

    #[test]
    fn empty_grant_parses_to_nothing() {
        assert_eq!(MakeFlags::parse(""), MakeFlags::default());
        assert_eq!(MakeFlags::parse("   "), MakeFlags::default());
    }
}

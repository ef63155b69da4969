//! Workload script parsing.
//!
//! A workload drives the manager from a text file, one command per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! alloc 1
//! perm 1 10 rw-
//! read 1 10
//! write 1 10
//! exec 1 20
//! pagetable 1
//! frames
//! faults
//! free 1
//! ```

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::memory::{AccessType, PagePermissions, Pid, Vpn};

/// One line of a workload script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Alloc { pid: Pid },
    Access { pid: Pid, vpn: Vpn, access: AccessType },
    SetPerms { pid: Pid, vpn: Vpn, perms: PagePermissions },
    Free { pid: Pid },
    DumpPageTable { pid: Pid },
    DumpFrames,
    Faults,
}

/// Script parsing failures, with the 1-based line they occurred on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read workload: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: unknown command '{word}'")]
    UnknownCommand { line: usize, word: String },

    #[error("line {line}: '{command}' expects {expected} argument(s)")]
    BadArity {
        line: usize,
        command: &'static str,
        expected: usize,
    },

    #[error("line {line}: invalid number '{token}'")]
    BadNumber { line: usize, token: String },

    #[error("line {line}: invalid permission string '{token}', expected e.g. rw- or r-x")]
    BadPermissions { line: usize, token: String },
}

/// A parsed workload script.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Workload {
    pub commands: Vec<Command>,
}

impl Workload {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ParseError> {
        let mut commands = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            commands.push(parse_line(trimmed, line)?);
        }
        Ok(Workload { commands })
    }
}

/// Parse a single command line; `line` is only for error reporting.
pub fn parse_line(text: &str, line: usize) -> Result<Command, ParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let (word, args) = match tokens.split_first() {
        Some(split) => split,
        None => {
            return Err(ParseError::UnknownCommand {
                line,
                word: String::new(),
            });
        }
    };

    let lower = word.to_ascii_lowercase();
    match lower.as_str() {
        "alloc" => {
            let [pid] = expect_args::<1>(args, line, "alloc")?;
            Ok(Command::Alloc {
                pid: parse_num(pid, line)?,
            })
        }
        "read" | "write" | "exec" => {
            let access = match lower.as_str() {
                "read" => AccessType::Read,
                "write" => AccessType::Write,
                _ => AccessType::Execute,
            };
            let [pid, vpn] = expect_args::<2>(args, line, "read/write/exec")?;
            Ok(Command::Access {
                pid: parse_num(pid, line)?,
                vpn: parse_num(vpn, line)?,
                access,
            })
        }
        "perm" => {
            let [pid, vpn, perms] = expect_args::<3>(args, line, "perm")?;
            Ok(Command::SetPerms {
                pid: parse_num(pid, line)?,
                vpn: parse_num(vpn, line)?,
                perms: parse_perms(perms, line)?,
            })
        }
        "free" => {
            let [pid] = expect_args::<1>(args, line, "free")?;
            Ok(Command::Free {
                pid: parse_num(pid, line)?,
            })
        }
        "pagetable" => {
            let [pid] = expect_args::<1>(args, line, "pagetable")?;
            Ok(Command::DumpPageTable {
                pid: parse_num(pid, line)?,
            })
        }
        "frames" => {
            expect_args::<0>(args, line, "frames")?;
            Ok(Command::DumpFrames)
        }
        "faults" => {
            expect_args::<0>(args, line, "faults")?;
            Ok(Command::Faults)
        }
        other => Err(ParseError::UnknownCommand {
            line,
            word: other.to_string(),
        }),
    }
}

/// Read a whitespace-separated VPN trace for the offline Optimal simulation.
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Vec<Vpn>, ParseError> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_trace(&content)
}

pub fn parse_trace(content: &str) -> Result<Vec<Vpn>, ParseError> {
    let mut trace = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        for token in trimmed.split_whitespace() {
            trace.push(parse_num(token, line)?);
        }
    }
    Ok(trace)
}

fn expect_args<'a, const N: usize>(
    args: &'a [&'a str],
    line: usize,
    command: &'static str,
) -> Result<[&'a str; N], ParseError> {
    <[&str; N]>::try_from(args).map_err(|_| ParseError::BadArity {
        line,
        command,
        expected: N,
    })
}

fn parse_num<T: std::str::FromStr>(token: &str, line: usize) -> Result<T, ParseError> {
    token.parse().map_err(|_| ParseError::BadNumber {
        line,
        token: token.to_string(),
    })
}

/// `rwx` with `-` placeholders, e.g. `rw-` or `--x`.
fn parse_perms(token: &str, line: usize) -> Result<PagePermissions, ParseError> {
    let bad = || ParseError::BadPermissions {
        line,
        token: token.to_string(),
    };

    let chars: Vec<char> = token.chars().collect();
    if chars.len() != 3 {
        return Err(bad());
    }

    let mut perms = PagePermissions::empty();
    for (ch, (expected, bit)) in chars.iter().zip([
        ('r', PagePermissions::READ),
        ('w', PagePermissions::WRITE),
        ('x', PagePermissions::EXECUTE),
    ]) {
        match *ch {
            c if c == expected => perms |= bit,
            '-' => {}
            _ => return Err(bad()),
        }
    }
    Ok(perms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_script() {
        let script = "\
# demo workload
alloc 1

perm 1 10 rw-
read 1 10
write 1 10
exec 1 20
pagetable 1
frames
faults
free 1
";
        let workload = Workload::parse(script).unwrap();
        assert_eq!(
            workload.commands,
            vec![
                Command::Alloc { pid: 1 },
                Command::SetPerms {
                    pid: 1,
                    vpn: 10,
                    perms: PagePermissions::READ | PagePermissions::WRITE
                },
                Command::Access {
                    pid: 1,
                    vpn: 10,
                    access: AccessType::Read
                },
                Command::Access {
                    pid: 1,
                    vpn: 10,
                    access: AccessType::Write
                },
                Command::Access {
                    pid: 1,
                    vpn: 20,
                    access: AccessType::Execute
                },
                Command::DumpPageTable { pid: 1 },
                Command::DumpFrames,
                Command::Faults,
                Command::Free { pid: 1 },
            ]
        );
    }

    #[test]
    fn test_parse_perm_variants() {
        let perms = |s: &str| match parse_line(&format!("perm 1 0 {s}"), 1).unwrap() {
            Command::SetPerms { perms, .. } => perms,
            other => panic!("unexpected command {other:?}"),
        };
        assert_eq!(perms("---"), PagePermissions::empty());
        assert_eq!(perms("r--"), PagePermissions::READ);
        assert_eq!(perms("-w-"), PagePermissions::WRITE);
        assert_eq!(perms("--x"), PagePermissions::EXECUTE);
        assert_eq!(perms("rwx"), PagePermissions::all());
    }

    #[test]
    fn test_parse_rejects_bad_permissions() {
        assert!(matches!(
            parse_line("perm 1 0 rw", 4),
            Err(ParseError::BadPermissions { line: 4, .. })
        ));
        assert!(matches!(
            parse_line("perm 1 0 wrx", 1),
            Err(ParseError::BadPermissions { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        let err = parse_line("touch 1 2", 7).unwrap_err();
        assert!(matches!(err, ParseError::UnknownCommand { line: 7, .. }));
        assert!(err.to_string().contains("touch"));
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(matches!(
            parse_line("read 1", 2),
            Err(ParseError::BadArity { line: 2, .. })
        ));
        assert!(matches!(
            parse_line("frames 1", 3),
            Err(ParseError::BadArity { line: 3, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_number() {
        assert!(matches!(
            parse_line("alloc one", 1),
            Err(ParseError::BadNumber { .. })
        ));
        assert!(matches!(
            parse_line("read 1 -3", 1),
            Err(ParseError::BadNumber { .. })
        ));
    }

    #[test]
    fn test_parse_error_lines_are_one_based() {
        let script = "alloc 1\nbogus\n";
        let err = Workload::parse(script).unwrap_err();
        assert!(matches!(err, ParseError::UnknownCommand { line: 2, .. }));
    }

    #[test]
    fn test_parse_trace() {
        let trace = parse_trace("7 0 1 2\n# gap\n0 3\n").unwrap();
        assert_eq!(trace, vec![7, 0, 1, 2, 0, 3]);
    }

    #[test]
    fn test_parse_trace_empty() {
        assert!(parse_trace("").unwrap().is_empty());
        assert!(parse_trace("# only a comment\n").unwrap().is_empty());
    }
}

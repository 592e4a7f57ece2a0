//! Parsing of `stat` output from remote hosts.
//!
//! GNU coreutils is asked for terse output (`stat -t`), BSD stat for raw
//! output (`stat -r`). Both report the full `st_mode`; GNU in hex, BSD in
//! octal.

use crate::error::{Error, Result};
use crate::types::FileInfo;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

static GNU_TERSE: OnceLock<Regex> = OnceLock::new();
static BSD_RAW: OnceLock<Regex> = OnceLock::new();

/// Arguments that make `stat` print the format [`parse`] understands.
pub fn stat_args(os: &str) -> &'static [&'static str] {
    if is_bsd(os) { &["-r"] } else { &["-t"] }
}

fn is_bsd(os: &str) -> bool {
    matches!(os, "openbsd" | "freebsd" | "netbsd" | "darwin")
}

/// Parse one line of stat output for `path` on a host running `os`.
pub fn parse(os: &str, path: &str, output: &str) -> Result<FileInfo> {
    let line = output.trim_end_matches('\n');
    if is_bsd(os) {
        parse_bsd(path, line)
    } else {
        parse_gnu(path, line)
    }
}

// %n %s %b %f %u %g %D %i %h %t %T %X %Y %Z %W %o
fn parse_gnu(path: &str, line: &str) -> Result<FileInfo> {
    let re = GNU_TERSE.get_or_init(|| {
        Regex::new(
            r"^(.*) (\d+) \d+ ([0-9a-fA-F]+) (\d+) (\d+) [0-9a-fA-F]+ \d+ \d+ [0-9a-fA-F]+ [0-9a-fA-F]+ \d+ (\d+) \d+ \d+ \d+$",
        )
        .expect("valid regex")
    });
    let caps = re
        .captures(line)
        .ok_or_else(|| Error::Parse(format!("unexpected stat output: {line}")))?;

    Ok(FileInfo {
        name: base_name(path),
        size: number(&caps[2], 10)?,
        mode: number(&caps[3], 16)?,
        uid: number(&caps[4], 10)?,
        gid: number(&caps[5], 10)?,
        modified: timestamp(&caps[6])?,
    })
}

// %d %i %p %l %u %g %r %z %a %m %c %B %k %b %f %N
fn parse_bsd(path: &str, line: &str) -> Result<FileInfo> {
    let re = BSD_RAW.get_or_init(|| {
        Regex::new(r"^\d+ \d+ 0?(\d+) \d+ (\d+) (\d+) \d+ (\d+) \d+ (\d+) \d+ \d+ \d+ \d+ (.*)$")
            .expect("valid regex")
    });
    let caps = re
        .captures(line)
        .ok_or_else(|| Error::Parse(format!("unexpected stat output: {line}")))?;

    Ok(FileInfo {
        name: base_name(path),
        mode: number(&caps[1], 8)?,
        uid: number(&caps[2], 10)?,
        gid: number(&caps[3], 10)?,
        size: number(&caps[4], 10)?,
        modified: timestamp(&caps[5])?,
    })
}

fn number<T: TryFrom<u64>>(digits: &str, radix: u32) -> Result<T> {
    u64::from_str_radix(digits, radix)
        .ok()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| Error::Parse(format!("bad number in stat output: {digits}")))
}

fn timestamp(secs: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = number(secs, 10)?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Parse(format!("bad timestamp in stat output: {secs}")))
}

/// Last component of a slash-separated path.
pub fn base_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gnu_regular_file() {
        let out = "/etc/my motd 27 8 81a4 0 0 fd01 1311 1 0 0 1700000000 1700000100 1700000100 1690000000 4096\n";
        let info = parse("linux", "/etc/my motd", out).unwrap();
        assert_eq!(info.name, "my motd");
        assert_eq!(info.size, 27);
        assert_eq!(info.mode, 0o100_644);
        assert!(!info.is_dir());
        assert_eq!(info.uid, 0);
        assert_eq!(info.modified.timestamp(), 1_700_000_100);
    }

    #[test]
    fn test_parse_gnu_directory() {
        let out = "/srv 4096 8 41ed 1000 100 fd01 2 3 0 0 1700000000 1700000200 1700000200 0 4096";
        let info = parse("linux", "/srv", out).unwrap();
        assert!(info.is_dir());
        assert_eq!(info.permissions(), 0o755);
        assert_eq!(info.uid, 1000);
        assert_eq!(info.gid, 100);
        assert_eq!(info.modified.timestamp(), 1_700_000_200);
    }

    #[test]
    fn test_parse_bsd() {
        let out = "1035 52101 0100600 1 0 0 0 512 1700000000 1700000300 1700000300 1700000000 16384 4 0 /etc/master.passwd";
        let info = parse("openbsd", "/etc/master.passwd", out).unwrap();
        assert_eq!(info.name, "master.passwd");
        assert_eq!(info.permissions(), 0o600);
        assert_eq!(info.size, 512);
        assert_eq!(info.modified.timestamp(), 1_700_000_300);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse("linux", "/x", "nope"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/etc/passwd"), "passwd");
        assert_eq!(base_name("/etc/"), "etc");
        assert_eq!(base_name("/"), "/");
    }
}

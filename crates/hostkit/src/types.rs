//! Plain data exchanged with a host.

use chrono::{DateTime, Utc};
use std::fmt;

/// File type mask of `st_mode`
pub const S_IFMT: u32 = 0o170_000;
/// Directory bit of `st_mode`
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file bit of `st_mode`
pub const S_IFREG: u32 = 0o100_000;

/// Metadata for a path on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Base name of the path
    pub name: String,
    pub size: u64,
    /// Full `st_mode`, including the file type bits
    pub mode: u32,
    pub modified: DateTime<Utc>,
    pub uid: u32,
    pub gid: u32,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Permission bits, including setuid/setgid/sticky
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Basic facts about a host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    /// Raw `uname -a` line
    pub uname: String,
    pub hostname: String,
    /// Lowercased kernel name: "linux", "openbsd", ...
    pub os: String,
    pub kernel: String,
    pub arch: String,
}

impl Info {
    /// Parse the output of `uname -a`.
    pub fn from_uname(uname: &str) -> Option<Self> {
        let uname = uname.trim();
        let chunks: Vec<&str> = uname.split_whitespace().collect();
        if chunks.len() < 5 {
            return None;
        }
        let os = chunks[0].to_lowercase();
        let arch = if os == "openbsd" {
            chunks[4]
        } else {
            chunks[chunks.len() - 2]
        };
        Some(Self {
            uname: uname.to_string(),
            hostname: chunks[1].to_string(),
            kernel: chunks[2].to_string(),
            arch: arch.to_string(),
            os,
        })
    }
}

/// A user account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub uid: u32,
    /// Primary group name
    pub group: String,
    /// Supplementary group names, sorted
    pub groups: Vec<String>,
    pub home: String,
    pub shell: String,
}

/// A group account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
}

/// A password hash entry from the shadow database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Password {
    pub name: String,
    /// crypt(3) hash, or a lock marker such as `!` or `*`
    pub crypt: String,
}

/// A command to execute on a host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment, as `KEY=value`
    pub env: Vec<String>,
    /// Working directory
    pub dir: Option<String>,
    pub stdin: Option<Vec<u8>>,
    /// Safe to run during a dry run: the command does not change the host
    pub read_only: bool,
}

impl Cmd {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A command that only inspects the host.
    pub fn read_only<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            read_only: true,
            ..Self::new(program, args)
        }
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, var: impl Into<String>) -> Self {
        self.env.push(var.into());
        self
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Render as a single shell command line.
    pub fn to_shell(&self) -> String {
        let mut line = String::new();
        if let Some(dir) = &self.dir {
            line.push_str("cd ");
            line.push_str(&crate::shell::quote(dir));
            line.push_str(" && ");
        }
        for var in &self.env {
            match var.split_once('=') {
                Some((key, value)) => {
                    line.push_str(key);
                    line.push('=');
                    line.push_str(&crate::shell::quote(value));
                }
                None => line.push_str(&crate::shell::quote(var)),
            }
            line.push(' ');
        }
        line.push_str(&crate::shell::quote(&self.program));
        for arg in &self.args {
            line.push(' ');
            line.push_str(&crate::shell::quote(arg));
        }
        line
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Captured result of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_from_linux_uname() {
        let info = Info::from_uname(
            "Linux web1 6.1.0-18-amd64 #1 SMP PREEMPT_DYNAMIC Debian 6.1.76-1 (2024-02-01) x86_64 GNU/Linux\n",
        )
        .unwrap();
        assert_eq!(info.os, "linux");
        assert_eq!(info.hostname, "web1");
        assert_eq!(info.kernel, "6.1.0-18-amd64");
        assert_eq!(info.arch, "x86_64");
    }

    #[test]
    fn test_info_from_openbsd_uname() {
        let info = Info::from_uname("OpenBSD gw 7.4 GENERIC.MP#1397 amd64").unwrap();
        assert_eq!(info.os, "openbsd");
        assert_eq!(info.hostname, "gw");
        assert_eq!(info.arch, "amd64");
    }

    #[test]
    fn test_info_rejects_short_output() {
        assert!(Info::from_uname("Linux").is_none());
    }

    #[test]
    fn test_file_info_mode_bits() {
        let info = FileInfo {
            name: "etc".into(),
            size: 4096,
            mode: S_IFDIR | 0o1755,
            modified: Utc::now(),
            uid: 0,
            gid: 0,
        };
        assert!(info.is_dir());
        assert_eq!(info.permissions(), 0o1755);
    }

    #[test]
    fn test_cmd_to_shell_quotes() {
        let cmd = Cmd::new("echo", ["hello world", "it's"])
            .env("LANG=C")
            .dir("/tmp");
        assert_eq!(
            cmd.to_shell(),
            r"cd /tmp && LANG=C echo 'hello world' 'it'\''s'"
        );
    }
}

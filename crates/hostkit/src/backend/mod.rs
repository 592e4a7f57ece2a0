use std::fmt;
use std::io::{Cursor, Read};

use crate::error::{Error, Result};
use crate::types::{Cmd, CmdOutput, FileInfo, Group, Info, Password, User};

pub mod dry;
pub mod local;
pub mod remote;

/// Primitive operations against one host
///
/// Implemented by:
/// - [`local::LocalTransport`]: the machine we run on
/// - [`remote::RemoteTransport`]: a machine reached through a session pool
/// - [`dry::DryTransport`]: an in-memory overlay over either of the above
///
/// Paths are absolute, slash-separated strings. A missing path or account
/// is always reported as [`Error::NotFound`].
pub trait Transport: Send + Sync + fmt::Display {
    /// Hostname, kernel and architecture
    fn info(&self) -> Result<Info>;

    /// Per-run scratch directory, created on first use
    fn tmp_dir(&self) -> Result<String>;

    /// Remove the scratch directory and everything in it
    fn cleanup(&self) -> Result<()>;

    /// Run a command and capture its output, whatever its exit status
    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput>;

    fn stat(&self, path: &str) -> Result<FileInfo>;

    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Names of the entries in a directory, sorted, without `.` and `..`
    fn read_dir(&self, path: &str) -> Result<Vec<String>>;

    /// Create or truncate a file. An existing file keeps its mode and
    /// owner; a new one gets 0644 and the transport's user.
    fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Remove a file or an empty directory
    fn remove(&self, path: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;

    /// Create a directory and any missing parents. Succeeds if it exists.
    fn mkdir_all(&self, path: &str, mode: u32) -> Result<()>;

    fn user(&self, name: &str) -> Result<User>;
    fn create_user(&self, user: &User) -> Result<()>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, name: &str) -> Result<()>;

    fn group(&self, name: &str) -> Result<Group>;
    fn create_group(&self, group: &Group) -> Result<()>;
    fn update_group(&self, group: &Group) -> Result<()>;
    fn delete_group(&self, name: &str) -> Result<()>;

    fn password(&self, name: &str) -> Result<Password>;
    fn update_password(&self, password: &Password) -> Result<()>;

    /// Open a file for reading
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read_file(path)?)))
    }

    /// Allocate an empty file inside [`Transport::tmp_dir`]
    fn tmp_file(&self, prefix: &str) -> Result<String> {
        let dir = self.tmp_dir()?;
        let path = format!("{dir}/{prefix}{}", unique_suffix());
        self.write_file(&path, &[])?;
        Ok(path)
    }

    /// Run a command, turning a non-zero exit into [`Error::Command`]
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        let output = self.exec(cmd)?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::Command {
                command: cmd.to_shell(),
                status: output.status,
                stderr: output.stderr_str().trim().to_string(),
            })
        }
    }

    /// Whether `path` exists
    fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn unique_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = chrono::Utc::now().timestamp_subsec_nanos();
    format!(
        "{}_{nanos:08x}",
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Parent directory of a slash-separated absolute path, if it has one.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent() {
        assert_eq!(parent("/etc/ssh/sshd_config"), Some("/etc/ssh"));
        assert_eq!(parent("/etc/"), Some("/"));
        assert_eq!(parent("/etc"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(parent("relative"), None);
    }

    #[test]
    fn test_unique_suffix_differs() {
        assert_ne!(unique_suffix(), unique_suffix());
    }
}

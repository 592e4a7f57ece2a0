//! Transport for a remote host.
//!
//! Every operation becomes a shell command sent through a [`SessionPool`].
//! Output of `stat`, `uname` and the account databases is parsed textually,
//! and the usual "No such file or directory" complaints on stderr are turned
//! back into [`Error::NotFound`] so callers see the same error shapes as
//! with the local transport.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use super::Transport;
use super::local::LocalTransport;
use crate::accounts::AccountDb;
use crate::commands;
use crate::error::{Error, Result};
use crate::stat;
use crate::types::{Cmd, CmdOutput, FileInfo, Group, Info, Password, User};

/// Provides command execution on remote targets
///
/// Connection setup, reuse and authentication are the pool's business; the
/// transport only hands it shell command lines.
pub trait SessionPool: Send + Sync {
    /// Run `command` through `sh` on `target`, feeding `stdin` if given
    fn run(&self, target: &str, command: &str, stdin: Option<&[u8]>) -> Result<CmdOutput>;
}

/// Session pool backed by the OpenSSH client
///
/// Connections are multiplexed with `ControlMaster`, so each target gets one
/// authenticated connection that later commands reuse.
#[derive(Debug)]
pub struct SshPool {
    control_dir: String,
    persist_secs: u64,
    options: Vec<String>,
    local: LocalTransport,
}

impl SshPool {
    /// Create a pool whose control sockets live in `control_dir`.
    pub fn new(control_dir: impl Into<String>) -> Self {
        Self {
            control_dir: control_dir.into(),
            persist_secs: 60,
            options: Vec::new(),
            local: LocalTransport::new(),
        }
    }

    /// How long an idle master connection stays open
    pub fn persist(mut self, secs: u64) -> Self {
        self.persist_secs = secs;
        self
    }

    /// Extra `-o` options passed to every ssh invocation
    pub fn options(mut self, options: impl IntoIterator<Item = String>) -> Self {
        self.options.extend(options);
        self
    }

    fn args(&self, target: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}/%C", self.control_dir),
            "-o".to_string(),
            format!("ControlPersist={}", self.persist_secs),
        ];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        let (host, port) = split_port(target);
        if let Some(port) = port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(host.to_string());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

impl SessionPool for SshPool {
    fn run(&self, target: &str, command: &str, stdin: Option<&[u8]>) -> Result<CmdOutput> {
        let mut cmd = Cmd::new("ssh", self.args(target, command));
        if let Some(input) = stdin {
            cmd = cmd.stdin(input);
        }
        let output = self.local.exec(&cmd)?;
        // ssh itself exits with 255 when the connection fails
        if output.status == 255 {
            return Err(Error::Session(format!(
                "{target}: {}",
                output.stderr_str().trim()
            )));
        }
        Ok(output)
    }
}

/// Split `user@host:port` into `user@host` and the port.
fn split_port(target: &str) -> (&str, Option<u16>) {
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (target, None),
        },
        _ => (target, None),
    }
}

/// A host reached through a [`SessionPool`]
pub struct RemoteTransport {
    target: String,
    pool: Arc<dyn SessionPool>,
    info: Mutex<Option<Info>>,
    tmp: Mutex<Option<String>>,
    accounts: AccountDb,
}

impl RemoteTransport {
    pub fn new(target: impl Into<String>, pool: Arc<dyn SessionPool>) -> Self {
        Self {
            target: target.into(),
            pool,
            info: Mutex::new(None),
            tmp: Mutex::new(None),
            accounts: AccountDb::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run a command about `path`, mapping common stderr complaints onto
    /// the matching error kinds.
    fn call(&self, op: &str, path: &str, cmd: &Cmd) -> Result<CmdOutput> {
        let output = self.exec(cmd)?;
        if output.success() {
            return Ok(output);
        }
        let stderr = output.stderr_str();
        let stderr = stderr.trim();
        if stderr.contains("No such file or directory") {
            Err(Error::not_found(op, path))
        } else if stderr.contains("Is a directory") {
            Err(Error::IsDirectory(path.to_string()))
        } else if stderr.contains("Not a directory") {
            Err(Error::NotDirectory(path.to_string()))
        } else {
            Err(Error::Command {
                command: cmd.to_shell(),
                status: output.status,
                stderr: stderr.to_string(),
            })
        }
    }
}

impl fmt::Display for RemoteTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target)
    }
}

impl fmt::Debug for RemoteTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTransport")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Transport for RemoteTransport {
    fn info(&self) -> Result<Info> {
        if let Some(info) = lock(&self.info).as_ref() {
            return Ok(info.clone());
        }
        let output = self.run(&Cmd::read_only("uname", ["-a"]))?;
        let info = Info::from_uname(&output.stdout_str()).ok_or_else(|| {
            Error::Parse(format!("unexpected uname output: {}", output.stdout_str().trim()))
        })?;
        debug!("{}: {} {} {}", self.target, info.os, info.kernel, info.arch);
        *lock(&self.info) = Some(info.clone());
        Ok(info)
    }

    fn tmp_dir(&self) -> Result<String> {
        if let Some(dir) = lock(&self.tmp).as_ref() {
            return Ok(dir.clone());
        }
        let output = self.run(&commands::mktemp_dir())?;
        let dir = output.stdout_str().trim().to_string();
        if dir.is_empty() {
            return Err(Error::Parse("mktemp printed no directory".into()));
        }
        *lock(&self.tmp) = Some(dir.clone());
        Ok(dir)
    }

    fn cleanup(&self) -> Result<()> {
        let dir = lock(&self.tmp).take();
        if let Some(dir) = dir {
            self.run(&commands::remove_tree(&dir))?;
        }
        Ok(())
    }

    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput> {
        let line = cmd.to_shell();
        debug!("{}: {line}", self.target);
        let output = self.pool.run(&self.target, &line, cmd.stdin.as_deref())?;
        trace!("{}: exit {}", self.target, output.status);
        Ok(output)
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let os = self.info()?.os;
        let mut args: Vec<String> = stat::stat_args(&os).iter().map(|a| (*a).to_string()).collect();
        args.push(path.to_string());
        let output = self.call("stat", path, &Cmd::read_only("stat", args))?;
        stat::parse(&os, path, &output.stdout_str())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.call("open", path, &Cmd::read_only("cat", [path]))?.stdout)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let output = self.call("readdir", path, &commands::list_dir(path))?;
        let mut names: Vec<String> = output
            .stdout_str()
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        self.call("create", path, &commands::write_file(path, content))
            .map(drop)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.call("remove", path, &commands::remove(path)).map(drop)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.call("rename", from, &commands::rename(from, to))
            .map(drop)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.call("chmod", path, &commands::chmod(path, mode))
            .map(drop)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.call("chown", path, &commands::chown(path, uid, gid))
            .map(drop)
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> Result<()> {
        self.call("mkdir", path, &commands::mkdir_all(path, mode))
            .map(drop)
    }

    fn user(&self, name: &str) -> Result<User> {
        self.accounts.user(self, name)
    }

    fn create_user(&self, user: &User) -> Result<()> {
        self.accounts.create_user(self, user)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        self.accounts.update_user(self, user)
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.accounts.delete_user(self, name)
    }

    fn group(&self, name: &str) -> Result<Group> {
        self.accounts.group(self, name)
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        self.accounts.create_group(self, group)
    }

    fn update_group(&self, group: &Group) -> Result<()> {
        self.accounts.update_group(self, group)
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.accounts.delete_group(self, name)
    }

    fn password(&self, name: &str) -> Result<Password> {
        self.accounts.password(self, name)
    }

    fn update_password(&self, password: &Password) -> Result<()> {
        self.accounts.update_password(self, password)
    }
}

//! Transport for the machine we are running on.

use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use chrono::DateTime;
use log::debug;

use super::{Transport, unique_suffix};
use crate::accounts::AccountDb;
use crate::error::{Error, Result};
use crate::stat::base_name;
use crate::types::{Cmd, CmdOutput, FileInfo, Group, Info, Password, User};

/// Local host, every operation maps onto the matching OS call
#[derive(Debug, Default)]
pub struct LocalTransport {
    accounts: AccountDb,
    tmp: Mutex<Option<String>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("local")
    }
}

fn field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Transport for LocalTransport {
    fn info(&self) -> Result<Info> {
        use std::mem::MaybeUninit;

        // SAFETY: uname fills the struct on success; we check the return
        // value before reading it.
        let uts = unsafe {
            let mut uts: MaybeUninit<libc::utsname> = MaybeUninit::uninit();
            if libc::uname(uts.as_mut_ptr()) != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            uts.assume_init()
        };

        let sysname = field(&uts.sysname);
        let hostname = field(&uts.nodename);
        let kernel = field(&uts.release);
        let arch = field(&uts.machine);
        Ok(Info {
            uname: format!("{sysname} {hostname} {kernel} {} {arch}", field(&uts.version)),
            os: sysname.to_lowercase(),
            hostname,
            kernel,
            arch,
        })
    }

    fn tmp_dir(&self) -> Result<String> {
        let mut tmp = match self.tmp.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(dir) = tmp.as_ref() {
            return Ok(dir.clone());
        }
        let dir = std::env::temp_dir()
            .join(format!("tmpsteward_{}_{}", std::process::id(), unique_suffix()))
            .to_string_lossy()
            .into_owned();
        DirBuilder::new()
            .mode(0o700)
            .create(&dir)
            .map_err(|e| Error::from_io("mkdir", &dir, e))?;
        *tmp = Some(dir.clone());
        Ok(dir)
    }

    fn cleanup(&self) -> Result<()> {
        let dir = match self.tmp.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(dir) = dir {
            debug!("local: removing {dir}");
            fs::remove_dir_all(&dir).map_err(|e| Error::from_io("cleanup", &dir, e))?;
        }
        Ok(())
    }

    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput> {
        debug!("local: {cmd}");
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for var in &cmd.env {
            if let Some((key, value)) = var.split_once('=') {
                command.env(key, value);
            }
        }
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        command
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::from_io("exec", &cmd.program, e))?;

        // Feed stdin from a separate thread so a chatty child cannot fill
        // its stdout pipe while we are still writing.
        let writer = match (child.stdin.take(), cmd.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(std::thread::spawn(move || {
                pipe.write_all(&input)
            })),
            _ => None,
        };

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The child may exit without reading all of its input.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_) => return Err(Error::Session("stdin writer panicked".into())),
            }
        }

        Ok(CmdOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let meta = fs::metadata(path).map_err(|e| Error::from_io("stat", path, e))?;
        Ok(FileInfo {
            name: base_name(path),
            size: meta.size(),
            mode: meta.mode(),
            modified: DateTime::from_timestamp(meta.mtime(), 0).unwrap_or_default(),
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::from_io("open", path, e))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| Error::from_io("readdir", path, e))? {
            let entry = entry.map_err(|e| Error::from_io("readdir", path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
            .map_err(|e| Error::from_io("create", path, e))?;
        file.write_all(content)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| Error::from_io("remove", path, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| Error::from_io("remove", path, e))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(from, to).map_err(|e| Error::from_io("rename", from, e))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|e| Error::from_io("chmod", path, e))
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
            .map_err(|e| Error::from_io("chown", path, e))
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .map_err(|e| Error::from_io("mkdir", path, e))
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

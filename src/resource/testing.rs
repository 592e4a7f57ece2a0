//! Test helpers: a scripted fake host and a one-shot run

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use declarative::{BoxedResource, Host, Report, Run, RunOptions, Silent};
use hostkit::{
    Cmd, CmdOutput, Error, FileInfo, Group, Info, Password, Result, Transport, User, commands,
};

/// Answers commands from a script and accounts from a fixed table
///
/// Account changes are logged as the commands a real host would run; file
/// operations are refused.
pub struct ScriptedHost {
    uname: String,
    statuses: Mutex<HashMap<String, i32>>,
    log: Mutex<Vec<String>>,
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    passwords: HashMap<String, Password>,
}

impl ScriptedHost {
    pub fn new(uname: &str) -> Self {
        Self {
            uname: uname.to_string(),
            statuses: Mutex::default(),
            log: Mutex::default(),
            users: HashMap::new(),
            groups: HashMap::new(),
            passwords: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: User, crypt: &str) -> Self {
        self.passwords.insert(
            user.name.clone(),
            Password {
                name: user.name.clone(),
                crypt: crypt.to_string(),
            },
        );
        self.users.insert(user.name.clone(), user);
        self
    }

    pub fn with_group(mut self, name: &str, gid: u32) -> Self {
        let group = Group {
            name: name.to_string(),
            gid,
        };
        self.groups.insert(group.name.clone(), group);
        self
    }

    pub fn linux() -> Self {
        Self::new("Linux box 6.1.0 #1 SMP x86_64 GNU/Linux")
    }

    /// Exit status for a command line; unscripted commands succeed
    pub fn respond(&self, command: &str, status: i32) {
        self.statuses
            .lock()
            .unwrap()
            .insert(command.to_string(), status);
    }

    /// Commands executed so far
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn refuse<T>(&self, op: &str) -> Result<T> {
        Err(Error::Unsupported(format!("{op} on scripted host")))
    }
}

impl fmt::Display for ScriptedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scripted")
    }
}

impl Transport for ScriptedHost {
    fn info(&self) -> Result<Info> {
        Info::from_uname(&self.uname).ok_or_else(|| Error::Parse(self.uname.clone()))
    }

    fn tmp_dir(&self) -> Result<String> {
        Ok("/tmp".to_string())
    }

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput> {
        let line = cmd.to_shell();
        let status = self.statuses.lock().unwrap().get(&line).copied().unwrap_or(0);
        self.log.lock().unwrap().push(line);
        Ok(CmdOutput {
            status,
            ..CmdOutput::default()
        })
    }

    fn stat(&self, _path: &str) -> Result<FileInfo> {
        self.refuse("stat")
    }

    fn read_file(&self, _path: &str) -> Result<Vec<u8>> {
        self.refuse("read")
    }

    fn read_dir(&self, _path: &str) -> Result<Vec<String>> {
        self.refuse("readdir")
    }

    fn write_file(&self, _path: &str, _content: &[u8]) -> Result<()> {
        self.refuse("write")
    }

    fn remove(&self, _path: &str) -> Result<()> {
        self.refuse("remove")
    }

    fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        self.refuse("rename")
    }

    fn chmod(&self, _path: &str, _mode: u32) -> Result<()> {
        self.refuse("chmod")
    }

    fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<()> {
        self.refuse("chown")
    }

    fn mkdir_all(&self, _path: &str, _mode: u32) -> Result<()> {
        self.refuse("mkdir")
    }

    fn user(&self, name: &str) -> Result<User> {
        self.users
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("user", name))
    }

    fn create_user(&self, user: &User) -> Result<()> {
        self.run(&commands::useradd(user)).map(drop)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let current = self.user(&user.name)?;
        match commands::usermod(&current, user) {
            Some(cmd) => self.run(&cmd).map(drop),
            None => Ok(()),
        }
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.run(&commands::userdel(name)).map(drop)
    }

    fn group(&self, name: &str) -> Result<Group> {
        self.groups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("group", name))
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        self.run(&commands::groupadd(group)).map(drop)
    }

    fn update_group(&self, group: &Group) -> Result<()> {
        self.run(&commands::groupmod(group)).map(drop)
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.run(&commands::groupdel(name)).map(drop)
    }

    fn password(&self, name: &str) -> Result<Password> {
        self.passwords
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("password", name))
    }

    fn update_password(&self, password: &Password) -> Result<()> {
        self.run(&commands::set_password(password)).map(drop)
    }
}

/// Run `resources` once against `transport`
pub fn run_on(transport: Arc<dyn Transport>, dry_run: bool, resources: Vec<BoxedResource>) -> Report {
    let run = Run::new(RunOptions {
        dry_run,
        ..RunOptions::default()
    });
    for resource in resources {
        run.declare(resource).unwrap();
    }
    run.set_hosts(vec![Host::new("test", None, transport)]).unwrap();
    run.execute(&Silent).unwrap()
}

/// Statuses (or outcome labels) by resource name, in declaration-independent order
pub fn labels(report: &Report) -> Vec<(String, &'static str)> {
    let mut labels: Vec<_> = report
        .records
        .iter()
        .map(|r| (r.name.clone(), r.outcome.label()))
        .collect();
    labels.sort();
    labels
}

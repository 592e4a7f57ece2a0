//! Dry-run overlay.
//!
//! [`DryTransport`] wraps a real transport (the cascade) and never mutates
//! it. Writes land in an in-memory overlay keyed by path or account name;
//! reads consult the overlay first and fall through to the cascade only for
//! entries this run has not touched. A deleted entry is kept as a tombstone
//! (`None`) so later reads do not fall through and see the stale original.
//!
//! Mutations are logged as the command the remote transport would have run.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::info;

use super::{Transport, parent, unique_suffix};
use crate::commands;
use crate::error::{Error, Result};
use crate::stat::base_name;
use crate::types::{Cmd, CmdOutput, FileInfo, Group, Info, Password, S_IFDIR, S_IFMT, S_IFREG, User};

#[derive(Debug, Clone)]
struct VirtualFile {
    info: FileInfo,
    /// `None` when only metadata changed; content is then read from the
    /// cascade.
    content: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Overlay {
    files: HashMap<String, Option<VirtualFile>>,
    users: HashMap<String, Option<User>>,
    groups: HashMap<String, Option<Group>>,
    passwords: HashMap<String, Option<Password>>,
    tmp: Option<String>,
}

/// Simulating transport layered over a real one
pub struct DryTransport {
    cascade: Arc<dyn Transport>,
    overlay: Mutex<Overlay>,
    owner: (u32, u32),
}

impl DryTransport {
    /// Wrap `cascade`. New files are attributed to root unless
    /// [`DryTransport::with_owner`] says otherwise.
    pub fn new(cascade: Arc<dyn Transport>) -> Self {
        Self {
            cascade,
            overlay: Mutex::new(Overlay::default()),
            owner: (0, 0),
        }
    }

    /// Owner given to files and directories created during the run
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = (uid, gid);
        self
    }

    pub fn cascade(&self) -> &Arc<dyn Transport> {
        &self.cascade
    }

    fn overlay(&self) -> MutexGuard<'_, Overlay> {
        match self.overlay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn simulate(&self, cmd: &Cmd) {
        match &cmd.stdin {
            Some(input) => info!("{self}: dry run: {cmd} <<< {} bytes", input.len()),
            None => info!("{self}: dry run: {cmd}"),
        }
    }

    /// Current state of `path`: overlay first, then the cascade.
    ///
    /// `Ok(None)` means the path does not exist. The caller holds the
    /// overlay, so this is for read-then-write paths only.
    fn lookup(&self, overlay: &Overlay, path: &str) -> Result<Option<VirtualFile>> {
        match cached(overlay, path) {
            Some(entry) => Ok(entry),
            None => self.stat_cascade(path),
        }
    }

    /// Like [`DryTransport::lookup`], with the overlay released before the
    /// cascade is asked.
    fn fetch(&self, path: &str) -> Result<Option<VirtualFile>> {
        let known = cached(&self.overlay(), path);
        match known {
            Some(entry) => Ok(entry),
            None => self.stat_cascade(path),
        }
    }

    fn stat_cascade(&self, path: &str) -> Result<Option<VirtualFile>> {
        match self.cascade.stat(path) {
            Ok(info) => Ok(Some(VirtualFile { info, content: None })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Entries of `dir` in the cascade. A directory that exists only in
    /// the overlay has none there.
    fn cascade_children(&self, dir: &str, in_overlay: bool) -> Result<Vec<String>> {
        match self.cascade.read_dir(dir) {
            Ok(names) => Ok(names),
            Err(e) if in_overlay && (e.is_not_found() || matches!(e, Error::NotDirectory(_))) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn new_info(&self, path: &str, mode: u32, size: u64) -> FileInfo {
        FileInfo {
            name: base_name(path),
            size,
            mode,
            modified: Utc::now(),
            uid: self.owner.0,
            gid: self.owner.1,
        }
    }

    /// Read the full content of an existing entry.
    fn content_of(&self, path: &str, file: &VirtualFile) -> Result<Vec<u8>> {
        match &file.content {
            Some(content) => Ok(content.clone()),
            None => self.cascade.read_file(path),
        }
    }

    /// Change the metadata of an existing path.
    fn update_info(
        &self,
        op: &str,
        path: &str,
        cmd: &Cmd,
        change: impl FnOnce(&mut FileInfo),
    ) -> Result<()> {
        let path = normalize(path);
        let mut overlay = self.overlay();
        let mut file = self
            .lookup(&overlay, &path)?
            .ok_or_else(|| Error::not_found(op, path.as_str()))?;
        change(&mut file.info);
        overlay.files.insert(path, Some(file));
        drop(overlay);
        self.simulate(cmd);
        Ok(())
    }
}

impl fmt::Display for DryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cascade, f)
    }
}

impl fmt::Debug for DryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryTransport")
            .field("cascade", &self.cascade.to_string())
            .finish_non_exhaustive()
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// What the overlay alone says about `path`; `None` leaves it to the cascade.
fn cached(overlay: &Overlay, path: &str) -> Option<Option<VirtualFile>> {
    if let Some(entry) = overlay.files.get(path) {
        return Some(entry.clone());
    }
    buried(overlay, path).then_some(None)
}

/// Overlay entries directly inside `dir`, and whether each still exists
fn overlay_children(overlay: &Overlay, dir: &str) -> Vec<(String, bool)> {
    overlay
        .files
        .iter()
        .filter(|(path, _)| parent(path) == Some(dir))
        .map(|(path, entry)| (base_name(path), entry.is_some()))
        .collect()
}

/// Cascade listing with the overlay's additions and tombstones applied
fn merge_children(listed: Vec<String>, inside: Vec<(String, bool)>) -> Vec<String> {
    let mut names: BTreeSet<String> = listed.into_iter().collect();
    for (name, present) in inside {
        if present {
            names.insert(name);
        } else {
            names.remove(&name);
        }
    }
    names.into_iter().collect()
}

/// Whether an ancestor of `path` was deleted during this run.
fn buried(overlay: &Overlay, path: &str) -> bool {
    let mut current = parent(path);
    while let Some(dir) = current {
        if matches!(overlay.files.get(dir), Some(None)) {
            return true;
        }
        current = parent(dir);
    }
    false
}

fn is_under(path: &str, dir: &str) -> bool {
    (dir == "/" && path != "/")
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

impl Transport for DryTransport {
    fn info(&self) -> Result<Info> {
        self.cascade.info()
    }

    fn tmp_dir(&self) -> Result<String> {
        let mut overlay = self.overlay();
        if let Some(dir) = &overlay.tmp {
            return Ok(dir.clone());
        }
        let dir = format!("/tmp/tmpsteward_dry_{}", unique_suffix());
        let info = self.new_info(&dir, S_IFDIR | 0o700, 0);
        overlay.files.insert(dir.clone(), Some(VirtualFile { info, content: None }));
        overlay.tmp = Some(dir.clone());
        Ok(dir)
    }

    fn cleanup(&self) -> Result<()> {
        let mut overlay = self.overlay();
        if let Some(dir) = overlay.tmp.take() {
            overlay.files.retain(|path, _| !is_under(path, &dir));
            overlay.files.insert(dir, None);
        }
        Ok(())
    }

    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput> {
        if cmd.read_only {
            return self.cascade.exec(cmd);
        }
        self.simulate(cmd);
        Ok(CmdOutput::default())
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let path = normalize(path);
        self.fetch(&path)?
            .map(|file| file.info)
            .ok_or_else(|| Error::not_found("stat", path))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        let file = self
            .fetch(&path)?
            .ok_or_else(|| Error::not_found("open", path.as_str()))?;
        if file.info.is_dir() {
            return Err(Error::IsDirectory(path));
        }
        self.content_of(&path, &file)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path);
        let (entry, inside) = {
            let overlay = self.overlay();
            (cached(&overlay, &path), overlay_children(&overlay, &path))
        };
        let in_overlay = match entry {
            Some(None) => return Err(Error::not_found("readdir", path)),
            Some(Some(file)) if !file.info.is_dir() => return Err(Error::NotDirectory(path)),
            Some(Some(_)) => true,
            None => false,
        };
        let listed = self.cascade_children(&path, in_overlay)?;
        Ok(merge_children(listed, inside))
    }

    fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = normalize(path);
        let mut overlay = self.overlay();

        if let Some(dir) = parent(&path) {
            match self.lookup(&overlay, dir)? {
                Some(parent) if parent.info.is_dir() => {}
                Some(_) => return Err(Error::NotDirectory(dir.to_string())),
                None => return Err(Error::not_found("create", path.as_str())),
            }
        }

        let mut info = match self.lookup(&overlay, &path)? {
            Some(existing) if existing.info.is_dir() => return Err(Error::IsDirectory(path)),
            Some(existing) => existing.info,
            None => self.new_info(&path, S_IFREG | 0o644, 0),
        };
        info.size = content.len() as u64;
        info.modified = Utc::now();

        overlay.files.insert(
            path.clone(),
            Some(VirtualFile {
                info,
                content: Some(content.to_vec()),
            }),
        );
        drop(overlay);
        self.simulate(&commands::write_file(&path, content));
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut overlay = self.overlay();
        let file = self
            .lookup(&overlay, &path)?
            .ok_or_else(|| Error::not_found("remove", path.as_str()))?;

        if file.info.is_dir() {
            let listed = self.cascade_children(&path, overlay.files.contains_key(&path))?;
            let remaining = merge_children(listed, overlay_children(&overlay, &path));
            if !remaining.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    format!("{path}: directory not empty"),
                )));
            }
        }

        overlay.files.insert(path.clone(), None);
        drop(overlay);
        self.simulate(&commands::remove(&path));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from);
        let to = normalize(to);
        let mut overlay = self.overlay();
        let mut file = self
            .lookup(&overlay, &from)?
            .ok_or_else(|| Error::not_found("rename", from.as_str()))?;

        if file.info.is_dir() {
            let moved: Vec<(String, Option<VirtualFile>)> = overlay
                .files
                .iter()
                .filter(|(p, _)| is_under(p, &from))
                .map(|(p, entry)| (format!("{to}{}", &p[from.len()..]), entry.clone()))
                .collect();
            overlay.files.retain(|p, _| !is_under(p, &from));
            overlay.files.extend(moved);
        } else {
            file.content = Some(self.content_of(&from, &file)?);
        }

        file.info.name = base_name(&to);
        overlay.files.insert(to.clone(), Some(file));
        overlay.files.insert(from.clone(), None);
        drop(overlay);
        self.simulate(&commands::rename(&from, &to));
        Ok(())
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.update_info("chmod", path, &commands::chmod(path, mode), |info| {
            info.mode = (info.mode & S_IFMT) | (mode & 0o7777);
        })
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.update_info("chown", path, &commands::chown(path, uid, gid), |info| {
            info.uid = uid;
            info.gid = gid;
        })
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> Result<()> {
        let path = normalize(path);
        let mut overlay = self.overlay();

        // Collect missing directories from the leaf upwards
        let mut missing = Vec::new();
        let mut current = Some(path.as_str());
        while let Some(dir) = current {
            match self.lookup(&overlay, dir)? {
                Some(existing) if existing.info.is_dir() => break,
                Some(_) => return Err(Error::NotDirectory(dir.to_string())),
                None => missing.push(dir.to_string()),
            }
            current = parent(dir);
        }

        if missing.is_empty() {
            return Ok(());
        }
        for dir in missing.iter().rev() {
            let info = self.new_info(dir, S_IFDIR | (mode & 0o7777), 0);
            overlay
                .files
                .insert(dir.clone(), Some(VirtualFile { info, content: None }));
        }
        drop(overlay);
        self.simulate(&commands::mkdir_all(&path, mode));
        Ok(())
    }

    fn user(&self, name: &str) -> Result<User> {
        let known = self.overlay().users.get(name).cloned();
        match known {
            Some(Some(user)) => Ok(user),
            Some(None) => Err(Error::not_found("user", name)),
            None => self.cascade.user(name),
        }
    }

    fn create_user(&self, user: &User) -> Result<()> {
        let mut overlay = self.overlay();
        let exists = match overlay.users.get(&user.name) {
            Some(entry) => entry.is_some(),
            None => found(self.cascade.user(&user.name))?,
        };
        if exists {
            return Err(Error::AlreadyExists {
                kind: "user",
                name: user.name.clone(),
            });
        }
        overlay.users.insert(user.name.clone(), Some(user.clone()));
        // useradd leaves the account locked until a password is set
        overlay.passwords.insert(
            user.name.clone(),
            Some(Password {
                name: user.name.clone(),
                crypt: "!".to_string(),
            }),
        );
        drop(overlay);
        self.simulate(&commands::useradd(user));
        Ok(())
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let mut overlay = self.overlay();
        let current = match overlay.users.get(&user.name) {
            Some(Some(current)) => current.clone(),
            Some(None) => return Err(Error::not_found("user", user.name.as_str())),
            None => self.cascade.user(&user.name)?,
        };
        let Some(cmd) = commands::usermod(&current, user) else {
            return Ok(());
        };
        let merged = User {
            name: user.name.clone(),
            uid: user.uid,
            group: keep_if_empty(&user.group, &current.group),
            groups: user.groups.clone(),
            home: keep_if_empty(&user.home, &current.home),
            shell: keep_if_empty(&user.shell, &current.shell),
        };
        overlay.users.insert(user.name.clone(), Some(merged));
        drop(overlay);
        self.simulate(&cmd);
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        let mut overlay = self.overlay();
        match overlay.users.get(name) {
            Some(Some(_)) => {}
            Some(None) => return Err(Error::not_found("user", name)),
            None => {
                self.cascade.user(name)?;
            }
        }
        overlay.users.insert(name.to_string(), None);
        overlay.passwords.insert(name.to_string(), None);
        drop(overlay);
        self.simulate(&commands::userdel(name));
        Ok(())
    }

    fn group(&self, name: &str) -> Result<Group> {
        let known = self.overlay().groups.get(name).cloned();
        match known {
            Some(Some(group)) => Ok(group),
            Some(None) => Err(Error::not_found("group", name)),
            None => self.cascade.group(name),
        }
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        let mut overlay = self.overlay();
        let exists = match overlay.groups.get(&group.name) {
            Some(entry) => entry.is_some(),
            None => found(self.cascade.group(&group.name))?,
        };
        if exists {
            return Err(Error::AlreadyExists {
                kind: "group",
                name: group.name.clone(),
            });
        }
        overlay.groups.insert(group.name.clone(), Some(group.clone()));
        drop(overlay);
        self.simulate(&commands::groupadd(group));
        Ok(())
    }

    fn update_group(&self, group: &Group) -> Result<()> {
        let mut overlay = self.overlay();
        let current = match overlay.groups.get(&group.name) {
            Some(Some(current)) => current.clone(),
            Some(None) => return Err(Error::not_found("group", group.name.as_str())),
            None => self.cascade.group(&group.name)?,
        };
        if current.gid == group.gid {
            return Ok(());
        }
        overlay.groups.insert(group.name.clone(), Some(group.clone()));
        drop(overlay);
        self.simulate(&commands::groupmod(group));
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        let mut overlay = self.overlay();
        match overlay.groups.get(name) {
            Some(Some(_)) => {}
            Some(None) => return Err(Error::not_found("group", name)),
            None => {
                self.cascade.group(name)?;
            }
        }
        overlay.groups.insert(name.to_string(), None);
        drop(overlay);
        self.simulate(&commands::groupdel(name));
        Ok(())
    }

    fn password(&self, name: &str) -> Result<Password> {
        let known = self.overlay().passwords.get(name).cloned();
        match known {
            Some(Some(password)) => Ok(password),
            Some(None) => Err(Error::not_found("password", name)),
            None => self.cascade.password(name),
        }
    }

    fn update_password(&self, password: &Password) -> Result<()> {
        let mut overlay = self.overlay();
        match overlay.users.get(&password.name) {
            Some(Some(_)) => {}
            Some(None) => return Err(Error::not_found("user", password.name.as_str())),
            None => {
                self.cascade.user(&password.name)?;
            }
        }
        overlay
            .passwords
            .insert(password.name.clone(), Some(password.clone()));
        drop(overlay);
        self.simulate(&commands::set_password(password));
        Ok(())
    }
}

fn found<T>(lookup: Result<T>) -> Result<bool> {
    match lookup {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

fn keep_if_empty(desired: &str, current: &str) -> String {
    if desired.is_empty() { current } else { desired }.to_string()
}

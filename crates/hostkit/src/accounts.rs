//! Account databases read from `/etc/passwd`, `/etc/group` and the shadow
//! file, plus the cached account operations shared by the local and remote
//! transports.

use crate::backend::Transport;
use crate::commands;
use crate::error::{Error, Result};
use crate::types::{Group, Password, User};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const PASSWD: &str = "/etc/passwd";
pub const GROUP: &str = "/etc/group";

/// Shadow database for the given kernel name.
pub fn shadow_path(os: &str) -> &'static str {
    if os == "openbsd" {
        "/etc/master.passwd"
    } else {
        "/etc/shadow"
    }
}

/// Split a colon-separated database into rows, dropping comments and blanks.
pub fn parse_colon_file(content: &str) -> Vec<Vec<&str>> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.split_once('#').map_or(line, |(before, _)| before).trim();
            (!line.is_empty()).then(|| line.split(':').collect())
        })
        .collect()
}

/// Users and groups as seen on one host.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    pub users: HashMap<String, User>,
    pub groups: HashMap<String, Group>,
}

impl Accounts {
    /// Build from the contents of the passwd and group databases.
    pub fn parse(passwd: &str, group: &str) -> Self {
        let mut groups = HashMap::new();
        let mut names_by_gid = HashMap::new();
        let mut members: HashMap<String, Vec<String>> = HashMap::new();

        for row in parse_colon_file(group) {
            if row.len() < 4 {
                warn!("skipping short group row: {}", row.join(":"));
                continue;
            }
            let Ok(gid) = row[2].parse::<u32>() else {
                warn!("skipping group {} with bad gid {}", row[0], row[2]);
                continue;
            };
            let name = row[0].to_string();
            for member in row[3].split(',').filter(|m| !m.is_empty()) {
                members
                    .entry(member.to_string())
                    .or_default()
                    .push(name.clone());
            }
            names_by_gid.entry(gid).or_insert_with(|| name.clone());
            groups.insert(name.clone(), Group { name, gid });
        }

        let mut users = HashMap::new();
        for row in parse_colon_file(passwd) {
            if row.len() < 6 {
                warn!("skipping short passwd row: {}", row.join(":"));
                continue;
            }
            let name = row[0];
            if name.starts_with('+') || name.starts_with('-') {
                continue;
            }
            let (Ok(uid), Ok(gid)) = (row[2].parse::<u32>(), row[3].parse::<u32>()) else {
                warn!("skipping user {name} with bad uid/gid");
                continue;
            };
            let mut supplementary = members.get(name).cloned().unwrap_or_default();
            supplementary.sort();
            supplementary.dedup();
            users.insert(
                name.to_string(),
                User {
                    name: name.to_string(),
                    uid,
                    group: names_by_gid
                        .get(&gid)
                        .cloned()
                        .unwrap_or_else(|| gid.to_string()),
                    groups: supplementary,
                    home: row[row.len() - 2].to_string(),
                    shell: row[row.len() - 1].to_string(),
                },
            );
        }

        Self { users, groups }
    }
}

/// Parse the shadow (or master.passwd) database.
pub fn parse_passwords(shadow: &str) -> HashMap<String, Password> {
    parse_colon_file(shadow)
        .into_iter()
        .filter(|row| row.len() >= 8)
        .map(|row| {
            (
                row[0].to_string(),
                Password {
                    name: row[0].to_string(),
                    crypt: row[1].to_string(),
                },
            )
        })
        .collect()
}

/// Lazily loaded account databases for a transport that can read `/etc`
/// and run the shadow-utils commands.
///
/// The cache is dropped after every change so the next lookup sees the
/// host's own view of the result.
#[derive(Debug, Default)]
pub struct AccountDb {
    accounts: Mutex<Option<Arc<Accounts>>>,
    passwords: Mutex<Option<Arc<HashMap<String, Password>>>>,
}

impl AccountDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn accounts(&self, host: &dyn Transport) -> Result<Arc<Accounts>> {
        if let Some(cached) = lock(&self.accounts).as_ref() {
            return Ok(Arc::clone(cached));
        }
        let passwd = String::from_utf8_lossy(&host.read_file(PASSWD)?).into_owned();
        let group = String::from_utf8_lossy(&host.read_file(GROUP)?).into_owned();
        let loaded = Arc::new(Accounts::parse(&passwd, &group));
        debug!(
            "{host}: loaded {} users, {} groups",
            loaded.users.len(),
            loaded.groups.len()
        );
        *lock(&self.accounts) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    fn passwords(&self, host: &dyn Transport) -> Result<Arc<HashMap<String, Password>>> {
        if let Some(cached) = lock(&self.passwords).as_ref() {
            return Ok(Arc::clone(cached));
        }
        let path = shadow_path(&host.info()?.os);
        let content = String::from_utf8_lossy(&host.read_file(path)?).into_owned();
        let loaded = Arc::new(parse_passwords(&content));
        *lock(&self.passwords) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    pub fn invalidate(&self) {
        *lock(&self.accounts) = None;
        *lock(&self.passwords) = None;
    }

    pub fn user(&self, host: &dyn Transport, name: &str) -> Result<User> {
        self.accounts(host)?
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("user", name))
    }

    pub fn group(&self, host: &dyn Transport, name: &str) -> Result<Group> {
        self.accounts(host)?
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("group", name))
    }

    pub fn password(&self, host: &dyn Transport, name: &str) -> Result<Password> {
        self.passwords(host)?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("password", name))
    }

    pub fn create_user(&self, host: &dyn Transport, user: &User) -> Result<()> {
        if self.accounts(host)?.users.contains_key(&user.name) {
            return Err(Error::AlreadyExists {
                kind: "user",
                name: user.name.clone(),
            });
        }
        let result = host.run(&commands::useradd(user));
        self.invalidate();
        result.map(drop)
    }

    pub fn update_user(&self, host: &dyn Transport, user: &User) -> Result<()> {
        let current = self.user(host, &user.name)?;
        let Some(cmd) = commands::usermod(&current, user) else {
            return Ok(());
        };
        let result = host.run(&cmd);
        self.invalidate();
        result.map(drop)
    }

    pub fn delete_user(&self, host: &dyn Transport, name: &str) -> Result<()> {
        self.user(host, name)?;
        let result = host.run(&commands::userdel(name));
        self.invalidate();
        result.map(drop)
    }

    pub fn create_group(&self, host: &dyn Transport, group: &Group) -> Result<()> {
        if self.accounts(host)?.groups.contains_key(&group.name) {
            return Err(Error::AlreadyExists {
                kind: "group",
                name: group.name.clone(),
            });
        }
        let result = host.run(&commands::groupadd(group));
        self.invalidate();
        result.map(drop)
    }

    pub fn update_group(&self, host: &dyn Transport, group: &Group) -> Result<()> {
        let current = self.group(host, &group.name)?;
        if current.gid == group.gid {
            return Ok(());
        }
        let result = host.run(&commands::groupmod(group));
        self.invalidate();
        result.map(drop)
    }

    pub fn delete_group(&self, host: &dyn Transport, name: &str) -> Result<()> {
        self.group(host, name)?;
        let result = host.run(&commands::groupdel(name));
        self.invalidate();
        result.map(drop)
    }

    pub fn update_password(&self, host: &dyn Transport, password: &Password) -> Result<()> {
        self.user(host, &password.name)?;
        let result = host.run(&commands::set_password(password));
        self.invalidate();
        result.map(drop)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

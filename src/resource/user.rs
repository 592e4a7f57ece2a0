//! User resource
//!
//! Manages the passwd entry, supplementary groups and, when given, the
//! password hash of one account.

use anyhow::{Result, bail};
use declarative::{ApplyContext, BoxedResource, Resource, Status};
use hostkit::{Password, User as Account, commands};

use super::found;
use crate::schema::{DefaultValue, FieldSpec, FieldType, Fields, KindSchema, SchemaError};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldType::String, "login name")
        .required()
        .short_key(),
    FieldSpec::new("uid", FieldType::Integer, "numeric user id").short_value(),
    FieldSpec::new("group", FieldType::String, "primary group"),
    FieldSpec::new(
        "groups",
        FieldType::List,
        "supplementary groups; left alone when empty",
    ),
    FieldSpec::new("home", FieldType::String, "home directory"),
    FieldSpec::new("shell", FieldType::String, "login shell"),
    FieldSpec::new("password", FieldType::String, "crypt(3) password hash"),
    FieldSpec::new("delete", FieldType::Bool, "remove the account instead")
        .default(DefaultValue::Bool(false)),
];

pub const SCHEMA: KindSchema = KindSchema {
    name: "user",
    summary: "a user account",
    fields: FIELDS,
    build,
};

fn build(fields: &Fields) -> Result<BoxedResource, SchemaError> {
    Ok(Box::new(User {
        name: fields.require_str("name")?.to_string(),
        uid: fields.id("uid")?,
        group: fields.string("group"),
        groups: fields.list("groups"),
        home: fields.string("home"),
        shell: fields.string("shell"),
        password: fields.string("password"),
        delete: fields.bool("delete").unwrap_or(false),
    }))
}

#[derive(Debug, Clone, Default)]
pub struct User {
    pub name: String,
    pub uid: Option<u32>,
    pub group: Option<String>,
    pub groups: Vec<String>,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub password: Option<String>,
    pub delete: bool,
}

impl User {
    pub fn new(name: impl Into<String>, uid: u32) -> Self {
        Self {
            name: name.into(),
            uid: Some(uid),
            ..Self::default()
        }
    }

    pub fn deleted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delete: true,
            ..Self::default()
        }
    }

    fn group_keys(&self) -> Vec<String> {
        self.group
            .iter()
            .chain(&self.groups)
            .map(|g| format!("group:{g}"))
            .collect()
    }

    fn desired(&self, uid: u32, current: Option<&Account>) -> Account {
        let mut groups = if self.groups.is_empty() {
            current.map(|c| c.groups.clone()).unwrap_or_default()
        } else {
            self.groups.clone()
        };
        groups.sort();
        groups.dedup();

        Account {
            name: self.name.clone(),
            uid,
            group: self.group.clone().unwrap_or_default(),
            groups,
            home: self.home.clone().unwrap_or_default(),
            shell: self.shell.clone().unwrap_or_default(),
        }
    }
}

impl Resource for User {
    fn kind(&self) -> &'static str {
        "user"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn box_clone(&self) -> BoxedResource {
        Box::new(self.clone())
    }

    fn provides(&self) -> Vec<String> {
        vec![format!("user:{}", self.name)]
    }

    fn after(&self) -> Vec<String> {
        if self.delete { Vec::new() } else { self.group_keys() }
    }

    fn before(&self) -> Vec<String> {
        // An account goes before the groups it belongs to
        if self.delete { self.group_keys() } else { Vec::new() }
    }

    fn deletes(&self) -> bool {
        self.delete
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("name is required");
        }
        if self.name.contains([':', ',', ' ', '\n']) {
            bail!("invalid user name {:?}", self.name);
        }
        if self.delete {
            if self.uid.is_some() || self.password.is_some() {
                bail!("delete conflicts with uid and password");
            }
            return Ok(());
        }
        if self.uid.is_none() {
            bail!("uid is required");
        }
        if let Some(password) = &self.password {
            if password.contains([':', '\n']) {
                bail!("password must be a crypt(3) hash");
            }
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        let host = ctx.transport();
        let current = found(host.user(&self.name))?;

        let Some(uid) = self.uid.filter(|_| !self.delete) else {
            return match current {
                Some(_) => {
                    host.delete_user(&self.name)?;
                    Ok(Status::Deleted)
                }
                None => Ok(Status::Unchanged),
            };
        };

        let desired = self.desired(uid, current.as_ref());
        let mut status = match &current {
            None => {
                host.create_user(&desired)?;
                Status::Created
            }
            Some(current) if commands::usermod(current, &desired).is_some() => {
                host.update_user(&desired)?;
                Status::Modified
            }
            Some(_) => Status::Unchanged,
        };

        if let Some(crypt) = &self.password {
            let have = found(host.password(&self.name))?;
            if have.as_ref().map(|p| &p.crypt) != Some(crypt) {
                host.update_password(&Password {
                    name: self.name.clone(),
                    crypt: crypt.clone(),
                })?;
                if status == Status::Unchanged {
                    status = Status::Modified;
                }
            }
        }
        Ok(status)
    }
}

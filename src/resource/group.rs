//! Group resource

use anyhow::{Result, bail};
use declarative::{ApplyContext, BoxedResource, Resource, Status};
use hostkit::Group as Account;

use super::found;
use crate::schema::{DefaultValue, FieldSpec, FieldType, Fields, KindSchema, SchemaError};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldType::String, "group name")
        .required()
        .short_key(),
    FieldSpec::new("gid", FieldType::Integer, "numeric group id").short_value(),
    FieldSpec::new("delete", FieldType::Bool, "remove the group instead")
        .default(DefaultValue::Bool(false)),
];

pub const SCHEMA: KindSchema = KindSchema {
    name: "group",
    summary: "a group account with a fixed gid",
    fields: FIELDS,
    build,
};

fn build(fields: &Fields) -> Result<BoxedResource, SchemaError> {
    Ok(Box::new(Group {
        name: fields.require_str("name")?.to_string(),
        gid: fields.id("gid")?,
        delete: fields.bool("delete").unwrap_or(false),
    }))
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub gid: Option<u32>,
    pub delete: bool,
}

impl Group {
    pub fn new(name: impl Into<String>, gid: u32) -> Self {
        Self {
            name: name.into(),
            gid: Some(gid),
            delete: false,
        }
    }

    pub fn deleted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gid: None,
            delete: true,
        }
    }
}

impl Resource for Group {
    fn kind(&self) -> &'static str {
        "group"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn box_clone(&self) -> BoxedResource {
        Box::new(self.clone())
    }

    fn provides(&self) -> Vec<String> {
        vec![format!("group:{}", self.name)]
    }

    fn deletes(&self) -> bool {
        self.delete
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("name is required");
        }
        if self.name.contains([':', ',', ' ', '\n']) {
            bail!("invalid group name {:?}", self.name);
        }
        match (self.delete, self.gid) {
            (false, None) => bail!("gid is required"),
            (true, Some(_)) => bail!("delete conflicts with gid"),
            _ => Ok(()),
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        let host = ctx.transport();
        let current = found(host.group(&self.name))?;

        let Some(gid) = self.gid else {
            return match current {
                Some(_) => {
                    host.delete_group(&self.name)?;
                    Ok(Status::Deleted)
                }
                None => Ok(Status::Unchanged),
            };
        };

        let desired = Account {
            name: self.name.clone(),
            gid,
        };
        match current {
            None => {
                host.create_group(&desired)?;
                Ok(Status::Created)
            }
            Some(current) if current.gid != gid => {
                host.update_group(&desired)?;
                Ok(Status::Modified)
            }
            Some(_) => Ok(Status::Unchanged),
        }
    }
}

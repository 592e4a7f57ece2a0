//! Dir resource - a directory, optionally mirrored from a local one

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, BoxedResource, Resource, Status};
use log::debug;

use super::{File, converge_meta, found, ownership_keys, path_key, validate_path};
use crate::schema::{DefaultValue, FieldSpec, FieldType, Fields, KindSchema, SchemaError};

const DEFAULT_MODE: u32 = 0o755;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("path", FieldType::String, "absolute path on the host")
        .required()
        .short_key(),
    FieldSpec::new("owner", FieldType::String, "owning user").rename("user"),
    FieldSpec::new("group", FieldType::String, "owning group"),
    FieldSpec::new("mode", FieldType::Mode, "permission bits")
        .default(DefaultValue::Mode(DEFAULT_MODE)),
    FieldSpec::new(
        "source",
        FieldType::String,
        "local directory whose files and subdirectories are copied in",
    ),
    FieldSpec::new("delete", FieldType::Bool, "remove the (empty) directory instead")
        .default(DefaultValue::Bool(false)),
];

pub const SCHEMA: KindSchema = KindSchema {
    name: "dir",
    summary: "a directory, created with its parents",
    fields: FIELDS,
    build,
};

fn build(fields: &Fields) -> Result<BoxedResource, SchemaError> {
    Ok(Box::new(Dir {
        path: fields.require_str("path")?.to_string(),
        owner: fields.string("owner"),
        group: fields.string("group"),
        mode: fields.mode("mode").unwrap_or(DEFAULT_MODE),
        source: fields.local_path("source"),
        delete: fields.bool("delete").unwrap_or(false),
    }))
}

#[derive(Debug, Clone)]
pub struct Dir {
    pub path: String,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: u32,
    /// Local directory mirrored into this one
    pub source: Option<String>,
    pub delete: bool,
}

impl Dir {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            group: None,
            mode: DEFAULT_MODE,
            source: None,
            delete: false,
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        }
    }

    /// Declare a resource for every entry of the source directory
    ///
    /// Subdirectories get their own mirroring `Dir`, so the tree unfolds one
    /// level per resource while the run executes.
    fn mirror(&self, ctx: &ApplyContext<'_>, source: &str) -> Result<()> {
        let mut entries: Vec<_> = fs::read_dir(source)
            .with_context(|| format!("reading source {source}"))?
            .collect::<std::io::Result<_>>()
            .with_context(|| format!("reading source {source}"))?;
        entries.sort_by_key(fs::DirEntry::file_name);

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let local = Path::new(source).join(&name).to_string_lossy().into_owned();
            let file_type = entry.file_type()?;

            let child: BoxedResource = if file_type.is_dir() {
                Box::new(Dir {
                    path: self.child_path(&name),
                    owner: self.owner.clone(),
                    group: self.group.clone(),
                    mode: self.mode,
                    source: Some(local),
                    delete: false,
                })
            } else if file_type.is_file() {
                Box::new(File {
                    source: Some(local),
                    owner: self.owner.clone(),
                    group: self.group.clone(),
                    ..File::new(self.child_path(&name))
                })
            } else {
                debug!("{}: skipping {local}, not a file or directory", ctx.host());
                continue;
            };
            ctx.add(child)?;
        }
        Ok(())
    }
}

impl Resource for Dir {
    fn kind(&self) -> &'static str {
        "dir"
    }

    fn name(&self) -> String {
        self.path.clone()
    }

    fn box_clone(&self) -> BoxedResource {
        Box::new(self.clone())
    }

    fn provides(&self) -> Vec<String> {
        vec![path_key(&self.path)]
    }

    fn after(&self) -> Vec<String> {
        if self.delete {
            return Vec::new();
        }
        ownership_keys(&self.path, self.owner.as_deref(), self.group.as_deref())
    }

    fn before(&self) -> Vec<String> {
        match hostkit::parent(&self.path) {
            Some(parent) if self.delete => vec![path_key(parent)],
            _ => Vec::new(),
        }
    }

    fn deletes(&self) -> bool {
        self.delete
    }

    fn validate(&self) -> Result<()> {
        validate_path(&self.path)?;
        if self.mode > 0o7777 {
            bail!("mode {:o} is out of range", self.mode);
        }
        if self.delete && self.source.is_some() {
            bail!("delete conflicts with source");
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        let host = ctx.transport();
        let current = found(host.stat(&self.path))?;

        if self.delete {
            return match current {
                None => Ok(Status::Unchanged),
                Some(info) if !info.is_dir() => bail!("{} is not a directory", self.path),
                Some(_) => {
                    host.remove(&self.path)?;
                    Ok(Status::Deleted)
                }
            };
        }

        let created = match current {
            Some(info) if info.is_dir() => false,
            Some(_) => bail!("{} exists and is not a directory", self.path),
            None => {
                host.mkdir_all(&self.path, self.mode)?;
                true
            }
        };

        let changed = converge_meta(
            host,
            &self.path,
            self.owner.as_deref(),
            self.group.as_deref(),
            Some(self.mode),
        )?;

        if let Some(source) = &self.source {
            self.mirror(ctx, source)?;
        }

        Ok(if created {
            Status::Created
        } else if changed {
            Status::Modified
        } else {
            Status::Unchanged
        })
    }
}

//! File resource - content, ownership and mode of a regular file

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, BoxedResource, Resource, Status};

use super::{converge_meta, found, ownership_keys, path_key, validate_path};
use crate::schema::{DefaultValue, FieldSpec, FieldType, Fields, KindSchema, SchemaError};
use crate::ui;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("path", FieldType::String, "absolute path on the host")
        .required()
        .short_key(),
    FieldSpec::new("content", FieldType::String, "exact file content").short_value(),
    FieldSpec::new("source", FieldType::String, "local file to copy the content from"),
    FieldSpec::new("owner", FieldType::String, "owning user").rename("user"),
    FieldSpec::new("group", FieldType::String, "owning group"),
    FieldSpec::new("mode", FieldType::Mode, "permission bits"),
    FieldSpec::new("delete", FieldType::Bool, "remove the file instead")
        .default(DefaultValue::Bool(false)),
];

pub const SCHEMA: KindSchema = KindSchema {
    name: "file",
    summary: "a regular file, its content and permissions",
    fields: FIELDS,
    build,
};

fn build(fields: &Fields) -> Result<BoxedResource, SchemaError> {
    Ok(Box::new(File {
        path: fields.require_str("path")?.to_string(),
        content: fields.string("content"),
        source: fields.local_path("source"),
        owner: fields.string("owner"),
        group: fields.string("group"),
        mode: fields.mode("mode"),
        delete: fields.bool("delete").unwrap_or(false),
    }))
}

/// A regular file
///
/// Without `content` or `source` only the metadata is managed, and a missing
/// file is created empty.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub path: String,
    pub content: Option<String>,
    /// Path on the machine running steward
    pub source: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    pub delete: bool,
}

impl File {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn deleted(mut self) -> Self {
        self.delete = true;
        self
    }

    fn desired_content(&self) -> Result<Option<Vec<u8>>> {
        if let Some(source) = &self.source {
            let bytes = std::fs::read(source).with_context(|| format!("reading source {source}"))?;
            return Ok(Some(bytes));
        }
        Ok(self.content.as_ref().map(|c| c.as_bytes().to_vec()))
    }

    fn remove(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        let host = ctx.transport();
        match found(host.stat(&self.path))? {
            None => Ok(Status::Unchanged),
            Some(info) if info.is_dir() => bail!("{} is a directory", self.path),
            Some(_) => {
                host.remove(&self.path)?;
                Ok(Status::Deleted)
            }
        }
    }
}

impl Resource for File {
    fn kind(&self) -> &'static str {
        "file"
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
        // Removing a file has to happen before its directory goes
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
        if self.content.is_some() && self.source.is_some() {
            bail!("content and source cannot both be set");
        }
        if self.delete
            && (self.content.is_some()
                || self.source.is_some()
                || self.owner.is_some()
                || self.group.is_some()
                || self.mode.is_some())
        {
            bail!("delete conflicts with content, source, owner, group and mode");
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        if self.delete {
            return self.remove(ctx);
        }

        let host = ctx.transport();
        let desired = self.desired_content()?;
        let current = found(host.read_file(&self.path))
            .with_context(|| format!("reading {}", self.path))?;

        let mut status = match (&current, &desired) {
            (None, _) => Status::Created,
            (Some(have), Some(want)) if have != want => Status::Modified,
            _ => Status::Unchanged,
        };

        if status != Status::Unchanged {
            let want = desired.as_deref().unwrap_or_default();
            if ctx.diff() {
                ui::print_diff(
                    &format!("{} {}", ctx.host(), self.path),
                    current.as_deref().unwrap_or_default(),
                    want,
                );
            }
            host.write_file(&self.path, want)
                .with_context(|| format!("writing {}", self.path))?;
        }

        let meta_changed = converge_meta(
            host,
            &self.path,
            self.owner.as_deref(),
            self.group.as_deref(),
            self.mode,
        )?;
        if meta_changed && status == Status::Unchanged {
            status = Status::Modified;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{labels, run_on};
    use hostkit::{LocalTransport, Transport};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn local() -> Arc<dyn Transport> {
        Arc::new(LocalTransport::new())
    }

    fn path_in(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_create_then_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "motd");
        let file = || File::new(&path).content("hello\n").mode(0o600);

        let report = run_on(local(), false, vec![Box::new(file())]);
        assert_eq!(labels(&report), vec![(path.clone(), "created")]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);

        let report = run_on(local(), false, vec![Box::new(file())]);
        assert_eq!(labels(&report), vec![(path, "unchanged")]);
    }

    #[test]
    fn test_content_and_mode_changes_are_modifications() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "conf");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let report = run_on(local(), false, vec![Box::new(File::new(&path).content("new"))]);
        assert_eq!(labels(&report), vec![(path.clone(), "modified")]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        let report = run_on(local(), false, vec![Box::new(File::new(&path).mode(0o640))]);
        assert_eq!(labels(&report), vec![(path.clone(), "modified")]);
        // content untouched when not managed
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_source_copies_local_file() {
        let dir = TempDir::new().unwrap();
        let source = path_in(&dir, "template");
        let path = path_in(&dir, "copy");
        fs::write(&source, b"\x00binary\xff").unwrap();

        let file = File {
            source: Some(source),
            ..File::new(&path)
        };
        let report = run_on(local(), false, vec![Box::new(file)]);
        report.ensure_success().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"\x00binary\xff");
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "stale");
        fs::write(&path, "x").unwrap();

        let report = run_on(local(), false, vec![Box::new(File::new(&path).deleted())]);
        assert_eq!(labels(&report), vec![(path.clone(), "deleted")]);
        assert!(!std::path::Path::new(&path).exists());

        let report = run_on(local(), false, vec![Box::new(File::new(&path).deleted())]);
        assert_eq!(labels(&report), vec![(path, "unchanged")]);
    }

    #[test]
    fn test_dry_run_predicts_real_run() {
        let dir = TempDir::new().unwrap();
        let existing = path_in(&dir, "existing");
        let stale = path_in(&dir, "stale");
        fs::write(&existing, "v1").unwrap();
        fs::write(&stale, "x").unwrap();

        let resources = || -> Vec<BoxedResource> {
            vec![
                Box::new(File::new(path_in(&dir, "fresh")).content("new")),
                Box::new(File::new(&existing).content("v2")),
                Box::new(File::new(&stale).deleted()),
            ]
        };

        let dry = run_on(local(), true, resources());
        assert!(dry.dry_run);
        // nothing touched
        assert_eq!(fs::read_to_string(&existing).unwrap(), "v1");
        assert!(std::path::Path::new(&stale).exists());

        let real = run_on(local(), false, resources());
        assert_eq!(labels(&dry), labels(&real));
        assert_eq!(real.summary.created, 1);
        assert_eq!(real.summary.modified, 1);
        assert_eq!(real.summary.deleted, 1);
    }

    #[test]
    fn test_validate() {
        assert!(File::new("relative").validate().is_err());
        assert!(File::new("/etc/motd").content("x").deleted().validate().is_err());
        let both = File {
            source: Some("/tmp/x".into()),
            ..File::new("/etc/motd").content("x")
        };
        assert!(both.validate().is_err());
        assert!(File::new("/etc/motd").content("x").validate().is_ok());
    }

    #[test]
    fn test_ordering_keys() {
        let file = File {
            owner: Some("www".into()),
            ..File::new("/srv/www/index.html")
        };
        assert_eq!(file.provides(), vec!["path:/srv/www/index.html"]);
        assert_eq!(file.after(), vec!["user:www", "path:/srv/www"]);
        assert!(file.before().is_empty());

        let gone = File::new("/srv/www/index.html").deleted();
        assert!(gone.after().is_empty());
        assert_eq!(gone.before(), vec!["path:/srv/www"]);
    }
}

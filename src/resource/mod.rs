//! Built-in resource kinds
//!
//! Each kind implements [`declarative::Resource`] and does all host access
//! through the transport it is handed, so the same code converges local and
//! remote hosts and predicts dry runs.

#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use hostkit::Transport;

pub mod dir;
pub mod file;
pub mod group;
pub mod service;
pub mod user;

#[cfg(test)]
pub(crate) mod testing;

pub use file::File;

/// Turn a not-found error into `None`
pub(crate) fn found<T>(result: hostkit::Result<T>) -> hostkit::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn path_key(path: &str) -> String {
    format!("path:{path}")
}

/// Ordering keys for something owned by `owner` and `group` at `path`
pub(crate) fn ownership_keys(path: &str, owner: Option<&str>, group: Option<&str>) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(owner) = owner {
        keys.push(format!("user:{owner}"));
    }
    if let Some(group) = group {
        keys.push(format!("group:{group}"));
    }
    if let Some(parent) = hostkit::parent(path) {
        keys.push(path_key(parent));
    }
    keys
}

pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("path is required");
    }
    if !path.starts_with('/') {
        bail!("path must be absolute: {path}");
    }
    if path.len() > 1 && path.ends_with('/') {
        bail!("path must not end with '/': {path}");
    }
    Ok(())
}

/// Bring owner, group and permission bits of `path` in line
///
/// Unset fields are left alone. Returns whether anything changed.
pub(crate) fn converge_meta(
    host: &dyn Transport,
    path: &str,
    owner: Option<&str>,
    group: Option<&str>,
    mode: Option<u32>,
) -> Result<bool> {
    let info = host.stat(path)?;
    let mut changed = false;

    let uid = match owner {
        Some(name) => {
            host.user(name)
                .with_context(|| format!("looking up owner {name}"))?
                .uid
        }
        None => info.uid,
    };
    let gid = match group {
        Some(name) => {
            host.group(name)
                .with_context(|| format!("looking up group {name}"))?
                .gid
        }
        None => info.gid,
    };
    if (uid, gid) != (info.uid, info.gid) {
        host.chown(path, uid, gid)?;
        changed = true;
    }

    if let Some(mode) = mode {
        if info.permissions() != mode {
            host.chmod(path, mode)?;
            changed = true;
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_keys() {
        assert_eq!(
            ownership_keys("/srv/www/index.html", Some("www"), Some("web")),
            vec!["user:www", "group:web", "path:/srv/www"]
        );
        assert_eq!(ownership_keys("/srv", None, None), vec!["path:/"]);
        assert!(ownership_keys("/", None, None).is_empty());
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/etc/motd").is_ok());
        assert!(validate_path("/").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("etc/motd").is_err());
        assert!(validate_path("/etc/").is_err());
    }

    #[test]
    fn test_found() {
        assert_eq!(found(Ok::<_, hostkit::Error>(1)).unwrap(), Some(1));
        assert_eq!(
            found::<u32>(Err(hostkit::Error::not_found("stat", "/x"))).unwrap(),
            None
        );
        assert!(found::<u32>(Err(hostkit::Error::Session("down".into()))).is_err());
    }
}

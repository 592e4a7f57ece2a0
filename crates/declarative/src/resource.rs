//! Resource trait for declarative state management
//!
//! A resource is one unit of desired host state. It names the keys it
//! provides and the keys it must run after (or before); the scheduler turns
//! those into fences and calls [`Resource::apply`] once per host.

use crate::context::ApplyContext;
use crate::types::Status;
use anyhow::Result;
use std::fmt;

/// Core trait for declarative resources
///
/// Keys are plain strings namespaced by kind, such as `"path:/etc/motd"` or
/// `"group:wheel"`. The scheduler prefixes them with the host key, so the
/// same resource on two hosts never collides.
///
/// # Example
///
/// ```ignore
/// use declarative::{ApplyContext, BoxedResource, Resource, Status};
///
/// #[derive(Debug, Clone)]
/// struct Motd { text: String }
///
/// impl Resource for Motd {
///     fn kind(&self) -> &'static str { "motd" }
///     fn name(&self) -> String { "/etc/motd".into() }
///     fn box_clone(&self) -> BoxedResource { Box::new(self.clone()) }
///     fn provides(&self) -> Vec<String> { vec!["path:/etc/motd".into()] }
///
///     fn apply(&self, ctx: &ApplyContext<'_>) -> anyhow::Result<Status> {
///         let host = ctx.transport();
///         match host.read_file("/etc/motd") {
///             Ok(current) if current == self.text.as_bytes() => Ok(Status::Unchanged),
///             Ok(_) => { host.write_file("/etc/motd", self.text.as_bytes())?; Ok(Status::Modified) }
///             Err(e) if e.is_not_found() => { host.write_file("/etc/motd", self.text.as_bytes())?; Ok(Status::Created) }
///             Err(e) => Err(e.into()),
///         }
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Resource kind, e.g. "file" or "user"
    fn kind(&self) -> &'static str;

    /// Human-readable identity within its kind (a path, a user name)
    fn name(&self) -> String;

    /// Deep copy, used to give every host its own instance
    fn box_clone(&self) -> BoxedResource;

    /// Keys this resource creates or affects
    fn provides(&self) -> Vec<String> {
        Vec::new()
    }

    /// Keys whose providers must finish before this resource starts
    fn after(&self) -> Vec<String> {
        Vec::new()
    }

    /// Keys whose providers must wait until this resource finishes
    ///
    /// Used for teardown: deleting a user must happen before deleting the
    /// group it belongs to, even though the group normally comes first.
    fn before(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether this resource removes what it provides
    fn deletes(&self) -> bool {
        false
    }

    /// Check the declaration itself, before anything runs
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Converge the host towards the desired state
    ///
    /// Must inspect first and change only what differs, returning
    /// [`Status::Unchanged`] when nothing needed doing. All host access goes
    /// through `ctx.transport()`, which may be a dry-run overlay.
    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status>;
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

impl Clone for BoxedResource {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl fmt::Display for dyn Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

//! Resources backed by a closure

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::context::ApplyContext;
use crate::resource::{BoxedResource, Resource};
use crate::types::Status;

type Body = Arc<dyn Fn(&ApplyContext<'_>) -> Result<Status> + Send + Sync>;

/// Arbitrary code run as a resource
///
/// The closure gets the same [`ApplyContext`] as any other resource, so it
/// can reach the host and declare more resources with
/// [`ApplyContext::add`].
///
/// ```ignore
/// let fact = Function::new("report-kernel", |ctx| {
///     log::info!("{}: {}", ctx.host(), ctx.transport().info()?.kernel);
///     Ok(Status::Unchanged)
/// })
/// .after("path:/etc/motd");
/// ```
#[derive(Clone)]
pub struct Function {
    name: String,
    body: Body,
    provides: Vec<String>,
    after: Vec<String>,
    before: Vec<String>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&ApplyContext<'_>) -> Result<Status> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(body),
            provides: Vec::new(),
            after: Vec::new(),
            before: Vec::new(),
        }
    }

    pub fn provides(mut self, key: impl Into<String>) -> Self {
        self.provides.push(key.into());
        self
    }

    pub fn after(mut self, key: impl Into<String>) -> Self {
        self.after.push(key.into());
        self
    }

    pub fn before(mut self, key: impl Into<String>) -> Self {
        self.before.push(key.into());
        self
    }

    pub fn boxed(self) -> BoxedResource {
        Box::new(self)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("provides", &self.provides)
            .field("after", &self.after)
            .field("before", &self.before)
            .finish_non_exhaustive()
    }
}

impl Resource for Function {
    fn kind(&self) -> &'static str {
        "function"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn box_clone(&self) -> BoxedResource {
        Box::new(self.clone())
    }

    fn provides(&self) -> Vec<String> {
        self.provides.clone()
    }

    fn after(&self) -> Vec<String> {
        self.after.clone()
    }

    fn before(&self) -> Vec<String> {
        self.before.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("function name is required");
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        (self.body)(ctx)
    }
}

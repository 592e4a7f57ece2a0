//! # Declarative
//!
//! Converge hosts to a declared state.
//!
//! Resources describe one piece of desired state (a file, a user, a
//! service) and how to reach it through a [`hostkit::Transport`]. A [`Run`]
//! instantiates every declared resource once per [`Host`] and applies all
//! of them concurrently. Ordering comes only from the keys resources
//! provide and the keys they name in `after` and `before`.
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ApplyContext, BoxedResource, Host, Resource, Run, RunOptions, Silent, Status};
//!
//! #[derive(Debug, Clone)]
//! struct Motd(String);
//!
//! impl Resource for Motd {
//!     fn kind(&self) -> &'static str { "motd" }
//!     fn name(&self) -> String { "/etc/motd".into() }
//!     fn box_clone(&self) -> BoxedResource { Box::new(self.clone()) }
//!     fn provides(&self) -> Vec<String> { vec!["path:/etc/motd".into()] }
//!
//!     fn apply(&self, ctx: &ApplyContext<'_>) -> anyhow::Result<Status> {
//!         ctx.transport().write_file("/etc/motd", self.0.as_bytes())?;
//!         Ok(Status::Modified)
//!     }
//! }
//!
//! let run = Run::new(RunOptions::default());
//! run.declare(Box::new(Motd("hello\n".into())))?;
//! run.set_hosts(vec![Host::local("local")])?;
//! run.execute(&Silent)?.ensure_success()?;
//! ```
//!
//! ## Failure handling
//!
//! Graph problems (duplicate providers, cycles, a kept resource depending
//! on a deleted one) are rejected when resources are registered, before
//! anything runs. A resource that fails at apply time does not stop the
//! run; everything depending on it is skipped and reported as such.

pub mod context;
pub mod error;
pub mod executor;
pub mod fence;
pub mod function;
pub mod host;
mod planner;
pub mod resource;
pub mod types;

pub use context::{ApplyContext, Reporter, Silent};
pub use error::{Error, Result};
pub use executor::Run;
pub use fence::Fence;
pub use function::Function;
pub use host::{Host, LOCAL_KEY};
pub use resource::{BoxedResource, Resource};
pub use types::{Outcome, Record, Report, ResourceId, RunOptions, Status, Summary};

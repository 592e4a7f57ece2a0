//! Apply context and the progress callback
//!
//! The reporter trait lets the scheduler stay independent of any terminal
//! UI.

use std::panic::Location;

use hostkit::Transport;

use crate::executor::Run;
use crate::host::Host;
use crate::resource::{BoxedResource, Resource};
use crate::types::{Record, Report, ResourceId};

/// Progress callback for a run
///
/// Implement this trait to receive progress updates during execution.
/// `on_item_start` is called from worker threads; the other two from the
/// thread that called [`Run::execute`].
pub trait Reporter: Sync {
    /// Called when a resource stops waiting and is about to be applied
    fn on_item_start(&self, _host: &Host, _resource: &dyn Resource) {}

    /// Called when a resource has finished, in completion order
    fn on_item_complete(&self, record: &Record);

    /// Called once all resources have finished
    fn on_run_complete(&self, _report: &Report) {}
}

/// No-op reporter
pub struct Silent;

impl Reporter for Silent {
    fn on_item_complete(&self, _record: &Record) {}
}

/// Context passed to [`Resource::apply`]
pub struct ApplyContext<'a> {
    run: &'a Run,
    host: &'a Host,
    id: ResourceId,
}

impl<'a> ApplyContext<'a> {
    pub(crate) fn new(run: &'a Run, host: &'a Host, id: ResourceId) -> Self {
        Self { run, host, id }
    }

    pub fn host(&self) -> &Host {
        self.host
    }

    /// Transport to do all host I/O through
    pub fn transport(&self) -> &dyn Transport {
        self.host.transport().as_ref()
    }

    /// Whether the transport only simulates changes
    pub fn dry_run(&self) -> bool {
        self.host.is_dry()
    }

    pub fn verbose(&self) -> bool {
        self.run.options().verbose
    }

    /// Whether content diffs were requested
    pub fn diff(&self) -> bool {
        self.run.options().diff
    }

    /// Identity of the resource being applied
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Declare another resource for this host while the run is executing
    ///
    /// It is checked like any other declaration and scheduled before the
    /// run can finish.
    #[track_caller]
    pub fn add(&self, resource: BoxedResource) -> crate::Result<()> {
        self.run
            .register_for(self.host, vec![(resource, Location::caller())])
    }
}

//! Run orchestration for the CLI
//!
//! 1. Preflight - make sure every host answers
//! 2. Build - declare the resources and bind the hosts
//! 3. Execute - converge, reporting as resources finish

pub mod preflight;
pub mod report;

use anyhow::Result;
use declarative::{BoxedResource, Host, Report, Reporter, Run, RunOptions};

pub use report::ConsoleReporter;

/// Declare `resources` and bind them to `hosts`
///
/// Every graph check happens here, so a returned run is ready to execute.
pub fn build(options: RunOptions, resources: Vec<BoxedResource>, hosts: Vec<Host>) -> Result<Run> {
    let run = Run::new(options);
    for resource in resources {
        run.declare(resource)?;
    }
    run.set_hosts(hosts)?;
    Ok(run)
}

/// Preflight, build and execute
pub fn converge(
    options: RunOptions,
    resources: Vec<BoxedResource>,
    hosts: Vec<Host>,
    reporter: &dyn Reporter,
) -> Result<Report> {
    preflight::check(&hosts)?;
    let run = build(options, resources, hosts)?;
    Ok(run.execute(reporter)?)
}

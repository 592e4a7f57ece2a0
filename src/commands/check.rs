//! `check` - validate the config without touching any host

use anyhow::Result;
use declarative::RunOptions;

use crate::Context;
use crate::cli::HostArgs;
use crate::config::Config;
use crate::engine;
use crate::ui;

pub fn run(ctx: &Context, args: HostArgs) -> Result<()> {
    let config = Config::load(ctx.config.as_deref())?;
    let resources = config.resources()?;
    let hosts = config.hosts(&args.hosts)?;
    let instances = resources.len() * hosts.len();
    let host_count = hosts.len();

    engine::build(RunOptions::default(), resources, hosts)?;

    if !ctx.quiet {
        ui::success(&format!(
            "{} is valid: {instances} resource instances on {host_count} hosts",
            config.path.display()
        ));
    }
    Ok(())
}

//! `apply` and `plan`

use anyhow::Result;
use declarative::RunOptions;

use crate::Context;
use crate::cli::{ApplyArgs, PlanArgs};
use crate::config::Config;
use crate::engine::{self, ConsoleReporter};
use crate::ui;

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = Config::load(ctx.config.as_deref())?;
    let options = options(ctx, &config, args.dry_run, args.diff);
    converge(ctx, &config, options, &args.targets.hosts)
}

/// A dry run: everything apply would do, simulated
pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let config = Config::load(ctx.config.as_deref())?;
    let options = options(ctx, &config, true, args.diff);
    converge(ctx, &config, options, &args.targets.hosts)
}

fn options(ctx: &Context, config: &Config, dry_run: bool, diff: bool) -> RunOptions {
    RunOptions {
        dry_run,
        verbose: ctx.verbose > 0 || config.settings.verbose,
        diff: diff || config.settings.diff,
    }
}

fn converge(ctx: &Context, config: &Config, options: RunOptions, only: &[String]) -> Result<()> {
    let resources = config.resources()?;
    let hosts = config.hosts(only)?;

    if !ctx.quiet {
        let verb = if options.dry_run { "Planning" } else { "Applying" };
        ui::header(&format!(
            "{verb} {} resources on {} hosts",
            resources.len(),
            hosts.len()
        ));
        for host in &hosts {
            ui::kv(host.name(), host.target().unwrap_or("local"));
        }
        println!();
    }

    let reporter = ConsoleReporter {
        verbose: options.verbose,
    };
    let report = engine::converge(options, resources, hosts, &reporter)?;
    report.ensure_success()?;
    Ok(())
}

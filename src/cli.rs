use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "steward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge local and remote hosts to a declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/steward/steward.toml)
    #[arg(short, long, global = true, env = "STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the hosts to the config
    Apply(ApplyArgs),

    /// Show what apply would change, without changing anything
    Plan(PlanArgs),

    /// Validate the config and build the resource graph
    Check(HostArgs),

    /// List resource kinds and their fields
    Kinds,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Args, Debug, Default)]
pub struct HostArgs {
    /// Only these hosts (repeatable)
    #[arg(long = "host", value_name = "NAME")]
    pub hosts: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Simulate the run; nothing on any host is changed
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Print content diffs of changed files
    #[arg(short, long)]
    pub diff: bool,

    #[command(flatten)]
    pub targets: HostArgs,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Print content diffs of changed files
    #[arg(short, long)]
    pub diff: bool,

    #[command(flatten)]
    pub targets: HostArgs,
}

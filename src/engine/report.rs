//! Console rendering of a run

use colored::Colorize;
use declarative::{Outcome, Record, Report, Reporter, Status, Summary};
use std::time::Duration;

use crate::ui;

/// Applies taking longer than this are highlighted
const SLOW: Duration = Duration::from_millis(100);

/// Prints one line per finished resource and a summary at the end
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl Reporter for ConsoleReporter {
    fn on_item_complete(&self, record: &Record) {
        if let Some(line) = render_record(record, self.verbose) {
            println!("{line}");
        }
    }

    fn on_run_complete(&self, report: &Report) {
        print_summary(&report.summary, report.dry_run);
    }
}

/// `duration │ kind │ status │ [host] name`, plus the reason for failures
///
/// Unchanged resources are only shown when verbose.
pub fn render_record(record: &Record, verbose: bool) -> Option<String> {
    if record.outcome == Outcome::Applied(Status::Unchanged) && !verbose {
        return None;
    }

    let duration = format!("{:>8}", ui::format_duration(record.duration));
    let duration = if record.duration > SLOW {
        duration.red()
    } else {
        duration.dimmed()
    };

    let label = format!("{:<10}", record.outcome.label());
    let label = match &record.outcome {
        Outcome::Applied(Status::Created) => label.green(),
        Outcome::Applied(Status::Modified) => label.yellow(),
        Outcome::Applied(Status::Deleted) => label.magenta(),
        Outcome::Applied(Status::Unchanged) => label.dimmed(),
        Outcome::Failed { .. } => label.red().bold(),
        Outcome::Skipped { .. } => label.yellow(),
    };

    let mut line = format!(
        "{duration} │ {:<10} │ {label} │ [{}] {}",
        record.kind, record.host, record.name
    );
    match &record.outcome {
        Outcome::Failed { error } => {
            line.push_str(&format!("\n{:>8}   {}", "", error.red()));
        }
        Outcome::Skipped { prerequisite } => {
            line.push_str(&format!(
                "\n{:>8}   {}",
                "",
                format!("waiting on {prerequisite}, which failed").dimmed()
            ));
        }
        Outcome::Applied(_) => {}
    }
    Some(line)
}

fn print_summary(summary: &Summary, dry_run: bool) {
    println!();
    if summary.is_success() {
        println!(
            "  {} {} resources converged",
            "✓".green().bold(),
            summary.total()
        );
    } else {
        println!("  {} Run finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} modified", summary.modified);
    }
    if summary.deleted > 0 {
        println!("    • {} deleted", summary.deleted);
    }
    if summary.unchanged > 0 {
        println!("    • {} unchanged", summary.unchanged);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }

    if dry_run {
        println!();
        ui::warn("dry run: no changes were made");
    }
}

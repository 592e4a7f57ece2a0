//! Core types for declarative resource management

use std::fmt;
use std::panic::Location;
use std::time::Duration;

/// What `apply` did to converge a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Already in the desired state
    Unchanged,
    Created,
    Modified,
    Deleted,
}

impl Status {
    /// Check if the status represents a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler-assigned identity of one resource instance on one host
///
/// Assigned when the instance is registered, unique within the process and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Final result of one resource instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `apply` ran and succeeded
    Applied(Status),
    /// `apply` returned an error or panicked
    Failed { error: String },
    /// Not applied because a prerequisite failed
    Skipped { prerequisite: String },
}

impl Outcome {
    /// Check if the outcome represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Applied(status) => Some(*status),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied(status) => status.as_str(),
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Report line for one executed resource instance
#[derive(Debug, Clone)]
pub struct Record {
    pub id: ResourceId,
    /// Name of the host it ran against
    pub host: String,
    pub kind: &'static str,
    pub name: String,
    /// Where the resource was declared
    pub location: &'static Location<'static>,
    pub outcome: Outcome,
    /// Time spent in `apply`; zero when skipped
    pub duration: Duration,
}

/// Outcome counts for a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.deleted
    }

    /// Check if the run was fully successful (nothing failed or skipped)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.skipped
    }

    /// Add an outcome to the summary
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Applied(Status::Unchanged) => self.unchanged += 1,
            Outcome::Applied(Status::Created) => self.created += 1,
            Outcome::Applied(Status::Modified) => self.modified += 1,
            Outcome::Applied(Status::Deleted) => self.deleted += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// In completion order
    pub records: Vec<Record>,
    pub summary: Summary,
    pub dry_run: bool,
}

impl Report {
    pub fn push(&mut self, record: Record) {
        self.summary.add(&record.outcome);
        self.records.push(record);
    }

    /// Turn failures into the aggregate run error
    pub fn ensure_success(&self) -> crate::Result<()> {
        if self.summary.failed > 0 || self.summary.skipped > 0 {
            Err(crate::Error::Failed {
                failed: self.summary.failed,
                skipped: self.summary.skipped,
            })
        } else {
            Ok(())
        }
    }

    /// Records of resources with the given name, across hosts
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records.iter().filter(move |r| r.name == name)
    }
}

/// Options for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Wrap every host in a dry-run overlay
    pub dry_run: bool,
    /// Verbose output
    pub verbose: bool,
    /// Resources may print content diffs of what they change
    pub diff: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut summary = Summary::default();
        summary.add(&Outcome::Applied(Status::Created));
        summary.add(&Outcome::Applied(Status::Unchanged));
        summary.add(&Outcome::Failed { error: "x".into() });
        summary.add(&Outcome::Skipped {
            prerequisite: "k".into(),
        });

        assert_eq!(summary.created, 1);
        assert_eq!(summary.total_changes(), 1);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_report_ensure_success() {
        let mut report = Report::default();
        assert!(report.ensure_success().is_ok());

        report.summary.add(&Outcome::Skipped {
            prerequisite: "k".into(),
        });
        let err = report.ensure_success().unwrap_err();
        assert_eq!(err.to_string(), "0 resource(s) failed, 1 skipped");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Applied(Status::Deleted).label(), "deleted");
        assert_eq!(Outcome::Failed { error: String::new() }.label(), "failed");
        assert!(Outcome::Applied(Status::Unchanged).is_success());
        assert_eq!(Outcome::Applied(Status::Modified).status(), Some(Status::Modified));
    }
}

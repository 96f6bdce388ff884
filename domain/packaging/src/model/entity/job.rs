use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::vo::Wallclock;

/// One schedulable unit of computation, created by the external workflow
/// builder and carried through packaging and submission.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Job {
    /// Unique job name, also the base name of its rendered script.
    pub name: String,
    pub experiment_id: String,
    pub section: String,
    pub status: JobStatus,
    /// Name of the platform the job targets.
    pub platform_name: String,
    pub queue: String,
    pub processors: u32,
    pub threads: u32,
    pub tasks: u32,
    pub wallclock: Wallclock,
    pub check_policy: CheckPolicy,
    /// Whether a failing pre-submission check is worth a warning log.
    pub check_warnings: bool,
    /// Template file name under the project directory.
    pub template: String,
    /// Export directive, "none" disables it.
    pub export: String,
    pub custom_directives: BTreeSet<String>,
    /// Platform-assigned id, set once submitted.
    pub submitted_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Waiting,
    Ready,
    Submitted,
    Queuing,
    Running,
    Completed,
    Failed,
}

/// When the job's template must be validated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckPolicy {
    /// Validate immediately before submission.
    OnSubmission,
    #[default]
    None,
}

impl Job {
    /// File name of the rendered script, local and remote.
    pub fn script_file_name(&self) -> String {
        format!("{}.cmd", self.name)
    }

    /// Script variant submitted by a wrapped-simple package.
    pub fn wrapped_script_file_name(&self) -> String {
        format!("{}_wrapped.cmd", self.name)
    }

    /// Marker left behind by a completed run; stale copies must be cleared
    /// before resubmission.
    pub fn completed_marker(&self) -> String {
        format!("{}_COMPLETED", self.name)
    }

    pub fn stat_marker(&self) -> String {
        format!("{}_STAT", self.name)
    }

    /// Records the platform id and the submit timestamp.
    pub fn mark_submitted(&mut self, id: String) {
        self.submitted_id = Some(id);
        self.status = JobStatus::Submitted;
        self.submitted_at = Some(Utc::now());
    }
}

//! Merge job types.
//!
//! This module defines the lifecycle of the asynchronous label-map combine
//! job: its [`JobStatus`], the [`MergeParameters`] handed to the runner, and
//! the [`MergeJob`] record the controller keeps while the job is alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{NodeRef, StepError};

/// The status of a merge job as reported by the runner.
///
/// Statuses advance in the order
/// `Idle → Requested → Running → {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobStatus {
    /// No job has been submitted.
    #[default]
    Idle,

    /// The job was handed to the runner but has not started.
    Requested,

    /// The job is executing.
    Running,

    /// The job finished and its output is ready.
    Completed,

    /// The job finished with an error.
    Failed,

    /// The job was cancelled before finishing.
    Cancelled,
}

impl JobStatus {
    /// Returns true while the runner still owns the job.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Requested | Self::Running)
    }

    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position in the lifecycle; terminal statuses share the last rank.
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Requested => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::Cancelled => 3,
        }
    }

    /// Returns the string the runner uses for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Requested => "Requested",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(Self::Idle),
            "Requested" | "Scheduled" => Ok(Self::Requested),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Failed" | "Completed with errors" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(StepError::Runner(format!("unknown job status {:?}", other))),
        }
    }
}

/// Identifies one submission to a [`JobRunner`](crate::runner::JobRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobHandle(pub u64);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Parameters of the label-map combine job.
///
/// Field names serialise to the parameter names of the external combine
/// module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeParameters {
    /// Result of the primary unit.
    #[serde(rename = "InputLabelMap_A")]
    pub input_a: NodeRef,

    /// Result of the secondary unit.
    #[serde(rename = "InputLabelMap_B")]
    pub input_b: NodeRef,

    /// Target that receives the combined label map.
    #[serde(rename = "OutputLabelMap")]
    pub output: NodeRef,

    /// Whether input A wins where both inputs are labelled.
    #[serde(rename = "FirstOverwrites")]
    pub first_overwrites: bool,
}

impl MergeParameters {
    /// Builds parameters with the fixed overwrite policy: where both inputs
    /// are labelled, input B wins. Set `first_overwrites` afterwards to let
    /// input A win instead.
    pub fn new(input_a: NodeRef, input_b: NodeRef, output: NodeRef) -> Self {
        Self {
            input_a,
            input_b,
            output,
            first_overwrites: false,
        }
    }

    /// Returns the parameters as a JSON object.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The controller's record of the merge job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeJob {
    /// Last known status.
    pub status: JobStatus,

    /// Handle of the current submission, if any.
    pub handle: Option<JobHandle>,

    /// Parameters of the current submission.
    pub parameters: Option<MergeParameters>,

    /// When the current submission was made.
    pub submitted_at: Option<DateTime<Utc>>,

    /// When the current submission reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,

    /// Last message from the runner (usually the failure reason).
    pub message: Option<String>,

    /// Number of submissions made for this job.
    pub attempts: u32,
}

impl MergeJob {
    /// Creates an idle job.
    pub fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            handle: None,
            parameters: None,
            submitted_at: None,
            finished_at: None,
            message: None,
            attempts: 0,
        }
    }

    /// Returns true while a submission is in flight.
    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    /// Records a new submission.
    pub fn mark_submitted(&mut self, handle: JobHandle, parameters: MergeParameters) {
        self.status = JobStatus::Requested;
        self.handle = Some(handle);
        self.parameters = Some(parameters);
        self.submitted_at = Some(Utc::now());
        self.finished_at = None;
        self.message = None;
        self.attempts += 1;
    }

    /// Marks the submission as running.
    pub fn mark_running(&mut self) {
        self.apply(JobStatus::Running, None);
    }

    /// Applies a status reported by the runner.
    ///
    /// Returns false, leaving the record untouched, when the status would
    /// move the job backwards or the job is already terminal.
    pub fn apply(&mut self, status: JobStatus, message: Option<String>) -> bool {
        if self.status.is_terminal() || status.rank() < self.status.rank() {
            return false;
        }
        self.status = status;
        if message.is_some() {
            self.message = message;
        }
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Returns the error for a failed or cancelled job.
    pub fn error(&self) -> Option<StepError> {
        match self.status {
            JobStatus::Failed => Some(StepError::JobFailed(
                self.message.clone().unwrap_or_else(|| "unknown error".to_string()),
            )),
            JobStatus::Cancelled => Some(StepError::JobCancelled),
            _ => None,
        }
    }
}

impl Default for MergeJob {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MergeParameters {
        MergeParameters::new(
            NodeRef::new("node-1", "liver-label"),
            NodeRef::new("node-2", "tumor-label"),
            NodeRef::new("node-3", "merged"),
        )
    }

    #[test]
    fn test_status_busy_and_terminal() {
        assert!(!JobStatus::Idle.is_busy());
        assert!(JobStatus::Requested.is_busy());
        assert!(JobStatus::Running.is_busy());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Idle,
            JobStatus::Requested,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_parses_runner_aliases() {
        assert_eq!("Scheduled".parse::<JobStatus>().unwrap(), JobStatus::Requested);
        assert_eq!(
            "Completed with errors".parse::<JobStatus>().unwrap(),
            JobStatus::Failed
        );
        assert!("Exploded".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_parameters_use_module_names() {
        let json = params().to_json().unwrap();
        assert_eq!(json["InputLabelMap_A"]["id"], "node-1");
        assert_eq!(json["InputLabelMap_B"]["id"], "node-2");
        assert_eq!(json["OutputLabelMap"]["id"], "node-3");
        assert_eq!(json["FirstOverwrites"], false);
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = MergeJob::new();
        assert_eq!(job.status, JobStatus::Idle);

        job.mark_submitted(JobHandle(1), params());
        assert_eq!(job.status, JobStatus::Requested);
        assert!(job.submitted_at.is_some());
        assert_eq!(job.attempts, 1);

        job.mark_running();
        assert!(job.is_busy());

        assert!(job.apply(JobStatus::Completed, None));
        assert!(job.finished_at.is_some());
        assert!(job.error().is_none());
    }

    #[test]
    fn test_apply_ignores_regressions_and_post_terminal_updates() {
        let mut job = MergeJob::new();
        job.mark_submitted(JobHandle(1), params());
        job.mark_running();

        assert!(!job.apply(JobStatus::Requested, None));
        assert_eq!(job.status, JobStatus::Running);

        assert!(job.apply(JobStatus::Failed, Some("bad input".to_string())));
        assert!(!job.apply(JobStatus::Completed, None));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_error_for_failed_and_cancelled() {
        let mut failed = MergeJob::new();
        failed.mark_submitted(JobHandle(1), params());
        failed.apply(JobStatus::Failed, Some("boom".to_string()));
        assert!(matches!(failed.error(), Some(StepError::JobFailed(m)) if m == "boom"));

        let mut cancelled = MergeJob::new();
        cancelled.mark_submitted(JobHandle(2), params());
        cancelled.apply(JobStatus::Cancelled, None);
        assert!(matches!(cancelled.error(), Some(StepError::JobCancelled)));
    }

    #[test]
    fn test_resubmission_resets_terminal_state() {
        let mut job = MergeJob::new();
        job.mark_submitted(JobHandle(1), params());
        job.apply(JobStatus::Failed, Some("boom".to_string()));

        job.mark_submitted(JobHandle(2), params());
        assert_eq!(job.status, JobStatus::Requested);
        assert_eq!(job.handle, Some(JobHandle(2)));
        assert!(job.message.is_none());
        assert!(job.finished_at.is_none());
        assert_eq!(job.attempts, 2);
    }
}

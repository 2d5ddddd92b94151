//! Step events.
//!
//! This module provides [`StepEvent`] for observing the controller. Events
//! are broadcast through a channel obtained from
//! [`StepController::subscribe`](crate::StepController::subscribe) and can
//! drive UIs, logging, or tests.

use crate::{JobHandle, JobStatus, UnitIndex};

/// An event emitted by the step controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepEvent {
    /// The workflow entered the step.
    Entered {
        /// The step the workflow came from.
        from: String,
    },

    /// The workflow left the step.
    Exited {
        /// The step the workflow is going to.
        to: String,
    },

    /// The secondary unit and merge stage were shown.
    UnitAdded,

    /// The secondary unit and merge stage were hidden.
    UnitRemoved,

    /// A unit reported that its segmentation is valid.
    UnitValid {
        /// The reporting slot.
        unit: UnitIndex,
    },

    /// The step's validity was reported to the host.
    ValidityReported {
        /// The reported gate.
        valid: bool,
    },

    /// A merge job was submitted.
    MergeSubmitted {
        /// Handle of the submission.
        handle: JobHandle,
    },

    /// Cancellation of the running merge job was requested.
    CancelRequested {
        /// Handle of the job.
        handle: JobHandle,
    },

    /// The merge job moved to a new status.
    MergeStatusChanged {
        /// Handle of the job.
        handle: JobHandle,
        /// The new status.
        status: JobStatus,
    },

    /// The merge job reached a terminal status.
    MergeFinished {
        /// Handle of the job.
        handle: JobHandle,
        /// The terminal status.
        status: JobStatus,
        /// Failure reason, if any.
        error: Option<String>,
    },

    /// An in-flight merge job was abandoned because its stage was removed.
    MergeAbandoned {
        /// Handle of the job.
        handle: JobHandle,
    },

    /// A status update arrived for a job the step no longer observes.
    StrayStatusIgnored {
        /// Handle named by the update.
        handle: JobHandle,
        /// Status named by the update.
        status: JobStatus,
    },

    /// The merge submit control was enabled or disabled.
    SubmitControlChanged {
        /// Whether submission is allowed.
        enabled: bool,
    },
}

impl StepEvent {
    /// Returns the job handle this event concerns, if any.
    pub fn handle(&self) -> Option<JobHandle> {
        match self {
            Self::MergeSubmitted { handle }
            | Self::CancelRequested { handle }
            | Self::MergeStatusChanged { handle, .. }
            | Self::MergeFinished { handle, .. }
            | Self::MergeAbandoned { handle }
            | Self::StrayStatusIgnored { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Returns true if this event reports a failed or cancelled merge.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::MergeFinished {
                status: JobStatus::Failed | JobStatus::Cancelled,
                ..
            }
        )
    }

    /// Returns true if this event reports a completed merge.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            Self::MergeFinished {
                status: JobStatus::Completed,
                ..
            }
        )
    }
}

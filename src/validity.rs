//! Step validity and the derived step state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::JobStatus;

/// Whether the step may be left going forward.
///
/// `units` yields `(visible, valid)` for every unit slot. Hidden units are
/// ignored. When the merge stage is shown the merge job must also have
/// completed.
pub fn step_validity(
    units: impl IntoIterator<Item = (bool, bool)>,
    merge_stage_visible: bool,
    job_status: JobStatus,
) -> bool {
    let units_valid = units
        .into_iter()
        .filter(|(visible, _)| *visible)
        .all(|(_, valid)| valid);

    units_valid && (!merge_stage_visible || job_status == JobStatus::Completed)
}

/// The step's position in its add/merge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    /// Only the primary unit is active.
    SingleUnit,
    /// The secondary unit and merge stage are shown, no job in flight.
    DualUnit,
    /// A merge job is in flight.
    Merging,
    /// The merge job completed.
    MergeResolved,
}

impl StepState {
    /// Derives the state from secondary-unit visibility and job status.
    pub fn derive(secondary_visible: bool, job_status: JobStatus) -> Self {
        if !secondary_visible {
            return Self::SingleUnit;
        }
        match job_status {
            JobStatus::Requested | JobStatus::Running => Self::Merging,
            JobStatus::Completed => Self::MergeResolved,
            JobStatus::Idle | JobStatus::Failed | JobStatus::Cancelled => Self::DualUnit,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SingleUnit => "single unit",
            Self::DualUnit => "dual unit",
            Self::Merging => "merging",
            Self::MergeResolved => "merge resolved",
        };
        f.write_str(name)
    }
}

//! Step status reporting.
//!
//! This module provides [`StepSnapshot`] for inspecting the current state of
//! a segmentation step.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{JobStatus, StepState, UnitIndex};

/// Flags of one unit slot at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// The slot.
    pub index: UnitIndex,
    /// Whether the unit participates in the step.
    pub visible: bool,
    /// Whether the unit is collapsed.
    pub collapsed: bool,
    /// The unit's own validity.
    pub valid: bool,
}

impl UnitSnapshot {
    fn status_char(&self) -> char {
        match (self.visible, self.valid) {
            (false, _) => '·',
            (true, true) => '✅',
            (true, false) => '⏳',
        }
    }
}

/// A point-in-time view of the whole step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// The step identifier.
    pub step_id: String,
    /// The step's display name.
    pub name: String,
    /// The derived lifecycle state.
    pub state: StepState,
    /// Both unit slots.
    pub units: Vec<UnitSnapshot>,
    /// Whether the merge stage is shown.
    pub merge_stage_visible: bool,
    /// The merge job's status (`Idle` when there is no job).
    pub job_status: JobStatus,
    /// The merge job's last message.
    pub job_message: Option<String>,
    /// Whether the step may be left going forward.
    pub valid: bool,
}

impl StepSnapshot {
    /// Returns the slots that are visible but not yet valid.
    pub fn pending_units(&self) -> Vec<UnitIndex> {
        self.units
            .iter()
            .filter(|u| u.visible && !u.valid)
            .map(|u| u.index)
            .collect()
    }

    fn job_char(&self) -> char {
        match self.job_status {
            JobStatus::Idle => '⏳',
            JobStatus::Requested | JobStatus::Running => '🔄',
            JobStatus::Completed => '✅',
            JobStatus::Failed => '❌',
            JobStatus::Cancelled => '⛔',
        }
    }
}

impl fmt::Display for StepSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Step \"{}\" ({}): {}", self.name, self.step_id, self.state)?;

        for unit in &self.units {
            let mut flags = Vec::new();
            if !unit.visible {
                flags.push("hidden");
            } else if unit.collapsed {
                flags.push("collapsed");
            }
            write!(f, "  {} {:<10}", unit.status_char(), unit.index.to_string())?;
            if unit.visible {
                write!(f, " {}", if unit.valid { "valid" } else { "pending" })?;
            }
            if !flags.is_empty() {
                write!(f, " [{}]", flags.join(", "))?;
            }
            writeln!(f)?;
        }

        if self.merge_stage_visible {
            write!(f, "  {} {:<10} {}", self.job_char(), "merge", self.job_status)?;
            if let Some(ref message) = self.job_message {
                write!(f, "  Error: {}", message)?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        let pending = self.pending_units();
        if !pending.is_empty() {
            let names: Vec<String> = pending.iter().map(ToString::to_string).collect();
            writeln!(f, "Waiting on: {}", names.join(", "))?;
        }
        writeln!(
            f,
            "Validity: {}",
            if self.valid { "pass" } else { "blocked" }
        )
    }
}

//! Asynchronous notifications delivered to the controller.
//!
//! Units and the job runner never call into the controller directly. They
//! send a [`StepSignal`] on a [`SignalSender`]; the host (or
//! [`driver`](crate::driver)) feeds each signal to
//! [`StepController::handle_signal`](crate::StepController::handle_signal)
//! on the controller's own task.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{JobHandle, JobStatus, UnitIndex};

/// Sending half of the signal channel.
pub type SignalSender = mpsc::UnboundedSender<StepSignal>;

/// Receiving half of the signal channel.
pub type SignalReceiver = mpsc::UnboundedReceiver<StepSignal>;

/// Creates a signal channel.
pub fn channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

/// A status change reported by the job runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// The submission the status belongs to.
    pub handle: JobHandle,
    /// The new status.
    pub status: JobStatus,
    /// Optional detail, usually the failure reason.
    pub message: Option<String>,
}

impl StatusUpdate {
    /// Creates an update without a message.
    pub fn new(handle: JobHandle, status: JobStatus) -> Self {
        Self {
            handle,
            status,
            message: None,
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A notification for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepSignal {
    /// A unit's own segmentation became valid.
    UnitValid(UnitIndex),

    /// The merge job's status changed.
    MergeStatus(StatusUpdate),
}

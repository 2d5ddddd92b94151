//! The external job runner.
//!
//! This module provides the [`JobRunner`] trait the controller uses to drive
//! the label-map combine job, along with [`LocalJobRunner`], an in-process
//! implementation that performs the combine on a tokio task.
//!
//! Runners never block: [`JobRunner::submit`] returns as soon as the job is
//! queued, and every later status change is delivered as a
//! [`StepSignal::MergeStatus`](crate::StepSignal::MergeStatus) to whoever
//! observes the handle.

mod local;

pub use local::LocalJobRunner;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::{JobHandle, MergeParameters, Result};

/// Identifies one status observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// A service that runs label-map combine jobs asynchronously.
///
/// # Contract
///
/// - `submit` returns immediately with a fresh handle.
/// - Each handle accepts one observer. Registering it replays the job's
///   current status, then every later change is sent in lifecycle order.
/// - `request_cancel` is cooperative: the job reports `Cancelled` later
///   through the same channel, or finishes normally if it was too late.
/// - `remove_observer` is idempotent.
pub trait JobRunner: Debug + Send {
    /// Queues a job and returns its handle.
    fn submit(&mut self, parameters: MergeParameters) -> Result<JobHandle>;

    /// Asks a job to stop.
    fn request_cancel(&mut self, handle: JobHandle) -> Result<()>;

    /// Starts delivering status changes for `handle`.
    fn observe_status(&mut self, handle: JobHandle) -> Result<ObserverId>;

    /// Stops delivering status changes to `observer`.
    fn remove_observer(&mut self, observer: ObserverId);
}

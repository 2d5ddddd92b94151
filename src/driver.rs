//! Signal pumping.
//!
//! The controller is single-threaded: signals from units and the job runner
//! queue on a channel and are applied one at a time on the task that owns
//! the controller. These helpers do that pumping.

use tracing::{debug, warn};

use crate::{JobStatus, SignalReceiver, StepController};

/// Applies every signal already queued, without waiting.
///
/// Returns the number of signals applied.
pub fn drain_pending(controller: &mut StepController, signals: &mut SignalReceiver) -> usize {
    let mut applied = 0;
    while let Ok(signal) = signals.try_recv() {
        controller.handle_signal(signal);
        applied += 1;
    }
    applied
}

/// Applies signals until the controller stops observing a merge job.
///
/// Returns the job status once settled. Returns immediately when no job
/// is being observed.
pub async fn run_until_settled(
    controller: &mut StepController,
    signals: &mut SignalReceiver,
) -> JobStatus {
    while controller.is_observing() {
        match signals.recv().await {
            Some(signal) => controller.handle_signal(signal),
            None => {
                warn!("signal channel closed while a merge was observed");
                break;
            }
        }
    }

    let trailing = drain_pending(controller, signals);
    if trailing > 0 {
        debug!(trailing, "applied signals queued behind the merge");
    }
    controller.job_status()
}

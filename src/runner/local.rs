//! In-process job runner.
//!
//! This module provides [`LocalJobRunner`], which combines label maps held in
//! a [`MemoryScene`] on a spawned tokio task and reports progress on the
//! step's signal channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{JobRunner, ObserverId};
use crate::{
    JobHandle, JobStatus, LabelMap, MemoryScene, MergeParameters, Result, SignalSender,
    StatusUpdate, StepError, StepSignal,
};

#[derive(Debug)]
struct JobEntry {
    status: JobStatus,
    message: Option<String>,
    cancel: Arc<AtomicBool>,
    observer: Option<ObserverId>,
    released: bool,
}

#[derive(Debug, Default)]
struct RunnerState {
    jobs: HashMap<JobHandle, JobEntry>,
    observers: HashMap<ObserverId, JobHandle>,
    next_observer: u64,
}

/// Records a status change and forwards it to the job's observer, if any.
///
/// A job that finishes after its observer was released is forgotten.
fn publish(
    state: &Mutex<RunnerState>,
    signals: &SignalSender,
    handle: JobHandle,
    status: JobStatus,
    message: Option<String>,
) {
    let Ok(mut state) = state.lock() else {
        warn!(%handle, "runner state poisoned, dropping status");
        return;
    };
    let Some(entry) = state.jobs.get_mut(&handle) else {
        return;
    };
    entry.status = status;
    entry.message = message.clone();

    if status.is_terminal() && entry.released {
        debug!(%handle, %status, "forgetting released job");
        state.jobs.remove(&handle);
        return;
    }

    if entry.observer.is_some() {
        let mut update = StatusUpdate::new(handle, status);
        update.message = message;
        // The receiver is gone once the step is torn down.
        let _ = signals.send(StepSignal::MergeStatus(update));
    }
}

/// Reads both inputs, combines them and returns the merged label map.
fn combine(scene: &MemoryScene, parameters: &MergeParameters) -> Result<LabelMap> {
    let a = scene.label_map(&parameters.input_a)?.ok_or_else(|| {
        StepError::JobFailed(format!("{} holds no label data", parameters.input_a))
    })?;
    let b = scene.label_map(&parameters.input_b)?.ok_or_else(|| {
        StepError::JobFailed(format!("{} holds no label data", parameters.input_b))
    })?;
    LabelMap::combine(&a, &b, parameters.first_overwrites)
}

/// A [`JobRunner`] that combines label maps from a [`MemoryScene`].
///
/// Must be used from within a tokio runtime; each submission spawns a task.
/// A job is forgotten once it has finished and its observer was removed, in
/// either order. Jobs that were never observed stay queryable through
/// [`status`](Self::status).
///
/// # Example
///
/// ```
/// use segment_step::{signal, JobStatus, LabelMap, MemoryScene, MergeParameters, StepSignal};
/// use segment_step::runner::{JobRunner, LocalJobRunner};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> segment_step::Result<()> {
/// let scene = MemoryScene::new();
/// let a = scene.add_label_map("a", LabelMap::new([2, 1, 1], vec![1, 0])?)?;
/// let b = scene.add_label_map("b", LabelMap::new([2, 1, 1], vec![0, 2])?)?;
/// let out = scene.add_volume("merged")?;
///
/// let (tx, mut rx) = signal::channel();
/// let mut runner = LocalJobRunner::new(scene.clone(), tx);
/// let handle = runner.submit(MergeParameters::new(a, b, out.clone()))?;
/// runner.observe_status(handle)?;
///
/// while let Some(StepSignal::MergeStatus(update)) = rx.recv().await {
///     if update.status.is_terminal() {
///         assert_eq!(update.status, JobStatus::Completed);
///         break;
///     }
/// }
/// assert_eq!(scene.label_map(&out)?.unwrap().voxels(), &[1, 2]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalJobRunner {
    scene: MemoryScene,
    signals: SignalSender,
    state: Arc<Mutex<RunnerState>>,
    next_handle: Arc<Mutex<u64>>,
    work_delay: Duration,
}

impl LocalJobRunner {
    /// Creates a runner that reads and writes `scene` and reports on
    /// `signals`.
    pub fn new(scene: MemoryScene, signals: SignalSender) -> Self {
        Self {
            scene,
            signals,
            state: Arc::new(Mutex::new(RunnerState::default())),
            next_handle: Arc::new(Mutex::new(0)),
            work_delay: Duration::ZERO,
        }
    }

    /// Holds every job in `Running` for `delay` before combining.
    pub fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, RunnerState>> {
        self.state
            .lock()
            .map_err(|_| StepError::Runner("runner state poisoned".to_string()))
    }

    /// Returns the runner's view of a job's status.
    pub fn status(&self, handle: JobHandle) -> Option<JobStatus> {
        self.lock().ok()?.jobs.get(&handle).map(|j| j.status)
    }

    /// Returns the number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.lock().map(|s| s.observers.len()).unwrap_or(0)
    }

    fn allocate_handle(&self) -> Result<JobHandle> {
        let mut next = self
            .next_handle
            .lock()
            .map_err(|_| StepError::Runner("handle counter poisoned".to_string()))?;
        *next += 1;
        Ok(JobHandle(*next))
    }
}

impl JobRunner for LocalJobRunner {
    fn submit(&mut self, parameters: MergeParameters) -> Result<JobHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StepError::Runner(format!("no async runtime: {}", e)))?;

        let handle = self.allocate_handle()?;
        let cancel = Arc::new(AtomicBool::new(false));
        self.lock()?.jobs.insert(
            handle,
            JobEntry {
                status: JobStatus::Requested,
                message: None,
                cancel: cancel.clone(),
                observer: None,
                released: false,
            },
        );

        info!(%handle, output = %parameters.output, "combine job queued");
        if let Ok(json) = parameters.to_json() {
            debug!(%handle, parameters = %json, "combine parameters");
        }

        let scene = self.scene.clone();
        let signals = self.signals.clone();
        let state = self.state.clone();
        let delay = self.work_delay;

        runtime.spawn(async move {
            publish(&state, &signals, handle, JobStatus::Running, None);

            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }

            if cancel.load(Ordering::SeqCst) {
                debug!(%handle, "combine job cancelled before start");
                publish(&state, &signals, handle, JobStatus::Cancelled, None);
                return;
            }

            let result = combine(&scene, &parameters).and_then(|merged| {
                if cancel.load(Ordering::SeqCst) {
                    return Err(StepError::JobCancelled);
                }
                let labelled = merged.voxels().len() - merged.count_label(0);
                scene.set_label_map(&parameters.output, merged)?;
                Ok(labelled)
            });

            match result {
                Ok(labelled) => {
                    info!(%handle, labelled, "combine job completed");
                    publish(&state, &signals, handle, JobStatus::Completed, None);
                }
                Err(StepError::JobCancelled) => {
                    debug!(%handle, "combine job cancelled");
                    publish(&state, &signals, handle, JobStatus::Cancelled, None);
                }
                Err(e) => {
                    warn!(%handle, error = %e, "combine job failed");
                    publish(
                        &state,
                        &signals,
                        handle,
                        JobStatus::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        });

        Ok(handle)
    }

    fn request_cancel(&mut self, handle: JobHandle) -> Result<()> {
        let state = self.lock()?;
        let entry = state
            .jobs
            .get(&handle)
            .ok_or_else(|| StepError::Runner(format!("unknown job {}", handle)))?;

        if entry.status.is_terminal() {
            debug!(%handle, status = %entry.status, "cancel requested for finished job");
            return Ok(());
        }
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn observe_status(&mut self, handle: JobHandle) -> Result<ObserverId> {
        let mut state = self.lock()?;
        state.next_observer += 1;
        let observer = ObserverId(state.next_observer);

        let entry = state
            .jobs
            .get_mut(&handle)
            .ok_or_else(|| StepError::Runner(format!("unknown job {}", handle)))?;
        if let Some(existing) = entry.observer {
            return Err(StepError::Runner(format!(
                "{} is already observed by {}",
                handle, existing
            )));
        }
        entry.observer = Some(observer);
        entry.released = false;

        let mut replay = StatusUpdate::new(handle, entry.status);
        replay.message = entry.message.clone();
        state.observers.insert(observer, handle);

        let _ = self.signals.send(StepSignal::MergeStatus(replay));
        Ok(observer)
    }

    fn remove_observer(&mut self, observer: ObserverId) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        let Some(handle) = state.observers.remove(&observer) else {
            return;
        };
        let finished = match state.jobs.get_mut(&handle) {
            Some(entry) => {
                entry.observer = None;
                entry.released = true;
                entry.status.is_terminal()
            }
            None => false,
        };
        if finished {
            state.jobs.remove(&handle);
        }
    }
}

//! The segmentation step controller.
//!
//! This module provides [`StepController`] and [`StepControllerBuilder`].
//! The controller owns the two unit slots, the merge stage and the merge
//! job record, and reports the step's validity gate to the host.
//!
//! Every method runs on the caller's task and returns without waiting for
//! the merge job. Job progress and unit validity arrive later as
//! [`StepSignal`]s, handed to [`StepController::handle_signal`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use crate::host::{preview_bindings, ViewRole};
use crate::runner::{JobRunner, ObserverId};
use crate::scene::node_id;
use crate::status::{StepSnapshot, UnitSnapshot};
use crate::unit::UnitSlot;
use crate::validity::step_validity;
use crate::{
    Color, JobHandle, JobStatus, MergeJob, MergeParameters, NodeRef, Result, SceneStore,
    SegmentationUnit, SignalSender, StatusUpdate, StepConfig, StepError, StepEvent, StepSignal,
    StepState, TransitionKind, UnitIndex, ViewBinder, WorkflowHost,
};

/// Default channel capacity for step events.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

const HELP: &str = "Segment the area of interest in the image. To do so, use the paint \
brush to quickly mark the organ with the \"Organ (Foreground)\". Also mark what is the \
background with the \"Other (Background)\". Run the segmenter to segment the rest of the \
organ for you.";

/// The merge stage region: its visibility, output target and controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStage {
    visible: bool,
    expanded: bool,
    output: Option<NodeRef>,
    submit_enabled: bool,
    submit_checked: bool,
    save_visible: bool,
    save_enabled: bool,
}

impl MergeStage {
    fn new() -> Self {
        Self {
            visible: false,
            expanded: false,
            output: None,
            submit_enabled: true,
            submit_checked: false,
            save_visible: false,
            save_enabled: false,
        }
    }

    /// Returns true if the merge stage is shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Returns true if the merge stage is expanded.
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Returns the selected output label map.
    pub fn output(&self) -> Option<&NodeRef> {
        self.output.as_ref()
    }

    /// Returns true if a merge may be submitted from the UI.
    pub fn is_submit_enabled(&self) -> bool {
        self.submit_enabled
    }

    /// Returns true while the submit control shows a running merge.
    pub fn is_submit_checked(&self) -> bool {
        self.submit_checked
    }

    /// Returns true if the save control is shown.
    pub fn is_save_visible(&self) -> bool {
        self.save_visible
    }

    /// Returns true if the save control is enabled.
    pub fn is_save_enabled(&self) -> bool {
        self.save_enabled
    }
}

/// Controller for one segmentation step instance.
///
/// # Construction
///
/// Use [`StepController::builder()`] to inject the collaborators. All of
/// them are required except the signal sender, which is only needed when
/// units report validity through the signal channel.
///
/// # States
///
/// The controller moves between the [`StepState`]s `SingleUnit`,
/// `DualUnit`, `Merging` and `MergeResolved`. Operations invoked in a state
/// that does not allow them are logged and ignored.
pub struct StepController {
    config: StepConfig,
    name: String,
    description: String,
    primary: UnitSlot,
    secondary: UnitSlot,
    merge: MergeStage,
    job: Option<MergeJob>,
    observer: Option<ObserverId>,
    host: Box<dyn WorkflowHost>,
    runner: Box<dyn JobRunner>,
    scene: Box<dyn SceneStore>,
    views: Box<dyn ViewBinder>,
    event_tx: broadcast::Sender<StepEvent>,
    last_validity: Option<bool>,
}

impl StepController {
    /// Creates a new controller builder.
    pub fn builder() -> StepControllerBuilder {
        StepControllerBuilder::new()
    }

    /// Subscribes to step events.
    ///
    /// Events are not persisted; a receiver that falls behind may miss
    /// some.
    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.event_tx.subscribe()
    }

    /// Emits an event to all subscribers.
    fn emit(&self, event: StepEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the step identifier.
    pub fn id(&self) -> &str {
        &self.config.step_id
    }

    /// Returns the display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the help text.
    pub fn help(&self) -> &'static str {
        HELP
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Returns a unit slot.
    pub fn unit(&self, index: UnitIndex) -> &UnitSlot {
        match index {
            UnitIndex::Primary => &self.primary,
            UnitIndex::Secondary => &self.secondary,
        }
    }

    fn slot_mut(&mut self, index: UnitIndex) -> &mut UnitSlot {
        match index {
            UnitIndex::Primary => &mut self.primary,
            UnitIndex::Secondary => &mut self.secondary,
        }
    }

    /// Returns the merge stage.
    pub fn merge_stage(&self) -> &MergeStage {
        &self.merge
    }

    /// Returns the merge job record, if the secondary unit was added.
    pub fn job(&self) -> Option<&MergeJob> {
        self.job.as_ref()
    }

    /// Returns the merge job status, `Idle` when there is no job.
    pub fn job_status(&self) -> JobStatus {
        self.job.as_ref().map_or(JobStatus::Idle, |j| j.status)
    }

    /// Returns true while a status observer is registered.
    pub fn is_observing(&self) -> bool {
        self.observer.is_some()
    }

    /// Returns the derived lifecycle state.
    pub fn state(&self) -> StepState {
        StepState::derive(self.secondary.is_visible(), self.job_status())
    }

    /// Returns the current validity without reporting it.
    pub fn validity(&self) -> bool {
        step_validity(
            [&self.primary, &self.secondary]
                .into_iter()
                .map(|slot| (slot.is_visible(), slot.is_valid())),
            self.merge.visible,
            self.job_status(),
        )
    }

    /// Recomputes validity and reports it to the host.
    ///
    /// When the merge stage is shown, the save control's visibility and
    /// enabled state follow the result.
    pub fn recompute_validity(&mut self, desired_branch: Option<&str>) -> bool {
        let valid = self.validity();

        if self.merge.visible {
            self.merge.save_visible = valid;
            self.merge.save_enabled = valid;
        } else {
            self.merge.save_visible = false;
            self.merge.save_enabled = false;
        }

        self.host.report_validity(valid, desired_branch);

        if self.last_validity != Some(valid) {
            info!(step = %self.config.step_id, valid, "step validity changed");
        }
        self.last_validity = Some(valid);
        self.emit(StepEvent::ValidityReported { valid });
        valid
    }

    /// Handles the workflow entering this step.
    ///
    /// The primary unit is rebound to the upstream volumes every time,
    /// since earlier steps may have been re-run. Validity is recomputed
    /// last, after every unit reconciled its parameters.
    pub fn on_entry(&mut self, from: &str, transition: TransitionKind) {
        let span = info_span!("on_entry", step = %self.config.step_id, from = %from);
        let _enter = span.enter();
        debug!(?transition, "entering step");

        self.host.request_layout(self.config.layout_id);

        let upstream = self.host.upstream_volumes();
        self.primary
            .bind_volumes(upstream.master, &upstream.auxiliary);
        self.update_unit_views(UnitIndex::Primary);

        for index in UnitIndex::ALL {
            let unit = self.slot_mut(index).unit_mut();
            unit.refresh_undo_redo();
            unit.reconcile_parameters_from_ui();
        }

        self.emit(StepEvent::Entered {
            from: from.to_string(),
        });
        self.recompute_validity(None);
    }

    /// Handles the workflow leaving this step.
    pub fn on_exit(&mut self, to: &str, transition: TransitionKind) {
        debug!(step = %self.config.step_id, to = %to, ?transition, "leaving step");
        if to != self.config.step_id {
            self.primary.unit_mut().set_painting_enabled(false);
        }
        self.emit(StepEvent::Exited { to: to.to_string() });
    }

    /// Shows the secondary unit and the merge stage.
    ///
    /// Returns false, doing nothing, if the secondary unit is already shown.
    pub fn add_unit(&mut self) -> bool {
        if self.secondary.is_visible() {
            warn!(step = %self.config.step_id, "secondary unit already added");
            return false;
        }
        let span = info_span!("add_unit", step = %self.config.step_id);
        let _enter = span.enter();

        self.secondary.set_visible(true);
        let upstream = self.host.upstream_volumes();
        self.secondary
            .bind_volumes(upstream.master, &upstream.auxiliary);

        let primary_done = self.primary.is_valid();
        self.primary.set_collapsed(primary_done);
        self.secondary.set_collapsed(!primary_done);
        self.merge.visible = true;
        self.job = Some(MergeJob::new());

        let shown = if primary_done {
            UnitIndex::Secondary
        } else {
            UnitIndex::Primary
        };
        self.update_unit_views(shown);

        for index in UnitIndex::ALL {
            self.slot_mut(index).unit_mut().reconcile_parameters_from_ui();
        }

        info!(expanded = %shown, "secondary unit added");
        self.emit(StepEvent::UnitAdded);
        self.recompute_validity(None);
        true
    }

    /// Hides the secondary unit and the merge stage.
    ///
    /// A merge job still in flight is abandoned: its observer is released,
    /// cancellation is requested, and any later status for it is ignored.
    /// Returns false, doing nothing, if the secondary unit is not shown.
    pub fn remove_unit(&mut self) -> bool {
        if !self.secondary.is_visible() {
            warn!(step = %self.config.step_id, "secondary unit not present");
            return false;
        }

        self.secondary.set_visible(false);
        self.merge.visible = false;
        self.merge.expanded = false;
        self.abandon_job();

        info!(step = %self.config.step_id, "secondary unit removed");
        self.emit(StepEvent::UnitRemoved);
        self.recompute_validity(None);
        true
    }

    fn abandon_job(&mut self) {
        if let Some(job) = self.job.take() {
            if let (true, Some(handle)) = (job.is_busy(), job.handle) {
                warn!(%handle, "abandoning in-flight merge job");
                if let Err(e) = self.runner.request_cancel(handle) {
                    warn!(%handle, error = %e, "cancel of abandoned merge job failed");
                }
                self.emit(StepEvent::MergeAbandoned { handle });
            }
        }
        self.finish_observation();
    }

    /// Handles a unit reporting that its segmentation became valid.
    pub fn on_unit_valid(&mut self, index: UnitIndex) {
        debug!(unit = %index, "unit reported valid");

        match index {
            UnitIndex::Primary if !self.secondary.is_visible() => {
                self.emit(StepEvent::UnitValid { unit: index });
                self.recompute_validity(None);
            }
            UnitIndex::Primary => {
                self.primary.set_collapsed(true);
                self.secondary.set_collapsed(false);
                self.update_unit_views(UnitIndex::Secondary);
                self.emit(StepEvent::UnitValid { unit: index });
            }
            UnitIndex::Secondary => {
                if !self.secondary.is_visible() {
                    warn!("ignoring validity of hidden secondary unit");
                    return;
                }
                self.secondary.set_collapsed(true);
                self.merge.expanded = true;
                if let Some(result) = self.secondary.unit().result_label_map() {
                    self.seed_merge_output(&result);
                }
                self.update_merge_views();
                self.emit(StepEvent::UnitValid { unit: index });
            }
        }
    }

    /// Creates the merge output from `template` unless one is selected.
    fn seed_merge_output(&mut self, template: &NodeRef) {
        if self.merge.output.is_some() {
            return;
        }
        match self
            .scene
            .create_label_map_like(template, &self.config.merged_suffix)
        {
            Ok(output) => {
                debug!(output = %output, "created merge output");
                self.merge.output = Some(output);
            }
            Err(e) => warn!(error = %e, "could not create merge output"),
        }
    }

    /// Selects the label map that receives the merge result.
    pub fn select_merge_output(&mut self, output: Option<NodeRef>) {
        debug!(output = %node_id(output.as_ref()), "merge output selected");
        self.merge.output = output;
    }

    /// Builds the combine parameters from the current inputs and output.
    pub fn merge_parameters(&self) -> Result<MergeParameters> {
        let input_a = self.primary.unit().result_label_map().ok_or_else(|| {
            StepError::MissingInput("InputLabelMap_A: primary unit has no result".to_string())
        })?;
        let input_b = self.secondary.unit().result_label_map().ok_or_else(|| {
            StepError::MissingInput("InputLabelMap_B: secondary unit has no result".to_string())
        })?;
        let output = self.merge.output.clone().ok_or_else(|| {
            StepError::MissingInput("OutputLabelMap: no merge output selected".to_string())
        })?;
        Ok(MergeParameters::new(input_a, input_b, output))
    }

    /// Submits the merge job.
    ///
    /// Returns `Ok(None)` without submitting when the merge stage is hidden
    /// or a job is already in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if an input or the output is unset, or if the
    /// runner rejects the submission.
    pub fn start_merge(&mut self) -> Result<Option<JobHandle>> {
        if !self.merge.visible {
            warn!(step = %self.config.step_id, "merge stage hidden, not starting merge");
            return Ok(None);
        }
        if self.job.as_ref().is_some_and(MergeJob::is_busy) {
            warn!(step = %self.config.step_id, "merge already running");
            return Ok(None);
        }

        let parameters = self.merge_parameters()?;
        let span = info_span!("start_merge", step = %self.config.step_id);
        let _enter = span.enter();

        let handle = self.runner.submit(parameters.clone())?;
        self.finish_observation();
        match self.runner.observe_status(handle) {
            Ok(observer) => self.observer = Some(observer),
            Err(e) => {
                warn!(%handle, error = %e, "could not observe merge job");
                if let Err(cancel_err) = self.runner.request_cancel(handle) {
                    warn!(%handle, error = %cancel_err, "cancel of unobserved job failed");
                }
                return Err(e);
            }
        }

        let job = self.job.get_or_insert_with(MergeJob::new);
        job.mark_submitted(handle, parameters);
        job.mark_running();

        self.merge.submit_checked = true;
        self.set_submit_enabled(false);

        info!(%handle, "merge submitted");
        self.emit(StepEvent::MergeSubmitted { handle });
        self.recompute_validity(None);
        Ok(Some(handle))
    }

    /// Requests cancellation of the running merge job.
    ///
    /// The job's status only changes when the runner reports `Cancelled`.
    /// Returns false, doing nothing, if no job is running.
    pub fn cancel_merge(&mut self) -> Result<bool> {
        let handle = match self.job.as_ref() {
            Some(job) if job.status == JobStatus::Running => job.handle,
            _ => None,
        };
        let Some(handle) = handle else {
            warn!(step = %self.config.step_id, "no running merge to cancel");
            return Ok(false);
        };

        self.runner.request_cancel(handle)?;
        info!(%handle, "merge cancellation requested");
        self.emit(StepEvent::CancelRequested { handle });
        Ok(true)
    }

    /// Handles a status change of the merge job.
    ///
    /// Updates for a handle the step no longer observes are ignored.
    pub fn on_merge_status_changed(&mut self, update: StatusUpdate) {
        let active = self.job.as_ref().and_then(|j| j.handle);
        if !self.merge.visible || self.observer.is_none() || active != Some(update.handle) {
            debug!(handle = %update.handle, status = %update.status, "ignoring stray merge status");
            self.emit(StepEvent::StrayStatusIgnored {
                handle: update.handle,
                status: update.status,
            });
            return;
        }

        let Some(job) = self.job.as_mut() else {
            return;
        };
        let applied = job.apply(update.status, update.message);
        let status = job.status;
        let busy = job.is_busy();
        let error = job.error().map(|e| e.to_string());

        if !applied {
            debug!(handle = %update.handle, status = %update.status, current = %status, "out-of-order merge status");
            return;
        }
        self.emit(StepEvent::MergeStatusChanged {
            handle: update.handle,
            status,
        });

        if status == JobStatus::Completed {
            self.update_merge_views();
        }

        if !busy {
            match status {
                JobStatus::Completed => info!(handle = %update.handle, "merge completed"),
                _ => warn!(handle = %update.handle, %status, error = ?error, "merge did not complete"),
            }
            self.finish_observation();
            self.emit(StepEvent::MergeFinished {
                handle: update.handle,
                status,
                error,
            });
            self.recompute_validity(None);
        }
    }

    /// Releases the status observer and re-enables submission.
    ///
    /// Safe to call any number of times.
    fn finish_observation(&mut self) {
        if let Some(observer) = self.observer.take() {
            debug!(%observer, "releasing merge observer");
            self.runner.remove_observer(observer);
        }
        self.merge.submit_checked = false;
        self.set_submit_enabled(true);
    }

    fn set_submit_enabled(&mut self, enabled: bool) {
        if self.merge.submit_enabled != enabled {
            self.merge.submit_enabled = enabled;
            self.emit(StepEvent::SubmitControlChanged { enabled });
        }
    }

    /// Dispatches a signal from a unit or the job runner.
    pub fn handle_signal(&mut self, signal: StepSignal) {
        match signal {
            StepSignal::UnitValid(index) => self.on_unit_valid(index),
            StepSignal::MergeStatus(update) => self.on_merge_status_changed(update),
        }
    }

    /// Returns the label map this step hands to later steps.
    pub fn merge_result(&self) -> Option<NodeRef> {
        if self.merge.visible {
            self.merge.output.clone()
        } else {
            self.primary.unit().result_label_map()
        }
    }

    /// Returns the display colour matching [`merge_result`](Self::merge_result).
    pub fn representative_color(&self) -> Color {
        if self.merge.visible {
            self.secondary.unit().representative_color()
        } else {
            self.primary.unit().representative_color()
        }
    }

    /// Asks the host to save the merged label map.
    ///
    /// Returns false, doing nothing, unless the save control is enabled.
    pub fn save_merge_result(&mut self) -> bool {
        let output = match (&self.merge.output, self.merge.visible && self.merge.save_enabled) {
            (Some(output), true) => output.clone(),
            _ => {
                warn!(step = %self.config.step_id, "merge result not ready to save");
                return false;
            }
        };
        self.host.save_file(
            "Merged Image",
            "VolumeFile",
            &self.config.save_extension,
            &output,
        );
        true
    }

    /// Opens the host's combine module with the current merge parameters.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::PreconditionViolation`] when the merge stage is
    /// hidden, or [`StepError::MissingInput`] when an input or the output is
    /// unset.
    pub fn open_combine_module(&mut self) -> Result<()> {
        if !self.merge.visible {
            return Err(StepError::PreconditionViolation(
                "merge stage is hidden".to_string(),
            ));
        }
        let parameters = self.merge_parameters()?;
        self.host
            .open_module(&self.config.combine_module, &parameters);
        Ok(())
    }

    /// Applies a new configuration to the step and its units.
    pub fn update_configuration(&mut self, config: StepConfig) -> Result<()> {
        config.validate()?;
        for index in UnitIndex::ALL {
            self.slot_mut(index).unit_mut().update_configuration(&config);
        }
        self.secondary
            .unit_mut()
            .set_result_suffix(&config.secondary_suffix);

        let organ = config.organ_lower();
        self.name = format!("Segment {}", organ);
        self.description = format!("Segment the {} from the image", organ);
        self.config = config;
        Ok(())
    }

    /// Returns a snapshot of the step.
    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            step_id: self.config.step_id.clone(),
            name: self.name.clone(),
            state: self.state(),
            units: UnitIndex::ALL
                .into_iter()
                .map(|index| {
                    let slot = self.unit(index);
                    UnitSnapshot {
                        index,
                        visible: slot.is_visible(),
                        collapsed: slot.is_collapsed(),
                        valid: slot.is_valid(),
                    }
                })
                .collect(),
            merge_stage_visible: self.merge.visible,
            job_status: self.job_status(),
            job_message: self.job.as_ref().and_then(|j| j.message.clone()),
            valid: self.validity(),
        }
    }

    fn update_unit_views(&mut self, index: UnitIndex) {
        let unit = self.unit(index).unit();
        let bindings = preview_bindings([
            (ViewRole::Background, node_id(unit.master_volume().as_ref())),
            (ViewRole::Label, node_id(unit.result_label_map().as_ref())),
        ]);
        self.views.set_view_bindings(bindings);
    }

    fn update_merge_views(&mut self) {
        let bindings = preview_bindings([
            (
                ViewRole::Background,
                node_id(self.primary.unit().result_label_map().as_ref()),
            ),
            (
                ViewRole::Foreground,
                node_id(self.secondary.unit().result_label_map().as_ref()),
            ),
            (ViewRole::Label, node_id(self.merge.output.as_ref())),
        ]);
        self.views.set_view_bindings(bindings);
    }
}

impl std::fmt::Debug for StepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepController")
            .field("step_id", &self.config.step_id)
            .field("state", &self.state())
            .field("merge", &self.merge)
            .field("job_status", &self.job_status())
            .field("observing", &self.observer.is_some())
            .finish()
    }
}

/// Builder for [`StepController`].
#[derive(Default)]
pub struct StepControllerBuilder {
    config: StepConfig,
    primary: Option<Box<dyn SegmentationUnit>>,
    secondary: Option<Box<dyn SegmentationUnit>>,
    host: Option<Box<dyn WorkflowHost>>,
    runner: Option<Box<dyn JobRunner>>,
    scene: Option<Box<dyn SceneStore>>,
    views: Option<Box<dyn ViewBinder>>,
    signals: Option<SignalSender>,
}

impl StepControllerBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration (defaults to [`StepConfig::default`]).
    pub fn config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the primary unit.
    pub fn primary(mut self, unit: impl SegmentationUnit + 'static) -> Self {
        self.primary = Some(Box::new(unit));
        self
    }

    /// Sets the secondary unit.
    pub fn secondary(mut self, unit: impl SegmentationUnit + 'static) -> Self {
        self.secondary = Some(Box::new(unit));
        self
    }

    /// Sets the hosting workflow engine.
    pub fn host(mut self, host: impl WorkflowHost + 'static) -> Self {
        self.host = Some(Box::new(host));
        self
    }

    /// Sets the merge job runner.
    pub fn runner(mut self, runner: impl JobRunner + 'static) -> Self {
        self.runner = Some(Box::new(runner));
        self
    }

    /// Sets the scene used to create the merge output.
    pub fn scene(mut self, scene: impl SceneStore + 'static) -> Self {
        self.scene = Some(Box::new(scene));
        self
    }

    /// Sets the preview view binder.
    pub fn views(mut self, views: impl ViewBinder + 'static) -> Self {
        self.views = Some(Box::new(views));
        self
    }

    /// Connects both units' validity notifications to `signals`.
    pub fn signals(mut self, signals: SignalSender) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Builds the controller.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Config`] if a collaborator is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<StepController> {
        self.config.validate()?;

        let missing = |what: &str| StepError::Config(format!("{} is required", what));
        let mut primary = self.primary.ok_or_else(|| missing("primary unit"))?;
        let mut secondary = self.secondary.ok_or_else(|| missing("secondary unit"))?;
        let host = self.host.ok_or_else(|| missing("workflow host"))?;
        let runner = self.runner.ok_or_else(|| missing("job runner"))?;
        let scene = self.scene.ok_or_else(|| missing("scene"))?;
        let views = self.views.ok_or_else(|| missing("view binder"))?;

        secondary.set_result_suffix(&self.config.secondary_suffix);
        if let Some(signals) = self.signals {
            primary.connect_validity(UnitIndex::Primary, signals.clone());
            secondary.connect_validity(UnitIndex::Secondary, signals);
        }

        let organ = self.config.organ_lower();
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);

        Ok(StepController {
            name: format!("Segment {}", organ),
            description: format!("Segment the {} from the image", organ),
            config: self.config,
            primary: UnitSlot::new(primary, true, false),
            secondary: UnitSlot::new(secondary, false, true),
            merge: MergeStage::new(),
            job: None,
            observer: None,
            host,
            runner,
            scene,
            views,
            event_tx,
            last_validity: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PREVIEW_VIEW;
    use crate::{MemoryScene, UpstreamVolumes, ViewBindings};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Default)]
    struct UnitState {
        valid: bool,
        result: Option<NodeRef>,
        master: Option<NodeRef>,
        auxiliary: Vec<(usize, Option<NodeRef>)>,
        color: Option<Color>,
        visible: Option<bool>,
        collapsed: Option<bool>,
        painting: Option<bool>,
        suffix: Option<String>,
        organ: Option<String>,
        connected: Option<UnitIndex>,
    }

    #[derive(Debug)]
    struct MockUnit {
        name: &'static str,
        state: Arc<Mutex<UnitState>>,
        log: Log,
    }

    impl SegmentationUnit for MockUnit {
        fn set_master_volume(&mut self, volume: Option<NodeRef>) {
            self.state.lock().unwrap().master = volume;
        }
        fn set_auxiliary_volume(&mut self, index: usize, volume: Option<NodeRef>) {
            self.state.lock().unwrap().auxiliary.push((index, volume));
        }
        fn master_volume(&self) -> Option<NodeRef> {
            self.state.lock().unwrap().master.clone()
        }
        fn is_segmentation_valid(&self) -> bool {
            self.state.lock().unwrap().valid
        }
        fn result_label_map(&self) -> Option<NodeRef> {
            self.state.lock().unwrap().result.clone()
        }
        fn representative_color(&self) -> Color {
            self.state.lock().unwrap().color.unwrap_or(Color::rgb(0, 0, 0))
        }
        fn set_visible(&mut self, visible: bool) {
            self.state.lock().unwrap().visible = Some(visible);
        }
        fn set_collapsed(&mut self, collapsed: bool) {
            self.state.lock().unwrap().collapsed = Some(collapsed);
        }
        fn reconcile_parameters_from_ui(&mut self) {
            self.log.lock().unwrap().push(format!("reconcile:{}", self.name));
        }
        fn set_painting_enabled(&mut self, enabled: bool) {
            self.state.lock().unwrap().painting = Some(enabled);
        }
        fn connect_validity(&mut self, index: UnitIndex, _signals: SignalSender) {
            self.state.lock().unwrap().connected = Some(index);
        }
        fn set_result_suffix(&mut self, suffix: &str) {
            self.state.lock().unwrap().suffix = Some(suffix.to_string());
        }
        fn update_configuration(&mut self, config: &StepConfig) {
            self.state.lock().unwrap().organ = Some(config.workflow.organ.clone());
        }
    }

    #[derive(Debug, Default)]
    struct HostState {
        upstream: UpstreamVolumes,
        layouts: Vec<u32>,
        saved: Vec<(String, String, String, NodeRef)>,
        opened: Vec<(String, MergeParameters)>,
    }

    #[derive(Debug)]
    struct MockHost {
        state: Arc<Mutex<HostState>>,
        log: Log,
    }

    impl WorkflowHost for MockHost {
        fn report_validity(&mut self, valid: bool, _desired_branch: Option<&str>) {
            self.log.lock().unwrap().push(format!("validity:{}", valid));
        }
        fn request_layout(&mut self, layout_id: u32) {
            self.state.lock().unwrap().layouts.push(layout_id);
        }
        fn upstream_volumes(&self) -> UpstreamVolumes {
            self.state.lock().unwrap().upstream.clone()
        }
        fn save_file(&mut self, description: &str, file_type: &str, extension: &str, node: &NodeRef) {
            self.state.lock().unwrap().saved.push((
                description.to_string(),
                file_type.to_string(),
                extension.to_string(),
                node.clone(),
            ));
        }
        fn open_module(&mut self, module: &str, parameters: &MergeParameters) {
            self.state
                .lock()
                .unwrap()
                .opened
                .push((module.to_string(), parameters.clone()));
        }
    }

    #[derive(Debug, Default)]
    struct RunnerLog {
        submissions: Vec<MergeParameters>,
        cancels: Vec<JobHandle>,
        observed: Vec<ObserverId>,
        removed: Vec<ObserverId>,
        reject_submit: bool,
    }

    /// Records requests; statuses are fed to the controller by the test.
    #[derive(Debug)]
    struct ScriptedRunner(Arc<Mutex<RunnerLog>>);

    impl JobRunner for ScriptedRunner {
        fn submit(&mut self, parameters: MergeParameters) -> Result<JobHandle> {
            let mut log = self.0.lock().unwrap();
            if log.reject_submit {
                return Err(StepError::Runner("queue full".to_string()));
            }
            log.submissions.push(parameters);
            Ok(JobHandle(log.submissions.len() as u64))
        }
        fn request_cancel(&mut self, handle: JobHandle) -> Result<()> {
            self.0.lock().unwrap().cancels.push(handle);
            Ok(())
        }
        fn observe_status(&mut self, _handle: JobHandle) -> Result<ObserverId> {
            let mut log = self.0.lock().unwrap();
            let observer = ObserverId(log.observed.len() as u64 + 1);
            log.observed.push(observer);
            Ok(observer)
        }
        fn remove_observer(&mut self, observer: ObserverId) {
            self.0.lock().unwrap().removed.push(observer);
        }
    }

    #[derive(Debug)]
    struct MockViews(Arc<Mutex<Vec<ViewBindings>>>);

    impl ViewBinder for MockViews {
        fn set_view_bindings(&mut self, bindings: ViewBindings) {
            self.0.lock().unwrap().push(bindings);
        }
    }

    struct Fixture {
        step: StepController,
        unit1: Arc<Mutex<UnitState>>,
        unit2: Arc<Mutex<UnitState>>,
        host: Arc<Mutex<HostState>>,
        runner: Arc<Mutex<RunnerLog>>,
        views: Arc<Mutex<Vec<ViewBindings>>>,
        log: Log,
    }

    impl Fixture {
        fn new() -> Self {
            let log: Log = Arc::default();
            let unit1 = Arc::new(Mutex::new(UnitState {
                result: Some(NodeRef::new("node-a", "liver-label")),
                color: Some(Color::rgb(200, 100, 60)),
                ..Default::default()
            }));
            let unit2 = Arc::new(Mutex::new(UnitState {
                result: Some(NodeRef::new("node-b", "tumor-label")),
                color: Some(Color::rgb(250, 250, 0)),
                ..Default::default()
            }));
            let host = Arc::new(Mutex::new(HostState {
                upstream: UpstreamVolumes {
                    master: Some(NodeRef::new("node-m", "resampled")),
                    auxiliary: vec![
                        Some(NodeRef::new("node-r1", "registered-1")),
                        Some(NodeRef::new("node-r2", "registered-2")),
                    ],
                },
                ..Default::default()
            }));
            let runner = Arc::new(Mutex::new(RunnerLog::default()));
            let views = Arc::new(Mutex::new(Vec::new()));
            let (tx, _rx) = crate::signal::channel();

            let step = StepController::builder()
                .primary(MockUnit {
                    name: "primary",
                    state: unit1.clone(),
                    log: log.clone(),
                })
                .secondary(MockUnit {
                    name: "secondary",
                    state: unit2.clone(),
                    log: log.clone(),
                })
                .host(MockHost {
                    state: host.clone(),
                    log: log.clone(),
                })
                .runner(ScriptedRunner(runner.clone()))
                .scene(MemoryScene::new())
                .views(MockViews(views.clone()))
                .signals(tx)
                .build()
                .unwrap();

            Self {
                step,
                unit1,
                unit2,
                host,
                runner,
                views,
                log,
            }
        }

        fn set_valid(&self, index: UnitIndex, valid: bool) {
            let unit = match index {
                UnitIndex::Primary => &self.unit1,
                UnitIndex::Secondary => &self.unit2,
            };
            unit.lock().unwrap().valid = valid;
        }

        fn feed(&mut self, handle: JobHandle, statuses: &[JobStatus]) {
            for &status in statuses {
                self.step
                    .handle_signal(StepSignal::MergeStatus(StatusUpdate::new(handle, status)));
            }
        }

        /// Scenario C up to submission: both units valid, merge started.
        fn started_merge(&mut self) -> JobHandle {
            self.set_valid(UnitIndex::Primary, true);
            self.step.add_unit();
            self.set_valid(UnitIndex::Secondary, true);
            self.step.on_unit_valid(UnitIndex::Secondary);
            self.step.start_merge().unwrap().unwrap()
        }

        fn last_view(&self) -> std::collections::BTreeMap<ViewRole, String> {
            self.views.lock().unwrap().last().unwrap()[PREVIEW_VIEW].clone()
        }
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = StepController::builder().build();
        assert!(matches!(result, Err(StepError::Config(_))));
    }

    #[test]
    fn test_builder_wires_units() {
        let fx = Fixture::new();
        assert_eq!(fx.unit1.lock().unwrap().connected, Some(UnitIndex::Primary));
        assert_eq!(fx.unit2.lock().unwrap().connected, Some(UnitIndex::Secondary));
        assert_eq!(fx.unit2.lock().unwrap().suffix.as_deref(), Some("tumor"));
        assert_eq!(fx.unit2.lock().unwrap().visible, Some(false));
        assert_eq!(fx.step.state(), StepState::SingleUnit);
        assert_eq!(fx.step.name(), "Segment liver");
        assert!(fx.step.merge_stage().is_submit_enabled());
    }

    #[test]
    fn test_scenario_a_single_valid_unit() {
        let mut fx = Fixture::new();
        fx.set_valid(UnitIndex::Primary, true);
        fx.step.on_unit_valid(UnitIndex::Primary);

        assert!(fx.step.validity());
        assert_eq!(fx.log.lock().unwrap().last().unwrap(), "validity:true");
    }

    #[test]
    fn test_scenario_b_added_unit_blocks_step() {
        let mut fx = Fixture::new();
        fx.set_valid(UnitIndex::Primary, true);
        assert!(fx.step.add_unit());

        assert!(!fx.step.recompute_validity(None));
        assert_eq!(fx.step.state(), StepState::DualUnit);
        assert_eq!(fx.step.job_status(), JobStatus::Idle);
        assert!(fx.step.merge_stage().is_visible());
    }

    #[test]
    fn test_scenario_c_completed_merge_passes() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        assert_eq!(fx.step.state(), StepState::Merging);
        assert!(!fx.step.validity());

        fx.feed(handle, &[JobStatus::Completed]);

        assert!(fx.step.validity());
        assert_eq!(fx.step.state(), StepState::MergeResolved);
        assert!(fx.step.merge_stage().is_save_visible());
        assert!(fx.step.merge_stage().is_save_enabled());
        assert_eq!(fx.log.lock().unwrap().last().unwrap(), "validity:true");
    }

    #[test]
    fn test_scenario_d_failed_rerun_blocks_and_reenables_submit() {
        let mut fx = Fixture::new();
        let first = fx.started_merge();
        fx.feed(first, &[JobStatus::Completed]);
        assert!(fx.step.validity());

        let second = fx.step.start_merge().unwrap().unwrap();
        assert_ne!(first, second);
        fx.feed(second, &[JobStatus::Failed]);

        assert!(!fx.step.validity());
        assert!(fx.step.merge_stage().is_submit_enabled());
        assert!(!fx.step.merge_stage().is_save_enabled());
        assert_eq!(fx.log.lock().unwrap().last().unwrap(), "validity:false");
    }

    #[test]
    fn test_add_unit_expands_secondary_when_primary_valid() {
        let mut fx = Fixture::new();
        fx.set_valid(UnitIndex::Primary, true);
        fx.step.add_unit();

        assert!(fx.step.unit(UnitIndex::Secondary).is_visible());
        assert!(fx.step.unit(UnitIndex::Primary).is_collapsed());
        assert!(!fx.step.unit(UnitIndex::Secondary).is_collapsed());
        assert_eq!(fx.last_view()[&ViewRole::Background], "node-m");
        assert_eq!(fx.last_view()[&ViewRole::Label], "node-b");
    }

    #[test]
    fn test_add_unit_keeps_primary_expanded_when_invalid() {
        let mut fx = Fixture::new();
        fx.step.add_unit();

        let primary = fx.step.unit(UnitIndex::Primary);
        let secondary = fx.step.unit(UnitIndex::Secondary);
        assert!(!primary.is_collapsed());
        assert!(secondary.is_collapsed());
        assert_ne!(primary.is_collapsed(), secondary.is_collapsed());
    }

    #[test]
    fn test_add_unit_binds_upstream_volumes() {
        let mut fx = Fixture::new();
        fx.step.add_unit();

        let unit2 = fx.unit2.lock().unwrap();
        assert_eq!(unit2.master.as_ref().unwrap().id(), "node-m");
        assert_eq!(unit2.auxiliary.len(), 2);
        assert_eq!(unit2.auxiliary[1].1.as_ref().unwrap().id(), "node-r2");
    }

    #[test]
    fn test_add_unit_twice_is_noop() {
        let mut fx = Fixture::new();
        assert!(fx.step.add_unit());
        let reports = fx.log.lock().unwrap().len();
        assert!(!fx.step.add_unit());
        assert_eq!(fx.log.lock().unwrap().len(), reports);
    }

    #[test]
    fn test_remove_unit_restores_single_unit_validity() {
        let mut fx = Fixture::new();
        fx.set_valid(UnitIndex::Primary, true);
        fx.step.add_unit();
        assert!(!fx.step.validity());

        assert!(fx.step.remove_unit());
        assert!(!fx.step.unit(UnitIndex::Secondary).is_visible());
        assert!(!fx.step.merge_stage().is_visible());
        assert_eq!(fx.step.validity(), fx.step.unit(UnitIndex::Primary).is_valid());
        assert_eq!(fx.step.state(), StepState::SingleUnit);
        assert!(!fx.step.remove_unit());
    }

    #[test]
    fn test_remove_unit_abandons_running_job() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        fx.step.remove_unit();

        assert_eq!(fx.runner.lock().unwrap().cancels, vec![handle]);
        assert_eq!(fx.runner.lock().unwrap().removed, vec![ObserverId(1)]);
        assert!(!fx.step.is_observing());
        assert!(fx.step.merge_stage().is_submit_enabled());

        let mut events = fx.step.subscribe();
        fx.feed(handle, &[JobStatus::Completed]);
        assert!(matches!(
            events.try_recv(),
            Ok(StepEvent::StrayStatusIgnored { .. })
        ));
        assert!(fx.step.validity());
        assert_eq!(fx.step.job_status(), JobStatus::Idle);
    }

    #[test]
    fn test_primary_valid_with_secondary_switches_expansion() {
        let mut fx = Fixture::new();
        fx.step.add_unit();
        fx.set_valid(UnitIndex::Primary, true);
        fx.step.on_unit_valid(UnitIndex::Primary);

        assert!(fx.step.unit(UnitIndex::Primary).is_collapsed());
        assert!(!fx.step.unit(UnitIndex::Secondary).is_collapsed());
        assert_eq!(fx.last_view()[&ViewRole::Label], "node-b");
    }

    #[test]
    fn test_secondary_valid_seeds_output_and_expands_merge() {
        let mut fx = Fixture::new();
        fx.step.add_unit();
        fx.set_valid(UnitIndex::Secondary, true);
        fx.step.on_unit_valid(UnitIndex::Secondary);

        assert!(fx.step.unit(UnitIndex::Secondary).is_collapsed());
        assert!(fx.step.merge_stage().is_expanded());
        let output = fx.step.merge_stage().output().unwrap().clone();
        assert_eq!(output.name(), "tumor-label-merged");

        let view = fx.last_view();
        assert_eq!(view[&ViewRole::Background], "node-a");
        assert_eq!(view[&ViewRole::Foreground], "node-b");
        assert_eq!(view[&ViewRole::Label], output.id());
    }

    #[test]
    fn test_secondary_valid_after_removal_is_ignored() {
        let mut fx = Fixture::new();
        fx.step.add_unit();
        fx.step.remove_unit();

        let collapsed = fx.step.unit(UnitIndex::Secondary).is_collapsed();
        let unit_collapsed = fx.unit2.lock().unwrap().collapsed;
        let bindings = fx.views.lock().unwrap().len();
        let mut events = fx.step.subscribe();

        fx.set_valid(UnitIndex::Secondary, true);
        fx.step
            .handle_signal(StepSignal::UnitValid(UnitIndex::Secondary));

        assert_eq!(fx.step.unit(UnitIndex::Secondary).is_collapsed(), collapsed);
        assert_eq!(fx.unit2.lock().unwrap().collapsed, unit_collapsed);
        assert!(!fx.step.merge_stage().is_expanded());
        assert!(fx.step.merge_stage().output().is_none());
        assert_eq!(fx.views.lock().unwrap().len(), bindings);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_secondary_valid_keeps_selected_output() {
        let mut fx = Fixture::new();
        fx.step.add_unit();
        let chosen = NodeRef::new("node-x", "chosen");
        fx.step.select_merge_output(Some(chosen.clone()));
        fx.step.on_unit_valid(UnitIndex::Secondary);
        assert_eq!(fx.step.merge_stage().output(), Some(&chosen));
    }

    #[test]
    fn test_start_merge_builds_parameters_and_disables_submit() {
        let mut fx = Fixture::new();
        fx.started_merge();

        let runner = fx.runner.lock().unwrap();
        let params = &runner.submissions[0];
        assert_eq!(params.input_a.id(), "node-a");
        assert_eq!(params.input_b.id(), "node-b");
        assert!(!params.first_overwrites);
        assert_eq!(runner.observed.len(), 1);
        drop(runner);

        assert_eq!(fx.step.job_status(), JobStatus::Running);
        assert!(!fx.step.merge_stage().is_submit_enabled());
        assert!(fx.step.merge_stage().is_submit_checked());
        assert!(fx.step.is_observing());
    }

    #[test]
    fn test_start_merge_while_running_is_noop() {
        let mut fx = Fixture::new();
        fx.started_merge();
        assert_eq!(fx.step.start_merge().unwrap(), None);
        assert_eq!(fx.runner.lock().unwrap().submissions.len(), 1);
    }

    #[test]
    fn test_start_merge_with_hidden_stage_is_noop() {
        let mut fx = Fixture::new();
        assert_eq!(fx.step.start_merge().unwrap(), None);
        assert!(fx.runner.lock().unwrap().submissions.is_empty());
    }

    #[test]
    fn test_start_merge_without_output_is_missing_input() {
        let mut fx = Fixture::new();
        fx.step.add_unit();
        assert!(matches!(
            fx.step.start_merge(),
            Err(StepError::MissingInput(_))
        ));
        assert!(fx.step.merge_stage().is_submit_enabled());
    }

    #[test]
    fn test_start_merge_runner_rejection_propagates() {
        let mut fx = Fixture::new();
        fx.step.add_unit();
        fx.step.on_unit_valid(UnitIndex::Secondary);
        fx.runner.lock().unwrap().reject_submit = true;

        assert!(matches!(fx.step.start_merge(), Err(StepError::Runner(_))));
        assert_eq!(fx.step.job_status(), JobStatus::Idle);
        assert!(fx.step.merge_stage().is_submit_enabled());
    }

    #[test]
    fn test_callback_ordering_completed() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        fx.feed(
            handle,
            &[JobStatus::Requested, JobStatus::Running, JobStatus::Completed],
        );
        assert!(fx.step.validity());
        assert!(!fx.step.is_observing());
    }

    #[test]
    fn test_callback_ordering_failed() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        fx.feed(
            handle,
            &[JobStatus::Requested, JobStatus::Running, JobStatus::Failed],
        );
        assert!(!fx.step.validity());
        assert!(fx.step.merge_stage().is_submit_enabled());
        assert!(!fx.step.merge_stage().is_submit_checked());
        assert_eq!(fx.step.state(), StepState::DualUnit);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        let mut events = fx.step.subscribe();

        fx.feed(handle, &[JobStatus::Completed, JobStatus::Completed, JobStatus::Failed]);
        fx.step.finish_observation();

        assert_eq!(fx.runner.lock().unwrap().removed, vec![ObserverId(1)]);
        let mut reenabled = 0;
        while let Ok(event) = events.try_recv() {
            if event == (StepEvent::SubmitControlChanged { enabled: true }) {
                reenabled += 1;
            }
        }
        assert_eq!(reenabled, 1);
        assert_eq!(fx.step.job_status(), JobStatus::Completed);
    }

    #[test]
    fn test_status_for_unknown_handle_is_ignored() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        fx.feed(JobHandle(handle.0 + 10), &[JobStatus::Completed]);
        assert_eq!(fx.step.job_status(), JobStatus::Running);
        assert!(fx.step.is_observing());
    }

    #[test]
    fn test_cancel_merge_requests_without_changing_status() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();

        assert!(fx.step.cancel_merge().unwrap());
        assert_eq!(fx.runner.lock().unwrap().cancels, vec![handle]);
        assert_eq!(fx.step.job_status(), JobStatus::Running);

        fx.feed(handle, &[JobStatus::Cancelled]);
        assert_eq!(fx.step.job_status(), JobStatus::Cancelled);
        assert!(!fx.step.validity());
        assert!(fx.step.merge_stage().is_submit_enabled());
        assert!(!fx.step.cancel_merge().unwrap());
    }

    #[test]
    fn test_cancel_without_job_is_noop() {
        let mut fx = Fixture::new();
        assert!(!fx.step.cancel_merge().unwrap());
        assert!(fx.runner.lock().unwrap().cancels.is_empty());
    }

    #[test]
    fn test_on_entry_rebinds_and_reports_validity_last() {
        let mut fx = Fixture::new();
        fx.step.on_entry("RegisterStep", TransitionKind::Forward);

        assert_eq!(fx.host.lock().unwrap().layouts, vec![1]);
        let unit1 = fx.unit1.lock().unwrap();
        assert_eq!(unit1.master.as_ref().unwrap().id(), "node-m");
        assert_eq!(unit1.auxiliary[0].1.as_ref().unwrap().id(), "node-r1");
        drop(unit1);

        let log = fx.log.lock().unwrap();
        assert_eq!(
            log.as_slice(),
            ["reconcile:primary", "reconcile:secondary", "validity:false"]
        );
        drop(log);
        assert_eq!(fx.last_view()[&ViewRole::Background], "node-m");
    }

    #[test]
    fn test_on_entry_picks_up_new_upstream_volumes() {
        let mut fx = Fixture::new();
        fx.step.on_entry("RegisterStep", TransitionKind::Forward);
        fx.host.lock().unwrap().upstream.master = Some(NodeRef::new("node-m2", "resampled-2"));
        fx.step.on_entry("RegisterStep", TransitionKind::Backward);

        let unit1 = fx.unit1.lock().unwrap();
        assert_eq!(unit1.master.as_ref().unwrap().id(), "node-m2");
    }

    #[test]
    fn test_on_exit_disables_painting_when_leaving() {
        let mut fx = Fixture::new();
        fx.step.on_exit("SegmentationStep", TransitionKind::Forward);
        assert_eq!(fx.unit1.lock().unwrap().painting, None);

        fx.step.on_exit("MeasureStep", TransitionKind::Forward);
        assert_eq!(fx.unit1.lock().unwrap().painting, Some(false));
    }

    #[test]
    fn test_merge_result_and_color_follow_merge_stage() {
        let mut fx = Fixture::new();
        assert_eq!(fx.step.merge_result().unwrap().id(), "node-a");
        assert_eq!(fx.step.representative_color(), Color::rgb(200, 100, 60));

        fx.step.add_unit();
        assert!(fx.step.merge_result().is_none());
        fx.step.on_unit_valid(UnitIndex::Secondary);
        assert_eq!(
            fx.step.merge_result().unwrap().name(),
            "tumor-label-merged"
        );
        assert_eq!(fx.step.representative_color(), Color::rgb(250, 250, 0));
    }

    #[test]
    fn test_save_requires_valid_merge() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        assert!(!fx.step.save_merge_result());

        fx.feed(handle, &[JobStatus::Completed]);
        assert!(fx.step.save_merge_result());

        let host = fx.host.lock().unwrap();
        let saved = &host.saved;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "Merged Image");
        assert_eq!(saved[0].1, "VolumeFile");
        assert_eq!(saved[0].2, ".mha");
    }

    #[test]
    fn test_open_combine_module_passes_parameters() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.step.open_combine_module(),
            Err(StepError::PreconditionViolation(_))
        ));

        fx.step.add_unit();
        assert!(matches!(
            fx.step.open_combine_module(),
            Err(StepError::MissingInput(_))
        ));

        fx.step.on_unit_valid(UnitIndex::Secondary);
        fx.step.open_combine_module().unwrap();
        let host = fx.host.lock().unwrap();
        let opened = &host.opened;
        assert_eq!(opened[0].0, "ImageLabelCombine");
        assert_eq!(opened[0].1.input_b.id(), "node-b");
    }

    #[test]
    fn test_update_configuration_renames_step() {
        let mut fx = Fixture::new();
        let mut config = StepConfig::default();
        config.workflow.organ = "Kidney".to_string();
        config.secondary_suffix = "cyst".to_string();
        fx.step.update_configuration(config).unwrap();

        assert_eq!(fx.step.name(), "Segment kidney");
        assert_eq!(fx.step.description(), "Segment the kidney from the image");
        assert_eq!(fx.unit1.lock().unwrap().organ.as_deref(), Some("Kidney"));
        assert_eq!(fx.unit2.lock().unwrap().suffix.as_deref(), Some("cyst"));
    }

    #[test]
    fn test_update_configuration_rejects_invalid() {
        let mut fx = Fixture::new();
        let mut config = StepConfig::default();
        config.step_id = String::new();
        assert!(fx.step.update_configuration(config).is_err());
        assert_eq!(fx.step.id(), "SegmentationStep");
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut fx = Fixture::new();
        let handle = fx.started_merge();
        fx.step.on_merge_status_changed(
            StatusUpdate::new(handle, JobStatus::Failed).with_message("dimensions differ"),
        );

        let snapshot = fx.step.snapshot();
        assert_eq!(snapshot.state, StepState::DualUnit);
        assert_eq!(snapshot.job_status, JobStatus::Failed);
        assert_eq!(snapshot.job_message.as_deref(), Some("dimensions differ"));
        assert!(!snapshot.valid);
        assert!(snapshot.to_string().contains("Error: dimensions differ"));
    }

    #[test]
    fn test_events_for_successful_merge() {
        let mut fx = Fixture::new();
        let mut events = fx.step.subscribe();
        let handle = fx.started_merge();
        fx.feed(handle, &[JobStatus::Completed]);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&StepEvent::UnitAdded));
        assert!(seen.contains(&StepEvent::MergeSubmitted { handle }));
        assert!(seen.iter().any(StepEvent::is_completion));
        assert!(!seen.iter().any(StepEvent::is_error));
        assert_eq!(
            seen.last(),
            Some(&StepEvent::ValidityReported { valid: true })
        );
    }

    #[test]
    fn test_help_mentions_paint_brush() {
        let fx = Fixture::new();
        assert!(fx.step.help().contains("paint"));
    }
}

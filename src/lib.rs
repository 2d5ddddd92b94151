//! # segment-step
//!
//! The validity gate and merge-job lifecycle of the segmentation step in a
//! guided, multi-step image segmentation workflow.
//!
//! The step offers one or two segmentation units. Each unit is a
//! foreground/background painting pass that produces a label map. With two
//! units, their label maps are combined by an asynchronous external job
//! before the workflow may move on. The [`StepController`] tracks all of
//! this and reports a pass/fail gate to the hosting workflow engine.
//!
//! Everything visual (the units' painting widgets, the preview views, the
//! workflow engine itself) is reached through narrow traits injected at
//! construction.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use segment_step::{signal, StepController, TransitionKind};
//!
//! let (tx, mut rx) = signal::channel();
//! let mut step = StepController::builder()
//!     .primary(liver_unit)
//!     .secondary(tumor_unit)
//!     .host(workflow)
//!     .runner(LocalJobRunner::new(scene.clone(), tx.clone()))
//!     .scene(scene)
//!     .views(slice_views)
//!     .signals(tx)
//!     .build()?;
//!
//! step.on_entry("RegisterStep", TransitionKind::Forward);
//! step.add_unit();
//! // ... units report valid through `rx` ...
//! step.start_merge()?;
//! segment_step::driver::run_until_settled(&mut step, &mut rx).await;
//! assert!(step.validity());
//! ```
//!
//! ## Lifecycle
//!
//! `SingleUnit → DualUnit → Merging → MergeResolved`, with `remove_unit`
//! returning to `SingleUnit` from anywhere. Validity is the AND of every
//! visible unit's validity, and, while the merge stage is shown, of the
//! merge job having completed.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod event;
pub mod host;
pub mod job;
pub mod label_map;
pub mod runner;
pub mod scene;
pub mod signal;
pub mod status;
pub mod unit;
pub mod validity;

pub use config::{StepConfig, WorkflowSection};
pub use controller::{MergeStage, StepController, StepControllerBuilder};
pub use error::{Result, StepError};
pub use event::StepEvent;
pub use host::{TransitionKind, UpstreamVolumes, ViewBinder, ViewBindings, ViewRole, WorkflowHost};
pub use job::{JobHandle, JobStatus, MergeJob, MergeParameters};
pub use label_map::LabelMap;
pub use scene::{Color, MemoryScene, NodeRef, SceneStore};
pub use signal::{SignalReceiver, SignalSender, StatusUpdate, StepSignal};
pub use status::{StepSnapshot, UnitSnapshot};
pub use unit::{SegmentationUnit, UnitIndex, UnitSlot};
pub use validity::{step_validity, StepState};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

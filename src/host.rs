//! Host-side collaborators.
//!
//! The workflow engine that hosts the step and the preview views are
//! reached through the narrow traits in this module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use crate::{MergeParameters, NodeRef};

/// Direction of a workflow transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Moving to a later step.
    Forward,
    /// Moving to an earlier step.
    Backward,
}

/// Outputs of earlier steps that the primary unit segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamVolumes {
    /// The resampled master volume.
    pub master: Option<NodeRef>,
    /// Registered auxiliary volumes, in order.
    pub auxiliary: Vec<Option<NodeRef>>,
}

/// The workflow engine hosting the step.
pub trait WorkflowHost: Debug + Send {
    /// Reports whether the step may be left going forward.
    fn report_validity(&mut self, valid: bool, desired_branch: Option<&str>);

    /// Switches the host view layout.
    fn request_layout(&mut self, layout_id: u32);

    /// Returns the current outputs of the resample and registration steps.
    fn upstream_volumes(&self) -> UpstreamVolumes;

    /// Offers `node` for saving to disk.
    fn save_file(&mut self, _description: &str, _file_type: &str, _extension: &str, _node: &NodeRef) {}

    /// Opens a host module pre-populated with merge parameters.
    fn open_module(&mut self, _module: &str, _parameters: &MergeParameters) {}
}

/// A role a node plays in a preview view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ViewRole {
    /// The greyscale layer.
    Background,
    /// The blended overlay layer.
    Foreground,
    /// The label layer.
    Label,
}

impl fmt::Display for ViewRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Background => "Background",
            Self::Foreground => "Foreground",
            Self::Label => "Label",
        };
        f.write_str(name)
    }
}

/// View name → role → node id. Unset nodes bind the empty id.
pub type ViewBindings = BTreeMap<String, BTreeMap<ViewRole, String>>;

/// The view used for every preview this step produces.
pub const PREVIEW_VIEW: &str = "Input1";

/// Applies node bindings to the host's preview views.
pub trait ViewBinder: Debug + Send {
    /// Replaces the bindings of the named views.
    fn set_view_bindings(&mut self, bindings: ViewBindings);
}

/// Builds a single-view binding for [`PREVIEW_VIEW`].
pub fn preview_bindings(roles: impl IntoIterator<Item = (ViewRole, String)>) -> ViewBindings {
    let mut bindings = ViewBindings::new();
    bindings.insert(PREVIEW_VIEW.to_string(), roles.into_iter().collect());
    bindings
}

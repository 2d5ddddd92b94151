//! Segmentation units.
//!
//! A segmentation unit is one foreground/background painting pass over a
//! volume that produces a label map. The painting itself happens in a
//! collaborator implementing [`SegmentationUnit`]; the controller keeps each
//! one in a [`UnitSlot`] that tracks the display flags it has set.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::{Color, NodeRef, SignalSender, StepConfig};

/// Identifies one of the two unit slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitIndex {
    /// The always-present first unit.
    Primary,
    /// The optional second unit.
    Secondary,
}

impl UnitIndex {
    /// Both slots in display order.
    pub const ALL: [UnitIndex; 2] = [UnitIndex::Primary, UnitIndex::Secondary];
}

impl fmt::Display for UnitIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// The segmentation widget consumed by the controller.
///
/// Implementations own the painting interaction and decide for themselves
/// when their segmentation is valid. When it becomes valid they send
/// [`StepSignal::UnitValid`](crate::StepSignal::UnitValid) on the sender
/// handed to [`connect_validity`](Self::connect_validity).
pub trait SegmentationUnit: Debug + Send {
    /// Binds the volume to segment.
    fn set_master_volume(&mut self, volume: Option<NodeRef>);

    /// Binds an auxiliary volume aligned with the master volume.
    fn set_auxiliary_volume(&mut self, index: usize, volume: Option<NodeRef>);

    /// Returns the bound master volume.
    fn master_volume(&self) -> Option<NodeRef>;

    /// Returns true once the unit's own segmentation is complete.
    fn is_segmentation_valid(&self) -> bool;

    /// Returns the label map this unit produces.
    fn result_label_map(&self) -> Option<NodeRef>;

    /// Returns the display colour of the segmented structure.
    fn representative_color(&self) -> Color;

    /// Shows or hides the unit.
    fn set_visible(&mut self, visible: bool);

    /// Collapses or expands the unit.
    fn set_collapsed(&mut self, collapsed: bool);

    /// Pushes the current GUI state into the unit's parameters.
    fn reconcile_parameters_from_ui(&mut self);

    /// Enables or disables the paint interaction.
    fn set_painting_enabled(&mut self, enabled: bool);

    /// Registers where validity notifications for this slot are sent.
    fn connect_validity(&mut self, index: UnitIndex, signals: SignalSender);

    /// Sets the suffix used when naming the result label map.
    fn set_result_suffix(&mut self, _suffix: &str) {}

    /// Refreshes the undo/redo controls.
    fn refresh_undo_redo(&mut self) {}

    /// Applies workflow configuration.
    fn update_configuration(&mut self, _config: &StepConfig) {}
}

/// A unit together with the flags the controller has applied to it.
#[derive(Debug)]
pub struct UnitSlot {
    unit: Box<dyn SegmentationUnit>,
    visible: bool,
    collapsed: bool,
}

impl UnitSlot {
    pub(crate) fn new(unit: Box<dyn SegmentationUnit>, visible: bool, collapsed: bool) -> Self {
        let mut slot = Self {
            unit,
            visible: !visible,
            collapsed: !collapsed,
        };
        slot.set_visible(visible);
        slot.set_collapsed(collapsed);
        slot
    }

    /// Returns true if the unit participates in the step.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Returns true if the unit is collapsed.
    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    /// Returns the unit's own validity.
    pub fn is_valid(&self) -> bool {
        self.unit.is_segmentation_valid()
    }

    /// Returns the wrapped unit.
    pub fn unit(&self) -> &dyn SegmentationUnit {
        self.unit.as_ref()
    }

    pub(crate) fn unit_mut(&mut self) -> &mut dyn SegmentationUnit {
        self.unit.as_mut()
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.unit.set_visible(visible);
        }
    }

    pub(crate) fn set_collapsed(&mut self, collapsed: bool) {
        if self.collapsed != collapsed {
            self.collapsed = collapsed;
            self.unit.set_collapsed(collapsed);
        }
    }

    pub(crate) fn bind_volumes(&mut self, master: Option<NodeRef>, auxiliary: &[Option<NodeRef>]) {
        self.unit.set_master_volume(master);
        for (index, volume) in auxiliary.iter().enumerate() {
            self.unit.set_auxiliary_volume(index, volume.clone());
        }
    }
}

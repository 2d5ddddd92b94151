//! Step configuration.
//!
//! [`StepConfig`] is read from TOML. Every field has a default, so an empty
//! document yields the liver workflow the step was built for.
//!
//! ```toml
//! step_id = "SegmentationStep"
//! layout_id = 1
//!
//! [workflow]
//! organ = "Kidney"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Result, StepError};

/// Configuration of the segmentation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Identifier the workflow engine uses for this step.
    pub step_id: String,
    /// Layout requested from the host on entry.
    pub layout_id: u32,
    /// Suffix for the secondary unit's result label map.
    pub secondary_suffix: String,
    /// Suffix for the merge output created from the secondary result.
    pub merged_suffix: String,
    /// File extension used when saving the merged image.
    pub save_extension: String,
    /// Name of the host module that runs the combine.
    pub combine_module: String,
    /// Workflow-wide settings.
    pub workflow: WorkflowSection,
}

/// Settings shared by all steps of the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// The organ being segmented.
    pub organ: String,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            organ: "Liver".to_string(),
        }
    }
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            step_id: "SegmentationStep".to_string(),
            layout_id: 1,
            secondary_suffix: "tumor".to_string(),
            merged_suffix: "merged".to_string(),
            save_extension: ".mha".to_string(),
            combine_module: "ImageLabelCombine".to_string(),
            workflow: WorkflowSection::default(),
        }
    }
}

impl StepConfig {
    /// Parses configuration from a TOML string.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks that identifiers and the organ name are usable.
    pub fn validate(&self) -> Result<()> {
        if self.step_id.trim().is_empty() {
            return Err(StepError::Config("step_id must not be empty".to_string()));
        }
        if self.workflow.organ.trim().is_empty() {
            return Err(StepError::Config(
                "workflow.organ must not be empty".to_string(),
            ));
        }
        if !self.save_extension.starts_with('.') {
            return Err(StepError::Config(format!(
                "save_extension {:?} must start with '.'",
                self.save_extension
            )));
        }
        Ok(())
    }

    /// The organ name in lower case, as shown in step titles.
    pub fn organ_lower(&self) -> String {
        self.workflow.organ.to_lowercase()
    }
}

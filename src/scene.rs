//! Scene references and the in-memory scene.
//!
//! Volumes and label maps live in the host's shared scene and outlive the
//! step. The controller only holds [`NodeRef`]s to them and compares their
//! ids; image content is written by the job runner, never by the controller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{LabelMap, Result, StepError};

/// A non-owning reference to a node in the scene.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    id: String,
    name: String,
}

impl NodeRef {
    /// Creates a reference from a scene id and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Returns the scene id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Returns the id of an optional reference, or an empty string when unset.
pub fn node_id(node: Option<&NodeRef>) -> String {
    node.map(|n| n.id().to_string()).unwrap_or_default()
}

/// A display colour for a segmented structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Creates a colour from its channels.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Node creation in the host scene.
pub trait SceneStore: fmt::Debug + Send {
    /// Creates an empty label map named after `template` with `suffix`
    /// appended, returning its reference.
    ///
    /// The new map has the template's geometry when the template holds
    /// label data.
    fn create_label_map_like(&mut self, template: &NodeRef, suffix: &str) -> Result<NodeRef>;
}

#[derive(Debug, Default)]
struct SceneNode {
    name: String,
    label_map: Option<LabelMap>,
}

#[derive(Debug, Default)]
struct Storage {
    nodes: HashMap<String, SceneNode>,
    next_id: u64,
}

impl Storage {
    fn insert(&mut self, name: String, label_map: Option<LabelMap>) -> NodeRef {
        self.next_id += 1;
        let id = format!("node-{}", self.next_id);
        let node = NodeRef::new(id.clone(), name.clone());
        self.nodes.insert(id, SceneNode { name, label_map });
        node
    }
}

/// A cloneable, thread-safe in-memory scene.
///
/// Clones share the same storage, so the controller and a
/// [`LocalJobRunner`](crate::runner::LocalJobRunner) can see the same nodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryScene {
    storage: Arc<Mutex<Storage>>,
}

impl MemoryScene {
    /// Creates an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|_| StepError::Scene("scene lock poisoned".to_string()))
    }

    /// Adds a scalar volume node (no voxel data is kept).
    pub fn add_volume(&self, name: impl Into<String>) -> Result<NodeRef> {
        Ok(self.lock()?.insert(name.into(), None))
    }

    /// Adds a label map node holding `label_map`.
    pub fn add_label_map(&self, name: impl Into<String>, label_map: LabelMap) -> Result<NodeRef> {
        Ok(self.lock()?.insert(name.into(), Some(label_map)))
    }

    /// Returns the label map content of a node, if it has any.
    pub fn label_map(&self, node: &NodeRef) -> Result<Option<LabelMap>> {
        let storage = self.lock()?;
        let entry = storage
            .nodes
            .get(node.id())
            .ok_or_else(|| StepError::Scene(format!("unknown node {}", node.id())))?;
        Ok(entry.label_map.clone())
    }

    /// Replaces the label map content of an existing node.
    pub fn set_label_map(&self, node: &NodeRef, label_map: LabelMap) -> Result<()> {
        let mut storage = self.lock()?;
        let entry = storage
            .nodes
            .get_mut(node.id())
            .ok_or_else(|| StepError::Scene(format!("unknown node {}", node.id())))?;
        entry.label_map = Some(label_map);
        Ok(())
    }

    /// Returns the number of nodes in the scene.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.nodes.len()).unwrap_or(0)
    }

    /// Returns true if the scene holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SceneStore for MemoryScene {
    fn create_label_map_like(&mut self, template: &NodeRef, suffix: &str) -> Result<NodeRef> {
        let mut storage = self.lock()?;
        let (base, label_map) = match storage.nodes.get(template.id()) {
            Some(node) => {
                let empty = match &node.label_map {
                    Some(map) => Some(LabelMap::zeros(map.dims())?),
                    None => None,
                };
                (node.name.clone(), empty)
            }
            None => (template.name().to_string(), None),
        };
        Ok(storage.insert(format!("{}-{}", base, suffix), label_map))
    }
}

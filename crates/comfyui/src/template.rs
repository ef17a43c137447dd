//! Virtual try-on job template: a typed ComfyUI API-format workflow.
//!
//! The template file is an object keyed by node id:
//!
//! ```json
//! {
//!   "21": { "class_type": "GroundingDinoSAMSegment", "inputs": { "prompt": "shirt", ... } },
//!   "22": { "class_type": "LoadImage", "inputs": { "image": "garment.png" } }
//! }
//! ```
//!
//! Before every submission the template is loaded fresh and the fields named
//! by [`PatchTarget`] constants are overwritten with request values. Fields
//! other than `class_type` and `inputs` (e.g. `_meta`) are kept verbatim.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default designated output node (the websocket image-save node).
pub const DEFAULT_OUTPUT_NODE: &str = "30";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Stable identifier of a node within a template (`"21"`, `"30"`, ...).
pub type NodeKey = String;

/// A single node of the job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// ComfyUI class type (e.g. "LoadImage").
    pub class_type: String,
    /// Input field name -> literal value or `[source_node, output_index]` link.
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Any other per-node fields, preserved for round-tripping.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A parsed job template: node id -> node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobTemplate {
    nodes: BTreeMap<NodeKey, Node>,
}

/// A fixed (node, input field) location the patcher writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchTarget {
    pub node: &'static str,
    pub field: &'static str,
}

impl PatchTarget {
    /// Text prompt of the garment-masking node.
    pub const MASK_PROMPT: PatchTarget = PatchTarget {
        node: "21",
        field: "prompt",
    };
    /// Image input of the garment `LoadImage` node.
    pub const GARMENT_IMAGE: PatchTarget = PatchTarget {
        node: "22",
        field: "image",
    };
    /// Image input of the person `LoadImage` node.
    pub const PERSON_IMAGE: PatchTarget = PatchTarget {
        node: "27",
        field: "image",
    };

    pub const ALL: [PatchTarget; 3] = [
        Self::MASK_PROMPT,
        Self::GARMENT_IMAGE,
        Self::PERSON_IMAGE,
    ];
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.field)
    }
}

/// Request values to write into the template. `None` leaves the template's
/// own value in place.
#[derive(Debug, Clone, Default)]
pub struct PatchFields {
    pub prompt: Option<String>,
    pub garment_image: Option<String>,
    pub person_image: Option<String>,
}

/// Which targets were written and which were absent from the template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    pub applied: Vec<PatchTarget>,
    pub skipped: Vec<PatchTarget>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl JobTemplate {
    /// Read and parse a template file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TemplateLoadError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| TemplateLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_slice(&raw)
    }

    /// Parse a template from JSON bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self, TemplateLoadError> {
        let template: JobTemplate = serde_json::from_slice(raw)?;
        if template.nodes.is_empty() {
            return Err(TemplateLoadError::Empty);
        }
        Ok(template)
    }

    pub fn node(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current value at `target`, if both node and field exist.
    pub fn input(&self, target: PatchTarget) -> Option<&serde_json::Value> {
        self.nodes.get(target.node)?.inputs.get(target.field)
    }

    /// Targets whose node or field is missing from this template.
    pub fn missing_targets(&self) -> Vec<PatchTarget> {
        PatchTarget::ALL
            .into_iter()
            .filter(|t| self.input(*t).is_none())
            .collect()
    }

    /// Serialize back into the engine's API format.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Patching
// ---------------------------------------------------------------------------

impl JobTemplate {
    /// Overwrite an existing input field. Returns `false` (and changes
    /// nothing) when the node or the field is absent.
    pub fn set_input(&mut self, target: PatchTarget, value: serde_json::Value) -> bool {
        match self
            .nodes
            .get_mut(target.node)
            .and_then(|node| node.inputs.get_mut(target.field))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Apply request values to their fixed targets.
    ///
    /// Targets missing from the template are skipped with a warning; the
    /// template author is trusted, so this is never an error.
    pub fn patch(&mut self, fields: &PatchFields) -> PatchReport {
        let mut report = PatchReport::default();

        let writes = [
            (PatchTarget::MASK_PROMPT, &fields.prompt),
            (PatchTarget::GARMENT_IMAGE, &fields.garment_image),
            (PatchTarget::PERSON_IMAGE, &fields.person_image),
        ];

        for (target, value) in writes {
            let Some(value) = value else { continue };
            if self.set_input(target, serde_json::Value::String(value.clone())) {
                report.applied.push(target);
            } else {
                tracing::warn!(patch_target = %target, "Patch target missing from job template, skipped");
                report.skipped.push(target);
            }
        }

        report
    }
}

/// Errors raised while loading a job template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateLoadError {
    #[error("Failed to read job template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse job template: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Job template contains no nodes")]
    Empty,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

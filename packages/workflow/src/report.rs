//! Serializable record of what a run did.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use geest_model_models::{NodeLevel, PartId};
use serde::Serialize;

use crate::region::RegionSummary;
use crate::WorkflowError;

/// Outcome of one node on one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Failed,
    /// `used = false` in the configuration.
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub level: NodeLevel,
    pub status: NodeStatus,
    /// Raster written for this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Cells carrying a score in the output.
    pub valid_cells: usize,
    /// Input features skipped for invalid geometry.
    pub invalid_features: u64,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NodeReport {
    #[must_use]
    pub fn completed(
        node: &str,
        level: NodeLevel,
        output: PathBuf,
        valid_cells: usize,
        invalid_features: u64,
    ) -> Self {
        Self {
            node: node.to_string(),
            level,
            status: NodeStatus::Completed,
            output: Some(output),
            valid_cells,
            invalid_features,
            message: None,
        }
    }

    #[must_use]
    pub fn failed(node: &str, level: NodeLevel, message: impl Into<String>) -> Self {
        Self {
            node: node.to_string(),
            level,
            status: NodeStatus::Failed,
            output: None,
            valid_cells: 0,
            invalid_features: 0,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn excluded(node: &str, level: NodeLevel) -> Self {
        Self {
            node: node.to_string(),
            level,
            status: NodeStatus::Excluded,
            output: None,
            valid_cells: 0,
            invalid_features: 0,
            message: None,
        }
    }
}

/// Everything that happened on one part, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartReport {
    pub part: PartId,
    pub nodes: Vec<NodeReport>,
    /// Set when the part stopped before aggregation, e.g. because its grid
    /// could not be built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancelled: bool,
}

impl PartReport {
    #[must_use]
    pub const fn new(part: PartId) -> Self {
        Self {
            part,
            nodes: Vec::new(),
            error: None,
            cancelled: false,
        }
    }

    /// The report of `node`, if it ran on this part.
    #[must_use]
    pub fn node(&self, node: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == node)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
    }

    /// `true` when nothing failed and the part ran to the end.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled && self.failed_nodes().next().is_none()
    }
}

/// The JSON report written at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub crs: String,
    pub resolution: f64,
    /// Sorted by part id so the report does not depend on scheduling.
    pub parts: Vec<PartReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionSummary>,
}

impl RunReport {
    #[must_use]
    pub fn new(
        started_at: DateTime<Utc>,
        crs: impl Into<String>,
        resolution: f64,
        mut parts: Vec<PartReport>,
    ) -> Self {
        parts.sort_by(|a, b| a.part.cmp(&b.part));
        Self {
            started_at,
            finished_at: Utc::now(),
            crs: crs.into(),
            resolution,
            parts,
            region: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: RegionSummary) -> Self {
        self.region = Some(region);
        self.finished_at = Utc::now();
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.parts.iter().all(PartReport::is_success)
            && self
                .region
                .as_ref()
                .is_none_or(|region| region.failures.is_empty())
    }

    /// Writes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Json`] or [`WorkflowError::Io`].
    pub fn write(&self, path: &Path) -> Result<(), WorkflowError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WorkflowError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Wrote run report to {}", path.display());
        Ok(())
    }
}

//! Region-level outputs assembled once every part has finished.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use geest_aggregate::{BoundarySummary, Legend, burn_majority, majority_by_boundary};
use geest_model_models::{BoundaryConfig, INDEX_NODE, PartId};
use geest_raster::{Mosaic, MosaicSource, ScoreRaster, read_geotiff, write_geotiff};
use geo::Geometry;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::report::{NodeStatus, PartReport};
use crate::workflow::Workflow;
use crate::WorkflowError;

/// One VRT mosaic written for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MosaicOutput {
    /// Id of the mosaicked node.
    pub node: String,
    /// Path of the written VRT.
    pub path: PathBuf,
    /// Number of part rasters stitched.
    pub parts: usize,
}

/// What [`Workflow::finish_region`] produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub mosaics: Vec<MosaicOutput>,
    /// Majority enablement class per administrative boundary.
    pub boundaries: Vec<BoundarySummary>,
    /// Region steps that failed. Each failure is confined to its node.
    pub failures: Vec<String>,
}

impl Workflow {
    /// Mosaics every completed node output across parts and, when
    /// boundaries are configured, summarises the composite index by
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Cancelled`] only; per-node failures are
    /// collected in [`RegionSummary::failures`].
    pub fn finish_region(
        &self,
        parts: &[PartReport],
        cancel: &CancellationToken,
    ) -> Result<RegionSummary, WorkflowError> {
        let mut outputs: BTreeMap<&str, Vec<(&PartId, &Path)>> = BTreeMap::new();
        for part in parts {
            for node in &part.nodes {
                if let (NodeStatus::Completed, Some(path)) = (node.status, &node.output) {
                    outputs
                        .entry(node.node.as_str())
                        .or_default()
                        .push((&part.part, path.as_path()));
                }
            }
        }

        let mut summary = RegionSummary::default();
        let mut composite = None;

        for (node, mut entries) in outputs {
            cancel.check()?;
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let keep = node == INDEX_NODE && self.config().index.boundaries.is_some();

            match self.mosaic_node(node, &entries, keep) {
                Ok((output, materialized)) => {
                    if let Some(raster) = materialized {
                        composite = Some((output.path.clone(), raster));
                    }
                    summary.mosaics.push(output);
                }
                Err(e) => {
                    log::error!("Mosaic of '{node}' failed: {e}");
                    summary.failures.push(format!("{node}: {e}"));
                }
            }
        }

        if let Some(boundaries) = &self.config().index.boundaries {
            cancel.check()?;
            match composite {
                Some((vrt, raster)) => {
                    match self.summarise_boundaries(boundaries, &vrt, &raster) {
                        Ok(found) => summary.boundaries = found,
                        Err(e) => {
                            log::error!("Boundary summary failed: {e}");
                            summary.failures.push(format!("boundaries: {e}"));
                        }
                    }
                }
                None => {
                    log::warn!("No composite index output to summarise by boundary");
                    summary
                        .failures
                        .push("boundaries: no composite index output".to_string());
                }
            }
        }

        log::info!(
            "Region finished: {} mosaics, {} boundaries, {} failures",
            summary.mosaics.len(),
            summary.boundaries.len(),
            summary.failures.len()
        );
        Ok(summary)
    }

    /// Writes `{node}/{node}.vrt` and its style. With `materialize` set the
    /// stitched raster is returned as well.
    fn mosaic_node(
        &self,
        node: &str,
        entries: &[(&PartId, &Path)],
        materialize: bool,
    ) -> Result<(MosaicOutput, Option<ScoreRaster>), WorkflowError> {
        let mut sources = Vec::with_capacity(entries.len());
        let mut rasters = Vec::new();
        for (_, path) in entries {
            let raster = read_geotiff(path)?;
            sources.push(MosaicSource::from_raster(*path, &raster));
            if materialize {
                rasters.push(raster);
            }
        }

        let mosaic = Mosaic::build(sources)?;
        let path = self.config().analysis.output_dir.join(node).join(format!("{node}.vrt"));
        mosaic.write_vrt(&path, Some(self.crs()))?;
        self.node_style(node).write(&path.with_extension("json"))?;
        let stitched = if materialize {
            Some(mosaic.materialize(&rasters)?)
        } else {
            None
        };

        Ok((
            MosaicOutput {
                node: node.to_string(),
                path,
                parts: entries.len(),
            },
            stitched,
        ))
    }

    fn summarise_boundaries(
        &self,
        config: &BoundaryConfig,
        vrt: &Path,
        composite: &ScoreRaster,
    ) -> Result<Vec<BoundarySummary>, WorkflowError> {
        let layer = self.layers().vector(&config.path)?;
        let boundaries: Vec<(String, Geometry<f64>)> = layer
            .as_vector()
            .map(|vector| {
                vector
                    .features
                    .iter()
                    .enumerate()
                    .filter_map(|(i, feature)| {
                        let geometry = feature.geometry.clone()?;
                        let id = feature
                            .text(&config.id_field)
                            .unwrap_or_else(|| format!("boundary{i}"));
                        Some((id, geometry))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let legend = Legend::enablement();
        let summaries = majority_by_boundary(composite, &boundaries, |value| {
            legend
                .class_index(value)
                .and_then(|class| u32::try_from(class).ok())
        });

        let dir = vrt.parent().unwrap_or_else(|| Path::new("."));
        let json = dir.join(format!("{INDEX_NODE}_boundaries.json"));
        let text = serde_json::to_string_pretty(&summaries)?;
        std::fs::write(&json, text).map_err(|source| WorkflowError::Io {
            path: json.clone(),
            source,
        })?;

        let majority = burn_majority(composite, &boundaries, &summaries);
        write_geotiff(
            &dir.join(format!("{INDEX_NODE}_majority.tif")),
            &majority,
            Some(self.crs()),
        )?;

        log::info!(
            "Summarised the composite index over {} boundaries",
            summaries.len()
        );
        Ok(summaries)
    }
}

//! Per-part execution of the factor / dimension / index tree.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use geest_aggregate::{JobsMask, Legend, Member, StyleDescriptor, combine_population, rebalance, weighted_sum};
use geest_grid::{AreaGrid, CellIndex, GridBuilder, SpatialRef, StudyArea};
use geest_model_models::{
    AnalysisConfig, FactorConfig, INDEX_NODE, InputMode, JOBS_NODE, JobsConfig, JobsKind,
    NodeLevel, POPULATION_NODE, PartId,
};
use geest_raster::{ScoreRaster, write_geotiff};
use geest_scoring::ProgressCallback;
use geest_tables::TableSet;
use geo::Polygon;

use crate::cancel::CancellationToken;
use crate::factor::{PartContext, score_factor};
use crate::layers::{Layer, LayerCache, LayerProvider};
use crate::report::{NodeReport, PartReport};
use crate::WorkflowError;

/// One polygon part of one study area, ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct PartTask {
    /// `<area>_<index>` identifier; names the part's output files.
    pub id: PartId,
    /// Part geometry in the analysis CRS.
    pub polygon: Polygon<f64>,
}

/// A member's configuration paired with its raster, `None` when it did not
/// produce one.
type MemberOutcome = (Member, Option<ScoreRaster>);

/// Runs analyses described by one [`AnalysisConfig`].
///
/// Shared by reference across workers; all per-part state lives on the
/// stack of [`run_part`](Self::run_part).
#[derive(Debug)]
pub struct Workflow {
    config: AnalysisConfig,
    tables: TableSet,
    crs: SpatialRef,
    builder: GridBuilder,
    layers: LayerCache,
}

impl Workflow {
    /// Validates `config`, resolves the analysis CRS and loads the
    /// exclusion layer.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Config`] for an invalid configuration,
    /// [`WorkflowError::CrsMismatch`] for a geographic analysis CRS, and
    /// any error loading the exclusion layer.
    pub fn new(
        config: AnalysisConfig,
        tables: TableSet,
        provider: Arc<dyn LayerProvider>,
    ) -> Result<Self, WorkflowError> {
        config.validate()?;
        let crs = SpatialRef::parse(&config.analysis.crs)?;
        if crs.is_geographic() {
            return Err(WorkflowError::CrsMismatch {
                layer: "analysis".to_string(),
                message: format!("{crs} is geographic; the grid needs a projected CRS in metres"),
            });
        }

        let layers = LayerCache::new(provider, crs.clone());
        let mut builder = GridBuilder::new(config.analysis.resolution, config.analysis.origin)?;
        if let Some(reference) = &config.study_area.exclusion_path {
            let layer = layers.vector(reference)?;
            if let Some(vector) = layer.as_vector() {
                let exclusions = vector.polygons();
                log::info!("Loaded {} exclusion polygons from {reference}", exclusions.0.len());
                builder = builder.with_exclusions(exclusions);
            }
        }

        log::info!(
            "Analysis on {crs} at {}m with {} dimensions",
            config.analysis.resolution,
            config.dimensions.len()
        );

        Ok(Self {
            config,
            tables,
            crs,
            builder,
            layers,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    #[must_use]
    pub const fn crs(&self) -> &SpatialRef {
        &self.crs
    }

    /// Splits the study area layer into part tasks, sorted by part id.
    ///
    /// Area ids come from `id_field` (sanitized for file names) or fall back
    /// to `area{n}`. Features without usable polygons are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns the layer's loading error, or
    /// [`WorkflowError::InvalidGeometry`] when no feature yields a part.
    pub fn study_parts(&self) -> Result<Vec<PartTask>, WorkflowError> {
        let reference = &self.config.study_area.path;
        let layer = self.layers.vector(reference)?;
        let Some(vector) = layer.as_vector() else {
            return Err(WorkflowError::MissingInput {
                node: "study_area".to_string(),
                what: format!("vector layer '{reference}'"),
            });
        };

        let mut seen = BTreeSet::new();
        let mut tasks = Vec::new();
        let mut skipped = 0_usize;

        for (i, feature) in vector.features.iter().enumerate() {
            let raw = self
                .config
                .study_area
                .id_field
                .as_deref()
                .and_then(|field| feature.text(field));
            let mut id = raw
                .as_deref()
                .map(sanitize_id)
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("area{i}"));
            if !seen.insert(id.clone()) {
                id = format!("{id}_{i}");
                seen.insert(id.clone());
            }

            let Some(geometry) = feature.geometry.clone() else {
                skipped += 1;
                log::debug!("Study area feature {i} has no geometry");
                continue;
            };
            match StudyArea::from_geometry(id, geometry) {
                Ok(area) => tasks.extend(area.identified_parts().map(|(id, polygon)| PartTask {
                    id,
                    polygon: polygon.clone(),
                })),
                Err(e) => {
                    skipped += 1;
                    log::warn!("Skipping study area feature {i}: {e}");
                }
            }
        }

        if skipped > 0 {
            log::warn!("{reference}: skipped {skipped} features without usable polygons");
        }
        if tasks.is_empty() {
            return Err(WorkflowError::InvalidGeometry {
                layer: reference.clone(),
                message: "no usable polygon parts".to_string(),
            });
        }

        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        log::info!("Study area split into {} parts", tasks.len());
        Ok(tasks)
    }

    /// Raster path of `node` on `part`.
    #[must_use]
    pub fn output_path(&self, node: &str, part: &PartId) -> PathBuf {
        self.config
            .analysis
            .output_dir
            .join(node)
            .join(format!("{node}_{part}.tif"))
    }

    /// Runs every used node on one part.
    ///
    /// Never fails as a whole: node failures, grid failures and
    /// cancellation are all recorded in the returned report.
    pub fn run_part(
        &self,
        task: &PartTask,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> PartReport {
        let mut report = PartReport::new(task.id.clone());
        log::info!("{}: starting", task.id);

        match self.score_part(task, progress, cancel, &mut report) {
            Ok(()) => {
                let failed = report.failed_nodes().count();
                if failed > 0 {
                    log::warn!("{}: finished with {failed} failed nodes", task.id);
                } else {
                    log::info!("{}: finished", task.id);
                }
            }
            Err(WorkflowError::Cancelled) => {
                log::warn!("{}: cancelled", task.id);
                report.cancelled = true;
            }
            Err(e) => {
                log::error!("{}: {e}", task.id);
                report.error = Some(e.to_string());
            }
        }

        progress.finish(format!("{} done", task.id));
        report
    }

    fn score_part(
        &self,
        task: &PartTask,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
        report: &mut PartReport,
    ) -> Result<(), WorkflowError> {
        cancel.check()?;
        let grid = self.builder.build_part(task.id.clone(), &task.polygon)?;
        let index = CellIndex::build(&grid);
        let ctx = PartContext {
            grid: &grid,
            index: &index,
            tables: &self.tables,
            layers: &self.layers,
            progress,
            progress_every: self.config.analysis.progress_every,
        };

        let mut dimensions = Vec::with_capacity(self.config.dimensions.len());
        for dimension in &self.config.dimensions {
            cancel.check()?;
            let member = Member::new(&dimension.id, dimension.weight, dimension.used);
            if !dimension.used {
                report
                    .nodes
                    .push(NodeReport::excluded(&dimension.id, NodeLevel::Dimension));
                dimensions.push((member, None));
                continue;
            }

            let mut factors = Vec::with_capacity(dimension.factors.len());
            for factor in &dimension.factors {
                factors.push(self.run_factor(&ctx, factor, cancel, report)?);
            }
            cancel.check()?;
            let raster =
                self.aggregate(&grid, &dimension.id, NodeLevel::Dimension, &factors, report);
            dimensions.push((member, raster));
        }

        cancel.check()?;
        if let Some(composite) = self.aggregate(&grid, INDEX_NODE, NodeLevel::Index, &dimensions, report)
        {
            cancel.check()?;
            self.post_process(&grid, &composite, report);
        }
        Ok(())
    }

    /// Scores (or aggregates) one factor. Only cancellation is returned as
    /// an error; everything else is recorded and yields `None`.
    fn run_factor(
        &self,
        ctx: &PartContext<'_>,
        factor: &FactorConfig,
        cancel: &CancellationToken,
        report: &mut PartReport,
    ) -> Result<MemberOutcome, WorkflowError> {
        cancel.check()?;
        let member = Member::new(&factor.id, factor.weight, factor.used);
        if !factor.used {
            report
                .nodes
                .push(NodeReport::excluded(&factor.id, NodeLevel::Factor));
            return Ok((member, None));
        }

        if factor.is_parent() {
            let mut subfactors = Vec::with_capacity(factor.subfactors.len());
            for sub in &factor.subfactors {
                subfactors.push(self.run_factor(ctx, sub, cancel, report)?);
            }
            cancel.check()?;
            let raster = self.aggregate(ctx.grid, &factor.id, NodeLevel::Factor, &subfactors, report);
            return Ok((member, raster));
        }

        let part = ctx.grid.part();
        let outcome = score_factor(ctx, factor).and_then(|(scores, stats)| {
            let raster = scores.to_raster(ctx.grid);
            let path = self.write_output(&factor.id, part, &raster)?;
            Ok((raster, stats, path))
        });

        match outcome {
            Ok((raster, stats, path)) => {
                report.nodes.push(NodeReport::completed(
                    &factor.id,
                    NodeLevel::Factor,
                    path,
                    raster.valid_count(),
                    stats.invalid_geometry,
                ));
                Ok((member, Some(raster)))
            }
            Err(e) => {
                log::error!("{part}: factor '{}' failed: {e}", factor.id);
                report
                    .nodes
                    .push(NodeReport::failed(&factor.id, NodeLevel::Factor, e.to_string()));
                Ok((member, None))
            }
        }
    }

    /// Weighted sum of `members` into `node`. A failed used member fails
    /// the node; excluded members are ignored.
    fn aggregate(
        &self,
        grid: &AreaGrid,
        node: &str,
        level: NodeLevel,
        members: &[MemberOutcome],
        report: &mut PartReport,
    ) -> Option<ScoreRaster> {
        let part = grid.part();
        let failed: Vec<&str> = members
            .iter()
            .filter(|(member, raster)| member.used && raster.is_none())
            .map(|(member, _)| member.id.as_str())
            .collect();
        if !failed.is_empty() {
            let message = format!("used members failed: {}", failed.join(", "));
            log::error!("{part}: {level} '{node}' failed: {message}");
            report.nodes.push(NodeReport::failed(node, level, message));
            return None;
        }

        let outcome = self.combine(node, members).and_then(|raster| {
            let path = self.write_output(node, part, &raster)?;
            Ok((raster, path))
        });
        match outcome {
            Ok((raster, path)) => {
                report.nodes.push(NodeReport::completed(
                    node,
                    level,
                    path,
                    raster.valid_count(),
                    0,
                ));
                Some(raster)
            }
            Err(e) => {
                log::error!("{part}: {level} '{node}' failed: {e}");
                report.nodes.push(NodeReport::failed(node, level, e.to_string()));
                None
            }
        }
    }

    fn combine(&self, node: &str, members: &[MemberOutcome]) -> Result<ScoreRaster, WorkflowError> {
        let configured: Vec<Member> = members.iter().map(|(member, _)| member.clone()).collect();
        let weights = rebalance(node, &configured, self.config.analysis.rebalance)?;

        let inputs: Vec<(&ScoreRaster, f64)> = members
            .iter()
            .filter_map(|(member, raster)| {
                let weight = weights.get(&member.id).filter(|w| *w > 0.0)?;
                raster.as_ref().map(|raster| (raster, weight))
            })
            .collect();
        Ok(weighted_sum(node, &inputs)?)
    }

    /// Population-combined and job-masked variants of the composite index.
    fn post_process(&self, grid: &AreaGrid, composite: &ScoreRaster, report: &mut PartReport) {
        let part = grid.part();
        let index = &self.config.index;

        if let Some(reference) = &index.population {
            let outcome = self.population_index(reference, composite);
            self.record_variant(POPULATION_NODE, part, outcome, report);
        }
        if let Some(jobs) = &index.jobs {
            let outcome = self.jobs_mask(jobs).map(|mask| mask.apply(composite));
            self.record_variant(JOBS_NODE, part, outcome, report);
        }
    }

    fn record_variant(
        &self,
        node: &str,
        part: &PartId,
        outcome: Result<ScoreRaster, WorkflowError>,
        report: &mut PartReport,
    ) {
        let outcome = outcome.and_then(|raster| {
            let path = self.write_output(node, part, &raster)?;
            Ok((raster, path))
        });
        match outcome {
            Ok((raster, path)) => report.nodes.push(NodeReport::completed(
                node,
                NodeLevel::Index,
                path,
                raster.valid_count(),
                0,
            )),
            Err(e) => {
                log::error!("{part}: '{node}' failed: {e}");
                report
                    .nodes
                    .push(NodeReport::failed(node, NodeLevel::Index, e.to_string()));
            }
        }
    }

    fn population_index(
        &self,
        reference: &str,
        composite: &ScoreRaster,
    ) -> Result<ScoreRaster, WorkflowError> {
        let layer = self.layers.layer(reference)?;
        let Layer::Raster(population) = layer.as_ref() else {
            return Err(WorkflowError::MissingInput {
                node: POPULATION_NODE.to_string(),
                what: format!("population raster '{reference}' (found a vector layer)"),
            });
        };
        Ok(combine_population(composite, &population.raster)?)
    }

    fn jobs_mask(&self, jobs: &JobsConfig) -> Result<JobsMask, WorkflowError> {
        let layer = self.layers.layer(&jobs.path)?;
        let missing = |what: &str| WorkflowError::MissingInput {
            node: JOBS_NODE.to_string(),
            what: format!("{what} for jobs layer '{}'", jobs.path),
        };

        match (jobs.kind, layer.as_ref()) {
            (JobsKind::Raster, Layer::Raster(raster)) => Ok(JobsMask::from_raster(raster.raster.clone())),
            (JobsKind::Points, Layer::Vector(vector)) => {
                let radius = jobs.buffer_radius_m.ok_or_else(|| missing("buffer_radius_m"))?;
                Ok(JobsMask::from_points(
                    vector.features.iter().filter_map(|f| f.geometry.as_ref()),
                    radius,
                ))
            }
            (JobsKind::Polygons, Layer::Vector(vector)) => Ok(JobsMask::from_polygons(
                vector.features.iter().filter_map(|f| f.geometry.as_ref()),
            )),
            (JobsKind::Raster, Layer::Vector(_)) => Err(missing("a raster")),
            (_, Layer::Raster(_)) => Err(missing("a vector layer")),
        }
    }

    /// Style sidecar for `node`, derived from where it sits in the tree.
    #[must_use]
    pub fn node_style(&self, node: &str) -> StyleDescriptor {
        if node == POPULATION_NODE {
            return StyleDescriptor::new(node, NodeLevel::Index, Legend::population_combined());
        }
        if node == INDEX_NODE || node == JOBS_NODE {
            return StyleDescriptor::new(node, NodeLevel::Index, Legend::enablement());
        }
        if self.config.dimensions.iter().any(|d| d.id == node) {
            return StyleDescriptor::new(node, NodeLevel::Dimension, Legend::enablement());
        }

        let style = StyleDescriptor::new(node, NodeLevel::Factor, Legend::enablement());
        match self
            .config
            .dimensions
            .iter()
            .find_map(|d| find_factor(&d.factors, node))
        {
            Some(factor) if factor.input_mode == Some(InputMode::MultiBuffer) => {
                style.with_travel_mode(factor.travel_mode)
            }
            _ => style,
        }
    }

    fn write_output(
        &self,
        node: &str,
        part: &PartId,
        raster: &ScoreRaster,
    ) -> Result<PathBuf, WorkflowError> {
        let path = self.output_path(node, part);
        write_geotiff(&path, raster, Some(&self.crs))?;
        self.node_style(node).write(&path.with_extension("json"))?;
        log::debug!("{part}: wrote {}", path.display());
        Ok(path)
    }

    pub(crate) const fn layers(&self) -> &LayerCache {
        &self.layers
    }
}

fn find_factor<'a>(factors: &'a [FactorConfig], id: &str) -> Option<&'a FactorConfig> {
    factors.iter().find_map(|factor| {
        if factor.id == id {
            Some(factor)
        } else {
            find_factor(&factor.subfactors, id)
        }
    })
}

/// Lowercase ASCII alphanumerics, everything else folded to `_`.
fn sanitize_id(raw: &str) -> String {
    let mut id = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else if !id.ends_with('_') {
            id.push('_');
        }
    }
    id.trim_matches('_').to_string()
}

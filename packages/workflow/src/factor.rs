//! Scoring one leaf factor on one part.
//!
//! Maps a factor's [`InputMode`] and options onto the matching scorer and
//! returns dense per-cell scores. Every missing layer, field or table is a
//! [`WorkflowError::MissingInput`] for that factor alone.

use std::sync::Arc;

use geest_grid::{AreaGrid, CellIndex};
use geest_model_models::{FactorConfig, InputMode, MIN_SCORE};
use geest_scoring::{
    AttributeRule, CellScores, CoverageMode, CoverageScorer, FeatureScorer, LinearRescale,
    MultiBufferScorer, PolygonBurner, PolygonValue, ProgressCallback, ScoreStats, SeverityScorer,
    UNTOUCHED_SEVERITY, index_value_scores, sample_raster,
};
use geest_tables::{BandTable, BinTable, TableSet};
use geo::MultiPolygon;

use crate::layers::{Layer, LayerCache, VectorLayer};
use crate::WorkflowError;

/// Event attribute read when a buffer factor names no category field.
pub const DEFAULT_CATEGORY_FIELD: &str = "event_type";

/// Everything a factor needs from its part.
pub struct PartContext<'a> {
    pub grid: &'a AreaGrid,
    pub index: &'a CellIndex,
    pub tables: &'a TableSet,
    pub layers: &'a LayerCache,
    pub progress: &'a dyn ProgressCallback,
    pub progress_every: u64,
}

/// Scores a leaf factor. Parents (factors with subfactors) are aggregated
/// by the caller instead.
///
/// # Errors
///
/// Returns [`WorkflowError::MissingInput`] for absent options or layers and
/// the scorer's own error for unusable options.
pub fn score_factor(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
) -> Result<(CellScores, ScoreStats), WorkflowError> {
    let node = factor.id.as_str();
    let mode = factor
        .input_mode
        .ok_or_else(|| missing(node, "input_mode"))?;
    ctx.progress
        .set_message(format!("{}: {node} ({mode})", ctx.grid.part()));

    let result = match mode {
        InputMode::IndexValue => {
            let value = factor.index_value.ok_or_else(|| missing(node, "index_value"))?;
            let (min, max) = factor.linear_domain();
            let rescale = LinearRescale::new(min, max)?;
            Ok((
                index_value_scores(ctx.grid, value, &rescale),
                ScoreStats::default(),
            ))
        }
        InputMode::Classification => classification(ctx, factor),
        InputMode::Buffer => severity(ctx, factor),
        InputMode::Coverage | InputMode::Binary => coverage(ctx, factor, mode),
        InputMode::MultiBuffer => rings(ctx, factor),
        InputMode::Linear | InputMode::Step => reclassify(ctx, factor, mode),
    }?;

    result.1.log_summary(node);
    Ok(result)
}

fn classification(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
) -> Result<(CellScores, ScoreStats), WorkflowError> {
    let node = factor.id.as_str();
    let layer = layer(ctx, factor)?;
    let layer = vector(node, &layer)?;
    let field = required(node, factor.classification_field.as_deref(), "classification_field")?;
    let rule = ctx
        .tables
        .rule(required(node, factor.table.as_deref(), "table")?)?;
    start(ctx, layer);

    if layer.is_polygonal() {
        let mask = sub_mask(ctx, factor)?;
        let burner = PolygonBurner::new(PolygonValue::Rule { field, rule });
        return Ok(burn(ctx, burner, mask.as_ref(), layer, MIN_SCORE));
    }

    let mut rules = vec![AttributeRule { field, rule }];
    if let (Some(field), Some(table)) = (&factor.secondary_field, &factor.secondary_table) {
        rules.push(AttributeRule {
            field,
            rule: ctx.tables.rule(table)?,
        });
    }
    let scored = FeatureScorer::new(rules)
        .progress_every(ctx.progress_every)
        .score(ctx.grid, ctx.index, &layer.features, ctx.progress);
    Ok((scored.map.finish(ctx.grid, MIN_SCORE), scored.stats))
}

fn severity(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
) -> Result<(CellScores, ScoreStats), WorkflowError> {
    let node = factor.id.as_str();
    let layer = layer(ctx, factor)?;
    let layer = vector(node, &layer)?;
    let table = ctx
        .tables
        .events(required(node, factor.table.as_deref(), "table")?)?;
    let category = factor
        .category_field
        .as_deref()
        .unwrap_or(DEFAULT_CATEGORY_FIELD);
    start(ctx, layer);

    let mut scorer = SeverityScorer::new(table, category).progress_every(ctx.progress_every);
    if let Some(field) = factor.radius_field.as_deref() {
        scorer = scorer.radius_field(field);
    }
    let scored = scorer.score(ctx.grid, ctx.index, &layer.features, ctx.progress);
    Ok((scored.map.finish(ctx.grid, UNTOUCHED_SEVERITY), scored.stats))
}

fn coverage(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
    mode: InputMode,
) -> Result<(CellScores, ScoreStats), WorkflowError> {
    let node = factor.id.as_str();
    let layer = layer(ctx, factor)?;
    let layer = vector(node, &layer)?;
    let radius = factor.buffer_radius_m.unwrap_or(0.0);

    let owned;
    let (bins, coverage_mode) = if mode == InputMode::Binary {
        owned = BinTable::binary(node);
        (&owned, CoverageMode::Presence)
    } else if factor.thresholds.is_empty() {
        let table = required(node, factor.table.as_deref(), "table or thresholds")?;
        (ctx.tables.bins(table)?, CoverageMode::Percentage)
    } else {
        owned = BinTable::from_pairs(node, &factor.thresholds, &factor.scores)?;
        (&owned, CoverageMode::Percentage)
    };
    start(ctx, layer);

    let scorer = CoverageScorer::new(radius, bins, coverage_mode)?.progress_every(ctx.progress_every);
    Ok(scorer.score(ctx.grid, ctx.index, &layer.features, ctx.progress))
}

fn rings(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
) -> Result<(CellScores, ScoreStats), WorkflowError> {
    let node = factor.id.as_str();
    let layer = layer(ctx, factor)?;
    let layer = vector(node, &layer)?;
    let scorer = MultiBufferScorer::new(&factor.thresholds, &factor.scores, factor.travel_mode)?
        .progress_every(ctx.progress_every);
    start(ctx, layer);

    log::debug!(
        "{node}: {} rings for {} travel",
        scorer.rings().len(),
        scorer.travel_mode()
    );
    let scored = scorer.score(ctx.grid, ctx.index, &layer.features, ctx.progress);
    Ok((scored.map.finish(ctx.grid, MIN_SCORE), scored.stats))
}

fn reclassify(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
    mode: InputMode,
) -> Result<(CellScores, ScoreStats), WorkflowError> {
    let node = factor.id.as_str();
    let layer = layer(ctx, factor)?;

    let owned;
    let (rescale, bands) = if mode == InputMode::Linear {
        let (min, max) = factor.linear_domain();
        (Some(LinearRescale::new(min, max)?), None)
    } else if let Some(table) = factor.table.as_deref() {
        (None, Some(ctx.tables.bands(table)?))
    } else if factor.thresholds.is_empty() {
        return Err(missing(node, "table or thresholds"));
    } else {
        owned = BandTable::from_pairs(node, &factor.thresholds, &factor.scores)?;
        (None, Some(&owned))
    };

    match layer.as_ref() {
        Layer::Raster(raster) => {
            let scores = sample_raster(ctx.grid, &raster.raster, |value| match (rescale, bands) {
                (Some(rescale), _) => value.map(|v| rescale.score(v)),
                (None, Some(bands)) => Some(bands.score(value)),
                (None, None) => None,
            });
            Ok((scores, ScoreStats::default()))
        }
        Layer::Vector(vector) => {
            let field = required(node, factor.classification_field.as_deref(), "classification_field")?;
            let (value, untouched) = match (rescale, bands) {
                (Some(rescale), _) => (PolygonValue::Linear { field, rescale }, MIN_SCORE),
                (None, Some(bands)) => (PolygonValue::Bands { field, bands }, bands.score(None)),
                (None, None) => return Err(missing(node, "table or thresholds")),
            };
            let mask = sub_mask(ctx, factor)?;
            start(ctx, vector);
            Ok(burn(ctx, PolygonBurner::new(value), mask.as_ref(), vector, untouched))
        }
    }
}

fn burn(
    ctx: &PartContext<'_>,
    burner: PolygonBurner<'_>,
    mask: Option<&MultiPolygon<f64>>,
    layer: &VectorLayer,
    untouched: f64,
) -> (CellScores, ScoreStats) {
    let mut burner = burner.progress_every(ctx.progress_every);
    if let Some(mask) = mask {
        burner = burner.sub_mask(mask);
    }
    let scored = burner.burn(ctx.grid, ctx.index, &layer.features, ctx.progress);
    (burner.finish(ctx.grid, &scored.map, untouched), scored.stats)
}

fn layer(ctx: &PartContext<'_>, factor: &FactorConfig) -> Result<Arc<Layer>, WorkflowError> {
    let reference = required(&factor.id, factor.layer.as_deref(), "layer")?;
    ctx.layers.layer(reference).map_err(|e| match e {
        WorkflowError::MissingInput { what, .. } => WorkflowError::MissingInput {
            node: factor.id.clone(),
            what: format!("layer '{reference}': {what}"),
        },
        other => other,
    })
}

fn vector<'l>(node: &str, layer: &'l Layer) -> Result<&'l VectorLayer, WorkflowError> {
    layer
        .as_vector()
        .ok_or_else(|| missing(node, "a vector layer (found a raster)"))
}

fn sub_mask(
    ctx: &PartContext<'_>,
    factor: &FactorConfig,
) -> Result<Option<MultiPolygon<f64>>, WorkflowError> {
    let Some(reference) = factor.sub_mask.as_deref() else {
        return Ok(None);
    };
    let layer = ctx.layers.vector(reference)?;
    Ok(layer.as_vector().map(VectorLayer::polygons))
}

fn start(ctx: &PartContext<'_>, layer: &VectorLayer) {
    ctx.progress.set_total(layer.features.len() as u64);
}

fn required<'v>(node: &str, value: Option<&'v str>, what: &str) -> Result<&'v str, WorkflowError> {
    value.ok_or_else(|| missing(node, what))
}

fn missing(node: &str, what: &str) -> WorkflowError {
    WorkflowError::MissingInput {
        node: node.to_string(),
        what: what.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use geest_grid::{GridBuilder, SpatialRef};
    use geest_model_models::PartId;
    use geest_scoring::{Feature, NullProgress};
    use geo::{Geometry, line_string, polygon};
    use serde_json::json;

    use super::*;
    use crate::MemoryLayerProvider;

    fn utm() -> SpatialRef {
        SpatialRef::parse("EPSG:32620").unwrap()
    }

    fn square_grid() -> AreaGrid {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 1000.0, y: 0.0),
            (x: 1000.0, y: 1000.0),
            (x: 0.0, y: 1000.0),
        ];
        GridBuilder::new(100.0, [0.0, 0.0])
            .unwrap()
            .build_part(PartId::new("test", 0), &square)
            .unwrap()
    }

    fn factor(value: serde_json::Value) -> FactorConfig {
        serde_json::from_value(value).unwrap()
    }

    fn run(
        provider: MemoryLayerProvider,
        config: &FactorConfig,
    ) -> Result<(AreaGrid, CellScores), WorkflowError> {
        let grid = square_grid();
        let index = CellIndex::build(&grid);
        let tables = TableSet::embedded();
        let layers = LayerCache::new(Arc::new(provider), utm());
        let ctx = PartContext {
            grid: &grid,
            index: &index,
            tables: &tables,
            layers: &layers,
            progress: &NullProgress,
            progress_every: 10,
        };
        let (scores, _) = score_factor(&ctx, config)?;
        Ok((grid, scores))
    }

    fn at(grid: &AreaGrid, scores: &CellScores, row: usize, col: usize) -> Option<f64> {
        grid.cell_at(row, col).and_then(|cell| scores.get(cell.id))
    }

    #[test]
    fn classification_scores_touched_cells_and_zeroes_the_rest() {
        let road = Feature::new(Some(Geometry::LineString(line_string![
            (x: 0.0, y: 550.0),
            (x: 1000.0, y: 550.0),
        ])))
        .with("highway", "residential");
        let provider = MemoryLayerProvider::new().with_vector("roads", utm(), vec![road]);
        let config = factor(json!({
            "id": "active_transport",
            "weight": 1.0,
            "input_mode": "classification",
            "layer": "roads",
            "classification_field": "highway",
            "table": "road_types",
        }));

        let (grid, scores) = run(provider, &config).unwrap();
        assert_eq!(scores.scored_count(), grid.land_count());
        for col in 0..10 {
            assert_eq!(at(&grid, &scores, 4, col), Some(5.0));
        }
        assert_eq!(at(&grid, &scores, 0, 0), Some(0.0));
    }

    #[test]
    fn missing_layer_is_attributed_to_the_factor() {
        let config = factor(json!({
            "id": "street_lights",
            "weight": 1.0,
            "input_mode": "coverage",
            "layer": "lights",
            "table": "lighting_coverage",
            "buffer_radius_m": 20.0,
        }));

        let err = run(MemoryLayerProvider::new(), &config).unwrap_err();
        match err {
            WorkflowError::MissingInput { node, what } => {
                assert_eq!(node, "street_lights");
                assert!(what.contains("lights"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn index_value_fills_every_land_cell() {
        let config = factor(json!({
            "id": "wbl",
            "weight": 1.0,
            "input_mode": "index_value",
            "index_value": 50.0,
        }));

        let (grid, scores) = run(MemoryLayerProvider::new(), &config).unwrap();
        assert_eq!(scores.scored_count(), grid.land_count());
        assert!(scores.as_slice().iter().flatten().all(|&s| (s - 2.5).abs() < 1e-9));
    }

    #[test]
    fn buffer_without_events_is_fully_safe() {
        let provider = MemoryLayerProvider::new().with_vector("events", utm(), Vec::new());
        let config = factor(json!({
            "id": "safety",
            "weight": 1.0,
            "input_mode": "buffer",
            "layer": "events",
            "table": "acled_events",
        }));

        let (_, scores) = run(provider, &config).unwrap();
        assert!(scores
            .as_slice()
            .iter()
            .flatten()
            .all(|&s| (s - UNTOUCHED_SEVERITY).abs() < f64::EPSILON));
    }

    #[test]
    fn step_polygons_use_no_data_score_outside_hazard() {
        let hazard = Feature::new(Some(Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 500.0, y: 0.0),
            (x: 500.0, y: 1000.0),
            (x: 0.0, y: 1000.0),
        ])))
        .with("class", 5.0);
        let provider = MemoryLayerProvider::new().with_vector("floods", utm(), vec![hazard]);
        let config = factor(json!({
            "id": "flood",
            "weight": 1.0,
            "input_mode": "step",
            "layer": "floods",
            "classification_field": "class",
            "table": "flood_hazard",
        }));

        let (grid, scores) = run(provider, &config).unwrap();
        assert_eq!(at(&grid, &scores, 5, 1), Some(0.0));
        assert_eq!(at(&grid, &scores, 5, 8), Some(5.0));
    }

    #[test]
    fn sub_mask_leaves_cells_outside_it_without_a_score() {
        let hazard = Feature::new(Some(Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 500.0, y: 0.0),
            (x: 500.0, y: 1000.0),
            (x: 0.0, y: 1000.0),
        ])))
        .with("class", 1.0);
        let urban = Feature::new(Some(Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 700.0, y: 0.0),
            (x: 700.0, y: 1000.0),
            (x: 0.0, y: 1000.0),
        ])));
        let provider = MemoryLayerProvider::new()
            .with_vector("floods", utm(), vec![hazard])
            .with_vector("urban", utm(), vec![urban]);
        let config = factor(json!({
            "id": "flood",
            "weight": 1.0,
            "input_mode": "step",
            "layer": "floods",
            "classification_field": "class",
            "table": "flood_hazard",
            "sub_mask": "urban",
        }));

        let (grid, scores) = run(provider, &config).unwrap();
        assert_eq!(scores.scored_count(), 70);
        assert_eq!(at(&grid, &scores, 5, 1), Some(4.0));
        assert_eq!(at(&grid, &scores, 5, 6), Some(5.0));
        assert_eq!(at(&grid, &scores, 5, 8), None);
        assert_eq!(at(&grid, &scores, 0, 9), None);
    }

    #[test]
    fn raster_layers_are_rejected_where_vectors_are_needed() {
        let grid = square_grid();
        let raster = geest_raster::ScoreRaster::empty(*grid.transform(), 10, 10);
        let provider = MemoryLayerProvider::new().with_raster("pop", raster);
        let config = factor(json!({
            "id": "schools",
            "weight": 1.0,
            "input_mode": "multi_buffer",
            "layer": "pop",
            "thresholds": [400.0, 800.0],
        }));

        assert!(matches!(
            run(provider, &config),
            Err(WorkflowError::MissingInput { .. })
        ));
    }
}

//! Whole-area runs over small synthetic layers.

use std::path::Path;
use std::sync::Arc;

use geest_grid::{GeoTransform, SpatialRef};
use geest_model_models::{AnalysisConfig, INDEX_NODE, JOBS_NODE, POPULATION_NODE};
use geest_raster::{ScoreRaster, read_geotiff};
use geest_tables::TableSet;
use geest_workflow::{
    CancellationToken, Feature, FileLayerProvider, MemoryLayerProvider, NodeStatus, NullProgress,
    PartReport, PartTask, RunReport, Workflow,
};
use geo::{Geometry, LineString, MultiPolygon, Point, Polygon, line_string};

fn utm() -> SpatialRef {
    SpatialRef::parse("EPSG:32620").unwrap()
}

fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (x0, y0),
            (x0 + size, y0),
            (x0 + size, y0 + size),
            (x0, y0 + size),
            (x0, y0),
        ]),
        Vec::new(),
    )
}

/// One area with two 1 km parts, 1 km apart.
fn study_area() -> Vec<Feature> {
    let parts = MultiPolygon::new(vec![square(0.0, 0.0, 1000.0), square(2000.0, 0.0, 1000.0)]);
    vec![Feature::new(Some(Geometry::MultiPolygon(parts))).with("name", "Test Region")]
}

/// A residential road along row 4 and a shared-lane cycleway along
/// column 5 of the first part.
fn roads() -> Vec<Feature> {
    vec![
        Feature::new(Some(Geometry::LineString(line_string![
            (x: 0.0, y: 550.0),
            (x: 1000.0, y: 550.0),
        ])))
        .with("highway", "residential"),
        Feature::new(Some(Geometry::LineString(line_string![
            (x: 550.0, y: 0.0),
            (x: 550.0, y: 1000.0),
        ])))
        .with("cycleway", "shared_lane"),
    ]
}

/// A battle and a protest whose buffers overlap in the second part.
fn events() -> Vec<Feature> {
    vec![
        Feature::new(Some(Geometry::Point(Point::new(2550.0, 550.0))))
            .with("event_type", "battles")
            .with("radius", 200.0),
        Feature::new(Some(Geometry::Point(Point::new(2850.0, 550.0))))
            .with("event_type", "protests")
            .with("radius", 200.0),
    ]
}

fn boundaries() -> Vec<Feature> {
    vec![
        Feature::new(Some(Geometry::Polygon(square(0.0, 0.0, 1000.0)))).with("adm", "west"),
        Feature::new(Some(Geometry::Polygon(square(2000.0, 0.0, 1000.0)))).with("adm", "east"),
    ]
}

fn provider() -> MemoryLayerProvider {
    MemoryLayerProvider::new()
        .with_vector("areas", utm(), study_area())
        .with_vector("roads", utm(), roads())
        .with_vector("events", utm(), events())
        .with_vector("boundaries", utm(), boundaries())
}

fn config(output_dir: &Path, analysis_extra: &str, extra: &str) -> AnalysisConfig {
    let text = format!(
        r#"
[analysis]
resolution = 100.0
crs = "EPSG:32620"
output_dir = "{}"
progress_every = 1
{analysis_extra}

[study_area]
path = "areas"
id_field = "name"

[[dimensions]]
id = "accessibility"
weight = 0.5

[[dimensions.factors]]
id = "active_transport"
weight = 1.0
input_mode = "classification"
layer = "roads"
classification_field = "highway"
table = "road_types"
secondary_field = "cycleway"
secondary_table = "cycleway_types"

[[dimensions]]
id = "safety"
weight = 0.5

[[dimensions.factors]]
id = "conflict"
weight = 0.7
input_mode = "buffer"
layer = "events"
table = "acled_events"
radius_field = "radius"

[[dimensions.factors]]
id = "policy"
weight = 0.3
input_mode = "index_value"
index_value = 83.8
{extra}
"#,
        output_dir.display()
    );
    AnalysisConfig::from_toml_str(&text).unwrap()
}

fn workflow(config: AnalysisConfig, provider: MemoryLayerProvider) -> Workflow {
    Workflow::new(config, TableSet::embedded(), Arc::new(provider)).unwrap()
}

fn run_all(workflow: &Workflow, tasks: &[PartTask]) -> Vec<PartReport> {
    let cancel = CancellationToken::new();
    tasks
        .iter()
        .map(|task| workflow.run_part(task, &NullProgress, &cancel))
        .collect()
}

fn raster(workflow: &Workflow, node: &str, task: &PartTask) -> ScoreRaster {
    read_geotiff(&workflow.output_path(node, &task.id)).unwrap()
}

fn close(found: Option<f64>, expected: f64) -> bool {
    found.is_some_and(|v| (v - expected).abs() < 1e-4)
}

#[test]
fn full_run_scores_aggregates_and_mosaics() {
    let dir = tempfile::tempdir().unwrap();
    let extra = r#"
[index.boundaries]
path = "boundaries"
id_field = "adm"
"#;
    let workflow = workflow(config(dir.path(), "", extra), provider());
    let tasks = workflow.study_parts().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id.to_string(), "test_region_0");

    let started = chrono::Utc::now();
    let parts = run_all(&workflow, &tasks);
    assert!(parts.iter().all(PartReport::is_success), "{parts:#?}");

    let (west, east) = (&tasks[0], &tasks[1]);

    // Best classification wins where the road and the cycleway cross.
    let transport = raster(&workflow, "active_transport", west);
    assert!(close(transport.get(4, 5), 5.0));
    assert!(close(transport.get(0, 5), 4.0));
    assert!(close(transport.get(0, 0), 0.0));

    // Most severe event wins where buffers overlap; untouched cells are safe.
    let conflict = raster(&workflow, "conflict", east);
    assert!(close(conflict.get(4, 6), 0.0));
    assert!(close(conflict.get(4, 8), 4.0));
    assert!(close(conflict.get(0, 0), 5.0));
    assert!(raster(&workflow, "conflict", west)
        .valid_cells()
        .all(|(_, _, v)| (v - 5.0).abs() < 1e-6));

    let policy = raster(&workflow, "policy", west);
    assert!(close(policy.get(0, 0), 4.19));

    // safety = 0.7 * 5 + 0.3 * 4.19; index = 0.5 * 5 + 0.5 * safety
    let index = raster(&workflow, INDEX_NODE, west);
    assert!(close(index.get(4, 5), 0.5f64.mul_add(5.0, 0.5 * 0.3f64.mul_add(4.19, 3.5))));
    for (_, _, value) in index.valid_cells() {
        assert!((0.0..=5.0).contains(&value));
    }

    let region = workflow.finish_region(&parts, &CancellationToken::new()).unwrap();
    assert!(region.failures.is_empty(), "{:?}", region.failures);
    let index_mosaic = region
        .mosaics
        .iter()
        .find(|m| m.node == INDEX_NODE)
        .unwrap();
    assert_eq!(index_mosaic.parts, 2);
    assert!(index_mosaic.path.exists());
    assert!(index_mosaic.path.with_extension("json").exists());

    assert_eq!(region.boundaries.len(), 2);
    assert_eq!(region.boundaries[0].id, "west");
    assert_eq!(region.boundaries[0].cells, 100);
    assert!(region.boundaries[1].majority.is_some());
    assert!(dir.path().join("index").join("index_boundaries.json").exists());

    let report = RunReport::new(started, "EPSG:32620", 100.0, parts).with_region(region);
    assert!(report.is_success());
    report.write(&dir.path().join("report.json")).unwrap();
}

#[test]
fn results_do_not_depend_on_part_order() {
    let forward = tempfile::tempdir().unwrap();
    let reverse = tempfile::tempdir().unwrap();

    let a = workflow(config(forward.path(), "", ""), provider());
    let b = workflow(config(reverse.path(), "", ""), provider());
    let tasks = a.study_parts().unwrap();
    let mut reversed = b.study_parts().unwrap();
    reversed.reverse();

    run_all(&a, &tasks);
    run_all(&b, &reversed);

    for task in &tasks {
        for node in ["active_transport", "conflict", "safety", INDEX_NODE] {
            assert_eq!(
                raster(&a, node, task).to_le_bytes(),
                raster(&b, node, task).to_le_bytes(),
                "{node} on {}",
                task.id
            );
        }
    }
}

#[test]
fn rerun_reproduces_identical_files() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = workflow(config(dir.path(), "", ""), provider());
    let tasks = workflow.study_parts().unwrap();

    run_all(&workflow, &tasks);
    let path = workflow.output_path("conflict", &tasks[1].id);
    let first = std::fs::read(&path).unwrap();

    std::fs::remove_file(&path).unwrap();
    run_all(&workflow, &tasks);
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[test]
fn missing_layer_fails_only_its_branch() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MemoryLayerProvider::new()
        .with_vector("areas", utm(), study_area())
        .with_vector("roads", utm(), roads());
    let workflow = workflow(config(dir.path(), "", ""), provider);
    let tasks = workflow.study_parts().unwrap();
    let report = workflow.run_part(&tasks[0], &NullProgress, &CancellationToken::new());

    let status = |node: &str| report.node(node).unwrap().status;
    assert_eq!(status("active_transport"), NodeStatus::Completed);
    assert_eq!(status("accessibility"), NodeStatus::Completed);
    assert_eq!(status("policy"), NodeStatus::Completed);
    assert_eq!(status("conflict"), NodeStatus::Failed);
    assert_eq!(status("safety"), NodeStatus::Failed);
    assert_eq!(status(INDEX_NODE), NodeStatus::Failed);
    assert!(report
        .node("conflict")
        .and_then(|n| n.message.as_deref())
        .is_some_and(|m| m.contains("events")));
}

#[test]
fn excluded_factor_is_rebalanced_away() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), "", "");
    config.dimensions[1].factors[0].used = false;
    let workflow = workflow(config, provider());
    let tasks = workflow.study_parts().unwrap();
    let report = workflow.run_part(&tasks[1], &NullProgress, &CancellationToken::new());

    assert_eq!(report.node("conflict").unwrap().status, NodeStatus::Excluded);
    // policy alone carries the dimension after rebalancing 0.3 -> 1.0
    let safety = raster(&workflow, "safety", &tasks[1]);
    assert!(safety.valid_cells().all(|(_, _, v)| (v - 4.19).abs() < 1e-4));
}

#[test]
fn imbalanced_weights_fail_when_rebalancing_is_off() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), "rebalance = false", "");
    config.dimensions[1].weight = 0.4;
    let workflow = workflow(config, provider());
    let tasks = workflow.study_parts().unwrap();
    let report = workflow.run_part(&tasks[0], &NullProgress, &CancellationToken::new());

    let index = report.node(INDEX_NODE).unwrap();
    assert_eq!(index.status, NodeStatus::Failed);
    assert!(index.message.as_deref().is_some_and(|m| m.contains("0.9")));
    assert_eq!(report.node("safety").unwrap().status, NodeStatus::Completed);
}

#[test]
fn index_variants_use_population_and_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let extra = r#"
[index]
population = "population"

[index.jobs]
kind = "polygons"
path = "jobs"
"#;
    // Population rises from west to east across the first part.
    let values: Vec<f32> = (0..100_u8).map(|i| f32::from(i % 10 + 1)).collect();
    let population =
        ScoreRaster::from_vec(GeoTransform::new(0.0, 1000.0, 100.0), 10, 10, values).unwrap();
    let jobs = vec![Feature::new(Some(Geometry::Polygon(square(0.0, 0.0, 500.0))))];
    let provider = provider()
        .with_raster("population", population)
        .with_vector("jobs", utm(), jobs);

    let workflow = workflow(config(dir.path(), "", extra), provider);
    let tasks = workflow.study_parts().unwrap();
    let report = workflow.run_part(&tasks[0], &NullProgress, &CancellationToken::new());
    assert!(report.is_success(), "{report:#?}");

    let combined = raster(&workflow, POPULATION_NODE, &tasks[0]);
    assert_eq!(combined.valid_count(), 100);
    for (_, _, value) in combined.valid_cells() {
        assert!((1.0..=15.0).contains(&value), "{value}");
    }
    assert!(combined.get(0, 0) < combined.get(0, 9));

    let masked = raster(&workflow, JOBS_NODE, &tasks[0]);
    assert_eq!(masked.valid_count(), 25);
}

#[test]
fn cancellation_is_reported_per_part() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = workflow(config(dir.path(), "", ""), provider());
    let tasks = workflow.study_parts().unwrap();
    let cancel = CancellationToken::new();

    let first = workflow.run_part(&tasks[0], &NullProgress, &cancel);
    cancel.cancel();
    let second = workflow.run_part(&tasks[1], &NullProgress, &cancel);

    assert!(first.is_success());
    assert!(second.cancelled);
    assert!(matches!(
        workflow.finish_region(&[first, second], &cancel),
        Err(geest_workflow::WorkflowError::Cancelled)
    ));
}

const FLOOD_PLAIN: &str = r#"{
    "type": "FeatureCollection",
    "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::32620" } },
    "features": [{
        "type": "Feature",
        "properties": { "name": "Flood Plain" },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[0, 0], [1000, 0], [1000, 1000], [0, 1000], [0, 0]]]
        }
    }]
}"#;

#[test]
fn hazard_rasters_are_read_from_disk() {
    let inputs = tempfile::tempdir().unwrap();
    let outputs = tempfile::tempdir().unwrap();
    std::fs::write(inputs.path().join("areas.geojson"), FLOOD_PLAIN).unwrap();

    // Hazard class rises by one every two columns; the corner reads 0.
    let values = (0..100_u8).map(|i| f32::from((i % 10) / 2 + 1)).collect();
    let mut hazard =
        ScoreRaster::from_vec(GeoTransform::new(0.0, 1000.0, 100.0), 10, 10, values).unwrap();
    hazard.set(0, 0, Some(0.0));
    geest_raster::write_geotiff(&inputs.path().join("hazard.tif"), &hazard, Some(&utm())).unwrap();
    geest_raster::write_geotiff(
        &inputs.path().join("hazard_wgs84.tif"),
        &hazard,
        Some(&SpatialRef::wgs84()),
    )
    .unwrap();

    let text = format!(
        r#"
[analysis]
resolution = 100.0
crs = "EPSG:32620"
output_dir = "{}"

[study_area]
path = "areas.geojson"
id_field = "name"

[[dimensions]]
id = "hazards"
weight = 1.0

[[dimensions.factors]]
id = "flood"
weight = 0.5
input_mode = "step"
layer = "hazard.tif"
table = "flood_hazard"

[[dimensions.factors]]
id = "flood_global"
weight = 0.5
input_mode = "step"
layer = "hazard_wgs84.tif"
table = "flood_hazard"
"#,
        outputs.path().display()
    );
    let config = AnalysisConfig::from_toml_str(&text).unwrap();
    let provider = FileLayerProvider::new(inputs.path());
    let workflow = Workflow::new(config, TableSet::embedded(), Arc::new(provider)).unwrap();

    let tasks = workflow.study_parts().unwrap();
    assert_eq!(tasks[0].id.to_string(), "flood_plain_0");
    let parts = run_all(&workflow, &tasks);
    let report = &parts[0];

    assert_eq!(report.node("flood").unwrap().status, NodeStatus::Completed);
    let flood = raster(&workflow, "flood", &tasks[0]);
    assert!(close(flood.get(0, 0), 5.0));
    assert!(close(flood.get(5, 0), 4.0));
    assert!(close(flood.get(5, 4), 2.0));
    assert!(close(flood.get(5, 9), 0.0));

    // A raster in another CRS is not warped onto the grid.
    let global = report.node("flood_global").unwrap();
    assert_eq!(global.status, NodeStatus::Failed);
    assert!(
        global.message.as_deref().is_some_and(|m| m.contains("hazard_wgs84.tif")),
        "{global:?}"
    );
    assert_eq!(report.node("hazards").unwrap().status, NodeStatus::Failed);

    let region = workflow.finish_region(&parts, &CancellationToken::new()).unwrap();
    assert!(region.failures.is_empty(), "{:?}", region.failures);
    assert!(region.mosaics.iter().any(|m| m.node == "flood" && m.path.exists()));
}

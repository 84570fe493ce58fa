//! Layer access behind the [`LayerProvider`] trait.
//!
//! The workflow never opens files itself: it asks a provider to resolve a
//! layer reference (a path, or an opaque handle for embedding hosts) into a
//! [`Layer`]. [`FileLayerProvider`] reads `GeoJSON` and `GeoTIFF` from disk;
//! [`MemoryLayerProvider`] serves layers built in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use geest_grid::{Reprojector, SpatialRef};
use geest_raster::{ScoreRaster, read_geotiff_with_crs};
use geest_scoring::Feature;
use geo::{Geometry, MultiPolygon};
use geojson::GeoJson;

use crate::WorkflowError;

/// Features plus the CRS their coordinates are in.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayer {
    pub name: String,
    pub crs: SpatialRef,
    pub features: Vec<Feature>,
}

impl VectorLayer {
    #[must_use]
    pub fn new(name: impl Into<String>, crs: SpatialRef, features: Vec<Feature>) -> Self {
        Self {
            name: name.into(),
            crs,
            features,
        }
    }

    /// Moves every geometry into `target`. A no-op when the CRSs match.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::CrsMismatch`] if the transform cannot be
    /// built or any coordinate fails to transform.
    pub fn reproject(mut self, target: &SpatialRef) -> Result<Self, WorkflowError> {
        if self.crs.same_as(target) {
            return Ok(self);
        }
        let mismatch = |e: geest_grid::GridError| WorkflowError::CrsMismatch {
            layer: self.name.clone(),
            message: e.to_string(),
        };
        let reprojector = Reprojector::new(&self.crs, target).map_err(mismatch)?;

        for feature in &mut self.features {
            if let Some(geometry) = &feature.geometry {
                feature.geometry = Some(reprojector.reproject(geometry).map_err(mismatch)?);
            }
        }

        log::info!(
            "Reprojected {} features of '{}' from {} to {target}",
            self.features.len(),
            self.name,
            self.crs
        );
        self.crs = target.clone();
        Ok(self)
    }

    /// Returns `true` when the first usable geometry is areal.
    #[must_use]
    pub fn is_polygonal(&self) -> bool {
        self.features
            .iter()
            .find_map(Feature::valid_geometry)
            .is_some_and(|(g, _)| {
                matches!(
                    g,
                    Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_)
                )
            })
    }

    /// Every polygon of the layer, flattened.
    #[must_use]
    pub fn polygons(&self) -> MultiPolygon<f64> {
        MultiPolygon(
            self.features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .flat_map(|g| match g {
                    Geometry::Polygon(p) => vec![p.clone()],
                    Geometry::MultiPolygon(mp) => mp.0.clone(),
                    Geometry::Rect(r) => vec![r.to_polygon()],
                    _ => Vec::new(),
                })
                .collect(),
        )
    }
}

/// A single-band raster. `crs` is `None` when the source does not say, in
/// which case the grid CRS is assumed.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLayer {
    pub name: String,
    pub crs: Option<SpatialRef>,
    pub raster: ScoreRaster,
}

impl RasterLayer {
    /// Checks the raster is already in `target`. Rasters are sampled, never
    /// warped.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::CrsMismatch`] for a raster in another CRS.
    pub fn ensure_crs(self, target: &SpatialRef) -> Result<Self, WorkflowError> {
        match &self.crs {
            Some(crs) if !crs.same_as(target) => Err(WorkflowError::CrsMismatch {
                layer: self.name.clone(),
                message: format!("raster is in {crs}, expected {target}"),
            }),
            _ => Ok(self),
        }
    }
}

/// A resolved layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Vector(VectorLayer),
    Raster(RasterLayer),
}

/// Resolves layer references into layers.
///
/// Implementations must be `Send + Sync`: one provider serves every worker.
pub trait LayerProvider: Send + Sync {
    /// Loads the layer behind `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingInput`] when nothing is behind the
    /// reference, or the error that prevented reading it.
    fn load(&self, reference: &str) -> Result<Layer, WorkflowError>;
}

/// Reads layers from disk, resolving relative references against a root.
///
/// `.geojson` and `.json` are read as vector layers, `.tif` and `.tiff` as
/// rasters.
#[derive(Debug, Clone)]
pub struct FileLayerProvider {
    root: PathBuf,
}

impl FileLayerProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl LayerProvider for FileLayerProvider {
    fn load(&self, reference: &str) -> Result<Layer, WorkflowError> {
        let path = self.resolve(reference);
        if !path.is_file() {
            return Err(WorkflowError::MissingInput {
                node: reference.to_string(),
                what: format!("layer file {} does not exist", path.display()),
            });
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("tif" | "tiff") => {
                let (raster, crs) = read_geotiff_with_crs(&path)?;
                if crs.is_none() {
                    log::debug!("{reference}: no EPSG code, assuming the grid CRS");
                }
                Ok(Layer::Raster(RasterLayer {
                    name: reference.to_string(),
                    crs,
                    raster,
                }))
            }
            Some("geojson" | "json") => Ok(Layer::Vector(read_geojson(reference, &path)?)),
            _ => Err(WorkflowError::MissingInput {
                node: reference.to_string(),
                what: format!("no reader for {}", path.display()),
            }),
        }
    }
}

/// Serves layers registered in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayerProvider {
    layers: BTreeMap<String, Layer>,
}

impl MemoryLayerProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, layer: Layer) {
        self.layers.insert(reference.into(), layer);
    }

    /// Builder-style [`insert`](Self::insert) for a vector layer.
    #[must_use]
    pub fn with_vector(mut self, reference: &str, crs: SpatialRef, features: Vec<Feature>) -> Self {
        self.insert(reference, Layer::Vector(VectorLayer::new(reference, crs, features)));
        self
    }

    /// Builder-style [`insert`](Self::insert) for a raster layer.
    #[must_use]
    pub fn with_raster(mut self, reference: &str, raster: ScoreRaster) -> Self {
        self.insert(
            reference,
            Layer::Raster(RasterLayer {
                name: reference.to_string(),
                crs: None,
                raster,
            }),
        );
        self
    }
}

impl LayerProvider for MemoryLayerProvider {
    fn load(&self, reference: &str) -> Result<Layer, WorkflowError> {
        self.layers
            .get(reference)
            .cloned()
            .ok_or_else(|| WorkflowError::MissingInput {
                node: reference.to_string(),
                what: "no such layer".to_string(),
            })
    }
}

/// Loads each layer once per run, already brought onto the grid CRS, and
/// shares it between parts.
pub struct LayerCache {
    provider: Arc<dyn LayerProvider>,
    crs: SpatialRef,
    layers: Mutex<BTreeMap<String, Arc<Layer>>>,
}

impl LayerCache {
    #[must_use]
    pub fn new(provider: Arc<dyn LayerProvider>, crs: SpatialRef) -> Self {
        Self {
            provider,
            crs,
            layers: Mutex::new(BTreeMap::new()),
        }
    }

    /// The layer behind `reference`, loaded on first use. Failures are not
    /// cached, so every node needing a broken layer reports it.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or [`WorkflowError::CrsMismatch`] if
    /// the layer cannot be brought onto the grid CRS.
    pub fn layer(&self, reference: &str) -> Result<Arc<Layer>, WorkflowError> {
        if let Some(layer) = self.lock().get(reference) {
            return Ok(Arc::clone(layer));
        }

        let layer = match self.provider.load(reference)? {
            Layer::Vector(vector) => Layer::Vector(vector.reproject(&self.crs)?),
            Layer::Raster(raster) => Layer::Raster(raster.ensure_crs(&self.crs)?),
        };
        let layer = Arc::new(layer);
        self.lock()
            .entry(reference.to_string())
            .or_insert_with(|| Arc::clone(&layer));
        Ok(layer)
    }

    /// Like [`layer`](Self::layer), requiring a vector layer.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingInput`] for raster layers.
    pub fn vector(&self, reference: &str) -> Result<Arc<Layer>, WorkflowError> {
        let layer = self.layer(reference)?;
        match layer.as_ref() {
            Layer::Vector(_) => Ok(layer),
            Layer::Raster(_) => Err(WorkflowError::MissingInput {
                node: reference.to_string(),
                what: "expected a vector layer, found a raster".to_string(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<Layer>>> {
        self.layers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LayerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerCache")
            .field("crs", &self.crs)
            .field("cached", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl Layer {
    /// The vector layer, if this is one.
    #[must_use]
    pub const fn as_vector(&self) -> Option<&VectorLayer> {
        match self {
            Self::Vector(v) => Some(v),
            Self::Raster(_) => None,
        }
    }
}

/// Reads a `GeoJSON` file into a vector layer.
///
/// # Errors
///
/// Returns [`WorkflowError::Io`] if the file cannot be read,
/// [`WorkflowError::GeoJson`] if it does not parse and
/// [`WorkflowError::CrsMismatch`] for an unsupported `crs` member.
pub fn read_geojson(name: &str, path: &Path) -> Result<VectorLayer, WorkflowError> {
    let text = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_geojson(name, &text).map_err(|e| match e {
        WorkflowError::GeoJson { message, .. } => WorkflowError::GeoJson {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

/// Parses `GeoJSON` text. Features whose geometry cannot be converted keep
/// a null geometry, so scorers count them as invalid instead of the whole
/// layer failing.
///
/// # Errors
///
/// Returns [`WorkflowError::GeoJson`] for malformed documents and
/// [`WorkflowError::CrsMismatch`] for an unsupported `crs` member.
pub fn parse_geojson(name: &str, text: &str) -> Result<VectorLayer, WorkflowError> {
    let document: GeoJson = text.parse().map_err(|e: geojson::Error| WorkflowError::GeoJson {
        path: PathBuf::from(name),
        message: e.to_string(),
    })?;

    let (raw, foreign) = match document {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(f) => (vec![f], None),
        GeoJson::Geometry(g) => (vec![geojson::Feature::from(g)], None),
    };

    let crs = match foreign.as_ref().and_then(|m| m.get("crs")) {
        Some(member) => crs_from_member(member).ok_or_else(|| WorkflowError::CrsMismatch {
            layer: name.to_string(),
            message: format!("unsupported crs member {member}"),
        })?,
        None => SpatialRef::wgs84(),
    };

    let mut unconverted = 0_usize;
    let features = raw
        .into_iter()
        .map(|f| {
            let geometry = f.geometry.and_then(|g| {
                Geometry::<f64>::try_from(g)
                    .inspect_err(|_| unconverted += 1)
                    .ok()
            });
            Feature {
                geometry,
                attributes: f
                    .properties
                    .map(|p| p.into_iter().collect())
                    .unwrap_or_default(),
            }
        })
        .collect::<Vec<_>>();

    if unconverted > 0 {
        log::warn!("{name}: {unconverted} geometries could not be converted");
    }
    log::debug!("{name}: read {} features in {crs}", features.len());

    Ok(VectorLayer::new(name, crs, features))
}

/// Understands the legacy named-CRS member (`EPSG:32620`,
/// `urn:ogc:def:crs:EPSG::32620`, `urn:ogc:def:crs:OGC:1.3:CRS84`).
fn crs_from_member(member: &serde_json::Value) -> Option<SpatialRef> {
    let name = member.get("properties")?.get("name")?.as_str()?;
    if name.ends_with("CRS84") {
        return Some(SpatialRef::wgs84());
    }
    let code = name.rsplit(':').find(|part| !part.is_empty())?;
    SpatialRef::parse(&format!("EPSG:{code}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROADS: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::32620" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "highway": "residential" },
                "geometry": { "type": "LineString", "coordinates": [[0, 0], [100, 100]] }
            },
            { "type": "Feature", "properties": { "highway": "primary" }, "geometry": null }
        ]
    }"#;

    #[test]
    fn parses_features_attributes_and_named_crs() {
        let layer = parse_geojson("roads", ROADS).unwrap();
        assert_eq!(layer.crs.epsg(), Some(32620));
        assert_eq!(layer.features.len(), 2);
        assert_eq!(layer.features[0].text("highway").as_deref(), Some("residential"));
        assert!(layer.features[1].geometry.is_none());
        assert!(!layer.is_polygonal());
    }

    #[test]
    fn defaults_to_wgs84() {
        let text = r#"{"type": "Point", "coordinates": [-61.0, 14.0]}"#;
        let layer = parse_geojson("pt", text).unwrap();
        assert!(layer.crs.is_geographic());
        assert_eq!(layer.features.len(), 1);
    }

    #[test]
    fn malformed_documents_are_reported() {
        assert!(matches!(
            parse_geojson("bad", "{ not json"),
            Err(WorkflowError::GeoJson { .. })
        ));
    }

    #[test]
    fn reprojection_moves_geometries() {
        let text = r#"{"type": "Point", "coordinates": [-63.0, 14.0]}"#;
        let utm = SpatialRef::parse("EPSG:32620").unwrap();
        let layer = parse_geojson("pt", text).unwrap().reproject(&utm).unwrap();
        let Some(Geometry::Point(p)) = &layer.features[0].geometry else {
            panic!("expected a point");
        };
        // 63W is the central meridian of zone 20.
        assert!((p.x() - 500_000.0).abs() < 1.0);
        assert!(p.y() > 1_500_000.0 && p.y() < 1_600_000.0);
        assert!(layer.crs.same_as(&utm));
    }

    #[test]
    fn file_provider_reports_missing_layers() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileLayerProvider::new(dir.path());
        assert!(matches!(
            provider.load("nothing.geojson"),
            Err(WorkflowError::MissingInput { .. })
        ));

        std::fs::write(dir.path().join("roads.geojson"), ROADS).unwrap();
        assert!(matches!(provider.load("roads.geojson"), Ok(Layer::Vector(_))));
    }

    #[test]
    fn file_rasters_keep_their_crs_and_foreign_ones_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let utm = SpatialRef::parse("EPSG:32620").unwrap();
        let raster = ScoreRaster::empty(geest_grid::GeoTransform::new(0.0, 200.0, 100.0), 2, 2);
        geest_raster::write_geotiff(&dir.path().join("local.tif"), &raster, Some(&utm)).unwrap();
        geest_raster::write_geotiff(&dir.path().join("global.tif"), &raster, Some(&SpatialRef::wgs84()))
            .unwrap();

        let provider = FileLayerProvider::new(dir.path());
        let Ok(Layer::Raster(local)) = provider.load("local.tif") else {
            panic!("expected a raster layer");
        };
        assert_eq!(local.crs.as_ref().and_then(SpatialRef::epsg), Some(32620));

        let cache = LayerCache::new(Arc::new(provider), utm);
        assert!(cache.layer("local.tif").is_ok());
        match cache.layer("global.tif") {
            Err(WorkflowError::CrsMismatch { layer, .. }) => assert_eq!(layer, "global.tif"),
            other => panic!("expected a CRS mismatch, got {other:?}"),
        }
    }

    #[test]
    fn memory_provider_serves_registered_layers() {
        let provider = MemoryLayerProvider::new().with_vector("a", SpatialRef::wgs84(), Vec::new());
        assert!(provider.load("a").is_ok());
        assert!(provider.load("b").is_err());
    }
}

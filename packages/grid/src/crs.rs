//! Spatial reference handling and vector reprojection.
//!
//! CRSs are carried as PROJ.4 strings. A handful of EPSG codes common to
//! national analyses (WGS84, Web Mercator, WGS84 UTM zones) are expanded
//! from `EPSG:<code>`; anything else must be given as a PROJ.4 string.

use geo::{Coord, Geometry, MapCoords};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::GridError;

/// A coordinate reference system definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialRef {
    definition: String,
    proj4: String,
}

impl SpatialRef {
    /// Parses `EPSG:<code>` or a PROJ.4 string.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnsupportedCrs`] for unknown EPSG codes or
    /// strings that are neither form.
    pub fn parse(definition: &str) -> Result<Self, GridError> {
        let trimmed = definition.trim();
        let proj4 = if let Some(code) = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
        {
            let code: u32 = code.parse().map_err(|_| unsupported(trimmed))?;
            epsg_to_proj4(code).ok_or_else(|| unsupported(trimmed))?
        } else if trimmed.starts_with("+proj=") {
            normalize_proj4(trimmed)
        } else {
            return Err(unsupported(trimmed));
        };

        Ok(Self {
            definition: trimmed.to_string(),
            proj4,
        })
    }

    /// WGS84 geographic coordinates, the CRS `GeoJSON` layers default to.
    #[must_use]
    pub fn wgs84() -> Self {
        Self {
            definition: "EPSG:4326".to_string(),
            proj4: normalize_proj4("+proj=longlat +datum=WGS84 +no_defs"),
        }
    }

    /// The definition as originally given.
    #[must_use]
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// The expanded PROJ.4 string.
    #[must_use]
    pub fn proj4(&self) -> &str {
        &self.proj4
    }

    /// EPSG code, when the definition was given as `EPSG:<code>`.
    #[must_use]
    pub fn epsg(&self) -> Option<u32> {
        self.definition
            .strip_prefix("EPSG:")
            .or_else(|| self.definition.strip_prefix("epsg:"))
            .and_then(|code| code.parse().ok())
    }

    /// Returns `true` for longitude/latitude systems.
    #[must_use]
    pub fn is_geographic(&self) -> bool {
        self.proj4.contains("+proj=longlat")
    }

    /// Returns `true` when both describe the same system.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.proj4 == other.proj4
    }
}

impl std::fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.definition)
    }
}

fn unsupported(definition: &str) -> GridError {
    GridError::UnsupportedCrs {
        crs: definition.to_string(),
    }
}

/// Sorts PROJ.4 tokens and drops `+type=crs` so equivalent strings compare
/// equal.
fn normalize_proj4(proj4: &str) -> String {
    let mut tokens: Vec<&str> = proj4
        .split_whitespace()
        .filter(|t| *t != "+type=crs")
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens.join(" ")
}

fn epsg_to_proj4(code: u32) -> Option<String> {
    let proj4 = match code {
        4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 \
                 +units=m +no_defs"
            .to_string(),
        32601..=32660 => format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            code - 32600
        ),
        32701..=32760 => format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            code - 32700
        ),
        _ => return None,
    };
    Some(normalize_proj4(&proj4))
}

/// Transforms geometries between two spatial references.
pub struct Reprojector {
    from: SpatialRef,
    to: SpatialRef,
    source: Option<Proj>,
    target: Option<Proj>,
}

impl Reprojector {
    /// Prepares a transform. Identical CRSs produce an identity transform.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Reprojection`] if either PROJ.4 string cannot be
    /// instantiated.
    pub fn new(from: &SpatialRef, to: &SpatialRef) -> Result<Self, GridError> {
        if from.same_as(to) {
            return Ok(Self {
                from: from.clone(),
                to: to.clone(),
                source: None,
                target: None,
            });
        }

        let build = |crs: &SpatialRef| {
            Proj::from_proj_string(crs.proj4()).map_err(|e| GridError::Reprojection {
                from: from.to_string(),
                to: to.to_string(),
                message: format!("invalid PROJ.4 '{}': {e}", crs.proj4()),
            })
        };

        Ok(Self {
            source: Some(build(from)?),
            target: Some(build(to)?),
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Returns `true` when no coordinates change.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.source.is_none()
    }

    /// Reprojects a geometry.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Reprojection`] if any coordinate fails to
    /// transform or lands on a non-finite value.
    pub fn reproject(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>, GridError> {
        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Ok(geometry.clone());
        };

        let from_geographic = self.from.is_geographic();
        let to_geographic = self.to.is_geographic();

        geometry.try_map_coords(|coord: Coord<f64>| {
            let mut point = if from_geographic {
                (coord.x.to_radians(), coord.y.to_radians(), 0.0)
            } else {
                (coord.x, coord.y, 0.0)
            };
            transform(source, target, &mut point).map_err(|e| self.error(&e.to_string()))?;
            let (x, y) = if to_geographic {
                (point.0.to_degrees(), point.1.to_degrees())
            } else {
                (point.0, point.1)
            };
            if x.is_finite() && y.is_finite() {
                Ok(Coord { x, y })
            } else {
                Err(self.error("non-finite coordinate"))
            }
        })
    }

    fn error(&self, message: &str) -> GridError {
        GridError::Reprojection {
            from: self.from.to_string(),
            to: self.to.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;

    #[test]
    fn parses_known_epsg_codes() {
        assert!(SpatialRef::parse("EPSG:4326").unwrap().is_geographic());
        let utm = SpatialRef::parse("EPSG:32620").unwrap();
        assert!(utm.proj4().contains("+zone=20"));
        assert!(!utm.is_geographic());
        let south = SpatialRef::parse("EPSG:32737").unwrap();
        assert!(south.proj4().contains("+south"));
        assert_eq!(south.epsg(), Some(32737));
    }

    #[test]
    fn rejects_unknown_definitions() {
        assert!(SpatialRef::parse("EPSG:99999").is_err());
        assert!(SpatialRef::parse("not a crs").is_err());
    }

    #[test]
    fn equivalent_proj4_strings_compare_equal() {
        let a = SpatialRef::parse("+proj=longlat +datum=WGS84 +no_defs +type=crs").unwrap();
        assert!(a.same_as(&SpatialRef::wgs84()));
    }

    #[test]
    fn identity_reprojection_keeps_coordinates() {
        let wgs = SpatialRef::wgs84();
        let reprojector = Reprojector::new(&wgs, &wgs).unwrap();
        assert!(reprojector.is_identity());
        let geom = Geometry::Point(Point::new(-61.0, 14.0));
        assert_eq!(reprojector.reproject(&geom).unwrap(), geom);
    }

    #[test]
    fn reprojects_lonlat_to_utm_and_back() {
        let wgs = SpatialRef::wgs84();
        let utm = SpatialRef::parse("EPSG:32620").unwrap();
        let forward = Reprojector::new(&wgs, &utm).unwrap();
        let backward = Reprojector::new(&utm, &wgs).unwrap();

        let geom = Geometry::Point(Point::new(-63.0, 14.0));
        let projected = forward.reproject(&geom).unwrap();
        let Geometry::Point(p) = projected else {
            panic!("expected point");
        };
        // Central meridian of zone 20 is -63, so easting is the false easting.
        assert!((p.x() - 500_000.0).abs() < 1.0, "easting {}", p.x());

        let Geometry::Point(back) = backward.reproject(&Geometry::Point(p)).unwrap() else {
            panic!("expected point");
        };
        assert!((back.x() + 63.0).abs() < 1e-6);
        assert!((back.y() - 14.0).abs() < 1e-6);
    }
}

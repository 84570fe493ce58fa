//! Study areas split into independently processed polygon parts.

use geo::{Geometry, MultiPolygon, Polygon};
use geest_model_models::PartId;

use crate::{GridError, geometry_kind};

/// A named study area made of one or more polygon parts.
///
/// Immutable once built; each part gets its own grid and is scored
/// independently of every other part.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyArea {
    id: String,
    parts: Vec<Polygon<f64>>,
}

impl StudyArea {
    #[must_use]
    pub fn new(id: impl Into<String>, parts: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            parts: parts.0,
        }
    }

    /// Builds a study area from a polygonal geometry. Multipolygons are
    /// split into one part per polygon.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnsupportedGeometry`] for non-polygonal
    /// geometries.
    pub fn from_geometry(id: impl Into<String>, geometry: Geometry<f64>) -> Result<Self, GridError> {
        let id = id.into();
        let parts = match geometry {
            Geometry::Polygon(polygon) => vec![polygon],
            Geometry::MultiPolygon(multi) => multi.0,
            Geometry::Rect(rect) => vec![rect.to_polygon()],
            other => {
                return Err(GridError::UnsupportedGeometry {
                    area: id,
                    kind: geometry_kind(&other),
                });
            }
        };
        Ok(Self { id, parts })
    }

    /// Area identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Polygon parts in input order.
    #[must_use]
    pub fn parts(&self) -> &[Polygon<f64>] {
        &self.parts
    }

    /// Parts paired with their identifiers.
    pub fn identified_parts(&self) -> impl Iterator<Item = (PartId, &Polygon<f64>)> {
        self.parts
            .iter()
            .enumerate()
            .map(|(i, p)| (PartId::new(self.id.clone(), i), p))
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Point, polygon};

    use super::*;

    #[test]
    fn multipolygon_splits_into_parts() {
        let a = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let b = polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0)];
        let area = StudyArea::from_geometry(
            "island",
            Geometry::MultiPolygon(MultiPolygon(vec![a, b])),
        )
        .unwrap();
        let ids: Vec<String> = area.identified_parts().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["island_0", "island_1"]);
    }

    #[test]
    fn rejects_non_polygonal_geometry() {
        let err = StudyArea::from_geometry("x", Geometry::Point(Point::new(0.0, 0.0))).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedGeometry { kind: "Point", .. }));
        let err = StudyArea::from_geometry(
            "x",
            Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])),
        )
        .unwrap_err();
        assert!(matches!(err, GridError::UnsupportedGeometry { .. }));
    }
}

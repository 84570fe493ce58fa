//! Read-only input features.

use std::collections::BTreeMap;

use geo::{BoundingRect, CoordsIter, Geometry, Rect};
use serde_json::Value;

/// A source geometry with its raw attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Geometry in the grid CRS; `None` for null geometries.
    pub geometry: Option<Geometry<f64>>,
    /// Raw attribute values by field name.
    pub attributes: BTreeMap<String, Value>,
}

impl Feature {
    #[must_use]
    pub const fn new(geometry: Option<Geometry<f64>>) -> Self {
        Self {
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    /// Attribute as text. Numbers and booleans are rendered; null and
    /// missing fields yield `None`.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<String> {
        match self.attributes.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Attribute as a number. Numeric strings are parsed.
    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        let value = match self.attributes.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    /// Geometry and its bounding box, or `None` when the geometry is null,
    /// empty or has non-finite coordinates.
    #[must_use]
    pub fn valid_geometry(&self) -> Option<(&Geometry<f64>, Rect<f64>)> {
        let geometry = self.geometry.as_ref()?;
        if geometry.coords_count() == 0
            || geometry
                .coords_iter()
                .any(|c| !(c.x.is_finite() && c.y.is_finite()))
        {
            return None;
        }
        let rect = geometry.bounding_rect()?;
        Some((geometry, rect))
    }
}

//! Virtual mosaics over per-part rasters.
//!
//! A [`Mosaic`] is pure metadata: the union extent of its sources and the
//! pixel offset of each one on the shared lattice. It serializes to a GDAL
//! VRT and can be materialized in memory. Values are never resampled.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use geest_grid::{GeoTransform, SpatialRef};

use crate::raster::is_valid;
use crate::{NO_DATA, RasterError, ScoreRaster};

/// One raster taking part in a mosaic.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicSource {
    /// File the raster lives in.
    pub path: PathBuf,
    /// Its transform.
    pub transform: GeoTransform,
    /// Rows.
    pub rows: usize,
    /// Columns.
    pub cols: usize,
}

impl MosaicSource {
    #[must_use]
    pub fn from_raster(path: impl Into<PathBuf>, raster: &ScoreRaster) -> Self {
        let (rows, cols) = raster.shape();
        Self {
            path: path.into(),
            transform: *raster.transform(),
            rows,
            cols,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Placement {
    source: MosaicSource,
    row_offset: usize,
    col_offset: usize,
}

/// Union of per-part rasters sharing one resolution and lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct Mosaic {
    transform: GeoTransform,
    rows: usize,
    cols: usize,
    placements: Vec<Placement>,
}

impl Mosaic {
    /// Computes the union extent and each source's offset.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::EmptyMosaic`] without sources,
    /// [`RasterError::ResolutionMismatch`] if cell sizes differ and
    /// [`RasterError::Misaligned`] if a source is off the shared lattice.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn build(sources: Vec<MosaicSource>) -> Result<Self, RasterError> {
        let first = sources.first().ok_or(RasterError::EmptyMosaic)?.transform;
        let size = first.cell_size;

        for source in &sources {
            let found = source.transform.cell_size;
            if (found - size).abs() > 1e-9 * size {
                return Err(RasterError::ResolutionMismatch {
                    expected: size,
                    found,
                    path: source.path.clone(),
                });
            }
            if !source.transform.is_aligned_with(&first) {
                return Err(RasterError::Misaligned {
                    path: source.path.clone(),
                });
            }
        }

        let min_x = sources
            .iter()
            .map(|s| s.transform.origin_x)
            .fold(f64::INFINITY, f64::min);
        let max_y = sources
            .iter()
            .map(|s| s.transform.origin_y)
            .fold(f64::NEG_INFINITY, f64::max);
        let max_x = sources
            .iter()
            .map(|s| (s.cols as f64).mul_add(size, s.transform.origin_x))
            .fold(f64::NEG_INFINITY, f64::max);
        let min_y = sources
            .iter()
            .map(|s| (s.rows as f64).mul_add(-size, s.transform.origin_y))
            .fold(f64::INFINITY, f64::min);

        let transform = GeoTransform::new(min_x, max_y, size);
        let cols = ((max_x - min_x) / size).round() as usize;
        let rows = ((max_y - min_y) / size).round() as usize;

        let placements = sources
            .into_iter()
            .map(|source| Placement {
                col_offset: ((source.transform.origin_x - min_x) / size).round() as usize,
                row_offset: ((max_y - source.transform.origin_y) / size).round() as usize,
                source,
            })
            .collect();

        Ok(Self {
            transform,
            rows,
            cols,
            placements,
        })
    }

    #[must_use]
    pub const fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// `(rows, cols)` of the union extent.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Renders the GDAL VRT document. Source paths under `base` are written
    /// relative to it.
    #[must_use]
    pub fn to_vrt(&self, crs: Option<&SpatialRef>, base: Option<&Path>) -> String {
        let gt = self.transform.to_gdal();
        let mut xml = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(
            xml,
            r#"<VRTDataset rasterXSize="{}" rasterYSize="{}">"#,
            self.cols, self.rows
        );
        if let Some(crs) = crs {
            let _ = writeln!(xml, "  <SRS>{}</SRS>", escape(crs.definition()));
        }
        let _ = writeln!(
            xml,
            "  <GeoTransform>{}, {}, {}, {}, {}, {}</GeoTransform>",
            gt[0], gt[1], gt[2], gt[3], gt[4], gt[5]
        );
        let _ = writeln!(xml, r#"  <VRTRasterBand dataType="Float32" band="1">"#);
        let _ = writeln!(xml, "    <NoDataValue>{NO_DATA}</NoDataValue>");

        for p in &self.placements {
            let (relative, path) = match base.and_then(|b| p.source.path.strip_prefix(b).ok()) {
                Some(rel) => (1, rel.to_path_buf()),
                None => (0, p.source.path.clone()),
            };
            let (rows, cols) = (p.source.rows, p.source.cols);
            let _ = writeln!(xml, "    <ComplexSource>");
            let _ = writeln!(
                xml,
                r#"      <SourceFilename relativeToVRT="{relative}">{}</SourceFilename>"#,
                escape(&path.to_string_lossy())
            );
            let _ = writeln!(xml, "      <SourceBand>1</SourceBand>");
            let _ = writeln!(
                xml,
                r#"      <SourceProperties RasterXSize="{cols}" RasterYSize="{rows}" DataType="Float32" BlockXSize="{cols}" BlockYSize="1"/>"#
            );
            let _ = writeln!(
                xml,
                r#"      <SrcRect xOff="0" yOff="0" xSize="{cols}" ySize="{rows}"/>"#
            );
            let _ = writeln!(
                xml,
                r#"      <DstRect xOff="{}" yOff="{}" xSize="{cols}" ySize="{rows}"/>"#,
                p.col_offset, p.row_offset
            );
            let _ = writeln!(xml, "      <NODATA>{NO_DATA}</NODATA>");
            let _ = writeln!(xml, "    </ComplexSource>");
        }

        let _ = writeln!(xml, "  </VRTRasterBand>");
        let _ = writeln!(xml, "</VRTDataset>");
        xml
    }

    /// Writes the VRT next to its sources.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Io`] if the file cannot be written.
    pub fn write_vrt(&self, path: &Path, crs: Option<&SpatialRef>) -> Result<(), RasterError> {
        let xml = self.to_vrt(crs, path.parent());
        std::fs::write(path, xml).map_err(|source| RasterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!(
            "Wrote mosaic {} ({} sources, {}x{})",
            path.display(),
            self.len(),
            self.rows,
            self.cols
        );
        Ok(())
    }

    /// Stitches `rasters` (one per source, in source order) into a single
    /// in-memory raster. Later sources paint over earlier ones; no-data
    /// never overwrites a value.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::ShapeMismatch`] if the rasters do not match
    /// the sources they stand for.
    pub fn materialize(&self, rasters: &[ScoreRaster]) -> Result<ScoreRaster, RasterError> {
        if rasters.len() != self.placements.len() {
            return Err(RasterError::ShapeMismatch {
                expected: (self.placements.len(), 1),
                found: (rasters.len(), 1),
            });
        }

        let mut out = ScoreRaster::empty(self.transform, self.rows, self.cols);
        for (p, raster) in self.placements.iter().zip(rasters) {
            let expected = (p.source.rows, p.source.cols);
            if raster.shape() != expected {
                return Err(RasterError::ShapeMismatch {
                    expected,
                    found: raster.shape(),
                });
            }
            for ((row, col), value) in raster.data().indexed_iter() {
                if is_valid(*value) {
                    out.set(
                        row + p.row_offset,
                        col + p.col_offset,
                        Some(f64::from(*value)),
                    );
                }
            }
        }
        Ok(out)
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

//! Float32 `GeoTIFF` reading and writing with the `tiff` crate.
//!
//! Only what the engine needs is carried: north-up pixel scale and tie
//! point, a minimal geokey directory (EPSG code when known) and the
//! `GDAL_NODATA` tag so GIS tools pick up the `-9999` sentinel.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use geest_grid::{GeoTransform, SpatialRef};
use tiff::TiffError;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::Gray32Float;
use tiff::tags::Tag;

use crate::{NO_DATA, RasterError, ScoreRaster};

const MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;
const GDAL_NODATA: Tag = Tag::GdalNodata;

/// Geokeys holding the EPSG code of the raster's CRS.
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
/// Geokey value for a user-defined (non-EPSG) system.
const USER_DEFINED: u16 = 32767;

/// Delay before the single write retry.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Writes `raster` to `path` as a float32 `GeoTIFF`.
///
/// The image is written to a `.tmp` sibling and renamed into place, so a
/// failed run never leaves a truncated output behind. A failed attempt is
/// retried once after a short delay.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if both attempts fail, or
/// [`RasterError::Format`] if the raster cannot be encoded.
pub fn write_geotiff(
    path: &Path,
    raster: &ScoreRaster,
    crs: Option<&SpatialRef>,
) -> Result<(), RasterError> {
    match write_once(path, raster, crs) {
        Err(RasterError::Io { source, .. }) => {
            log::warn!(
                "Write to {} failed ({source}), retrying in {}ms",
                path.display(),
                RETRY_DELAY.as_millis()
            );
            std::thread::sleep(RETRY_DELAY);
            write_once(path, raster, crs)
        }
        other => other,
    }
}

fn write_once(
    path: &Path,
    raster: &ScoreRaster,
    crs: Option<&SpatialRef>,
) -> Result<(), RasterError> {
    let io_err = |source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(io_err)?;
    encode(BufWriter::new(file), raster, crs).map_err(|e| tiff_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(io_err)?;

    log::debug!("Wrote {}", path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn encode<W: std::io::Write + std::io::Seek>(
    writer: W,
    raster: &ScoreRaster,
    crs: Option<&SpatialRef>,
) -> Result<(), TiffError> {
    let (rows, cols) = raster.shape();
    let width = u32::try_from(cols).map_err(|_| TiffError::LimitsExceeded)?;
    let height = u32::try_from(rows).map_err(|_| TiffError::LimitsExceeded)?;
    let t = raster.transform();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(width, height)?;

    let scale = [t.cell_size, t.cell_size, 0.0];
    image.encoder().write_tag(MODEL_PIXEL_SCALE, &scale[..])?;

    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    image.encoder().write_tag(MODEL_TIEPOINT, &tiepoint[..])?;

    image
        .encoder()
        .write_tag(GEO_KEY_DIRECTORY, &geokeys(crs)[..])?;
    image
        .encoder()
        .write_tag(GDAL_NODATA, format!("{NO_DATA}").as_str())?;

    let data: Vec<f32> = raster.data().iter().copied().collect();
    image.write_data(&data)?;
    Ok(())
}

/// Geokey directory: model type, pixel-is-area and the EPSG code when the
/// CRS was given as one.
fn geokeys(crs: Option<&SpatialRef>) -> Vec<u16> {
    let code = crs.and_then(SpatialRef::epsg).and_then(|c| u16::try_from(c).ok());
    let geographic = crs.is_some_and(SpatialRef::is_geographic);

    let model_type = match (code, geographic) {
        (None, _) => USER_DEFINED,
        (Some(_), true) => 2,
        (Some(_), false) => 1,
    };

    let mut keys = vec![1024, 0, 1, model_type, 1025, 0, 1, 1];
    if let Some(code) = code {
        let key = if geographic {
            GEOGRAPHIC_TYPE_KEY
        } else {
            PROJECTED_CS_TYPE_KEY
        };
        keys.extend([key, 0, 1, code]);
    }
    #[allow(clippy::cast_possible_truncation)]
    let count = (keys.len() / 4) as u16;
    let mut directory = vec![1, 1, 0, count];
    directory.extend(keys);
    directory
}

/// Reads a single-band `GeoTIFF` into a [`ScoreRaster`].
///
/// Integer and double rasters are converted to `f32`; the file's
/// `GDAL_NODATA` value (if any) is mapped to the `-9999` sentinel.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if the file cannot be opened or
/// [`RasterError::Format`] if it is not a north-up, square-pixel `GeoTIFF`.
pub fn read_geotiff(path: &Path) -> Result<ScoreRaster, RasterError> {
    read_geotiff_with_crs(path).map(|(raster, _)| raster)
}

/// Like [`read_geotiff`], also returning the CRS named by the file's
/// geokey directory. `None` when the file carries no EPSG code or one
/// that cannot be expanded.
///
/// # Errors
///
/// See [`read_geotiff`].
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn read_geotiff_with_crs(
    path: &Path,
) -> Result<(ScoreRaster, Option<SpatialRef>), RasterError> {
    let file = File::open(path).map_err(|source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut decoder = Decoder::new(file).map_err(|e| tiff_error(path, e))?;
    let (width, height) = decoder.dimensions().map_err(|e| tiff_error(path, e))?;

    let transform = read_transform(&mut decoder).map_err(|message| format_error(path, message))?;
    let crs = decoder
        .get_tag_u16_vec(GEO_KEY_DIRECTORY)
        .ok()
        .and_then(|directory| crs_from_geokeys(&directory));
    let nodata = decoder
        .get_tag_ascii_string(GDAL_NODATA)
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

    let values: Vec<f64> = match decoder.read_image().map_err(|e| tiff_error(path, e))? {
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        _ => return Err(format_error(path, "unsupported pixel type".to_string())),
    };

    let values = values
        .into_iter()
        .map(|v| match nodata {
            Some(nd) if (v - nd).abs() < 1e-9 => NO_DATA,
            _ => v as f32,
        })
        .collect();

    let raster = ScoreRaster::from_vec(transform, height as usize, width as usize, values)?;
    Ok((raster, crs))
}

/// Finds the projected (or else geographic) EPSG code in a geokey
/// directory: a 4-value header followed by `(key, location, count, value)`
/// entries, with `location = 0` for values stored inline.
fn crs_from_geokeys(directory: &[u16]) -> Option<SpatialRef> {
    let entries = directory.get(4..)?;
    let lookup = |wanted: u16| {
        entries
            .chunks_exact(4)
            .find(|entry| entry[0] == wanted && entry[1] == 0)
            .map(|entry| entry[3])
            .filter(|code| *code != 0 && *code != USER_DEFINED)
    };

    let code = lookup(PROJECTED_CS_TYPE_KEY).or_else(|| lookup(GEOGRAPHIC_TYPE_KEY))?;
    match SpatialRef::parse(&format!("EPSG:{code}")) {
        Ok(crs) => Some(crs),
        Err(e) => {
            log::warn!("Ignoring raster CRS EPSG:{code}: {e}");
            None
        }
    }
}

fn read_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform, String> {
    let scale = decoder
        .get_tag_f64_vec(MODEL_PIXEL_SCALE)
        .map_err(|_| "missing pixel scale tag".to_string())?;
    let tiepoint = decoder
        .get_tag_f64_vec(MODEL_TIEPOINT)
        .map_err(|_| "missing tie point tag".to_string())?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err("truncated georeferencing tags".to_string());
    }
    if (scale[0] - scale[1]).abs() > 1e-9 * scale[0].abs().max(1.0) {
        return Err(format!(
            "non-square pixels ({} x {})",
            scale[0], scale[1]
        ));
    }

    let origin_x = tiepoint[0].mul_add(-scale[0], tiepoint[3]);
    let origin_y = tiepoint[1].mul_add(scale[1], tiepoint[4]);
    Ok(GeoTransform::new(origin_x, origin_y, scale[0]))
}

fn tiff_error(path: &Path, error: TiffError) -> RasterError {
    match error {
        TiffError::IoError(source) => RasterError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => format_error(path, other.to_string()),
    }
}

fn format_error(path: &Path, message: String) -> RasterError {
    RasterError::Format {
        path: path.to_path_buf(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raster() -> ScoreRaster {
        let mut raster = ScoreRaster::empty(GeoTransform::new(500_000.0, 1_600_000.0, 250.0), 3, 4);
        raster.set(0, 0, Some(0.0));
        raster.set(1, 2, Some(4.19));
        raster.set(2, 3, Some(5.0));
        raster
    }

    #[test]
    fn write_then_read_preserves_values_and_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factor").join("roads_area_0.tif");
        let crs = SpatialRef::parse("EPSG:32620").unwrap();
        let raster = sample_raster();

        write_geotiff(&path, &raster, Some(&crs)).unwrap();
        let back = read_geotiff(&path).unwrap();

        assert_eq!(back.shape(), (3, 4));
        assert_eq!(back.transform(), raster.transform());
        assert_eq!(back.to_le_bytes(), raster.to_le_bytes());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn rewriting_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let raster = sample_raster();

        write_geotiff(&path, &raster, None).unwrap();
        let first = std::fs::read(&path).unwrap();
        write_geotiff(&path, &raster, None).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unwritable_target_surfaces_io_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory occupies the temp path, so both attempts fail.
        let path = dir.path().join("locked.tif");
        std::fs::create_dir(temp_path(&path)).unwrap();

        let err = write_geotiff(&path, &sample_raster(), None).unwrap_err();
        assert!(err.to_string().contains("remove them"), "{err}");
        match err {
            RasterError::Io { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected Io error, got {other}"),
        }
    }

    #[test]
    fn geokeys_carry_epsg_code() {
        let utm = SpatialRef::parse("EPSG:32620").unwrap();
        assert_eq!(geokeys(Some(&utm)), vec![1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 32620]);
        let wgs = SpatialRef::wgs84();
        assert_eq!(geokeys(Some(&wgs))[4..8], [1024, 0, 1, 2]);
        assert_eq!(geokeys(None), vec![1, 1, 0, 2, 1024, 0, 1, 32767, 1025, 0, 1, 1]);
    }

    #[test]
    fn crs_is_read_back_from_geokeys() {
        let dir = tempfile::tempdir().unwrap();
        let utm_path = dir.path().join("utm.tif");
        let wgs_path = dir.path().join("wgs.tif");
        let bare_path = dir.path().join("bare.tif");
        let utm = SpatialRef::parse("EPSG:32620").unwrap();

        write_geotiff(&utm_path, &sample_raster(), Some(&utm)).unwrap();
        write_geotiff(&wgs_path, &sample_raster(), Some(&SpatialRef::wgs84())).unwrap();
        write_geotiff(&bare_path, &sample_raster(), None).unwrap();

        let (_, crs) = read_geotiff_with_crs(&utm_path).unwrap();
        assert_eq!(crs.and_then(|c| c.epsg()), Some(32620));
        let (_, crs) = read_geotiff_with_crs(&wgs_path).unwrap();
        assert!(crs.is_some_and(|c| c.is_geographic()));
        let (_, crs) = read_geotiff_with_crs(&bare_path).unwrap();
        assert!(crs.is_none());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_geotiff(Path::new("/nonexistent/input.tif")).unwrap_err();
        assert!(matches!(err, RasterError::Io { .. }));
    }
}

//! Per-cell weighted sums over congruent member rasters.

use geest_model_models::clamp_score;
use geest_raster::ScoreRaster;

use crate::AggregateError;

/// Combines `members` (raster, effective weight) into one raster.
///
/// Members are summed in the order given. A cell is no-data when any member
/// is no-data there. The result is clamped to the 0-5 scale.
///
/// # Errors
///
/// Returns [`AggregateError::NoUsedMembers`] for an empty member list and
/// [`AggregateError::GridMismatch`] if the rasters are not congruent.
pub fn weighted_sum(group: &str, members: &[(&ScoreRaster, f64)]) -> Result<ScoreRaster, AggregateError> {
    let Some((first, _)) = members.first() else {
        return Err(AggregateError::NoUsedMembers {
            group: group.to_string(),
        });
    };
    if members.iter().any(|(raster, _)| !raster.is_congruent(first)) {
        return Err(AggregateError::GridMismatch {
            group: group.to_string(),
        });
    }

    let (rows, cols) = first.shape();
    let mut out = ScoreRaster::empty(*first.transform(), rows, cols);

    for row in 0..rows {
        for col in 0..cols {
            let mut sum = 0.0;
            let mut complete = true;
            for (raster, weight) in members {
                match raster.get(row, col) {
                    Some(value) => sum += value * weight,
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                out.set(row, col, Some(clamp_score(sum)));
            }
        }
    }

    log::debug!(
        "{group}: combined {} members, {} valid cells",
        members.len(),
        out.valid_count()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use geest_grid::GeoTransform;

    use super::*;

    fn raster(values: &[f32]) -> ScoreRaster {
        ScoreRaster::from_vec(GeoTransform::new(0.0, 200.0, 100.0), 2, 2, values.to_vec()).unwrap()
    }

    #[test]
    fn weighted_sum_per_cell() {
        let a = raster(&[5.0, 4.0, 0.0, 2.0]);
        let b = raster(&[1.0, 4.0, 5.0, 2.0]);
        let out = weighted_sum("dim", &[(&a, 0.625), (&b, 0.375)]).unwrap();

        assert!((out.get(0, 0).unwrap() - 3.5).abs() < 1e-6);
        assert!((out.get(0, 1).unwrap() - 4.0).abs() < 1e-6);
        assert!((out.get(1, 0).unwrap() - 1.875).abs() < 1e-6);
        assert!((out.get(1, 1).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn missing_member_value_yields_no_data() {
        let a = raster(&[5.0, geest_raster::NO_DATA, 3.0, 3.0]);
        let b = raster(&[5.0, 5.0, 3.0, f32::NAN]);
        let out = weighted_sum("dim", &[(&a, 0.5), (&b, 0.5)]).unwrap();

        assert_eq!(out.get(0, 1), None);
        assert_eq!(out.get(1, 1), None);
        assert_eq!(out.valid_count(), 2);
    }

    #[test]
    fn results_stay_on_scale() {
        let a = raster(&[5.0, 5.0, 5.0, 5.0]);
        // Weights that overshoot still cannot push a cell above 5.
        let out = weighted_sum("dim", &[(&a, 0.7), (&a, 0.7)]).unwrap();
        assert!(out.valid_cells().all(|(_, _, v)| (0.0..=5.0).contains(&v)));
    }

    #[test]
    fn rejects_misaligned_members() {
        let a = raster(&[1.0; 4]);
        let b = ScoreRaster::from_vec(GeoTransform::new(100.0, 200.0, 100.0), 2, 2, vec![1.0; 4])
            .unwrap();
        assert!(matches!(
            weighted_sum("dim", &[(&a, 0.5), (&b, 0.5)]),
            Err(AggregateError::GridMismatch { .. })
        ));
        assert!(matches!(
            weighted_sum("dim", &[]),
            Err(AggregateError::NoUsedMembers { .. })
        ));
    }
}

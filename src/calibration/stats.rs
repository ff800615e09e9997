//! Outlier-resistant averaging and the reference unit formula.

use crate::error::{AppResult, KioskError};

/// Fraction of samples dropped from each end by default.
pub const DEFAULT_TRIM_FRACTION: f64 = 0.1;

/// Mean after dropping the lowest and highest `floor(len * trim_fraction)` samples.
///
/// Returns `None` when nothing is left to average (empty input, or a fraction
/// of 0.5 or more).
///
/// ```
/// use meal_kiosk::calibration::stats::trimmed_mean;
///
/// let samples: Vec<f64> = (1..=10).map(f64::from).collect();
/// assert_eq!(trimmed_mean(&samples, 0.1), Some(5.5));
/// ```
pub fn trimmed_mean(samples: &[f64], trim_fraction: f64) -> Option<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let k = (sorted.len() as f64 * trim_fraction.max(0.0)).floor() as usize;
    if sorted.len() <= 2 * k {
        return None;
    }
    let kept = &sorted[k..sorted.len() - k];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// `(object_mean - empty_mean) / object_weight`.
///
/// # Errors
/// - `DivideByZeroGuard` if `object_weight` is zero; checked before dividing
/// - `CalibrationInvalidResult` if the result is not finite and positive, e.g.
///   when nothing was placed on the platform
pub fn compute_reference_unit(empty_mean: f64, object_mean: f64, object_weight: f64) -> AppResult<f64> {
    if object_weight == 0.0 {
        return Err(KioskError::DivideByZeroGuard);
    }
    let reference_unit = (object_mean - empty_mean) / object_weight;
    if reference_unit.is_finite() && reference_unit > 0.0 {
        Ok(reference_unit)
    } else {
        Err(KioskError::CalibrationInvalidResult(format!(
            "({} - {}) / {} = {}",
            object_mean, empty_mean, object_weight, reference_unit
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_ten_drops_one_each_end() {
        let samples: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(trimmed_mean(&samples, 0.1), Some(5.5));
    }

    #[test]
    fn sixty_samples_average_forty_eight() {
        // 6 huge outliers each side must vanish
        let mut samples = vec![100.0; 48];
        samples.extend([1e9; 6]);
        samples.extend([-1e9; 6]);
        assert_eq!(trimmed_mean(&samples, DEFAULT_TRIM_FRACTION), Some(100.0));
    }

    #[test]
    fn order_does_not_matter() {
        let a = [5.0, 1.0, 9.0, 3.0, 7.0, 2.0, 8.0, 4.0, 6.0, 10.0];
        assert_eq!(trimmed_mean(&a, 0.1), Some(5.5));
    }

    #[test]
    fn small_inputs_are_not_trimmed() {
        assert_eq!(trimmed_mean(&[4.0, 8.0], 0.1), Some(6.0));
        assert_eq!(trimmed_mean(&[], 0.1), None);
        assert_eq!(trimmed_mean(&[1.0, 2.0], 0.5), None);
    }

    #[test]
    fn reference_unit_example() {
        assert_eq!(compute_reference_unit(100.0, 600.0, 500.0).unwrap(), 1.0);
    }

    #[test]
    fn zero_weight_is_guarded() {
        assert!(matches!(
            compute_reference_unit(100.0, 600.0, 0.0),
            Err(KioskError::DivideByZeroGuard)
        ));
    }

    #[test]
    fn empty_platform_result_is_rejected() {
        assert!(matches!(
            compute_reference_unit(100.0, 100.0, 500.0),
            Err(KioskError::CalibrationInvalidResult(_))
        ));
        assert!(compute_reference_unit(600.0, 100.0, 500.0).is_err());
    }
}

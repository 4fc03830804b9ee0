pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|&v| v * v).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    pub fn mean(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&v| v as f64).sum();
        (sum / samples.len() as f64) as f32
    }

    /// Median of the finite values; `None` when there are none.
    pub fn median(samples: &[f32]) -> Option<f32> {
        let mut sorted: Vec<f32> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f32::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Median of an integer sequence, as used for pixel spacings.
    pub fn median_usize(values: &[usize]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
        } else {
            Some(sorted[mid] as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_zero_sequence_yields_zero() {
        assert_eq!(StatsHelper::rms(&[]), 0.0);
        assert_eq!(StatsHelper::rms(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_handles_single_value() {
        assert_eq!(StatsHelper::rms(&[4.0]), 4.0);
    }

    #[test]
    fn median_ignores_non_finite_values() {
        assert_eq!(StatsHelper::median(&[3.0, f32::NAN, 1.0, 2.0]), Some(2.0));
        assert_eq!(StatsHelper::median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(StatsHelper::median(&[f32::NAN]), None);
    }

    #[test]
    fn median_of_spacings() {
        assert_eq!(StatsHelper::median_usize(&[60, 58, 61]), Some(60.0));
        assert_eq!(StatsHelper::median_usize(&[]), None);
    }
}

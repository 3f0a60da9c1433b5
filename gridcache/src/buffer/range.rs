//! Per-band min/max ranges.

use super::GridBuffer;

/// Minimum and maximum of one band.
///
/// NaN samples are skipped. A band with no finite-comparable samples yields
/// `min = +inf, max = -inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRange {
    pub min: f32,
    pub max: f32,
}

impl SampleRange {
    /// Create a new range.
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Range of an empty (or all-NaN) band.
    pub fn empty() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    /// True if no sample contributed to this range.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    fn include(&mut self, value: f32) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }
}

impl From<(f32, f32)> for SampleRange {
    fn from((min, max): (f32, f32)) -> Self {
        Self::new(min, max)
    }
}

/// Compute the range of every band of a buffer.
pub fn compute_ranges(buffer: &GridBuffer) -> Vec<SampleRange> {
    buffer
        .bands()
        .iter()
        .map(|band| {
            band.iter().fold(SampleRange::empty(), |mut range, &v| {
                range.include(v);
                range
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_ranges_per_band() {
        let buffer =
            GridBuffer::new(vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]).unwrap();
        let ranges = compute_ranges(&buffer);
        assert_eq!(ranges, vec![(1.0, 4.0).into(), (5.0, 8.0).into()]);
    }

    #[test]
    fn test_nan_samples_are_skipped() {
        let buffer = GridBuffer::new(vec![vec![f32::NAN, -2.0, f32::NAN, 7.5]]).unwrap();
        assert_eq!(compute_ranges(&buffer), vec![SampleRange::new(-2.0, 7.5)]);
    }

    #[test]
    fn test_all_nan_band_is_empty() {
        let buffer = GridBuffer::new(vec![vec![f32::NAN, f32::NAN]]).unwrap();
        let ranges = compute_ranges(&buffer);
        assert!(ranges[0].is_empty());
        assert_eq!(ranges[0], SampleRange::empty());
    }

    #[test]
    fn test_single_value_range() {
        let buffer = GridBuffer::new(vec![vec![9.0, 9.0, 9.0]]).unwrap();
        let range = compute_ranges(&buffer)[0];
        assert_eq!(range, SampleRange::new(9.0, 9.0));
        assert!(!range.is_empty());
    }
}

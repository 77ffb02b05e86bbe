//! Elevation sample grids.

use crate::error::{DecodeError, DecodeResult};

/// Sample value marking "no data" at a grid location.
pub const NO_DATA: f32 = -9999.0;

/// A row-major grid of elevation samples.
///
/// The buffer length always equals `width * height`; the only way to build a
/// grid is through [`SampleGrid::new`], which checks it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGrid {
    width: u32,
    height: u32,
    samples: Vec<f32>,
}

impl SampleGrid {
    /// Create a grid from a row-major sample buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidGrid`] if `samples.len() != width * height`.
    pub fn new(width: u32, height: u32, samples: Vec<f32>) -> DecodeResult<Self> {
        let expected = u64::from(width) * u64::from(height);
        if samples.len() as u64 != expected {
            return Err(DecodeError::InvalidGrid {
                width,
                height,
                len: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Create a grid where every sample is [`NO_DATA`].
    #[must_use]
    pub fn filled_no_data(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            samples: vec![NO_DATA; len],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The raw row-major samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples (`width * height`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at column `x`, row `y`, if in range.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.samples
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Largest sample that carries data, ignoring [`NO_DATA`] and non-finite values.
    ///
    /// Returns `None` when no sample carries data.
    #[must_use]
    pub fn max_valid(&self) -> Option<f32> {
        self.samples
            .iter()
            .copied()
            .filter(|&s| is_valid_sample(s))
            .reduce(f32::max)
    }

    /// Mutable access for the window assembler.
    pub(crate) fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }
}

/// Whether a sample carries an elevation value.
#[must_use]
pub fn is_valid_sample(sample: f32) -> bool {
    sample.is_finite() && sample != NO_DATA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_mismatched_length() {
        let result = SampleGrid::new(2, 2, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            result,
            Err(DecodeError::InvalidGrid {
                width: 2,
                height: 2,
                len: 3
            })
        );
    }

    #[test]
    fn test_get_row_major() {
        let grid = SampleGrid::new(3, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(grid.get(2, 0), Some(2.0));
        assert_eq!(grid.get(0, 1), Some(3.0));
        assert_eq!(grid.get(3, 0), None);
        assert_eq!(grid.get(0, 2), None);
    }

    #[test]
    fn test_max_valid_skips_no_data_and_nan() {
        let grid = SampleGrid::new(2, 2, vec![NO_DATA, 12.5, f32::NAN, 3.0]).unwrap();
        assert_eq!(grid.max_valid(), Some(12.5));
    }

    #[test]
    fn test_max_valid_all_no_data() {
        let grid = SampleGrid::filled_no_data(3, 3);
        assert_eq!(grid.max_valid(), None);
    }

    #[test]
    fn test_empty_grid() {
        let grid = SampleGrid::new(0, 5, Vec::new()).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.max_valid(), None);
    }
}

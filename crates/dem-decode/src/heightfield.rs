//! Height-field mesh construction.
//!
//! Turns a [`SampleGrid`] into a regular grid surface over the `[-1, 1]`
//! square of the horizontal (XZ) plane, displaced along Y by sample values
//! normalized against the grid maximum.

use glam::Vec3;

use crate::grid::{SampleGrid, is_valid_sample};

/// Vertex and index buffers for a triangulated height field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBuffers {
    /// Interleaved `x, y, z` vertex positions.
    pub positions: Vec<f32>,
    /// Triangle list indices into `positions` (three per triangle).
    pub indices: Vec<u32>,
}

impl MeshBuffers {
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Position of vertex `index`.
    #[must_use]
    pub fn position(&self, index: usize) -> Option<Vec3> {
        let start = index.checked_mul(3)?;
        let p = self.positions.get(start..start + 3)?;
        Some(Vec3::new(p[0], p[1], p[2]))
    }

    /// Positions grouped per vertex, the layout most renderers want.
    #[must_use]
    pub fn positions_xyz(&self) -> Vec<[f32; 3]> {
        self.positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect()
    }
}

/// Divisor used to normalize sample heights.
///
/// This is the largest valid sample. A grid without valid samples, or whose
/// maximum is exactly zero, normalizes against `1.0` instead.
#[must_use]
pub fn normalization_max(grid: &SampleGrid) -> f32 {
    match grid.max_valid() {
        Some(max) if max != 0.0 => max,
        _ => 1.0,
    }
}

/// Build the height-field mesh for a sample grid.
///
/// Vertices are emitted in row-major order (rows outer, columns inner). The
/// vertex for column `x`, row `y` sits at
/// `((x / (w - 1) - 0.5) * 2, h, (y / (h - 1) - 0.5) * 2)` where `h` is the
/// normalized sample, or `0` for samples without data. A single column or row
/// uses a divisor of `1`, placing it at `-1` on that axis.
///
/// Each cell contributes the triangles `(i, i + w + 1, i + w)` and
/// `(i, i + 1, i + w + 1)` with `i = x + y * w`. Downstream face normals
/// depend on this exact winding.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn build_height_field(grid: &SampleGrid) -> MeshBuffers {
    let width = grid.width();
    let height = grid.height();
    if grid.is_empty() {
        return MeshBuffers::default();
    }

    let max = normalization_max(grid);
    let x_span = width.saturating_sub(1).max(1) as f32;
    let y_span = height.saturating_sub(1).max(1) as f32;

    let mut positions = Vec::with_capacity(grid.len() * 3);
    for (i, &sample) in grid.samples().iter().enumerate() {
        let x = (i % width as usize) as f32;
        let y = (i / width as usize) as f32;

        let percent_x = x / x_span;
        let percent_y = y / y_span;
        let elevation = if is_valid_sample(sample) {
            sample / max
        } else {
            0.0
        };

        positions.extend([(percent_x - 0.5) * 2.0, elevation, (percent_y - 0.5) * 2.0]);
    }

    let cells = width.saturating_sub(1) as usize * height.saturating_sub(1) as usize;
    let mut indices = Vec::with_capacity(cells * 6);
    for y in 0..height.saturating_sub(1) {
        for x in 0..width.saturating_sub(1) {
            let index = x + y * width;
            indices.extend([index, index + width + 1, index + width]);
            indices.extend([index, index + 1, index + width + 1]);
        }
    }

    MeshBuffers { positions, indices }
}

//! Geographic window selection and assembly.
//!
//! Maps a [`BoundingBox`] onto pixel coordinates of the best-matching image
//! of a GeoTIFF, lists the blocks needed to cover it, and stitches decoded
//! blocks into a [`SampleGrid`].

use crate::error::{DecodeError, DecodeResult};
use crate::grid::{NO_DATA, SampleGrid};
use crate::tiff::{GeoTransform, ImageDirectory, TiffHeader};

/// Largest number of samples a single window may hold (256 MiB of `f32`).
pub const MAX_WINDOW_SAMPLES: u64 = 1 << 26;

/// A geographic area and the sample spacing requested for it.
///
/// Bounds are in the raster's model coordinates (longitude/latitude for
/// geographic DEMs); the corners may be given in any order. Resolutions are
/// model units per sample. A resolution that is not a positive finite number
/// requests full resolution on that axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    lng1: f64,
    lat1: f64,
    lng2: f64,
    lat2: f64,
    res_x: f64,
    res_y: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(lng1: f64, lat1: f64, lng2: f64, lat2: f64, res_x: f64, res_y: f64) -> Self {
        Self {
            lng1,
            lat1,
            lng2,
            lat2,
            res_x,
            res_y,
        }
    }

    /// A box read at the source's full resolution.
    #[must_use]
    pub const fn full_resolution(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> Self {
        Self::new(lng1, lat1, lng2, lat2, 0.0, 0.0)
    }

    /// Corner bounds as `[lng1, lat1, lng2, lat2]`.
    #[must_use]
    pub fn bounds(&self) -> [f64; 4] {
        [self.lng1, self.lat1, self.lng2, self.lat2]
    }

    #[must_use]
    pub fn res_x(&self) -> f64 {
        self.res_x
    }

    #[must_use]
    pub fn res_y(&self) -> f64 {
        self.res_y
    }

    fn requested(value: f64) -> Option<f64> {
        (value.is_finite() && value > 0.0).then_some(value)
    }
}

/// A half-open pixel rectangle `[x0, x1) x [y0, y1)`.
///
/// Coordinates may lie outside the image they were computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelWindow {
    #[must_use]
    pub fn width(&self) -> i64 {
        self.x1.saturating_sub(self.x0)
    }

    #[must_use]
    pub fn height(&self) -> i64 {
        self.y1.saturating_sub(self.y0)
    }

    /// Intersection with an image of the given size, or `None` if empty.
    #[must_use]
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        let clipped = Self {
            x0: self.x0.max(0),
            y0: self.y0.max(0),
            x1: self.x1.min(i64::from(width)),
            y1: self.y1.min(i64::from(height)),
        };
        (clipped.width() > 0 && clipped.height() > 0).then_some(clipped)
    }
}

/// Georeferencing of the full-resolution image.
///
/// # Errors
///
/// Returns an error if the file carries no model transform.
pub fn primary_transform(header: &TiffHeader) -> DecodeResult<GeoTransform> {
    header
        .primary()
        .geo_transform
        .ok_or_else(|| DecodeError::InvalidFormat {
            context: "geotiff",
            detail: "image has no georeferencing tags".to_string(),
        })
}

/// Resolution of `image` in model units, derived from the primary image.
#[must_use]
pub fn image_resolution(
    transform: &GeoTransform,
    primary: &ImageDirectory,
    image: &ImageDirectory,
) -> (f64, f64) {
    (
        transform.res_x * f64::from(primary.width) / f64::from(image.width.max(1)),
        transform.res_y * f64::from(primary.height) / f64::from(image.height.max(1)),
    )
}

/// Pick the image to read for a request.
///
/// Candidates are the primary image and its overviews, ordered from coarsest
/// to finest. The first candidate at least as fine as the requested
/// resolution wins; with no requested resolution the finest image is used.
/// Returns an index into `header.directories`.
#[must_use]
pub fn select_image(header: &TiffHeader, transform: &GeoTransform, bbox: &BoundingBox) -> usize {
    let primary = header.primary();
    let mut candidates: Vec<usize> = header
        .directories
        .iter()
        .enumerate()
        .filter(|(i, dir)| *i == 0 || (dir.is_overview() && !dir.is_mask()))
        .map(|(i, _)| i)
        .collect();
    candidates.sort_by_key(|&i| header.directories[i].width);

    let want_x = BoundingBox::requested(bbox.res_x);
    let want_y = BoundingBox::requested(bbox.res_y);

    let mut chosen = 0;
    for index in candidates {
        let (res_x, res_y) = image_resolution(transform, primary, &header.directories[index]);
        chosen = index;
        let fine_enough_x = want_x.is_some_and(|want| want > res_x.abs());
        let fine_enough_y = want_y.is_some_and(|want| want > res_y.abs());
        if fine_enough_x || fine_enough_y {
            break;
        }
    }
    chosen
}

/// Pixel window covering `bbox` in an image with the given resolution.
///
/// Each corner is rounded to the nearest pixel edge and the result ordered
/// so that `x0 <= x1` and `y0 <= y1`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn pixel_window(transform: &GeoTransform, resolution: (f64, f64), bbox: &BoundingBox) -> PixelWindow {
    let (res_x, res_y) = resolution;
    let [lng1, lat1, lng2, lat2] = bbox.bounds();

    let a = ((lng1 - transform.origin_x) / res_x).round() as i64;
    let b = ((lat1 - transform.origin_y) / res_y).round() as i64;
    let c = ((lng2 - transform.origin_x) / res_x).round() as i64;
    let d = ((lat2 - transform.origin_y) / res_y).round() as i64;

    PixelWindow {
        x0: a.min(c),
        y0: b.min(d),
        x1: a.max(c),
        y1: b.max(d),
    }
}

/// A block that contributes samples to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub bx: u32,
    pub by: u32,
    /// Index into the image's block arrays.
    pub index: usize,
}

/// Collects decoded blocks into the sample grid for one window.
#[derive(Debug)]
pub struct WindowAssembler {
    window: PixelWindow,
    grid: SampleGrid,
    nodata: Option<f32>,
}

impl WindowAssembler {
    /// Start assembling `window`. Every sample starts out as [`NO_DATA`].
    ///
    /// Samples equal to `source_nodata` (the file's own no-data value) are
    /// stored as [`NO_DATA`].
    ///
    /// # Errors
    ///
    /// Returns an error if the window is empty or holds more than
    /// [`MAX_WINDOW_SAMPLES`] samples.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(window: PixelWindow, source_nodata: Option<f64>) -> DecodeResult<Self> {
        let (Ok(width), Ok(height)) = (u32::try_from(window.width()), u32::try_from(window.height()))
        else {
            return Err(DecodeError::InvalidFormat {
                context: "pixel window",
                detail: format!("window {window:?} has no valid size"),
            });
        };
        if width == 0 || height == 0 {
            return Err(DecodeError::InvalidFormat {
                context: "pixel window",
                detail: format!("window {window:?} is empty"),
            });
        }
        let samples = u64::from(width) * u64::from(height);
        if samples > MAX_WINDOW_SAMPLES {
            return Err(DecodeError::InvalidFormat {
                context: "pixel window",
                detail: format!(
                    "{width}x{height} window exceeds the {MAX_WINDOW_SAMPLES} sample limit"
                ),
            });
        }
        Ok(Self {
            window,
            grid: SampleGrid::filled_no_data(width, height),
            nodata: source_nodata.map(|v| v as f32),
        })
    }

    #[must_use]
    pub fn window(&self) -> PixelWindow {
        self.window
    }

    /// First-band blocks of `dir` that overlap the window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn blocks(&self, dir: &ImageDirectory) -> Vec<BlockRef> {
        let Some(clipped) = self.window.clip(dir.width, dir.height) else {
            return Vec::new();
        };
        let bw = i64::from(dir.layout.block_width);
        let bh = i64::from(dir.layout.block_height);

        let mut blocks = Vec::new();
        for by in (clipped.y0 / bh)..=((clipped.y1 - 1) / bh) {
            for bx in (clipped.x0 / bw)..=((clipped.x1 - 1) / bw) {
                let (bx, by) = (bx as u32, by as u32);
                if let Some(index) = dir.block_index(bx, by) {
                    blocks.push(BlockRef { bx, by, index });
                }
            }
        }
        blocks
    }

    /// Copy the overlapping part of a decoded block into the window.
    ///
    /// `samples` holds `block_width` samples per row for however many rows the
    /// block stores.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn insert_block(&mut self, dir: &ImageDirectory, block: BlockRef, samples: &[f32]) {
        let bw = i64::from(dir.layout.block_width);
        let block_x = i64::from(block.bx) * bw;
        let block_y = i64::from(block.by) * i64::from(dir.layout.block_height);
        let rows = (samples.len() as i64) / bw;

        let x_start = block_x.max(self.window.x0);
        let x_end = (block_x + bw)
            .min(self.window.x1)
            .min(i64::from(dir.width));
        let y_start = block_y.max(self.window.y0);
        let y_end = (block_y + rows)
            .min(self.window.y1)
            .min(i64::from(dir.height));

        let grid_width = self.window.width();
        let nodata = self.nodata;
        let out = self.grid.samples_mut();
        for y in y_start..y_end {
            for x in x_start..x_end {
                let sample = samples[((y - block_y) * bw + (x - block_x)) as usize];
                let sample = if nodata == Some(sample) { NO_DATA } else { sample };
                out[((y - self.window.y0) * grid_width + (x - self.window.x0)) as usize] = sample;
            }
        }
    }

    /// The assembled grid.
    #[must_use]
    pub fn finish(self) -> SampleGrid {
        self.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::GeoTiffBuilder;
    use crate::tiff::parse_header;

    fn transform() -> GeoTransform {
        GeoTransform {
            origin_x: 100.0,
            origin_y: 40.0,
            res_x: 0.1,
            res_y: -0.1,
        }
    }

    #[test]
    fn test_pixel_window_orders_corners() {
        let bbox = BoundingBox::full_resolution(100.5, 39.0, 100.2, 39.7);
        let window = pixel_window(&transform(), (0.1, -0.1), &bbox);
        assert_eq!(
            window,
            PixelWindow {
                x0: 2,
                y0: 3,
                x1: 5,
                y1: 10
            }
        );
        assert_eq!((window.width(), window.height()), (3, 7));
    }

    #[test]
    fn test_pixel_window_rounds_to_nearest() {
        let bbox = BoundingBox::full_resolution(100.04, 39.96, 100.26, 39.74);
        let window = pixel_window(&transform(), (0.1, -0.1), &bbox);
        assert_eq!((window.x0, window.y0, window.x1, window.y1), (0, 0, 3, 3));
    }

    #[test]
    fn test_clip() {
        let window = PixelWindow {
            x0: -2,
            y0: 3,
            x1: 4,
            y1: 12,
        };
        assert_eq!(
            window.clip(10, 10),
            Some(PixelWindow {
                x0: 0,
                y0: 3,
                x1: 4,
                y1: 10
            })
        );
        let outside = PixelWindow {
            x0: 12,
            y0: 0,
            x1: 15,
            y1: 2,
        };
        assert_eq!(outside.clip(10, 10), None);
    }

    fn pyramid() -> TiffHeader {
        let file = GeoTiffBuilder::new(16, 16, vec![1.0; 256])
            .tiled(8, 8)
            .geo(0.0, 16.0, 1.0, 1.0)
            .overview(8, 8)
            .overview(4, 4)
            .build();
        parse_header(&file).unwrap()
    }

    #[test]
    fn test_select_image_full_resolution_by_default() {
        let header = pyramid();
        let transform = primary_transform(&header).unwrap();
        let bbox = BoundingBox::full_resolution(0.0, 0.0, 16.0, 16.0);
        assert_eq!(select_image(&header, &transform, &bbox), 0);
    }

    #[test]
    fn test_select_image_picks_coarsest_adequate() {
        let header = pyramid();
        let transform = primary_transform(&header).unwrap();

        // Overview resolutions: 4.0 (4x4), 2.0 (8x8), primary 1.0.
        let coarse = BoundingBox::new(0.0, 0.0, 16.0, 16.0, 5.0, 5.0);
        assert_eq!(header.directories[select_image(&header, &transform, &coarse)].width, 4);

        let medium = BoundingBox::new(0.0, 0.0, 16.0, 16.0, 3.0, 3.0);
        assert_eq!(header.directories[select_image(&header, &transform, &medium)].width, 8);

        let fine = BoundingBox::new(0.0, 0.0, 16.0, 16.0, 0.5, 0.5);
        assert_eq!(select_image(&header, &transform, &fine), 0);
    }

    #[test]
    fn test_image_resolution_scales_with_overview() {
        let header = pyramid();
        let transform = primary_transform(&header).unwrap();
        let res = image_resolution(&transform, header.primary(), &header.directories[2]);
        assert_eq!(res, (4.0, -4.0));
    }

    #[test]
    fn test_missing_georeferencing() {
        let file = GeoTiffBuilder::new(2, 2, vec![0.0; 4]).build();
        let header = parse_header(&file).unwrap();
        assert!(matches!(
            primary_transform(&header),
            Err(DecodeError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_assembler_blocks_and_fill() {
        let file = GeoTiffBuilder::new(6, 6, (0..36).map(|v| v as f32).collect())
            .tiled(4, 4)
            .build();
        let header = parse_header(&file).unwrap();
        let dir = header.primary();

        // Window hangs off the right edge by two columns.
        let window = PixelWindow {
            x0: 3,
            y0: 2,
            x1: 8,
            y1: 5,
        };
        let mut assembler = WindowAssembler::new(window, Some(14.0)).unwrap();
        let blocks = assembler.blocks(dir);
        assert_eq!(
            blocks.iter().map(|b| (b.bx, b.by)).collect::<Vec<_>>(),
            vec![(0, 0), (1, 0), (0, 1), (1, 1)]
        );

        for block in blocks {
            // Rebuild the tile contents directly from the known ramp.
            let mut tile = vec![0.0; 16];
            for r in 0..4 {
                for c in 0..4 {
                    let (x, y) = (block.bx * 4 + c, block.by * 4 + r);
                    if x < 6 && y < 6 {
                        tile[(r * 4 + c) as usize] = (y * 6 + x) as f32;
                    }
                }
            }
            assembler.insert_block(dir, block, &tile);
        }

        let grid = assembler.finish();
        assert_eq!((grid.width(), grid.height()), (5, 3));
        assert_eq!(
            grid.samples(),
            &[
                15.0, 16.0, 17.0, NO_DATA, NO_DATA,
                21.0, 22.0, 23.0, NO_DATA, NO_DATA,
                27.0, 28.0, 29.0, NO_DATA, NO_DATA,
            ]
        );
    }

    #[test]
    fn test_assembler_maps_source_nodata() {
        let file = GeoTiffBuilder::new(2, 1, vec![5.0, -32768.0]).build();
        let header = parse_header(&file).unwrap();
        let dir = header.primary();
        let window = PixelWindow {
            x0: 0,
            y0: 0,
            x1: 2,
            y1: 1,
        };
        let mut assembler = WindowAssembler::new(window, Some(-32768.0)).unwrap();
        let block = assembler.blocks(dir)[0];
        assembler.insert_block(dir, block, &[5.0, -32768.0]);
        assert_eq!(assembler.finish().samples(), &[5.0, NO_DATA]);
    }

    #[test]
    fn test_assembler_rejects_empty_window() {
        let window = PixelWindow {
            x0: 4,
            y0: 4,
            x1: 4,
            y1: 9,
        };
        assert!(WindowAssembler::new(window, None).is_err());
    }

    #[test]
    fn test_assembler_rejects_oversized_window() {
        let window = PixelWindow {
            x0: 0,
            y0: 0,
            x1: 1 << 14,
            y1: (1 << 12) + 1,
        };
        assert!(matches!(
            WindowAssembler::new(window, None),
            Err(DecodeError::InvalidFormat { context: "pixel window", .. })
        ));

        let widest = PixelWindow {
            x0: i64::MIN,
            y0: 0,
            x1: i64::MAX,
            y1: 1,
        };
        assert!(WindowAssembler::new(widest, None).is_err());
    }
}

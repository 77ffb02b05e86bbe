//! Launch parameter parsing for the viewer.
//!
//! On native, parameters are parsed from command-line arguments using clap.
//! On WASM, defaults are used.

use bevy::prelude::*;
use dem::BoundingBox;

/// Copernicus GLO-30 tile covering 46-47°N, 7-8°E (Bernese Alps).
pub const DEFAULT_URL: &str = "https://copernicus-dem-30m.s3.amazonaws.com/Copernicus_DSM_COG_10_N46_00_E007_00_DEM/Copernicus_DSM_COG_10_N46_00_E007_00_DEM.tif";
/// Default bounds as `[lng1, lat1, lng2, lat2]`.
pub const DEFAULT_BOUNDS: [f64; 4] = [7.6, 46.0, 7.8, 46.1];
/// Default sample spacing in degrees, on both axes.
pub const DEFAULT_RESOLUTION: f64 = 0.001;
/// Default header prefetch in KiB.
pub const DEFAULT_PREFETCH_KIB: u64 = 64;

/// Launch parameters for the viewer.
#[derive(Resource, Debug, Clone)]
pub struct LaunchParams {
    /// GeoTIFF to read elevation from.
    pub url: String,
    /// Area and sample spacing to fetch.
    pub bbox: BoundingBox,
    /// Bytes read before parsing the header, in KiB.
    pub prefetch_kib: u64,
    /// Draw the origin axes.
    pub show_axes: bool,
}

impl Default for LaunchParams {
    fn default() -> Self {
        let [lng1, lat1, lng2, lat2] = DEFAULT_BOUNDS;
        Self {
            url: DEFAULT_URL.to_string(),
            bbox: BoundingBox::new(
                lng1,
                lat1,
                lng2,
                lat2,
                DEFAULT_RESOLUTION,
                DEFAULT_RESOLUTION,
            ),
            prefetch_kib: DEFAULT_PREFETCH_KIB,
            show_axes: true,
        }
    }
}

#[cfg(not(target_family = "wasm"))]
mod native {
    use clap::Parser;

    use super::*;

    /// Parse `lng1,lat1,lng2,lat2`.
    pub(super) fn parse_bounds(s: &str) -> Result<[f64; 4], String> {
        let values = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|e| format!("invalid coordinate '{part}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bounds: [f64; 4] = values
            .try_into()
            .map_err(|v: Vec<f64>| format!("expected 4 comma-separated values, got {}", v.len()))?;
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(format!("coordinates must be finite, got '{s}'"));
        }
        Ok(bounds)
    }

    #[derive(Parser, Debug)]
    #[command(about = "3D height-field viewer for cloud-optimized GeoTIFF elevation data")]
    pub(super) struct CliArgs {
        /// URL of the GeoTIFF (http, https, or file).
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,

        /// Bounding box as lng1,lat1,lng2,lat2 in the raster's CRS.
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        bbox: Option<[f64; 4]>,

        /// Horizontal sample spacing; 0 reads full resolution.
        #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
        res_x: f64,

        /// Vertical sample spacing; 0 reads full resolution.
        #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
        res_y: f64,

        /// Header bytes to fetch up front, in KiB.
        #[arg(long, default_value_t = DEFAULT_PREFETCH_KIB)]
        prefetch_kib: u64,

        /// Hide the origin axes.
        #[arg(long)]
        no_axes: bool,
    }

    impl From<CliArgs> for LaunchParams {
        fn from(args: CliArgs) -> Self {
            let [lng1, lat1, lng2, lat2] = args.bbox.unwrap_or(DEFAULT_BOUNDS);
            Self {
                url: args.url,
                bbox: BoundingBox::new(lng1, lat1, lng2, lat2, args.res_x, args.res_y),
                prefetch_kib: args.prefetch_kib,
                show_axes: !args.no_axes,
            }
        }
    }

    pub fn parse() -> LaunchParams {
        CliArgs::parse().into()
    }
}

/// Parse launch parameters from CLI args (native) or use defaults (WASM).
pub fn parse() -> LaunchParams {
    #[cfg(not(target_family = "wasm"))]
    {
        native::parse()
    }
    #[cfg(target_family = "wasm")]
    {
        LaunchParams::default()
    }
}

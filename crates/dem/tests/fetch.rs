//! End-to-end window reads against synthetic GeoTIFFs on the local file system.

use std::path::PathBuf;

use dem::{BoundingBox, Client, DecodeError, Error, MemoryCache, NO_DATA, SampleGrid};
use dem_decode::fixture::{FixtureCompression, GeoTiffBuilder, SampleType};

/// A fixture file that is removed when dropped.
struct TempTiff {
    path: PathBuf,
}

impl TempTiff {
    fn write(name: &str, bytes: &[u8]) -> Self {
        let path = std::env::temp_dir().join(format!(
            "dem-test-{}-{name}.tif",
            std::process::id()
        ));
        std::fs::write(&path, bytes).unwrap();
        Self { path }
    }

    fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

impl Drop for TempTiff {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// 20x10 raster at 0.1 degree spacing from (10, 50); sample = y * 20 + x.
fn ramp_builder() -> GeoTiffBuilder {
    let samples = (0..200).map(|v| v as f32).collect();
    GeoTiffBuilder::new(20, 10, samples)
        .geo(10.0, 50.0, 0.1, 0.1)
        .tiled(8, 8)
        .sample_type(SampleType::I16)
        .compression(FixtureCompression::Deflate)
}

fn expected_ramp(x0: u32, y0: u32, width: u32, height: u32) -> Vec<f32> {
    let mut out = Vec::new();
    for y in y0..y0 + height {
        for x in x0..x0 + width {
            out.push((y * 20 + x) as f32);
        }
    }
    out
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[tokio::test]
async fn test_fetch_full_resolution_window() {
    init_tracing();
    let file = TempTiff::write("full", &ramp_builder().build());

    let client = Client::new();
    let bbox = BoundingBox::full_resolution(10.2, 49.8, 10.5, 49.5);
    let grid = client.fetch_grid(&file.url(), &bbox).await.unwrap();

    assert_eq!((grid.width(), grid.height()), (3, 3));
    assert_eq!(grid.samples(), expected_ramp(2, 2, 3, 3).as_slice());
}

#[tokio::test]
async fn test_window_spanning_tiles() {
    let file = TempTiff::write("span", &ramp_builder().build());

    let client = Client::new();
    // Columns 6..11 and rows 5..9 cross both tile boundaries.
    let bbox = BoundingBox::full_resolution(10.6, 49.5, 11.1, 49.1);
    let grid = client.fetch_grid(&file.url(), &bbox).await.unwrap();

    assert_eq!((grid.width(), grid.height()), (5, 4));
    assert_eq!(grid.samples(), expected_ramp(6, 5, 5, 4).as_slice());
}

#[tokio::test]
async fn test_partial_overlap_fills_no_data() {
    let file = TempTiff::write("partial", &ramp_builder().build());

    let client = Client::new();
    // Two columns west of the raster, then columns 0..2.
    let bbox = BoundingBox::full_resolution(9.8, 50.0, 10.2, 49.9);
    let grid = client.fetch_grid(&file.url(), &bbox).await.unwrap();

    assert_eq!((grid.width(), grid.height()), (4, 1));
    assert_eq!(grid.samples(), &[NO_DATA, NO_DATA, 0.0, 1.0]);
}

#[tokio::test]
async fn test_resolution_selects_overview() {
    let file = TempTiff::write("overview", &ramp_builder().overview(10, 5).build());

    let client = Client::new();
    let cog = client.open(&file.url()).await.unwrap();
    assert_eq!(cog.header().directories.len(), 2);
    assert_eq!(cog.dimensions(), (20, 10));

    // Overview spacing is 0.2; asking for 0.25 picks it.
    let bbox = BoundingBox::new(10.0, 50.0, 10.8, 49.6, 0.25, 0.25);
    let grid = client.read_window(&cog, &bbox).await.unwrap();

    assert_eq!((grid.width(), grid.height()), (4, 2));
    // Nearest-neighbour overview keeps every second sample.
    assert_eq!(
        grid.samples(),
        &[0.0, 2.0, 4.0, 6.0, 40.0, 42.0, 44.0, 46.0]
    );
}

#[tokio::test]
async fn test_outside_coverage() {
    let file = TempTiff::write("outside", &ramp_builder().build());

    let client = Client::new();
    let bbox = BoundingBox::full_resolution(20.0, 10.0, 21.0, 9.0);
    let result = client.fetch_grid(&file.url(), &bbox).await;

    assert!(matches!(result, Err(Error::OutsideCoverage { .. })));
}

#[tokio::test]
async fn test_huge_window_is_rejected() {
    // Fine spacing turns a world-sized box into trillions of samples.
    let samples = (0..200).map(|v| v as f32).collect();
    let bytes = GeoTiffBuilder::new(20, 10, samples)
        .geo(10.0, 50.0, 1e-5, 1e-5)
        .build();
    let file = TempTiff::write("huge", &bytes);

    let client = Client::new();
    let bbox = BoundingBox::full_resolution(-180.0, -90.0, 180.0, 90.0);
    let result = client.fetch_grid(&file.url(), &bbox).await;

    assert!(matches!(
        result,
        Err(Error::Decode(DecodeError::InvalidFormat { .. }))
    ));
}

#[tokio::test]
async fn test_small_prefetch_grows_until_header_fits() {
    let bytes = ramp_builder().overview(10, 5).overview(5, 3).big_tiff().build();
    let file = TempTiff::write("prefetch", &bytes);

    let client = Client::new().with_prefetch_size(16);
    let cog = client.open(&file.url()).await.unwrap();
    assert_eq!(cog.header().directories.len(), 3);
    assert!(cog.header().big_tiff);
}

#[tokio::test]
async fn test_memory_cache_serves_repeat_reads() {
    let file = TempTiff::write("cache", &ramp_builder().build());
    let url = file.url();

    let cache = MemoryCache::new();
    let client = Client::with_cache(cache.clone());
    let bbox = BoundingBox::full_resolution(10.2, 49.8, 10.5, 49.5);

    let first: SampleGrid = client.fetch_grid(&url, &bbox).await.unwrap();
    assert!(!cache.is_empty());

    // Everything needed is cached, so the file is no longer read.
    drop(file);
    let second = client.fetch_grid(&url, &bbox).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_file() {
    let client = Client::new();
    let bbox = BoundingBox::full_resolution(0.0, 0.0, 1.0, 1.0);
    let result = client
        .fetch_grid("file:///nonexistent/dem-test-missing.tif", &bbox)
        .await;

    assert!(matches!(result, Err(Error::Io { .. })));
}

#[tokio::test]
async fn test_not_a_tiff() {
    let file = TempTiff::write("garbage", b"this is not a tiff file at all");

    let client = Client::new();
    let result = client.open(&file.url()).await;
    assert!(matches!(result, Err(Error::Decode(_))));
}

#[tokio::test]
async fn test_source_nodata_maps_to_sentinel() {
    let mut samples: Vec<f32> = (0..16).map(|v| v as f32).collect();
    samples[5] = -32768.0;
    let bytes = GeoTiffBuilder::new(4, 4, samples)
        .geo(0.0, 4.0, 1.0, 1.0)
        .sample_type(SampleType::I16)
        .gdal_nodata("-32768")
        .build();
    let file = TempTiff::write("nodata", &bytes);

    let client = Client::new();
    let bbox = BoundingBox::full_resolution(0.0, 4.0, 4.0, 0.0);
    let grid = client.fetch_grid(&file.url(), &bbox).await.unwrap();

    assert_eq!(grid.get(1, 1), Some(NO_DATA));
    assert_eq!(grid.get(2, 1), Some(6.0));
    assert_eq!(grid.max_valid(), Some(15.0));
}

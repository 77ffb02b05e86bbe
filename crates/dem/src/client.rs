//! HTTP client for windowed reads of cloud-optimized GeoTIFFs.
//!
//! A read happens in two phases. [`Client::open`] fetches the start of the
//! file and parses every image directory. [`Client::read_window`] then picks
//! the image that matches the requested resolution and fetches only the tiles
//! or strips that overlap the bounding box.

use crate::cache::{Cache, NoCache, range_key};
use crate::error::{Error, Result};
use dem_decode::{
    BoundingBox, DecodeError, GeoTransform, SampleGrid, TiffHeader, WindowAssembler, decode_block,
    image_resolution, parse_header, pixel_window, primary_transform, select_image,
};
use std::sync::Arc;

/// Bytes fetched from the start of a file before parsing its header.
pub const DEFAULT_PREFETCH_SIZE: u64 = 64 * 1024;

/// Largest header prefix the client will fetch.
const MAX_HEADER_SIZE: u64 = 64 * 1024 * 1024;

/// An opened cloud-optimized GeoTIFF: its location and parsed directories.
#[derive(Debug, Clone)]
pub struct Cog {
    url: String,
    header: TiffHeader,
    transform: GeoTransform,
}

impl Cog {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// All image directories, full resolution first.
    #[must_use]
    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    /// Georeferencing of the full-resolution image.
    #[must_use]
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Size of the full-resolution image in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        let primary = self.header.primary();
        (primary.width, primary.height)
    }
}

/// HTTP client for fetching elevation windows.
///
/// The client handles range requests, caching, and decoding. It is
/// runtime-agnostic and works with any async executor.
///
/// # Example
///
/// ```ignore
/// let client = Client::new();
/// let bbox = BoundingBox::new(7.6, 46.0, 7.8, 46.1, 0.001, 0.001);
/// let grid = client.fetch_grid("https://example.com/dem.tif", &bbox).await?;
/// ```
pub struct Client<C: Cache = NoCache> {
    http: reqwest::Client,
    cache: Arc<C>,
    prefetch_size: u64,
}

impl Client<NoCache> {
    /// Create a new client with default settings and no caching.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache(NoCache)
    }
}

impl Default for Client<NoCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cache> Client<C> {
    /// Create a new client with a custom cache.
    #[must_use]
    pub fn with_cache(cache: C) -> Self {
        Self::with_http_and_cache(reqwest::Client::new(), cache)
    }

    /// Create a new client with a custom HTTP client and cache.
    #[must_use]
    pub fn with_http_and_cache(http: reqwest::Client, cache: C) -> Self {
        Self {
            http,
            cache: Arc::new(cache),
            prefetch_size: DEFAULT_PREFETCH_SIZE,
        }
    }

    /// Set how many bytes [`Client::open`] reads up front.
    ///
    /// Headers larger than this cost extra round trips.
    #[must_use]
    pub fn with_prefetch_size(mut self, bytes: u64) -> Self {
        self.prefetch_size = bytes.max(16);
        self
    }

    /// Fetch and parse the header of a GeoTIFF.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be fetched, is not a GeoTIFF, or
    /// lacks georeferencing.
    pub async fn open(&self, url: &str) -> Result<Cog> {
        let mut len = self.prefetch_size;
        loop {
            let prefix = self.fetch_range(url, 0, len).await?;
            match parse_header(&prefix) {
                Ok(header) => {
                    let transform = primary_transform(&header)?;
                    let primary = header.primary();
                    tracing::info!(
                        url,
                        width = primary.width,
                        height = primary.height,
                        images = header.directories.len(),
                        "opened geotiff"
                    );
                    return Ok(Cog {
                        url: url.to_string(),
                        header,
                        transform,
                    });
                }
                Err(DecodeError::NeedMoreData { required }) => {
                    // A short read means the whole file is already here.
                    if (prefix.len() as u64) < len || required > MAX_HEADER_SIZE {
                        return Err(DecodeError::NeedMoreData { required }.into());
                    }
                    len = required.max(len.saturating_mul(2)).min(MAX_HEADER_SIZE);
                    tracing::debug!(url, len, "header extends past prefix, refetching");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read the samples covering `bbox` from an opened file.
    ///
    /// The result is row-major with the northern edge first for north-up
    /// rasters. Pixels of the window that fall outside the image hold
    /// [`dem_decode::NO_DATA`], as do values equal to the file's own no-data
    /// marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutsideCoverage`] if the box does not overlap the
    /// raster, or an error if a block cannot be fetched or decoded.
    pub async fn read_window(&self, cog: &Cog, bbox: &BoundingBox) -> Result<SampleGrid> {
        let header = cog.header();
        let index = select_image(header, cog.transform(), bbox);
        let dir = &header.directories[index];
        let resolution = image_resolution(cog.transform(), header.primary(), dir);
        let window = pixel_window(cog.transform(), resolution, bbox);

        if window.clip(dir.width, dir.height).is_none() {
            return Err(Error::OutsideCoverage {
                url: cog.url.clone(),
                bounds: bbox.bounds(),
            });
        }

        let mut assembler = WindowAssembler::new(window, dir.gdal_nodata)?;
        let blocks = assembler.blocks(dir);
        tracing::debug!(
            url = cog.url(),
            image = index,
            width = window.width(),
            height = window.height(),
            blocks = blocks.len(),
            "reading window"
        );

        for block in blocks {
            let (offset, len) = dir.layout.block_range(block.index).ok_or_else(|| {
                Error::InvalidData {
                    context: "block layout",
                    detail: format!("no byte range for block {}", block.index),
                }
            })?;
            // Sparse blocks carry no bytes and read as no data.
            if len == 0 {
                continue;
            }
            let stored = self.fetch_range(&cog.url, offset, len).await?;
            let samples = decode_block(dir, dir.block_rows(block.by), &stored)?;
            assembler.insert_block(dir, block, &samples);
        }

        Ok(assembler.finish())
    }

    /// Open `url` and read the window covering `bbox`.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Client::open`] or [`Client::read_window`].
    pub async fn fetch_grid(&self, url: &str, bbox: &BoundingBox) -> Result<SampleGrid> {
        let cog = self.open(url).await?;
        let grid = self.read_window(&cog, bbox).await?;
        tracing::info!(
            url,
            width = grid.width(),
            height = grid.height(),
            "fetched elevation window"
        );
        Ok(grid)
    }

    /// Fetch up to `len` bytes starting at `offset`, using cache if available.
    ///
    /// The result is shorter than `len` when the file ends first.
    async fn fetch_range(&self, url: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let key = range_key(url, offset, len);
        if let Some(data) = self.cache.get(&key).await? {
            tracing::debug!(url, offset, len, "cache hit");
            return Ok(data);
        }

        tracing::debug!(url, offset, len, "fetching range");

        #[cfg(not(target_family = "wasm"))]
        let data = if let Some(path) = url.strip_prefix("file://") {
            read_local(path, offset, len)?
        } else {
            self.fetch_http_range(url, offset, len).await?
        };
        #[cfg(target_family = "wasm")]
        let data = self.fetch_http_range(url, offset, len).await?;

        self.cache.put(&key, data.clone()).await?;

        Ok(data)
    }

    async fn fetch_http_range(&self, url: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::RANGE, range_header(offset, len))
            .send()
            .await
            .map_err(|e| Error::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        // 416: the range starts past the end of the file.
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let partial = status == reqwest::StatusCode::PARTIAL_CONTENT;

        let body = response.bytes().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if partial {
            return Ok(body.to_vec());
        }

        // The server ignored the range and sent the whole file.
        tracing::debug!(url, size = body.len(), "server does not support range requests");
        Ok(slice_range(&body, offset, len).to_vec())
    }
}

/// `Range` header value for `len` bytes from `offset`. The end saturates at
/// `u64::MAX`.
fn range_header(offset: u64, len: u64) -> String {
    let last = offset.saturating_add(len.max(1) - 1);
    format!("bytes={offset}-{last}")
}

/// The part of `data` covering `len` bytes from `offset`, clamped to its end.
#[allow(clippy::cast_possible_truncation)]
fn slice_range(data: &[u8], offset: u64, len: u64) -> &[u8] {
    let start = (offset.min(data.len() as u64)) as usize;
    let end = (offset.saturating_add(len).min(data.len() as u64)) as usize;
    &data[start..end]
}

#[cfg(not(target_family = "wasm"))]
fn read_local(path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};

    let io_error = |e: std::io::Error| Error::Io {
        path: path.to_string(),
        message: e.to_string(),
    };

    let mut file = std::fs::File::open(path).map_err(io_error)?;
    file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
    let mut data = Vec::new();
    file.take(len).read_to_end(&mut data).map_err(io_error)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_range_clamps() {
        let data = [0u8, 1, 2, 3, 4, 5];
        assert_eq!(slice_range(&data, 2, 3), &[2, 3, 4]);
        assert_eq!(slice_range(&data, 4, 10), &[4, 5]);
        assert!(slice_range(&data, 10, 4).is_empty());
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, 16), "bytes=0-15");
        assert_eq!(range_header(100, 0), "bytes=100-100");
        assert_eq!(
            range_header(u64::MAX - 4, 1024),
            format!("bytes={}-{}", u64::MAX - 4, u64::MAX)
        );
    }

    #[test]
    fn test_prefetch_size_has_floor() {
        let client = Client::new().with_prefetch_size(0);
        assert_eq!(client.prefetch_size, 16);
    }
}

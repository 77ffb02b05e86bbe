//! Async client for windowed reads of cloud-optimized GeoTIFF elevation data.
//!
//! This crate fetches only the parts of a remote GeoTIFF needed for one
//! bounding box: the header, then the tiles or strips that overlap the box in
//! the best-matching overview. Decoding is done by `dem-decode`.
//!
//! # Design principles
//!
//! - **Web-compatible**: Works on desktop and WASM via reqwest
//! - **Runtime-agnostic**: Returns `impl Future`, works with any executor
//! - **Sync decoding**: Decode functions are synchronous and run inline
//!
//! # Example
//!
//! ```ignore
//! use dem::{BoundingBox, Client, build_height_field};
//!
//! let client = Client::new();
//! let bbox = BoundingBox::new(7.6, 46.0, 7.8, 46.1, 0.001, 0.001);
//! let grid = client.fetch_grid(url, &bbox).await?;
//! let mesh = build_height_field(&grid);
//! ```

pub mod cache;
mod client;
mod error;

pub use cache::{Cache, MemoryCache, NoCache};
pub use client::{Client, Cog, DEFAULT_PREFETCH_SIZE};
pub use error::{Error, Result};

// Re-export decode types for convenience.
pub use dem_decode::{
    BoundingBox, DecodeError, MAX_WINDOW_SAMPLES, MeshBuffers, NO_DATA, SampleGrid,
    build_height_field, is_valid_sample, normalization_max,
};

//! Decode GeoTIFF elevation rasters and build height-field meshes.
//!
//! This crate provides pure synchronous functions for the byte-level half of
//! a DEM viewer: parsing TIFF directories from a file prefix, decoding tiles
//! and strips, stitching them into a sample grid for a geographic window, and
//! turning that grid into triangle buffers.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no I/O; callers supply the bytes
//! - **Incremental**: Parsers report how many bytes they need next
//! - **Web-compatible**: Compiles to WASM

mod block;
mod error;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixture;
mod grid;
mod heightfield;
mod tiff;
mod window;

pub use block::{decode_block, decompress};
pub use error::{DecodeError, DecodeResult};
pub use grid::{NO_DATA, SampleGrid, is_valid_sample};
pub use heightfield::{MeshBuffers, build_height_field, normalization_max};
pub use tiff::{
    BlockLayout, ByteOrder, Compression, GeoTransform, ImageDirectory, Predictor, SampleFormat,
    TiffHeader, parse_header,
};
pub use window::{
    BlockRef, BoundingBox, MAX_WINDOW_SAMPLES, PixelWindow, WindowAssembler, image_resolution,
    pixel_window, primary_transform, select_image,
};

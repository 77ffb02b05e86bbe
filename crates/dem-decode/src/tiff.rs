//! TIFF / GeoTIFF header and image directory parsing.
//!
//! Parsing works on a prefix of the file. Cloud-optimized GeoTIFFs keep every
//! image directory and tag array at the front of the file, so a modest prefix
//! usually suffices. When it does not, [`parse_header`] returns
//! [`DecodeError::NeedMoreData`] with the prefix length it needs; the caller
//! fetches that much and parses again.

use std::collections::HashSet;

use crate::error::{DecodeError, DecodeResult};

/// Upper bound on the number of image directories followed in one file.
pub const MAX_DIRECTORIES: usize = 64;

/// Upper bound on the element count of a single tag.
const MAX_TAG_COUNT: u64 = 1 << 28;

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_PREDICTOR: u16 = 317;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GDAL_NODATA: u16 = 42113;

/// `NewSubfileType` bit for reduced-resolution (overview) images.
pub const SUBFILE_REDUCED_RESOLUTION: u32 = 1;
/// `NewSubfileType` bit for transparency masks.
pub const SUBFILE_MASK: u32 = 4;

/// Byte order of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `II`
    Little,
    /// `MM`
    Big,
}

impl ByteOrder {
    #[must_use]
    pub fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    #[must_use]
    pub fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    #[must_use]
    pub fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(b),
            Self::Big => u64::from_be_bytes(b),
        }
    }
}

/// Block compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    /// Both the standard (8) and the legacy Adobe (32946) code.
    Deflate,
    Other(u16),
}

impl From<u16> for Compression {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::None,
            5 => Self::Lzw,
            8 | 32946 => Self::Deflate,
            other => Self::Other(other),
        }
    }
}

/// Differencing applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    None,
    Horizontal,
    FloatingPoint,
    Other(u16),
}

impl From<u16> for Predictor {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::None,
            2 => Self::Horizontal,
            3 => Self::FloatingPoint,
            other => Self::Other(other),
        }
    }
}

/// Interpretation of sample bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Unsigned,
    Signed,
    Float,
    Other(u16),
}

impl From<u16> for SampleFormat {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::Unsigned,
            2 => Self::Signed,
            3 => Self::Float,
            other => Self::Other(other),
        }
    }
}

/// Affine mapping from pixel to model (CRS) coordinates, axis-aligned.
///
/// Model `x = origin_x + col * res_x`, `y = origin_y + row * res_y`. For
/// north-up rasters `res_y` is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub res_x: f64,
    pub res_y: f64,
}

/// Tiles or strips making up an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    /// Whether blocks are tiles (`true`) or strips.
    pub tiled: bool,
    pub block_width: u32,
    pub block_height: u32,
    /// File offset of each block.
    pub offsets: Vec<u64>,
    /// Stored (compressed) size of each block.
    pub byte_counts: Vec<u64>,
}

impl BlockLayout {
    /// Byte range `(offset, length)` of block `index`.
    #[must_use]
    pub fn block_range(&self, index: usize) -> Option<(u64, u64)> {
        Some((*self.offsets.get(index)?, *self.byte_counts.get(index)?))
    }
}

/// One image of a TIFF file: the full-resolution raster, an overview or a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDirectory {
    pub byte_order: ByteOrder,
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    pub samples_per_pixel: u16,
    /// `true` for `PlanarConfiguration = 2` (one set of blocks per band).
    pub planar: bool,
    pub compression: Compression,
    pub predictor: Predictor,
    pub subfile_type: u32,
    pub layout: BlockLayout,
    /// No-data value declared by the `GDAL_NODATA` tag.
    pub gdal_nodata: Option<f64>,
    pub geo_transform: Option<GeoTransform>,
}

impl ImageDirectory {
    #[must_use]
    pub fn blocks_across(&self) -> u32 {
        self.width.div_ceil(self.layout.block_width)
    }

    #[must_use]
    pub fn blocks_down(&self) -> u32 {
        self.height.div_ceil(self.layout.block_height)
    }

    /// Index into the block arrays of the first-band block at `(bx, by)`.
    #[must_use]
    pub fn block_index(&self, bx: u32, by: u32) -> Option<usize> {
        if bx >= self.blocks_across() || by >= self.blocks_down() {
            return None;
        }
        Some(by as usize * self.blocks_across() as usize + bx as usize)
    }

    /// Rows actually stored in block row `by`. The last strip may be short;
    /// tiles are always padded to the full tile height.
    #[must_use]
    pub fn block_rows(&self, by: u32) -> u32 {
        if self.layout.tiled {
            return self.layout.block_height;
        }
        let start = by.saturating_mul(self.layout.block_height);
        self.height
            .saturating_sub(start)
            .min(self.layout.block_height)
    }

    /// Whether this image is a reduced-resolution overview.
    #[must_use]
    pub fn is_overview(&self) -> bool {
        self.subfile_type & SUBFILE_REDUCED_RESOLUTION != 0
    }

    /// Whether this image is a transparency mask.
    #[must_use]
    pub fn is_mask(&self) -> bool {
        self.subfile_type & SUBFILE_MASK != 0
    }

    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }
}

/// A parsed TIFF header with every image directory in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub big_tiff: bool,
    pub directories: Vec<ImageDirectory>,
}

impl TiffHeader {
    /// The full-resolution image.
    #[must_use]
    pub fn primary(&self) -> &ImageDirectory {
        // `parse_header` never returns an empty directory list.
        &self.directories[0]
    }
}

/// Parse the TIFF header and image directories from a file prefix.
///
/// # Errors
///
/// Returns [`DecodeError::NeedMoreData`] if the prefix is too short, or a
/// format error for malformed files.
pub fn parse_header(prefix: &[u8]) -> DecodeResult<TiffHeader> {
    if prefix.len() < 8 {
        return Err(DecodeError::NeedMoreData { required: 16 });
    }

    let byte_order = match &prefix[0..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        other => {
            return Err(DecodeError::InvalidFormat {
                context: "tiff header",
                detail: format!("invalid byte order marker {other:?}"),
            });
        }
    };
    let reader = ByteReader {
        data: prefix,
        order: byte_order,
    };

    let big_tiff = match reader.u16(2)? {
        42 => false,
        43 => true,
        magic => {
            return Err(DecodeError::InvalidFormat {
                context: "tiff header",
                detail: format!("invalid magic number {magic}"),
            });
        }
    };

    let first_offset = if big_tiff {
        let offset_size = reader.u16(4)?;
        if offset_size != 8 {
            return Err(DecodeError::InvalidFormat {
                context: "bigtiff header",
                detail: format!("offset size {offset_size}, expected 8"),
            });
        }
        reader.u64(8)?
    } else {
        u64::from(reader.u32(4)?)
    };

    let mut directories = Vec::new();
    let mut visited = HashSet::new();
    let mut offset = first_offset;

    while offset != 0 && directories.len() < MAX_DIRECTORIES {
        if !visited.insert(offset) {
            return Err(DecodeError::InvalidFormat {
                context: "ifd chain",
                detail: format!("directory at offset {offset} visited twice"),
            });
        }
        let (entries, next) = reader.directory(offset, big_tiff)?;
        directories.push(build_directory(&reader, &entries, big_tiff)?);
        offset = next;
    }

    if directories.is_empty() {
        return Err(DecodeError::InvalidFormat {
            context: "tiff header",
            detail: "file contains no image directories".to_string(),
        });
    }

    Ok(TiffHeader {
        byte_order,
        big_tiff,
        directories,
    })
}

/// One directory entry before its value is interpreted.
#[derive(Debug, Clone, Copy)]
struct RawEntry {
    tag: u16,
    field_type: u16,
    count: u64,
    /// File offset of the entry's value/offset field.
    field_offset: u64,
}

struct ByteReader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> ByteReader<'a> {
    #[allow(clippy::cast_possible_truncation)]
    fn bytes(&self, offset: u64, len: u64) -> DecodeResult<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| DecodeError::InvalidFormat {
                context: "tiff offsets",
                detail: format!("range {offset}+{len} overflows"),
            })?;
        if end > self.data.len() as u64 {
            return Err(DecodeError::NeedMoreData { required: end });
        }
        Ok(&self.data[offset as usize..end as usize])
    }

    fn array<const N: usize>(&self, offset: u64) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N as u64)?);
        Ok(out)
    }

    fn u16(&self, offset: u64) -> DecodeResult<u16> {
        Ok(self.order.u16(self.array(offset)?))
    }

    fn u32(&self, offset: u64) -> DecodeResult<u32> {
        Ok(self.order.u32(self.array(offset)?))
    }

    fn u64(&self, offset: u64) -> DecodeResult<u64> {
        Ok(self.order.u64(self.array(offset)?))
    }

    /// Read the entries of the directory at `offset` and the next directory offset.
    fn directory(&self, offset: u64, big_tiff: bool) -> DecodeResult<(Vec<RawEntry>, u64)> {
        let (count, first_entry, entry_size) = if big_tiff {
            (self.u64(offset)?, offset + 8, 20)
        } else {
            (u64::from(self.u16(offset)?), offset + 2, 12)
        };
        if count > 4096 {
            return Err(DecodeError::InvalidFormat {
                context: "ifd",
                detail: format!("implausible entry count {count}"),
            });
        }

        let mut entries = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for i in 0..count {
            let at = first_entry + i * entry_size;
            let tag = self.u16(at)?;
            let field_type = self.u16(at + 2)?;
            let (count, field_offset) = if big_tiff {
                (self.u64(at + 4)?, at + 12)
            } else {
                (u64::from(self.u32(at + 4)?), at + 8)
            };
            entries.push(RawEntry {
                tag,
                field_type,
                count,
                field_offset,
            });
        }

        let next_at = first_entry + count * entry_size;
        let next = if big_tiff {
            self.u64(next_at)?
        } else {
            u64::from(self.u32(next_at)?)
        };
        Ok((entries, next))
    }

    /// Locate and return the raw value bytes of an entry.
    fn value_bytes(&self, entry: &RawEntry, big_tiff: bool) -> DecodeResult<&'a [u8]> {
        if entry.count > MAX_TAG_COUNT {
            return Err(DecodeError::InvalidFormat {
                context: "ifd entry",
                detail: format!("tag {} has implausible count {}", entry.tag, entry.count),
            });
        }
        let size = type_size(entry.field_type)? * entry.count;
        let inline = if big_tiff { 8 } else { 4 };
        let location = if size <= inline {
            entry.field_offset
        } else if big_tiff {
            self.u64(entry.field_offset)?
        } else {
            u64::from(self.u32(entry.field_offset)?)
        };
        self.bytes(location, size)
    }

    fn unsigned_values(&self, entry: &RawEntry, big_tiff: bool) -> DecodeResult<Vec<u64>> {
        let bytes = self.value_bytes(entry, big_tiff)?;
        let values = match entry.field_type {
            1 | 7 => bytes.iter().map(|&b| u64::from(b)).collect(),
            3 => bytes
                .chunks_exact(2)
                .map(|c| u64::from(self.order.u16([c[0], c[1]])))
                .collect(),
            4 | 13 => bytes
                .chunks_exact(4)
                .map(|c| u64::from(self.order.u32([c[0], c[1], c[2], c[3]])))
                .collect(),
            16 | 18 => bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    self.order.u64(b)
                })
                .collect(),
            other => {
                return Err(DecodeError::InvalidFormat {
                    context: "ifd entry",
                    detail: format!("tag {} has non-integer type {other}", entry.tag),
                });
            }
        };
        Ok(values)
    }

    fn double_values(&self, entry: &RawEntry, big_tiff: bool) -> DecodeResult<Vec<f64>> {
        if entry.field_type != 12 {
            return Err(DecodeError::InvalidFormat {
                context: "ifd entry",
                detail: format!(
                    "tag {} has type {}, expected DOUBLE",
                    entry.tag, entry.field_type
                ),
            });
        }
        let bytes = self.value_bytes(entry, big_tiff)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_bits(self.order.u64(b))
            })
            .collect())
    }

    fn ascii_value(&self, entry: &RawEntry, big_tiff: bool) -> DecodeResult<String> {
        let bytes = self.value_bytes(entry, big_tiff)?;
        let text = bytes.split(|&b| b == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(text).trim().to_string())
    }
}

/// Size in bytes of one element of a TIFF field type.
fn type_size(field_type: u16) -> DecodeResult<u64> {
    match field_type {
        1 | 2 | 6 | 7 => Ok(1),
        3 | 8 => Ok(2),
        4 | 9 | 11 | 13 => Ok(4),
        5 | 10 | 12 | 16 | 17 | 18 => Ok(8),
        other => Err(DecodeError::InvalidFormat {
            context: "ifd entry",
            detail: format!("unknown field type {other}"),
        }),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn build_directory(
    reader: &ByteReader<'_>,
    entries: &[RawEntry],
    big_tiff: bool,
) -> DecodeResult<ImageDirectory> {
    let find = |tag: u16| entries.iter().find(|e| e.tag == tag);
    let first = |tag: u16| -> DecodeResult<Option<u64>> {
        match find(tag) {
            Some(entry) => Ok(reader.unsigned_values(entry, big_tiff)?.first().copied()),
            None => Ok(None),
        }
    };
    let required = |tag: u16, name: &'static str| -> DecodeResult<u64> {
        first(tag)?.ok_or_else(|| DecodeError::InvalidFormat {
            context: "ifd",
            detail: format!("missing required tag {name}"),
        })
    };

    let width = required(TAG_IMAGE_WIDTH, "ImageWidth")? as u32;
    let height = required(TAG_IMAGE_LENGTH, "ImageLength")? as u32;
    let bits_per_sample = first(TAG_BITS_PER_SAMPLE)?.unwrap_or(1) as u16;
    let samples_per_pixel = first(TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1).max(1) as u16;
    let planar = first(TAG_PLANAR_CONFIGURATION)?.unwrap_or(1) == 2;
    let compression = Compression::from(first(TAG_COMPRESSION)?.unwrap_or(1) as u16);
    let predictor = Predictor::from(first(TAG_PREDICTOR)?.unwrap_or(1) as u16);
    let sample_format = SampleFormat::from(first(TAG_SAMPLE_FORMAT)?.unwrap_or(1) as u16);
    let subfile_type = first(TAG_NEW_SUBFILE_TYPE)?.unwrap_or(0) as u32;

    let tiled = find(TAG_TILE_WIDTH).is_some();
    let (block_width, block_height, offsets_tag, counts_tag) = if tiled {
        (
            required(TAG_TILE_WIDTH, "TileWidth")? as u32,
            required(TAG_TILE_LENGTH, "TileLength")? as u32,
            TAG_TILE_OFFSETS,
            TAG_TILE_BYTE_COUNTS,
        )
    } else {
        let rows = first(TAG_ROWS_PER_STRIP)?.unwrap_or(u64::from(height));
        (
            width,
            rows.min(u64::from(height)).max(1) as u32,
            TAG_STRIP_OFFSETS,
            TAG_STRIP_BYTE_COUNTS,
        )
    };
    if block_width == 0 || block_height == 0 {
        return Err(DecodeError::InvalidFormat {
            context: "ifd",
            detail: "zero-sized blocks".to_string(),
        });
    }

    let read_array = |tag: u16, name: &'static str| -> DecodeResult<Vec<u64>> {
        let entry = find(tag).ok_or_else(|| DecodeError::InvalidFormat {
            context: "ifd",
            detail: format!("missing required tag {name}"),
        })?;
        reader.unsigned_values(entry, big_tiff)
    };
    let offsets = read_array(offsets_tag, "block offsets")?;
    let byte_counts = read_array(counts_tag, "block byte counts")?;

    let layout = BlockLayout {
        tiled,
        block_width,
        block_height,
        offsets,
        byte_counts,
    };

    let gdal_nodata = match find(TAG_GDAL_NODATA) {
        Some(entry) => reader.ascii_value(entry, big_tiff)?.parse::<f64>().ok(),
        None => None,
    };

    let geo_transform = read_geo_transform(reader, entries, big_tiff)?;

    let directory = ImageDirectory {
        byte_order: reader.order,
        width,
        height,
        bits_per_sample,
        sample_format,
        samples_per_pixel,
        planar,
        compression,
        predictor,
        subfile_type,
        layout,
        gdal_nodata,
        geo_transform,
    };

    let bands = if planar {
        usize::from(samples_per_pixel)
    } else {
        1
    };
    let expected =
        directory.blocks_across() as usize * directory.blocks_down() as usize * bands;
    if directory.layout.offsets.len() < expected
        || directory.layout.byte_counts.len() < expected
    {
        return Err(DecodeError::InvalidFormat {
            context: "ifd",
            detail: format!(
                "expected {expected} blocks, found {} offsets and {} byte counts",
                directory.layout.offsets.len(),
                directory.layout.byte_counts.len()
            ),
        });
    }

    Ok(directory)
}

fn read_geo_transform(
    reader: &ByteReader<'_>,
    entries: &[RawEntry],
    big_tiff: bool,
) -> DecodeResult<Option<GeoTransform>> {
    let find = |tag: u16| entries.iter().find(|e| e.tag == tag);

    if let Some(entry) = find(TAG_MODEL_TRANSFORMATION) {
        let m = reader.double_values(entry, big_tiff)?;
        if m.len() < 16 {
            return Err(DecodeError::InvalidFormat {
                context: "ModelTransformation",
                detail: format!("expected 16 values, found {}", m.len()),
            });
        }
        if m[1] != 0.0 || m[4] != 0.0 {
            return Err(DecodeError::Unsupported {
                context: "geotransform",
                detail: "rotated or sheared rasters".to_string(),
            });
        }
        return Ok(Some(GeoTransform {
            origin_x: m[3],
            origin_y: m[7],
            res_x: m[0],
            res_y: m[5],
        }));
    }

    let (Some(scale), Some(tiepoint)) = (find(TAG_MODEL_PIXEL_SCALE), find(TAG_MODEL_TIEPOINT))
    else {
        return Ok(None);
    };
    let scale = reader.double_values(scale, big_tiff)?;
    let tiepoint = reader.double_values(tiepoint, big_tiff)?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(DecodeError::InvalidFormat {
            context: "geokeys",
            detail: "truncated ModelPixelScale or ModelTiepoint".to_string(),
        });
    }

    // Tiepoint maps raster (I, J) to model (X, Y).
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    Ok(Some(GeoTransform {
        origin_x: x - i * scale[0],
        origin_y: y + j * scale[1],
        res_x: scale[0],
        res_y: -scale[1],
    }))
}

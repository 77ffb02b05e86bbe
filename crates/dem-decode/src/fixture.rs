//! Synthetic GeoTIFF writer for tests.
//!
//! Produces small but structurally faithful files: strips or tiles, optional
//! compression and predictors, overviews stored as reduced-resolution
//! subfiles, and either classic or BigTIFF layout. Directories come first and
//! block data follows them, the way cloud-optimized files are arranged.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;

/// Stored sample type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    fn bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    fn format_code(self) -> u16 {
        match self {
            Self::U8 | Self::U16 | Self::U32 => 1,
            Self::I8 | Self::I16 | Self::I32 => 2,
            Self::F32 | Self::F64 => 3,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn encode(self, value: f32, big_endian: bool, out: &mut Vec<u8>) {
        macro_rules! push {
            ($v:expr) => {
                if big_endian {
                    out.extend_from_slice(&$v.to_be_bytes());
                } else {
                    out.extend_from_slice(&$v.to_le_bytes());
                }
            };
        }
        match self {
            Self::U8 => push!(value as u8),
            Self::I8 => push!(value as i8),
            Self::U16 => push!(value as u16),
            Self::I16 => push!(value as i16),
            Self::U32 => push!(value as u32),
            Self::I32 => push!(value as i32),
            Self::F32 => push!(value),
            Self::F64 => push!(f64::from(value)),
        }
    }
}

/// Block compression written by the fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureCompression {
    None,
    Deflate,
    Lzw,
}

impl FixtureCompression {
    fn code(self) -> u16 {
        match self {
            Self::None => 1,
            Self::Lzw => 5,
            Self::Deflate => 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    Strips { rows: u32 },
    Tiles { width: u32, height: u32 },
}

/// Builder for an in-memory GeoTIFF.
#[derive(Debug, Clone)]
pub struct GeoTiffBuilder {
    width: u32,
    height: u32,
    samples: Vec<f32>,
    sample_type: SampleType,
    layout: Option<Layout>,
    compression: FixtureCompression,
    predictor: u16,
    big_endian: bool,
    big_tiff: bool,
    geo: Option<[f64; 4]>,
    gdal_nodata: Option<String>,
    overviews: Vec<(u32, u32)>,
}

impl GeoTiffBuilder {
    /// A single-band float raster stored as one strip, without georeferencing.
    ///
    /// # Panics
    ///
    /// Panics if `samples` does not hold `width * height` values.
    #[must_use]
    pub fn new(width: u32, height: u32, samples: Vec<f32>) -> Self {
        assert_eq!(
            samples.len(),
            width as usize * height as usize,
            "sample count must match raster size"
        );
        Self {
            width,
            height,
            samples,
            sample_type: SampleType::F32,
            layout: None,
            compression: FixtureCompression::None,
            predictor: 1,
            big_endian: false,
            big_tiff: false,
            geo: None,
            gdal_nodata: None,
            overviews: Vec::new(),
        }
    }

    #[must_use]
    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    /// North-up georeferencing: top-left corner and positive pixel sizes.
    #[must_use]
    pub fn geo(mut self, origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        self.geo = Some([origin_x, origin_y, pixel_width, pixel_height]);
        self
    }

    #[must_use]
    pub fn tiled(mut self, width: u32, height: u32) -> Self {
        self.layout = Some(Layout::Tiles { width, height });
        self
    }

    #[must_use]
    pub fn strips(mut self, rows: u32) -> Self {
        self.layout = Some(Layout::Strips { rows });
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: FixtureCompression) -> Self {
        self.compression = compression;
        self
    }

    /// TIFF predictor code: 1 (none), 2 (horizontal) or 3 (floating point).
    #[must_use]
    pub fn predictor(mut self, predictor: u16) -> Self {
        self.predictor = predictor;
        self
    }

    #[must_use]
    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    #[must_use]
    pub fn big_tiff(mut self) -> Self {
        self.big_tiff = true;
        self
    }

    /// Write a `GDAL_NODATA` tag with the given text on every image.
    #[must_use]
    pub fn gdal_nodata(mut self, value: &str) -> Self {
        self.gdal_nodata = Some(value.to_string());
        self
    }

    /// Add a nearest-neighbour overview of the given size.
    #[must_use]
    pub fn overview(mut self, width: u32, height: u32) -> Self {
        self.overviews.push((width, height));
        self
    }

    /// Serialize the file.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let layout = self.layout.unwrap_or(Layout::Strips { rows: self.height.max(1) });

        let mut images = vec![(self.width, self.height, self.samples.clone(), false)];
        for &(w, h) in &self.overviews {
            images.push((w, h, self.resample(w, h), true));
        }

        let blocks: Vec<Vec<Vec<u8>>> = images
            .iter()
            .map(|(w, h, samples, _)| self.encode_blocks(*w, *h, samples, layout))
            .collect();

        let header_len: u64 = if self.big_tiff { 16 } else { 8 };

        // Directory sizes do not depend on the offsets stored in them.
        let ifd_sizes: Vec<u64> = images
            .iter()
            .zip(&blocks)
            .map(|((w, h, _, overview), image_blocks)| {
                let zeros = vec![0; image_blocks.len()];
                let entries = self.entries(*w, *h, *overview, layout, &zeros, &zeros);
                self.encode_ifd(entries, 0, 0).len() as u64
            })
            .collect();

        let mut ifd_offsets = Vec::with_capacity(images.len());
        let mut cursor = header_len;
        for size in &ifd_sizes {
            ifd_offsets.push(cursor);
            cursor += size;
        }

        let mut file = Vec::new();
        self.write_header(&mut file, header_len);

        let mut data = Vec::new();
        for (index, ((w, h, _, overview), image_blocks)) in images.iter().zip(&blocks).enumerate() {
            let mut offsets = Vec::with_capacity(image_blocks.len());
            let mut counts = Vec::with_capacity(image_blocks.len());
            for block in image_blocks {
                offsets.push(cursor + data.len() as u64);
                counts.push(block.len() as u64);
                data.extend_from_slice(block);
            }
            let next = ifd_offsets.get(index + 1).copied().unwrap_or(0);
            let entries = self.entries(*w, *h, *overview, layout, &offsets, &counts);
            file.extend(self.encode_ifd(entries, ifd_offsets[index], next));
        }

        file.extend(data);
        file
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_header(&self, file: &mut Vec<u8>, first_ifd: u64) {
        file.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        let mut writer = FieldWriter {
            out: file,
            big_endian: self.big_endian,
        };
        if self.big_tiff {
            writer.u16(43);
            writer.u16(8);
            writer.u16(0);
            writer.u64(first_ifd);
        } else {
            writer.u16(42);
            writer.u32(first_ifd as u32);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn resample(&self, width: u32, height: u32) -> Vec<f32> {
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let src_y = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as usize;
            for x in 0..width {
                let src_x =
                    (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as usize;
                out.push(self.samples[src_y * self.width as usize + src_x]);
            }
        }
        out
    }

    fn encode_blocks(&self, width: u32, height: u32, samples: &[f32], layout: Layout) -> Vec<Vec<u8>> {
        let sample_at = |x: u32, y: u32| -> f32 {
            if x < width && y < height {
                samples[(y * width + x) as usize]
            } else {
                0.0
            }
        };

        let mut blocks = Vec::new();
        match layout {
            Layout::Strips { rows } => {
                let rows = rows.max(1);
                for top in (0..height).step_by(rows as usize) {
                    let strip_rows = rows.min(height - top);
                    let block: Vec<Vec<f32>> = (top..top + strip_rows)
                        .map(|y| (0..width).map(|x| sample_at(x, y)).collect())
                        .collect();
                    blocks.push(self.encode_block(&block));
                }
            }
            Layout::Tiles {
                width: tile_w,
                height: tile_h,
            } => {
                for by in 0..height.div_ceil(tile_h) {
                    for bx in 0..width.div_ceil(tile_w) {
                        let block: Vec<Vec<f32>> = (0..tile_h)
                            .map(|r| {
                                (0..tile_w)
                                    .map(|c| sample_at(bx * tile_w + c, by * tile_h + r))
                                    .collect()
                            })
                            .collect();
                        blocks.push(self.encode_block(&block));
                    }
                }
            }
        }
        blocks
    }

    fn encode_block(&self, rows: &[Vec<f32>]) -> Vec<u8> {
        let bytes = self.sample_type.bytes();
        let mut raw = Vec::new();
        for row in rows {
            let mut encoded = Vec::with_capacity(row.len() * bytes);
            match self.predictor {
                3 => {
                    for &value in row {
                        self.sample_type.encode(value, false, &mut encoded);
                    }
                    apply_floating_point(&mut encoded, bytes);
                }
                2 => {
                    for &value in row {
                        self.sample_type.encode(value, self.big_endian, &mut encoded);
                    }
                    apply_horizontal(&mut encoded, bytes, self.big_endian);
                }
                _ => {
                    for &value in row {
                        self.sample_type.encode(value, self.big_endian, &mut encoded);
                    }
                }
            }
            raw.extend(encoded);
        }

        match self.compression {
            FixtureCompression::None => raw,
            FixtureCompression::Lzw => lzw_compress(&raw),
            FixtureCompression::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(&raw)
                    .expect("writing to a Vec cannot fail");
                encoder.finish().expect("writing to a Vec cannot fail")
            }
        }
    }

    fn entries(
        &self,
        width: u32,
        height: u32,
        overview: bool,
        layout: Layout,
        offsets: &[u64],
        counts: &[u64],
    ) -> Vec<Entry> {
        #[allow(clippy::cast_possible_truncation)]
        let bits = (self.sample_type.bytes() * 8) as u16;
        let mut entries = vec![
            Entry::long(254, u32::from(overview)),
            Entry::long(256, width),
            Entry::long(257, height),
            Entry::short(258, bits),
            Entry::short(259, self.compression.code()),
            // BlackIsZero.
            Entry::short(262, 1),
            Entry::short(277, 1),
            Entry::short(284, 1),
            Entry::short(339, self.sample_type.format_code()),
        ];
        if self.predictor != 1 {
            entries.push(Entry::short(317, self.predictor));
        }

        let (offsets_tag, counts_tag) = match layout {
            Layout::Strips { rows } => {
                entries.push(Entry::long(278, rows.max(1)));
                (273, 279)
            }
            Layout::Tiles {
                width: tile_w,
                height: tile_h,
            } => {
                entries.push(Entry::long(322, tile_w));
                entries.push(Entry::long(323, tile_h));
                (324, 325)
            }
        };
        entries.push(self.offset_array(offsets_tag, offsets));
        entries.push(self.offset_array(counts_tag, counts));

        if let (Some([origin_x, origin_y, pixel_w, pixel_h]), false) = (self.geo, overview) {
            entries.push(Entry {
                tag: 33550,
                value: Value::Double(vec![pixel_w, pixel_h, 0.0]),
            });
            entries.push(Entry {
                tag: 33922,
                value: Value::Double(vec![0.0, 0.0, 0.0, origin_x, origin_y, 0.0]),
            });
        }
        if let Some(nodata) = &self.gdal_nodata {
            entries.push(Entry {
                tag: 42113,
                value: Value::Ascii(nodata.clone()),
            });
        }

        entries.sort_by_key(|e| e.tag);
        entries
    }

    #[allow(clippy::cast_possible_truncation)]
    fn offset_array(&self, tag: u16, values: &[u64]) -> Entry {
        let value = if self.big_tiff {
            Value::Long8(values.to_vec())
        } else {
            Value::Long(values.iter().map(|&v| v as u32).collect())
        };
        Entry { tag, value }
    }

    /// Encode one directory located at `at`, with out-of-line values placed
    /// directly after the entry table.
    #[allow(clippy::cast_possible_truncation)]
    fn encode_ifd(&self, entries: Vec<Entry>, at: u64, next: u64) -> Vec<u8> {
        let (entry_size, count_size, inline) = if self.big_tiff { (20, 8, 8) } else { (12, 2, 4) };
        // Entry count, entries, then the next-directory pointer (4 or 8 bytes).
        let table_len = count_size + entries.len() as u64 * entry_size + count_size.max(4);

        let mut table = Vec::new();
        let mut external = Vec::new();
        {
            let mut writer = FieldWriter {
                out: &mut table,
                big_endian: self.big_endian,
            };
            if self.big_tiff {
                writer.u64(entries.len() as u64);
            } else {
                writer.u16(entries.len() as u16);
            }
        }

        for entry in &entries {
            let bytes = entry.value.encode(self.big_endian);
            let mut writer = FieldWriter {
                out: &mut table,
                big_endian: self.big_endian,
            };
            writer.u16(entry.tag);
            writer.u16(entry.value.type_code());
            if self.big_tiff {
                writer.u64(entry.value.count());
            } else {
                writer.u32(entry.value.count() as u32);
            }

            if bytes.len() as u64 <= inline {
                let mut padded = bytes;
                padded.resize(inline as usize, 0);
                writer.out.extend(padded);
            } else {
                let location = at + table_len + external.len() as u64;
                if self.big_tiff {
                    writer.u64(location);
                } else {
                    writer.u32(location as u32);
                }
                external.extend(bytes);
                if external.len() % 2 == 1 {
                    external.push(0);
                }
            }
        }

        let mut writer = FieldWriter {
            out: &mut table,
            big_endian: self.big_endian,
        };
        if self.big_tiff {
            writer.u64(next);
        } else {
            writer.u32(next as u32);
        }
        debug_assert_eq!(table.len() as u64, table_len);

        table.extend(external);
        table
    }
}

#[derive(Debug, Clone)]
enum Value {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Double(Vec<f64>),
    Ascii(String),
}

impl Value {
    fn type_code(&self) -> u16 {
        match self {
            Self::Ascii(_) => 2,
            Self::Short(_) => 3,
            Self::Long(_) => 4,
            Self::Double(_) => 12,
            Self::Long8(_) => 16,
        }
    }

    fn count(&self) -> u64 {
        match self {
            Self::Short(v) => v.len() as u64,
            Self::Long(v) => v.len() as u64,
            Self::Long8(v) => v.len() as u64,
            Self::Double(v) => v.len() as u64,
            // Includes the terminating NUL.
            Self::Ascii(s) => s.len() as u64 + 1,
        }
    }

    fn encode(&self, big_endian: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = FieldWriter {
            out: &mut out,
            big_endian,
        };
        match self {
            Self::Short(v) => v.iter().for_each(|&x| writer.u16(x)),
            Self::Long(v) => v.iter().for_each(|&x| writer.u32(x)),
            Self::Long8(v) => v.iter().for_each(|&x| writer.u64(x)),
            Self::Double(v) => v.iter().for_each(|&x| writer.u64(x.to_bits())),
            Self::Ascii(s) => {
                writer.out.extend_from_slice(s.as_bytes());
                writer.out.push(0);
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
struct Entry {
    tag: u16,
    value: Value,
}

impl Entry {
    fn short(tag: u16, value: u16) -> Self {
        Self {
            tag,
            value: Value::Short(vec![value]),
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self {
            tag,
            value: Value::Long(vec![value]),
        }
    }
}

struct FieldWriter<'a> {
    out: &'a mut Vec<u8>,
    big_endian: bool,
}

impl FieldWriter<'_> {
    fn u16(&mut self, v: u16) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&bytes);
    }

    fn u32(&mut self, v: u32) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&bytes);
    }

    fn u64(&mut self, v: u64) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&bytes);
    }
}

/// Horizontal differencing of one row, last sample first.
fn apply_horizontal(row: &mut [u8], bytes: usize, big_endian: bool) {
    fn read(row: &[u8], at: usize, bytes: usize, big_endian: bool) -> u64 {
        let mut value = 0u64;
        for i in 0..bytes {
            let b = if big_endian { row[at + i] } else { row[at + bytes - 1 - i] };
            value = (value << 8) | u64::from(b);
        }
        value
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(row: &mut [u8], at: usize, bytes: usize, big_endian: bool, value: u64) {
        for i in 0..bytes {
            let b = (value >> (8 * (bytes - 1 - i))) as u8;
            if big_endian {
                row[at + i] = b;
            } else {
                row[at + bytes - 1 - i] = b;
            }
        }
    }

    let mask = if bytes >= 8 { u64::MAX } else { (1u64 << (bytes * 8)) - 1 };
    let samples = row.len() / bytes;
    for i in (1..samples).rev() {
        let cur = read(row, i * bytes, bytes, big_endian);
        let prev = read(row, (i - 1) * bytes, bytes, big_endian);
        write(row, i * bytes, bytes, big_endian, cur.wrapping_sub(prev) & mask);
    }
}

/// Floating point predictor for one little-endian row: split into byte
/// planes (most significant first), then difference bytewise.
fn apply_floating_point(row: &mut [u8], bytes: usize) {
    let words = row.len() / bytes;
    let source = row.to_vec();
    for word in 0..words {
        for plane in 0..bytes {
            row[plane * words + word] = source[word * bytes + (bytes - 1 - plane)];
        }
    }
    for i in (1..row.len()).rev() {
        row[i] = row[i].wrapping_sub(row[i - 1]);
    }
}

/// TIFF LZW compression with early code widening.
#[must_use]
pub fn lzw_compress(data: &[u8]) -> Vec<u8> {
    const CLEAR: u16 = 256;
    const EOI: u16 = 257;
    const FIRST: u16 = 258;
    const LIMIT: u16 = 4094;

    let mut bits = BitWriter::default();
    let mut width = 9u8;
    let mut next = FIRST;
    let mut table: HashMap<(u16, u8), u16> = HashMap::new();

    bits.write(CLEAR, width);

    let Some((&first, rest)) = data.split_first() else {
        bits.write(EOI, width);
        return bits.finish();
    };

    let mut current = u16::from(first);
    for &byte in rest {
        if let Some(&code) = table.get(&(current, byte)) {
            current = code;
            continue;
        }
        bits.write(current, width);
        table.insert((current, byte), next);
        next += 1;
        if next == LIMIT {
            bits.write(CLEAR, width);
            table.clear();
            next = FIRST;
            width = 9;
        } else if next >= 1 << width {
            width += 1;
        }
        current = u16::from(byte);
    }

    bits.write(current, width);
    // The decoder adds one more entry after the final code and may widen
    // before reading end-of-information.
    next += 1;
    if next < LIMIT && next >= 1 << width {
        width += 1;
    }
    bits.write(EOI, width);
    bits.finish()
}

#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    len: u8,
}

impl BitWriter {
    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, code: u16, width: u8) {
        self.acc = (self.acc << width) | u32::from(code);
        self.len += width;
        while self.len >= 8 {
            self.len -= 8;
            self.out.push((self.acc >> self.len) as u8);
        }
        self.acc &= (1 << self.len) - 1;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn finish(mut self) -> Vec<u8> {
        if self.len > 0 {
            self.out.push((self.acc << (8 - self.len)) as u8);
        }
        self.out
    }
}

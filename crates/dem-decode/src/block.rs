//! Tile and strip decoding.
//!
//! A stored block goes through three steps: decompression, predictor
//! reversal, and sample conversion to `f32`. Only the first band is kept.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{DecodeError, DecodeResult};
use crate::tiff::{ByteOrder, Compression, ImageDirectory, Predictor, SampleFormat};

/// Decode one stored block of `rows` rows into first-band samples.
///
/// The result holds `block_width * rows` samples in row-major order. Blocks
/// whose payload is shorter than expected are padded with zeros, matching how
/// writers truncate trailing empty data.
///
/// # Errors
///
/// Returns an error for unsupported compression, predictors or sample
/// formats, and for corrupt compressed data.
pub fn decode_block(dir: &ImageDirectory, rows: u32, stored: &[u8]) -> DecodeResult<Vec<f32>> {
    if !matches!(dir.bits_per_sample, 8 | 16 | 32 | 64) {
        return Err(DecodeError::Unsupported {
            context: "sample format",
            detail: format!("{}-bit samples", dir.bits_per_sample),
        });
    }
    let mut raw = decompress(dir.compression, stored)?;

    // Planar images store one band per block, so every pixel holds one sample.
    let samples_per_pixel = if dir.planar {
        1
    } else {
        usize::from(dir.samples_per_pixel.max(1))
    };
    let bytes_per_sample = dir.bytes_per_sample();
    let row_samples = dir.layout.block_width as usize * samples_per_pixel;
    let row_bytes = row_samples * bytes_per_sample;
    if row_bytes == 0 {
        return Err(DecodeError::InvalidFormat {
            context: "block",
            detail: "zero-width blocks".to_string(),
        });
    }
    let expected = row_bytes
        .checked_mul(rows as usize)
        .ok_or_else(|| DecodeError::InvalidFormat {
            context: "block",
            detail: format!("{rows} rows of {row_bytes} bytes overflow"),
        })?;
    if raw.len() < expected {
        raw.resize(expected, 0);
    }
    raw.truncate(expected);

    let order = match dir.predictor {
        Predictor::None => dir.byte_order,
        Predictor::Horizontal => {
            undo_horizontal(
                &mut raw,
                row_bytes,
                samples_per_pixel,
                bytes_per_sample,
                dir.byte_order,
            )?;
            dir.byte_order
        }
        Predictor::FloatingPoint => {
            undo_floating_point(&mut raw, row_bytes, samples_per_pixel, bytes_per_sample);
            // Reassembled floating point rows are always little-endian.
            ByteOrder::Little
        }
        Predictor::Other(code) => {
            return Err(DecodeError::Unsupported {
                context: "predictor",
                detail: code.to_string(),
            });
        }
    };

    decode_samples(
        &raw,
        dir.bits_per_sample,
        dir.sample_format,
        order,
        samples_per_pixel,
    )
}

/// Decompress a stored block.
///
/// # Errors
///
/// Returns an error for unknown schemes or corrupt data.
pub fn decompress(compression: Compression, data: &[u8]) -> DecodeResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Deflate => {
            let mut out = Vec::new();
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| DecodeError::InvalidFormat {
                    context: "deflate block",
                    detail: e.to_string(),
                })?;
            Ok(out)
        }
        Compression::Lzw => decompress_lzw(data),
        Compression::Other(code) => Err(DecodeError::Unsupported {
            context: "compression",
            detail: code.to_string(),
        }),
    }
}

const LZW_CLEAR: u16 = 256;
const LZW_EOI: u16 = 257;
const LZW_FIRST: usize = 258;
const LZW_MAX_BITS: u8 = 12;

/// TIFF-flavored LZW: MSB-first codes, 9 to 12 bits, "early change" widening.
fn decompress_lzw(data: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut table: Vec<Vec<u8>> = Vec::with_capacity(4096);
    reset_lzw_table(&mut table);

    let mut bits = BitReader::new(data);
    let mut code_size = 9u8;
    let mut prev: Option<usize> = None;

    while let Some(code) = bits.read(code_size) {
        if code == LZW_EOI {
            break;
        }
        if code == LZW_CLEAR {
            reset_lzw_table(&mut table);
            code_size = 9;
            prev = None;
            continue;
        }

        let code = usize::from(code);
        let entry = if code < table.len() {
            table[code].clone()
        } else if code == table.len() {
            let Some(p) = prev else {
                return Err(DecodeError::InvalidFormat {
                    context: "lzw block",
                    detail: "first code after clear is not a literal".to_string(),
                });
            };
            let mut e = table[p].clone();
            e.push(table[p][0]);
            e
        } else {
            return Err(DecodeError::InvalidFormat {
                context: "lzw block",
                detail: format!("code {code} out of range (table size {})", table.len()),
            });
        };

        output.extend_from_slice(&entry);

        if let Some(p) = prev {
            if table.len() < 4096 {
                let mut new_entry = table[p].clone();
                new_entry.push(entry[0]);
                table.push(new_entry);
                if table.len() + 1 >= 1 << code_size && code_size < LZW_MAX_BITS {
                    code_size += 1;
                }
            }
        }

        prev = Some(code);
    }

    Ok(output)
}

fn reset_lzw_table(table: &mut Vec<Vec<u8>>) {
    table.clear();
    table.extend((0..=255u8).map(|b| vec![b]));
    // Placeholders for the clear and end-of-information codes.
    table.push(Vec::new());
    table.push(Vec::new());
    debug_assert_eq!(table.len(), LZW_FIRST);
}

struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn read(&mut self, count: u8) -> Option<u16> {
        let mut value = 0u16;
        for _ in 0..count {
            let byte = *self.data.get(self.bit_pos / 8)?;
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | u16::from(bit);
            self.bit_pos += 1;
        }
        Some(value)
    }
}

/// Reverse horizontal differencing (predictor 2) in place.
fn undo_horizontal(
    raw: &mut [u8],
    row_bytes: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
    order: ByteOrder,
) -> DecodeResult<()> {
    let stride = samples_per_pixel * bytes_per_sample;
    for row in raw.chunks_exact_mut(row_bytes) {
        match bytes_per_sample {
            1 => {
                for i in stride..row.len() {
                    row[i] = row[i].wrapping_add(row[i - stride]);
                }
            }
            2 => {
                for i in (stride..row.len()).step_by(2) {
                    let prev = order.u16([row[i - stride], row[i - stride + 1]]);
                    let cur = order.u16([row[i], row[i + 1]]);
                    let sum = cur.wrapping_add(prev);
                    let bytes = match order {
                        ByteOrder::Little => sum.to_le_bytes(),
                        ByteOrder::Big => sum.to_be_bytes(),
                    };
                    row[i..i + 2].copy_from_slice(&bytes);
                }
            }
            4 => {
                for i in (stride..row.len()).step_by(4) {
                    let mut prev = [0u8; 4];
                    prev.copy_from_slice(&row[i - stride..i - stride + 4]);
                    let mut cur = [0u8; 4];
                    cur.copy_from_slice(&row[i..i + 4]);
                    let sum = order.u32(cur).wrapping_add(order.u32(prev));
                    let bytes = match order {
                        ByteOrder::Little => sum.to_le_bytes(),
                        ByteOrder::Big => sum.to_be_bytes(),
                    };
                    row[i..i + 4].copy_from_slice(&bytes);
                }
            }
            other => {
                return Err(DecodeError::Unsupported {
                    context: "horizontal predictor",
                    detail: format!("{}-bit samples", other * 8),
                });
            }
        }
    }
    Ok(())
}

/// Reverse the floating point predictor (predictor 3) in place.
///
/// Rows are stored as byte planes, most significant byte first, each plane
/// differenced bytewise. The output row is little-endian.
fn undo_floating_point(
    raw: &mut [u8],
    row_bytes: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
) {
    let words = row_bytes / bytes_per_sample;
    let mut planes = vec![0u8; row_bytes];
    for row in raw.chunks_exact_mut(row_bytes) {
        for i in samples_per_pixel..row.len() {
            row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
        }
        planes.copy_from_slice(row);
        for word in 0..words {
            for byte in 0..bytes_per_sample {
                row[word * bytes_per_sample + byte] =
                    planes[(bytes_per_sample - byte - 1) * words + word];
            }
        }
    }
}

/// Convert raw sample bytes to `f32`, keeping the first of every
/// `samples_per_pixel` samples.
fn decode_samples(
    raw: &[u8],
    bits: u16,
    format: SampleFormat,
    order: ByteOrder,
    samples_per_pixel: usize,
) -> DecodeResult<Vec<f32>> {
    let bytes_per_sample = usize::from(bits).div_ceil(8);
    let pixel_bytes = bytes_per_sample * samples_per_pixel;
    let pixels = raw.chunks_exact(pixel_bytes).map(|p| &p[..bytes_per_sample]);

    let samples = match (bits, format) {
        (8, SampleFormat::Unsigned) => pixels.map(|b| f32::from(b[0])).collect(),
        (8, SampleFormat::Signed) => pixels.map(|b| f32::from(b[0].cast_signed())).collect(),
        (16, SampleFormat::Unsigned) => pixels
            .map(|b| f32::from(order.u16([b[0], b[1]])))
            .collect(),
        (16, SampleFormat::Signed) => pixels
            .map(|b| f32::from(order.u16([b[0], b[1]]).cast_signed()))
            .collect(),
        (32, SampleFormat::Unsigned) => pixels
            .map(|b| order.u32([b[0], b[1], b[2], b[3]]) as f32)
            .collect(),
        (32, SampleFormat::Signed) => pixels
            .map(|b| order.u32([b[0], b[1], b[2], b[3]]).cast_signed() as f32)
            .collect(),
        (32, SampleFormat::Float) => pixels
            .map(|b| f32::from_bits(order.u32([b[0], b[1], b[2], b[3]])))
            .collect(),
        #[allow(clippy::cast_possible_truncation)]
        (64, SampleFormat::Float) => pixels
            .map(|b| {
                let mut word = [0u8; 8];
                word.copy_from_slice(b);
                f64::from_bits(order.u64(word)) as f32
            })
            .collect(),
        (bits, format) => {
            return Err(DecodeError::Unsupported {
                context: "sample format",
                detail: format!("{bits}-bit {format:?} samples"),
            });
        }
    };
    Ok(samples)
}

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::ElevationError;

use super::geotiff::{ChunkLayout, Compression, RasterHeader, SampleKind};

/// Which chunk (strip or tile) a pixel falls in, and its offset within
/// the decompressed chunk.
pub struct ChunkLocation {
    pub chunk_index: usize,
    pub offset_in_chunk: usize,
}

pub fn locate_chunk(layout: &ChunkLayout, col: u32, row: u32) -> ChunkLocation {
    let chunk_col = col / layout.chunk_width;
    let chunk_row = row / layout.chunk_height;
    let chunk_index = (chunk_row * layout.chunks_across + chunk_col) as usize;

    let within_col = col % layout.chunk_width;
    let within_row = row % layout.chunk_height;
    let offset_in_chunk = (within_row * layout.chunk_width + within_col) as usize;

    ChunkLocation {
        chunk_index,
        offset_in_chunk,
    }
}

fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>, ElevationError> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Deflate => {
            let mut decoder = ZlibDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| ElevationError::UnsupportedCrs {
                crs: format!("failed to inflate raster chunk: {e}"),
            })?;
            Ok(out)
        }
    }
}

fn read_sample(bytes: &[u8], offset_samples: usize, kind: SampleKind) -> Option<f64> {
    let byte_len = kind.byte_len() as usize;
    let start = offset_samples * byte_len;
    let end = start + byte_len;
    let slice = bytes.get(start..end)?;

    Some(match kind {
        SampleKind::Int16 => i16::from_le_bytes(slice.try_into().ok()?) as f64,
        SampleKind::UInt16 => u16::from_le_bytes(slice.try_into().ok()?) as f64,
        SampleKind::Int32 => i32::from_le_bytes(slice.try_into().ok()?) as f64,
        SampleKind::Float32 => f32::from_le_bytes(slice.try_into().ok()?) as f64,
        SampleKind::Float64 => f64::from_le_bytes(slice.try_into().ok()?),
    })
}

/// True if `value` is the declared nodata sentinel. Exact equality for
/// integer rasters; a relative epsilon for floats, per spec §4.4.
pub fn is_nodata(value: f64, nodata: Option<f64>, kind: SampleKind) -> bool {
    let Some(nodata) = nodata else { return false };
    match kind {
        SampleKind::Float32 | SampleKind::Float64 => {
            (value - nodata).abs() < 1e-6 * nodata.abs().max(1.0)
        }
        _ => value == nodata,
    }
}

/// Decodes one sample from a raw (possibly compressed) chunk buffer.
pub fn decode_sample(
    header: &RasterHeader,
    chunk_bytes: &[u8],
    location: ChunkLocation,
) -> Result<Option<f64>, ElevationError> {
    let decompressed = decompress(chunk_bytes, header.compression)?;
    let Some(raw) = read_sample(&decompressed, location.offset_in_chunk, header.sample_kind) else {
        return Ok(None);
    };

    if is_nodata(raw, header.nodata, header.sample_kind) {
        return Ok(None);
    }
    Ok(Some(raw))
}

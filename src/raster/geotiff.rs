use std::io::Cursor;

use tiff::decoder::Decoder;
use tiff::tags::Tag;

use crate::error::ElevationError;
use crate::geo::Crs;

/// Affine world = pixel transform, in the 6-coefficient form GDAL/GeoTIFF
/// use: `X = a*col + b*row + d`, `Y = e*col + f*row + h`. `(col, row) =
/// (0, 0)` refers to the upper-left corner of the top-left pixel (spec
/// §4.4's pixel-corner convention).
#[derive(Debug, Clone, Copy)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
    pub h: f64,
}

impl AffineTransform {
    /// Inverse transform: world `(x, y)` to fractional pixel `(col, row)`.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.a * self.f - self.b * self.e;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.d;
        let dy = y - self.h;
        let col = (self.f * dx - self.b * dy) / det;
        let row = (self.a * dy - self.e * dx) / det;
        Some((col, row))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Int16,
    UInt16,
    Int32,
    Float32,
    Float64,
}

impl SampleKind {
    fn from_tags(sample_format: u16, bits_per_sample: u16) -> Result<Self, ElevationError> {
        match (sample_format, bits_per_sample) {
            (1, 16) => Ok(SampleKind::UInt16),
            (2, 16) => Ok(SampleKind::Int16),
            (2, 32) => Ok(SampleKind::Int32),
            (3, 32) => Ok(SampleKind::Float32),
            (3, 64) => Ok(SampleKind::Float64),
            // Unsigned is the TIFF default when the tag is absent.
            (0, 16) => Ok(SampleKind::UInt16),
            other => Err(ElevationError::UnsupportedCrs {
                crs: format!("unsupported sample format/bits pair {other:?}"),
            }),
        }
    }

    pub fn byte_len(&self) -> u64 {
        match self {
            SampleKind::Int16 | SampleKind::UInt16 => 2,
            SampleKind::Int32 | SampleKind::Float32 => 4,
            SampleKind::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflate,
}

/// Where one raster sample lives: the chunk (strip or tile) byte range
/// that contains it, plus enough layout info to locate the sample within
/// the decompressed chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLayout {
    pub chunk_width: u32,
    pub chunk_height: u32,
    pub chunks_across: u32,
}

#[derive(Debug)]
pub struct RasterHeader {
    pub width: u32,
    pub height: u32,
    pub native_crs: Crs,
    pub transform: AffineTransform,
    pub nodata: Option<f64>,
    pub sample_kind: SampleKind,
    pub compression: Compression,
    pub chunk_layout: ChunkLayout,
    pub chunk_offsets: Vec<u64>,
    pub chunk_byte_counts: Vec<u64>,
}

const GEO_KEY_DIRECTORY: Tag = Tag::Unknown(34735);
const GEO_DOUBLE_PARAMS: Tag = Tag::Unknown(34736);
const MODEL_PIXEL_SCALE: Tag = Tag::Unknown(33550);
const MODEL_TIEPOINT: Tag = Tag::Unknown(33922);
const MODEL_TRANSFORMATION: Tag = Tag::Unknown(34264);
const GDAL_NODATA: Tag = Tag::Unknown(42113);

const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Parses a GeoTIFF header from an in-memory buffer (spec §4.4: a single
/// ranged read, typically ≤ 64 KiB, is enough to cover the IFD and the
/// geo tags for any raster not pathologically large).
pub fn parse_header(buf: &[u8]) -> Result<RasterHeader, ElevationError> {
    let mut decoder = Decoder::new(Cursor::new(buf)).map_err(|e| ElevationError::UnsupportedCrs {
        crs: format!("not a readable TIFF: {e}"),
    })?;

    let (width, height) = decoder.dimensions().map_err(|e| ElevationError::UnsupportedCrs {
        crs: format!("missing image dimensions: {e}"),
    })?;

    let transform = read_transform(&mut decoder)?;
    let native_crs = read_crs(&mut decoder)?;
    let nodata = read_nodata(&mut decoder);
    let sample_kind = read_sample_kind(&mut decoder)?;
    let (compression, chunk_layout, chunk_offsets, chunk_byte_counts) = read_chunk_layout(&mut decoder, width, height)?;

    Ok(RasterHeader {
        width,
        height,
        native_crs,
        transform,
        nodata,
        sample_kind,
        compression,
        chunk_layout,
        chunk_offsets,
        chunk_byte_counts,
    })
}

fn read_transform(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<AffineTransform, ElevationError> {
    if let Ok(m) = decoder.get_tag_f64_vec(MODEL_TRANSFORMATION)
        && m.len() >= 16
    {
        return Ok(AffineTransform {
            a: m[0],
            b: m[1],
            d: m[3],
            e: m[4],
            f: m[5],
            h: m[7],
        });
    }

    let scale = decoder
        .get_tag_f64_vec(MODEL_PIXEL_SCALE)
        .map_err(|e| ElevationError::UnsupportedCrs {
            crs: format!("missing ModelPixelScale/ModelTransformation tag: {e}"),
        })?;
    let tiepoint = decoder
        .get_tag_f64_vec(MODEL_TIEPOINT)
        .map_err(|e| ElevationError::UnsupportedCrs {
            crs: format!("missing ModelTiepoint tag: {e}"),
        })?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(ElevationError::UnsupportedCrs {
            crs: "malformed ModelPixelScale/ModelTiepoint tags".to_string(),
        });
    }

    let (i, j, x0, y0) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let (sx, sy) = (scale[0], scale[1]);

    Ok(AffineTransform {
        a: sx,
        b: 0.0,
        d: x0 - i * sx,
        e: 0.0,
        f: -sy,
        h: y0 + j * sy,
    })
}

fn read_crs(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Crs, ElevationError> {
    let keys = decoder
        .get_tag_u32_vec(GEO_KEY_DIRECTORY)
        .or_else(|_| decoder.get_tag_u16_vec(GEO_KEY_DIRECTORY).map(|v| v.into_iter().map(u32::from).collect()))
        .map_err(|e| ElevationError::UnsupportedCrs {
            crs: format!("missing GeoKeyDirectory tag: {e}"),
        })?;

    // Header is 4 shorts, then one 4-short entry per key.
    let mut chunks = keys[4..].chunks_exact(4);
    let mut epsg = None;
    for entry in &mut chunks {
        let key_id = entry[0];
        let value = entry[3];
        if (key_id == PROJECTED_CS_TYPE_KEY || key_id == GEOGRAPHIC_TYPE_KEY) && value != 0 && value != 32767 {
            epsg = Some(value);
        }
    }

    // Silences an unused-read warning when GeoDoubleParams carries no CRS
    // info we care about; kept for forward compatibility with angular
    // parameters some encoders place there instead of the key directory.
    let _ = decoder.get_tag_f64_vec(GEO_DOUBLE_PARAMS);

    epsg.map(Crs).ok_or_else(|| ElevationError::UnsupportedCrs {
        crs: "no ProjectedCSTypeGeoKey or GeographicTypeGeoKey present".to_string(),
    })
}

fn read_nodata(decoder: &mut Decoder<Cursor<&[u8]>>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(GDAL_NODATA)
        .ok()
        .and_then(|s| s.trim().trim_matches('\0').parse::<f64>().ok())
}

fn read_sample_kind(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<SampleKind, ElevationError> {
    let bits = decoder
        .get_tag_u32(Tag::BitsPerSample)
        .unwrap_or(16);
    let format = decoder.get_tag_u32(Tag::Unknown(339)).unwrap_or(1);
    SampleKind::from_tags(format as u16, bits as u16)
}

fn read_chunk_layout(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    width: u32,
    height: u32,
) -> Result<(Compression, ChunkLayout, Vec<u64>, Vec<u64>), ElevationError> {
    let compression_tag = decoder.get_tag_u32(Tag::Compression).unwrap_or(1);
    let compression = match compression_tag {
        1 => Compression::None,
        8 | 32946 => Compression::Deflate,
        other => {
            return Err(ElevationError::UnsupportedCrs {
                crs: format!("unsupported TIFF compression scheme {other}"),
            })
        }
    };

    if let (Ok(tile_width), Ok(tile_height), Ok(offsets), Ok(byte_counts)) = (
        decoder.get_tag_u32(Tag::Unknown(322)),
        decoder.get_tag_u32(Tag::Unknown(323)),
        decoder.get_tag_u32_vec(Tag::Unknown(324)),
        decoder.get_tag_u32_vec(Tag::Unknown(325)),
    ) {
        let chunks_across = width.div_ceil(tile_width);
        return Ok((
            compression,
            ChunkLayout {
                chunk_width: tile_width,
                chunk_height: tile_height,
                chunks_across,
            },
            offsets.into_iter().map(u64::from).collect(),
            byte_counts.into_iter().map(u64::from).collect(),
        ));
    }

    let rows_per_strip = decoder.get_tag_u32(Tag::Unknown(278)).unwrap_or(height);
    let offsets = decoder
        .get_tag_u32_vec(Tag::StripOffsets)
        .map_err(|e| ElevationError::UnsupportedCrs {
            crs: format!("missing StripOffsets tag: {e}"),
        })?;
    let byte_counts = decoder
        .get_tag_u32_vec(Tag::StripByteCounts)
        .map_err(|e| ElevationError::UnsupportedCrs {
            crs: format!("missing StripByteCounts tag: {e}"),
        })?;

    Ok((
        compression,
        ChunkLayout {
            chunk_width: width,
            chunk_height: rows_per_strip,
            chunks_across: 1,
        },
        offsets.into_iter().map(u64::from).collect(),
        byte_counts.into_iter().map(u64::from).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_inverse_round_trips() {
        let transform = AffineTransform {
            a: 0.0001,
            b: 0.0,
            d: 153.0,
            e: 0.0,
            f: -0.0001,
            h: -27.0,
        };
        let (x, y) = (153.05, -27.45);
        let (col, row) = transform.world_to_pixel(x, y).unwrap();
        let x2 = transform.a * col + transform.b * row + transform.d;
        let y2 = transform.e * col + transform.f * row + transform.h;
        assert!((x2 - x).abs() < 1e-9);
        assert!((y2 - y).abs() < 1e-9);
    }

    #[test]
    fn sample_kind_from_tags_covers_common_dem_formats() {
        assert_eq!(SampleKind::from_tags(2, 16).unwrap(), SampleKind::Int16);
        assert_eq!(SampleKind::from_tags(3, 32).unwrap(), SampleKind::Float32);
        assert!(SampleKind::from_tags(9, 16).is_err());
    }
}

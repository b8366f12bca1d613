//! FreeSurfer MGH / MGZ decoding.
//!
//! Fixed 284-byte big-endian header followed by voxel data in column-major
//! order. MGZ is the same layout gzip-wrapped.

use super::{DecodeContext, DecodedVolume};
use crate::compression::is_gzip;
use crate::diagnostics::{Advisory, AdvisoryKind};
use crate::error::{Error, Result};
use crate::header::{DataType, Header, Mat4, IDENTITY};
use byteorder::{BigEndian, ByteOrder};
use std::borrow::Cow;

/// Offset of the first voxel.
pub const DATA_OFFSET: usize = 284;

mod offsets {
    pub const VERSION: usize = 0;
    pub const WIDTH: usize = 4;
    pub const NFRAMES: usize = 16;
    pub const TYPE: usize = 20;
    pub const GOOD_RAS_FLAG: usize = 28;
    pub const SPACING: usize = 30;
    pub const MDC: usize = 42;
    pub const C_RAS: usize = 78;
}

/// Map an MGH `type` field onto the canonical datatype.
fn datatype_from_mgh(code: i32) -> Result<DataType> {
    match code {
        0 => Ok(DataType::UInt8),
        1 => Ok(DataType::Int32),
        3 => Ok(DataType::Float32),
        4 => Ok(DataType::Int16),
        _ => Err(Error::UnsupportedDataType(code)),
    }
}

/// Header geometry as stored: direction cosines, spacing, centre.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Geometry {
    spacing: [f64; 3],
    /// Columns are the unit direction of each voxel axis.
    mdc: [[f64; 3]; 3],
    c_ras: [f64; 3],
}

impl Geometry {
    /// FreeSurfer's coronal default when `goodRASFlag` is not set.
    fn coronal() -> Self {
        Self {
            spacing: [1.0; 3],
            mdc: [[-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, -1.0, 0.0]],
            c_ras: [0.0; 3],
        }
    }

    fn read(bytes: &[u8]) -> Self {
        let f = |offset: usize| BigEndian::read_f32(&bytes[offset..offset + 4]) as f64;
        let mut mdc = [[0.0; 3]; 3];
        for axis in 0..3 {
            for row in 0..3 {
                mdc[row][axis] = f(offsets::MDC + (axis * 3 + row) * 4);
            }
        }
        Self {
            spacing: [
                f(offsets::SPACING),
                f(offsets::SPACING + 4),
                f(offsets::SPACING + 8),
            ],
            mdc,
            c_ras: [
                f(offsets::C_RAS),
                f(offsets::C_RAS + 4),
                f(offsets::C_RAS + 8),
            ],
        }
    }

    /// Voxel-to-RAS transform; `c_ras` maps to the volume centre.
    fn affine(&self, dims: [usize; 3]) -> Mat4 {
        let mut m = IDENTITY;
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = self.mdc[row][col] * self.spacing[col];
            }
        }
        for row in 0..3 {
            let centre: f64 = (0..3).map(|col| m[row][col] * dims[col] as f64 / 2.0).sum();
            m[row][3] = self.c_ras[row] - centre;
        }
        m
    }
}

/// Decode an `.mgh` or `.mgz` buffer.
pub fn decode<'a>(bytes: &'a [u8], ctx: &DecodeContext<'_>) -> Result<DecodedVolume<'a>> {
    if is_gzip(bytes) {
        let inflated = ctx.inflater.inflate(bytes)?;
        let header = parse_header(&inflated, ctx)?;
        let voxels = voxel_range(&inflated, &header)?;
        return Ok(DecodedVolume {
            voxel_bytes: Cow::Owned(inflated[voxels].to_vec()),
            header,
        });
    }
    let header = parse_header(bytes, ctx)?;
    let voxels = voxel_range(bytes, &header)?;
    Ok(DecodedVolume {
        voxel_bytes: Cow::Borrowed(&bytes[voxels]),
        header,
    })
}

/// Voxel bytes end where the optional scan-parameter tail begins.
fn voxel_range(bytes: &[u8], header: &Header) -> Result<std::ops::Range<usize>> {
    let end = header
        .checked_byte_count()?
        .saturating_add(DATA_OFFSET)
        .min(bytes.len());
    Ok(DATA_OFFSET..end)
}

/// Parse the fixed MGH header.
pub fn parse_header(bytes: &[u8], ctx: &DecodeContext<'_>) -> Result<Header> {
    if bytes.len() < DATA_OFFSET {
        return Err(Error::MalformedHeader(format!(
            "MGH header needs {} bytes, got {}",
            DATA_OFFSET,
            bytes.len()
        )));
    }
    let i = |offset: usize| BigEndian::read_i32(&bytes[offset..offset + 4]);

    let version = i(offsets::VERSION);
    if version != 1 {
        ctx.diagnostics.report(Advisory::warn(
            AdvisoryKind::InvalidFieldValue,
            format!("MGH version {} (expected 1)", version),
        ));
    }

    let mut spatial = [0usize; 3];
    for (axis, d) in spatial.iter_mut().enumerate() {
        let raw = i(offsets::WIDTH + axis * 4);
        if raw < 0 {
            return Err(Error::InvalidDimensions(format!(
                "MGH dimension {} is negative: {}",
                axis + 1,
                raw
            )));
        }
        *d = raw as usize;
    }
    let nframes = i(offsets::NFRAMES).max(1) as usize;
    let datatype = datatype_from_mgh(i(offsets::TYPE))?;

    let good_ras = BigEndian::read_i16(&bytes[offsets::GOOD_RAS_FLAG..offsets::GOOD_RAS_FLAG + 2]);
    let geometry = if good_ras > 0 {
        Geometry::read(bytes)
    } else {
        ctx.diagnostics.report(Advisory::info(
            AdvisoryKind::InvalidFieldValue,
            "MGH goodRASFlag not set, using coronal default orientation",
        ));
        Geometry::coronal()
    };

    let mut header = Header {
        datatype,
        bits_per_voxel: datatype.bits_per_voxel(),
        little_endian: false,
        vox_offset: DATA_OFFSET,
        sform_code: 1,
        ..Header::default()
    };
    header.dims = [3, spatial[0], spatial[1], spatial[2], nframes, 1, 1, 1];
    if nframes > 1 {
        header.dims[0] = 4;
    }
    header.pix_dims[1..4].copy_from_slice(&geometry.spacing);
    header.affine = geometry.affine(spatial);
    header.normalize_dims()?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::GzipInflater;
    use crate::diagnostics::CollectingSink;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn ctx(sink: &CollectingSink) -> DecodeContext<'_> {
        DecodeContext {
            inflater: &GzipInflater,
            diagnostics: sink,
        }
    }

    /// Build an MGH buffer with identity direction cosines.
    fn mgh_bytes(dims: [i32; 3], nframes: i32, mgh_type: i32, voxel_bytes: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; DATA_OFFSET + voxel_bytes];
        BigEndian::write_i32(&mut bytes[0..4], 1);
        for (axis, d) in dims.iter().enumerate() {
            BigEndian::write_i32(&mut bytes[4 + axis * 4..8 + axis * 4], *d);
        }
        BigEndian::write_i32(&mut bytes[16..20], nframes);
        BigEndian::write_i32(&mut bytes[20..24], mgh_type);
        BigEndian::write_i16(&mut bytes[28..30], 1);
        for axis in 0..3 {
            BigEndian::write_f32(&mut bytes[30 + axis * 4..34 + axis * 4], 2.0);
            // x_r, y_a, z_s
            let diag = 42 + (axis * 3 + axis) * 4;
            BigEndian::write_f32(&mut bytes[diag..diag + 4], 1.0);
        }
        BigEndian::write_f32(&mut bytes[78..82], 10.0);
        bytes
    }

    #[test]
    fn parses_float_volume() {
        let sink = CollectingSink::new();
        let bytes = mgh_bytes([4, 4, 2], 1, 3, 4 * 4 * 2 * 4);
        let decoded = decode(&bytes, &ctx(&sink)).unwrap();
        let h = &decoded.header;

        assert_eq!(h.dims[..5], [3, 4, 4, 2, 1]);
        assert_eq!(h.datatype, DataType::Float32);
        assert!(!h.little_endian);
        assert_eq!(h.pix_dims[1..4], [2.0, 2.0, 2.0]);
        assert_eq!(h.affine[0][0], 2.0);
        // c_ras minus half the field of view along each axis
        assert_eq!(h.affine[0][3], 10.0 - 4.0);
        assert_eq!(h.affine[2][3], -2.0);
        assert_eq!(decoded.voxel_bytes.len(), 128);
        assert!(sink.advisories().is_empty());
    }

    #[test]
    fn frames_make_it_4d() {
        let sink = CollectingSink::new();
        let bytes = mgh_bytes([2, 2, 2], 3, 0, 24);
        let h = decode(&bytes, &ctx(&sink)).unwrap().header;
        assert_eq!(h.dims[0], 4);
        assert_eq!(h.n_frame_4d(), 3);
    }

    #[test]
    fn scan_parameter_tail_is_excluded() {
        let sink = CollectingSink::new();
        let mut bytes = mgh_bytes([2, 2, 2], 1, 0, 8);
        bytes.extend_from_slice(&[0u8; 20]);
        let decoded = decode(&bytes, &ctx(&sink)).unwrap();
        assert_eq!(decoded.voxel_bytes.len(), 8);
    }

    #[test]
    fn mgz_is_inflated() {
        let sink = CollectingSink::new();
        let raw = mgh_bytes([2, 2, 2], 1, 4, 16);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let packed = encoder.finish().unwrap();

        let decoded = decode(&packed, &ctx(&sink)).unwrap();
        assert_eq!(decoded.header.datatype, DataType::Int16);
        assert_eq!(decoded.voxel_bytes.len(), 16);
    }

    #[test]
    fn missing_ras_uses_coronal_default() {
        let sink = CollectingSink::new();
        let mut bytes = mgh_bytes([2, 2, 2], 1, 0, 8);
        BigEndian::write_i16(&mut bytes[28..30], 0);
        let h = decode(&bytes, &ctx(&sink)).unwrap().header;
        assert_eq!(h.affine[0][0], -1.0);
        assert_eq!(h.affine[2][1], -1.0);
        assert_eq!(h.affine[1][2], 1.0);
        assert_eq!(h.pix_dims[1], 1.0);
        assert!(sink.contains(AdvisoryKind::InvalidFieldValue));
    }

    #[test]
    fn unknown_type_rejected() {
        let sink = CollectingSink::new();
        let bytes = mgh_bytes([2, 2, 2], 1, 2, 8);
        assert!(matches!(
            decode(&bytes, &ctx(&sink)),
            Err(Error::UnsupportedDataType(2))
        ));
    }

    #[test]
    fn short_buffer_is_malformed() {
        let sink = CollectingSink::new();
        assert!(matches!(
            decode(&[0u8; 100], &ctx(&sink)),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn overflowing_dims_rejected() {
        let sink = CollectingSink::new();
        let bytes = mgh_bytes([1 << 30, 1 << 30, 1 << 30], 1, 3, 16);
        assert!(matches!(
            decode(&bytes, &ctx(&sink)),
            Err(Error::InvalidDimensions(_))
        ));
    }
}

//! NIfTI-1 (348-byte header) and NIfTI-2 (540-byte header) decoding.
//!
//! Version and byte order are detected from the `sizeof_hdr` field. The
//! payload may be gzip-wrapped; `ni1`/`ni2` headers take their voxels from
//! the paired `.img` buffer.

use super::{DecodeContext, DecodedVolume};
use crate::compression::is_gzip;
use crate::diagnostics::{Advisory, AdvisoryKind};
use crate::error::{Error, Result};
use crate::header::{DataType, Header};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::borrow::Cow;

/// NIfTI format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiftiVersion {
    /// NIfTI-1 format (348-byte header, 16-bit dimensions)
    Nifti1,
    /// NIfTI-2 format (540-byte header, 64-bit dimensions)
    Nifti2,
}

impl NiftiVersion {
    /// Header size in bytes for this version.
    pub const fn header_size(self) -> usize {
        match self {
            Self::Nifti1 => 348,
            Self::Nifti2 => 540,
        }
    }
}

/// NIfTI-1 header field byte offsets.
mod offsets_v1 {
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const CAL_MAX: usize = 124;
    pub const CAL_MIN: usize = 128;
    pub const DESCRIP: usize = 148;
    pub const AUX_FILE: usize = 228;
    pub const QFORM_CODE: usize = 252;
    pub const SFORM_CODE: usize = 254;
    pub const QUATERN_B: usize = 256;
    pub const QOFFSET_X: usize = 268;
    pub const SROW_X: usize = 280;
    pub const MAGIC: usize = 344;
}

/// NIfTI-2 header field byte offsets.
mod offsets_v2 {
    pub const MAGIC: usize = 4;
    pub const DATATYPE: usize = 12;
    pub const BITPIX: usize = 14;
    pub const DIM: usize = 16;
    pub const PIXDIM: usize = 104;
    pub const VOX_OFFSET: usize = 168;
    pub const SCL_SLOPE: usize = 176;
    pub const SCL_INTER: usize = 184;
    pub const CAL_MAX: usize = 192;
    pub const CAL_MIN: usize = 200;
    pub const DESCRIP: usize = 240;
    pub const QFORM_CODE: usize = 344;
    pub const SFORM_CODE: usize = 348;
    pub const QUATERN_B: usize = 352;
    pub const QOFFSET_X: usize = 376;
    pub const SROW_X: usize = 400;
}

/// Detect version and byte order from the `sizeof_hdr` field.
///
/// Returns `(version, little_endian)`.
pub fn detect_version(bytes: &[u8]) -> Option<(NiftiVersion, bool)> {
    if bytes.len() < 4 {
        return None;
    }
    let sizeof_hdr_le = LittleEndian::read_i32(&bytes[0..4]);
    let sizeof_hdr_be = BigEndian::read_i32(&bytes[0..4]);

    if sizeof_hdr_le == 348 {
        Some((NiftiVersion::Nifti1, true))
    } else if sizeof_hdr_be == 348 {
        Some((NiftiVersion::Nifti1, false))
    } else if sizeof_hdr_le == 540 {
        Some((NiftiVersion::Nifti2, true))
    } else if sizeof_hdr_be == 540 {
        Some((NiftiVersion::Nifti2, false))
    } else {
        None
    }
}

/// Parsed header plus the facts needed to locate the voxels.
#[derive(Debug, Clone)]
pub struct NiftiHeader {
    /// Canonical header.
    pub header: Header,
    /// Format version.
    pub version: NiftiVersion,
    /// `ni1`/`ni2` magic: voxels are in a separate file.
    pub detached: bool,
}

/// Parse a NIfTI header with automatic version and endianness detection.
pub fn parse_header(bytes: &[u8], ctx: &DecodeContext<'_>) -> Result<NiftiHeader> {
    let Some((version, little_endian)) = detect_version(bytes) else {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(Error::InvalidMagic(magic));
    };

    let required_size = version.header_size();
    if bytes.len() < required_size {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "header too short: got {} bytes, need {} for {:?}",
                bytes.len(),
                required_size,
                version
            ),
        )));
    }

    let parsed = match (version, little_endian) {
        (NiftiVersion::Nifti1, true) => parse_v1::<LittleEndian>(bytes, true)?,
        (NiftiVersion::Nifti1, false) => parse_v1::<BigEndian>(bytes, false)?,
        (NiftiVersion::Nifti2, true) => parse_v2::<LittleEndian>(bytes, true)?,
        (NiftiVersion::Nifti2, false) => parse_v2::<BigEndian>(bytes, false)?,
    };
    finish(parsed, ctx)
}

fn finish(mut parsed: NiftiHeader, ctx: &DecodeContext<'_>) -> Result<NiftiHeader> {
    let header = &mut parsed.header;
    let expected = header.datatype.bits_per_voxel();
    if header.bits_per_voxel != expected {
        ctx.diagnostics.report(Advisory::warn(
            AdvisoryKind::InvalidFieldValue,
            format!(
                "bitpix {} does not match datatype {} (using {})",
                header.bits_per_voxel, header.datatype, expected
            ),
        ));
        header.bits_per_voxel = expected;
    }
    header.normalize_dims()?;
    header.normalize_scaling();
    Ok(parsed)
}

fn read_description(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}

fn read_ndim(raw: i64) -> Result<usize> {
    if !(1..=7).contains(&raw) {
        return Err(Error::InvalidDimensions(format!(
            "ndim must be 1..=7, got {}",
            raw
        )));
    }
    Ok(raw as usize)
}

/// Parse NIfTI-1 header.
#[allow(clippy::wildcard_imports)]
fn parse_v1<E: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<NiftiHeader> {
    use offsets_v1::*;

    let magic = &bytes[MAGIC..MAGIC + 4];
    let detached = match magic {
        b"n+1\0" => false,
        b"ni1\0" => true,
        _ => {
            return Err(Error::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]))
        }
    };

    let mut dims = [0usize; 8];
    dims[0] = read_ndim(E::read_i16(&bytes[DIM..DIM + 2]) as i64)?;
    for (i, dim_val) in dims.iter_mut().enumerate().skip(1) {
        let offset = DIM + i * 2;
        let dim_raw = E::read_i16(&bytes[offset..offset + 2]);
        if dim_raw < 0 {
            return Err(Error::InvalidDimensions(format!(
                "dimension {} has negative value: {}",
                i, dim_raw
            )));
        }
        *dim_val = dim_raw as usize;
    }

    let datatype = DataType::from_code(E::read_i16(&bytes[DATATYPE..DATATYPE + 2]) as i32)?;
    let bitpix = E::read_i16(&bytes[BITPIX..BITPIX + 2]);

    let mut pix_dims = [0.0f64; 8];
    for (i, pix_val) in pix_dims.iter_mut().enumerate() {
        let offset = PIXDIM + i * 4;
        *pix_val = E::read_f32(&bytes[offset..offset + 4]) as f64;
    }

    let vox_offset_raw = E::read_f32(&bytes[VOX_OFFSET..VOX_OFFSET + 4]);
    if !vox_offset_raw.is_finite() || vox_offset_raw < 0.0 {
        return Err(Error::MalformedHeader(format!(
            "vox_offset must be finite and non-negative, got {}",
            vox_offset_raw
        )));
    }

    let f = |offset: usize| E::read_f32(&bytes[offset..offset + 4]) as f64;
    let mut affine = crate::header::IDENTITY;
    for (row, values) in affine.iter_mut().take(3).enumerate() {
        for (col, v) in values.iter_mut().enumerate() {
            *v = f(SROW_X + row * 16 + col * 4);
        }
    }

    let header = Header {
        dims,
        pix_dims,
        datatype,
        bits_per_voxel: bitpix.max(0) as u16,
        scl_slope: f(SCL_SLOPE),
        scl_inter: f(SCL_INTER),
        cal_min: f(CAL_MIN),
        cal_max: f(CAL_MAX),
        qform_code: E::read_i16(&bytes[QFORM_CODE..QFORM_CODE + 2]) as i32,
        sform_code: E::read_i16(&bytes[SFORM_CODE..SFORM_CODE + 2]) as i32,
        quatern: [f(QUATERN_B), f(QUATERN_B + 4), f(QUATERN_B + 8)],
        qoffset: [f(QOFFSET_X), f(QOFFSET_X + 4), f(QOFFSET_X + 8)],
        affine,
        little_endian,
        vox_offset: vox_offset_raw as usize,
        description: read_description(&bytes[DESCRIP..AUX_FILE]),
    };
    Ok(NiftiHeader {
        header,
        version: NiftiVersion::Nifti1,
        detached,
    })
}

/// Parse NIfTI-2 header.
#[allow(clippy::wildcard_imports)]
fn parse_v2<E: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<NiftiHeader> {
    use offsets_v2::*;

    let magic = &bytes[MAGIC..MAGIC + 8];
    let detached = match magic {
        b"n+2\0\r\n\x1a\n" => false,
        b"ni2\0\r\n\x1a\n" => true,
        _ => {
            return Err(Error::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]))
        }
    };

    let mut dims = [0usize; 8];
    dims[0] = read_ndim(E::read_i64(&bytes[DIM..DIM + 8]))?;
    for (i, dim_val) in dims.iter_mut().enumerate().skip(1) {
        let offset = DIM + i * 8;
        let dim_raw = E::read_i64(&bytes[offset..offset + 8]);
        if dim_raw < 0 {
            return Err(Error::InvalidDimensions(format!(
                "dimension {} has negative value: {}",
                i, dim_raw
            )));
        }
        *dim_val = dim_raw as usize;
    }

    let datatype = DataType::from_code(E::read_i16(&bytes[DATATYPE..DATATYPE + 2]) as i32)?;
    let bitpix = E::read_i16(&bytes[BITPIX..BITPIX + 2]);

    let f = |offset: usize| E::read_f64(&bytes[offset..offset + 8]);
    let mut pix_dims = [0.0f64; 8];
    for (i, pix_val) in pix_dims.iter_mut().enumerate() {
        *pix_val = f(PIXDIM + i * 8);
    }

    let vox_offset = E::read_i64(&bytes[VOX_OFFSET..VOX_OFFSET + 8]);
    if vox_offset < 0 {
        return Err(Error::MalformedHeader(format!(
            "vox_offset must be non-negative, got {}",
            vox_offset
        )));
    }

    let mut affine = crate::header::IDENTITY;
    for (row, values) in affine.iter_mut().take(3).enumerate() {
        for (col, v) in values.iter_mut().enumerate() {
            *v = f(SROW_X + row * 32 + col * 8);
        }
    }

    let header = Header {
        dims,
        pix_dims,
        datatype,
        bits_per_voxel: bitpix.max(0) as u16,
        scl_slope: f(SCL_SLOPE),
        scl_inter: f(SCL_INTER),
        cal_min: f(CAL_MIN),
        cal_max: f(CAL_MAX),
        qform_code: E::read_i32(&bytes[QFORM_CODE..QFORM_CODE + 4]),
        sform_code: E::read_i32(&bytes[SFORM_CODE..SFORM_CODE + 4]),
        quatern: [f(QUATERN_B), f(QUATERN_B + 8), f(QUATERN_B + 16)],
        qoffset: [f(QOFFSET_X), f(QOFFSET_X + 8), f(QOFFSET_X + 16)],
        affine,
        little_endian,
        vox_offset: vox_offset as usize,
        description: read_description(&bytes[DESCRIP..DESCRIP + 80]),
    };
    Ok(NiftiHeader {
        header,
        version: NiftiVersion::Nifti2,
        detached,
    })
}

fn voxel_slice<'a>(bytes: &'a [u8], offset: usize) -> Result<&'a [u8]> {
    bytes.get(offset..).ok_or_else(|| {
        Error::MalformedHeader(format!(
            "vox_offset {} beyond end of data ({} bytes)",
            offset,
            bytes.len()
        ))
    })
}

/// Decode a `.nii`, `.nii.gz` or `.hdr` (+ paired `.img`) buffer.
pub fn decode<'a>(
    bytes: &'a [u8],
    paired: Option<&'a [u8]>,
    ctx: &DecodeContext<'_>,
) -> Result<DecodedVolume<'a>> {
    if is_gzip(bytes) {
        let mut inflated = ctx.inflater.inflate(bytes)?;
        let parsed = parse_header(&inflated, ctx)?;
        if parsed.detached {
            return decode_detached(parsed, paired, ctx);
        }
        let offset = parsed.header.vox_offset.max(parsed.version.header_size());
        voxel_slice(&inflated, offset)?;
        let voxel_bytes = inflated.split_off(offset);
        return Ok(DecodedVolume {
            header: parsed.header,
            voxel_bytes: Cow::Owned(voxel_bytes),
        });
    }

    let parsed = parse_header(bytes, ctx)?;
    if parsed.detached {
        return decode_detached(parsed, paired, ctx);
    }
    let offset = parsed.header.vox_offset.max(parsed.version.header_size());
    Ok(DecodedVolume {
        voxel_bytes: Cow::Borrowed(voxel_slice(bytes, offset)?),
        header: parsed.header,
    })
}

fn decode_detached<'a>(
    parsed: NiftiHeader,
    paired: Option<&'a [u8]>,
    ctx: &DecodeContext<'_>,
) -> Result<DecodedVolume<'a>> {
    let paired = paired.ok_or_else(|| {
        Error::MissingPairedData("NIfTI header-only file (ni1/ni2) needs its .img data".into())
    })?;
    let offset = parsed.header.vox_offset;
    let voxel_bytes = if is_gzip(paired) {
        let inflated = ctx.inflater.inflate(paired)?;
        voxel_slice(&inflated, offset)?;
        Cow::Owned(inflated[offset..].to_vec())
    } else {
        Cow::Borrowed(voxel_slice(paired, offset)?)
    };
    Ok(DecodedVolume {
        header: parsed.header,
        voxel_bytes,
    })
}

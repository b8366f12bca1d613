//! Canonical volume header shared by every decoder.
//!
//! Each format decoder fills one [`Header`]; nothing downstream knows which
//! file format the volume came from.

use crate::error::{Error, Result};

/// Row-major 4x4 matrix mapping voxel indices to millimetres.
pub type Mat4 = [[f64; 4]; 4];

/// The 4x4 identity.
pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Voxel encoding, using the NIfTI datatype codes.
///
/// Only UInt8, Int16, UInt16, Float32, Float64, Rgb24 and Rgba32 are held in
/// memory as-is. The rest are widened on decode, see [`DataType::promotion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum DataType {
    /// Unsigned 8-bit integer
    UInt8 = 2,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Signed 32-bit integer
    Int32 = 8,
    /// 32-bit floating point
    Float32 = 16,
    /// 64-bit floating point
    Float64 = 64,
    /// Packed RGB byte triplet
    Rgb24 = 128,
    /// Signed 8-bit integer
    Int8 = 256,
    /// Unsigned 16-bit integer
    UInt16 = 512,
    /// Unsigned 32-bit integer
    UInt32 = 768,
    /// Signed 64-bit integer
    Int64 = 1024,
    /// Packed RGBA byte quad
    Rgba32 = 2304,
}

impl DataType {
    /// Parse from a NIfTI datatype code.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            2 => Ok(Self::UInt8),
            4 => Ok(Self::Int16),
            8 => Ok(Self::Int32),
            16 => Ok(Self::Float32),
            64 => Ok(Self::Float64),
            128 => Ok(Self::Rgb24),
            256 => Ok(Self::Int8),
            512 => Ok(Self::UInt16),
            768 => Ok(Self::UInt32),
            1024 => Ok(Self::Int64),
            2304 => Ok(Self::Rgba32),
            _ => Err(Error::UnsupportedDataType(code)),
        }
    }

    /// NIfTI datatype code.
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Bytes per voxel.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Rgb24 => 3,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::Rgba32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Bits per voxel, as stored in `bitpix`.
    pub const fn bits_per_voxel(self) -> u16 {
        (self.byte_size() * 8) as u16
    }

    /// Packed colour types are byte arrays and never byte-swapped.
    pub const fn is_packed_color(self) -> bool {
        matches!(self, Self::Rgb24 | Self::Rgba32)
    }

    /// In-memory type a stored type is widened to, if it has no direct
    /// representation.
    pub const fn promotion(self) -> Option<Self> {
        match self {
            Self::Int8 => Some(Self::Int16),
            Self::UInt32 | Self::Int32 | Self::Int64 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Type of the decoded voxel buffer.
    pub const fn decoded(self) -> Self {
        match self.promotion() {
            Some(t) => t,
            None => self,
        }
    }

    /// Short type name.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::UInt8 => "u8",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::UInt16 => "u16",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::Int64 => "i64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Rgb24 => "rgb24",
            Self::Rgba32 => "rgba32",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Per-volume metadata in canonical form.
///
/// `affine` holds the directly-encoded (sform-style) transform as decoded.
/// The transform actually used for display is chosen later by
/// [`crate::affine::resolve_affine`], which never mutates the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// `dims[0]` is the number of dimensions in use, `dims[1..=3]` the
    /// spatial extents, `dims[4..=7]` time and higher extents.
    pub dims: [usize; 8],
    /// Spacing per dimension; `pix_dims[0]` is the qform handedness (qfac).
    pub pix_dims: [f64; 8],
    /// Voxel encoding.
    pub datatype: DataType,
    /// Stored bits per voxel.
    pub bits_per_voxel: u16,
    /// Scaling slope, never exactly zero.
    pub scl_slope: f64,
    /// Scaling intercept.
    pub scl_inter: f64,
    /// Author display minimum.
    pub cal_min: f64,
    /// Author display maximum.
    pub cal_max: f64,
    /// qform precedence code.
    pub qform_code: i32,
    /// sform precedence code.
    pub sform_code: i32,
    /// Quaternion b, c, d (a is derived).
    pub quatern: [f64; 3],
    /// qform translation.
    pub qoffset: [f64; 3],
    /// Directly-encoded voxel-to-world transform.
    pub affine: Mat4,
    /// Byte order of the stored voxels.
    pub little_endian: bool,
    /// Offset of the voxel data in the source buffer.
    pub vox_offset: usize,
    /// Free-text description, if the format has one.
    pub description: String,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            dims: [3, 1, 1, 1, 1, 1, 1, 1],
            pix_dims: [1.0; 8],
            datatype: DataType::UInt8,
            bits_per_voxel: 8,
            scl_slope: 1.0,
            scl_inter: 0.0,
            cal_min: 0.0,
            cal_max: 0.0,
            qform_code: 0,
            sform_code: 0,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            affine: IDENTITY,
            little_endian: true,
            vox_offset: 0,
            description: String::new(),
        }
    }
}

impl Header {
    /// Number of dimensions in use, clamped to `1..=7`.
    pub fn ndim(&self) -> usize {
        self.dims[0].clamp(1, 7)
    }

    /// Voxels in one 3D frame.
    pub fn n_vox_3d(&self) -> usize {
        self.dims[1] * self.dims[2] * self.dims[3]
    }

    /// Number of 3D frames (product of all dimensions beyond the third).
    pub fn n_frame_4d(&self) -> usize {
        let ndim = self.ndim();
        if ndim < 4 {
            return 1;
        }
        self.dims[4..=ndim].iter().map(|&d| d.max(1)).product()
    }

    /// Voxel count implied by the dimensions.
    ///
    /// Only valid on headers that passed [`Header::normalize_dims`]; use
    /// [`Header::checked_voxel_count`] otherwise.
    pub fn expected_voxel_count(&self) -> usize {
        self.n_vox_3d() * self.n_frame_4d()
    }

    /// Byte count implied by the dimensions and stored datatype.
    ///
    /// Same precondition as [`Header::expected_voxel_count`].
    pub fn expected_byte_count(&self) -> usize {
        self.expected_voxel_count() * self.datatype.byte_size()
    }

    /// Voxel count, or `InvalidDimensions` if it does not fit in `usize`.
    pub fn checked_voxel_count(&self) -> Result<usize> {
        self.checked_product(1)
    }

    /// Byte count, or `InvalidDimensions` if it does not fit in `usize`.
    pub fn checked_byte_count(&self) -> Result<usize> {
        self.checked_product(self.datatype.byte_size())
    }

    fn checked_product(&self, element_size: usize) -> Result<usize> {
        let last = self.ndim().max(3);
        let extents = &self.dims[1..=last];
        extents
            .iter()
            .try_fold(element_size, |acc, &d| acc.checked_mul(d.max(1)))
            .ok_or_else(|| {
                Error::InvalidDimensions(format!(
                    "dimensions {:?} of {} exceed the addressable size",
                    extents, self.datatype
                ))
            })
    }

    /// Set every unused dimension to 1, reject empty spatial extents and
    /// reject dimensions whose byte count overflows.
    pub fn normalize_dims(&mut self) -> Result<()> {
        let ndim = self.ndim();
        self.dims[0] = ndim;
        for d in &mut self.dims[ndim + 1..] {
            *d = 1;
        }
        // 1D/2D volumes still need a unit extent on the missing axes.
        for d in &mut self.dims[1..=3] {
            if *d == 0 && ndim < 3 {
                *d = 1;
            }
        }
        for axis in 1..=3 {
            if self.dims[axis] == 0 {
                return Err(Error::InvalidDimensions(format!(
                    "spatial dimension {} is zero",
                    axis
                )));
            }
        }
        self.checked_byte_count()?;
        Ok(())
    }

    /// Replace a zero or non-finite slope with 1 and a non-finite intercept with 0.
    pub fn normalize_scaling(&mut self) {
        if self.scl_slope == 0.0 || !self.scl_slope.is_finite() {
            self.scl_slope = 1.0;
        }
        if !self.scl_inter.is_finite() {
            self.scl_inter = 0.0;
        }
    }

    /// Diagonal transform built from the spatial spacings.
    pub fn default_affine(&self) -> Mat4 {
        [
            [self.pix_dims[1], 0.0, 0.0, 0.0],
            [0.0, self.pix_dims[2], 0.0, 0.0],
            [0.0, 0.0, self.pix_dims[3], 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Copy of this header describing voxels decoded as `datatype`.
    pub fn with_datatype(&self, datatype: DataType) -> Self {
        Self {
            datatype,
            bits_per_voxel: datatype.bits_per_voxel(),
            ..self.clone()
        }
    }

    /// Stored value to display value.
    pub fn raw_to_scaled(&self, raw: f64) -> f64 {
        raw * self.scl_slope + self.scl_inter
    }

    /// Display value to stored value.
    pub fn scaled_to_raw(&self, scaled: f64) -> f64 {
        (scaled - self.scl_inter) / self.scl_slope
    }

    /// Set spacings from the column norms of `affine`, keeping `pix_dims[0]`.
    pub fn set_spacing_from_affine(&mut self, affine: &Mat4) {
        for col in 0..3 {
            let norm = (affine[0][col] * affine[0][col]
                + affine[1][col] * affine[1][col]
                + affine[2][col] * affine[2][col])
                .sqrt();
            self.pix_dims[col + 1] = norm;
        }
    }
}

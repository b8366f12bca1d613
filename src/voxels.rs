//! Typed voxel buffers decoded from raw bytes.
//!
//! Multi-byte voxels are swapped into native order when the stored byte
//! order differs, then read into one of seven in-memory element types.
//! Stored types without an in-memory counterpart are widened
//! (`Int8 -> Int16`, `UInt32/Int32/Int64 -> Float64`).

use crate::error::{Error, Result};
use crate::header::{DataType, Header};
use byteorder::{ByteOrder, NativeEndian};
use std::borrow::Cow;

/// Decoded voxel buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum VoxelData {
    /// Unsigned 8-bit.
    UInt8(Vec<u8>),
    /// Signed 16-bit.
    Int16(Vec<i16>),
    /// Unsigned 16-bit.
    UInt16(Vec<u16>),
    /// 32-bit float.
    Float32(Vec<f32>),
    /// 64-bit float.
    Float64(Vec<f64>),
    /// Packed RGB triplets.
    Rgb24(Vec<u8>),
    /// Packed RGBA quads.
    Rgba32(Vec<u8>),
}

/// Run `$body` with `$v` bound to the scalar vector of `$data`.
///
/// Packed colour buffers evaluate `$packed` instead.
macro_rules! with_scalars {
    ($data:expr, $v:ident => $body:expr, $packed:expr) => {
        match $data {
            VoxelData::UInt8($v) => $body,
            VoxelData::Int16($v) => $body,
            VoxelData::UInt16($v) => $body,
            VoxelData::Float32($v) => $body,
            VoxelData::Float64($v) => $body,
            VoxelData::Rgb24(_) | VoxelData::Rgba32(_) => $packed,
        }
    };
}
pub(crate) use with_scalars;

impl VoxelData {
    /// In-memory datatype.
    pub fn datatype(&self) -> DataType {
        match self {
            Self::UInt8(_) => DataType::UInt8,
            Self::Int16(_) => DataType::Int16,
            Self::UInt16(_) => DataType::UInt16,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::Rgb24(_) => DataType::Rgb24,
            Self::Rgba32(_) => DataType::Rgba32,
        }
    }

    /// Number of voxels.
    pub fn len(&self) -> usize {
        match self {
            Self::Rgb24(v) => v.len() / 3,
            Self::Rgba32(v) => v.len() / 4,
            other => with_scalars!(other, v => v.len(), 0),
        }
    }

    /// True if there are no voxels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value of voxel `index` as f64. `None` for packed colour.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        with_scalars!(self, v => v.get(index).map(|&x| x as f64), None)
    }

    /// Scalar voxels widened to f32. `None` for packed colour.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        with_scalars!(self, v => Some(v.iter().map(|&x| x as f32).collect()), None)
    }
}

/// Reverse the byte order of every 2-byte word.
pub fn swap16(bytes: &mut [u8]) {
    for word in bytes.chunks_exact_mut(2) {
        word.swap(0, 1);
    }
}

/// Reverse the byte order of every 4-byte word.
pub fn swap32(bytes: &mut [u8]) {
    for word in bytes.chunks_exact_mut(4) {
        word.reverse();
    }
}

/// Reverse the byte order of every 8-byte word.
pub fn swap64(bytes: &mut [u8]) {
    for word in bytes.chunks_exact_mut(8) {
        word.reverse();
    }
}

fn needs_swap(header: &Header) -> bool {
    header.bits_per_voxel > 8
        && !header.datatype.is_packed_color()
        && header.little_endian != cfg!(target_endian = "little")
}

/// Read `bytes` as native-order `T`, ignoring a trailing partial element.
fn read_native<T: Default + Clone>(
    bytes: &[u8],
    size: usize,
    read_into: fn(&[u8], &mut [T]),
) -> Vec<T> {
    let n = bytes.len() / size;
    let mut out = vec![T::default(); n];
    read_into(&bytes[..n * size], &mut out);
    out
}

/// Widen `src` into a new buffer.
///
/// Unless `promote_all` is set the last element is left at zero.
fn widen<S: Copy, D: Default + Clone>(src: &[S], promote_all: bool, f: impl Fn(S) -> D) -> Vec<D> {
    let mut out = vec![D::default(); src.len()];
    let n = if promote_all {
        src.len()
    } else {
        src.len().saturating_sub(1)
    };
    for (o, &s) in out.iter_mut().zip(&src[..n]) {
        *o = f(s);
    }
    out
}

/// Turn raw voxel bytes into a typed buffer.
///
/// `header.datatype` is the stored type. The result has type
/// `header.datatype.decoded()`.
pub fn decode_voxels(header: &Header, bytes: Cow<'_, [u8]>, promote_all: bool) -> Result<VoxelData> {
    let datatype = header.datatype;
    let mut bytes = bytes;
    if needs_swap(header) {
        let owned = bytes.to_mut();
        match datatype.byte_size() {
            2 => swap16(owned),
            4 => swap32(owned),
            8 => swap64(owned),
            n => {
                return Err(Error::MalformedHeader(format!(
                    "cannot byte-swap {}-byte voxels",
                    n
                )))
            }
        }
    }

    let data = match datatype {
        DataType::UInt8 => VoxelData::UInt8(bytes.into_owned()),
        DataType::Rgb24 => {
            let mut v = bytes.into_owned();
            v.truncate(v.len() / 3 * 3);
            VoxelData::Rgb24(v)
        }
        DataType::Rgba32 => {
            let mut v = bytes.into_owned();
            v.truncate(v.len() / 4 * 4);
            VoxelData::Rgba32(v)
        }
        DataType::Int16 => VoxelData::Int16(read_native(&bytes, 2, NativeEndian::read_i16_into)),
        DataType::UInt16 => VoxelData::UInt16(read_native(&bytes, 2, NativeEndian::read_u16_into)),
        DataType::Float32 => {
            VoxelData::Float32(read_native(&bytes, 4, NativeEndian::read_f32_into))
        }
        DataType::Float64 => {
            VoxelData::Float64(read_native(&bytes, 8, NativeEndian::read_f64_into))
        }
        DataType::Int8 => {
            let src: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
            VoxelData::Int16(widen(&src, promote_all, i16::from))
        }
        DataType::Int32 => {
            let src = read_native(&bytes, 4, NativeEndian::read_i32_into);
            VoxelData::Float64(widen(&src, promote_all, f64::from))
        }
        DataType::UInt32 => {
            let src = read_native(&bytes, 4, NativeEndian::read_u32_into);
            VoxelData::Float64(widen(&src, promote_all, f64::from))
        }
        DataType::Int64 => {
            let src = read_native(&bytes, 8, NativeEndian::read_i64_into);
            VoxelData::Float64(widen(&src, promote_all, |v: i64| v as f64))
        }
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    fn header(datatype: DataType, little_endian: bool) -> Header {
        Header {
            little_endian,
            ..Header::default().with_datatype(datatype)
        }
    }

    #[test]
    fn swap_twice_is_identity() {
        let original: Vec<u8> = (0..64).collect();
        for swap in [swap16, swap32, swap64] {
            let mut bytes = original.clone();
            swap(&mut bytes);
            assert_ne!(bytes, original);
            swap(&mut bytes);
            assert_eq!(bytes, original);
        }
    }

    #[test]
    fn big_endian_float_is_swapped() {
        let mut raw = vec![0u8; 12];
        BigEndian::write_f32_into(&[1.5, -2.0, 1e6], &mut raw);
        let v = decode_voxels(&header(DataType::Float32, false), Cow::Owned(raw), false).unwrap();
        assert_eq!(v, VoxelData::Float32(vec![1.5, -2.0, 1e6]));
    }

    #[test]
    fn little_endian_i16_borrowed() {
        let mut raw = vec![0u8; 6];
        LittleEndian::write_i16_into(&[-3, 0, 300], &mut raw);
        let v = decode_voxels(&header(DataType::Int16, true), Cow::Borrowed(&raw[..]), false).unwrap();
        assert_eq!(v, VoxelData::Int16(vec![-3, 0, 300]));
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn int32_promotion_leaves_last_voxel_zero() {
        let mut raw = vec![0u8; 16];
        LittleEndian::write_i32_into(&[7, -8, 9, 10], &mut raw);
        let h = header(DataType::Int32, true);

        let v = decode_voxels(&h, Cow::Borrowed(&raw[..]), false).unwrap();
        assert_eq!(v, VoxelData::Float64(vec![7.0, -8.0, 9.0, 0.0]));

        let v = decode_voxels(&h, Cow::Borrowed(&raw[..]), true).unwrap();
        assert_eq!(v, VoxelData::Float64(vec![7.0, -8.0, 9.0, 10.0]));
    }

    #[test]
    fn int8_widens_to_i16() {
        let raw = vec![0xffu8, 0x7f, 0x80];
        let v = decode_voxels(&header(DataType::Int8, true), Cow::Borrowed(&raw[..]), true).unwrap();
        assert_eq!(v, VoxelData::Int16(vec![-1, 127, -128]));
        assert_eq!(v.datatype(), DataType::Int8.decoded());
    }

    #[test]
    fn uint32_and_int64_widen_to_f64() {
        let mut raw = vec![0u8; 8];
        BigEndian::write_u32_into(&[u32::MAX, 1], &mut raw);
        let v = decode_voxels(&header(DataType::UInt32, false), Cow::Owned(raw), true).unwrap();
        assert_eq!(v, VoxelData::Float64(vec![u32::MAX as f64, 1.0]));

        let mut raw = vec![0u8; 16];
        LittleEndian::write_i64_into(&[-5, 1 << 40], &mut raw);
        let v = decode_voxels(&header(DataType::Int64, true), Cow::Owned(raw), true).unwrap();
        assert_eq!(v, VoxelData::Float64(vec![-5.0, (1u64 << 40) as f64]));
    }

    #[test]
    fn packed_color_never_swapped() {
        let raw = vec![1u8, 2, 3, 4, 5, 6, 7];
        let v = decode_voxels(&header(DataType::Rgb24, false), Cow::Borrowed(&raw[..]), false).unwrap();
        assert_eq!(v, VoxelData::Rgb24(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(v.len(), 2);
        assert_eq!(v.to_f32_vec(), None);
    }

    #[test]
    fn trailing_partial_element_dropped() {
        let raw = vec![0u8; 7];
        let v = decode_voxels(&header(DataType::Float32, true), Cow::Borrowed(&raw[..]), false).unwrap();
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn get_reads_within_bounds() {
        let v = VoxelData::UInt16(vec![10, 20, 30, 40]);
        assert_eq!(v.get_f64(3), Some(40.0));
        assert_eq!(v.get_f64(4), None);
    }
}

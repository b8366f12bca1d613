//! NRRD / NHDR decoding.
//!
//! Text header of `key: value` lines closed by a blank line. Voxels follow
//! the blank line, or live in a separate file named by `data file`, in which
//! case the caller passes them as the paired buffer.

use super::{DecodeContext, DecodedVolume};
use crate::compression::is_gzip;
use crate::diagnostics::{Advisory, AdvisoryKind};
use crate::error::{Error, Result};
use crate::header::{DataType, Header, Mat4, IDENTITY};
use std::borrow::Cow;

/// Leading bytes of every NRRD file (`NRRD000x`).
pub const MAGIC: &[u8] = b"NRRD";

/// Keys that are understood but carry nothing the volume needs.
const IGNORED_KEYS: &[&str] = &[
    "dimension",
    "kinds",
    "content",
    "space dimension",
    "labels",
    "units",
    "centerings",
    "thicknesses",
    "min",
    "max",
    "old min",
    "old max",
    "measurement frame",
    "block size",
    "byte skip",
    "line skip",
    "sample units",
];

/// Voxel payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Uncompressed.
    Raw,
    /// Gzip-compressed.
    Gzip,
}

impl Encoding {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "raw" => Ok(Self::Raw),
            "gz" | "gzip" => Ok(Self::Gzip),
            other => Err(Error::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Map a NRRD `type` spelling onto a datatype.
pub fn datatype_from_name(name: &str) -> Option<DataType> {
    let dt = match name {
        "uchar" | "unsigned char" | "uint8" | "uint8_t" => DataType::UInt8,
        "signed char" | "int8" | "int8_t" => DataType::Int8,
        "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
            DataType::Int16
        }
        "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
            DataType::UInt16
        }
        "int" | "signed int" | "int32" | "int32_t" => DataType::Int32,
        "uint" | "unsigned int" | "uint32" | "uint32_t" => DataType::UInt32,
        "longlong" | "long long" | "long long int" | "signed long long"
        | "signed long long int" | "int64" | "int64_t" => DataType::Int64,
        "float" => DataType::Float32,
        "double" => DataType::Float64,
        _ => return None,
    };
    Some(dt)
}

/// Sign flips taking a `space` to RAS.
fn space_flips(space: &str) -> Option<[f64; 3]> {
    match space {
        "right-anterior-superior" | "ras" | "scanner-xyz" => Some([1.0, 1.0, 1.0]),
        "left-anterior-superior" | "las" => Some([-1.0, 1.0, 1.0]),
        "left-posterior-superior" | "lps" => Some([-1.0, -1.0, 1.0]),
        _ => None,
    }
}

/// Parse a `(x,y,z)` vector; `none` yields `None`.
fn parse_vector(token: &str) -> Option<[f64; 3]> {
    let mut out = [0.0; 3];
    let mut parts = token.split(',').map(str::trim).filter(|s| !s.is_empty());
    for v in &mut out {
        *v = parts.next()?.parse().ok()?;
    }
    Some(out)
}

/// Parse a list of `(x,y,z)` vectors and `none` entries.
fn parse_vectors(raw: &str) -> Vec<Option<[f64; 3]>> {
    let mut out = Vec::new();
    let mut rest = raw.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('(') {
            let Some((inner, tail)) = after.split_once(')') else {
                break;
            };
            out.push(parse_vector(inner));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("none") {
            out.push(None);
            rest = tail;
        } else {
            match rest.split_once(char::is_whitespace) {
                Some((_, tail)) => rest = tail,
                None => break,
            }
        }
        rest = rest.trim_start();
    }
    out
}

/// Locate the end of the header: returns `(header_len, data_offset)`.
fn find_header_end(bytes: &[u8]) -> Option<(usize, usize)> {
    (1..bytes.len())
        .find(|&i| bytes[i - 1] == b'\n' && bytes[i] == b'\n')
        .map(|i| (i - 1, i + 1))
}

/// Header fields gathered before the affine is assembled.
#[derive(Debug, Default)]
struct Fields {
    sizes: Vec<usize>,
    spacings: Vec<f64>,
    directions: Vec<Option<[f64; 3]>>,
    origin: Option<[f64; 3]>,
    microns: bool,
    flips: Option<[f64; 3]>,
}

/// Parsed NRRD header.
#[derive(Debug, Clone)]
pub struct NrrdHeader {
    /// Canonical header.
    pub header: Header,
    /// Payload encoding.
    pub encoding: Encoding,
    /// `data file` target, if the voxels are detached.
    pub data_file: Option<String>,
}

/// Parse the text header. `data_offset` is where attached voxels start.
pub fn parse_header(text: &str, data_offset: usize, ctx: &DecodeContext<'_>) -> Result<NrrdHeader> {
    let mut lines = text.lines();
    match lines.next() {
        Some(first) if first.as_bytes().starts_with(MAGIC) => {}
        _ => {
            return Err(Error::MalformedHeader(
                "NRRD header must start with 'NRRD'".into(),
            ))
        }
    }

    let mut header = Header {
        vox_offset: data_offset,
        ..Header::default()
    };
    let mut fields = Fields::default();
    let mut encoding = Encoding::Raw;
    let mut data_file = None;
    let mut typed = false;

    for line in lines {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        // `key:=value` lines are key/value pairs, not fields.
        if line.contains(":=") {
            continue;
        }
        let Some((key, raw_value)) = line.split_once(':') else {
            ctx.diagnostics.report(Advisory::warn(
                AdvisoryKind::InvalidFieldValue,
                format!("NRRD line without ':' ignored: '{}'", line),
            ));
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw_value = raw_value.trim().to_ascii_lowercase();
        let value = raw_value.replace(['(', ')'], " ");
        let numbers = || -> Vec<f64> {
            value
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter_map(|s| s.parse().ok())
                .collect()
        };

        match key.as_str() {
            "data file" | "datafile" => data_file = Some(raw_value.clone()),
            "encoding" => encoding = Encoding::parse(&raw_value)?,
            "type" => {
                let dt = datatype_from_name(&raw_value).ok_or_else(|| {
                    Error::MalformedHeader(format!("unsupported NRRD type '{}'", raw_value))
                })?;
                header.datatype = dt;
                header.bits_per_voxel = dt.bits_per_voxel();
                typed = true;
            }
            "sizes" => {
                fields.sizes = value
                    .split_whitespace()
                    .filter_map(|s| s.parse().ok())
                    .collect();
            }
            "spacings" => fields.spacings = numbers(),
            "endian" => match raw_value.as_str() {
                "little" => header.little_endian = true,
                "big" => header.little_endian = false,
                other => ctx.diagnostics.report(Advisory::warn(
                    AdvisoryKind::InvalidFieldValue,
                    format!("NRRD endian '{}'", other),
                )),
            },
            "space directions" => {
                fields.directions = parse_vectors(&raw_value);
            }
            "space origin" => {
                fields.origin = parse_vectors(&raw_value).first().copied().flatten();
            }
            "space units" => fields.microns = value.contains("micron"),
            "space" => match space_flips(&raw_value) {
                Some(flips) => fields.flips = Some(flips),
                None => ctx.diagnostics.report(Advisory::warn(
                    AdvisoryKind::UnknownOrientationValue,
                    format!("NRRD space '{}' not recognized", raw_value),
                )),
            },
            k if IGNORED_KEYS.contains(&k) => {}
            k => ctx.diagnostics.report(Advisory::info(
                AdvisoryKind::UnknownKey,
                format!("NRRD field '{}' ignored", k),
            )),
        }
    }

    if !typed || fields.sizes.is_empty() {
        return Err(Error::MalformedHeader(
            "NRRD header needs 'type' and 'sizes'".into(),
        ));
    }
    apply_geometry(&mut header, &fields);
    header.normalize_dims()?;
    Ok(NrrdHeader {
        header,
        encoding,
        data_file,
    })
}

fn apply_geometry(header: &mut Header, fields: &Fields) {
    let ndim = fields.sizes.len().min(7);
    header.dims[0] = ndim;
    for (d, &s) in header.dims[1..=ndim].iter_mut().zip(&fields.sizes) {
        *d = s;
    }
    for (p, &s) in header.pix_dims[1..].iter_mut().zip(&fields.spacings) {
        if s.is_finite() {
            *p = s;
        }
    }

    let spatial: Vec<[f64; 3]> = fields.directions.iter().flatten().copied().collect();
    if spatial.len() < 3 {
        header.affine = header.default_affine();
        return;
    }

    let scale = if fields.microns { 0.001 } else { 1.0 };
    let flips = fields.flips.unwrap_or([1.0, 1.0, 1.0]);
    let mut origin = fields.origin.unwrap_or([0.0; 3]);
    let mut m: Mat4 = IDENTITY;
    for (col, dir) in spatial.iter().take(3).enumerate() {
        for row in 0..3 {
            m[row][col] = flips[row] * dir[row] * scale;
        }
    }
    for (row, o) in origin.iter_mut().enumerate() {
        *o *= scale;
        if flips[row] < 0.0 {
            *o = -*o;
        }
        m[row][3] = *o;
    }
    header.affine = m;
    header.set_spacing_from_affine(&m);
    header.sform_code = 2;
}

/// Decode a `.nrrd` buffer, or a `.nhdr` header plus its paired data.
pub fn decode<'a>(
    bytes: &'a [u8],
    paired: Option<&'a [u8]>,
    ctx: &DecodeContext<'_>,
) -> Result<DecodedVolume<'a>> {
    let (header_len, data_offset) = match find_header_end(bytes) {
        Some(end) => end,
        None if paired.is_some() => (bytes.len(), bytes.len()),
        None => {
            return Err(Error::MalformedHeader(
                "NRRD header is not terminated by a blank line".into(),
            ))
        }
    };
    let text = String::from_utf8_lossy(&bytes[..header_len]);
    let parsed = parse_header(&text, data_offset, ctx)?;

    let detached = parsed.data_file.is_some() || data_offset >= bytes.len();
    let payload: &'a [u8] = if detached {
        paired.ok_or_else(|| {
            Error::MissingPairedData(format!(
                "NRRD data file '{}' not supplied",
                parsed.data_file.as_deref().unwrap_or("?")
            ))
        })?
    } else {
        &bytes[data_offset..]
    };

    // A detached payload may arrive already inflated.
    let inflate = match parsed.encoding {
        Encoding::Gzip => !detached || is_gzip(payload),
        Encoding::Raw => false,
    };
    let voxel_bytes = if inflate {
        Cow::Owned(ctx.inflater.inflate(payload)?)
    } else {
        Cow::Borrowed(payload)
    };
    Ok(DecodedVolume {
        header: parsed.header,
        voxel_bytes,
    })
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

    fn with_data(header: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn int_volume_without_directions_keeps_default_affine() {
        let sink = CollectingSink::new();
        let bytes = with_data(
            "NRRD0004\ntype: int\ndimension: 3\nsizes: 4 4 4\nencoding: raw\n\n",
            &[0u8; 256],
        );
        let decoded = decode(&bytes, None, &ctx(&sink)).unwrap();
        let h = &decoded.header;
        assert_eq!(h.datatype, DataType::Int32);
        assert_eq!(h.dims[..4], [3, 4, 4, 4]);
        assert_eq!(h.affine, IDENTITY);
        assert_eq!(h.sform_code, 0);
        assert_eq!(decoded.voxel_bytes.len(), 256);
        assert!(sink.advisories().is_empty());
    }

    #[test]
    fn type_spellings() {
        assert_eq!(datatype_from_name("unsigned char"), Some(DataType::UInt8));
        assert_eq!(datatype_from_name("signed short int"), Some(DataType::Int16));
        assert_eq!(datatype_from_name("uint16_t"), Some(DataType::UInt16));
        assert_eq!(datatype_from_name("long long"), Some(DataType::Int64));
        assert_eq!(datatype_from_name("double"), Some(DataType::Float64));
        assert_eq!(datatype_from_name("block"), None);
    }

    #[test]
    fn unknown_type_is_fatal() {
        let sink = CollectingSink::new();
        let bytes = with_data("NRRD0004\ntype: block\nsizes: 2 2 2\n\n", &[0u8; 8]);
        assert!(matches!(
            decode(&bytes, None, &ctx(&sink)),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn unknown_encoding_is_fatal() {
        let sink = CollectingSink::new();
        let bytes = with_data(
            "NRRD0004\ntype: uchar\nsizes: 2 2 2\nencoding: bzip2\n\n",
            &[0u8; 8],
        );
        assert!(matches!(
            decode(&bytes, None, &ctx(&sink)),
            Err(Error::UnsupportedEncoding(e)) if e == "bzip2"
        ));
    }

    #[test]
    fn lps_directions_are_mirrored() {
        let sink = CollectingSink::new();
        let bytes = with_data(
            "NRRD0005\n# comment\ntype: float\ndimension: 3\nspace: left-posterior-superior\n\
             sizes: 2 2 2\nspace directions: (2,0,0) (0,3,0) (0,0,4)\n\
             space origin: (10,20,30)\nendian: big\nencoding: raw\n\n",
            &[0u8; 32],
        );
        let h = decode(&bytes, None, &ctx(&sink)).unwrap().header;
        assert_eq!(h.affine[0], [-2.0, 0.0, 0.0, -10.0]);
        assert_eq!(h.affine[1], [0.0, -3.0, 0.0, -20.0]);
        assert_eq!(h.affine[2], [0.0, 0.0, 4.0, 30.0]);
        assert_eq!(h.pix_dims[1..4], [2.0, 3.0, 4.0]);
        assert_eq!(h.sform_code, 2);
        assert!(!h.little_endian);
    }

    #[test]
    fn trailing_none_direction_is_skipped() {
        let sink = CollectingSink::new();
        let bytes = with_data(
            "NRRD0004\ntype: ushort\nsizes: 2 2 2 3\n\
             space directions: (1, 0, 0) (0,1,0) (0,0,1) none\n\
             space units: \"microns\" \"microns\" \"microns\"\n\
             space origin: (1000,0,0)\n\n",
            &[0u8; 48],
        );
        let h = decode(&bytes, None, &ctx(&sink)).unwrap().header;
        assert_eq!(h.dims[..5], [4, 2, 2, 2, 3]);
        assert_eq!(h.n_frame_4d(), 3);
        assert!((h.affine[0][0] - 0.001).abs() < 1e-12);
        assert!((h.affine[0][3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spacings_independent_of_key_order() {
        let sink = CollectingSink::new();
        let bytes = with_data(
            "NRRD0004\nspacings: 0.5 0.75 2\ntype: uchar\nsizes: 2 2 2\n\n",
            &[0u8; 8],
        );
        let h = decode(&bytes, None, &ctx(&sink)).unwrap().header;
        assert_eq!(h.pix_dims[1..4], [0.5, 0.75, 2.0]);
        assert_eq!(h.affine[2][2], 2.0);
    }

    #[test]
    fn gzip_payload() {
        let sink = CollectingSink::new();
        let raw: Vec<u8> = (0..8).collect();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let packed = encoder.finish().unwrap();
        let bytes = with_data(
            "NRRD0004\ntype: uint8\nsizes: 2 2 2\nencoding: gzip\n\n",
            &packed,
        );
        let decoded = decode(&bytes, None, &ctx(&sink)).unwrap();
        assert_eq!(decoded.voxel_bytes.as_ref(), raw.as_slice());
    }

    #[test]
    fn detached_header_uses_pair() {
        let sink = CollectingSink::new();
        let nhdr = b"NRRD0004\ntype: uchar\nsizes: 2 2 2\ndata file: brain.raw\n\n";
        assert!(matches!(
            decode(nhdr, None, &ctx(&sink)),
            Err(Error::MissingPairedData(_))
        ));
        let data = [9u8; 8];
        let decoded = decode(nhdr, Some(&data), &ctx(&sink)).unwrap();
        assert_eq!(decoded.voxel_bytes.as_ref(), &data);

        // no terminating blank line is fine when the data is paired
        let bare = b"NRRD0004\ntype: uchar\nsizes: 2 2 2\ndata file: brain.raw";
        assert!(decode(bare, Some(&data), &ctx(&sink)).is_ok());
    }

    #[test]
    fn detached_gzip_payload_may_arrive_inflated() {
        let sink = CollectingSink::new();
        let nhdr = b"NRRD0004\ntype: uchar\nsizes: 2 2 1\nencoding: gzip\ndata file: vol.raw.gz\n\n";
        let raw = [1u8, 2, 3, 4];
        let decoded = decode(nhdr, Some(&raw), &ctx(&sink)).unwrap();
        assert_eq!(decoded.voxel_bytes.as_ref(), &raw);
        assert!(matches!(decoded.voxel_bytes, Cow::Borrowed(_)));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let packed = encoder.finish().unwrap();
        let decoded = decode(nhdr, Some(&packed), &ctx(&sink)).unwrap();
        assert_eq!(decoded.voxel_bytes.as_ref(), &raw);

        // attached gzip data is always inflated
        let mut attached = b"NRRD0004\ntype: uchar\nsizes: 2 2 1\nencoding: gzip\n\n".to_vec();
        attached.extend_from_slice(&raw);
        assert!(matches!(
            decode(&attached, None, &ctx(&sink)),
            Err(Error::Decompression(_))
        ));
    }

    #[test]
    fn unterminated_header_is_malformed() {
        let sink = CollectingSink::new();
        assert!(matches!(
            decode(b"NRRD0004\ntype: uchar\nsizes: 2 2 2\n", None, &ctx(&sink)),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn unknown_space_and_key_are_advisories() {
        let sink = CollectingSink::new();
        let bytes = with_data(
            "NRRD0004\ntype: uchar\nsizes: 2 2 2\nspace: 3d-right-handed\nflavour: vanilla\n\n",
            &[0u8; 8],
        );
        assert!(decode(&bytes, None, &ctx(&sink)).is_ok());
        assert!(sink.contains(AdvisoryKind::UnknownOrientationValue));
        assert!(sink.contains(AdvisoryKind::UnknownKey));
    }
}

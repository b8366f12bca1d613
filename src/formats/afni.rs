//! AFNI `.HEAD` attribute decoding. Voxels come from the paired `.BRIK`.
//!
//! A HEAD file is a sequence of attributes, each declared as
//!
//! ```text
//! type = float-attribute
//! name = DELTA
//! count = 3
//!  -2.5 2.5 3
//! ```
//!
//! Numeric values may wrap onto several lines; string values are wrapped in
//! `'` ... `~`.

use super::{DecodeContext, DecodedVolume};
use crate::compression::is_gzip;
use crate::diagnostics::{Advisory, AdvisoryKind};
use crate::error::{Error, Result};
use crate::header::{DataType, Header, Mat4, IDENTITY};
use std::borrow::Cow;

/// Keys present in most HEAD files that carry nothing the volume needs.
const IGNORED_KEYS: &[&str] = &[
    "TYPESTRING",
    "IDCODE_STRING",
    "IDCODE_DATE",
    "SCENE_DATA",
    "LABEL_1",
    "LABEL_2",
    "DATASET_NAME",
    "DATASET_RANK",
    "HISTORY_NOTE",
    "BRICK_STATS",
    "BRICK_LABS",
    "BRICK_KEYWORDS",
    "IJK_TO_DICOM",
    "TAXIS_NUMS",
    "TAXIS_OFFSETS",
    "NOTES_COUNT",
    "WARP_TYPE",
    "MARKS_XYZ",
    "MARKS_LAB",
    "MARKS_HELP",
    "MARKS_FLAGS",
    "TAGALIGN_MATVEC",
    "VOLREG_MATVEC_000000",
    "ATLAS_LABEL_TABLE",
    "INT_CMAP",
];

/// Value of one attribute.
#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Numbers(Vec<f64>),
    Text(String),
}

/// One `type`/`name`/`count` block.
#[derive(Debug, Clone, PartialEq)]
struct Attribute {
    name: String,
    value: AttrValue,
}

impl Attribute {
    fn numbers(&self) -> &[f64] {
        match &self.value {
            AttrValue::Numbers(v) => v,
            AttrValue::Text(_) => &[],
        }
    }

    fn text(&self) -> &str {
        match &self.value {
            AttrValue::Text(s) => s,
            AttrValue::Numbers(_) => "",
        }
    }
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Split the file into attributes.
fn parse_attributes(text: &str, ctx: &DecodeContext<'_>) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(("type", kind)) = split_assignment(line) else {
            continue;
        };
        let kind = kind.to_string();

        let mut name = None;
        let mut count = 0usize;
        while let Some(next) = lines.peek() {
            match split_assignment(next) {
                Some(("name", v)) => name = Some(v.to_string()),
                Some(("count", v)) => count = v.parse().unwrap_or(0),
                _ => break,
            }
            lines.next();
        }
        let name = name.ok_or_else(|| {
            Error::MalformedHeader(format!("AFNI attribute of type '{}' has no name", kind))
        })?;

        let mut body = Vec::new();
        while let Some(next) = lines.peek() {
            if matches!(split_assignment(next), Some(("type", _))) {
                break;
            }
            body.push(*next);
            lines.next();
        }

        let value = if kind == "string-attribute" {
            let joined = body.join("\n");
            let trimmed = joined.trim_start();
            let inner = trimmed.strip_prefix('\'').unwrap_or(trimmed);
            let inner = inner.split('~').next().unwrap_or_default();
            AttrValue::Text(inner.to_string())
        } else {
            let mut values = Vec::with_capacity(count);
            for token in body.iter().flat_map(|l| l.split_whitespace()) {
                if values.len() == count {
                    break;
                }
                match token.parse::<f64>() {
                    Ok(v) => values.push(v),
                    Err(_) => ctx.diagnostics.report(Advisory::warn(
                        AdvisoryKind::InvalidFieldValue,
                        format!("AFNI {}: unparsable value '{}'", name, token),
                    )),
                }
            }
            AttrValue::Numbers(values)
        };
        attributes.push(Attribute { name, value });
    }
    Ok(attributes)
}

fn datatype_from_brick_type(code: i32) -> Result<DataType> {
    match code {
        0 => Ok(DataType::UInt8),
        1 => Ok(DataType::Int16),
        2 => Ok(DataType::Int32),
        3 => Ok(DataType::Float32),
        4 => Ok(DataType::Float64),
        6 => Ok(DataType::Rgb24),
        _ => Err(Error::UnsupportedDataType(code)),
    }
}

/// Build a DICOM-space affine from ORIENT_SPECIFIC, ORIGIN and DELTA.
///
/// Each orientation code (0..=5, `R2L L2R P2A A2P I2S S2I`) names the
/// physical axis of one logical axis. Returns `None` if a physical axis is
/// unassigned or assigned twice.
fn orient_affine(orient: &[f64], origin: &[f64], delta: &[f64]) -> Option<Mat4> {
    const AXIS_OF_CODE: &[u8; 7] = b"xxyyzzg";

    let mut logical_of = [None::<usize>; 3];
    for (logical, &code) in orient.iter().take(3).enumerate() {
        if code < 0.0 {
            return None;
        }
        let physical = match AXIS_OF_CODE.get(code as usize)? {
            b'x' => 0,
            b'y' => 1,
            b'z' => 2,
            _ => return None,
        };
        if logical_of[physical].replace(logical).is_some() {
            return None;
        }
    }

    let mut m = [[0.0; 4]; 4];
    m[3][3] = 1.0;
    for (physical, logical) in logical_of.iter().enumerate() {
        let logical = (*logical)?;
        m[physical][logical] = delta.get(logical).copied().unwrap_or(1.0);
        m[physical][3] = origin.get(logical).copied().unwrap_or(0.0);
    }
    Some(m)
}

/// Mirror DICOM LPS into RAS.
fn lps_to_ras(m: &mut Mat4) {
    for row in m.iter_mut().take(2) {
        for v in row.iter_mut() {
            *v = -*v;
        }
    }
}

/// Parse a HEAD buffer into a header.
pub fn parse_header(bytes: &[u8], ctx: &DecodeContext<'_>) -> Result<Header> {
    let text = String::from_utf8_lossy(bytes);
    let attributes = parse_attributes(&text, ctx)?;

    let mut header = Header::default();
    let mut dims_seen = false;
    let mut types_seen = false;
    let mut direct = None;
    let mut orient: &[f64] = &[];
    let mut origin: &[f64] = &[];
    let mut delta: &[f64] = &[];

    for attr in &attributes {
        let values = attr.numbers();
        match attr.name.as_str() {
            "BYTEORDER_STRING" => match attr.text() {
                "LSB_FIRST" => header.little_endian = true,
                "MSB_FIRST" => header.little_endian = false,
                other => ctx.diagnostics.report(Advisory::warn(
                    AdvisoryKind::InvalidFieldValue,
                    format!("AFNI BYTEORDER_STRING '{}'", other),
                )),
            },
            "BRICK_TYPES" => {
                let Some(&first) = values.first() else {
                    continue;
                };
                header.datatype = datatype_from_brick_type(first as i32)?;
                if values.iter().any(|&v| v != first) {
                    ctx.diagnostics.report(Advisory::warn(
                        AdvisoryKind::InvalidFieldValue,
                        "AFNI sub-bricks have mixed types, decoding all as the first",
                    ));
                }
                header.dims[4] = values.len();
                types_seen = true;
            }
            "DATASET_DIMENSIONS" => {
                for (d, &v) in header.dims[1..4].iter_mut().zip(values) {
                    *d = v.max(0.0) as usize;
                }
                dims_seen = values.len() >= 3;
            }
            "IJK_TO_DICOM_REAL" if values.len() >= 12 => {
                let mut m = IDENTITY;
                for row in 0..3 {
                    m[row].copy_from_slice(&values[row * 4..row * 4 + 4]);
                }
                direct = Some(m);
            }
            "ORIENT_SPECIFIC" => orient = values,
            "ORIGIN" => origin = values,
            "DELTA" => delta = values,
            "TAXIS_FLOATS" => {
                if let Some(&tr) = values.get(1) {
                    header.pix_dims[4] = tr;
                }
            }
            "BRICK_FLOAT_FACS" => {
                if let Some(&slope) = values.iter().find(|&&v| v != 0.0) {
                    header.scl_slope = slope;
                }
            }
            name if IGNORED_KEYS.contains(&name) => {}
            name => ctx.diagnostics.report(Advisory::info(
                AdvisoryKind::UnknownKey,
                format!("AFNI attribute '{}' ignored", name),
            )),
        }
    }

    if !dims_seen || !types_seen {
        return Err(Error::MalformedHeader(
            "AFNI header needs DATASET_DIMENSIONS and BRICK_TYPES".into(),
        ));
    }
    header.bits_per_voxel = header.datatype.bits_per_voxel();
    header.dims[0] = if header.dims[4] > 1 { 4 } else { 3 };

    if delta.len() >= 3 {
        for (p, d) in header.pix_dims[1..4].iter_mut().zip(delta) {
            *p = d.abs();
        }
    }

    if let Some(mut m) = direct {
        lps_to_ras(&mut m);
        header.set_spacing_from_affine(&m);
        header.affine = m;
        header.sform_code = 2;
    } else if orient.len() >= 3 {
        match orient_affine(orient, origin, delta) {
            Some(mut m) => {
                lps_to_ras(&mut m);
                header.affine = m;
                header.sform_code = 2;
            }
            None => {
                ctx.diagnostics.report(Advisory::warn(
                    AdvisoryKind::UnknownOrientationValue,
                    format!("AFNI ORIENT_SPECIFIC {:?} does not name three distinct axes", orient),
                ));
                header.affine = header.default_affine();
            }
        }
    } else {
        header.affine = header.default_affine();
    }

    header.normalize_dims()?;
    header.normalize_scaling();
    Ok(header)
}

/// Decode a HEAD buffer with its paired BRIK data.
pub fn decode<'a>(
    bytes: &'a [u8],
    paired: Option<&'a [u8]>,
    ctx: &DecodeContext<'_>,
) -> Result<DecodedVolume<'a>> {
    let header = parse_header(bytes, ctx)?;
    let paired = paired.ok_or_else(|| {
        Error::MissingPairedData("AFNI .HEAD needs its .BRIK voxel data".into())
    })?;
    let voxel_bytes = if paired.len() < header.checked_byte_count()? && is_gzip(paired) {
        Cow::Owned(ctx.inflater.inflate(paired)?)
    } else {
        Cow::Borrowed(paired)
    };
    Ok(DecodedVolume {
        header,
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

    fn attr(kind: &str, name: &str, values: &str) -> String {
        let count = values.split_whitespace().count();
        format!("\ntype = {kind}\nname = {name}\ncount = {count}\n{values}\n")
    }

    fn orient_head(orient: &str) -> String {
        let mut head = String::new();
        head += "\ntype = string-attribute\nname = BYTEORDER_STRING\ncount = 10\n'LSB_FIRST~\n";
        head += &attr("integer-attribute", "DATASET_DIMENSIONS", "2 2 2 0 0");
        head += &attr("integer-attribute", "BRICK_TYPES", "3");
        head += &attr("integer-attribute", "ORIENT_SPECIFIC", orient);
        head += &attr("float-attribute", "ORIGIN", "0 0 0");
        head += &attr("float-attribute", "DELTA", "1 1 1");
        head
    }

    #[test]
    fn parses_attribute_blocks() {
        let sink = CollectingSink::new();
        let text = "type = float-attribute\nname = DELTA\ncount = 3\n -2.5\n 2.5 3\n\n\
                    type = string-attribute\nname = TYPESTRING\ncount = 8\n'3DIM_HEAD_ANAT~\n";
        let attrs = parse_attributes(text, &ctx(&sink)).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].numbers(), &[-2.5, 2.5, 3.0]);
        assert_eq!(attrs[1].text(), "3DIM_HEAD_ANAT");
    }

    #[test]
    fn orientation_codes_rai_give_mirrored_identity() {
        let sink = CollectingSink::new();
        let head = orient_head("0 2 4");
        let h = parse_header(head.as_bytes(), &ctx(&sink)).unwrap();
        assert_eq!(
            h.affine,
            [
                [-1.0, 0.0, 0.0, 0.0],
                [0.0, -1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        );
        assert_eq!(h.datatype, DataType::Float32);
        assert!(h.little_endian);
        assert!(sink.advisories().is_empty());
    }

    #[test]
    fn orientation_codes_permute_axes() {
        let sink = CollectingSink::new();
        // logical i is S/I, j is R/L, k is A/P
        let head = orient_head("4 0 2");
        let h = parse_header(head.as_bytes(), &ctx(&sink)).unwrap();
        assert_eq!(h.affine[0][1], -1.0);
        assert_eq!(h.affine[1][2], -1.0);
        assert_eq!(h.affine[2][0], 1.0);
    }

    #[test]
    fn duplicate_orientation_axis_is_advisory() {
        let sink = CollectingSink::new();
        let head = orient_head("0 1 4");
        let h = parse_header(head.as_bytes(), &ctx(&sink)).unwrap();
        assert!(sink.contains(AdvisoryKind::UnknownOrientationValue));
        assert_eq!(h.affine, h.default_affine());
    }

    #[test]
    fn direct_affine_wins() {
        let sink = CollectingSink::new();
        let mut head = orient_head("0 2 4");
        head += &attr(
            "float-attribute",
            "IJK_TO_DICOM_REAL",
            "2 0 0 -90\n 0 3 0 -120\n 0 0 4 -60",
        );
        let h = parse_header(head.as_bytes(), &ctx(&sink)).unwrap();
        assert_eq!(h.affine[0], [-2.0, 0.0, 0.0, 90.0]);
        assert_eq!(h.affine[1], [0.0, -3.0, 0.0, 120.0]);
        assert_eq!(h.affine[2], [0.0, 0.0, 4.0, -60.0]);
        assert_eq!(h.pix_dims[1..4], [2.0, 3.0, 4.0]);
        assert_eq!(h.sform_code, 2);
    }

    #[test]
    fn sub_bricks_make_it_4d() {
        let sink = CollectingSink::new();
        let mut head = String::new();
        head += &attr("integer-attribute", "DATASET_DIMENSIONS", "2 2 1");
        head += &attr("integer-attribute", "BRICK_TYPES", "1 1 1");
        head += &attr("float-attribute", "BRICK_FLOAT_FACS", "0 0.5 0.5");
        head += &attr("float-attribute", "TAXIS_FLOATS", "0 2.5 0 0 0");
        head += &attr("integer-attribute", "SOMETHING_NEW", "1");
        let h = parse_header(head.as_bytes(), &ctx(&sink)).unwrap();
        assert_eq!(h.dims[0], 4);
        assert_eq!(h.n_frame_4d(), 3);
        assert_eq!(h.datatype, DataType::Int16);
        assert_eq!(h.scl_slope, 0.5);
        assert_eq!(h.pix_dims[4], 2.5);
        assert!(sink.contains(AdvisoryKind::UnknownKey));
    }

    #[test]
    fn complex_bricks_rejected() {
        let sink = CollectingSink::new();
        let mut head = String::new();
        head += &attr("integer-attribute", "DATASET_DIMENSIONS", "2 2 1");
        head += &attr("integer-attribute", "BRICK_TYPES", "5");
        assert!(matches!(
            parse_header(head.as_bytes(), &ctx(&sink)),
            Err(Error::UnsupportedDataType(5))
        ));
    }

    #[test]
    fn brik_is_required() {
        let sink = CollectingSink::new();
        let head = orient_head("0 2 4");
        assert!(matches!(
            decode(head.as_bytes(), None, &ctx(&sink)),
            Err(Error::MissingPairedData(_))
        ));
    }

    #[test]
    fn short_brik_is_inflated() {
        let sink = CollectingSink::new();
        let mut head = String::new();
        head += &attr("integer-attribute", "DATASET_DIMENSIONS", "16 16 16");
        head += &attr("integer-attribute", "BRICK_TYPES", "3");
        let raw = vec![0u8; 16 * 16 * 16 * 4];
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let packed = encoder.finish().unwrap();
        assert!(packed.len() < raw.len());

        let decoded = decode(head.as_bytes(), Some(&packed), &ctx(&sink)).unwrap();
        assert_eq!(decoded.voxel_bytes.len(), raw.len());

        let plain = decode(head.as_bytes(), Some(&raw), &ctx(&sink)).unwrap();
        assert!(matches!(plain.voxel_bytes, Cow::Borrowed(_)));
    }
}

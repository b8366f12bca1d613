//! Choosing, validating and repairing the voxel-to-world transform.

use crate::diagnostics::{Advisory, AdvisoryKind, DiagnosticSink};
use crate::header::{Header, Mat4};
use glam::{DMat4, DVec4};

/// Where the resolved affine came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffineSource {
    /// The directly-encoded (sform-style) matrix.
    Sform,
    /// Expanded from the quaternion fields.
    Qform,
    /// Neither was usable; diagonal spacing matrix.
    Repaired,
}

/// Affine chosen for display, with the spacings that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAffine {
    /// Voxel-to-world transform.
    pub affine: Mat4,
    /// Spacings, repaired if the affine had to be rebuilt.
    pub pix_dims: [f64; 8],
    /// Origin of `affine`.
    pub source: AffineSource,
}

/// Expand the quaternion fields into a 4x4 affine.
pub fn quaternion_to_affine(header: &Header) -> Mat4 {
    let [b, c, d] = header.quatern;
    let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();

    let qfac = if header.pix_dims[0] < 0.0 { -1.0 } else { 1.0 };
    let [i, j, k] = [
        header.pix_dims[1],
        header.pix_dims[2],
        header.pix_dims[3] * qfac,
    ];

    [
        [
            (a * a + b * b - c * c - d * d) * i,
            2.0 * (b * c - a * d) * j,
            2.0 * (b * d + a * c) * k,
            header.qoffset[0],
        ],
        [
            2.0 * (b * c + a * d) * i,
            (a * a - b * b + c * c - d * d) * j,
            2.0 * (c * d - a * b) * k,
            header.qoffset[1],
        ],
        [
            2.0 * (b * d - a * c) * i,
            2.0 * (c * d + a * b) * j,
            (a * a - b * b - c * c + d * d) * k,
            header.qoffset[2],
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// False if any entry is NaN, or the 3x3 block has an all-zero row or column.
pub fn is_affine_ok(m: &Mat4) -> bool {
    if m.iter().flatten().any(|v| v.is_nan()) {
        return false;
    }
    for i in 0..3 {
        let row_zero = (0..3).all(|j| m[i][j] == 0.0);
        let col_zero = (0..3).all(|j| m[j][i] == 0.0);
        if row_zero || col_zero {
            return false;
        }
    }
    true
}

/// Diagonal affine from the spacings, with NaN or zero spacings set to 1.
///
/// Returns the affine and the repaired spacings.
pub fn repair_affine(pix_dims: &[f64; 8]) -> (Mat4, [f64; 8]) {
    let mut repaired = *pix_dims;
    for p in &mut repaired[1..4] {
        if p.is_nan() || *p == 0.0 {
            *p = 1.0;
        }
    }
    let m = [
        [repaired[1], 0.0, 0.0, 0.0],
        [0.0, repaired[2], 0.0, 0.0],
        [0.0, 0.0, repaired[3], 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    (m, repaired)
}

/// Pick the affine used for display.
///
/// The quaternion form is used when `prefer_qform` is set, when the direct
/// affine fails [`is_affine_ok`], or when `qform_code > sform_code`. An
/// invalid result is replaced by [`repair_affine`] and reported as
/// [`AdvisoryKind::DefectiveAffine`].
pub fn resolve_affine(
    header: &Header,
    prefer_qform: bool,
    sink: &dyn DiagnosticSink,
) -> ResolvedAffine {
    let use_qform =
        prefer_qform || !is_affine_ok(&header.affine) || header.qform_code > header.sform_code;
    let (affine, source) = if use_qform {
        (quaternion_to_affine(header), AffineSource::Qform)
    } else {
        (header.affine, AffineSource::Sform)
    };

    if is_affine_ok(&affine) {
        return ResolvedAffine {
            affine,
            pix_dims: header.pix_dims,
            source,
        };
    }

    let (affine, pix_dims) = repair_affine(&header.pix_dims);
    sink.report(Advisory::warn(
        AdvisoryKind::DefectiveAffine,
        format!(
            "no usable spatial transform, using diagonal spacing [{}, {}, {}]",
            pix_dims[1], pix_dims[2], pix_dims[3]
        ),
    ));
    ResolvedAffine {
        affine,
        pix_dims,
        source: AffineSource::Repaired,
    }
}

/// Row-major array to glam (column-major).
pub fn to_dmat4(m: &Mat4) -> DMat4 {
    DMat4::from_cols_array_2d(m).transpose()
}

/// glam (column-major) to row-major array.
pub fn from_dmat4(m: &DMat4) -> Mat4 {
    m.transpose().to_cols_array_2d()
}

/// `a * b`.
pub fn mat_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    from_dmat4(&(to_dmat4(a) * to_dmat4(b)))
}

/// Inverse, or `None` if `m` is singular.
pub fn invert(m: &Mat4) -> Option<Mat4> {
    let g = to_dmat4(m);
    let det = g.determinant();
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    Some(from_dmat4(&g.inverse()))
}

/// Apply `m` to the point `p`.
pub fn transform_point(m: &Mat4, p: [f64; 3]) -> [f64; 3] {
    let v = to_dmat4(m) * DVec4::new(p[0], p[1], p[2], 1.0);
    [v.x, v.y, v.z]
}

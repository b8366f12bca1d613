//! Canonical RAS axis ordering.
//!
//! The resolved affine is decomposed into an axis permutation, per-axis
//! flips and a residual oblique rotation, so that voxel index `(i, j, k)`
//! of the reordered volume runs Right, Anterior, Superior.

use crate::affine::{mat_mul, transform_point};
use crate::diagnostics::{Advisory, AdvisoryKind, DiagnosticSink};
use crate::header::{Mat4, IDENTITY};
use glam::DVec3;

/// Shear above this angle (degrees) is reported.
pub const MAX_SHEAR_DEG: f64 = 0.1;

/// Derived RAS fields of a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct RasInfo {
    /// 1-based source axis feeding each RAS axis.
    pub perm: [usize; 3],
    /// Whether each RAS axis runs backwards in the source.
    pub flip: [bool; 3],
    /// `perm`, negated where flipped.
    pub perm_ras: [i32; 3],
    /// `[ndim, x, y, z]` in RAS order.
    pub dims_ras: [usize; 4],
    /// `[qfac, dx, dy, dz]` in RAS order.
    pub pix_dims_ras: [f64; 4],
    /// RAS voxel index to world millimetres.
    pub mat_ras: Mat4,
    /// Source texture coordinate (0..1) to RAS texture coordinate.
    pub to_ras: Mat4,
    /// Unit step directions of the RAS axes in world space.
    pub oblique_ras: Mat4,
    /// Largest deviation from 90 degrees between RAS axes.
    pub max_shear_deg: f64,
    /// World position of the outer corner of voxel `(0, 0, 0)`.
    pub mm000: [f64; 3],
    /// Corner at the far end of the x axis.
    pub mm100: [f64; 3],
    /// Corner at the far end of the y axis.
    pub mm010: [f64; 3],
    /// Corner at the far end of the z axis.
    pub mm001: [f64; 3],
}

impl RasInfo {
    /// True if the source is already in RAS order.
    pub fn is_identity(&self) -> bool {
        self.perm == [1, 2, 3] && self.flip == [false; 3]
    }
}

/// Source axis (1-based) dominating each world axis.
///
/// Ties prefer the lower source axis; the third is whatever is left.
pub fn axis_permutation(affine: &Mat4) -> [usize; 3] {
    let a = |r: usize, c: usize| affine[r][c].abs();

    let mut ixyz = [1usize; 3];
    if a(1, 0) > a(0, 0) {
        ixyz[0] = 2;
    }
    if a(2, 0) > a(0, 0) && a(2, 0) > a(1, 0) {
        ixyz[0] = 3;
    }
    ixyz[1] = match ixyz[0] {
        1 => {
            if a(1, 1) > a(2, 1) {
                2
            } else {
                3
            }
        }
        2 => {
            if a(0, 1) > a(2, 1) {
                1
            } else {
                3
            }
        }
        _ => {
            if a(0, 1) > a(1, 1) {
                1
            } else {
                2
            }
        }
    };
    ixyz[2] = 6 - ixyz[0] - ixyz[1];

    let mut perm = [1, 2, 3];
    for (source, &world) in ixyz.iter().enumerate() {
        perm[world - 1] = source + 1;
    }
    perm
}

/// Compute the RAS fields for `affine` over a grid of `dims`.
pub fn compute_ras(
    affine: &Mat4,
    dims: &[usize; 8],
    pix_dims: &[f64; 8],
    sink: &dyn DiagnosticSink,
) -> RasInfo {
    let perm = axis_permutation(affine);

    let mut r = *affine;
    for row in r.iter_mut().take(3) {
        let source = *row;
        for j in 0..3 {
            row[j] = source[perm[j] - 1];
        }
    }
    let flip = [r[0][0] < 0.0, r[1][1] < 0.0, r[2][2] < 0.0];

    let dims_ras = [dims[0], dims[perm[0]], dims[perm[1]], dims[perm[2]]];
    let pix_dims_ras = [
        pix_dims[0],
        pix_dims[perm[0]],
        pix_dims[perm[1]],
        pix_dims[perm[2]],
    ];
    let mut perm_ras = [0i32; 3];
    for j in 0..3 {
        perm_ras[j] = if flip[j] { -(perm[j] as i32) } else { perm[j] as i32 };
    }

    let (mat_ras, to_ras) = if perm == [1, 2, 3] && flip == [false; 3] {
        (*affine, IDENTITY)
    } else {
        // Flip matrix: reverses flipped axes within their extent. It is its
        // own inverse.
        let mut f = IDENTITY;
        for j in 0..3 {
            if flip[j] {
                f[j][j] = -1.0;
                f[j][3] = dims[perm[j]].saturating_sub(1) as f64;
            }
        }
        let mut to_ras = [[0.0; 4]; 4];
        to_ras[3][3] = 1.0;
        for j in 0..3 {
            to_ras[j][perm[j] - 1] = if flip[j] { -1.0 } else { 1.0 };
            to_ras[j][3] = if flip[j] { 1.0 } else { 0.0 };
        }
        (mat_mul(&r, &f), to_ras)
    };

    let (oblique_ras, max_shear_deg) = oblique(&mat_ras, &pix_dims_ras);
    if max_shear_deg > MAX_SHEAR_DEG {
        sink.report(Advisory::warn(
            AdvisoryKind::ObliqueShear,
            format!("voxels are rhomboidal, maximum shear is {:.4} degrees", max_shear_deg),
        ));
    }

    let [_, dx, dy, dz] = dims_ras.map(|d| d as f64);
    RasInfo {
        perm,
        flip,
        perm_ras,
        dims_ras,
        pix_dims_ras,
        mat_ras,
        to_ras,
        oblique_ras,
        max_shear_deg,
        mm000: transform_point(&mat_ras, [-0.5, -0.5, -0.5]),
        mm100: transform_point(&mat_ras, [dx - 0.5, -0.5, -0.5]),
        mm010: transform_point(&mat_ras, [-0.5, dy - 0.5, -0.5]),
        mm001: transform_point(&mat_ras, [-0.5, -0.5, dz - 0.5]),
    }
}

/// World-space unit steps along each RAS axis, and the worst pairwise
/// deviation from a right angle.
fn oblique(mat_ras: &Mat4, pix_dims_ras: &[f64; 4]) -> (Mat4, f64) {
    let step = |axis: usize| {
        let s = pix_dims_ras[axis + 1];
        if s == 0.0 || !s.is_finite() {
            1.0
        } else {
            1.0 / s
        }
    };
    let origin = DVec3::from(transform_point(mat_ras, [0.0; 3]));
    let axes = [
        [step(0), 0.0, 0.0],
        [0.0, step(1), 0.0],
        [0.0, 0.0, step(2)],
    ]
    .map(|p| DVec3::from(transform_point(mat_ras, p)) - origin);

    let mut m = IDENTITY;
    for (col, v) in axes.iter().enumerate() {
        m[0][col] = v.x;
        m[1][col] = v.y;
        m[2][col] = v.z;
    }

    let deviation = |a: DVec3, b: DVec3| (90.0 - a.angle_between(b).to_degrees()).abs();
    let shear = [
        deviation(axes[0], axes[1]),
        deviation(axes[0], axes[2]),
        deviation(axes[1], axes[2]),
    ]
    .into_iter()
    .filter(|d| d.is_finite())
    .fold(0.0, f64::max);
    (m, shear)
}

/// Reorder one 3D frame of `components`-wide elements into RAS order.
///
/// `dims` are the source extents.
pub fn reorder_frame<T: Copy>(src: &[T], dims: [usize; 3], info: &RasInfo, components: usize) -> Vec<T> {
    if info.is_identity() {
        return src.to_vec();
    }
    let src_stride = [components, components * dims[0], components * dims[0] * dims[1]];
    let out_dims = [
        dims[info.perm[0] - 1],
        dims[info.perm[1] - 1],
        dims[info.perm[2] - 1],
    ];

    let mut out = Vec::with_capacity(src.len());
    for z in 0..out_dims[2] {
        for y in 0..out_dims[1] {
            for x in 0..out_dims[0] {
                let mut offset = 0;
                for (j, q) in [x, y, z].into_iter().enumerate() {
                    let source_axis = info.perm[j] - 1;
                    let p = if info.flip[j] { out_dims[j] - 1 - q } else { q };
                    offset += p * src_stride[source_axis];
                }
                out.extend_from_slice(&src[offset..offset + components]);
            }
        }
    }
    out
}

//! Display-range estimation.
//!
//! Decision order: a colormap with a fixed range, then trusted author
//! `cal_min`/`cal_max`, then a robust percentile window from a 1001-bin
//! histogram of the raw voxel values.

use crate::colormap::ColormapRange;
use crate::diagnostics::{Advisory, AdvisoryKind, DiagnosticSink};
use crate::header::Header;
use crate::options::LoadOptions;
use crate::voxels::{with_scalars, VoxelData};

/// Histogram resolution.
pub const N_BINS: usize = 1001;

/// Intensity window of a volume, in scaled units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityStats {
    /// Display minimum.
    pub cal_min: f64,
    /// Display maximum.
    pub cal_max: f64,
    /// Lower robust cut.
    pub robust_min: f64,
    /// Upper robust cut.
    pub robust_max: f64,
    /// Smallest value, `None` when a colormap fixed the range.
    pub global_min: Option<f64>,
    /// Largest value, `None` when a colormap fixed the range.
    pub global_max: Option<f64>,
}

impl IntensityStats {
    fn uniform(min: f64, max: f64, global: Option<(f64, f64)>) -> Self {
        Self {
            cal_min: min,
            cal_max: max,
            robust_min: min,
            robust_max: max,
            global_min: global.map(|g| g.0),
            global_max: global.map(|g| g.1),
        }
    }
}

/// Parameters of the estimator, taken from [`LoadOptions`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityParams {
    /// Accept author `cal_min`/`cal_max`.
    pub trust_cal_min_max: bool,
    /// Tail fraction.
    pub percentile_frac: f64,
    /// Exclude zeros.
    pub ignore_zero_voxels: bool,
}

impl From<&LoadOptions> for IntensityParams {
    fn from(options: &LoadOptions) -> Self {
        Self {
            trust_cal_min_max: options.trust_cal_min_max,
            percentile_frac: options.percentile_frac,
            ignore_zero_voxels: options.ignore_zero_voxels,
        }
    }
}

/// Raw value range and exclusion count from one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scan {
    min: f64,
    max: f64,
    n_voxels: usize,
    excluded: usize,
}

fn is_excluded(v: f64, ignore_zero: bool) -> bool {
    !v.is_finite() || (ignore_zero && v == 0.0)
}

fn scan<T: Copy + Into<f64>>(values: &[T], ignore_zero: bool) -> Scan {
    let mut s = Scan {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        n_voxels: values.len(),
        excluded: 0,
    };
    for &v in values {
        let v: f64 = v.into();
        if is_excluded(v, ignore_zero) {
            s.excluded += 1;
            continue;
        }
        s.min = s.min.min(v);
        s.max = s.max.max(v);
    }
    s
}

fn histogram<T: Copy + Into<f64>>(values: &[T], ignore_zero: bool, min: f64, scl: f64) -> Vec<usize> {
    let mut hist = vec![0usize; N_BINS];
    for &v in values {
        let v: f64 = v.into();
        if is_excluded(v, ignore_zero) {
            continue;
        }
        let bin = ((v - min) * scl).round().clamp(0.0, (N_BINS - 1) as f64) as usize;
        hist[bin] += 1;
    }
    hist
}

/// Low and high cut bins covering `n2pct` voxels from each end.
///
/// If both cuts land on the same bin the window is widened one bin at a
/// time, low side first, until a populated bin is reached or the histogram
/// is exhausted.
pub fn robust_bins(hist: &[usize], n2pct: usize) -> (usize, usize) {
    let n_bins = hist.len();
    if n_bins == 0 {
        return (0, 0);
    }

    let mut n = 0;
    let mut lo = 0;
    while lo < n_bins && n < n2pct {
        n += hist[lo];
        lo += 1;
    }
    lo = lo.saturating_sub(1);

    n = 0;
    let mut hi = n_bins;
    while hi > 0 && n < n2pct {
        hi -= 1;
        n += hist[hi];
    }
    hi = hi.min(n_bins - 1);

    if lo == hi {
        loop {
            if lo > 0 {
                lo -= 1;
                if hist[lo] > 0 {
                    break;
                }
            }
            if hi < n_bins - 1 {
                hi += 1;
                if hist[hi] > 0 {
                    break;
                }
            }
            if lo == 0 && hi == n_bins - 1 {
                break;
            }
        }
    }
    (lo, hi)
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn from_data<T: Copy + Into<f64>>(
    values: &[T],
    header: &Header,
    params: &IntensityParams,
    sink: &dyn DiagnosticSink,
) -> IntensityStats {
    let s = scan(values, params.ignore_zero_voxels);
    if s.min > s.max {
        sink.report(Advisory::warn(
            AdvisoryKind::NoIntensityVariability,
            "no finite voxel values, intensity range set to zero",
        ));
        return IntensityStats::uniform(0.0, 0.0, Some((0.0, 0.0)));
    }

    let (mn_scale, mx_scale) = ordered(header.raw_to_scaled(s.min), header.raw_to_scaled(s.max));
    let n2pct = ((s.n_voxels - s.excluded) as f64 * params.percentile_frac).round();
    if n2pct < 1.0 || s.min == s.max {
        if s.min == s.max {
            sink.report(Advisory::info(
                AdvisoryKind::NoIntensityVariability,
                format!("all voxels equal {}", mn_scale),
            ));
        }
        return IntensityStats::uniform(mn_scale, mx_scale, Some((mn_scale, mx_scale)));
    }

    let scl = (N_BINS - 1) as f64 / (s.max - s.min);
    let hist = histogram(values, params.ignore_zero_voxels, s.min, scl);
    let (lo, hi) = robust_bins(&hist, n2pct as usize);

    let (mut pct_lo, mut pct_hi) = ordered(
        header.raw_to_scaled(lo as f64 / scl + s.min),
        header.raw_to_scaled(hi as f64 / scl + s.min),
    );
    if header.cal_min < header.cal_max && header.cal_min > mn_scale && header.cal_max < mx_scale {
        pct_lo = header.cal_min;
        pct_hi = header.cal_max;
    }
    IntensityStats {
        cal_min: pct_lo,
        cal_max: pct_hi,
        robust_min: pct_lo,
        robust_max: pct_hi,
        global_min: Some(mn_scale),
        global_max: Some(mx_scale),
    }
}

/// Estimate the display window of `voxels`.
///
/// Packed colour volumes use a fixed `0..255` window.
pub fn estimate_intensity(
    voxels: &VoxelData,
    header: &Header,
    colormap: Option<ColormapRange>,
    params: &IntensityParams,
    sink: &dyn DiagnosticSink,
) -> IntensityStats {
    if let Some(range) = colormap.filter(ColormapRange::fixes_range) {
        return IntensityStats::uniform(range.min, range.max, None);
    }

    if params.trust_cal_min_max
        && header.cal_min.is_finite()
        && header.cal_max.is_finite()
        && header.cal_min < header.cal_max
    {
        return IntensityStats::uniform(
            header.cal_min,
            header.cal_max,
            Some((header.cal_min, header.cal_max)),
        );
    }

    with_scalars!(
        voxels,
        v => from_data(v, header, params, sink),
        IntensityStats::uniform(0.0, 255.0, Some((0.0, 255.0)))
    )
}

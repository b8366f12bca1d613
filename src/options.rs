//! Load-time configuration.

/// Default fraction of voxels trimmed from each tail of the histogram.
pub const DEFAULT_PERCENTILE_FRAC: f64 = 0.02;

/// Options controlling affine arbitration, intensity estimation and the
/// initial display state of a loaded [`crate::Image`].
///
/// # Example
/// ```
/// use medvol::LoadOptions;
///
/// let options = LoadOptions::default()
///     .prefer_qform(true)
///     .ignore_zero_voxels(true)
///     .colormap("hot");
/// assert!(options.prefer_qform);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Use the quaternion transform even if the sform ranks higher.
    pub prefer_qform: bool,
    /// Accept header `cal_min`/`cal_max` as the display range when valid.
    pub trust_cal_min_max: bool,
    /// Fraction trimmed from each histogram tail for the robust range.
    pub percentile_frac: f64,
    /// Exclude exact-zero voxels from the robust range.
    pub ignore_zero_voxels: bool,
    /// Initial colormap name.
    pub colormap: String,
    /// Initial opacity in `[0, 1]`.
    pub opacity: f32,
    /// Initial visibility.
    pub visible: bool,
    /// Copy every element when promoting Int8/UInt32/Int32/Int64 voxels.
    ///
    /// When false the final element is left at zero.
    pub promote_all_voxels: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            prefer_qform: false,
            trust_cal_min_max: true,
            percentile_frac: DEFAULT_PERCENTILE_FRAC,
            ignore_zero_voxels: false,
            colormap: "gray".to_string(),
            opacity: 1.0,
            visible: true,
            promote_all_voxels: false,
        }
    }
}

impl LoadOptions {
    /// Prefer the qform transform.
    pub fn prefer_qform(mut self, prefer: bool) -> Self {
        self.prefer_qform = prefer;
        self
    }

    /// Trust author-supplied `cal_min`/`cal_max`.
    pub fn trust_cal_min_max(mut self, trust: bool) -> Self {
        self.trust_cal_min_max = trust;
        self
    }

    /// Set the tail fraction, clamped to `[0, 0.5]`. NaN falls back to the default.
    pub fn percentile_frac(mut self, frac: f64) -> Self {
        self.percentile_frac = if frac.is_nan() {
            DEFAULT_PERCENTILE_FRAC
        } else {
            frac.clamp(0.0, 0.5)
        };
        self
    }

    /// Exclude zero voxels from the robust range.
    pub fn ignore_zero_voxels(mut self, ignore: bool) -> Self {
        self.ignore_zero_voxels = ignore;
        self
    }

    /// Initial colormap.
    pub fn colormap(mut self, name: &str) -> Self {
        self.colormap = name.to_string();
        self
    }

    /// Initial opacity, clamped to `[0, 1]`.
    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = if opacity.is_nan() {
            1.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
        self
    }

    /// Initial visibility.
    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Copy every voxel during datatype promotion.
    pub fn promote_all_voxels(mut self, all: bool) -> Self {
        self.promote_all_voxels = all;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = LoadOptions::default();
        assert!(!o.prefer_qform);
        assert!(o.trust_cal_min_max);
        assert_eq!(o.percentile_frac, 0.02);
        assert_eq!(o.colormap, "gray");
        assert!(!o.promote_all_voxels);
    }

    #[test]
    fn builder_clamps() {
        let o = LoadOptions::default()
            .percentile_frac(0.9)
            .opacity(-3.0);
        assert_eq!(o.percentile_frac, 0.5);
        assert_eq!(o.opacity, 0.0);

        let o = LoadOptions::default().percentile_frac(f64::NAN);
        assert_eq!(o.percentile_frac, DEFAULT_PERCENTILE_FRAC);
    }
}

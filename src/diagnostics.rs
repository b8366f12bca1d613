//! Advisory channel for recoverable data-quality problems.
//!
//! Decoders and normalizers never abort on a defective affine, a size
//! mismatch or an unknown header key. They report an [`Advisory`] to the
//! injected [`DiagnosticSink`] and continue, so batch loads survive
//! per-volume quirks.

use std::fmt;
use std::sync::Mutex;

/// Category of a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvisoryKind {
    /// Affine was invalid and replaced by a diagonal spacing matrix.
    DefectiveAffine,
    /// Voxel buffer length disagrees with the header dimensions.
    DimensionMismatch,
    /// Header key not recognized by the decoder.
    UnknownKey,
    /// Orientation code or coordinate-space value not recognized.
    UnknownOrientationValue,
    /// Voxel axes are not orthogonal (shear or gantry tilt).
    ObliqueShear,
    /// All voxels share one value; robust range collapsed.
    NoIntensityVariability,
    /// A field holds a value outside its expected domain.
    InvalidFieldValue,
}

impl AdvisoryKind {
    /// Stable lower-case name, used as the `kind` field in log events.
    pub const fn name(self) -> &'static str {
        match self {
            Self::DefectiveAffine => "defective_affine",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::UnknownKey => "unknown_key",
            Self::UnknownOrientationValue => "unknown_orientation_value",
            Self::ObliqueShear => "oblique_shear",
            Self::NoIntensityVariability => "no_intensity_variability",
            Self::InvalidFieldValue => "invalid_field_value",
        }
    }
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of an advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Informational, nothing is wrong with the output.
    Info,
    /// Output was repaired or may be inaccurate.
    Warn,
}

/// One recoverable condition observed during a load.
#[derive(Debug, Clone, PartialEq)]
pub struct Advisory {
    /// What happened.
    pub kind: AdvisoryKind,
    /// How serious it is.
    pub level: Level,
    /// Human-readable detail.
    pub message: String,
}

impl Advisory {
    /// Warning-level advisory.
    pub fn warn(kind: AdvisoryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            level: Level::Warn,
            message: message.into(),
        }
    }

    /// Info-level advisory.
    pub fn info(kind: AdvisoryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            level: Level::Info,
            message: message.into(),
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Receiver for advisories.
///
/// Shared across worker threads during batch loads, hence `Send + Sync`.
pub trait DiagnosticSink: Send + Sync {
    /// Record one advisory.
    fn report(&self, advisory: Advisory);
}

/// Forwards advisories to `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, advisory: Advisory) {
        match advisory.level {
            Level::Info => tracing::info!(kind = advisory.kind.name(), "{}", advisory.message),
            Level::Warn => tracing::warn!(kind = advisory.kind.name(), "{}", advisory.message),
        }
    }
}

/// Stores advisories in memory for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<Advisory>>,
}

impl CollectingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn advisories(&self) -> Vec<Advisory> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True if at least one advisory of `kind` was reported.
    pub fn contains(&self, kind: AdvisoryKind) -> bool {
        self.advisories().iter().any(|a| a.kind == kind)
    }

    /// Drain all stored advisories.
    pub fn take(&self) -> Vec<Advisory> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, advisory: Advisory) {
        tracing::debug!(kind = advisory.kind.name(), "{}", advisory.message);
        match self.entries.lock() {
            Ok(mut entries) => entries.push(advisory),
            Err(poisoned) => poisoned.into_inner().push(advisory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_in_order() {
        let sink = CollectingSink::new();
        sink.report(Advisory::warn(AdvisoryKind::UnknownKey, "foo"));
        sink.report(Advisory::info(AdvisoryKind::ObliqueShear, "bar"));

        let got = sink.advisories();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].kind, AdvisoryKind::UnknownKey);
        assert_eq!(got[1].level, Level::Info);
        assert!(sink.contains(AdvisoryKind::ObliqueShear));
        assert!(!sink.contains(AdvisoryKind::DefectiveAffine));
    }

    #[test]
    fn take_drains() {
        let sink = CollectingSink::new();
        sink.report(Advisory::warn(AdvisoryKind::DimensionMismatch, "x"));
        assert_eq!(sink.take().len(), 1);
        assert!(sink.advisories().is_empty());
    }

    #[test]
    fn display_includes_kind() {
        let a = Advisory::warn(AdvisoryKind::DefectiveAffine, "repaired");
        assert_eq!(a.to_string(), "[defective_affine] repaired");
    }
}

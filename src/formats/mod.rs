//! Format detection and the four header decoders.
//!
//! Every decoder turns raw bytes (plus an optional companion buffer) into a
//! canonical [`Header`] and the still-encoded voxel bytes. Decoders are pure:
//! the only side channel is the advisory sink in [`DecodeContext`].

pub mod afni;
pub mod mgh;
pub mod nifti;
pub mod nrrd;

use crate::compression::{is_gzip, Inflate};
use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::header::Header;
use std::borrow::Cow;

/// Supported volume formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeFormat {
    /// NIfTI-1 / NIfTI-2, optionally gzipped. The fallback for unknown names.
    Nifti,
    /// FreeSurfer MGH / MGZ.
    Mgh,
    /// AFNI `.HEAD` attribute file; voxels live in the paired `.BRIK`.
    AfniHead,
    /// NRRD / detached NHDR.
    Nrrd,
}

impl VolumeFormat {
    /// True if the voxel data always lives in a companion buffer.
    pub const fn requires_paired_data(self) -> bool {
        matches!(self, Self::AfniHead)
    }

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nifti => "NIfTI",
            Self::Mgh => "MGH",
            Self::AfniHead => "AFNI HEAD/BRIK",
            Self::Nrrd => "NRRD",
        }
    }
}

impl std::fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Collaborators available to every decoder.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    /// Decompression primitive.
    pub inflater: &'a dyn Inflate,
    /// Advisory sink.
    pub diagnostics: &'a dyn DiagnosticSink,
}

/// Output of a header decoder.
#[derive(Debug, Clone)]
pub struct DecodedVolume<'a> {
    /// Canonical header.
    pub header: Header,
    /// Voxel bytes, still in the stored encoding and byte order.
    pub voxel_bytes: Cow<'a, [u8]>,
}

/// Lower-cased final extension of `name`, looking through a trailing `.gz`.
fn extension(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    let trimmed = lower.strip_suffix(".gz").unwrap_or(&lower);
    let (_, ext) = trimmed.rsplit_once('.')?;
    if ext.contains('/') || ext.contains('\\') {
        return None;
    }
    Some(ext.to_string())
}

/// Select a decoder from the file name and leading bytes.
///
/// A NIfTI header-size field (348 or 540, either byte order) wins over the
/// name. Otherwise the extension decides case-insensitively, and anything
/// unrecognized, gzip-wrapped or not, falls through to NIfTI.
pub fn sniff(name: &str, bytes: &[u8]) -> VolumeFormat {
    if nifti::detect_version(bytes).is_some() {
        return VolumeFormat::Nifti;
    }
    let format = match extension(name).as_deref() {
        Some("mgh") | Some("mgz") => VolumeFormat::Mgh,
        Some("head") => VolumeFormat::AfniHead,
        Some("nrrd") | Some("nhdr") => VolumeFormat::Nrrd,
        _ if !is_gzip(bytes) && bytes.starts_with(nrrd::MAGIC) => VolumeFormat::Nrrd,
        _ => VolumeFormat::Nifti,
    };
    tracing::debug!(file = name, format = format.name(), "detected volume format");
    format
}

/// Run the decoder for `format`.
pub fn decode<'a>(
    format: VolumeFormat,
    bytes: &'a [u8],
    paired: Option<&'a [u8]>,
    ctx: &DecodeContext<'_>,
) -> Result<DecodedVolume<'a>> {
    match format {
        VolumeFormat::Nifti => nifti::decode(bytes, paired, ctx),
        VolumeFormat::Mgh => mgh::decode(bytes, ctx),
        VolumeFormat::AfniHead => afni::decode(bytes, paired, ctx),
        VolumeFormat::Nrrd => nrrd::decode(bytes, paired, ctx),
    }
}

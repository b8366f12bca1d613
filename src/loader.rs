//! Decode pipeline: sniff, decode header, decode voxels, build the image.
//!
//! Every volume is decoded on a single thread. [`VolumeLoader::load_many`]
//! runs independent volumes in parallel with rayon.

use crate::colormap::{BuiltinColormaps, ColormapRegistry};
use crate::compression::{GzipInflater, Inflate};
use crate::diagnostics::{Advisory, AdvisoryKind, DiagnosticSink, TracingSink};
use crate::error::{Error, Result};
use crate::formats::{self, DecodeContext, VolumeFormat};
use crate::image::Image;
use crate::options::LoadOptions;
use crate::voxels::decode_voxels;
use rayon::prelude::*;

static GZIP: GzipInflater = GzipInflater;
static TRACING: TracingSink = TracingSink;
static BUILTIN: BuiltinColormaps = BuiltinColormaps;

/// One input of a batch load.
#[derive(Debug, Clone, Copy)]
pub struct VolumeSource<'a> {
    /// File name, used for format detection and as the image name.
    pub name: &'a str,
    /// Primary buffer.
    pub bytes: &'a [u8],
    /// Companion buffer (`.BRIK`, `.img`, detached NRRD data).
    pub paired: Option<&'a [u8]>,
}

impl<'a> VolumeSource<'a> {
    /// Single-buffer source.
    pub fn new(name: &'a str, bytes: &'a [u8]) -> Self {
        Self {
            name,
            bytes,
            paired: None,
        }
    }

    /// Attach a companion buffer.
    pub fn with_paired(mut self, paired: &'a [u8]) -> Self {
        self.paired = Some(paired);
        self
    }
}

/// Configured decode pipeline.
///
/// # Example
/// ```
/// use medvol::{CollectingSink, LoadOptions, VolumeLoader};
///
/// let sink = CollectingSink::new();
/// let options = LoadOptions::default().percentile_frac(0.05);
/// let loader = VolumeLoader::new().options(&options).diagnostics(&sink);
/// assert!(loader.load("missing.HEAD", b"", None).is_err());
/// ```
#[derive(Clone, Copy)]
pub struct VolumeLoader<'a> {
    options: &'a LoadOptions,
    inflater: &'a dyn Inflate,
    diagnostics: &'a dyn DiagnosticSink,
    colormaps: &'a dyn ColormapRegistry,
}

static DEFAULT_OPTIONS: std::sync::OnceLock<LoadOptions> = std::sync::OnceLock::new();

impl Default for VolumeLoader<'static> {
    fn default() -> Self {
        Self {
            options: DEFAULT_OPTIONS.get_or_init(LoadOptions::default),
            inflater: &GZIP,
            diagnostics: &TRACING,
            colormaps: &BUILTIN,
        }
    }
}

impl VolumeLoader<'static> {
    /// Loader with default options, gzip, tracing diagnostics and the
    /// builtin colormaps.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a> VolumeLoader<'a> {
    /// Use `options`.
    pub fn options<'b>(self, options: &'b LoadOptions) -> VolumeLoader<'b>
    where
        'a: 'b,
    {
        VolumeLoader {
            options,
            inflater: self.inflater,
            diagnostics: self.diagnostics,
            colormaps: self.colormaps,
        }
    }

    /// Use a different decompressor.
    pub fn inflater<'b>(self, inflater: &'b dyn Inflate) -> VolumeLoader<'b>
    where
        'a: 'b,
    {
        VolumeLoader {
            options: self.options,
            inflater,
            diagnostics: self.diagnostics,
            colormaps: self.colormaps,
        }
    }

    /// Send advisories to `sink`.
    pub fn diagnostics<'b>(self, sink: &'b dyn DiagnosticSink) -> VolumeLoader<'b>
    where
        'a: 'b,
    {
        VolumeLoader {
            options: self.options,
            inflater: self.inflater,
            diagnostics: sink,
            colormaps: self.colormaps,
        }
    }

    /// Look colormaps up in `registry`.
    pub fn colormaps<'b>(self, registry: &'b dyn ColormapRegistry) -> VolumeLoader<'b>
    where
        'a: 'b,
    {
        VolumeLoader {
            options: self.options,
            inflater: self.inflater,
            diagnostics: self.diagnostics,
            colormaps: registry,
        }
    }

    /// Options in use.
    pub fn load_options(&self) -> &LoadOptions {
        self.options
    }

    /// Decode one volume.
    ///
    /// Fatal problems return an error and no image. Recoverable ones are
    /// reported to the diagnostic sink.
    pub fn load(&self, name: &str, bytes: &[u8], paired: Option<&[u8]>) -> Result<Image> {
        let format = formats::sniff(name, bytes);
        self.load_as(format, name, bytes, paired)
    }

    /// Decode one volume with a known format.
    pub fn load_as(
        &self,
        format: VolumeFormat,
        name: &str,
        bytes: &[u8],
        paired: Option<&[u8]>,
    ) -> Result<Image> {
        if format.requires_paired_data() && paired.is_none() {
            return Err(Error::MissingPairedData(format!(
                "{} ({}) needs a companion data buffer",
                name, format
            )));
        }
        let ctx = DecodeContext {
            inflater: self.inflater,
            diagnostics: self.diagnostics,
        };
        let decoded = formats::decode(format, bytes, paired, &ctx)?;
        let header = decoded.header;
        tracing::debug!(
            file = name,
            format = format.name(),
            datatype = %header.datatype,
            dims = ?&header.dims[..=header.ndim()],
            "decoded header"
        );

        let voxels = decode_voxels(&header, decoded.voxel_bytes, self.options.promote_all_voxels)?;
        let expected = header.checked_voxel_count()?;
        if voxels.len() != expected {
            self.diagnostics.report(Advisory::warn(
                AdvisoryKind::DimensionMismatch,
                format!(
                    "{}: header declares {} voxels, buffer holds {}",
                    name,
                    expected,
                    voxels.len()
                ),
            ));
        }

        Image::new(
            name,
            header,
            voxels,
            self.options,
            self.colormaps,
            self.diagnostics,
        )
    }

    /// Decode independent volumes in parallel, one result per source.
    pub fn load_many(&self, sources: &[VolumeSource<'_>]) -> Vec<Result<Image>> {
        sources
            .par_iter()
            .map(|s| self.load(s.name, s.bytes, s.paired))
            .collect()
    }
}

/// Decode one volume with default settings.
pub fn load(name: &str, bytes: &[u8], paired: Option<&[u8]>) -> Result<Image> {
    VolumeLoader::new().load(name, bytes, paired)
}

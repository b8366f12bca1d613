//! Error types for volume decoding.
//!
//! Only fatal conditions are errors. Recoverable data-quality problems are
//! reported through [`crate::diagnostics`] and never abort a load.

use thiserror::Error;

/// Errors that abort decoding of a volume.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure while reading an in-memory stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datatype code with no numeric interpretation.
    #[error("unsupported data type code {0}")]
    UnsupportedDataType(i32),

    /// Declared compression scheme is not implemented.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// A text header is missing a required delimiter or key.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Header dimensions violate basic invariants.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Neither a NIfTI-1 nor a NIfTI-2 header.
    #[error("invalid NIfTI magic bytes {0:?}")]
    InvalidMagic([u8; 4]),

    /// The format requires a companion data buffer that was not supplied.
    #[error("missing paired data: {0}")]
    MissingPairedData(String),

    /// Gzip stream could not be decoded.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Colormap name not known to the registry.
    #[error("unknown colormap: '{0}'")]
    UnknownColormap(String),

    /// 4D frame index beyond the number of frames.
    #[error("frame {index} out of range (volume has {frames} frames)")]
    FrameOutOfRange {
        /// Requested frame.
        index: usize,
        /// Number of frames in the volume.
        frames: usize,
    },
}

/// Result type alias for medvol operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Decoding and normalization of 3D/4D brain volumes.
//!
//! `medvol` reads NIfTI-1/2 (`.nii`, `.nii.gz`, `.hdr`/`.img`), FreeSurfer
//! MGH/MGZ, AFNI `.HEAD`/`.BRIK` and NRRD/NHDR volumes from in-memory
//! buffers into a canonical [`Image`]: a unified [`Header`], decoded
//! [`VoxelData`], an affine resolved for display, RAS-oriented geometry and a
//! robust display intensity window.
//!
//! Fatal problems are returned as [`Error`]. Recoverable data-quality issues
//! (defective affines, oblique shear, short buffers, unknown header keys)
//! are reported as [`Advisory`] values through a [`DiagnosticSink`] and the
//! load continues.
//!
//! # Example
//! ```
//! use medvol::{CollectingSink, DataType, VolumeLoader};
//!
//! let mut bytes = b"NRRD0004\ntype: uchar\nsizes: 2 2 2\nencoding: raw\n\n".to_vec();
//! bytes.extend_from_slice(&[0, 10, 20, 30, 40, 50, 60, 70]);
//!
//! let sink = CollectingSink::new();
//! let image = VolumeLoader::new()
//!     .diagnostics(&sink)
//!     .load("tiny.nrrd", &bytes, None)
//!     .unwrap();
//! assert_eq!(image.datatype(), DataType::UInt8);
//! assert_eq!(image.ras().dims_ras[1..], [2, 2, 2]);
//! ```

pub mod affine;
pub mod colormap;
pub mod compression;
pub mod diagnostics;
pub mod error;
pub mod formats;
pub mod header;
pub mod image;
pub mod intensity;
pub mod loader;
pub mod options;
pub mod ras;
pub mod voxels;

pub use affine::{AffineSource, ResolvedAffine};
pub use colormap::{BuiltinColormaps, ColormapRange, ColormapRegistry, ColormapTable};
pub use compression::{GzipInflater, Inflate};
pub use diagnostics::{Advisory, AdvisoryKind, CollectingSink, DiagnosticSink, Level, TracingSink};
pub use error::{Error, Result};
pub use formats::{sniff, VolumeFormat};
pub use header::{DataType, Header, Mat4};
pub use image::Image;
pub use intensity::IntensityStats;
pub use loader::{load, VolumeLoader, VolumeSource};
pub use options::LoadOptions;
pub use ras::RasInfo;
pub use voxels::VoxelData;

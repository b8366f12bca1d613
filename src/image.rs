//! The canonical decoded volume.
//!
//! An [`Image`] owns its header and voxels. RAS fields and intensity
//! statistics are derived from them and recomputed explicitly whenever an
//! input changes (colormap, orientation source, cloning).

use crate::affine::{invert, resolve_affine, transform_point, ResolvedAffine};
use crate::colormap::{ColormapRange, ColormapRegistry};
use crate::diagnostics::DiagnosticSink;
use crate::error::{Error, Result};
use crate::header::{DataType, Header};
use crate::intensity::{estimate_intensity, IntensityParams, IntensityStats};
use crate::options::LoadOptions;
use crate::ras::{compute_ras, reorder_frame, RasInfo};
use crate::voxels::VoxelData;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::ops::Range;
use uuid::Uuid;

/// A decoded volume with derived spatial and intensity fields.
#[derive(Debug, Clone)]
pub struct Image {
    id: Uuid,
    name: String,
    header: Header,
    voxels: VoxelData,
    colormap: String,
    colormap_range: Option<ColormapRange>,
    opacity: f32,
    visible: bool,
    frame_4d: usize,
    prefer_qform: bool,
    params: IntensityParams,
    resolved: ResolvedAffine,
    ras: RasInfo,
    intensity: IntensityStats,
}

impl Image {
    /// Build an image and derive its RAS and intensity fields.
    ///
    /// `header.datatype` is rewritten to the in-memory type of `voxels`.
    pub fn new(
        name: impl Into<String>,
        header: Header,
        voxels: VoxelData,
        options: &LoadOptions,
        colormaps: &dyn ColormapRegistry,
        sink: &dyn DiagnosticSink,
    ) -> Result<Self> {
        let colormap_range = colormaps
            .lookup(&options.colormap)
            .ok_or_else(|| Error::UnknownColormap(options.colormap.clone()))?;
        let header = header.with_datatype(voxels.datatype());
        header.checked_voxel_count()?;
        let resolved = resolve_affine(&header, options.prefer_qform, sink);
        let ras = compute_ras(&resolved.affine, &header.dims, &resolved.pix_dims, sink);
        let params = IntensityParams::from(options);
        let intensity = estimate_intensity(&voxels, &header, Some(colormap_range), &params, sink);

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            header,
            voxels,
            colormap: options.colormap.clone(),
            colormap_range: Some(colormap_range),
            opacity: options.opacity,
            visible: options.visible,
            frame_4d: 0,
            prefer_qform: options.prefer_qform,
            params,
            resolved,
            ras,
            intensity,
        })
    }

    /// Unique id, fresh for every load and every [`Image::duplicate`].
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical header; `datatype` is the in-memory type.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Decoded voxels, all frames.
    pub fn voxels(&self) -> &VoxelData {
        &self.voxels
    }

    /// In-memory datatype.
    pub fn datatype(&self) -> DataType {
        self.voxels.datatype()
    }

    /// Affine in use and where it came from.
    pub fn resolved_affine(&self) -> &ResolvedAffine {
        &self.resolved
    }

    /// RAS-derived fields.
    pub fn ras(&self) -> &RasInfo {
        &self.ras
    }

    /// Intensity window.
    pub fn intensity(&self) -> &IntensityStats {
        &self.intensity
    }

    /// Display minimum.
    pub fn cal_min(&self) -> f64 {
        self.intensity.cal_min
    }

    /// Display maximum.
    pub fn cal_max(&self) -> f64 {
        self.intensity.cal_max
    }

    /// Colormap name.
    pub fn colormap(&self) -> &str {
        &self.colormap
    }

    /// Opacity in `[0, 1]`.
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Whether the image is shown.
    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Whether the quaternion transform is preferred.
    pub fn prefer_qform(&self) -> bool {
        self.prefer_qform
    }

    /// Current 4D frame.
    pub fn frame_4d(&self) -> usize {
        self.frame_4d
    }

    /// Number of 3D frames.
    pub fn n_frame_4d(&self) -> usize {
        self.header.n_frame_4d()
    }

    /// Re-resolve the affine and recompute the RAS fields.
    pub fn recalculate_ras(&mut self, sink: &dyn DiagnosticSink) {
        self.resolved = resolve_affine(&self.header, self.prefer_qform, sink);
        self.ras = compute_ras(
            &self.resolved.affine,
            &self.header.dims,
            &self.resolved.pix_dims,
            sink,
        );
    }

    /// Recompute the intensity window.
    pub fn recalculate_intensity_range(&mut self, sink: &dyn DiagnosticSink) {
        self.intensity = estimate_intensity(
            &self.voxels,
            &self.header,
            self.colormap_range,
            &self.params,
            sink,
        );
    }

    /// Switch colormap and recompute the intensity window.
    pub fn set_colormap(
        &mut self,
        name: &str,
        colormaps: &dyn ColormapRegistry,
        sink: &dyn DiagnosticSink,
    ) -> Result<()> {
        let range = colormaps
            .lookup(name)
            .ok_or_else(|| Error::UnknownColormap(name.to_string()))?;
        self.colormap = name.to_string();
        self.colormap_range = Some(range);
        self.recalculate_intensity_range(sink);
        Ok(())
    }

    /// Set opacity, clamped to `[0, 1]`.
    pub fn set_opacity(&mut self, opacity: f32) {
        if !opacity.is_nan() {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
    }

    /// Show or hide the image.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Select the displayed 4D frame.
    pub fn set_frame_4d(&mut self, index: usize) -> Result<()> {
        let frames = self.n_frame_4d();
        if index >= frames {
            return Err(Error::FrameOutOfRange { index, frames });
        }
        self.frame_4d = index;
        Ok(())
    }

    /// Switch orientation source and recompute the RAS fields.
    pub fn set_prefer_qform(&mut self, prefer: bool, sink: &dyn DiagnosticSink) {
        self.prefer_qform = prefer;
        self.recalculate_ras(sink);
    }

    /// Deep copy with a fresh id and re-derived RAS and intensity fields.
    pub fn duplicate(&self, sink: &dyn DiagnosticSink) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4();
        copy.recalculate_ras(sink);
        copy.recalculate_intensity_range(sink);
        copy
    }

    /// RAS voxel coordinate to world millimetres.
    pub fn vox_to_mm(&self, vox: [f64; 3]) -> [f64; 3] {
        transform_point(&self.ras.mat_ras, vox)
    }

    /// World millimetres to RAS voxel coordinate. `None` if the transform is
    /// singular.
    pub fn mm_to_vox(&self, mm: [f64; 3]) -> Option<[f64; 3]> {
        invert(&self.ras.mat_ras).map(|inv| transform_point(&inv, mm))
    }

    /// Voxel index range of `frame` in the voxel buffer.
    pub fn frame_voxel_range(&self, frame: usize) -> Result<Range<usize>> {
        let frames = self.n_frame_4d();
        if frame >= frames {
            return Err(Error::FrameOutOfRange {
                index: frame,
                frames,
            });
        }
        let n = self.header.n_vox_3d();
        Ok(frame * n..(frame + 1) * n)
    }

    fn check_voxel_count(&self) -> Result<()> {
        let expected = self.header.expected_voxel_count();
        if self.voxels.len() < expected {
            return Err(Error::InvalidDimensions(format!(
                "voxel buffer holds {} voxels, dimensions need {}",
                self.voxels.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Scaled voxel values as an F-order array of shape `[x, y, z]`, or
    /// `[x, y, z, frames]` for 4D volumes.
    pub fn to_f32(&self) -> Result<ArrayD<f32>> {
        self.check_voxel_count()?;
        let expected = self.header.expected_voxel_count();
        let slope = self.header.scl_slope;
        let inter = self.header.scl_inter;
        let data: Vec<f32> = self
            .voxels
            .to_f32_vec()
            .ok_or(Error::UnsupportedDataType(self.datatype().code() as i32))?
            .into_iter()
            .take(expected)
            .map(|v| (v as f64 * slope + inter) as f32)
            .collect();

        let mut shape = vec![self.header.dims[1], self.header.dims[2], self.header.dims[3]];
        if self.n_frame_4d() > 1 {
            shape.push(self.n_frame_4d());
        }
        ArrayD::from_shape_vec(IxDyn(&shape).f(), data)
            .map_err(|e| Error::InvalidDimensions(format!("cannot shape voxel array: {}", e)))
    }

    /// Voxels reordered so that indices run Right, Anterior, Superior.
    pub fn ras_voxels(&self) -> Result<VoxelData> {
        self.check_voxel_count()?;
        let dims = [self.header.dims[1], self.header.dims[2], self.header.dims[3]];
        let frames = self.n_frame_4d();
        let n = self.header.n_vox_3d();

        fn per_frame<T: Copy>(
            src: &[T],
            frames: usize,
            n: usize,
            comps: usize,
            dims: [usize; 3],
            ras: &RasInfo,
        ) -> Vec<T> {
            (0..frames)
                .flat_map(|f| reorder_frame(&src[f * n * comps..(f + 1) * n * comps], dims, ras, comps))
                .collect()
        }

        let ras = &self.ras;
        let out = match &self.voxels {
            VoxelData::UInt8(v) => VoxelData::UInt8(per_frame(v, frames, n, 1, dims, ras)),
            VoxelData::Int16(v) => VoxelData::Int16(per_frame(v, frames, n, 1, dims, ras)),
            VoxelData::UInt16(v) => VoxelData::UInt16(per_frame(v, frames, n, 1, dims, ras)),
            VoxelData::Float32(v) => VoxelData::Float32(per_frame(v, frames, n, 1, dims, ras)),
            VoxelData::Float64(v) => VoxelData::Float64(per_frame(v, frames, n, 1, dims, ras)),
            VoxelData::Rgb24(v) => VoxelData::Rgb24(per_frame(v, frames, n, 3, dims, ras)),
            VoxelData::Rgba32(v) => VoxelData::Rgba32(per_frame(v, frames, n, 4, dims, ras)),
        };
        Ok(out)
    }
}

//! Resampling of registered views into one output grid.
//!
//! Every output voxel is mapped back into each view through the inverse of
//! the view's model. Views whose image contains the mapped point contribute
//! an interpolated intensity and a weight from the configured
//! [`WeightLayers`]. The grid is cut into one contiguous [`ImagePortion`]
//! per thread; each portion writes only its own slice of every output
//! buffer, so the result does not depend on the thread count.

mod group;
mod portion;
mod psf;
mod worker;

pub use group::{fuse_groups, group_views, GroupKey, GroupResult};
pub use portion::{divide_into_portions, split_portions, ImagePortion};
pub use psf::extract_psf;

use crate::error::{Error, Result};
use crate::image::{Interpolation, VolumeF32, VolumeRef};
use crate::model::{InverseModel, TransformModel};
use crate::types::{BoundingBox, ViewId};
use crate::weights::{WeightLayers, WeightingParams};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use worker::{process_portion, PassContext};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// `Σ(v·w) / Σw` per voxel.
    #[default]
    WeightedAverage,
    /// Unweighted `Σv` and view count, accumulated over several batches.
    Sequential,
    /// One intensity and one weight volume per view.
    PreDeconvolution,
    /// Number of views covering each voxel.
    Overlap,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionParams {
    pub mode: FusionMode,
    /// Pre-deconvolution only: rescale weights whose sum exceeds one.
    pub normalize: bool,
    /// World voxels per output voxel.
    pub downsampling: f64,
    pub threads: usize,
    pub interpolation: Interpolation,
    /// Weighted average only: also return the `Σw` volume.
    pub weight_volume: bool,
    pub weighting: WeightingParams,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            mode: FusionMode::WeightedAverage,
            normalize: true,
            downsampling: 1.0,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            interpolation: Interpolation::Linear,
            weight_volume: false,
            weighting: WeightingParams::default(),
        }
    }
}

impl FusionParams {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidParameter("threads must be at least 1".into()));
        }
        if !(self.downsampling.is_finite() && self.downsampling > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "downsampling must be positive, got {}",
                self.downsampling
            )));
        }
        Ok(())
    }
}

/// One registered input view.
#[derive(Clone, Debug)]
pub struct SourceView<'a> {
    pub id: ViewId,
    pub volume: VolumeRef<'a>,
    /// View-local to world transform.
    pub model: TransformModel,
}

impl SourceView<'_> {
    pub fn dims(&self) -> [usize; 3] {
        [self.volume.w, self.volume.h, self.volume.d]
    }
}

/// An output volume placed in world space: voxel `i` sits at `origin + i * scale`.
#[derive(Clone, Debug)]
pub struct FusedVolume {
    pub origin: [f64; 3],
    pub scale: f64,
    pub volume: VolumeF32,
}

/// Result of one fusion run.
///
/// Weighted average: one volume, optionally one weight volume.
/// Sequential: the normalized volume and the per-voxel view count.
/// Pre-deconvolution: one volume and one weight volume per view, in input order.
/// Overlap: one count volume.
#[derive(Clone, Debug, Default)]
pub struct FusionOutput {
    pub volumes: Vec<FusedVolume>,
    pub weights: Vec<FusedVolume>,
}

/// Fixed-size pool for one run.
pub fn build_pool(threads: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()?)
}

/// Fuse `views` into the grid spanned by `bbox`.
///
/// Builds the thread pool and the weighting layers named in `params`,
/// then runs a single pass.
pub fn fuse(
    bbox: &BoundingBox,
    views: &[SourceView<'_>],
    params: &FusionParams,
) -> Result<FusionOutput> {
    params.validate()?;
    let pool = build_pool(params.threads)?;
    let layers = if matches!(params.mode, FusionMode::Sequential | FusionMode::Overlap) {
        WeightLayers::none()
    } else {
        let refs: Vec<VolumeRef<'_>> = views.iter().map(|v| v.volume).collect();
        WeightLayers::build(
            &pool,
            &refs,
            &params.weighting.isolated_factories(),
            &params.weighting.combined,
        )?
    };
    fuse_with_layers(&pool, bbox, views, &layers, params)
}

/// Like [`fuse`] with caller-provided pool and weighting layers.
pub fn fuse_with_layers(
    pool: &ThreadPool,
    bbox: &BoundingBox,
    views: &[SourceView<'_>],
    layers: &WeightLayers,
    params: &FusionParams,
) -> Result<FusionOutput> {
    params.validate()?;
    if views.is_empty() {
        return Err(Error::InvalidParameter("no views to fuse".into()));
    }
    let dims = bbox.dimensions(params.downsampling);
    let placed = |volume| FusedVolume {
        origin: [bbox.min[0] as f64, bbox.min[1] as f64, bbox.min[2] as f64],
        scale: params.downsampling,
        volume,
    };

    match params.mode {
        FusionMode::Sequential => {
            let mut seq = SequentialFusion::with_pool(*bbox, params, pool)?;
            seq.add_views(views, layers)?;
            let (volume, count) = seq.finish();
            Ok(FusionOutput {
                volumes: vec![placed(volume)],
                weights: vec![placed(count)],
            })
        }
        mode => {
            let mut buffers = Vec::new();
            match mode {
                FusionMode::WeightedAverage => {
                    buffers.push(VolumeF32::try_zeros(dims, "fused volume")?);
                    if params.weight_volume {
                        buffers.push(VolumeF32::try_zeros(dims, "weight volume")?);
                    }
                }
                FusionMode::PreDeconvolution => {
                    for view in views {
                        buffers.push(VolumeF32::try_zeros(dims, &format!("view {}", view.id))?);
                        buffers.push(VolumeF32::try_zeros(
                            dims,
                            &format!("weights of view {}", view.id),
                        )?);
                    }
                }
                _ => buffers.push(VolumeF32::try_zeros(dims, "overlap map")?),
            }
            run_pass(pool, bbox, views, layers, params, &mut buffers);

            let mut out = FusionOutput::default();
            let mut it = buffers.into_iter();
            match mode {
                FusionMode::PreDeconvolution => {
                    while let (Some(v), Some(w)) = (it.next(), it.next()) {
                        out.volumes.push(placed(v));
                        out.weights.push(placed(w));
                    }
                }
                _ => {
                    out.volumes.extend(it.next().map(placed));
                    out.weights.extend(it.next().map(placed));
                }
            }
            Ok(out)
        }
    }
}

/// Invert each model once; views that cannot be inverted are skipped for
/// the whole run.
fn invert_models(views: &[SourceView<'_>]) -> Vec<Option<InverseModel>> {
    views
        .iter()
        .map(|v| match v.model.inverse() {
            Ok(inv) => Some(inv),
            Err(e) => {
                warn!("view {} is skipped: {e}", v.id);
                None
            }
        })
        .collect()
}

fn run_pass(
    pool: &ThreadPool,
    bbox: &BoundingBox,
    views: &[SourceView<'_>],
    layers: &WeightLayers,
    params: &FusionParams,
    buffers: &mut [VolumeF32],
) {
    let start = Instant::now();
    let dims = bbox.dimensions(params.downsampling);
    let inverses = invert_models(views);
    let ctx = PassContext {
        dims,
        origin: bbox.min_f64(),
        scale: params.downsampling,
        views,
        inverses: &inverses,
        layers,
        mode: params.mode,
        normalize: params.normalize,
        interpolation: params.interpolation,
        weight_volume: params.weight_volume,
    };

    let total = dims[0] * dims[1] * dims[2];
    let portions = divide_into_portions(total, params.threads);
    let mut outputs: Vec<Vec<&mut [f32]>> = portions
        .iter()
        .map(|_| Vec::with_capacity(buffers.len()))
        .collect();
    for buffer in buffers.iter_mut() {
        for (slot, slice) in outputs
            .iter_mut()
            .zip(split_portions(&mut buffer.data, &portions))
        {
            slot.push(slice);
        }
    }

    pool.install(|| {
        portions
            .par_iter()
            .zip(outputs.par_iter_mut())
            .for_each(|(portion, out)| process_portion(&ctx, *portion, out));
    });
    info!(
        "fused {} views into {:?} ({:?}) in {:.1} ms",
        views.len(),
        dims,
        params.mode,
        start.elapsed().as_secs_f64() * 1000.0
    );
}

/// Divide accumulated intensities by the number of contributing views.
pub fn normalize_accumulated(sum: &mut VolumeF32, count: &VolumeF32) {
    for (v, &n) in sum.data.iter_mut().zip(&count.data) {
        if n > 0.0 {
            *v /= n;
        }
    }
}

/// Fuses views batch by batch into the same output, e.g. when not all
/// views fit in memory at once.
pub struct SequentialFusion<'p> {
    bbox: BoundingBox,
    params: FusionParams,
    pool: PoolRef<'p>,
    sum: VolumeF32,
    count: VolumeF32,
}

enum PoolRef<'p> {
    Owned(ThreadPool),
    Borrowed(&'p ThreadPool),
}

impl PoolRef<'_> {
    fn get(&self) -> &ThreadPool {
        match self {
            PoolRef::Owned(p) => p,
            PoolRef::Borrowed(p) => p,
        }
    }
}

impl SequentialFusion<'static> {
    pub fn new(bbox: BoundingBox, params: &FusionParams) -> Result<Self> {
        params.validate()?;
        let pool = build_pool(params.threads)?;
        Self::allocate(bbox, params, PoolRef::Owned(pool))
    }
}

impl<'p> SequentialFusion<'p> {
    fn with_pool(bbox: BoundingBox, params: &FusionParams, pool: &'p ThreadPool) -> Result<Self> {
        Self::allocate(bbox, params, PoolRef::Borrowed(pool))
    }

    fn allocate(bbox: BoundingBox, params: &FusionParams, pool: PoolRef<'p>) -> Result<Self> {
        let dims = bbox.dimensions(params.downsampling);
        let mut params = params.clone();
        params.mode = FusionMode::Sequential;
        Ok(Self {
            bbox,
            params,
            pool,
            sum: VolumeF32::try_zeros(dims, "accumulated volume")?,
            count: VolumeF32::try_zeros(dims, "view count")?,
        })
    }

    /// Add one batch of views. Weights are not applied in this mode.
    pub fn add_views(&mut self, views: &[SourceView<'_>], layers: &WeightLayers) -> Result<()> {
        if layers.isolated_layer_count() + layers.combined_layer_count() > 0 {
            debug!("sequential fusion ignores weighting layers");
        }
        let mut buffers = [
            std::mem::take(&mut self.sum),
            std::mem::take(&mut self.count),
        ];
        run_pass(
            self.pool.get(),
            &self.bbox,
            views,
            &WeightLayers::none(),
            &self.params,
            &mut buffers,
        );
        let [sum, count] = buffers;
        self.sum = sum;
        self.count = count;
        Ok(())
    }

    /// Normalized volume and per-voxel view count.
    pub fn finish(mut self) -> (VolumeF32, VolumeF32) {
        normalize_accumulated(&mut self.sum, &self.count);
        (self.sum, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelKind;
    use nalgebra::Vector3;

    fn view(volume: &VolumeF32, tx: f64) -> SourceView<'_> {
        SourceView {
            id: ViewId::angle(0),
            volume: volume.as_view(),
            model: TransformModel::from_parts(
                ModelKind::Translation3D,
                nalgebra::Matrix3::identity(),
                Vector3::new(tx, 0.0, 0.0),
            ),
        }
    }

    #[test]
    fn overlap_counts_covering_views() {
        let a = VolumeF32::from_fn([4, 2, 2], |_, _, _| 1.0);
        let views = [view(&a, 0.0), view(&a, 2.0)];
        let bbox = BoundingBox::new([0, 0, 0], [5, 1, 1]);
        let params = FusionParams {
            mode: FusionMode::Overlap,
            threads: 2,
            ..FusionParams::default()
        };
        let out = fuse(&bbox, &views, &params).expect("fuse");
        let counts = &out.volumes[0].volume;
        let row: Vec<f32> = (0..6).map(|x| counts.data[x]).collect();
        assert_eq!(row, vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0]);
    }

    #[test]
    fn zero_threads_is_rejected() {
        let a = VolumeF32::new(2, 2, 2);
        let params = FusionParams {
            threads: 0,
            ..FusionParams::default()
        };
        let err = fuse(&BoundingBox::new([0; 3], [1; 3]), &[view(&a, 0.0)], &params).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn sequential_batches_accumulate() {
        let a = VolumeF32::from_fn([3, 1, 1], |_, _, _| 2.0);
        let b = VolumeF32::from_fn([3, 1, 1], |_, _, _| 4.0);
        let bbox = BoundingBox::new([0, 0, 0], [2, 0, 0]);
        let params = FusionParams {
            threads: 1,
            ..FusionParams::default()
        };
        let mut seq = SequentialFusion::new(bbox, &params).expect("alloc");
        seq.add_views(&[view(&a, 0.0)], &WeightLayers::none()).expect("batch a");
        seq.add_views(&[view(&b, 0.0)], &WeightLayers::none()).expect("batch b");
        let (volume, count) = seq.finish();
        assert_eq!(volume.data, vec![3.0, 3.0, 3.0]);
        assert_eq!(count.data, vec![2.0, 2.0, 2.0]);
    }
}

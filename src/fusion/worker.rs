//! Voxel loop for one portion of the output grid.

use super::{FusionMode, SourceView};
use crate::fusion::portion::ImagePortion;
use crate::image::{intersects, sample, Interpolation};
use crate::model::InverseModel;
use crate::weights::{WeightLayers, WeightScratch};
use nalgebra::Vector3;

/// Read-only state shared by all portions of one fusion pass.
pub(super) struct PassContext<'a> {
    pub dims: [usize; 3],
    pub origin: Vector3<f64>,
    pub scale: f64,
    pub views: &'a [SourceView<'a>],
    /// `None` for views whose model could not be inverted.
    pub inverses: &'a [Option<InverseModel>],
    pub layers: &'a WeightLayers,
    pub mode: FusionMode,
    pub normalize: bool,
    pub interpolation: Interpolation,
    pub weight_volume: bool,
}

/// Per-portion buffers, never shared between workers.
struct Scratch {
    locations: Vec<Vector3<f64>>,
    valid: Vec<bool>,
    values: Vec<f32>,
    weights: Vec<f32>,
}

impl Scratch {
    fn new(n: usize) -> Self {
        Self {
            locations: vec![Vector3::zeros(); n],
            valid: vec![false; n],
            values: vec![0.0; n],
            weights: vec![0.0; n],
        }
    }
}

/// Fuse the voxels of `portion` into `outputs`, whose slices cover exactly
/// that portion. Output order per mode:
/// - weighted average: fused, then `Σw` if requested
/// - sequential: `Σv`, contributing view count
/// - pre-deconvolution: intensity and weight per view, interleaved
/// - overlap: contributing view count
pub(super) fn process_portion(
    ctx: &PassContext<'_>,
    portion: ImagePortion,
    outputs: &mut [&mut [f32]],
) {
    let n = ctx.views.len();
    let mut s = Scratch::new(n);
    let mut combined = ctx.layers.scratch(n);
    let [w, h, _] = ctx.dims;

    for i in 0..portion.len {
        let g = portion.start + i;
        let x = g % w;
        let y = (g / w) % h;
        let z = g / (w * h);
        let world = ctx.origin + Vector3::new(x as f64, y as f64, z as f64) * ctx.scale;

        let mut count = 0usize;
        for (v, view) in ctx.views.iter().enumerate() {
            s.valid[v] = match &ctx.inverses[v] {
                Some(inv) => {
                    s.locations[v] = inv.apply(&world);
                    intersects(&s.locations[v], [view.volume.w, view.volume.h, view.volume.d])
                }
                None => false,
            };
            if s.valid[v] {
                count += 1;
            }
        }
        if count == 0 {
            continue;
        }

        match ctx.mode {
            FusionMode::Overlap => {
                outputs[0][i] = count as f32;
            }
            FusionMode::Sequential => {
                let mut sum = 0.0f64;
                for (v, view) in ctx.views.iter().enumerate() {
                    if s.valid[v] {
                        sum += sample(&view.volume, &s.locations[v], ctx.interpolation) as f64;
                    }
                }
                outputs[0][i] += sum as f32;
                outputs[1][i] += count as f32;
            }
            FusionMode::WeightedAverage => {
                weigh_views(ctx, &mut s, &mut combined);
                let mut sum = 0.0f64;
                let mut sum_w = 0.0f64;
                for v in 0..n {
                    if s.valid[v] {
                        sum += s.values[v] as f64 * s.weights[v] as f64;
                        sum_w += s.weights[v] as f64;
                    }
                }
                if sum_w > 0.0 {
                    outputs[0][i] = (sum / sum_w) as f32;
                }
                if ctx.weight_volume {
                    outputs[1][i] = sum_w as f32;
                }
            }
            FusionMode::PreDeconvolution => {
                weigh_views(ctx, &mut s, &mut combined);
                let sum_w: f64 = (0..n)
                    .filter(|&v| s.valid[v])
                    .map(|v| s.weights[v] as f64)
                    .sum();
                let rescale = ctx.normalize && sum_w > 1.0;
                for v in 0..n {
                    if !s.valid[v] {
                        continue;
                    }
                    let weight = if rescale {
                        (s.weights[v] as f64 / sum_w) as f32
                    } else {
                        s.weights[v]
                    };
                    outputs[2 * v][i] = s.values[v];
                    outputs[2 * v + 1][i] = weight;
                }
            }
        }
    }
}

fn weigh_views(ctx: &PassContext<'_>, s: &mut Scratch, combined: &mut [WeightScratch]) {
    ctx.layers.update_combined(&s.locations, &s.valid, combined);
    for (v, view) in ctx.views.iter().enumerate() {
        if s.valid[v] {
            s.values[v] = sample(&view.volume, &s.locations[v], ctx.interpolation);
            s.weights[v] = ctx.layers.weight(v, &s.locations[v], combined);
        }
    }
}

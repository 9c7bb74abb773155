//! Content-based weights: local intensity variance of each view.
//!
//! The weight volume is precomputed per view, so it is the one isolated
//! layer that can run out of memory.
use super::{IsolatedWeight, IsolatedWeightFactory};
use crate::error::{Error, Result};
use crate::image::{VolumeF32, VolumeRef};
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentParams {
    /// Half-width of the cubic averaging window.
    pub radius: usize,
    /// Floor applied after normalizing the variance to `[0, 1]`.
    pub min_weight: f32,
    /// Largest view (in voxels) for which weights are precomputed.
    pub max_voxels: Option<usize>,
}

impl Default for ContentParams {
    fn default() -> Self {
        Self {
            radius: 5,
            min_weight: 0.05,
            max_voxels: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContentWeight {
    weights: VolumeF32,
}

impl ContentWeight {
    pub fn compute(view: VolumeRef<'_>, params: &ContentParams) -> Result<Self> {
        let dims = [view.w, view.h, view.d];
        let count = view.data.len();
        if let Some(limit) = params.max_voxels {
            if count > limit {
                return Err(exhausted(format!(
                    "{count} voxels exceed the limit of {limit}"
                )));
            }
        }
        let mut mean = try_copy(view.data, dims)?;
        let mut mean_sq = try_copy(view.data, dims)?;
        for v in &mut mean_sq.data {
            *v *= *v;
        }
        box_filter(&mut mean, params.radius)?;
        box_filter(&mut mean_sq, params.radius)?;

        let mut max_var = 0.0f32;
        for (m, sq) in mean.data.iter_mut().zip(&mean_sq.data) {
            *m = (sq - *m * *m).max(0.0);
            max_var = max_var.max(*m);
        }
        let floor = params.min_weight.clamp(0.0, 1.0);
        for v in &mut mean.data {
            let normalized = if max_var > 0.0 { *v / max_var } else { 1.0 };
            *v = floor + (1.0 - floor) * normalized;
        }
        debug!("content weights {:?}: max variance {max_var}", dims);
        Ok(Self { weights: mean })
    }
}

impl IsolatedWeight for ContentWeight {
    fn weight(&self, local: &Vector3<f64>) -> f32 {
        let w = &self.weights;
        if w.data.is_empty() {
            return 1.0;
        }
        let clamp = |v: f64, n: usize| (v.round().max(0.0) as usize).min(n - 1);
        w.data[w.idx(clamp(local.x, w.w), clamp(local.y, w.h), clamp(local.z, w.d))]
    }
}

pub struct ContentWeightFactory {
    params: ContentParams,
}

impl ContentWeightFactory {
    pub fn new(params: ContentParams) -> Self {
        Self { params }
    }
}

impl IsolatedWeightFactory for ContentWeightFactory {
    fn name(&self) -> &str {
        "content"
    }

    fn create(&self, view: VolumeRef<'_>) -> Result<Box<dyn IsolatedWeight>> {
        Ok(Box::new(ContentWeight::compute(view, &self.params)?))
    }
}

fn exhausted(reason: String) -> Error {
    Error::ResourceExhaustion {
        layer: "content".to_string(),
        reason,
    }
}

fn try_copy(data: &[f32], dims: [usize; 3]) -> Result<VolumeF32> {
    let mut out = Vec::new();
    out.try_reserve_exact(data.len())
        .map_err(|e| exhausted(e.to_string()))?;
    out.extend_from_slice(data);
    Ok(VolumeF32 {
        w: dims[0],
        h: dims[1],
        d: dims[2],
        data: out,
    })
}

/// Separable box mean with the window shrunk at the borders.
fn box_filter(vol: &mut VolumeF32, radius: usize) -> Result<()> {
    let dims = [vol.w, vol.h, vol.d];
    let strides = [1, vol.w, vol.w * vol.h];
    let longest = dims.iter().copied().max().unwrap_or(0);
    let mut prefix: Vec<f64> = Vec::new();
    prefix
        .try_reserve_exact(longest + 1)
        .map_err(|e| exhausted(e.to_string()))?;
    for axis in 0..3 {
        let n = dims[axis];
        if n <= 1 || radius == 0 {
            continue;
        }
        let (o1, o2) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        for b in 0..dims[o2] {
            for a in 0..dims[o1] {
                let start = a * strides[o1] + b * strides[o2];
                prefix.clear();
                prefix.push(0.0);
                let mut acc = 0.0f64;
                for i in 0..n {
                    acc += vol.data[start + i * strides[axis]] as f64;
                    prefix.push(acc);
                }
                for i in 0..n {
                    let lo = i.saturating_sub(radius);
                    let hi = (i + radius).min(n - 1);
                    let mean = (prefix[hi + 1] - prefix[lo]) / (hi - lo + 1) as f64;
                    vol.data[start + i * strides[axis]] = mean as f32;
                }
            }
        }
    }
    Ok(())
}

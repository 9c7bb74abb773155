use super::{IsolatedWeight, IsolatedWeightFactory};
use crate::error::Result;
use crate::image::VolumeRef;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Border blending parameters, per axis in voxels.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BlendingParams {
    /// Width of the cosine ramp.
    pub range: [f32; 3],
    /// Distance from the image edge where the ramp starts. Negative values
    /// start the ramp outside the image.
    pub border: [f32; 3],
}

impl Default for BlendingParams {
    fn default() -> Self {
        Self {
            range: [40.0; 3],
            border: [0.0; 3],
        }
    }
}

impl BlendingParams {
    /// Narrower ramp used for per-view deconvolution inputs.
    pub fn deconvolution() -> Self {
        Self {
            range: [12.0; 3],
            border: [-8.0; 3],
        }
    }
}

/// Cosine falloff towards the borders of one view.
#[derive(Clone, Debug)]
pub struct BorderBlending {
    params: BlendingParams,
    dims: [usize; 3],
}

impl BorderBlending {
    pub fn new(params: BlendingParams, dims: [usize; 3]) -> Self {
        Self { params, dims }
    }
}

impl IsolatedWeight for BorderBlending {
    fn weight(&self, local: &Vector3<f64>) -> f32 {
        let mut min_distance = 1.0f32;
        for axis in 0..3 {
            let range = self.params.range[axis];
            if range <= 0.0 {
                continue;
            }
            let x = local[axis] as f32;
            let last = self.dims[axis].saturating_sub(1) as f32;
            let border = self.params.border[axis];
            let value = (x - border).min(last - x - border).max(1.0);
            if value < range {
                min_distance *= value / range;
            }
        }
        if min_distance >= 1.0 {
            1.0
        } else if min_distance <= 0.0 {
            1e-7
        } else {
            ((std::f32::consts::PI * (1.0 - min_distance)).cos() + 1.0) / 2.0
        }
    }
}

pub struct BorderBlendingFactory {
    params: BlendingParams,
}

impl BorderBlendingFactory {
    pub fn new(params: BlendingParams) -> Self {
        Self { params }
    }
}

impl IsolatedWeightFactory for BorderBlendingFactory {
    fn name(&self) -> &str {
        "border blending"
    }

    fn create(&self, view: VolumeRef<'_>) -> Result<Box<dyn IsolatedWeight>> {
        Ok(Box::new(BorderBlending::new(
            self.params,
            [view.w, view.h, view.d],
        )))
    }
}

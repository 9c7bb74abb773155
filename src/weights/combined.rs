use super::{CombinedWeight, WeightScratch};
use nalgebra::Vector3;

/// Every contributing view gets `1 / n`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AverageWeight;

impl CombinedWeight for AverageWeight {
    fn name(&self) -> &str {
        "average"
    }

    fn update_weights(
        &self,
        _locations: &[Vector3<f64>],
        valid: &[bool],
        scratch: &mut WeightScratch,
    ) {
        let n = valid.iter().filter(|&&v| v).count();
        let share = if n > 0 { 1.0 / n as f32 } else { 0.0 };
        for (w, &ok) in scratch.weights_mut().iter_mut().zip(valid) {
            *w = if ok { share } else { 0.0 };
        }
    }
}

/// Views are weighted by how far the point lies from their nearest border,
/// relative to the other contributing views.
#[derive(Clone, Debug)]
pub struct RelativeBorderDistance {
    dims: Vec<[usize; 3]>,
}

impl RelativeBorderDistance {
    pub fn new(dims: Vec<[usize; 3]>) -> Self {
        Self { dims }
    }

    fn border_distance(&self, view: usize, p: &Vector3<f64>) -> f64 {
        let dims = self.dims[view];
        (0..3)
            .map(|a| {
                let last = dims[a].saturating_sub(1) as f64;
                p[a].min(last - p[a]).max(0.0)
            })
            .fold(f64::INFINITY, f64::min)
    }
}

impl CombinedWeight for RelativeBorderDistance {
    fn name(&self) -> &str {
        "relative border distance"
    }

    fn update_weights(
        &self,
        locations: &[Vector3<f64>],
        valid: &[bool],
        scratch: &mut WeightScratch,
    ) {
        let weights = scratch.weights_mut();
        let mut total = 0.0f64;
        let mut n = 0usize;
        for (i, (w, &ok)) in weights.iter_mut().zip(valid).enumerate() {
            if ok {
                let d = self.border_distance(i, &locations[i]);
                *w = d as f32;
                total += d;
                n += 1;
            } else {
                *w = 0.0;
            }
        }
        if n == 0 {
            return;
        }
        for (w, &ok) in weights.iter_mut().zip(valid) {
            if ok {
                *w = if total > 0.0 {
                    (*w as f64 / total) as f32
                } else {
                    1.0 / n as f32
                };
            }
        }
    }
}

//! Per-voxel confidence weights used when blending views.
//!
//! Two flavours exist:
//! - [`IsolatedWeight`]: depends on one view only and is created per view,
//!   in parallel, before fusion starts.
//! - [`CombinedWeight`]: depends on where the same world point lands in all
//!   views. Its per-voxel state lives in a caller-owned [`WeightScratch`], so
//!   one instance can be shared by every fusion worker.
//!
//! The final weight of a view at a voxel is the product of all combined and
//! all isolated layers, or `1.0` without any layer.

mod blending;
mod combined;
mod content;

use crate::error::{Error, Result};
use crate::image::VolumeRef;
use log::{info, warn};
use nalgebra::Vector3;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

pub use blending::{BlendingParams, BorderBlending, BorderBlendingFactory};
pub use combined::{AverageWeight, RelativeBorderDistance};
pub use content::{ContentParams, ContentWeight, ContentWeightFactory};

/// Weight that depends on a single view, looked up at view-local coordinates.
pub trait IsolatedWeight: Send + Sync {
    fn weight(&self, local: &Vector3<f64>) -> f32;
}

/// Builds one [`IsolatedWeight`] per view.
pub trait IsolatedWeightFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`Error::ResourceExhaustion`] when the layer cannot be held in memory.
    fn create(&self, view: VolumeRef<'_>) -> Result<Box<dyn IsolatedWeight>>;
}

/// Per-voxel, per-view weights written by one combined layer.
#[derive(Clone, Debug, Default)]
pub struct WeightScratch {
    weights: Vec<f32>,
}

impl WeightScratch {
    pub fn new(num_views: usize) -> Self {
        Self {
            weights: vec![0.0; num_views],
        }
    }

    #[inline]
    pub fn weight(&self, view: usize) -> f32 {
        self.weights[view]
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }
}

/// Weight that depends jointly on all views at the same world point.
pub trait CombinedWeight: Send + Sync {
    fn name(&self) -> &str;

    /// Recompute the weights for one voxel.
    ///
    /// `locations[i]` is the voxel mapped into view `i`, `valid[i]` whether
    /// that view contributes. Must be called before any lookup for the voxel.
    fn update_weights(
        &self,
        locations: &[Vector3<f64>],
        valid: &[bool],
        scratch: &mut WeightScratch,
    );
}

/// Combined strategies selectable from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinedKind {
    Average,
    RelativeBorderDistance,
}

impl CombinedKind {
    pub fn create(self, view_dims: &[[usize; 3]]) -> Box<dyn CombinedWeight> {
        match self {
            CombinedKind::Average => Box::new(AverageWeight),
            CombinedKind::RelativeBorderDistance => {
                Box::new(RelativeBorderDistance::new(view_dims.to_vec()))
            }
        }
    }
}

/// Which weighting layers a fusion run uses.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WeightingParams {
    /// Cosine blending towards the image borders.
    pub blending: Option<BlendingParams>,
    /// Precomputed local-contrast weights.
    pub content: Option<ContentParams>,
    pub combined: Vec<CombinedKind>,
}

impl WeightingParams {
    pub fn isolated_factories(&self) -> Vec<Box<dyn IsolatedWeightFactory>> {
        let mut out: Vec<Box<dyn IsolatedWeightFactory>> = Vec::new();
        if let Some(b) = self.blending {
            out.push(Box::new(BorderBlendingFactory::new(b)));
        }
        if let Some(c) = self.content.clone() {
            out.push(Box::new(ContentWeightFactory::new(c)));
        }
        out
    }
}

/// All weighting layers resolved for one fusion run.
#[derive(Default)]
pub struct WeightLayers {
    /// Indexed `[layer][view]`.
    isolated: Vec<Vec<Box<dyn IsolatedWeight>>>,
    combined: Vec<Box<dyn CombinedWeight>>,
}

impl WeightLayers {
    pub fn none() -> Self {
        Self::default()
    }

    /// Instantiate every layer for the given views.
    ///
    /// Isolated layers are built on `pool`, one task per view, and all of
    /// them finish before this returns. If any instance runs out of
    /// resources the complete isolated set is dropped for this run.
    pub fn build(
        pool: &ThreadPool,
        views: &[VolumeRef<'_>],
        isolated: &[Box<dyn IsolatedWeightFactory>],
        combined: &[CombinedKind],
    ) -> Result<Self> {
        let mut isolated_layers = Vec::with_capacity(isolated.len());
        let mut exhausted = false;
        for factory in isolated {
            info!(
                "computing {} weights for {} views",
                factory.name(),
                views.len()
            );
            let created: Vec<Result<Box<dyn IsolatedWeight>>> =
                pool.install(|| views.par_iter().map(|v| factory.create(*v)).collect());
            let mut layer = Vec::with_capacity(views.len());
            for instance in created {
                match instance {
                    Ok(w) => layer.push(w),
                    Err(Error::ResourceExhaustion { layer, reason }) => {
                        warn!("weight layer `{layer}` disabled: {reason}");
                        exhausted = true;
                    }
                    Err(e) => return Err(e),
                }
            }
            isolated_layers.push(layer);
        }
        if exhausted {
            warn!("not enough memory for isolated weights, fusing without them");
            isolated_layers.clear();
        }

        let dims: Vec<[usize; 3]> = views.iter().map(|v| [v.w, v.h, v.d]).collect();
        let combined = combined.iter().map(|k| k.create(&dims)).collect();
        Ok(Self {
            isolated: isolated_layers,
            combined,
        })
    }

    pub fn with_combined(mut self, layer: Box<dyn CombinedWeight>) -> Self {
        self.combined.push(layer);
        self
    }

    pub fn isolated_layer_count(&self) -> usize {
        self.isolated.len()
    }

    pub fn combined_layer_count(&self) -> usize {
        self.combined.len()
    }

    /// One scratch buffer per combined layer, owned by a single worker.
    pub fn scratch(&self, num_views: usize) -> Vec<WeightScratch> {
        self.combined
            .iter()
            .map(|_| WeightScratch::new(num_views))
            .collect()
    }

    /// Refresh all combined layers for the current voxel.
    pub fn update_combined(
        &self,
        locations: &[Vector3<f64>],
        valid: &[bool],
        scratch: &mut [WeightScratch],
    ) {
        for (layer, s) in self.combined.iter().zip(scratch.iter_mut()) {
            layer.update_weights(locations, valid, s);
        }
    }

    /// Product of every layer's weight for `view` at `local`.
    pub fn weight(&self, view: usize, local: &Vector3<f64>, scratch: &[WeightScratch]) -> f32 {
        let mut w = 1.0f32;
        for s in scratch {
            w *= s.weight(view);
        }
        for layer in &self.isolated {
            w *= layer[view].weight(local);
        }
        w
    }
}

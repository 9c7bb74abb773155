//! Plain data shared between registration and fusion.

use crate::model::TransformModel;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one acquired view.
///
/// The derived ordering (timepoint, channel, angle, illumination) is the
/// canonical processing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewId {
    pub timepoint: u32,
    pub channel: u32,
    pub angle: u32,
    pub illumination: u32,
}

impl ViewId {
    pub fn new(timepoint: u32, channel: u32, angle: u32, illumination: u32) -> Self {
        Self {
            timepoint,
            channel,
            angle,
            illumination,
        }
    }

    /// Shorthand for a single-timepoint, single-channel acquisition.
    pub fn angle(angle: u32) -> Self {
        Self::new(0, 0, angle, 0)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tp{}-ch{}-a{}-ill{}",
            self.timepoint, self.channel, self.angle, self.illumination
        )
    }
}

/// A validated correspondence between two tiles' local coordinates.
///
/// Fitting maps `p1` (local to the first tile) onto the world position
/// implied by `p2` (local to the second tile).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointMatch {
    pub p1: Vector3<f64>,
    pub p2: Vector3<f64>,
    pub weight: f64,
}

impl PointMatch {
    pub fn new(p1: Vector3<f64>, p2: Vector3<f64>) -> Self {
        Self {
            p1,
            p2,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// All validated matches between two views, as produced by RANSAC.
#[derive(Clone, Debug)]
pub struct CorrespondenceSet {
    pub a: ViewId,
    pub b: ViewId,
    pub matches: Vec<PointMatch>,
    /// Number of descriptor candidates before robust filtering (0 if unknown).
    pub candidates: usize,
}

/// Inclusive integer box in world voxel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl BoundingBox {
    pub fn new(min: [i64; 3], max: [i64; 3]) -> Self {
        Self { min, max }
    }

    /// Extent in full-resolution voxels along each axis.
    pub fn size(&self) -> [usize; 3] {
        let mut out = [0usize; 3];
        for d in 0..3 {
            out[d] = (self.max[d] - self.min[d] + 1).max(0) as usize;
        }
        out
    }

    /// Output grid dimensions once sampled every `downsampling` world voxels.
    pub fn dimensions(&self, downsampling: f64) -> [usize; 3] {
        let ds = if downsampling.is_finite() && downsampling > 0.0 {
            downsampling
        } else {
            1.0
        };
        let size = self.size();
        let mut out = [0usize; 3];
        for d in 0..3 {
            out[d] = (size[d] as f64 / ds).ceil() as usize;
        }
        out
    }

    pub fn min_f64(&self) -> Vector3<f64> {
        Vector3::new(self.min[0] as f64, self.min[1] as f64, self.min[2] as f64)
    }

    /// Smallest box containing every view after its forward transform.
    ///
    /// Each view contributes the eight corners of its `[0, dim - 1]` voxel
    /// range. Returns `None` for an empty input.
    pub fn enclosing<'a, I>(views: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a TransformModel, [usize; 3])>,
    {
        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        let mut any = false;
        for (model, dims) in views {
            for corner in 0..8 {
                let mut p = Vector3::zeros();
                for d in 0..3 {
                    if corner & (1 << d) != 0 {
                        p[d] = dims[d].saturating_sub(1) as f64;
                    }
                }
                let w = model.apply(&p);
                lo = lo.inf(&w);
                hi = hi.sup(&w);
                any = true;
            }
        }
        if !any {
            return None;
        }
        Some(Self {
            min: [
                lo.x.floor() as i64,
                lo.y.floor() as i64,
                lo.z.floor() as i64,
            ],
            max: [hi.x.ceil() as i64, hi.y.ceil() as i64, hi.z.ceil() as i64],
        })
    }
}

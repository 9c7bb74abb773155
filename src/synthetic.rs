//! Synthetic bead acquisitions for demos and tests.
//!
//! A scene is a set of world-space beads. Each simulated view sees the scene
//! through a known rigid transform, renders the visible beads as Gaussian
//! spots and reports their view-local positions as detections, from which
//! exact correspondences between views are built.

use crate::error::Result;
use crate::image::{intersects, VolumeF32};
use crate::model::{ModelKind, TransformModel};
use crate::types::{CorrespondenceSet, PointMatch, ViewId};
use nalgebra::{Matrix3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// `count` beads spread uniformly, `margin` voxels away from every face.
pub fn random_beads(
    count: usize,
    dims: [usize; 3],
    margin: f64,
    rng: &mut StdRng,
) -> Vec<Vector3<f64>> {
    (0..count)
        .map(|_| {
            let mut p = Vector3::zeros();
            for a in 0..3 {
                let span = (dims[a] as f64 - 1.0 - 2.0 * margin).max(0.0);
                p[a] = margin + rng.random::<f64>() * span;
            }
            p
        })
        .collect()
}

/// Rigid rotation by `degrees` about the y axis through `center`.
pub fn rotation_about_y(degrees: f64, center: Vector3<f64>) -> TransformModel {
    let r: Matrix3<f64> =
        *Rotation3::from_axis_angle(&Vector3::y_axis(), degrees.to_radians()).matrix();
    TransformModel::from_parts(ModelKind::Rigid3D, r, center - r * center)
}

/// Render isotropic Gaussian spots of peak `amplitude` into a zero volume.
pub fn render_beads(
    beads: &[Vector3<f64>],
    dims: [usize; 3],
    sigma: f64,
    amplitude: f32,
) -> VolumeF32 {
    let mut vol = VolumeF32::new(dims[0], dims[1], dims[2]);
    let reach = (3.0 * sigma).ceil() as i64;
    let inv = 1.0 / (2.0 * sigma * sigma);
    for b in beads {
        let c = [b.x.round() as i64, b.y.round() as i64, b.z.round() as i64];
        for z in c[2] - reach..=c[2] + reach {
            for y in c[1] - reach..=c[1] + reach {
                for x in c[0] - reach..=c[0] + reach {
                    if x < 0
                        || y < 0
                        || z < 0
                        || x >= dims[0] as i64
                        || y >= dims[1] as i64
                        || z >= dims[2] as i64
                    {
                        continue;
                    }
                    let d = Vector3::new(x as f64, y as f64, z as f64) - b;
                    let v = amplitude * (-(d.norm_squared()) * inv).exp() as f32;
                    let i = vol.idx(x as usize, y as usize, z as usize);
                    vol.data[i] += v;
                }
            }
        }
    }
    vol
}

/// One simulated acquisition.
#[derive(Clone, Debug)]
pub struct SyntheticView {
    pub id: ViewId,
    /// Ground-truth view-local to world transform.
    pub truth: TransformModel,
    pub volume: VolumeF32,
    /// View-local detection of every scene bead, `None` if outside the view.
    pub detections: Vec<Option<Vector3<f64>>>,
}

impl SyntheticView {
    /// Image `beads` through `truth`, jittering detections by `noise` px.
    pub fn acquire(
        id: ViewId,
        truth: TransformModel,
        beads: &[Vector3<f64>],
        dims: [usize; 3],
        sigma: f64,
        noise: f64,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let inverse = truth.inverse()?;
        let local: Vec<Vector3<f64>> = beads.iter().map(|b| inverse.apply(b)).collect();
        let visible: Vec<Vector3<f64>> = local
            .iter()
            .copied()
            .filter(|p| intersects(p, dims))
            .collect();
        let volume = render_beads(&visible, dims, sigma, 1000.0);
        let detections = local
            .into_iter()
            .map(|p| {
                intersects(&p, dims).then(|| {
                    let jitter: Vector3<f64> =
                        Vector3::from_fn(|_, _| rng.sample(StandardNormal));
                    p + jitter * noise
                })
            })
            .collect();
        Ok(Self {
            id,
            truth,
            volume,
            detections,
        })
    }
}

/// Matches of beads detected in both views, `p1` in `a`, `p2` in `b`.
///
/// `candidates` counts beads detected in either view, standing in for the
/// descriptor candidates a real matcher would have considered.
pub fn bead_correspondences(a: &SyntheticView, b: &SyntheticView) -> CorrespondenceSet {
    let mut matches = Vec::new();
    let mut candidates = 0usize;
    for (pa, pb) in a.detections.iter().zip(&b.detections) {
        match (pa, pb) {
            (Some(p1), Some(p2)) => {
                matches.push(PointMatch::new(*p1, *p2));
                candidates += 1;
            }
            (Some(_), None) | (None, Some(_)) => candidates += 1,
            (None, None) => {}
        }
    }
    CorrespondenceSet {
        a: a.id,
        b: b.id,
        matches,
        candidates,
    }
}

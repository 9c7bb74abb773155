//! Closed-form weighted least-squares solvers for each [`ModelKind`].

use super::ModelKind;
use crate::error::{Error, Result};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

const EPS: f64 = 1e-12;
/// Relative size below which a singular value / determinant counts as zero.
const DEGENERATE_RATIO: f64 = 1e-9;

/// A source point `p`, its target `q` and the match weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedPair {
    pub p: Vector3<f64>,
    pub q: Vector3<f64>,
    pub w: f64,
}

pub(super) fn fit_kind(
    kind: ModelKind,
    pairs: &[WeightedPair],
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    if pairs.len() < kind.min_matches() {
        return Err(Error::InsufficientData {
            model: kind,
            found: pairs.len(),
            required: kind.min_matches(),
        });
    }
    let (pc, qc) = weighted_centroids(kind, pairs)?;
    match kind {
        ModelKind::Translation2D => {
            let mut t = qc - pc;
            t.z = 0.0;
            Ok((Matrix3::identity(), t))
        }
        ModelKind::Translation3D => Ok((Matrix3::identity(), qc - pc)),
        ModelKind::Rigid2D => fit_rigid_2d(pairs, &pc, &qc),
        ModelKind::Rigid3D => fit_rigid_3d(pairs, &pc, &qc),
        ModelKind::Affine2D => fit_affine_2d(pairs, &pc, &qc),
        ModelKind::Affine3D => fit_affine_3d(pairs, &pc, &qc),
    }
}

fn weighted_centroids(
    kind: ModelKind,
    pairs: &[WeightedPair],
) -> Result<(Vector3<f64>, Vector3<f64>)> {
    let mut pc = Vector3::zeros();
    let mut qc = Vector3::zeros();
    let mut ws = 0.0;
    for pair in pairs {
        pc += pair.p * pair.w;
        qc += pair.q * pair.w;
        ws += pair.w;
    }
    if !(ws > EPS) {
        return Err(Error::IllConditioned {
            model: kind,
            reason: "total match weight is zero",
        });
    }
    Ok((pc / ws, qc / ws))
}

fn fit_rigid_2d(
    pairs: &[WeightedPair],
    pc: &Vector3<f64>,
    qc: &Vector3<f64>,
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let mut cos_sum = 0.0;
    let mut sin_sum = 0.0;
    for pair in pairs {
        let a = pair.p - pc;
        let b = pair.q - qc;
        cos_sum += pair.w * (a.x * b.x + a.y * b.y);
        sin_sum += pair.w * (a.x * b.y - a.y * b.x);
    }
    if cos_sum.hypot(sin_sum) <= EPS {
        return Err(Error::IllConditioned {
            model: ModelKind::Rigid2D,
            reason: "matches collapse onto a single point",
        });
    }
    let theta = sin_sum.atan2(cos_sum);
    let (s, c) = theta.sin_cos();
    let linear = Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0);
    let tx = qc.x - (c * pc.x - s * pc.y);
    let ty = qc.y - (s * pc.x + c * pc.y);
    Ok((linear, Vector3::new(tx, ty, 0.0)))
}

/// Weighted Kabsch: SVD of the cross-covariance with reflection correction.
fn fit_rigid_3d(
    pairs: &[WeightedPair],
    pc: &Vector3<f64>,
    qc: &Vector3<f64>,
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let ill = |reason| Error::IllConditioned {
        model: ModelKind::Rigid3D,
        reason,
    };
    let mut h = Matrix3::zeros();
    for pair in pairs {
        let a = pair.p - pc;
        let b = pair.q - qc;
        h += a * b.transpose() * pair.w;
    }
    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(ill("singular value decomposition failed")),
    };
    let sv = svd.singular_values;
    let mut sorted = [sv[0], sv[1], sv[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    if sorted[0] <= EPS || sorted[1] <= DEGENERATE_RATIO * sorted[0] {
        return Err(ill("matches are colinear"));
    }
    let v = v_t.transpose();
    let mut correction = Matrix3::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        // flip the axis of the smallest singular value
        let smallest = (0..3)
            .min_by(|&a, &b| sv[a].total_cmp(&sv[b]))
            .unwrap_or(2);
        correction[(smallest, smallest)] = -1.0;
    }
    let rotation = v * correction * u.transpose();
    let translation = qc - rotation * pc;
    Ok((rotation, translation))
}

fn fit_affine_2d(
    pairs: &[WeightedPair],
    pc: &Vector3<f64>,
    qc: &Vector3<f64>,
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let mut pp = Matrix2::zeros();
    let mut qp = Matrix2::zeros();
    for pair in pairs {
        let a = Vector2::new(pair.p.x - pc.x, pair.p.y - pc.y);
        let b = Vector2::new(pair.q.x - qc.x, pair.q.y - qc.y);
        pp += a * a.transpose() * pair.w;
        qp += b * a.transpose() * pair.w;
    }
    let scale = pp.norm();
    if scale <= EPS || pp.determinant().abs() <= DEGENERATE_RATIO * scale * scale {
        return Err(Error::IllConditioned {
            model: ModelKind::Affine2D,
            reason: "matches are colinear",
        });
    }
    let inv = pp.try_inverse().ok_or(Error::IllConditioned {
        model: ModelKind::Affine2D,
        reason: "normal equations are singular",
    })?;
    let m = qp * inv;
    let linear = Matrix3::new(
        m[(0, 0)],
        m[(0, 1)],
        0.0,
        m[(1, 0)],
        m[(1, 1)],
        0.0,
        0.0,
        0.0,
        1.0,
    );
    let tx = qc.x - (m[(0, 0)] * pc.x + m[(0, 1)] * pc.y);
    let ty = qc.y - (m[(1, 0)] * pc.x + m[(1, 1)] * pc.y);
    Ok((linear, Vector3::new(tx, ty, 0.0)))
}

fn fit_affine_3d(
    pairs: &[WeightedPair],
    pc: &Vector3<f64>,
    qc: &Vector3<f64>,
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let mut pp = Matrix3::zeros();
    let mut qp = Matrix3::zeros();
    for pair in pairs {
        let a = pair.p - pc;
        let b = pair.q - qc;
        pp += a * a.transpose() * pair.w;
        qp += b * a.transpose() * pair.w;
    }
    let scale = pp.norm();
    if scale <= EPS || pp.determinant().abs() <= DEGENERATE_RATIO * scale.powi(3) {
        return Err(Error::IllConditioned {
            model: ModelKind::Affine3D,
            reason: "matches are coplanar",
        });
    }
    let inv = pp.try_inverse().ok_or(Error::IllConditioned {
        model: ModelKind::Affine3D,
        reason: "normal equations are singular",
    })?;
    let linear = qp * inv;
    let translation = qc - linear * pc;
    Ok((linear, translation))
}

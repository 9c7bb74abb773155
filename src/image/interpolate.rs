//! Sampling volumes at real-valued positions.
//!
//! Out-of-range neighbours are resolved by single mirroring (the edge voxel
//! is not repeated), which avoids the dark seams a zero extension leaves at
//! view borders.

use super::traits::VolumeView;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    NearestNeighbor,
    #[default]
    Linear,
}

/// True if `p` lies inside `[0, dim)` along every axis.
#[inline]
pub fn intersects(p: &Vector3<f64>, dims: [usize; 3]) -> bool {
    p.x >= 0.0
        && p.y >= 0.0
        && p.z >= 0.0
        && p.x < dims[0] as f64
        && p.y < dims[1] as f64
        && p.z < dims[2] as f64
}

/// Reflect an index into `[0, n)` without repeating the border voxel.
#[inline]
pub fn mirror_single(i: i64, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as i64 - 1);
    let m = i.rem_euclid(period);
    if m < n as i64 {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Sample `volume` at `p` (voxel coordinates).
pub fn sample<V>(volume: &V, p: &Vector3<f64>, kind: Interpolation) -> f32
where
    V: VolumeView<Voxel = f32>,
{
    let [w, h, d] = volume.dims();
    if w == 0 || h == 0 || d == 0 {
        return 0.0;
    }
    match kind {
        Interpolation::NearestNeighbor => {
            let x = mirror_single((p.x + 0.5).floor() as i64, w);
            let y = mirror_single((p.y + 0.5).floor() as i64, h);
            let z = mirror_single((p.z + 0.5).floor() as i64, d);
            volume.get(x, y, z)
        }
        Interpolation::Linear => {
            let x0 = p.x.floor();
            let y0 = p.y.floor();
            let z0 = p.z.floor();
            let fx = p.x - x0;
            let fy = p.y - y0;
            let fz = p.z - z0;
            let (x0, y0, z0) = (x0 as i64, y0 as i64, z0 as i64);
            let xs = [mirror_single(x0, w), mirror_single(x0 + 1, w)];
            let ys = [mirror_single(y0, h), mirror_single(y0 + 1, h)];
            let zs = [mirror_single(z0, d), mirror_single(z0 + 1, d)];
            let wx = [1.0 - fx, fx];
            let wy = [1.0 - fy, fy];
            let wz = [1.0 - fz, fz];
            let mut acc = 0.0f64;
            for (k, &z) in zs.iter().enumerate() {
                for (j, &y) in ys.iter().enumerate() {
                    let row = volume.row(y, z);
                    let wyz = wy[j] * wz[k];
                    acc += (row[xs[0]] as f64 * wx[0] + row[xs[1]] as f64 * wx[1]) * wyz;
                }
            }
            acc as f32
        }
    }
}

//! Owned single-channel f32 volume, x-fastest then y then z.
//!
//! Used for fused outputs, weight volumes, per-view deconvolution inputs
//! and PSFs. Output-sized buffers should be created with
//! [`VolumeF32::try_zeros`] so allocation failure is reported instead of
//! aborting the process.
use super::traits::VolumeView;
use super::VolumeRef;
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VolumeF32 {
    /// Width in voxels
    pub w: usize,
    /// Height in voxels
    pub h: usize,
    /// Depth (number of planes)
    pub d: usize,
    /// Backing storage, `w * h * d` values
    pub data: Vec<f32>,
}

impl VolumeF32 {
    /// Construct a zero-initialized volume of size `w × h × d`.
    pub fn new(w: usize, h: usize, d: usize) -> Self {
        Self {
            w,
            h,
            d,
            data: vec![0.0; w * h * d],
        }
    }

    /// Zero-initialized volume whose allocation failure is an [`Error::Allocation`].
    pub fn try_zeros(dims: [usize; 3], what: &str) -> Result<Self> {
        let [w, h, d] = dims;
        let len = w
            .checked_mul(h)
            .and_then(|v| v.checked_mul(d))
            .ok_or_else(|| Error::Allocation {
                what: what.to_string(),
                bytes: usize::MAX,
            })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| Error::Allocation {
            what: what.to_string(),
            bytes: len.saturating_mul(std::mem::size_of::<f32>()),
        })?;
        data.resize(len, 0.0);
        Ok(Self { w, h, d, data })
    }

    /// Fill a volume by evaluating `f(x, y, z)` for every voxel.
    pub fn from_fn(dims: [usize; 3], mut f: impl FnMut(usize, usize, usize) -> f32) -> Self {
        let [w, h, d] = dims;
        let mut data = Vec::with_capacity(w * h * d);
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    data.push(f(x, y, z));
                }
            }
        }
        Self { w, h, d, data }
    }

    #[inline]
    /// Convert (x, y, z) to a linear index into `data`.
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.h + y) * self.w + x
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, v: f32) {
        let i = self.idx(x, y, z);
        self.data[i] = v;
    }

    /// Borrow as a read-only [`VolumeRef`].
    pub fn as_view(&self) -> VolumeRef<'_> {
        VolumeRef {
            w: self.w,
            h: self.h,
            d: self.d,
            data: &self.data,
        }
    }

    /// Subtract a constant background, clamping at zero.
    pub fn subtract_background(&mut self, value: f32) {
        for v in &mut self.data {
            *v = (*v - value).max(0.0);
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Maximum intensity projection along z, row-major `w × h`.
    pub fn max_projection_z(&self) -> Vec<f32> {
        let mut out = vec![f32::NEG_INFINITY; self.w * self.h];
        for z in 0..self.d {
            let plane = &self.data[z * self.w * self.h..(z + 1) * self.w * self.h];
            for (o, &v) in out.iter_mut().zip(plane) {
                *o = o.max(v);
            }
        }
        if self.d == 0 {
            out.iter_mut().for_each(|v| *v = 0.0);
        }
        out
    }
}

impl VolumeView for VolumeF32 {
    type Voxel = f32;

    #[inline]
    fn width(&self) -> usize {
        self.w
    }
    #[inline]
    fn height(&self) -> usize {
        self.h
    }
    #[inline]
    fn depth(&self) -> usize {
        self.d
    }
    #[inline]
    fn row(&self, y: usize, z: usize) -> &[f32] {
        let start = (z * self.h + y) * self.w;
        &self.data[start..start + self.w]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_is_x_fastest() {
        let vol = VolumeF32::from_fn([3, 2, 2], |x, y, z| (x + 10 * y + 100 * z) as f32);
        assert_eq!(vol.get(2, 1, 1), 112.0);
        assert_eq!(vol.data[vol.idx(1, 0, 1)], 101.0);
        assert_eq!(vol.rows().count(), 4);
        assert_eq!(vol.rows().nth(3).expect("row"), &[110.0, 111.0, 112.0]);
    }

    #[test]
    fn background_subtraction_clamps_at_zero() {
        let mut vol = VolumeF32::from_fn([4, 1, 1], |x, _, _| x as f32);
        vol.subtract_background(1.5);
        assert_eq!(vol.data, vec![0.0, 0.0, 0.5, 1.5]);
    }

    #[test]
    fn max_projection_keeps_brightest_plane() {
        let vol = VolumeF32::from_fn([2, 1, 3], |x, _, z| (x * z) as f32);
        assert_eq!(vol.max_projection_z(), vec![0.0, 2.0]);
    }

    #[test]
    fn absurd_sizes_fail_to_allocate() {
        let err = VolumeF32::try_zeros([usize::MAX / 2, 4, 4], "test").unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }));
    }
}

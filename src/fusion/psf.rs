use super::SourceView;
use crate::error::{Error, Result};
use crate::image::{intersects, sample, Interpolation, VolumeF32};
use log::debug;
use nalgebra::Vector3;

/// Average the world-aligned neighbourhoods of `beads` in one view.
///
/// `beads` are view-local positions, typically the inliers of the
/// registration. Each patch of `size` voxels is centered on the bead's world
/// position and sampled on the world grid, so PSFs of different views share
/// one frame. Beads whose center falls outside the view are ignored. The
/// result sums to one.
pub fn extract_psf(
    view: &SourceView<'_>,
    beads: &[Vector3<f64>],
    size: [usize; 3],
    interpolation: Interpolation,
) -> Result<VolumeF32> {
    if size.iter().any(|&s| s == 0) {
        return Err(Error::InvalidParameter(format!("psf size {size:?} is empty")));
    }
    let inverse = view.model.inverse()?;
    let dims = view.dims();
    let half = Vector3::new(
        (size[0] - 1) as f64 / 2.0,
        (size[1] - 1) as f64 / 2.0,
        (size[2] - 1) as f64 / 2.0,
    );

    let mut psf = VolumeF32::try_zeros(size, "psf")?;
    let mut used = 0usize;
    for bead in beads {
        if !intersects(bead, dims) {
            continue;
        }
        let center = view.model.apply(bead);
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    let offset = Vector3::new(x as f64, y as f64, z as f64) - half;
                    let local = inverse.apply(&(center + offset));
                    let i = psf.idx(x, y, z);
                    psf.data[i] += sample(&view.volume, &local, interpolation);
                }
            }
        }
        used += 1;
    }
    if used == 0 {
        return Err(Error::InvalidParameter(format!(
            "no bead of view {} lies inside the image",
            view.id
        )));
    }

    let total = psf.sum();
    if total <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "psf of view {} has no signal",
            view.id
        )));
    }
    for v in &mut psf.data {
        *v = (*v as f64 / total) as f32;
    }
    debug!("psf of view {} averaged over {used} beads", view.id);
    Ok(psf)
}

use nalgebra::{Matrix3, Rotation3, Vector3};
use spim_reconstruction::image::VolumeF32;
use spim_reconstruction::{ModelKind, PointMatch, TransformModel};

/// Rotation by `degrees` about the z axis through the origin.
pub fn rotation_z(kind: ModelKind, degrees: f64) -> TransformModel {
    let r: Matrix3<f64> =
        *Rotation3::from_axis_angle(&Vector3::z_axis(), degrees.to_radians()).matrix();
    TransformModel::from_parts(kind, r, Vector3::zeros())
}

/// Rigid transform: rotation about an arbitrary axis followed by a shift.
pub fn rigid(axis: Vector3<f64>, degrees: f64, shift: Vector3<f64>) -> TransformModel {
    let axis = nalgebra::Unit::new_normalize(axis);
    let r: Matrix3<f64> = *Rotation3::from_axis_angle(&axis, degrees.to_radians()).matrix();
    TransformModel::from_parts(ModelKind::Rigid3D, r, shift)
}

/// Well-spread, non-coplanar world points.
pub fn point_cloud(n: usize) -> Vec<Vector3<f64>> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            Vector3::new(
                (t * 7.3).sin() * 40.0 + 50.0,
                (t * 3.1).cos() * 35.0 + 50.0,
                (t * 1.7).sin() * 25.0 + t,
            )
        })
        .collect()
}

/// Exact matches of `world` points seen by two views with the given true
/// view-to-world transforms: `p1` local to `a`, `p2` local to `b`.
pub fn matches_between(
    world: &[Vector3<f64>],
    a: &TransformModel,
    b: &TransformModel,
) -> Vec<PointMatch> {
    let ia = a.inverse().expect("invertible a");
    let ib = b.inverse().expect("invertible b");
    world
        .iter()
        .map(|w| PointMatch::new(ia.apply(w), ib.apply(w)))
        .collect()
}

/// Volume filled with `f(x, y, z)`.
pub fn volume(dims: [usize; 3], f: impl FnMut(usize, usize, usize) -> f32) -> VolumeF32 {
    VolumeF32::from_fn(dims, f)
}

/// Smooth test pattern with structure along every axis.
pub fn pattern(dims: [usize; 3]) -> VolumeF32 {
    VolumeF32::from_fn(dims, |x, y, z| {
        100.0 + 40.0 * ((x as f32) * 0.4).sin() + 25.0 * ((y as f32) * 0.3).cos() + 3.0 * z as f32
    })
}

//! Parametrized spatial mappings fitted to weighted point matches.
//!
//! Every supported model is an affine map `x ↦ L·x + t` restricted to a
//! closed set of kinds (translation, rigid, affine; planar or volumetric).
//! Planar kinds act on `x`/`y` and pass `z` through unchanged. A model may
//! carry a [`Regularization`], in which case the fitted parameters are a
//! linear interpolation between the primary fit and a fit of a simpler kind.

mod fit;

use crate::error::{Error, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use fit::WeightedPair;

/// Closed set of transformation kinds supported by the optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "translation-2d")]
    Translation2D,
    #[serde(rename = "rigid-2d")]
    Rigid2D,
    #[serde(rename = "affine-2d")]
    Affine2D,
    #[serde(rename = "translation-3d")]
    Translation3D,
    #[serde(rename = "rigid-3d")]
    Rigid3D,
    #[serde(rename = "affine-3d")]
    Affine3D,
}

impl ModelKind {
    /// Minimal number of matches needed for a well-defined fit.
    pub fn min_matches(self) -> usize {
        match self {
            ModelKind::Translation2D | ModelKind::Translation3D => 1,
            ModelKind::Rigid2D => 2,
            ModelKind::Affine2D | ModelKind::Rigid3D => 3,
            ModelKind::Affine3D => 4,
        }
    }

    /// Planar kinds leave the `z` coordinate untouched.
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            ModelKind::Translation2D | ModelKind::Rigid2D | ModelKind::Affine2D
        )
    }

    /// Rigid relaxation is not guaranteed to converge from identity and
    /// should be seeded by [`crate::tile::TileConfiguration::pre_align`].
    pub fn needs_pre_alignment(self) -> bool {
        matches!(self, ModelKind::Rigid2D | ModelKind::Rigid3D)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Translation2D => "translation-2d",
            ModelKind::Rigid2D => "rigid-2d",
            ModelKind::Affine2D => "affine-2d",
            ModelKind::Translation3D => "translation-3d",
            ModelKind::Rigid3D => "rigid-3d",
            ModelKind::Affine3D => "affine-3d",
        };
        f.write_str(name)
    }
}

/// Pulls a fit towards a simpler model: `(1 - lambda) · primary + lambda · regularizer`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Regularization {
    pub model: ModelKind,
    pub lambda: f64,
}

/// One fitted transform instance, owned by exactly one tile or view.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformModel {
    kind: ModelKind,
    regularization: Option<Regularization>,
    linear: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl TransformModel {
    /// Identity transform of the given kind.
    pub fn identity(kind: ModelKind) -> Self {
        Self {
            kind,
            regularization: None,
            linear: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Identity transform that regularizes every subsequent fit.
    pub fn regularized(kind: ModelKind, regularization: Regularization) -> Self {
        Self {
            regularization: Some(regularization),
            ..Self::identity(kind)
        }
    }

    /// Build a model from explicit affine parameters.
    pub fn from_parts(kind: ModelKind, linear: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            kind,
            regularization: None,
            linear,
            translation,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }

    pub fn linear(&self) -> &Matrix3<f64> {
        &self.linear
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// Largest minimal match count among the primary and the regularizing kind.
    pub fn min_matches(&self) -> usize {
        let base = self.kind.min_matches();
        match self.regularization {
            Some(r) => base.max(r.model.min_matches()),
            None => base,
        }
    }

    #[inline]
    pub fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.linear * p + self.translation
    }

    /// Map a world coordinate back into the model's local frame.
    pub fn apply_inverse(&self, p: &Vector3<f64>) -> Result<Vector3<f64>> {
        Ok(self.inverse()?.apply(p))
    }

    /// Numerically invert the model once so it can be applied repeatedly.
    pub fn inverse(&self) -> Result<InverseModel> {
        let det = self.linear.determinant();
        if !det.is_finite() || det.abs() <= 1e-12 {
            return Err(Error::NonInvertible);
        }
        let linear_inv = self.linear.try_inverse().ok_or(Error::NonInvertible)?;
        Ok(InverseModel {
            linear_inv,
            translation: self.translation,
        })
    }

    /// Copy the parameters of `other` while keeping this model's kind.
    pub fn set(&mut self, other: &TransformModel) {
        self.linear = other.linear;
        self.translation = other.translation;
    }

    /// Weighted least-squares fit mapping every `pair.p` onto `pair.q`.
    ///
    /// The model is left untouched when the fit fails.
    pub fn fit(&mut self, pairs: &[WeightedPair]) -> Result<()> {
        let required = self.min_matches();
        if pairs.len() < required {
            return Err(Error::InsufficientData {
                model: self.kind,
                found: pairs.len(),
                required,
            });
        }
        let (mut linear, mut translation) = fit::fit_kind(self.kind, pairs)?;
        if let Some(reg) = self.regularization {
            let (reg_linear, reg_translation) = fit::fit_kind(reg.model, pairs)?;
            let l = reg.lambda.clamp(0.0, 1.0);
            linear = linear * (1.0 - l) + reg_linear * l;
            translation = translation * (1.0 - l) + reg_translation * l;
        }
        self.linear = linear;
        self.translation = translation;
        Ok(())
    }

    /// Row-major `3 × 4` affine matrix, the layout used by the XML persistence layer.
    pub fn to_row_major(&self) -> [f64; 12] {
        let mut out = [0.0; 12];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 4 + c] = self.linear[(r, c)];
            }
            out[r * 4 + 3] = self.translation[r];
        }
        out
    }

    /// Maximal absolute parameter difference, used to compare two fits.
    pub fn max_parameter_delta(&self, other: &TransformModel) -> f64 {
        let dl = (self.linear - other.linear).abs().max();
        let dt = (self.translation - other.translation).abs().max();
        dl.max(dt)
    }
}

/// Precomputed inverse of a [`TransformModel`].
#[derive(Clone, Copy, Debug)]
pub struct InverseModel {
    linear_inv: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl InverseModel {
    #[inline]
    pub fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.linear_inv * (p - self.translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn pairs_from(model: &TransformModel, pts: &[Vector3<f64>]) -> Vec<WeightedPair> {
        pts.iter()
            .map(|p| WeightedPair {
                p: *p,
                q: model.apply(p),
                w: 1.0,
            })
            .collect()
    }

    fn tetrahedron() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 12.0, 0.0),
            Vector3::new(0.0, 0.0, 7.0),
            Vector3::new(4.0, 5.0, 6.0),
        ]
    }

    #[test]
    fn rigid_fit_recovers_rotation_and_translation() {
        let rot = Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let truth = TransformModel::from_parts(
            ModelKind::Rigid3D,
            *rot.matrix(),
            Vector3::new(3.0, -4.0, 5.0),
        );
        let pairs = pairs_from(&truth, &tetrahedron());
        let mut model = TransformModel::identity(ModelKind::Rigid3D);
        model.fit(&pairs).expect("fit");
        assert!(model.max_parameter_delta(&truth) < 1e-9);
    }

    #[test]
    fn affine_fit_recovers_shear() {
        let linear = Matrix3::new(1.1, 0.2, 0.0, 0.0, 0.9, 0.1, 0.05, 0.0, 1.3);
        let truth =
            TransformModel::from_parts(ModelKind::Affine3D, linear, Vector3::new(1.0, 2.0, 3.0));
        let pairs = pairs_from(&truth, &tetrahedron());
        let mut model = TransformModel::identity(ModelKind::Affine3D);
        model.fit(&pairs).expect("fit");
        assert!(model.max_parameter_delta(&truth) < 1e-9);
    }

    #[test]
    fn planar_models_leave_z_untouched() {
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.4);
        let truth = TransformModel::from_parts(
            ModelKind::Rigid2D,
            *rot.matrix(),
            Vector3::new(2.0, 1.0, 0.0),
        );
        let pairs = pairs_from(&truth, &tetrahedron());
        let mut model = TransformModel::identity(ModelKind::Rigid2D);
        model.fit(&pairs).expect("fit");
        let p = Vector3::new(1.0, 2.0, 9.0);
        assert_relative_eq!(model.apply(&p).z, 9.0, epsilon = 1e-12);
        assert!(model.max_parameter_delta(&truth) < 1e-9);
    }

    #[test]
    fn too_few_matches_is_insufficient_data() {
        let pairs = pairs_from(
            &TransformModel::identity(ModelKind::Affine3D),
            &tetrahedron()[..3],
        );
        let mut model = TransformModel::identity(ModelKind::Affine3D);
        let err = model.fit(&pairs).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientData {
                found: 3,
                required: 4,
                ..
            }
        ));
    }

    #[test]
    fn colinear_points_are_ill_conditioned() {
        let pts: Vec<Vector3<f64>> = (0..5)
            .map(|i| Vector3::new(i as f64, 2.0 * i as f64, 0.5 * i as f64))
            .collect();
        let pairs = pairs_from(&TransformModel::identity(ModelKind::Affine3D), &pts);
        for kind in [ModelKind::Affine3D, ModelKind::Rigid3D] {
            let mut model = TransformModel::identity(kind);
            assert!(matches!(
                model.fit(&pairs),
                Err(Error::IllConditioned { .. })
            ));
        }
    }

    #[test]
    fn regularized_fit_interpolates_towards_simpler_model() {
        let linear = Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0);
        let truth = TransformModel::from_parts(ModelKind::Affine3D, linear, Vector3::zeros());
        let pairs = pairs_from(&truth, &tetrahedron());
        let mut model = TransformModel::regularized(
            ModelKind::Affine3D,
            Regularization {
                model: ModelKind::Translation3D,
                lambda: 0.5,
            },
        );
        model.fit(&pairs).expect("fit");
        // halfway between a 2x scaling and the identity
        assert_relative_eq!(model.linear()[(0, 0)], 1.5, epsilon = 1e-9);
    }

    #[test]
    fn inverse_round_trips_and_detects_singular_maps() {
        let model = TransformModel::from_parts(
            ModelKind::Affine3D,
            Matrix3::new(1.0, 0.5, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.5),
            Vector3::new(5.0, 6.0, 7.0),
        );
        let p = Vector3::new(1.0, -2.0, 3.0);
        let back = model.apply_inverse(&model.apply(&p)).expect("invertible");
        assert_relative_eq!(back, p, epsilon = 1e-12);

        let singular =
            TransformModel::from_parts(ModelKind::Affine3D, Matrix3::zeros(), Vector3::zeros());
        assert!(matches!(singular.inverse(), Err(Error::NonInvertible)));
    }
}

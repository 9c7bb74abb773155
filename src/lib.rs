#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fusion;
pub mod image;
pub mod registration;
pub mod types;
pub mod weights;

// Building blocks of the optimizer, exposed for callers that drive tiles directly.
pub mod model;
pub mod tile;

// Synthetic bead scenes used by the demo and the integration tests.
pub mod synthetic;

// --- High-level re-exports -------------------------------------------------

pub use crate::error::{Error, Result};

// Registration entry point and its results.
pub use crate::registration::{
    register_views, RegistrationParams, RegistrationResult, RegistrationStatistics,
};

// Fusion entry points.
pub use crate::fusion::{
    fuse, fuse_groups, FusedVolume, FusionMode, FusionOutput, FusionParams, SourceView,
};

pub use crate::model::{ModelKind, Regularization, TransformModel};
pub use crate::tile::{OptimizeParams, TileConfiguration};
pub use crate::types::{BoundingBox, CorrespondenceSet, PointMatch, ViewId};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use spim_reconstruction::prelude::*;
///
/// # fn main() -> spim_reconstruction::Result<()> {
/// let a = VolumeF32::new(64, 64, 32);
/// let b = VolumeF32::new(64, 64, 32);
/// let views = [
///     SourceView {
///         id: ViewId::angle(0),
///         volume: a.as_view(),
///         model: TransformModel::identity(ModelKind::Affine3D),
///     },
///     SourceView {
///         id: ViewId::angle(90),
///         volume: b.as_view(),
///         model: TransformModel::identity(ModelKind::Affine3D),
///     },
/// ];
/// let bbox = BoundingBox::enclosing(views.iter().map(|v| (&v.model, v.dims())))
///     .expect("at least one view");
/// let fused = fuse(&bbox, &views, &FusionParams::default())?;
/// println!("fused {:?}", fused.volumes[0].volume.max_value());
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::image::{VolumeF32, VolumeRef, VolumeView};
    pub use crate::{
        fuse, register_views, BoundingBox, CorrespondenceSet, FusionMode, FusionParams,
        ModelKind, PointMatch, RegistrationParams, SourceView, TransformModel, ViewId,
    };
}

// --- Stage-level API (for tools & advanced users) ---------------------------

pub mod stages {
    pub use crate::diagnostics::{
        GroupReport, RegistrationReport, RunReport, StageTiming, TimingBreakdown,
        ViewModelReport,
    };
    pub use crate::fusion::{
        divide_into_portions, extract_psf, fuse_with_layers, group_views, normalize_accumulated,
        split_portions, ImagePortion, SequentialFusion,
    };
    pub use crate::tile::{ErrorStatistic, ErrorSummary, OptimizeOutcome};
    pub use crate::weights::{
        CombinedWeight, IsolatedWeight, IsolatedWeightFactory, WeightLayers, WeightScratch,
    };
}

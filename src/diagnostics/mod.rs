//! Serializable reports of a registration + fusion run.
//!
//! [`RunReport`] is what the demo writes as JSON: the registration summary,
//! one entry per fused group and the stage timings.

pub mod timing;

pub use timing::{StageTiming, TimingBreakdown};

use crate::fusion::{GroupKey, GroupResult};
use crate::image::VolumeView;
use crate::registration::RegistrationResult;
use crate::registration::RegistrationStatistics;
use crate::types::{BoundingBox, ViewId};
use serde::Serialize;

/// Final transform of one view, row-major `[m00 m01 m02 t0 m10 ...]`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModelReport {
    pub view: ViewId,
    pub model: String,
    pub affine: [f64; 12],
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReport {
    pub iterations: usize,
    pub converged: bool,
    pub statistics: RegistrationStatistics,
    pub models: Vec<ViewModelReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<ViewId>,
}

impl RegistrationReport {
    pub fn from_result(result: &RegistrationResult) -> Self {
        Self {
            iterations: result.outcome.iterations,
            converged: result.outcome.converged,
            statistics: result.statistics.clone(),
            models: result
                .models
                .iter()
                .map(|(view, model)| ViewModelReport {
                    view: *view,
                    model: model.kind().to_string(),
                    affine: model.to_row_major(),
                })
                .collect(),
            unresolved: result.unresolved.clone(),
        }
    }
}

/// Outcome of fusing one (timepoint, channel) group.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub group: GroupKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    pub volumes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dims: Option<[usize; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_intensity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GroupReport {
    pub fn from_result(result: &GroupResult) -> Self {
        let (volumes, dims, max_intensity, error) = match &result.output {
            Ok(out) => {
                let first = out.volumes.first().map(|v| &v.volume);
                (
                    out.volumes.len(),
                    first.map(|v| v.dims()),
                    first.map(|v| v.max_value()),
                    None,
                )
            }
            Err(e) => (0, None, None, Some(e.to_string())),
        };
        Self {
            group: result.key,
            bbox: result.bbox,
            volumes,
            dims,
            max_intensity,
            error,
        }
    }
}

/// Everything the demo reports about one run.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationReport>,
    pub groups: Vec<GroupReport>,
    pub timings: TimingBreakdown,
}

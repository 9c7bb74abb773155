//! Global registration of views from pairwise correspondences.
//!
//! Every view becomes one tile of a [`TileConfiguration`]; every
//! correspondence set connects two tiles. The driver fixes the reference
//! views, pre-aligns when the model needs it and then relaxes the whole
//! configuration.

use crate::diagnostics::TimingBreakdown;
use crate::error::{Error, Result};
use crate::model::{ModelKind, Regularization, TransformModel};
use crate::tile::{OptimizeOutcome, OptimizeParams, TileConfiguration, TileId};
use crate::types::{CorrespondenceSet, ViewId};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationParams {
    pub model: ModelKind,
    pub regularization: Option<Regularization>,
    /// `None` pre-aligns exactly for the rigid kinds.
    pub pre_align: Option<bool>,
    /// Views anchoring the world frame; the first view if empty.
    pub fixed_views: Vec<ViewId>,
    pub optimize: OptimizeParams,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            model: ModelKind::Affine3D,
            regularization: None,
            pre_align: None,
            fixed_views: Vec::new(),
            optimize: OptimizeParams::default(),
        }
    }
}

/// Residual of one view after optimization.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewError {
    pub view: ViewId,
    /// Mean weighted displacement of the view's matches (px).
    pub error: f64,
    /// Validated matches over descriptor candidates; 0 without candidates.
    pub ratio: f64,
}

/// Per-run summary of a registration.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatistics {
    pub timepoint: u32,
    pub min_error: f64,
    pub avg_error: f64,
    pub max_error: f64,
    pub min_ratio: f64,
    pub avg_ratio: f64,
    pub max_ratio: f64,
    /// View with the lowest correspondence ratio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_view: Option<ViewId>,
    /// View with the largest residual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_error_view: Option<ViewId>,
    pub views: Vec<ViewError>,
}

#[derive(Clone, Debug)]
pub struct RegistrationResult {
    /// View-local to world transform per view.
    pub models: BTreeMap<ViewId, TransformModel>,
    /// Views not connected to any fixed view; their models are unchanged.
    pub unresolved: Vec<ViewId>,
    pub outcome: OptimizeOutcome,
    pub statistics: RegistrationStatistics,
    pub timings: TimingBreakdown,
}

/// Register `views` from the given correspondence sets.
///
/// Views are processed in [`ViewId`] order, which also fixes the tile ids
/// and thereby the relaxation order.
pub fn register_views(
    views: &[ViewId],
    correspondences: &[CorrespondenceSet],
    params: &RegistrationParams,
) -> Result<RegistrationResult> {
    let total_start = Instant::now();
    let mut ids: Vec<ViewId> = views.to_vec();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Err(Error::InvalidParameter("no views to register".into()));
    }
    let tile_of: BTreeMap<ViewId, TileId> = ids.iter().enumerate().map(|(t, &v)| (v, t)).collect();
    let lookup = |v: &ViewId| {
        tile_of
            .get(v)
            .copied()
            .ok_or_else(|| Error::InvalidParameter(format!("unknown view {v}")))
    };

    let mut config = TileConfiguration::new();
    for _ in &ids {
        let model = match params.regularization {
            Some(r) => TransformModel::regularized(params.model, r),
            None => TransformModel::identity(params.model),
        };
        config.add_tile(model);
    }
    for set in correspondences {
        let (a, b) = (lookup(&set.a)?, lookup(&set.b)?);
        if set.matches.is_empty() {
            continue;
        }
        config.connect(a, b, &set.matches)?;
    }

    if params.fixed_views.is_empty() {
        config.fix_tile(0)?;
    } else {
        for v in &params.fixed_views {
            config.fix_tile(lookup(v)?)?;
        }
    }

    let mut timings = TimingBreakdown::default();
    let unresolved_tiles = if params
        .pre_align
        .unwrap_or_else(|| params.model.needs_pre_alignment())
    {
        let start = Instant::now();
        let unaligned = config.pre_align()?;
        timings.push("pre-align", start.elapsed().as_secs_f64() * 1000.0);
        unaligned
    } else {
        unreachable_tiles(&config)
    };
    for &t in &unresolved_tiles {
        warn!("view {} is not connected to a fixed view", ids[t]);
    }

    let start = Instant::now();
    let outcome = config.optimize(&params.optimize)?;
    timings.push("optimize", start.elapsed().as_secs_f64() * 1000.0);
    timings.total_ms = total_start.elapsed().as_secs_f64() * 1000.0;

    let statistics = collect_statistics(&config, &ids, correspondences, &outcome);
    info!(
        "registered {} views: avg {:.3} / min {:.3} / max {:.3} px after {} iterations",
        ids.len(),
        statistics.avg_error,
        statistics.min_error,
        statistics.max_error,
        outcome.iterations
    );
    if let Some(worst) = statistics.worst_error_view {
        info!("largest residual in view {worst}");
    }

    let models = ids
        .iter()
        .enumerate()
        .map(|(t, &v)| (v, config.model(t).clone()))
        .collect();
    Ok(RegistrationResult {
        models,
        unresolved: unresolved_tiles.iter().map(|&t| ids[t]).collect(),
        outcome,
        statistics,
        timings,
    })
}

/// Tiles without a path of matches to a fixed tile.
fn unreachable_tiles(config: &TileConfiguration) -> Vec<TileId> {
    let mut seen = vec![false; config.len()];
    let mut queue: VecDeque<TileId> = config.fixed_tiles().into_iter().collect();
    for &t in &queue {
        seen[t] = true;
    }
    while let Some(t) = queue.pop_front() {
        for &n in config.connected_tiles(t) {
            if !seen[n] {
                seen[n] = true;
                queue.push_back(n);
            }
        }
    }
    (0..config.len()).filter(|&t| !seen[t]).collect()
}

fn collect_statistics(
    config: &TileConfiguration,
    ids: &[ViewId],
    correspondences: &[CorrespondenceSet],
    outcome: &OptimizeOutcome,
) -> RegistrationStatistics {
    let mut found = vec![0usize; ids.len()];
    let mut candidates = vec![0usize; ids.len()];
    for set in correspondences {
        for v in [set.a, set.b] {
            if let Ok(t) = ids.binary_search(&v) {
                found[t] += set.matches.len();
                candidates[t] += set.candidates;
            }
        }
    }

    let mut min_ratio = 1.0f64;
    let mut max_ratio = 0.0f64;
    let mut sum_ratio = 0.0f64;
    let mut worst_view = None;
    let mut views = Vec::with_capacity(ids.len());
    for (t, &view) in ids.iter().enumerate() {
        let ratio = if candidates[t] > 0 {
            found[t] as f64 / candidates[t] as f64
        } else {
            0.0
        };
        if ratio <= min_ratio {
            min_ratio = ratio;
            worst_view = Some(view);
        }
        max_ratio = max_ratio.max(ratio);
        sum_ratio += ratio;
        views.push(ViewError {
            view,
            error: config.tile_distance(t),
            ratio,
        });
    }

    let error = outcome.error;
    RegistrationStatistics {
        timepoint: ids.first().map_or(0, |v| v.timepoint),
        min_error: error.min,
        avg_error: error.average,
        max_error: error.max,
        min_ratio,
        avg_ratio: sum_ratio / ids.len().max(1) as f64,
        max_ratio,
        worst_view,
        worst_error_view: error.worst_tile.and_then(|t| ids.get(t).copied()),
        views,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointMatch;
    use nalgebra::Vector3;

    fn shifted(points: &[Vector3<f64>], by: Vector3<f64>) -> Vec<PointMatch> {
        points.iter().map(|p| PointMatch::new(*p, p + by)).collect()
    }

    fn cloud() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(5.0, 5.0, 5.0),
        ]
    }

    #[test]
    fn translated_views_are_recovered() {
        let a = ViewId::angle(0);
        let b = ViewId::angle(45);
        let sets = vec![CorrespondenceSet {
            a: b,
            b: a,
            // point p in b sits at p + (3, -2, 1) in a
            matches: shifted(&cloud(), Vector3::new(3.0, -2.0, 1.0)),
            candidates: 10,
        }];
        let params = RegistrationParams {
            model: ModelKind::Translation3D,
            ..RegistrationParams::default()
        };
        let result = register_views(&[b, a], &sets, &params).expect("registration");
        let t = result.models[&b].translation();
        assert!((t - Vector3::new(3.0, -2.0, 1.0)).norm() < 1e-6);
        assert!(result.unresolved.is_empty());
        assert!(result.statistics.avg_error < 1e-6);
        assert!((result.statistics.avg_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn disconnected_views_are_reported() {
        let ids = [ViewId::angle(0), ViewId::angle(90), ViewId::angle(180)];
        let sets = vec![CorrespondenceSet {
            a: ids[1],
            b: ids[0],
            matches: shifted(&cloud(), Vector3::new(1.0, 0.0, 0.0)),
            candidates: 0,
        }];
        let params = RegistrationParams {
            model: ModelKind::Translation3D,
            ..RegistrationParams::default()
        };
        let result = register_views(&ids, &sets, &params).expect("registration");
        assert_eq!(result.unresolved, vec![ids[2]]);
        assert_eq!(result.statistics.min_ratio, 0.0);
    }

    #[test]
    fn unknown_views_are_rejected() {
        let sets = vec![CorrespondenceSet {
            a: ViewId::angle(0),
            b: ViewId::angle(7),
            matches: Vec::new(),
            candidates: 0,
        }];
        let err = register_views(&[ViewId::angle(0)], &sets, &RegistrationParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}

//! Tile graph used by the global registration.
//!
//! Tiles live in an arena addressed by [`TileId`]. Points are stored once in
//! a shared point arena; every external [`PointMatch`] becomes two directed
//! [`TileMatch`] records (one per tile) that reference the same two points,
//! so a tile always sees its own point as `p1` and the neighbour's as `p2`.
//! Iteration over tiles is always in ascending id order.

mod optimize;
mod prealign;
mod statistic;

use crate::error::{Error, Result};
use crate::model::{TransformModel, WeightedPair};
use crate::types::PointMatch;
use log::info;
use nalgebra::Vector3;
use serde::Serialize;

pub use optimize::{OptimizeOutcome, OptimizeParams};
pub use statistic::ErrorStatistic;

pub type TileId = usize;
pub type PointId = usize;

#[derive(Clone, Debug)]
struct Point {
    local: Vector3<f64>,
    world: Vector3<f64>,
}

/// Directed match as seen from the owning tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileMatch {
    /// Point local to the owning tile.
    pub p1: PointId,
    /// Point local to the connected tile.
    pub p2: PointId,
    pub weight: f64,
}

#[derive(Clone, Debug)]
struct Tile {
    model: TransformModel,
    matches: Vec<TileMatch>,
    connected: Vec<TileId>,
    distance: f64,
}

/// Average, minimal and maximal per-tile displacement after the last update.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Tile with the largest mean displacement.
    pub worst_tile: Option<TileId>,
}

impl Default for ErrorSummary {
    fn default() -> Self {
        Self {
            average: f64::MAX,
            min: f64::MAX,
            max: 0.0,
            worst_tile: None,
        }
    }
}

/// Arena of tiles plus the fixed subset anchoring the world frame.
#[derive(Clone, Debug, Default)]
pub struct TileConfiguration {
    tiles: Vec<Tile>,
    points: Vec<Point>,
    fixed: Vec<bool>,
    error: ErrorSummary,
    converged: bool,
}

impl TileConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tile owning `model`; ids are assigned consecutively from zero.
    pub fn add_tile(&mut self, model: TransformModel) -> TileId {
        self.tiles.push(Tile {
            model,
            matches: Vec::new(),
            connected: Vec::new(),
            distance: 0.0,
        });
        self.fixed.push(false);
        self.converged = false;
        self.tiles.len() - 1
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Register matches between tile `a` (`p1`) and tile `b` (`p2`).
    pub fn connect(&mut self, a: TileId, b: TileId, matches: &[PointMatch]) -> Result<()> {
        self.check_id(a)?;
        self.check_id(b)?;
        if a == b {
            return Err(Error::InvalidParameter(format!(
                "tile {a} cannot be matched against itself"
            )));
        }
        if let Some(bad) = matches
            .iter()
            .find(|m| !(m.weight > 0.0 && m.weight <= 1.0))
        {
            return Err(Error::InvalidParameter(format!(
                "match weight {} outside (0, 1]",
                bad.weight
            )));
        }
        if matches.is_empty() {
            return Ok(());
        }
        for m in matches {
            let pa = self.push_point(m.p1);
            let pb = self.push_point(m.p2);
            self.tiles[a].matches.push(TileMatch {
                p1: pa,
                p2: pb,
                weight: m.weight,
            });
            self.tiles[b].matches.push(TileMatch {
                p1: pb,
                p2: pa,
                weight: m.weight,
            });
        }
        if !self.tiles[a].connected.contains(&b) {
            self.tiles[a].connected.push(b);
            self.tiles[b].connected.push(a);
        }
        self.converged = false;
        Ok(())
    }

    /// Exclude a tile from optimization; its model defines the world frame.
    pub fn fix_tile(&mut self, id: TileId) -> Result<()> {
        self.check_id(id)?;
        self.fixed[id] = true;
        self.converged = false;
        Ok(())
    }

    pub fn is_fixed(&self, id: TileId) -> bool {
        self.fixed.get(id).copied().unwrap_or(false)
    }

    pub fn fixed_tiles(&self) -> Vec<TileId> {
        (0..self.tiles.len()).filter(|&id| self.fixed[id]).collect()
    }

    /// # Panics
    ///
    /// If `id` was not returned by [`Self::add_tile`]. The same holds for
    /// the other per-tile and per-point accessors below.
    pub fn model(&self, id: TileId) -> &TransformModel {
        &self.tiles[id].model
    }

    /// Replace a tile's model, e.g. with an externally known initial guess.
    pub fn set_model(&mut self, id: TileId, model: TransformModel) -> Result<()> {
        self.check_id(id)?;
        self.tiles[id].model = model;
        self.converged = false;
        Ok(())
    }

    /// Directed matches of a tile, `p1` always on this tile. Panics on an unknown id.
    pub fn matches(&self, id: TileId) -> &[TileMatch] {
        &self.tiles[id].matches
    }

    pub fn connected_tiles(&self, id: TileId) -> &[TileId] {
        &self.tiles[id].connected
    }

    /// Panics if `id` is not a point id from [`TileMatch`].
    pub fn point_local(&self, id: PointId) -> &Vector3<f64> {
        &self.points[id].local
    }

    pub fn point_world(&self, id: PointId) -> &Vector3<f64> {
        &self.points[id].world
    }

    /// Mean displacement of a tile's matches after the last update.
    ///
    /// # Panics
    ///
    /// If `id` is not a tile of this configuration.
    pub fn tile_distance(&self, id: TileId) -> f64 {
        self.tiles[id].distance
    }

    /// Error summary of the last global update.
    pub fn error(&self) -> ErrorSummary {
        self.error
    }

    /// Refresh all world coordinates and log the displacement summary.
    pub fn compute_error(&mut self) -> ErrorSummary {
        let summary = self.update();
        info!(
            "displacement over {} tiles: average={:.3}px min={:.3}px max={:.3}px",
            self.tiles.len(),
            summary.average,
            summary.min,
            summary.max
        );
        summary
    }

    fn check_id(&self, id: TileId) -> Result<()> {
        if id < self.tiles.len() {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "unknown tile {id} (configuration has {} tiles)",
                self.tiles.len()
            )))
        }
    }

    fn push_point(&mut self, local: Vector3<f64>) -> PointId {
        self.points.push(Point {
            local,
            world: local,
        });
        self.points.len() - 1
    }

    /// Transform the tile's own points into world coordinates.
    fn apply_tile(&mut self, id: TileId) {
        let tile = &self.tiles[id];
        for m in &tile.matches {
            let point = &mut self.points[m.p1];
            point.world = tile.model.apply(&point.local);
        }
    }

    /// Apply the tile's model and recompute its mean match displacement.
    fn update_tile(&mut self, id: TileId) -> f64 {
        self.apply_tile(id);
        self.measure_tile(id)
    }

    /// Mean displacement of the tile's matches at the current world positions.
    fn measure_tile(&mut self, id: TileId) -> f64 {
        let tile = &self.tiles[id];
        let distance = if tile.matches.is_empty() {
            0.0
        } else {
            let sum: f64 = tile
                .matches
                .iter()
                .map(|m| (self.points[m.p1].world - self.points[m.p2].world).norm())
                .sum();
            sum / tile.matches.len() as f64
        };
        self.tiles[id].distance = distance;
        distance
    }

    /// Re-fit the tile's model so its local points land on the neighbours' world points.
    fn fit_tile(&mut self, id: TileId) -> Result<()> {
        let pairs: Vec<WeightedPair> = self.tiles[id]
            .matches
            .iter()
            .map(|m| self.weighted_pair(m))
            .collect();
        self.tiles[id].model.fit(&pairs)
    }

    fn weighted_pair(&self, m: &TileMatch) -> WeightedPair {
        WeightedPair {
            p: self.points[m.p1].local,
            q: self.points[m.p2].world,
            w: m.weight,
        }
    }

    /// Update every tile and recompute the global displacement statistics.
    ///
    /// Tiles without any match do not contribute.
    fn update(&mut self) -> ErrorSummary {
        let mut sum = 0.0;
        let mut count = 0usize;
        let mut summary = ErrorSummary::default();
        for id in 0..self.tiles.len() {
            self.apply_tile(id);
        }
        for id in 0..self.tiles.len() {
            let d = self.measure_tile(id);
            if self.tiles[id].matches.is_empty() {
                continue;
            }
            sum += d;
            count += 1;
            summary.min = summary.min.min(d);
            if summary.worst_tile.is_none() || d > summary.max {
                summary.max = d;
                summary.worst_tile = Some(id);
            }
        }
        if count == 0 {
            summary = ErrorSummary {
                average: 0.0,
                min: 0.0,
                max: 0.0,
                worst_tile: None,
            };
        } else {
            summary.average = sum / count as f64;
        }
        self.error = summary;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelKind;

    #[test]
    #[should_panic]
    fn unknown_tile_id_panics_on_lookup() {
        let mut tc = TileConfiguration::new();
        tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
        let _ = tc.model(1);
    }

    #[test]
    fn unknown_tile_id_is_rejected_by_mutators() {
        let mut tc = TileConfiguration::new();
        tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
        assert!(matches!(tc.fix_tile(3), Err(Error::InvalidParameter(_))));
        assert!(tc
            .set_model(3, TransformModel::identity(ModelKind::Rigid3D))
            .is_err());
        assert!(!tc.is_fixed(3));
    }

    fn translated(dx: f64) -> Vec<PointMatch> {
        (0..4)
            .map(|i| {
                let p = Vector3::new(i as f64, (i * i) as f64, 1.0);
                PointMatch::new(p, p + Vector3::new(dx, 0.0, 0.0))
            })
            .collect()
    }

    #[test]
    fn connect_mirrors_matches_on_both_tiles() {
        let mut tc = TileConfiguration::new();
        let a = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        let b = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        tc.connect(a, b, &translated(2.0)).expect("connect");
        assert_eq!(tc.matches(a).len(), 4);
        assert_eq!(tc.matches(b).len(), 4);
        assert_eq!(tc.connected_tiles(a), &[b]);
        let ma = tc.matches(a)[0];
        let mb = tc.matches(b)[0];
        assert_eq!((ma.p1, ma.p2), (mb.p2, mb.p1));
    }

    #[test]
    fn update_reports_mean_displacement() {
        let mut tc = TileConfiguration::new();
        let a = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        let b = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        let c = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        tc.connect(a, b, &translated(2.0)).expect("connect");
        let summary = tc.compute_error();
        assert!((summary.average - 2.0).abs() < 1e-12);
        assert!((tc.tile_distance(a) - 2.0).abs() < 1e-12);
        assert_eq!(tc.tile_distance(c), 0.0);
    }

    #[test]
    fn rejects_invalid_connections() {
        let mut tc = TileConfiguration::new();
        let a = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        assert!(tc.connect(a, a, &translated(1.0)).is_err());
        assert!(tc.connect(a, 7, &translated(1.0)).is_err());
        let b = tc.add_tile(TransformModel::identity(ModelKind::Translation3D));
        let bad = [PointMatch::new(Vector3::zeros(), Vector3::zeros()).with_weight(0.0)];
        assert!(tc.connect(a, b, &bad).is_err());
    }
}

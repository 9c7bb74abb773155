//! Iterative relaxation of all non-fixed tiles with plateau detection.

use super::{ErrorStatistic, ErrorSummary, TileConfiguration, TileId};
use crate::error::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Slope magnitude below which the error curve counts as flat.
const PLATEAU_SLOPE: f64 = 1e-4;

/// Stopping criteria for [`TileConfiguration::optimize`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimizeParams {
    /// Do not accept convergence while the average displacement (px) is above this.
    pub max_allowed_error: f64,
    /// Hard iteration limit.
    pub max_iterations: usize,
    /// Width of the window over which the error curve must be flat.
    pub max_plateau_width: usize,
}

impl Default for OptimizeParams {
    fn default() -> Self {
        Self {
            max_allowed_error: 10.0,
            max_iterations: 10_000,
            max_plateau_width: 200,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeOutcome {
    pub error: ErrorSummary,
    pub iterations: usize,
    pub converged: bool,
}

impl TileConfiguration {
    /// Minimize the displacement of all matches of all tiles.
    ///
    /// Each iteration updates and re-fits every non-fixed tile in ascending
    /// id order, then recomputes the global error. Once more than
    /// `max_plateau_width` iterations ran, the loop stops when the error is
    /// at most `max_allowed_error` and the error slope over the plateau
    /// width, half of it, and so on down to one, is flat.
    ///
    /// A configuration that converged and has not been modified since is
    /// only verified with a single sweep. If that sweep misses
    /// `max_allowed_error` it counts as the first iteration of a full run.
    pub fn optimize(&mut self, params: &OptimizeParams) -> Result<OptimizeOutcome> {
        let order = self.relaxation_order();
        self.update();

        let mut observer = ErrorStatistic::new(params.max_plateau_width + 1);
        let mut iteration = 0usize;
        let mut converged = false;

        if self.converged && params.max_iterations > 0 {
            self.relax(&order)?;
            let error = self.update();
            debug!(
                "configuration already converged, verification sweep error={:.6}px",
                error.average
            );
            if error.average <= params.max_allowed_error {
                return Ok(OptimizeOutcome {
                    error,
                    iterations: 1,
                    converged: true,
                });
            }
            self.converged = false;
            observer.add(error.average);
            iteration = 1;
        }

        let mut proceed = iteration < params.max_iterations;

        while proceed {
            self.relax(&order)?;
            let error = self.update();
            observer.add(error.average);

            if iteration > params.max_plateau_width {
                proceed = error.average > params.max_allowed_error;
                let mut width = params.max_plateau_width;
                while !proceed && width >= 1 {
                    match observer.wide_slope(width) {
                        Some(slope) => proceed |= slope.abs() > PLATEAU_SLOPE,
                        None => {
                            warn!("cannot compute error slope over {width} iterations");
                            proceed = true;
                        }
                    }
                    width /= 2;
                }
                converged = !proceed;
            }

            iteration += 1;
            proceed &= iteration < params.max_iterations;
        }

        self.converged = converged;
        let error = self.error;
        if converged {
            info!(
                "optimized configuration of {} tiles after {} iterations: average={:.3}px min={:.3}px max={:.3}px",
                self.tiles.len(),
                iteration,
                error.average,
                error.min,
                error.max
            );
        } else {
            warn!(
                "stopped after {} iterations without convergence: average={:.3}px max={:.3}px",
                iteration, error.average, error.max
            );
        }
        Ok(OptimizeOutcome {
            error,
            iterations: iteration,
            converged,
        })
    }

    /// Non-fixed tiles that have something to fit, in ascending id order.
    fn relaxation_order(&self) -> Vec<TileId> {
        (0..self.tiles.len())
            .filter(|&id| !self.fixed[id] && !self.tiles[id].matches.is_empty())
            .collect()
    }

    fn relax(&mut self, order: &[TileId]) -> Result<()> {
        for &id in order {
            self.update_tile(id);
            self.fit_tile(id)?;
            self.update_tile(id);
        }
        Ok(())
    }
}

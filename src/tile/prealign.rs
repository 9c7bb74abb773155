//! Graph-propagated initial alignment for models whose relaxation needs a
//! good starting point.

use super::{TileConfiguration, TileId, TileMatch};
use crate::error::Result;
use crate::model::WeightedPair;
use log::{debug, warn};
use std::collections::HashSet;

impl TileConfiguration {
    /// Propagate pairwise fits outwards from the fixed tiles.
    ///
    /// If no tile is fixed the lowest tile id seeds the aligned set. Each
    /// aligned tile in turn serves as reference: every unaligned neighbour
    /// with more connecting matches than its model's minimum is fitted
    /// directly onto the reference's world points and inserted right after
    /// the reference, so its own neighbours are visited next.
    ///
    /// Returns the tiles that could not be reached; they keep their models.
    pub fn pre_align(&mut self) -> Result<Vec<TileId>> {
        if self.tiles.is_empty() {
            return Ok(Vec::new());
        }
        let (mut aligned, mut unaligned): (Vec<TileId>, Vec<TileId>) =
            if self.fixed.iter().any(|&f| f) {
                (0..self.tiles.len()).partition(|&id| self.fixed[id])
            } else {
                (vec![0], (1..self.tiles.len()).collect())
            };

        let mut cursor = 0usize;
        while cursor < aligned.len() && !unaligned.is_empty() {
            let reference = aligned[cursor];
            self.apply_tile(reference);

            let mut inserted = 0usize;
            let mut k = 0usize;
            while k < unaligned.len() {
                let target = unaligned[k];
                if !self.tiles[reference].connected.contains(&target) {
                    k += 1;
                    continue;
                }
                let pairs = self.connecting_pairs(target, reference);
                let required = self.tiles[target].model.min_matches();
                if pairs.len() > required {
                    self.tiles[target].model.fit(&pairs)?;
                    unaligned.remove(k);
                    aligned.insert(cursor + 1 + inserted, target);
                    inserted += 1;
                    debug!(
                        "pre-aligned tile {target} to tile {reference} using {} matches",
                        pairs.len()
                    );
                } else {
                    debug!(
                        "tile {target} shares only {} matches with tile {reference}, {} required",
                        pairs.len(),
                        required + 1
                    );
                    k += 1;
                }
            }
            cursor += 1;
        }

        if !unaligned.is_empty() {
            warn!(
                "{} tiles could not be pre-aligned: {:?}",
                unaligned.len(),
                unaligned
            );
        }
        self.converged = false;
        Ok(unaligned)
    }

    /// Matches of `target` whose second point belongs to `reference`.
    ///
    /// The result is oriented `p1 = target`, `p2 = reference`, so fitting the
    /// target's model to it maps target-local points onto the reference's
    /// world coordinates.
    pub fn connecting_point_matches(&self, target: TileId, reference: TileId) -> Vec<TileMatch> {
        let reference_points: HashSet<_> =
            self.tiles[reference].matches.iter().map(|m| m.p1).collect();
        self.tiles[target]
            .matches
            .iter()
            .filter(|m| reference_points.contains(&m.p2))
            .copied()
            .collect()
    }

    fn connecting_pairs(&self, target: TileId, reference: TileId) -> Vec<WeightedPair> {
        self.connecting_point_matches(target, reference)
            .iter()
            .map(|m| self.weighted_pair(m))
            .collect()
    }
}

//! Mass feasibility index.
//!
//! The index answers "can some multiset of residues close a residual mass
//! gap within tolerance using at most `k` more residues" in time that only
//! depends on the width of the tolerance window.
//!
//! Masses are discretized into buckets of width `1 / mass_scale` Da and a
//! bottom-up dynamic program (starting from mass zero) records, for every
//! bucket, the minimal number of residues that reaches it and the last
//! residue of one such minimal path. Since residue masses are positive and
//! additive, a bucket is reachable iff it is one residue away from another
//! reachable bucket.
//!
//! Rounding each residue mass to a bucket introduces at most half a bucket
//! of error per residue, queries widen their window accordingly.
//!
//! Only residues the mask allows past the first position are indexed.
//! N-terminal only tokens (including negative mass deltas) are handled by
//! the decoder, which queries the index after placing them.

use super::masking::TokenMask;
use crate::errors::ConfigError;
use crate::models::{
    ResidueSet,
    TokenId,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{
    debug,
    info,
};

const UNREACHABLE: u8 = u8::MAX;
const MAX_COUNT: u8 = u8::MAX - 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Knapsack {
    mass_scale: f64,
    max_mass: f64,
    /// Bucketed mass per token id, zero for tokens not used in the index.
    bucket_masses: Vec<usize>,
    /// Labels the index was built from, used to validate cached indices.
    labels: Vec<String>,
    min_count: Vec<u8>,
    last_residue: Vec<u8>,
}

impl Knapsack {
    /// Builds the index over the residues `mask` allows at interior
    /// positions that have a strictly positive mass.
    ///
    /// Structural tokens (zero mass) and negative mass deltas (e.g. loss of
    /// ammonia at the N-terminus) are left out, they cannot be part of an
    /// additive non-negative decomposition.
    pub fn construct(
        residues: &ResidueSet,
        mask: &TokenMask,
        max_mass: f64,
        mass_scale: f64,
    ) -> Result<Self, ConfigError> {
        if residues.len() > UNREACHABLE as usize {
            return Err(ConfigError::VocabularyTooLarge(residues.len()));
        }
        if max_mass <= 0.0 {
            return Err(ConfigError::ValueTooSmall {
                field: "knapsack_max_mass",
                min: f64::MIN_POSITIVE,
                value: max_mass,
            });
        }
        if mass_scale <= 0.0 {
            return Err(ConfigError::ValueTooSmall {
                field: "knapsack_mass_scale",
                min: f64::MIN_POSITIVE,
                value: mass_scale,
            });
        }

        let st = Instant::now();
        let bucket_masses = Self::index_buckets(residues, mask, mass_scale);
        let usable: Vec<(TokenId, usize)> = bucket_masses
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w > 0)
            .map(|(id, &w)| (id, w))
            .collect();
        if usable.is_empty() {
            return Err(ConfigError::NoPositiveResidues);
        }

        let num_buckets = (max_mass * mass_scale).round() as usize + 1;
        let mut min_count = vec![UNREACHABLE; num_buckets];
        let mut last_residue = vec![0u8; num_buckets];
        min_count[0] = 0;

        for mass in 1..num_buckets {
            let mut best = UNREACHABLE;
            let mut best_res = 0u8;
            for &(id, w) in usable.iter() {
                if w > mass {
                    continue;
                }
                let prev = min_count[mass - w];
                if prev == UNREACHABLE {
                    continue;
                }
                let count = prev.saturating_add(1).min(MAX_COUNT);
                // Strict comparison keeps the lowest token id on ties.
                if count < best {
                    best = count;
                    best_res = id as u8;
                }
            }
            min_count[mass] = best;
            last_residue[mass] = best_res;
        }

        let reachable = min_count.iter().filter(|&&x| x != UNREACHABLE).count();
        info!(
            "Built knapsack with {} buckets ({} reachable) over {} residues in {:?}",
            num_buckets,
            reachable,
            usable.len(),
            st.elapsed()
        );

        Ok(Self {
            mass_scale,
            max_mass,
            bucket_masses,
            labels: (0..residues.len())
                .map(|i| residues.label(i).to_string())
                .collect(),
            min_count,
            last_residue,
        })
    }

    /// Bucketed mass per token id, zero for tokens left out of the index.
    fn index_buckets(residues: &ResidueSet, mask: &TokenMask, mass_scale: f64) -> Vec<usize> {
        let mut out = vec![0usize; residues.len()];
        for res in residues.residues() {
            let bucket = (res.mass * mass_scale).round();
            if res.mass > 0.0 && bucket >= 1.0 && mask.allows(res.id, 1) {
                out[res.id] = bucket as usize;
            }
        }
        out
    }

    pub fn mass_scale(&self) -> f64 {
        self.mass_scale
    }

    pub fn max_mass(&self) -> f64 {
        self.max_mass
    }

    pub fn num_buckets(&self) -> usize {
        self.min_count.len()
    }

    /// True if this index was built for the same vocabulary, indexed token
    /// set and discretization.
    pub fn is_compatible(
        &self,
        residues: &ResidueSet,
        mask: &TokenMask,
        max_mass: f64,
        mass_scale: f64,
    ) -> bool {
        if self.mass_scale != mass_scale || self.max_mass != max_mass {
            return false;
        }
        if self.labels.len() != residues.len() {
            return false;
        }
        let buckets = Self::index_buckets(residues, mask, mass_scale);
        residues
            .residues()
            .all(|r| self.labels[r.id] == r.label && self.bucket_masses[r.id] == buckets[r.id])
    }

    /// Bucket window covering `residual ± tolerance`, widened by the rounding
    /// slack of `positions` residues. `None` if the window misses the table.
    fn window(&self, residual: f64, tolerance: f64, positions: usize) -> Option<(usize, usize)> {
        let slack = (positions.div_ceil(2) + 1) as f64;
        let lo = ((residual - tolerance) * self.mass_scale).floor() - slack;
        let hi = ((residual + tolerance) * self.mass_scale).ceil() + slack;
        if hi < 0.0 {
            return None;
        }
        let last = (self.min_count.len() - 1) as f64;
        if lo > last {
            return None;
        }
        Some((lo.max(0.0) as usize, hi.min(last) as usize))
    }

    /// Whether `residual` can be closed (within `tolerance` Da) with at
    /// most `positions_remaining` more residues.
    pub fn is_feasible(&self, residual: f64, tolerance: f64, positions_remaining: usize) -> bool {
        let Some((lo, hi)) = self.window(residual, tolerance, positions_remaining) else {
            return false;
        };
        let limit = positions_remaining.min(MAX_COUNT as usize) as u8;
        self.min_count[lo..=hi].iter().any(|&c| c <= limit)
    }

    /// One minimal residue multiset whose mass lands within the tolerance
    /// window around `residual`. Ties prefer the bucket closest to the centre.
    pub fn witness(&self, residual: f64, tolerance: f64) -> Option<Vec<TokenId>> {
        let (lo, hi) = self.window(residual, tolerance, 0)?;
        let centre = residual * self.mass_scale;
        let (bucket, _) = (lo..=hi)
            .filter(|&b| self.min_count[b] != UNREACHABLE)
            .map(|b| (b, (self.min_count[b], (b as f64 - centre).abs())))
            .min_by(|a, b| {
                a.1.0
                    .cmp(&b.1.0)
                    .then(a.1.1.partial_cmp(&b.1.1).unwrap_or(std::cmp::Ordering::Equal))
            })?;

        let mut out = Vec::with_capacity(self.min_count[bucket] as usize);
        let mut mass = bucket;
        while mass > 0 {
            let id = self.last_residue[mass] as TokenId;
            let w = self.bucket_masses[id];
            if w == 0 || w > mass {
                debug!("Broken knapsack path at bucket {}", mass);
                return None;
            }
            out.push(id);
            mass -= w;
        }
        out.sort_unstable();
        Some(out)
    }
}

/// Mass constraint used by the decoder, a no-op when the knapsack is disabled.
#[derive(Debug, Clone)]
pub enum MassFeasibility {
    Knapsack(Arc<Knapsack>),
    Disabled,
}

impl MassFeasibility {
    pub fn is_enabled(&self) -> bool {
        matches!(self, MassFeasibility::Knapsack(_))
    }

    pub fn is_feasible(&self, residual: f64, tolerance: f64, positions_remaining: usize) -> bool {
        match self {
            MassFeasibility::Knapsack(k) => k.is_feasible(residual, tolerance, positions_remaining),
            MassFeasibility::Disabled => true,
        }
    }
}

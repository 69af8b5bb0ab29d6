//! Mass constrained beam search.
//!
//! Every spectrum is decoded once per isotope offset. At each step all
//! active beams are scored by the sequence model, invalid continuations are
//! masked out and the best expansions (over all beams at once) survive.
//!
//! Masking rules, in order:
//! 1. Structural tokens other than the stop token are never emitted.
//! 2. Suppressed residues are never emitted.
//! 3. N-terminal only residues are only allowed at position 0 (when enabled).
//! 4. A residue is only allowed if the remaining mass can still be closed
//!    with the positions left.
//! 5. The stop token needs a non empty prefix and, when mass constrained,
//!    a residual inside the precursor tolerance.
//!
//! Each completed sequence consumes one of the `num_beams` slots, so a
//! spectrum never yields more than `num_beams` candidates.

use super::knapsack::MassFeasibility;
use super::masking::TokenMask;
use crate::config::{
    InferenceConfig,
    Precision,
};
use crate::errors::ConfigError;
use crate::models::constants::{
    EOS_ID,
    ISOTOPE_UNIT_MASS,
    mass_error_ppm,
    ppm_to_da,
};
use crate::models::{
    BeamState,
    Candidate,
    PredictionStatus,
    RejectionReason,
    ResidueSet,
    Spectrum,
    TokenId,
};
use crate::scoring::confidence::{
    EXHAUSTED_CONFIDENCE_FACTOR,
    confidence,
};
use crate::traits::SequenceScorer;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{
    debug,
    trace,
};

/// Result of decoding a single spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    pub status: PredictionStatus,
    /// Sorted best first. Empty for rejected or infeasible spectra.
    pub candidates: Vec<Candidate>,
}

impl DecodeResult {
    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            status: PredictionStatus::InputRejected(reason),
            candidates: Vec::new(),
        }
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

#[derive(Debug, Clone, Copy)]
struct Expansion {
    beam: usize,
    token: TokenId,
    token_log_prob: f32,
    score: f64,
}

#[derive(Debug, Default)]
struct SearchOutcome {
    completed: Vec<Candidate>,
    partial: Option<Candidate>,
}

/// Precursor target for one isotope offset.
#[derive(Debug, Clone, Copy)]
struct MassTarget {
    mass: f64,
    tolerance: f64,
    isotope_offset: i8,
}

#[derive(Debug, Clone)]
pub struct BeamSearchDecoder {
    residues: Arc<ResidueSet>,
    feasibility: MassFeasibility,
    mask: TokenMask,
    num_beams: usize,
    max_length: usize,
    max_charge: u8,
    isotope_offsets: Vec<i8>,
    tolerance_ppm: f64,
    fallback_unconstrained: bool,
    precision: Precision,
}

impl BeamSearchDecoder {
    pub fn new(
        config: &InferenceConfig,
        residues: Arc<ResidueSet>,
        feasibility: MassFeasibility,
    ) -> Result<Self, ConfigError> {
        let mask = TokenMask::new(
            &residues,
            &config.suppressed_residues,
            config.disable_terminal_residues_anywhere,
        )?;
        Ok(Self {
            residues,
            feasibility,
            mask,
            num_beams: config.num_beams.max(1),
            max_length: config.max_length,
            max_charge: config.max_charge,
            isotope_offsets: config.isotope_offsets(),
            tolerance_ppm: config.precursor_tolerance_ppm,
            fallback_unconstrained: config.fallback_unconstrained,
            precision: config.precision,
        })
    }

    pub fn residues(&self) -> &Arc<ResidueSet> {
        &self.residues
    }

    pub fn mask(&self) -> &TokenMask {
        &self.mask
    }

    pub fn feasibility(&self) -> &MassFeasibility {
        &self.feasibility
    }

    /// Reason to skip a spectrum entirely, checked before encoding.
    pub fn check_input(&self, spectrum: &Spectrum) -> Option<RejectionReason> {
        if spectrum.precursor_charge == 0 {
            return Some(RejectionReason::InvalidCharge);
        }
        if spectrum.precursor_charge > self.max_charge {
            return Some(RejectionReason::ChargeExceedsMax);
        }
        if spectrum.num_peaks() == 0 {
            return Some(RejectionReason::NoPeaks);
        }
        None
    }

    fn mass_target(&self, spectrum: &Spectrum, isotope_offset: i8) -> MassTarget {
        let mass = spectrum.residue_target_mass() - isotope_offset as f64 * ISOTOPE_UNIT_MASS;
        MassTarget {
            mass,
            tolerance: ppm_to_da(mass, self.tolerance_ppm),
            isotope_offset,
        }
    }

    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn decode<E, S>(&self, scorer: &S, spectrum: &Spectrum, embedding: &E) -> DecodeResult
    where
        S: SequenceScorer<E> + ?Sized,
    {
        if let Some(reason) = self.check_input(spectrum) {
            return DecodeResult::rejected(reason);
        }

        let mut best_completed: Option<Vec<Candidate>> = None;
        let mut best_partial: Option<Candidate> = None;
        let mut any_feasible = false;

        for &offset in self.isotope_offsets.iter() {
            let target = self.mass_target(spectrum, offset);
            if !self.start_feasible(target, &self.feasibility) {
                trace!(
                    "{}: residual {:.4} infeasible at isotope offset {}",
                    spectrum.spectrum_id, target.mass, offset
                );
                continue;
            }
            any_feasible = true;

            let outcome = self.search(scorer, embedding, target, &self.feasibility);
            if let Some(top) = outcome.completed.first() {
                let improves = best_completed
                    .as_ref()
                    .and_then(|c| c.first())
                    .is_none_or(|current| top.confidence > current.confidence);
                if improves {
                    best_completed = Some(outcome.completed);
                }
            } else if let Some(partial) = outcome.partial {
                if best_partial
                    .as_ref()
                    .is_none_or(|current| partial.log_probability > current.log_probability)
                {
                    best_partial = Some(partial);
                }
            }
        }

        if let Some(candidates) = best_completed {
            return DecodeResult {
                status: PredictionStatus::Ok,
                candidates,
            };
        }

        if !any_feasible {
            if !self.fallback_unconstrained {
                debug!(
                    "{}: no residue combination matches the precursor mass",
                    spectrum.spectrum_id
                );
                return DecodeResult {
                    status: PredictionStatus::InfeasibleMass,
                    candidates: Vec::new(),
                };
            }
            let offset = self.isotope_offsets.first().copied().unwrap_or(0);
            let target = self.mass_target(spectrum, offset);
            let outcome = self.search(scorer, embedding, target, &MassFeasibility::Disabled);
            if !outcome.completed.is_empty() {
                return DecodeResult {
                    status: PredictionStatus::UnconstrainedFallback,
                    candidates: outcome.completed,
                };
            }
            best_partial = outcome.partial;
        }

        DecodeResult {
            status: PredictionStatus::DecodingExhausted,
            candidates: best_partial.into_iter().collect(),
        }
    }

    /// Whether any first residue leaves a residual the feasibility index
    /// can close. N-terminal only tokens are not in the index, so they are
    /// tried here explicitly.
    fn start_feasible(&self, target: MassTarget, feasibility: &MassFeasibility) -> bool {
        if feasibility.is_feasible(target.mass, target.tolerance, self.max_length) {
            return true;
        }
        let Some(remaining) = self.max_length.checked_sub(1) else {
            return false;
        };
        self.residues.residues().any(|r| {
            self.mask.allows(r.id, 0)
                && feasibility.is_feasible(target.mass - r.mass, target.tolerance, remaining)
        })
    }

    fn search<E, S>(
        &self,
        scorer: &S,
        embedding: &E,
        target: MassTarget,
        feasibility: &MassFeasibility,
    ) -> SearchOutcome
    where
        S: SequenceScorer<E> + ?Sized,
    {
        let mut active = vec![BeamState::root(target.mass)];
        let mut completed: Vec<Candidate> = Vec::new();
        let mut exhausted: Vec<BeamState> = Vec::new();
        let mut expansions: Vec<Expansion> = Vec::new();

        for _step in 0..=self.max_length {
            if active.is_empty() || completed.len() >= self.num_beams {
                break;
            }

            let prefixes: Vec<&[TokenId]> = active.iter().map(|b| b.tokens.as_slice()).collect();
            let scores = scorer.score_batch(&prefixes, embedding);

            expansions.clear();
            for (beam_idx, beam) in active.iter().enumerate() {
                let before = expansions.len();
                if let Some(log_probs) = scores.get(beam_idx) {
                    self.expand(beam_idx, beam, log_probs, target, feasibility, &mut expansions);
                }
                if expansions.len() == before {
                    exhausted.push(beam.clone());
                }
            }

            expansions.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.token.cmp(&b.token))
                    .then(a.beam.cmp(&b.beam))
            });
            expansions.truncate(self.num_beams - completed.len());

            let mut next = Vec::with_capacity(expansions.len());
            for exp in expansions.iter() {
                let beam = &active[exp.beam];
                if exp.token == EOS_ID {
                    completed.push(self.finish(beam, Some(exp.token_log_prob), target));
                } else {
                    next.push(beam.extend(
                        exp.token,
                        exp.token_log_prob,
                        self.residues.mass(exp.token),
                    ));
                }
            }
            active = next;
        }
        exhausted.extend(active);

        completed.sort_by(compare_candidates);
        let partial = exhausted
            .iter()
            .filter(|b| !b.is_empty())
            .min_by(|a, b| {
                b.log_probability
                    .total_cmp(&a.log_probability)
                    .then(a.tokens.cmp(&b.tokens))
            })
            .map(|b| self.finish(b, None, target));

        SearchOutcome { completed, partial }
    }

    /// Pushes every valid continuation of `beam`.
    fn expand(
        &self,
        beam_idx: usize,
        beam: &BeamState,
        log_probs: &[f32],
        target: MassTarget,
        feasibility: &MassFeasibility,
        out: &mut Vec<Expansion>,
    ) {
        let position = beam.len();
        let constrained = feasibility.is_enabled();
        for (token, &raw) in log_probs.iter().take(self.residues.len()).enumerate() {
            let lp = self.precision.apply(raw);
            if !lp.is_finite() {
                continue;
            }

            if token == EOS_ID {
                if position == 0 {
                    continue;
                }
                if constrained && beam.residual_mass.abs() > target.tolerance {
                    continue;
                }
            } else {
                if position >= self.max_length || !self.mask.allows(token, position) {
                    continue;
                }
                if constrained {
                    let residual = beam.residual_mass - self.residues.mass(token);
                    if residual < -target.tolerance {
                        continue;
                    }
                    let remaining = self.max_length - position - 1;
                    if !feasibility.is_feasible(residual, target.tolerance, remaining) {
                        continue;
                    }
                }
            }

            out.push(Expansion {
                beam: beam_idx,
                token,
                token_log_prob: lp,
                score: beam.log_probability + lp as f64,
            });
        }
    }

    /// Turns a beam into a candidate. `stop_log_prob` is `None` for beams
    /// that never reached a stop token.
    fn finish(&self, beam: &BeamState, stop_log_prob: Option<f32>, target: MassTarget) -> Candidate {
        let mut token_log_probabilities = beam.token_log_probabilities.clone();
        let mut log_probability = beam.log_probability;
        if let Some(lp) = stop_log_prob {
            token_log_probabilities.push(lp);
            log_probability += lp as f64;
        }
        let mut conf = confidence(&token_log_probabilities);
        if stop_log_prob.is_none() {
            conf *= EXHAUSTED_CONFIDENCE_FACTOR;
        }
        let observed = target.mass - beam.residual_mass;
        Candidate {
            tokens: beam.tokens.clone(),
            log_probability,
            token_log_probabilities,
            confidence: conf,
            isotope_offset: target.isotope_offset,
            mass_error_ppm: mass_error_ppm(observed, target.mass),
        }
    }
}

/// Best first: confidence, then log-probability, then token order.
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(b.log_probability.total_cmp(&a.log_probability))
        .then(a.tokens.cmp(&b.tokens))
}

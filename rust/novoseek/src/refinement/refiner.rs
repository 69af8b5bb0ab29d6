//! Iterative refinement of coarse predictions.
//!
//! The coarse sequence is written on a fixed width canvas padded with
//! `[PAD]`, partially re-noised, and repeatedly re-sampled from the
//! denoiser. Several independent samples are drawn per spectrum and the
//! best valid one replaces the coarse prediction.
//!
//! Every sample draws from its own `ChaCha8Rng` stream, keyed on the
//! spectrum index and the sample index, so results do not depend on how
//! spectra are batched or how many threads run.

use crate::config::{
    InferenceConfig,
    Precision,
};
use crate::decoding::TokenMask;
use crate::models::constants::{
    ISOTOPE_UNIT_MASS,
    PAD_ID,
    mass_error_ppm,
    ppm_to_da,
};
use crate::models::{
    Candidate,
    ResidueSet,
    Spectrum,
    TokenId,
};
use crate::scoring::confidence::confidence;
use crate::traits::Denoiser;
use rand::SeedableRng;
use rand::distributions::{
    Distribution,
    WeightedIndex,
};
use rand::seq::index::sample as sample_indices;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::trace;

/// Everything the refiner needs to know about one spectrum.
#[derive(Debug)]
pub struct RefinementRequest<'a, E> {
    /// Position of the spectrum in the whole input, seeds the sampler.
    pub spectrum_index: usize,
    pub spectrum: &'a Spectrum,
    pub embedding: &'a E,
    pub coarse: &'a Candidate,
}

#[derive(Debug, Clone)]
pub struct IterativeRefiner {
    residues: Arc<ResidueSet>,
    mask: TokenMask,
    mass_constrained: bool,
    max_length: usize,
    n_preds: usize,
    n_iterations: usize,
    noise_fraction: f32,
    temperature: f32,
    seed: u64,
    isotope_offsets: Vec<i8>,
    tolerance_ppm: f64,
    precision: Precision,
}

impl IterativeRefiner {
    pub fn new(
        config: &InferenceConfig,
        residues: Arc<ResidueSet>,
        mask: TokenMask,
        mass_constrained: bool,
    ) -> Self {
        Self {
            residues,
            mask,
            mass_constrained,
            max_length: config.max_length,
            n_preds: config.n_preds,
            n_iterations: config.refine_iterations,
            noise_fraction: config.refine_noise_fraction,
            temperature: config.refine_temperature,
            seed: config.seed,
            isotope_offsets: config.isotope_offsets(),
            tolerance_ppm: config.precursor_tolerance_ppm,
            precision: config.precision,
        }
    }

    /// Upper bound on denoiser calls for a single request.
    pub fn max_oracle_calls(&self) -> usize {
        self.n_preds * (self.n_iterations + 1)
    }

    fn rng_for(&self, spectrum_index: usize, sample_index: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(((spectrum_index as u64) << 20) ^ sample_index as u64);
        rng
    }

    /// Best valid refined candidate, `None` if no sample was valid.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn refine<E, D>(&self, denoiser: &D, request: &RefinementRequest<'_, E>) -> Option<Candidate>
    where
        D: Denoiser<E> + ?Sized,
    {
        let mut canvas: Vec<TokenId> = request
            .coarse
            .tokens
            .iter()
            .copied()
            .take(self.max_length)
            .collect();
        canvas.resize(self.max_length, PAD_ID);
        let target = request.spectrum.residue_target_mass();

        let mut best: Option<Candidate> = None;
        for sample_index in 0..self.n_preds {
            let mut rng = self.rng_for(request.spectrum_index, sample_index);
            let mut tokens = canvas.clone();
            self.add_noise(&mut tokens, &mut rng);

            for iteration in 0..self.n_iterations {
                let rows = denoiser.denoise(&tokens, request.embedding, iteration);
                // Masks apply to the sequence once padding is dropped.
                let mut placed = 0;
                for (position, row) in rows.iter().enumerate().take(tokens.len()) {
                    tokens[position] = self.sample_position(row, placed, &mut rng);
                    if tokens[position] != PAD_ID {
                        placed += 1;
                    }
                }
            }

            let rows = denoiser.denoise(&tokens, request.embedding, self.n_iterations);
            let Some(candidate) = self.score_sample(&tokens, &rows, target) else {
                trace!(
                    "{}: refinement sample {} rejected",
                    request.spectrum.spectrum_id, sample_index
                );
                continue;
            };
            // Strict comparison, earlier samples win ties.
            if best
                .as_ref()
                .is_none_or(|b| candidate.log_probability > b.log_probability)
            {
                best = Some(candidate);
            }
        }
        best
    }

    fn add_noise(&self, tokens: &mut [TokenId], rng: &mut ChaCha8Rng) {
        let n_noise = (self.noise_fraction as f64 * tokens.len() as f64).round() as usize;
        if n_noise == 0 {
            return;
        }
        let pool: Vec<TokenId> = std::iter::once(PAD_ID)
            .chain(self.residues.residues().map(|r| r.id))
            .filter(|&t| t == PAD_ID || self.mask.allows(t, 1))
            .collect();
        let Ok(choice) = WeightedIndex::new(vec![1u32; pool.len()]) else {
            return;
        };
        for position in sample_indices(rng, tokens.len(), n_noise.min(tokens.len())) {
            tokens[position] = pool[choice.sample(rng)];
        }
    }

    /// Samples one canvas position at the configured temperature. `sequence_position`
    /// counts the residues placed before it, which is what the masks see.
    fn sample_position(
        &self,
        row: &[f32],
        sequence_position: usize,
        rng: &mut ChaCha8Rng,
    ) -> TokenId {
        let allowed = |t: TokenId| t == PAD_ID || self.mask.allows(t, sequence_position);
        let scaled: Vec<(TokenId, f64)> = row
            .iter()
            .enumerate()
            .take(self.residues.len())
            .filter(|&(t, lp)| allowed(t) && lp.is_finite())
            .map(|(t, &lp)| (t, self.precision.apply(lp) as f64 / self.temperature as f64))
            .collect();
        let Some(max) = scaled.iter().map(|x| x.1).reduce(f64::max) else {
            return PAD_ID;
        };
        let weights: Vec<f64> = scaled.iter().map(|(_, x)| (x - max).exp()).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => scaled[dist.sample(rng)].0,
            Err(_) => PAD_ID,
        }
    }

    /// Drops padding and checks the sample, returning it as a candidate if valid.
    fn score_sample(&self, tokens: &[TokenId], rows: &[Vec<f32>], target: f64) -> Option<Candidate> {
        let mut residues = Vec::with_capacity(tokens.len());
        let mut token_log_probabilities = Vec::with_capacity(tokens.len());
        for (position, &token) in tokens.iter().enumerate() {
            if token == PAD_ID {
                continue;
            }
            let lp = rows
                .get(position)
                .and_then(|row| row.get(token))
                .copied()
                .map(|x| self.precision.apply(x))?;
            if !lp.is_finite() {
                return None;
            }
            residues.push(token);
            token_log_probabilities.push(lp);
        }

        if residues.is_empty() || !self.mask.allows_sequence(&residues) {
            return None;
        }
        let (isotope_offset, error) = self.mass_match(&residues, target)?;
        let log_probability = token_log_probabilities.iter().map(|&x| x as f64).sum();
        Some(Candidate {
            confidence: confidence(&token_log_probabilities),
            tokens: residues,
            log_probability,
            token_log_probabilities,
            isotope_offset,
            mass_error_ppm: error,
        })
    }

    /// First isotope offset (in trial order) whose target matches the
    /// sequence mass. Unconstrained refinement reports the closest offset.
    fn mass_match(&self, tokens: &[TokenId], target: f64) -> Option<(i8, f64)> {
        let mass = self.residues.sequence_mass(tokens);
        let mut closest: Option<(i8, f64)> = None;
        for &offset in self.isotope_offsets.iter() {
            let target_k = target - offset as f64 * ISOTOPE_UNIT_MASS;
            let error = mass_error_ppm(mass, target_k);
            if (mass - target_k).abs() <= ppm_to_da(target_k, self.tolerance_ppm) {
                return Some((offset, error));
            }
            if closest.is_none_or(|(_, e)| error.abs() < e.abs()) {
                closest = Some((offset, error));
            }
        }
        if self.mass_constrained { None } else { closest }
    }
}

//! Deterministic fragment-ion matching model.
//!
//! Scores a residue by how well the b ion ending at it (and the
//! complementary y ion) are supported by peaks in the spectrum. It needs
//! no trained weights, which makes the whole pipeline runnable and
//! testable end to end.

use crate::models::constants::{
    EOS_ID,
    MASS_PROTON,
    MASS_WATER,
    PAD_ID,
    TokenId,
};
use crate::models::{
    ResidueSet,
    Spectrum,
};
use crate::traits::{
    Denoiser,
    SequenceScorer,
    SpectrumEncoder,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::Arc;

/// Weight of one unit of peak evidence in logit space.
const EVIDENCE_WEIGHT: f32 = 3.0;
/// Residues that overshoot the precursor by more than this are penalized.
const OVERSHOOT_DA: f64 = 0.5;
const OVERSHOOT_LOGIT: f32 = -12.0;
/// Width (Da) of the gaussian used to reward a closed mass gap.
const CLOSURE_WIDTH_DA: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub max_supported_charge: u8,
    pub fragment_tolerance_da: f64,
    pub bin_width: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_supported_charge: 10,
            fragment_tolerance_da: 0.02,
            bin_width: 0.01,
        }
    }
}

/// Binned, max-normalized peak list of one spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakEmbedding {
    bins: Vec<(i64, f32)>,
    residue_target: f64,
    charge: u8,
}

impl PeakEmbedding {
    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn residue_target(&self) -> f64 {
        self.residue_target
    }

    /// Highest normalized intensity within `tolerance` of `mz`.
    fn intensity_near(&self, mz: f64, tolerance: f64, bin_width: f64) -> f32 {
        let lo = ((mz - tolerance) / bin_width).floor() as i64;
        let hi = ((mz + tolerance) / bin_width).ceil() as i64;
        let start = self.bins.partition_point(|&(b, _)| b < lo);
        self.bins[start..]
            .iter()
            .take_while(|&&(b, _)| b <= hi)
            .map(|&(_, i)| i)
            .fold(0.0, f32::max)
    }
}

#[derive(Debug, Clone)]
pub struct PeakMatchModel {
    residues: Arc<ResidueSet>,
    config: ModelConfig,
}

impl PeakMatchModel {
    pub fn new(residues: Arc<ResidueSet>, config: ModelConfig) -> Self {
        Self { residues, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// b/y support for a prefix of residue mass `prefix_mass`.
    fn evidence(&self, embedding: &PeakEmbedding, prefix_mass: f64) -> f32 {
        let tol = self.config.fragment_tolerance_da;
        let bw = self.config.bin_width;
        let b = prefix_mass;
        let y = embedding.residue_target - prefix_mass + MASS_WATER;
        let mut out = embedding.intensity_near(b + MASS_PROTON, tol, bw)
            + embedding.intensity_near(y + MASS_PROTON, tol, bw);
        if embedding.charge > 2 {
            out += 0.5
                * (embedding.intensity_near((b + 2.0 * MASS_PROTON) / 2.0, tol, bw)
                    + embedding.intensity_near((y + 2.0 * MASS_PROTON) / 2.0, tol, bw));
        }
        out
    }

    fn closure_logit(residual: f64, scale: f32, offset: f32) -> f32 {
        scale * (-(residual / CLOSURE_WIDTH_DA).powi(2)).exp() as f32 - offset
    }

    fn residue_logit(&self, embedding: &PeakEmbedding, prefix_mass: f64, token: TokenId) -> f32 {
        let next_mass = prefix_mass + self.residues.mass(token);
        let residual = embedding.residue_target - next_mass;
        if residual < -OVERSHOOT_DA {
            return OVERSHOOT_LOGIT;
        }
        // The last residue has no fragment ions of its own, closing the
        // precursor mass counts as both terminal ions being observed.
        let closure = 2.0 * (-(residual / CLOSURE_WIDTH_DA).powi(2)).exp() as f32;
        EVIDENCE_WEIGHT * (self.evidence(embedding, next_mass) + closure)
    }
}

pub(crate) fn log_softmax(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return;
    }
    let lse = max + logits.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
    logits.iter_mut().for_each(|x| *x -= lse);
}

impl SpectrumEncoder for PeakMatchModel {
    type Embedding = PeakEmbedding;

    fn encode(&self, spectrum: &Spectrum) -> PeakEmbedding {
        let bw = self.config.bin_width;
        let max_intensity = spectrum
            .iter_peaks()
            .map(|(_, i)| i)
            .fold(0.0f32, f32::max);
        let mut bins: Vec<(i64, f32)> = spectrum
            .iter_peaks()
            .filter(|&(mz, i)| mz.is_finite() && i.is_finite() && i > 0.0)
            .map(|(mz, i)| ((mz / bw).round() as i64, i / max_intensity))
            .collect();
        bins.sort_by_key(|x| x.0);
        bins.dedup_by(|next, kept| {
            if next.0 == kept.0 {
                kept.1 = kept.1.max(next.1);
                true
            } else {
                false
            }
        });
        PeakEmbedding {
            bins,
            residue_target: spectrum.residue_target_mass(),
            charge: spectrum.precursor_charge,
        }
    }

    fn max_supported_charge(&self) -> u8 {
        self.config.max_supported_charge
    }
}

impl SequenceScorer<PeakEmbedding> for PeakMatchModel {
    fn score(&self, prefix: &[TokenId], embedding: &PeakEmbedding) -> Vec<f32> {
        let prefix_mass = self.residues.sequence_mass(prefix);
        let mut logits: Vec<f32> = (0..self.residues.len())
            .map(|t| match t {
                EOS_ID => Self::closure_logit(embedding.residue_target - prefix_mass, 6.0, 3.0),
                t if self.residues.is_special(t) => f32::NEG_INFINITY,
                t => self.residue_logit(embedding, prefix_mass, t),
            })
            .collect();
        log_softmax(&mut logits);
        logits
    }
}

impl Denoiser<PeakEmbedding> for PeakMatchModel {
    fn denoise(&self, tokens: &[TokenId], embedding: &PeakEmbedding, _iteration: usize) -> Vec<Vec<f32>> {
        let mut prefix_mass = 0.0;
        let mut rows = Vec::with_capacity(tokens.len());
        for &current in tokens {
            let mut logits: Vec<f32> = (0..self.residues.len())
                .map(|t| match t {
                    PAD_ID => {
                        Self::closure_logit(embedding.residue_target - prefix_mass, 4.0, 2.0)
                    }
                    t if self.residues.is_special(t) => f32::NEG_INFINITY,
                    t => self.residue_logit(embedding, prefix_mass, t),
                })
                .collect();
            log_softmax(&mut logits);
            rows.push(logits);
            prefix_mass += self.residues.mass(current);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Singly charged b and y ladders for a peptide, all with unit intensity.
    fn ladder_spectrum(residues: &ResidueSet, peptide: &str) -> (Spectrum, Vec<TokenId>) {
        let tokens = residues.tokenize(peptide).unwrap();
        let total = residues.sequence_mass(&tokens);
        let mut mzs = Vec::new();
        let mut acc = 0.0;
        for &t in tokens[..tokens.len() - 1].iter() {
            acc += residues.mass(t);
            mzs.push(acc + MASS_PROTON);
            mzs.push(total - acc + MASS_WATER + MASS_PROTON);
        }
        mzs.sort_by(|a, b| a.total_cmp(b));
        let ints = vec![1.0; mzs.len()];
        (Spectrum::from_residue_mass("ladder", total, 2, mzs, ints), tokens)
    }

    fn argmax(row: &[f32]) -> TokenId {
        let mut best = 0;
        for (i, &x) in row.iter().enumerate() {
            if x > row[best] {
                best = i;
            }
        }
        best
    }

    #[test]
    fn test_encoding_bins_and_normalizes() {
        let model = PeakMatchModel::new(Arc::new(ResidueSet::default()), ModelConfig::default());
        let spec = Spectrum::new("x", 500.0, 2, vec![100.001, 100.002, 200.0], vec![2.0, 4.0, 1.0]);
        let emb = model.encode(&spec);
        assert_eq!(emb.num_bins(), 2);
        assert_eq!(emb.intensity_near(100.0, 0.02, 0.01), 1.0);
        assert_eq!(emb.intensity_near(200.0, 0.02, 0.01), 0.25);
        assert_eq!(emb.intensity_near(300.0, 0.02, 0.01), 0.0);
    }

    #[test]
    fn test_scorer_follows_the_ladder() {
        let residues = Arc::new(ResidueSet::default());
        let model = PeakMatchModel::new(residues.clone(), ModelConfig::default());
        let (spec, tokens) = ladder_spectrum(&residues, "PEPTWK");
        let emb = model.encode(&spec);

        let first = model.score(&[], &emb);
        assert_eq!(argmax(&first), tokens[0]);
        assert!(first[PAD_ID].is_infinite());

        let done = model.score(&tokens, &emb);
        assert_eq!(argmax(&done), EOS_ID);

        let total: f32 = first.iter().filter(|x| x.is_finite()).map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_denoiser_prefers_truth_and_padding() {
        let residues = Arc::new(ResidueSet::default());
        let model = PeakMatchModel::new(residues.clone(), ModelConfig::default());
        let (spec, tokens) = ladder_spectrum(&residues, "PEPTWK");
        let emb = model.encode(&spec);

        let mut canvas = tokens.clone();
        canvas.resize(tokens.len() + 3, PAD_ID);
        let rows = model.denoise(&canvas, &emb, 0);
        assert_eq!(rows.len(), canvas.len());
        for (pos, row) in rows.iter().enumerate() {
            let expected = tokens.get(pos).copied().unwrap_or(PAD_ID);
            assert_eq!(argmax(row), expected, "position {}", pos);
        }
    }
}

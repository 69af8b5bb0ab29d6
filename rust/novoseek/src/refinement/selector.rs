use crate::config::InferenceConfig;
use crate::decoding::DecodeResult;

/// Decides which first pass predictions go through refinement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementSelector {
    enabled: bool,
    refine_all: bool,
    threshold: f64,
}

impl RefinementSelector {
    pub fn new(enabled: bool, refine_all: bool, threshold: f64) -> Self {
        Self {
            enabled,
            refine_all,
            threshold,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.refine, config.refine_all, config.refine_threshold)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Spectra without a sequence are never refined.
    pub fn should_refine(&self, result: &DecodeResult) -> bool {
        if !self.enabled {
            return false;
        }
        match result.best() {
            Some(best) => self.refine_all || best.confidence < self.threshold,
            None => false,
        }
    }

    /// Splits result indices into `(needs_refinement, pass_through)`,
    /// both in input order.
    pub fn partition(&self, results: &[DecodeResult]) -> (Vec<usize>, Vec<usize>) {
        (0..results.len()).partition(|&i| self.should_refine(&results[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Candidate,
        PredictionStatus,
        RejectionReason,
    };

    fn with_confidence(confidence: f64) -> DecodeResult {
        DecodeResult {
            status: PredictionStatus::Ok,
            candidates: vec![Candidate {
                tokens: vec![3, 4],
                log_probability: confidence.ln(),
                token_log_probabilities: vec![],
                confidence,
                isotope_offset: 0,
                mass_error_ppm: 0.0,
            }],
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let sel = RefinementSelector::new(true, false, 0.9);
        assert!(!sel.should_refine(&with_confidence(0.9)));
        assert!(sel.should_refine(&with_confidence(0.8999)));
        assert!(!sel.should_refine(&with_confidence(0.9001)));
    }

    #[test]
    fn test_refine_all_and_disabled() {
        let all = RefinementSelector::new(true, true, 0.9);
        assert!(all.should_refine(&with_confidence(0.99)));

        let off = RefinementSelector::new(false, true, 0.9);
        assert!(!off.should_refine(&with_confidence(0.1)));
    }

    #[test]
    fn test_partition_skips_empty_predictions() {
        let sel = RefinementSelector::new(true, false, 0.5);
        let results = vec![
            with_confidence(0.2),
            DecodeResult::rejected(RejectionReason::NoPeaks),
            with_confidence(0.7),
            DecodeResult {
                status: PredictionStatus::InfeasibleMass,
                candidates: vec![],
            },
            with_confidence(0.1),
        ];
        let (refine, keep) = sel.partition(&results);
        assert_eq!(refine, vec![0, 4]);
        assert_eq!(keep, vec![1, 2, 3]);
    }
}

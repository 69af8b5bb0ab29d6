use serde::{
    Serialize,
    Serializer,
};
use std::collections::BTreeMap;

/// Why a spectrum was skipped before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    ChargeExceedsMax,
    InvalidCharge,
    NoPeaks,
}

/// Outcome of the first decoding pass for a spectrum.
///
/// None of these abort the batch, they are reported as a reason code
/// in the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionStatus {
    Ok,
    InputRejected(RejectionReason),
    /// No beam reached a valid stop, the best partial sequence is reported.
    DecodingExhausted,
    /// No completion can match the precursor mass, nothing is reported.
    InfeasibleMass,
    /// Precursor mass was infeasible, decoded again without mass constraints.
    UnconstrainedFallback,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Ok => "ok",
            PredictionStatus::InputRejected(RejectionReason::ChargeExceedsMax) => {
                "input_rejected:charge_exceeds_max"
            }
            PredictionStatus::InputRejected(RejectionReason::InvalidCharge) => {
                "input_rejected:invalid_charge"
            }
            PredictionStatus::InputRejected(RejectionReason::NoPeaks) => "input_rejected:no_peaks",
            PredictionStatus::DecodingExhausted => "decoding_exhausted",
            PredictionStatus::InfeasibleMass => "infeasible_mass",
            PredictionStatus::UnconstrainedFallback => "unconstrained_fallback",
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, PredictionStatus::InputRejected(_))
    }
}

impl std::fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for PredictionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefinementOutcome {
    #[default]
    NotRequested,
    Applied,
    /// No usable sample came out of the refiner, the coarse prediction is kept.
    Failed,
}

impl RefinementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefinementOutcome::NotRequested => "not_requested",
            RefinementOutcome::Applied => "applied",
            RefinementOutcome::Failed => "refinement_failed",
        }
    }
}

impl Serialize for RefinementOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Final, immutable output for one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub spectrum_id: String,
    /// Remapped residue labels, `None` when the spectrum was rejected
    /// or no sequence could be produced.
    pub sequence: Option<Vec<String>>,
    pub log_probability: Option<f64>,
    pub token_log_probabilities: Vec<f32>,
    pub confidence: Option<f64>,
    pub refinement: RefinementOutcome,
    pub status: PredictionStatus,
    pub isotope_offset: Option<i8>,
    pub mass_error_ppm: Option<f64>,
    /// Remapped annotation, only in non de-novo mode.
    pub target: Option<String>,
    pub passthrough: BTreeMap<String, String>,
}

impl PredictionRecord {
    pub fn refined(&self) -> bool {
        self.refinement == RefinementOutcome::Applied
    }

    /// Concatenated sequence, e.g. `PEPM[UNIMOD:35]K`.
    pub fn preds(&self) -> String {
        self.sequence
            .as_ref()
            .map(|s| s.concat())
            .unwrap_or_default()
    }

    /// Sequence as a token list, e.g. `P, E, P, M[UNIMOD:35], K`.
    pub fn preds_tokenised(&self) -> String {
        self.sequence
            .as_ref()
            .map(|s| s.join(", "))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(PredictionStatus::Ok.as_str(), "ok");
        assert_eq!(
            PredictionStatus::InputRejected(RejectionReason::NoPeaks).to_string(),
            "input_rejected:no_peaks"
        );
        assert!(PredictionStatus::InputRejected(RejectionReason::ChargeExceedsMax).is_rejected());
        assert!(!PredictionStatus::DecodingExhausted.is_rejected());
    }

    #[test]
    fn test_rendered_sequences() {
        let rec = PredictionRecord {
            spectrum_id: "0".into(),
            sequence: Some(vec!["P".into(), "M[UNIMOD:35]".into(), "K".into()]),
            log_probability: Some(-0.5),
            token_log_probabilities: vec![-0.1, -0.2, -0.2],
            confidence: Some(0.8),
            refinement: RefinementOutcome::NotRequested,
            status: PredictionStatus::Ok,
            isotope_offset: Some(0),
            mass_error_ppm: Some(1.0),
            target: None,
            passthrough: BTreeMap::new(),
        };
        assert_eq!(rec.preds(), "PM[UNIMOD:35]K");
        assert_eq!(rec.preds_tokenised(), "P, M[UNIMOD:35], K");
        assert!(!rec.refined());
    }
}

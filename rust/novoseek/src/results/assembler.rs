use crate::decoding::DecodeResult;
use crate::models::{
    Candidate,
    PredictionRecord,
    PredictionStatus,
    RefinementOutcome,
    ResidueSet,
    Spectrum,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Metadata columns copied to the output when present in the input.
///
/// `precursor_mz` and `precursor_charge` come from the spectrum itself,
/// everything else from its metadata map.
pub const PASSTHROUGH_COLUMNS: [&str; 12] = [
    "id",
    "experiment_name",
    "scan_number",
    "spectrum_index",
    "global_index",
    "file_index",
    "file",
    "sample",
    "index",
    "fileno",
    "precursor_mz",
    "precursor_charge",
];

/// Outcome of refinement for a single spectrum.
#[derive(Debug, Clone, PartialEq)]
pub enum RefinementUpdate {
    Refined(Candidate),
    Failed,
}

/// Builds the final records. Pure, does no I/O.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    residues: Arc<ResidueSet>,
    denovo: bool,
}

impl ResultAssembler {
    pub fn new(residues: Arc<ResidueSet>, denovo: bool) -> Self {
        Self { residues, denovo }
    }

    /// Merges first pass results and refinement updates (keyed by position
    /// in `spectra`) into records, in input order.
    pub fn assemble_batch(
        &self,
        spectra: &[Spectrum],
        first_pass: Vec<DecodeResult>,
        mut updates: BTreeMap<usize, RefinementUpdate>,
    ) -> Vec<PredictionRecord> {
        spectra
            .iter()
            .zip(first_pass)
            .enumerate()
            .map(|(i, (spectrum, result))| {
                let update = updates.remove(&i);
                self.assemble(spectrum, result, update)
            })
            .collect()
    }

    pub fn assemble(
        &self,
        spectrum: &Spectrum,
        result: DecodeResult,
        update: Option<RefinementUpdate>,
    ) -> PredictionRecord {
        let DecodeResult {
            status,
            candidates,
        } = result;
        let coarse = candidates.into_iter().next();
        let (chosen, refinement) = match update {
            None => (coarse, RefinementOutcome::NotRequested),
            Some(RefinementUpdate::Failed) => (coarse, RefinementOutcome::Failed),
            Some(RefinementUpdate::Refined(c)) => (Some(c), RefinementOutcome::Applied),
        };
        self.build_record(spectrum, status, chosen, refinement)
    }

    fn build_record(
        &self,
        spectrum: &Spectrum,
        status: PredictionStatus,
        chosen: Option<Candidate>,
        refinement: RefinementOutcome,
    ) -> PredictionRecord {
        // Rejected spectra never carry a prediction.
        let chosen = chosen.filter(|c| !status.is_rejected() && !c.is_empty());
        let sequence = chosen.as_ref().map(|c| {
            c.tokens
                .iter()
                .map(|&t| self.residues.canonical_label(t).to_string())
                .collect()
        });

        PredictionRecord {
            spectrum_id: spectrum.spectrum_id.clone(),
            sequence,
            log_probability: chosen.as_ref().map(|c| c.log_probability),
            token_log_probabilities: chosen
                .as_ref()
                .map(|c| c.token_log_probabilities.clone())
                .unwrap_or_default(),
            confidence: chosen.as_ref().map(|c| c.confidence),
            refinement,
            status,
            isotope_offset: chosen.as_ref().map(|c| c.isotope_offset),
            mass_error_ppm: chosen.as_ref().map(|c| c.mass_error_ppm),
            target: self.target(spectrum),
            passthrough: passthrough_columns(spectrum),
        }
    }

    /// Annotated sequence with remapped labels, only outside de-novo mode.
    fn target(&self, spectrum: &Spectrum) -> Option<String> {
        if self.denovo {
            return None;
        }
        let raw = spectrum.sequence.as_ref()?;
        match self.residues.tokenize(raw) {
            Ok(tokens) => Some(self.residues.render(&tokens, "")),
            Err(e) => {
                debug!(
                    "{}: keeping target as is, could not tokenize: {}",
                    spectrum.spectrum_id, e
                );
                Some(raw.clone())
            }
        }
    }
}

pub fn passthrough_columns(spectrum: &Spectrum) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for col in PASSTHROUGH_COLUMNS {
        let value = match col {
            "precursor_mz" => Some(spectrum.precursor_mz.to_string()),
            "precursor_charge" => Some(spectrum.precursor_charge.to_string()),
            other => spectrum.metadata.get(other).cloned(),
        };
        if let Some(v) = value {
            out.insert(col.to_string(), v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        RejectionReason,
        ResidueEntry,
        ResidueRemapping,
    };

    fn candidate(tokens: Vec<usize>, confidence: f64) -> Candidate {
        Candidate {
            token_log_probabilities: vec![-0.1; tokens.len() + 1],
            tokens,
            log_probability: -0.5,
            confidence,
            isotope_offset: 0,
            mass_error_ppm: 1.5,
        }
    }

    fn ok(c: Candidate) -> DecodeResult {
        DecodeResult {
            status: PredictionStatus::Ok,
            candidates: vec![c],
        }
    }

    #[test]
    fn test_legacy_tokens_are_remapped() {
        let entries = vec![
            ResidueEntry::new("M", 131.04),
            ResidueEntry::new("M(ox)", 147.04),
            ResidueEntry::new("K", 128.09),
        ];
        let rs = Arc::new(ResidueSet::new(&entries, ResidueRemapping::default()).unwrap());
        let ox = rs.id_of("M(ox)").unwrap();
        let k = rs.id_of("K").unwrap();
        let asm = ResultAssembler::new(rs.clone(), false);

        let spec = Spectrum::sample().with_sequence("M(ox)K");
        let rec = asm.assemble(&spec, ok(candidate(vec![ox, k], 0.9)), None);
        assert_eq!(rec.preds(), "M[UNIMOD:35]K");
        assert_eq!(rec.preds_tokenised(), "M[UNIMOD:35], K");
        assert_eq!(rec.target.as_deref(), Some("M[UNIMOD:35]K"));
    }

    #[test]
    fn test_denovo_has_no_target() {
        let rs = Arc::new(ResidueSet::default());
        let asm = ResultAssembler::new(rs.clone(), true);
        let spec = Spectrum::sample().with_sequence("PEPTIDE");
        let rec = asm.assemble(&spec, ok(candidate(vec![3, 4], 0.9)), None);
        assert!(rec.target.is_none());
    }

    #[test]
    fn test_passthrough_whitelist() {
        let spec = Spectrum::sample()
            .with_metadata("scan_number", "1234")
            .with_metadata("not_allowed", "x");
        let cols = passthrough_columns(&spec);
        assert_eq!(cols.get("scan_number").map(|s| s.as_str()), Some("1234"));
        assert_eq!(cols.get("precursor_charge").map(|s| s.as_str()), Some("2"));
        assert!(cols.contains_key("file"));
        assert!(!cols.contains_key("not_allowed"));
        assert!(!cols.contains_key("experiment_name"));
    }

    #[test]
    fn test_merge_keeps_input_order_and_flags() {
        let rs = Arc::new(ResidueSet::default());
        let asm = ResultAssembler::new(rs.clone(), true);
        let spectra: Vec<Spectrum> = (0..4)
            .map(|i| {
                let mut s = Spectrum::sample();
                s.spectrum_id = format!("s{}", i);
                s
            })
            .collect();
        let first_pass = vec![
            ok(candidate(vec![3], 0.95)),
            ok(candidate(vec![4], 0.2)),
            DecodeResult::rejected(RejectionReason::NoPeaks),
            ok(candidate(vec![5], 0.3)),
        ];
        let mut updates = BTreeMap::new();
        updates.insert(1, RefinementUpdate::Refined(candidate(vec![6, 7], 0.8)));
        updates.insert(3, RefinementUpdate::Failed);

        let recs = asm.assemble_batch(&spectra, first_pass, updates);
        let ids: Vec<&str> = recs.iter().map(|r| r.spectrum_id.as_str()).collect();
        assert_eq!(ids, vec!["s0", "s1", "s2", "s3"]);

        assert_eq!(recs[0].refinement, RefinementOutcome::NotRequested);
        assert!(recs[1].refined());
        assert_eq!(recs[1].sequence.as_ref().map(|s| s.len()), Some(2));
        assert!(recs[2].sequence.is_none());
        assert!(recs[2].confidence.is_none());
        assert_eq!(recs[2].status.as_str(), "input_rejected:no_peaks");
        assert_eq!(recs[3].refinement, RefinementOutcome::Failed);
        assert_eq!(recs[3].confidence, Some(0.3));
    }
}
